//! Username → display color assignment.

use std::hash::{DefaultHasher, Hash, Hasher};

/// Display palette, in assignment order. Values are CSS color names.
pub const USER_COLORS: [&str; 10] = [
    "darkred",
    "purple",
    "green",
    "olive",
    "navy",
    "teal",
    "chocolate",
    "darkmagenta",
    "seagreen",
    "rebeccapurple",
];

/// Pick the display color for `username`.
///
/// Stateless and deterministic for the lifetime of the process.
pub fn assign_color(username: &str) -> &'static str {
    let mut hasher = DefaultHasher::new();
    username.hash(&mut hasher);
    let index = (hasher.finish() % USER_COLORS.len() as u64) as usize;
    USER_COLORS[index]
}
