//! Position markers embedded in test text.
//!
//! Test records that belong to a position-resolved measurement carry a
//! `Pixel=R<row>C<col>` marker in their alarm id or test text. Everything
//! that knows the marker's textual form lives here.

use crate::constants::{
    MARKER_PREFIX_PATTERN, MARKER_SUFFIX_PATTERN, POSITION_MARKER, POSITION_PATTERN,
};
use crate::error::MarkerError;

use regex::Regex;
use std::sync::OnceLock;

static POSITION_REGEX: OnceLock<Regex> = OnceLock::new();
static SUFFIX_REGEX: OnceLock<Regex> = OnceLock::new();
static PREFIX_REGEX: OnceLock<Regex> = OnceLock::new();

fn position_regex() -> &'static Regex {
    POSITION_REGEX
        .get_or_init(|| Regex::new(POSITION_PATTERN).expect("Failed to compile position regex"))
}

fn suffix_regex() -> &'static Regex {
    SUFFIX_REGEX.get_or_init(|| {
        Regex::new(MARKER_SUFFIX_PATTERN).expect("Failed to compile marker suffix regex")
    })
}

fn prefix_regex() -> &'static Regex {
    PREFIX_REGEX.get_or_init(|| {
        Regex::new(MARKER_PREFIX_PATTERN).expect("Failed to compile marker prefix regex")
    })
}

/// Grid position named by a marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub row: i32,
    pub col: i32,
}

impl Position {
    /// Output coordinates: column is X, row is Y
    pub fn xy(&self) -> (i32, i32) {
        (self.col, self.row)
    }
}

/// True when the literal marker prefix appears anywhere in `text`
pub fn has_marker(text: &str) -> bool {
    text.contains(POSITION_MARKER)
}

/// Parse the first complete `Pixel=R<row>C<col>` marker in `text`.
///
/// `Ok(None)` when no complete marker is present; an error when one is
/// present but a coordinate does not fit in `i32`.
pub fn extract_position_marker(text: &str) -> Result<Option<Position>, MarkerError> {
    let Some(caps) = position_regex().captures(text) else {
        return Ok(None);
    };
    let overflow = || MarkerError::CoordinateOverflow {
        marker: caps[0].to_string(),
    };
    let row = caps[1].parse::<i32>().map_err(|_| overflow())?;
    let col = caps[2].parse::<i32>().map_err(|_| overflow())?;
    Ok(Some(Position { row, col }))
}

/// Strip the marker from a parameter name.
///
/// Removes every `;Pixel=R<n>C<n>`, then a leading `Pixel=R<n>C<n>;`,
/// then surrounding whitespace.
pub fn clean_param_name(text: &str) -> String {
    let without_suffix = suffix_regex().replace_all(text, "");
    let without_prefix = prefix_regex().replace(&without_suffix, "");
    without_prefix.trim().to_string()
}
