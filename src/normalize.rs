//! Key normalization for free-text names
//!
//! Every composite dedup key and every stored display name passes through
//! [`normalize`]: tabs, newlines, carriage returns and other control
//! characters become spaces, runs of whitespace collapse to a single space,
//! and the result is trimmed.

/// Normalize a name. Idempotent, and the result holds no control characters.
pub fn normalize(text: &str) -> String {
    text.split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Null-preserving variant of [`normalize`].
pub fn clean_name(text: Option<&str>) -> Option<String> {
    text.map(normalize)
}
