//! Identifier normalization.
//!
//! Event names, discriminators and descriptor keys are compared in a
//! "smashed" form: separators removed and everything lower-cased, so
//! `ready-to-capture`, `readyToCapture` and `READY_TO_CAPTURE` are the same name.

/// Normalize an identifier for comparison.
///
/// The wildcard `*` is passed through unchanged.
pub fn smash(identifier: &str) -> String {
    if identifier == "*" {
        return identifier.to_string();
    }
    identifier
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
