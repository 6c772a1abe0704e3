//! MUD name shape validation (spec §3).
//!
//! A valid name is 3–32 characters drawn from `[A-Za-z0-9_-]`. The gateway
//! never silently rewrites an authenticating name; [`suggest_name`] only
//! produces a candidate to surface in an `error` frame's `details`.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MudNameError {
    #[error("mud name must be between {min} and {max} characters")]
    WrongLength { min: usize, max: usize },
    #[error("mud name contains a space")]
    ContainsSpace,
    #[error("mud name contains characters outside [A-Za-z0-9_-]")]
    InvalidChars,
}

const MIN_LEN: usize = 3;
const MAX_LEN: usize = 32;

fn is_valid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Validate a candidate MUD name against the shape rules in spec §3.
pub fn validate_name(name: &str) -> Result<(), MudNameError> {
    if name.contains(' ') {
        return Err(MudNameError::ContainsSpace);
    }
    if !name.chars().all(is_valid_char) {
        return Err(MudNameError::InvalidChars);
    }
    if name.chars().count() < MIN_LEN || name.chars().count() > MAX_LEN {
        return Err(MudNameError::WrongLength {
            min: MIN_LEN,
            max: MAX_LEN,
        });
    }
    Ok(())
}

/// Suggest a valid name for an invalid one: collapse whitespace runs to a
/// single `-`, strip any remaining invalid characters, and clamp length.
/// Used only to populate `error.details.suggestedName` — never applied
/// automatically to an authenticating connection.
pub fn suggest_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_was_space = false;
    for c in name.chars() {
        if c.is_whitespace() {
            if !prev_was_space && !out.is_empty() {
                out.push('-');
            }
            prev_was_space = true;
            continue;
        }
        prev_was_space = false;
        if is_valid_char(c) {
            out.push(c);
        }
    }
    let out: String = out.chars().take(MAX_LEN).collect();
    if out.is_empty() {
        "Mud".to_string()
    } else {
        out
    }
}
