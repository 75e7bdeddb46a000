//! Subjects and subscription patterns.
//!
//! Subjects are `.`-separated tokens (e.g. `SYS.ACCOUNT.AXYZ.CLAIMS.UPDATE`).
//! Patterns support wildcards:
//! - `*` matches exactly one token
//! - `>` matches one or more trailing tokens (must be last)

use crate::error::BusError;

/// Token separator.
pub const TOKEN_SEPARATOR: char = '.';

/// Single-token wildcard.
pub const WILDCARD_SINGLE: &str = "*";

/// Trailing multi-token wildcard.
pub const WILDCARD_MULTI: &str = ">";

/// Validate a concrete publish subject.
///
/// # Errors
///
/// Returns [`BusError::InvalidSubject`] for empty subjects, empty tokens,
/// whitespace, or wildcard tokens.
pub fn validate_subject(subject: &str) -> Result<(), BusError> {
    check_tokens(subject)?;
    if subject
        .split(TOKEN_SEPARATOR)
        .any(|t| t == WILDCARD_SINGLE || t == WILDCARD_MULTI)
    {
        return Err(invalid(subject, "wildcards are not allowed in publish subjects"));
    }
    Ok(())
}

/// Validate a subscription pattern.
///
/// # Errors
///
/// Returns [`BusError::InvalidSubject`] for malformed patterns or a `>`
/// that is not the last token.
pub fn validate_pattern(pattern: &str) -> Result<(), BusError> {
    check_tokens(pattern)?;
    let tokens: Vec<&str> = pattern.split(TOKEN_SEPARATOR).collect();
    let last = tokens.len() - 1;
    if tokens[..last].iter().any(|t| *t == WILDCARD_MULTI) {
        return Err(invalid(pattern, "'>' must be the last token"));
    }
    Ok(())
}

fn check_tokens(subject: &str) -> Result<(), BusError> {
    if subject.is_empty() {
        return Err(invalid(subject, "subject is empty"));
    }
    if subject.chars().any(char::is_whitespace) {
        return Err(invalid(subject, "subject contains whitespace"));
    }
    if subject.split(TOKEN_SEPARATOR).any(str::is_empty) {
        return Err(invalid(subject, "subject contains an empty token"));
    }
    Ok(())
}

fn invalid(subject: &str, reason: &'static str) -> BusError {
    BusError::InvalidSubject {
        subject: subject.to_string(),
        reason,
    }
}

/// Check whether `subject` matches `pattern`.
///
/// Both arguments are assumed to be valid; no validation is performed.
#[must_use]
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split(TOKEN_SEPARATOR);
    let mut subject_tokens = subject.split(TOKEN_SEPARATOR);

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(WILDCARD_MULTI), Some(_)) => return true,
            (Some(WILDCARD_SINGLE), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
