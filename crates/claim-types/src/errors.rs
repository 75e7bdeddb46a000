//! # Error Types
//!
//! Errors raised by the claim codec and claim store capabilities.

use thiserror::Error;

/// Errors produced while decoding a claim token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Token is not valid UTF-8.
    #[error("Claim token is not valid UTF-8")]
    NotUtf8,

    /// Token does not have the `header.payload.signature` shape.
    #[error("Malformed token: expected 3 segments, found {segments}")]
    Malformed { segments: usize },

    /// A token segment is not valid base64url.
    #[error("Invalid base64 in {segment} segment: {reason}")]
    Base64 {
        segment: &'static str,
        reason: String,
    },

    /// A token segment is not the expected JSON document.
    #[error("Invalid JSON in {segment} segment: {reason}")]
    Json {
        segment: &'static str,
        reason: String,
    },

    /// Header declares a token type other than JWT.
    #[error("Unsupported token type: {0}")]
    UnsupportedTokenType(String),

    /// Claim declares a different claim type than requested.
    #[error("Wrong claim type: expected {expected}, found {found}")]
    WrongClaimType {
        expected: &'static str,
        found: String,
    },

    /// Not enough data in an activation claim to compute its hash id.
    #[error("Activation claim is missing {0}, cannot compute hash id")]
    IncompleteActivation(&'static str),
}

/// Errors produced by a claim store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Identifier cannot be used as a storage key.
    #[error("Invalid claim key: {0:?}")]
    InvalidKey(String),

    /// Underlying I/O failed.
    #[error("Claim store I/O error: {0}")]
    Io(String),

    /// Store refuses writes.
    #[error("Claim store is read-only")]
    ReadOnly,
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}
