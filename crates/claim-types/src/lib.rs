//! # Claim Types Crate
//!
//! Shared claim model and the two capabilities the notification core consumes
//! from the surrounding server:
//!
//! - [`ClaimCodec`]: turns raw notification payloads into typed claims.
//! - [`ClaimStore`]: persists raw claim payloads keyed by identifier.
//!
//! Claims are JWT documents. Account claims are identified by the account
//! public key (`sub`); activation claims by a content hash computed from
//! issuer, subject and import subject.
//!
//! Signature verification is not performed here; it belongs to the serving
//! path that accepts claims from clients.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod claims;
pub mod codec;
pub mod errors;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use claims::{short_key, AccountClaim, ActivationClaim, ImportDetails};
pub use codec::{ClaimCodec, JwtClaimCodec};
pub use errors::{CodecError, StoreError};
pub use store::{ClaimStore, DirClaimStore, MemoryClaimStore};

/// Number of characters kept by [`short_key`] when logging identifiers.
pub const SHORT_KEY_LEN: usize = 12;
