//! # Claim Codec
//!
//! Decodes raw notification payloads into typed claims.

use crate::claims::{AccountClaim, ActivationClaim, ACCOUNT_CLAIM_TYPE, ACTIVATION_CLAIM_TYPE};
use crate::errors::CodecError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Capability for decoding claim payloads.
///
/// Implementations must be cheap to call concurrently; the notification
/// handler decodes every inbound message on the bus dispatch task.
pub trait ClaimCodec: Send + Sync {
    /// Decode an account claim.
    fn decode_account(&self, payload: &[u8]) -> Result<AccountClaim, CodecError>;

    /// Decode an activation claim.
    fn decode_activation(&self, payload: &[u8]) -> Result<ActivationClaim, CodecError>;
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    typ: String,
}

/// JWT codec for `header.payload.signature` tokens.
///
/// Only the structure is checked: the header must declare a JWT, the payload
/// must be a JSON claim of the requested type. Signatures are not verified.
#[derive(Debug, Clone, Copy, Default)]
pub struct JwtClaimCodec;

impl JwtClaimCodec {
    /// Create a new codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn segments(payload: &[u8]) -> Result<(&str, &str), CodecError> {
        let token = std::str::from_utf8(payload).map_err(|_| CodecError::NotUtf8)?;
        let parts: Vec<&str> = token.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(CodecError::Malformed {
                segments: parts.len(),
            });
        }
        Ok((parts[0], parts[1]))
    }

    fn decode_segment<T: DeserializeOwned>(
        segment: &'static str,
        encoded: &str,
    ) -> Result<T, CodecError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map_err(|e| CodecError::Base64 {
                segment,
                reason: e.to_string(),
            })?;
        serde_json::from_slice(&bytes).map_err(|e| CodecError::Json {
            segment,
            reason: e.to_string(),
        })
    }

    fn decode_claims<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
        let (header, body) = Self::segments(payload)?;

        let header: Header = Self::decode_segment("header", header)?;
        if !header.typ.eq_ignore_ascii_case("jwt") {
            return Err(CodecError::UnsupportedTokenType(header.typ));
        }

        Self::decode_segment("payload", body)
    }
}

fn check_type(declared: Option<String>, expected: &'static str) -> Result<(), CodecError> {
    match declared {
        Some(found) if found != expected => Err(CodecError::WrongClaimType { expected, found }),
        _ => Ok(()),
    }
}

impl ClaimCodec for JwtClaimCodec {
    fn decode_account(&self, payload: &[u8]) -> Result<AccountClaim, CodecError> {
        let claim: AccountClaim = Self::decode_claims(payload)?;
        check_type(claim.declared_type(), ACCOUNT_CLAIM_TYPE)?;
        Ok(claim)
    }

    fn decode_activation(&self, payload: &[u8]) -> Result<ActivationClaim, CodecError> {
        let claim: ActivationClaim = Self::decode_claims(payload)?;
        check_type(claim.declared_type(), ACTIVATION_CLAIM_TYPE)?;
        Ok(claim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{account_token, activation_token, encode_token};
    use serde_json::json;

    #[test]
    fn test_decode_account() {
        let token = account_token("ACCOUNTKEY1");
        let claim = JwtClaimCodec::new().decode_account(&token).unwrap();
        assert_eq!(claim.subject(), "ACCOUNTKEY1");
        assert!(!claim.is_empty());
    }

    #[test]
    fn test_decode_activation() {
        let token = activation_token("AEXPORTER", "AIMPORTER", "orders.>");
        let claim = JwtClaimCodec::new().decode_activation(&token).unwrap();
        assert_eq!(claim.iss, "AEXPORTER");
        assert_eq!(claim.nats.subject, "orders.>");
        assert!(claim.hash_id().is_ok());
    }

    #[test]
    fn test_garbage_rejected() {
        let codec = JwtClaimCodec::new();
        assert!(matches!(
            codec.decode_account(b"not a token"),
            Err(CodecError::Malformed { segments: 1 })
        ));
        assert_eq!(
            codec.decode_account(&[0xff, 0xfe, 0xfd]),
            Err(CodecError::NotUtf8)
        );
        assert!(matches!(
            codec.decode_account(b"a.b.c"),
            Err(CodecError::Base64 { .. }) | Err(CodecError::Json { .. })
        ));
    }

    #[test]
    fn test_wrong_claim_type_rejected() {
        let token = activation_token("AEXPORTER", "AIMPORTER", "orders");
        let result = JwtClaimCodec::new().decode_account(&token);
        assert!(matches!(result, Err(CodecError::WrongClaimType { .. })));
    }

    #[test]
    fn test_nested_claim_type() {
        let token = encode_token(&json!({
            "sub": "ACCOUNTKEY2",
            "nats": { "type": "account" }
        }));
        let claim = JwtClaimCodec::new().decode_account(&token).unwrap();
        assert_eq!(claim.subject(), "ACCOUNTKEY2");
    }

    #[test]
    fn test_non_jwt_header_rejected() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"typ":"xml"}"#);
        let body = URL_SAFE_NO_PAD.encode(br#"{"sub":"X"}"#);
        let token = format!("{header}.{body}.sig");
        assert_eq!(
            JwtClaimCodec::new().decode_account(token.as_bytes()),
            Err(CodecError::UnsupportedTokenType("xml".to_string()))
        );
    }

    #[test]
    fn test_empty_claim_decodes() {
        let token = encode_token(&json!({ "type": "account" }));
        let claim = JwtClaimCodec::new().decode_account(&token).unwrap();
        assert!(claim.is_empty());
    }
}
