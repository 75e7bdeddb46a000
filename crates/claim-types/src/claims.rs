//! # Claims
//!
//! Decoded JWT payloads for the two notification kinds.

use crate::errors::CodecError;
use crate::SHORT_KEY_LEN;
use serde::{Deserialize, Serialize};
use data_encoding::BASE32;
use sha2::{Digest, Sha256};

/// Claim type tag carried by account claims.
pub const ACCOUNT_CLAIM_TYPE: &str = "account";

/// Claim type tag carried by activation claims.
pub const ACTIVATION_CLAIM_TYPE: &str = "activation";

/// An account claim: the signed description of an account.
///
/// The account public key in `sub` is the claim identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountClaim {
    /// Account public key.
    #[serde(default)]
    pub sub: String,
    /// Issuing operator key.
    #[serde(default)]
    pub iss: String,
    /// Issued-at (unix seconds).
    #[serde(default)]
    pub iat: i64,
    /// Expiry (unix seconds), zero when the claim does not expire.
    #[serde(default)]
    pub exp: i64,
    /// Token id.
    #[serde(default)]
    pub jti: String,
    /// Human readable name.
    #[serde(default)]
    pub name: String,
    /// Top-level claim type (older token layout).
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub claim_type: Option<String>,
    /// Claim type nested under the `nats` section (newer token layout).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nats: Option<serde_json::Value>,
}

impl AccountClaim {
    /// The claim identifier (account public key).
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.sub
    }

    /// True when the decoded claim carries no identifier.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sub.is_empty()
    }

    pub(crate) fn declared_type(&self) -> Option<String> {
        declared_type(self.claim_type.as_deref(), self.nats.as_ref())
    }
}

/// The `nats` section of an activation claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDetails {
    /// Subject being imported, possibly containing wildcards.
    #[serde(default)]
    pub subject: String,
    /// Export type (`stream` or `service`).
    #[serde(default, rename = "kind", skip_serializing_if = "String::is_empty")]
    pub import_type: String,
    /// Claim type (newer token layout).
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub claim_type: Option<String>,
}

/// An activation claim: grants an account access to another account's export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationClaim {
    /// Importing account public key.
    #[serde(default)]
    pub sub: String,
    /// Exporting account public key.
    #[serde(default)]
    pub iss: String,
    /// Issued-at (unix seconds).
    #[serde(default)]
    pub iat: i64,
    /// Expiry (unix seconds).
    #[serde(default)]
    pub exp: i64,
    /// Token id.
    #[serde(default)]
    pub jti: String,
    /// Human readable name.
    #[serde(default)]
    pub name: String,
    /// Top-level claim type (older token layout).
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub claim_type: Option<String>,
    /// Import details.
    #[serde(default)]
    pub nats: ImportDetails,
}

impl ActivationClaim {
    /// The importing account.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.sub
    }

    /// True when the decoded claim carries no identifier.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sub.is_empty()
    }

    /// Compute the content hash identifying this activation.
    ///
    /// SHA-256 over `"{iss}.{sub}.{subject}"` where wildcard tokens of the
    /// import subject are replaced with `_`, encoded as padded RFC 4648 base32.
    /// Other instances publish and store activations under this exact id.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::IncompleteActivation`] when the issuer, subject
    /// or import subject is empty.
    pub fn hash_id(&self) -> Result<String, CodecError> {
        if self.iss.is_empty() {
            return Err(CodecError::IncompleteActivation("issuer"));
        }
        if self.sub.is_empty() {
            return Err(CodecError::IncompleteActivation("subject"));
        }
        if self.nats.subject.is_empty() {
            return Err(CodecError::IncompleteActivation("import subject"));
        }

        let base = format!(
            "{}.{}.{}",
            self.iss,
            self.sub,
            clean_subject(&self.nats.subject)
        );
        let digest = Sha256::digest(base.as_bytes());
        Ok(BASE32.encode(&digest))
    }

    pub(crate) fn declared_type(&self) -> Option<String> {
        self.claim_type
            .clone()
            .or_else(|| self.nats.claim_type.clone())
    }
}

/// Replace wildcard tokens so the subject is stable inside a hash base.
fn clean_subject(subject: &str) -> String {
    subject
        .split('.')
        .map(|token| match token {
            "*" | ">" => "_",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn declared_type(top_level: Option<&str>, nats: Option<&serde_json::Value>) -> Option<String> {
    top_level.map(str::to_string).or_else(|| {
        nats.and_then(|n| n.get("type"))
            .and_then(|t| t.as_str())
            .map(str::to_string)
    })
}

/// Shorten an identifier for log output.
#[must_use]
pub fn short_key(key: &str) -> &str {
    match key.char_indices().nth(SHORT_KEY_LEN) {
        Some((idx, _)) => &key[..idx],
        None => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activation(iss: &str, sub: &str, subject: &str) -> ActivationClaim {
        ActivationClaim {
            iss: iss.to_string(),
            sub: sub.to_string(),
            nats: ImportDetails {
                subject: subject.to_string(),
                ..ImportDetails::default()
            },
            ..ActivationClaim::default()
        }
    }

    #[test]
    fn test_hash_id_is_deterministic() {
        let a = activation("AEXPORTER", "AIMPORTER", "orders.created");
        let b = activation("AEXPORTER", "AIMPORTER", "orders.created");
        assert_eq!(a.hash_id().unwrap(), b.hash_id().unwrap());
        assert_eq!(a.hash_id().unwrap().len(), 56);
    }

    #[test]
    fn test_hash_id_known_answer() {
        let claim = activation("AEXPORTER", "AIMPORTER", "orders.*");
        assert_eq!(
            claim.hash_id().unwrap(),
            "7RBMXB46V5BPDDZT7MWVOQAKDBOX54JXH6CPNAHMPTGS7V2QVFUA===="
        );
    }

    #[test]
    fn test_hash_id_depends_on_each_field() {
        let base = activation("AEXPORTER", "AIMPORTER", "orders.created")
            .hash_id()
            .unwrap();
        let other_issuer = activation("AOTHER", "AIMPORTER", "orders.created")
            .hash_id()
            .unwrap();
        let other_subject = activation("AEXPORTER", "AIMPORTER", "orders.deleted")
            .hash_id()
            .unwrap();
        assert_ne!(base, other_issuer);
        assert_ne!(base, other_subject);
    }

    #[test]
    fn test_hash_id_wildcards_normalized() {
        let star = activation("AEXPORTER", "AIMPORTER", "orders.*").hash_id().unwrap();
        let underscore = activation("AEXPORTER", "AIMPORTER", "orders._")
            .hash_id()
            .unwrap();
        assert_eq!(star, underscore);
    }

    #[test]
    fn test_hash_id_incomplete() {
        let missing_subject = activation("AEXPORTER", "AIMPORTER", "");
        assert_eq!(
            missing_subject.hash_id(),
            Err(CodecError::IncompleteActivation("import subject"))
        );
        let missing_issuer = activation("", "AIMPORTER", "orders");
        assert_eq!(
            missing_issuer.hash_id(),
            Err(CodecError::IncompleteActivation("issuer"))
        );
    }

    #[test]
    fn test_clean_subject() {
        assert_eq!(clean_subject("a.*.b.>"), "a._.b._");
        assert_eq!(clean_subject("*"), "_");
        assert_eq!(clean_subject("plain"), "plain");
    }

    #[test]
    fn test_short_key() {
        assert_eq!(short_key("ABCDEFGHIJKLMNOP"), "ABCDEFGHIJKL");
        assert_eq!(short_key("SHORT"), "SHORT");
        assert_eq!(short_key(""), "");
    }
}
