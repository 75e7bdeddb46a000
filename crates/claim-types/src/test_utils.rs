//! Unsigned token builders for tests.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};

/// Encode a claim body as an unsigned `header.payload.signature` token.
pub fn encode_token(claims: &Value) -> Vec<u8> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"typ":"jwt","alg":"ed25519"}"#);
    let body = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{body}.dGVzdC1zaWduYXR1cmU").into_bytes()
}

/// Build an account claim token for `account`.
pub fn account_token(account: &str) -> Vec<u8> {
    encode_token(&json!({
        "jti": format!("jti-{account}"),
        "iat": 1_560_000_000,
        "iss": "OPERATOR",
        "name": "test account",
        "sub": account,
        "type": "account",
    }))
}

/// Build an activation claim token granting `importer` access to `subject`.
pub fn activation_token(exporter: &str, importer: &str, subject: &str) -> Vec<u8> {
    encode_token(&json!({
        "jti": format!("jti-{importer}"),
        "iat": 1_560_000_000,
        "iss": exporter,
        "name": "test activation",
        "sub": importer,
        "type": "activation",
        "nats": { "subject": subject, "kind": "stream" },
    }))
}
