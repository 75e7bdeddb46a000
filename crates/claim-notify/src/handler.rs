//! # Notification Handler
//!
//! Ingests claim notifications published by other instances: decode, persist
//! the raw payload, refresh the cache expiry.
//!
//! The subscriptions are wildcarded, so anything on a matching subject that
//! fails to decode is dropped. Nothing is reported back to the (anonymous)
//! publisher and the subscription keeps running.

use crate::cache::CacheState;
use crate::subjects::{account_update_wildcard, activation_wildcard};
use claim_bus::Subscription;
use claim_types::{short_key, ClaimCodec, ClaimStore, CodecError, StoreError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// The two kinds of claim notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// An account claim changed.
    AccountUpdate,
    /// An activation claim was issued.
    Activation,
}

impl NotificationKind {
    /// Both kinds, in subscription order.
    pub const ALL: [NotificationKind; 2] = [Self::AccountUpdate, Self::Activation];

    /// Wildcard subject covering every notification of this kind.
    #[must_use]
    pub fn subscription_subject(self) -> String {
        match self {
            Self::AccountUpdate => account_update_wildcard(),
            Self::Activation => activation_wildcard(),
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::AccountUpdate => "account_update",
            Self::Activation => "activation",
        }
    }
}

/// Why a notification was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Payload is not a claim of the expected kind.
    Decode(CodecError),
    /// Claim decoded without an identifier.
    EmptyClaim,
    /// Activation hash could not be computed.
    HashId(CodecError),
    /// The claim store rejected the write.
    Store(StoreError),
}

/// Result of handling one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Payload persisted and cache refreshed under `id`.
    Stored { id: String },
    /// Notification dropped.
    Dropped(DropReason),
}

impl HandleOutcome {
    #[must_use]
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }
}

/// Decodes, persists and caches inbound claim notifications.
pub struct NotificationHandler {
    codec: Arc<dyn ClaimCodec>,
    store: Arc<dyn ClaimStore>,
    cache: Arc<CacheState>,
    stored: AtomicU64,
    dropped: AtomicU64,
}

impl NotificationHandler {
    pub fn new(
        codec: Arc<dyn ClaimCodec>,
        store: Arc<dyn ClaimStore>,
        cache: Arc<CacheState>,
    ) -> Self {
        Self {
            codec,
            store,
            cache,
            stored: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// The cache this handler refreshes.
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheState> {
        &self.cache
    }

    /// Notifications persisted so far.
    #[must_use]
    pub fn stored_count(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }

    /// Notifications dropped so far.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Handle one notification of `kind`.
    pub fn handle(&self, kind: NotificationKind, payload: &[u8]) -> HandleOutcome {
        let outcome = match kind {
            NotificationKind::AccountUpdate => self.account_update(payload),
            NotificationKind::Activation => self.activation(payload),
        };
        let counter = match outcome {
            Ok(_) => &self.stored,
            Err(_) => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(id) => HandleOutcome::Stored { id },
            Err(reason) => HandleOutcome::Dropped(reason),
        }
    }

    /// Handle an account update notification.
    pub fn handle_account_update(&self, payload: &[u8]) -> HandleOutcome {
        self.handle(NotificationKind::AccountUpdate, payload)
    }

    /// Handle an activation notification.
    pub fn handle_activation(&self, payload: &[u8]) -> HandleOutcome {
        self.handle(NotificationKind::Activation, payload)
    }

    fn account_update(&self, payload: &[u8]) -> Result<String, DropReason> {
        let claim = self.codec.decode_account(payload).map_err(|e| {
            debug!(error = %e, "Dropping account notification that is not an account claim");
            DropReason::Decode(e)
        })?;
        if claim.is_empty() {
            debug!("Dropping account notification without a subject");
            return Err(DropReason::EmptyClaim);
        }

        let pub_key = claim.subject().to_string();
        self.persist(&pub_key, payload).map_err(|e| {
            error!(account = short_key(&pub_key), error = %e, "Unable to save account claim from notification");
            DropReason::Store(e)
        })?;
        Ok(pub_key)
    }

    fn activation(&self, payload: &[u8]) -> Result<String, DropReason> {
        let claim = self.codec.decode_activation(payload).map_err(|e| {
            debug!(error = %e, "Dropping activation notification that is not an activation claim");
            DropReason::Decode(e)
        })?;
        if claim.is_empty() {
            debug!("Dropping activation notification without a subject");
            return Err(DropReason::EmptyClaim);
        }

        let hash = claim.hash_id().map_err(|e| {
            error!(error = %e, "Unable to calculate hash id from activation token in notification");
            DropReason::HashId(e)
        })?;
        self.persist(&hash, payload).map_err(|e| {
            error!(hash = short_key(&hash), error = %e, "Unable to save activation token from notification");
            DropReason::Store(e)
        })?;
        Ok(hash)
    }

    /// Store first, then refresh the cache; a failed write leaves the cache untouched.
    fn persist(&self, id: &str, payload: &[u8]) -> Result<(), StoreError> {
        self.store.save(id, payload)?;
        self.cache.touch(id);
        debug!(id = short_key(id), "Claim refreshed from notification");
        Ok(())
    }

    /// Dispatch loop for one subscription. Runs until the connection closes.
    pub async fn run(self: Arc<Self>, mut subscription: Subscription, kind: NotificationKind) {
        debug!(kind = kind.label(), pattern = subscription.pattern(), "Notification dispatch started");
        while let Some(message) = subscription.recv().await {
            let outcome = self.handle(kind, &message.payload);
            debug!(kind = kind.label(), subject = %message.subject, ?outcome, "Notification handled");
        }
        debug!(kind = kind.label(), "Notification dispatch ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claim_types::test_utils::{account_token, activation_token, encode_token};
    use claim_types::{JwtClaimCodec, MemoryClaimStore};
    use serde_json::json;

    struct FailingStore;

    impl ClaimStore for FailingStore {
        fn save(&self, _id: &str, _payload: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Io("disk full".to_string()))
        }

        fn load(&self, _id: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }
    }

    fn handler_with(store: Arc<dyn ClaimStore>) -> NotificationHandler {
        NotificationHandler::new(Arc::new(JwtClaimCodec::new()), store, Arc::new(CacheState::new()))
    }

    #[test]
    fn test_account_update_stored() {
        let store = Arc::new(MemoryClaimStore::new());
        let handler = handler_with(store.clone());
        let token = account_token("ACCOUNTKEY");

        let outcome = handler.handle_account_update(&token);

        assert_eq!(outcome, HandleOutcome::Stored { id: "ACCOUNTKEY".into() });
        assert_eq!(store.load("ACCOUNTKEY").unwrap(), Some(token));
        assert!(handler.cache().valid_until("ACCOUNTKEY").is_some());
        assert_eq!(handler.stored_count(), 1);
    }

    #[test]
    fn test_activation_stored_under_hash() {
        let store = Arc::new(MemoryClaimStore::new());
        let handler = handler_with(store.clone());
        let token = activation_token("AEXPORTER", "AIMPORTER", "orders.*");
        let hash = JwtClaimCodec::new()
            .decode_activation(&token)
            .unwrap()
            .hash_id()
            .unwrap();

        let outcome = handler.handle_activation(&token);

        assert_eq!(outcome, HandleOutcome::Stored { id: hash.clone() });
        assert_eq!(store.load(&hash).unwrap(), Some(token));
        assert!(handler.cache().valid_until(&hash).is_some());
    }

    #[test]
    fn test_malformed_dropped_without_side_effects() {
        let store = Arc::new(MemoryClaimStore::new());
        let handler = handler_with(store.clone());

        for payload in [&b"garbage"[..], b"", b"a.b.c"] {
            assert!(matches!(
                handler.handle_account_update(payload),
                HandleOutcome::Dropped(DropReason::Decode(_))
            ));
            assert!(matches!(
                handler.handle_activation(payload),
                HandleOutcome::Dropped(DropReason::Decode(_))
            ));
        }

        assert!(store.is_empty());
        assert!(handler.cache().is_empty());
        assert_eq!(handler.dropped_count(), 6);
        assert_eq!(handler.stored_count(), 0);
    }

    #[test]
    fn test_wrong_kind_dropped() {
        let handler = handler_with(Arc::new(MemoryClaimStore::new()));
        let activation = activation_token("AEXPORTER", "AIMPORTER", "orders");
        assert!(!handler.handle_account_update(&activation).is_stored());
        assert!(handler.cache().is_empty());
    }

    #[test]
    fn test_empty_claim_dropped() {
        let handler = handler_with(Arc::new(MemoryClaimStore::new()));
        let token = encode_token(&json!({ "type": "account" }));
        assert_eq!(
            handler.handle_account_update(&token),
            HandleOutcome::Dropped(DropReason::EmptyClaim)
        );
    }

    #[test]
    fn test_activation_without_import_subject_dropped() {
        let handler = handler_with(Arc::new(MemoryClaimStore::new()));
        let token = encode_token(&json!({
            "iss": "AEXPORTER",
            "sub": "AIMPORTER",
            "type": "activation",
        }));
        assert!(matches!(
            handler.handle_activation(&token),
            HandleOutcome::Dropped(DropReason::HashId(_))
        ));
        assert!(handler.cache().is_empty());
    }

    #[test]
    fn test_store_failure_leaves_cache_untouched() {
        let handler = handler_with(Arc::new(FailingStore));

        let account = handler.handle_account_update(&account_token("ACCOUNTKEY"));
        let activation =
            handler.handle_activation(&activation_token("AEXPORTER", "AIMPORTER", "orders"));

        assert!(matches!(account, HandleOutcome::Dropped(DropReason::Store(_))));
        assert!(matches!(activation, HandleOutcome::Dropped(DropReason::Store(_))));
        assert!(handler.cache().is_empty());
    }

    #[test]
    fn test_kind_subjects() {
        assert_eq!(
            NotificationKind::AccountUpdate.subscription_subject(),
            "SYS.ACCOUNT.*.CLAIMS.UPDATE"
        );
        assert_eq!(
            NotificationKind::Activation.subscription_subject(),
            "SYS.ACCOUNT.*.CLAIMS.ACTIVATE.*"
        );
    }
}
