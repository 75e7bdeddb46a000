//! # Cache State
//!
//! Claim identifier → expiry instant, consulted by the serving path to decide
//! whether a cached claim is still fresh.
//!
//! Guarded by its own lock, never held together with the connection lock
//! and never held across an await.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Default validity window applied by [`CacheState::touch`].
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Expiry map for cached claims.
pub struct CacheState {
    valid_until: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl CacheState {
    /// Create a cache with the default one hour TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }

    /// Create a cache with a custom TTL.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            valid_until: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Mark `id` valid until now + TTL.
    ///
    /// An existing later expiry is kept, so duplicate or reordered deliveries
    /// never shorten the window. Returns the stored expiry.
    pub fn touch(&self, id: &str) -> Instant {
        let expiry = Instant::now() + self.ttl;
        let mut entries = self.valid_until.lock();
        let stored = entries.entry(id.to_string()).or_insert(expiry);
        if expiry > *stored {
            *stored = expiry;
        }
        *stored
    }

    /// Expiry recorded for `id`.
    #[must_use]
    pub fn valid_until(&self, id: &str) -> Option<Instant> {
        self.valid_until.lock().get(id).copied()
    }

    /// True when `id` has an expiry in the future.
    #[must_use]
    pub fn is_fresh(&self, id: &str) -> bool {
        self.valid_until(id)
            .is_some_and(|expiry| expiry > Instant::now())
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.valid_until.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.valid_until.lock().is_empty()
    }
}

impl Default for CacheState {
    fn default() -> Self {
        Self::new()
    }
}
