//! # Subscriptions
//!
//! Receiving side of a bus connection.

use crate::subject::subject_matches;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::debug;

/// A message delivered on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Concrete subject the message was published on.
    pub subject: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

impl Message {
    #[must_use]
    pub fn new(subject: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
        }
    }
}

/// Decrements the bus-wide subscription count when the subscription goes away.
struct ActiveGuard {
    active: Arc<AtomicUsize>,
    pattern: String,
}

impl ActiveGuard {
    fn new(active: Arc<AtomicUsize>, pattern: String) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self { active, pattern }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        debug!(pattern = %self.pattern, "Subscription dropped");
    }
}

/// A subscription handle for receiving messages.
///
/// Ends (returns `None`) once the owning connection is closed.
pub struct Subscription {
    receiver: broadcast::Receiver<Message>,
    pattern: String,
    closed: watch::Receiver<bool>,
    _guard: ActiveGuard,
}

impl Subscription {
    pub(crate) fn new(
        receiver: broadcast::Receiver<Message>,
        pattern: String,
        closed: watch::Receiver<bool>,
        active: Arc<AtomicUsize>,
    ) -> Self {
        let guard = ActiveGuard::new(active, pattern.clone());
        Self {
            receiver,
            pattern,
            closed,
            _guard: guard,
        }
    }

    /// Receive the next message matching the pattern.
    ///
    /// # Returns
    ///
    /// - `Some(message)` - The next matching message
    /// - `None` - The connection was closed
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            if *self.closed.borrow() {
                return None;
            }

            let message = tokio::select! {
                changed = self.closed.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                    continue;
                }
                received = self.receiver.recv() => match received {
                    Ok(m) => m,
                    Err(broadcast::error::RecvError::Closed) => return None,
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        debug!(lagged = count, pattern = %self.pattern, "Subscriber lagged, some messages dropped");
                        continue;
                    }
                },
            };

            if subject_matches(&self.pattern, &message.subject) {
                return Some(message);
            }
        }
    }

    /// The subscription pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}
