//! # Notification Publisher
//!
//! Announces local claim changes to the other instances on the bus.
//!
//! Publishing is best effort: with no connection the notification is skipped
//! and logged, since peers re-read claims from the store once their cache
//! entries expire. A publish error is returned to the caller and never retried.

use crate::error::NotifyError;
use crate::server::ServerState;
use crate::subjects::{account_update_subject, activation_subject};
use claim_types::short_key;
use std::sync::Arc;
use tracing::{debug, info};

/// Emits claim notifications over the connection owned by a [`ServerState`].
#[derive(Clone)]
pub struct NotificationPublisher {
    server: Arc<ServerState>,
}

impl NotificationPublisher {
    pub fn new(server: Arc<ServerState>) -> Self {
        Self { server }
    }

    /// Announce an updated account claim.
    ///
    /// # Errors
    ///
    /// [`NotifyError::Publish`] if the bus rejects the message.
    pub async fn publish_account_update(
        &self,
        claim: &[u8],
        account: &str,
    ) -> Result<(), NotifyError> {
        let subject = account_update_subject(account);
        self.publish(subject, claim, account).await
    }

    /// Announce a new activation claim.
    ///
    /// # Errors
    ///
    /// [`NotifyError::Publish`] if the bus rejects the message.
    pub async fn publish_activation(
        &self,
        hash: &str,
        account: &str,
        claim: &[u8],
    ) -> Result<(), NotifyError> {
        let subject = activation_subject(account, hash);
        self.publish(subject, claim, hash).await
    }

    async fn publish(&self, subject: String, claim: &[u8], key: &str) -> Result<(), NotifyError> {
        let connection = match self.server.get_connection().await {
            Some(connection) => connection,
            None => {
                info!(key = short_key(key), "Skipping claim notification, bus not connected");
                return Ok(());
            }
        };

        match connection.publish(&subject, claim).await {
            Ok(()) => {
                debug!(subject = %subject, bytes = claim.len(), "Claim notification sent");
                Ok(())
            }
            Err(source) => Err(NotifyError::Publish { subject, source }),
        }
    }
}
