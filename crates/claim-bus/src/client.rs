//! # Bus Client
//!
//! Capability traits the connection manager consumes, the options passed on
//! connect, and the lifecycle events a client reports back.

use crate::error::BusError;
use crate::subscription::Subscription;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Lifecycle callbacks from a bus client.
///
/// Delivered asynchronously, with no ordering guarantee relative to message
/// dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Asynchronous error reported by the client.
    Error(String),
    /// Connection dropped; the client is attempting to reconnect.
    Disconnected,
    /// Connection re-established by the client's own reconnect logic.
    Reconnected,
    /// Cluster topology changed.
    DiscoveredServers {
        /// Servers learned from the cluster.
        discovered: Vec<String>,
        /// All servers the client currently knows about.
        known: Vec<String>,
    },
    /// The client has given up: the connection is permanently closed.
    ///
    /// The emitting connection already reports `is_closed() == true` when
    /// this event is sent.
    Closed,
}

/// Sending half of a lifecycle event channel, handed to the client on connect.
pub type ConnectionEventSender = mpsc::UnboundedSender<ConnectionEvent>;

/// Receiving half of a lifecycle event channel.
pub type ConnectionEventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;

/// Create a lifecycle event channel.
#[must_use]
pub fn event_channel() -> (ConnectionEventSender, ConnectionEventReceiver) {
    mpsc::unbounded_channel()
}

/// TLS material for a bus connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Root CA bundle.
    pub root: Option<PathBuf>,
    /// Client certificate.
    pub cert: Option<PathBuf>,
    /// Client private key.
    pub key: Option<PathBuf>,
}

impl TlsOptions {
    /// True when any TLS material is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.root.is_some() || self.cert.is_some()
    }
}

/// Options for a single connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Server addresses, tried in order.
    pub servers: Vec<String>,
    /// Reconnect attempts the client makes after a drop; negative is unlimited.
    pub max_reconnects: i32,
    /// Wait between the client's reconnect attempts.
    pub reconnect_wait: Duration,
    /// Timeout for establishing the connection.
    pub connect_timeout: Duration,
    /// TLS material.
    pub tls: TlsOptions,
    /// Credentials file.
    pub user_credentials: Option<PathBuf>,
    /// Connection name reported to the server.
    pub name: Option<String>,
}

impl ConnectOptions {
    /// Options for `servers` with client defaults.
    #[must_use]
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            servers,
            max_reconnects: 60,
            reconnect_wait: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(2),
            tls: TlsOptions::default(),
            user_credentials: None,
            name: None,
        }
    }

    #[must_use]
    pub fn with_max_reconnects(mut self, max_reconnects: i32) -> Self {
        self.max_reconnects = max_reconnects;
        self
    }

    #[must_use]
    pub fn with_reconnect_wait(mut self, wait: Duration) -> Self {
        self.reconnect_wait = wait;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub fn with_user_credentials(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_credentials = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Comma separated server list, as reported in logs and errors.
    #[must_use]
    pub fn server_url(&self) -> String {
        self.servers.join(",")
    }

    /// Check that configured TLS and credential files are readable.
    ///
    /// # Errors
    ///
    /// [`BusError::Tls`] for missing TLS files or a certificate without a
    /// key, [`BusError::Credentials`] for a missing credentials file.
    pub fn check_files(&self) -> Result<(), BusError> {
        if let Some(root) = &self.tls.root {
            require_file(root).map_err(BusError::Tls)?;
        }
        match (&self.tls.cert, &self.tls.key) {
            (Some(cert), Some(key)) => {
                require_file(cert).map_err(BusError::Tls)?;
                require_file(key).map_err(BusError::Tls)?;
            }
            (Some(_), None) => {
                return Err(BusError::Tls("client certificate without key".to_string()))
            }
            (None, Some(_)) => {
                return Err(BusError::Tls("client key without certificate".to_string()))
            }
            (None, None) => {}
        }
        if let Some(creds) = &self.user_credentials {
            require_file(creds).map_err(BusError::Credentials)?;
        }
        Ok(())
    }
}

fn require_file(path: &Path) -> Result<(), String> {
    if path.is_file() {
        Ok(())
    } else {
        Err(format!("{} is not a readable file", path.display()))
    }
}

/// A capability for establishing bus connections.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Attempt a single connection.
    ///
    /// Lifecycle events for the returned connection are sent on `events` for
    /// as long as the connection lives.
    async fn connect(
        &self,
        options: &ConnectOptions,
        events: ConnectionEventSender,
    ) -> Result<Arc<dyn BusConnection>, BusError>;
}

/// A live bus connection.
#[async_trait]
pub trait BusConnection: Send + Sync {
    /// Connection identifier, unique per client.
    fn id(&self) -> u64;

    /// Publish `payload` on `subject`.
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Subscribe to subjects matching `pattern`.
    async fn subscribe(&self, pattern: &str) -> Result<Subscription, BusError>;

    /// Close the connection. Subscriptions created from it end.
    async fn close(&self);

    /// True once the connection has been closed.
    ///
    /// Implementations must flip this before emitting
    /// [`ConnectionEvent::Closed`]; the connection manager relies on it to
    /// tell the current connection's close from a replaced one's.
    fn is_closed(&self) -> bool;

    /// Servers the connection was configured with.
    fn servers(&self) -> Vec<String>;

    /// Servers learned from the cluster after connecting.
    fn discovered_servers(&self) -> Vec<String>;
}
