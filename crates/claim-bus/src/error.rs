//! Bus client errors.

use thiserror::Error;

/// Errors from bus client operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// No server address was supplied.
    #[error("No bus servers configured")]
    NoServers,

    /// No server accepted the connection.
    #[error("No servers available for connection: {0}")]
    NoServersAvailable(String),

    /// Connection attempt exceeded the connect timeout.
    #[error("Connection timed out after {0} ms")]
    Timeout(u64),

    /// TLS material could not be loaded.
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// Credentials file could not be loaded.
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// Subject or subscription pattern is not valid.
    #[error("Invalid subject {subject:?}: {reason}")]
    InvalidSubject { subject: String, reason: &'static str },

    /// Payload exceeds the maximum accepted size.
    #[error("Payload of {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// The underlying client rejected an operation.
    #[error("Bus client error: {0}")]
    Client(String),

    /// The connection has been closed.
    #[error("Connection closed")]
    ConnectionClosed,
}
