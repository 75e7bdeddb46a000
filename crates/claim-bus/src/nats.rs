//! # NATS Bus Client
//!
//! [`BusClient`] over a NATS cluster through `async-nats`.
//!
//! ## Lifecycle events
//!
//! | `async_nats::Event`           | [`ConnectionEvent`]      |
//! |-------------------------------|--------------------------|
//! | first `Connected`             | (none)                   |
//! | later `Connected`             | `Reconnected`            |
//! | `Disconnected`                | `Disconnected`           |
//! | `Closed`, `MaxReconnects`     | `Closed`                 |
//! | anything else                 | `Error(description)`     |
//!
//! The client does not report cluster topology changes, so
//! [`ConnectionEvent::DiscoveredServers`] is never sent. Discovered servers
//! are still readable through [`BusConnection::discovered_servers`].

use crate::client::{
    BusClient, BusConnection, ConnectOptions, ConnectionEvent, ConnectionEventSender,
};
use crate::error::BusError;
use crate::subject::{validate_pattern, validate_subject};
use crate::subscription::{Message, Subscription};
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_nats::{ClientError, ConnectErrorKind, Event, ServerAddr};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Connects to NATS servers.
pub struct NatsBusClient {
    next_id: AtomicU64,
    active_subscriptions: Arc<AtomicUsize>,
}

impl NatsBusClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            active_subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Subscriptions currently alive across all connections.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.active_subscriptions.load(Ordering::SeqCst)
    }
}

impl Default for NatsBusClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusClient for NatsBusClient {
    async fn connect(
        &self,
        options: &ConnectOptions,
        events: ConnectionEventSender,
    ) -> Result<Arc<dyn BusConnection>, BusError> {
        let addrs = server_addrs(&options.servers)?;
        options.check_files()?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(NatsShared {
            id,
            closed,
            events,
            connected_once: AtomicBool::new(false),
        });

        let nats_options = build_options(options, Arc::clone(&shared)).await?;
        let client = nats_options
            .connect(addrs.as_slice())
            .await
            .map_err(|e| connect_error(options, &e))?;

        info!(
            id,
            name = ?options.name,
            servers = %options.server_url(),
            "NATS connection established"
        );
        Ok(Arc::new(NatsConnection {
            id,
            client: Mutex::new(Some(client)),
            servers: options.servers.clone(),
            shared,
            forwards: Mutex::new(Vec::new()),
            active: Arc::clone(&self.active_subscriptions),
        }))
    }
}

fn server_addrs(servers: &[String]) -> Result<Vec<ServerAddr>, BusError> {
    if servers.is_empty() {
        return Err(BusError::NoServers);
    }
    servers
        .iter()
        .map(|server| {
            server
                .parse::<ServerAddr>()
                .map_err(|e| BusError::NoServersAvailable(format!("{server}: {e}")))
        })
        .collect()
}

async fn build_options(
    options: &ConnectOptions,
    shared: Arc<NatsShared>,
) -> Result<async_nats::ConnectOptions, BusError> {
    let wait = options.reconnect_wait;
    // Negative means retry forever.
    let max_reconnects = usize::try_from(options.max_reconnects).ok();

    let mut nats = async_nats::ConnectOptions::new()
        .connection_timeout(options.connect_timeout)
        .max_reconnects(max_reconnects)
        .reconnect_delay_callback(move |_attempts| wait)
        .event_callback(move |event| {
            let shared = Arc::clone(&shared);
            async move { shared.on_event(event) }
        });

    if let Some(name) = &options.name {
        nats = nats.name(name);
    }
    if options.tls.is_enabled() {
        nats = nats.require_tls(true);
    }
    if let Some(root) = &options.tls.root {
        nats = nats.add_root_certificates(root.clone());
    }
    if let (Some(cert), Some(key)) = (&options.tls.cert, &options.tls.key) {
        nats = nats.add_client_certificate(cert.clone(), key.clone());
    }
    if let Some(creds) = &options.user_credentials {
        nats = nats
            .credentials_file(creds)
            .await
            .map_err(|e| BusError::Credentials(format!("{}: {e}", creds.display())))?;
    }
    Ok(nats)
}

fn connect_error(options: &ConnectOptions, err: &async_nats::ConnectError) -> BusError {
    warn!(servers = %options.server_url(), error = %err, "NATS connect failed");
    match err.kind() {
        ConnectErrorKind::TimedOut => BusError::Timeout(
            u64::try_from(options.connect_timeout.as_millis()).unwrap_or(u64::MAX),
        ),
        ConnectErrorKind::Tls => BusError::Tls(err.to_string()),
        ConnectErrorKind::Authentication | ConnectErrorKind::AuthorizationViolation => {
            BusError::Credentials(err.to_string())
        }
        _ => BusError::NoServersAvailable(options.server_url()),
    }
}

/// Translate a client event. `reconnect` marks a `Connected` after the first.
fn map_event(event: &Event, reconnect: bool) -> Option<ConnectionEvent> {
    match event {
        Event::Connected if reconnect => Some(ConnectionEvent::Reconnected),
        Event::Connected => None,
        Event::Disconnected => Some(ConnectionEvent::Disconnected),
        Event::Closed | Event::ClientError(ClientError::MaxReconnects) => {
            Some(ConnectionEvent::Closed)
        }
        other => Some(ConnectionEvent::Error(other.to_string())),
    }
}

/// State shared between a connection and its event callback.
struct NatsShared {
    id: u64,
    closed: watch::Sender<bool>,
    events: ConnectionEventSender,
    connected_once: AtomicBool,
}

impl NatsShared {
    fn on_event(&self, event: Event) {
        let reconnect =
            matches!(event, Event::Connected) && self.connected_once.swap(true, Ordering::SeqCst);
        match map_event(&event, reconnect) {
            Some(ConnectionEvent::Closed) => self.shutdown(),
            Some(mapped) => self.emit(mapped),
            None => debug!(id = self.id, "NATS connected"),
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // Receiver gone means nobody is listening for lifecycle events.
        let _ = self.events.send(event);
    }

    /// Mark closed, then report `Closed`, once.
    fn shutdown(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        debug!(id = self.id, "NATS connection closed");
        self.emit(ConnectionEvent::Closed);
    }
}

/// A connection to a NATS cluster.
pub struct NatsConnection {
    id: u64,
    client: Mutex<Option<async_nats::Client>>,
    servers: Vec<String>,
    shared: Arc<NatsShared>,
    /// Tasks moving messages from NATS subscribers into [`Subscription`]s.
    forwards: Mutex<Vec<JoinHandle<()>>>,
    active: Arc<AtomicUsize>,
}

impl NatsConnection {
    fn client(&self) -> Result<async_nats::Client, BusError> {
        if self.is_closed() {
            return Err(BusError::ConnectionClosed);
        }
        self.client.lock().clone().ok_or(BusError::ConnectionClosed)
    }
}

#[async_trait]
impl BusConnection for NatsConnection {
    fn id(&self) -> u64 {
        self.id
    }

    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BusError> {
        let client = self.client()?;
        validate_subject(subject)?;
        let max = client.server_info().max_payload;
        if max > 0 && payload.len() > max {
            return Err(BusError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        client
            .publish(subject.to_string(), payload.to_vec().into())
            .await
            .map_err(|e| BusError::Client(e.to_string()))?;
        debug!(subject, "Message published");
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<Subscription, BusError> {
        let client = self.client()?;
        validate_pattern(pattern)?;

        let mut subscriber = client
            .subscribe(pattern.to_string())
            .await
            .map_err(|e| BusError::Client(e.to_string()))?;
        let (sender, receiver) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        let forward = tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                let message = Message::new(message.subject.to_string(), message.payload.to_vec());
                // No receiver left: the subscription was dropped.
                if sender.send(message).is_err() {
                    break;
                }
            }
        });
        self.forwards.lock().push(forward);

        debug!(id = self.id, pattern, "New subscription created");
        Ok(Subscription::new(
            receiver,
            pattern.to_string(),
            self.shared.closed.subscribe(),
            Arc::clone(&self.active),
        ))
    }

    async fn close(&self) {
        let Some(client) = self.client.lock().take() else {
            return;
        };
        if let Err(e) = client.flush().await {
            debug!(id = self.id, error = %e, "Flush before close failed");
        }
        for forward in self.forwards.lock().drain(..) {
            forward.abort();
        }
        // The client shuts down once its last handle is dropped.
        drop(client);
        self.shared.shutdown();
    }

    fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    fn servers(&self) -> Vec<String> {
        self.servers.clone()
    }

    fn discovered_servers(&self) -> Vec<String> {
        match self.client.lock().as_ref() {
            Some(client) => client.server_info().connect_urls,
            None => Vec::new(),
        }
    }
}

impl Drop for NatsConnection {
    fn drop(&mut self) {
        for forward in self.forwards.get_mut().drain(..) {
            forward.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::event_channel;
    use std::time::Duration;

    #[test]
    fn test_first_connected_is_silent() {
        assert_eq!(map_event(&Event::Connected, false), None);
        assert_eq!(
            map_event(&Event::Connected, true),
            Some(ConnectionEvent::Reconnected)
        );
    }

    #[test]
    fn test_terminal_events_map_to_closed() {
        assert_eq!(map_event(&Event::Closed, true), Some(ConnectionEvent::Closed));
        assert_eq!(
            map_event(&Event::ClientError(ClientError::MaxReconnects), true),
            Some(ConnectionEvent::Closed)
        );
    }

    #[test]
    fn test_other_events_are_errors() {
        assert_eq!(
            map_event(&Event::Disconnected, true),
            Some(ConnectionEvent::Disconnected)
        );
        assert!(matches!(
            map_event(&Event::SlowConsumer(7), true),
            Some(ConnectionEvent::Error(_))
        ));
    }

    #[test]
    fn test_shutdown_marks_closed_before_event() {
        let (events, mut rx) = event_channel();
        let (closed, _) = watch::channel(false);
        let shared = NatsShared {
            id: 1,
            closed,
            events,
            connected_once: AtomicBool::new(false),
        };

        shared.on_event(Event::Connected);
        shared.on_event(Event::Closed);
        shared.on_event(Event::ClientError(ClientError::MaxReconnects));

        assert!(*shared.closed.borrow());
        assert_eq!(rx.try_recv().unwrap(), ConnectionEvent::Closed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_server_addrs_rejects_bad_input() {
        assert!(matches!(server_addrs(&[]), Err(BusError::NoServers)));
        assert!(matches!(
            server_addrs(&["nats://bad host:4222".to_string()]),
            Err(BusError::NoServersAvailable(_))
        ));
        assert_eq!(
            server_addrs(&["nats://127.0.0.1:4222".to_string()])
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_server_fails() {
        let client = NatsBusClient::new();
        let options = ConnectOptions::new(vec!["nats://127.0.0.1:1".to_string()])
            .with_connect_timeout(Duration::from_millis(500));
        let (events, _rx) = event_channel();

        let result = tokio::time::timeout(Duration::from_secs(5), client.connect(&options, events))
            .await
            .expect("connect attempt bounded");

        assert!(result.is_err());
        assert_eq!(client.subscription_count(), 0);
    }
}
