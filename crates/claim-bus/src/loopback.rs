//! # Loopback Bus
//!
//! In-process implementation of the bus client capability.
//!
//! Uses `tokio::sync::broadcast` for multi-producer, multi-consumer
//! semantics: every connection made through the same [`LoopbackBus`] sees
//! every message published by any of them. Suitable for single-node
//! operation and tests; distributed deployments plug in a network client.

use crate::client::{BusClient, BusConnection, ConnectOptions, ConnectionEvent, ConnectionEventSender};
use crate::error::BusError;
use crate::subject::{validate_pattern, validate_subject};
use crate::subscription::{Message, Subscription};
use crate::{DEFAULT_CHANNEL_CAPACITY, MAX_PAYLOAD_BYTES};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

struct Shared {
    sender: broadcast::Sender<Message>,
    capacity: usize,
    /// Connection attempts left to fail.
    failing_connects: AtomicUsize,
    connect_attempts: AtomicU64,
    connect_delay: Mutex<Option<Duration>>,
    discovered: RwLock<Vec<String>>,
    connections: Mutex<Vec<Weak<LoopbackConnection>>>,
    next_id: AtomicU64,
    messages_published: AtomicU64,
    active_subscriptions: Arc<AtomicUsize>,
}

/// In-process bus with failure injection.
///
/// Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct LoopbackBus {
    shared: Arc<Shared>,
}

impl LoopbackBus {
    /// Create a new loopback bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new loopback bus with specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            shared: Arc::new(Shared {
                sender,
                capacity,
                failing_connects: AtomicUsize::new(0),
                connect_attempts: AtomicU64::new(0),
                connect_delay: Mutex::new(None),
                discovered: RwLock::new(Vec::new()),
                connections: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                messages_published: AtomicU64::new(0),
                active_subscriptions: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Get the channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.shared.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Delay every connection attempt by `delay` (`None` to disable).
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        *self.shared.connect_delay.lock() = delay;
    }

    /// Total connection attempts, successful or not.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    /// Total messages accepted by `publish`.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.shared.messages_published.load(Ordering::Relaxed)
    }

    /// Number of live subscriptions across all connections.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.shared.active_subscriptions.load(Ordering::SeqCst)
    }

    /// Connections that are still open.
    #[must_use]
    pub fn open_connections(&self) -> Vec<Arc<LoopbackConnection>> {
        let mut connections = self.shared.connections.lock();
        connections.retain(|c| c.strong_count() > 0);
        connections
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| !c.is_closed())
            .collect()
    }

    /// Report `error` on every open connection.
    pub fn simulate_error(&self, error: &str) {
        self.broadcast_event(ConnectionEvent::Error(error.to_string()));
    }

    /// Report a dropped connection on every open connection.
    pub fn simulate_disconnect(&self) {
        self.broadcast_event(ConnectionEvent::Disconnected);
    }

    /// Report a completed client-side reconnect on every open connection.
    pub fn simulate_reconnect(&self) {
        self.broadcast_event(ConnectionEvent::Reconnected);
    }

    /// Announce newly discovered cluster servers to every open connection.
    pub fn announce_servers(&self, servers: Vec<String>) {
        *self.shared.discovered.write() = servers;
        for conn in self.open_connections() {
            conn.emit(ConnectionEvent::DiscoveredServers {
                discovered: conn.discovered_servers(),
                known: conn.known_servers(),
            });
        }
    }

    /// Give up on every open connection, as a client does after exhausting
    /// its reconnect attempts. Each connection is closed and reports
    /// [`ConnectionEvent::Closed`].
    pub fn simulate_closed(&self) {
        for conn in self.open_connections() {
            conn.shutdown();
        }
    }

    fn broadcast_event(&self, event: ConnectionEvent) {
        for conn in self.open_connections() {
            conn.emit(event.clone());
        }
    }

    fn take_failure(&self) -> bool {
        self.shared
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusClient for LoopbackBus {
    async fn connect(
        &self,
        options: &ConnectOptions,
        events: ConnectionEventSender,
    ) -> Result<Arc<dyn BusConnection>, BusError> {
        self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if options.servers.is_empty() {
            return Err(BusError::NoServers);
        }
        options.check_files()?;

        let delay = *self.shared.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.take_failure() {
            warn!(servers = %options.server_url(), "Loopback connect failure injected");
            return Err(BusError::NoServersAvailable(options.server_url()));
        }

        let (closed, _) = watch::channel(false);
        let conn = Arc::new(LoopbackConnection {
            id: self.shared.next_id.fetch_add(1, Ordering::SeqCst),
            servers: options.servers.clone(),
            sender: self.shared.sender.clone(),
            closed,
            events,
            shared: Arc::downgrade(&self.shared),
        });
        self.shared.connections.lock().push(Arc::downgrade(&conn));

        debug!(
            id = conn.id,
            name = ?options.name,
            servers = %options.server_url(),
            "Loopback connection established"
        );
        Ok(conn)
    }
}

/// A connection to a [`LoopbackBus`].
pub struct LoopbackConnection {
    id: u64,
    servers: Vec<String>,
    sender: broadcast::Sender<Message>,
    closed: watch::Sender<bool>,
    events: ConnectionEventSender,
    shared: Weak<Shared>,
}

impl LoopbackConnection {
    fn emit(&self, event: ConnectionEvent) {
        // Receiver gone means nobody is listening for lifecycle events.
        let _ = self.events.send(event);
    }

    fn known_servers(&self) -> Vec<String> {
        let mut known = self.servers.clone();
        for server in self.discovered_servers() {
            if !known.contains(&server) {
                known.push(server);
            }
        }
        known
    }

    /// Close and report `Closed`, once.
    fn shutdown(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        debug!(id = self.id, "Loopback connection closed");
        self.emit(ConnectionEvent::Closed);
    }
}

#[async_trait]
impl BusConnection for LoopbackConnection {
    fn id(&self) -> u64 {
        self.id
    }

    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::ConnectionClosed);
        }
        validate_subject(subject)?;
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(BusError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_BYTES,
            });
        }

        if let Some(shared) = self.shared.upgrade() {
            shared.messages_published.fetch_add(1, Ordering::Relaxed);
        }

        match self.sender.send(Message::new(subject, payload)) {
            Ok(receivers) => debug!(subject, receivers, "Message published"),
            // Fire-and-forget: no subscribers is not an error.
            Err(_) => debug!(subject, "Message dropped (no subscribers)"),
        }
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<Subscription, BusError> {
        if self.is_closed() {
            return Err(BusError::ConnectionClosed);
        }
        validate_pattern(pattern)?;

        let active = match self.shared.upgrade() {
            Some(shared) => shared.active_subscriptions.clone(),
            None => Arc::new(AtomicUsize::new(0)),
        };
        debug!(id = self.id, pattern, "New subscription created");
        Ok(Subscription::new(
            self.sender.subscribe(),
            pattern.to_string(),
            self.closed.subscribe(),
            active,
        ))
    }

    async fn close(&self) {
        self.shutdown();
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn servers(&self) -> Vec<String> {
        self.servers.clone()
    }

    fn discovered_servers(&self) -> Vec<String> {
        match self.shared.upgrade() {
            Some(shared) => shared.discovered.read().clone(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::event_channel;
    use std::time::Duration;
    use tokio::time::timeout;

    fn options() -> ConnectOptions {
        ConnectOptions::new(vec!["loopback://local".to_string()])
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = LoopbackBus::new();
        let (events, _rx) = event_channel();
        let conn = bus.connect(&options(), events).await.unwrap();

        let mut sub = conn.subscribe("SYS.ACCOUNT.*.CLAIMS.UPDATE").await.unwrap();
        assert_eq!(bus.subscription_count(), 1);

        conn.publish("SYS.ACCOUNT.A.CLAIMS.UPDATE", b"jwt").await.unwrap();
        let msg = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("message");
        assert_eq!(msg.subject, "SYS.ACCOUNT.A.CLAIMS.UPDATE");
        assert_eq!(msg.payload, b"jwt".to_vec());
        assert_eq!(bus.messages_published(), 1);
    }

    #[tokio::test]
    async fn test_cross_connection_delivery() {
        let bus = LoopbackBus::new();
        let (events, _rx) = event_channel();
        let publisher = bus.connect(&options(), events.clone()).await.unwrap();
        let subscriber = bus.connect(&options(), events).await.unwrap();
        assert_ne!(publisher.id(), subscriber.id());

        let mut sub = subscriber.subscribe(">").await.unwrap();
        publisher.publish("a.b", b"x").await.unwrap();

        let msg = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout");
        assert!(msg.is_some());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = LoopbackBus::new();
        let (events, _rx) = event_channel();
        let conn = bus.connect(&options(), events).await.unwrap();
        assert!(conn.publish("a.b", b"x").await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_subject_and_payload() {
        let bus = LoopbackBus::new();
        let (events, _rx) = event_channel();
        let conn = bus.connect(&options(), events).await.unwrap();

        assert!(matches!(
            conn.publish("a.*", b"x").await,
            Err(BusError::InvalidSubject { .. })
        ));
        let big = vec![0u8; MAX_PAYLOAD_BYTES + 1];
        assert!(matches!(
            conn.publish("a.b", &big).await,
            Err(BusError::PayloadTooLarge { .. })
        ));
        assert!(conn.subscribe("a.>.b").await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let bus = LoopbackBus::new();
        bus.fail_next_connects(2);

        let (events, _rx) = event_channel();
        assert!(bus.connect(&options(), events.clone()).await.is_err());
        assert!(bus.connect(&options(), events.clone()).await.is_err());
        assert!(bus.connect(&options(), events).await.is_ok());
        assert_eq!(bus.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_no_servers() {
        let bus = LoopbackBus::new();
        let (events, _rx) = event_channel();
        let result = bus.connect(&ConnectOptions::new(Vec::new()), events).await;
        assert!(matches!(result, Err(BusError::NoServers)));
    }

    #[tokio::test]
    async fn test_close_emits_closed_once_and_ends_subscriptions() {
        let bus = LoopbackBus::new();
        let (events, mut rx) = event_channel();
        let conn = bus.connect(&options(), events).await.unwrap();
        let mut sub = conn.subscribe(">").await.unwrap();

        conn.close().await;
        conn.close().await;

        assert!(conn.is_closed());
        assert_eq!(rx.recv().await, Some(ConnectionEvent::Closed));
        assert!(rx.try_recv().is_err());
        assert!(sub.recv().await.is_none());
        assert!(matches!(
            conn.publish("a.b", b"x").await,
            Err(BusError::ConnectionClosed)
        ));
        assert!(bus.open_connections().is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_simulation() {
        let bus = LoopbackBus::new();
        let (events, mut rx) = event_channel();
        let conn = bus.connect(&options(), events).await.unwrap();

        bus.simulate_error("slow consumer");
        bus.simulate_disconnect();
        bus.simulate_reconnect();
        bus.announce_servers(vec!["loopback://peer".to_string()]);
        bus.simulate_closed();

        assert_eq!(rx.recv().await, Some(ConnectionEvent::Error("slow consumer".into())));
        assert_eq!(rx.recv().await, Some(ConnectionEvent::Disconnected));
        assert_eq!(rx.recv().await, Some(ConnectionEvent::Reconnected));
        assert_eq!(
            rx.recv().await,
            Some(ConnectionEvent::DiscoveredServers {
                discovered: vec!["loopback://peer".to_string()],
                known: vec!["loopback://local".to_string(), "loopback://peer".to_string()],
            })
        );
        assert_eq!(rx.recv().await, Some(ConnectionEvent::Closed));
        assert!(conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_delay() {
        let bus = LoopbackBus::new();
        bus.set_connect_delay(Some(Duration::from_secs(5)));
        let (events, _rx) = event_channel();

        let result = timeout(Duration::from_secs(1), bus.connect(&options(), events)).await;
        assert!(result.is_err());
    }
}
