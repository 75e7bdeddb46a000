//! # Connection Manager
//!
//! Owns the single bus connection of a server instance.
//!
//! ## Lifecycle
//!
//! ```text
//!   start() ──→ connect() ──ok──→ connected (handle stored, subscribed if primary)
//!                   │
//!                  err
//!                   ↓
//!            WaitingToRetry ──reconnect_wait──→ connect() ...
//!
//!   Closed event ──→ stop() ──→ FatalHandler::terminate (first stopper only)
//! ```
//!
//! ## Locking
//!
//! One `tokio::sync::Mutex` guards the connection fields and is held across
//! the bounded connect attempt. The cache has its own lock; the two are never
//! held together. Retries never wait inline: the wait runs on a spawned timer
//! task that re-enters `connect()` under the lock.

use crate::config::NotifyConfig;
use crate::error::NotifyError;
use crate::fatal::{FatalHandler, FATAL_EXIT_CODE};
use crate::handler::{NotificationHandler, NotificationKind};
use claim_bus::{
    event_channel, BusClient, BusConnection, BusError, ConnectionEvent, ConnectionEventReceiver,
    ConnectionEventSender,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outer retry loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryState {
    /// Connected, stopped, or disabled.
    #[default]
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// A retry timer is pending.
    WaitingToRetry,
}

impl std::fmt::Display for RetryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::WaitingToRetry => write!(f, "waiting_to_retry"),
        }
    }
}

/// Fields guarded by the connection lock.
#[derive(Default)]
struct ConnectionState {
    running: bool,
    connection: Option<Arc<dyn BusConnection>>,
    /// Non-empty only while a retry is pending.
    retry_timer: Option<JoinHandle<()>>,
    /// Dispatch tasks of the current connection.
    subscriptions: Vec<JoinHandle<()>>,
}

/// Per-instance connection manager.
pub struct ServerState {
    config: NotifyConfig,
    client: Arc<dyn BusClient>,
    handler: Arc<NotificationHandler>,
    fatal: Arc<dyn FatalHandler>,
    inner: Mutex<ConnectionState>,
    retry: watch::Sender<RetryState>,
    events_tx: ConnectionEventSender,
    events_rx: parking_lot::Mutex<Option<ConnectionEventReceiver>>,
    event_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    connect_attempts: AtomicU64,
    retries_scheduled: AtomicU64,
    disabled_logged: AtomicBool,
}

impl ServerState {
    /// Create a stopped server state.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Config`] if `config` fails validation.
    pub fn new(
        config: NotifyConfig,
        client: Arc<dyn BusClient>,
        handler: Arc<NotificationHandler>,
        fatal: Arc<dyn FatalHandler>,
    ) -> Result<Arc<Self>, NotifyError> {
        config.validate()?;
        let (events_tx, events_rx) = event_channel();
        let (retry, _) = watch::channel(RetryState::Idle);

        Ok(Arc::new(Self {
            config,
            client,
            handler,
            fatal,
            inner: Mutex::new(ConnectionState::default()),
            retry,
            events_tx,
            events_rx: parking_lot::Mutex::new(Some(events_rx)),
            event_task: parking_lot::Mutex::new(None),
            connect_attempts: AtomicU64::new(0),
            retries_scheduled: AtomicU64::new(0),
            disabled_logged: AtomicBool::new(false),
        }))
    }

    /// Mark the server running and connect.
    pub async fn start(self: &Arc<Self>) {
        self.spawn_event_loop();

        let mut state = self.inner.lock().await;
        if !state.running {
            state.running = true;
            info!(primary = self.config.primary, "Claim notification server started");
        }
        self.connect_locked(&mut state).await;
    }

    /// Establish the bus connection.
    ///
    /// Never fails the caller: a failed attempt is logged and retried after
    /// `reconnect_wait`. No-op when stopped, disabled, already connected, or
    /// while a retry is pending.
    pub async fn connect(self: &Arc<Self>) {
        let mut state = self.inner.lock().await;
        self.connect_locked(&mut state).await;
    }

    /// Replace the current connection with a fresh one.
    ///
    /// The new handle is stored before the old one is closed, so
    /// [`get_connection`](Self::get_connection) always sees a complete handle.
    /// Returns `false` when stopped or disabled.
    ///
    /// # Errors
    ///
    /// [`NotifyError::Connect`] if the new connection cannot be established.
    /// The current connection is left in place.
    pub async fn reconnect(self: &Arc<Self>) -> Result<bool, NotifyError> {
        let mut state = self.inner.lock().await;
        if !state.running || !self.config.is_enabled() {
            return Ok(false);
        }

        let connection = self.establish().await.map_err(|e| {
            warn!(error = %e, "Bus reconnect failed, keeping current connection");
            NotifyError::Connect(e)
        })?;
        let subscriptions = self.subscribe_all(&connection).await;

        if let Some(timer) = state.retry_timer.take() {
            timer.abort();
        }
        self.retry.send_replace(RetryState::Idle);

        info!(id = connection.id(), "Bus connection replaced");
        let previous = state.connection.replace(connection);
        state.subscriptions = subscriptions;
        if let Some(previous) = previous {
            previous.close().await;
        }
        Ok(true)
    }

    /// Stop the server. Idempotent.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub async fn stop(&self) -> bool {
        let mut state = self.inner.lock().await;
        self.stop_locked(&mut state).await
    }

    /// A clone of the current connection handle, for a single operation.
    pub async fn get_connection(&self) -> Option<Arc<dyn BusConnection>> {
        self.inner.lock().await.connection.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.running
    }

    /// Current state of the outer retry loop.
    #[must_use]
    pub fn retry_state(&self) -> RetryState {
        *self.retry.borrow()
    }

    /// True when this instance subscribes to inbound notifications.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.config.primary
    }

    /// Connection attempts made, including retries and reconnects.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Retry timers scheduled after failed attempts.
    #[must_use]
    pub fn retries_scheduled(&self) -> u64 {
        self.retries_scheduled.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<NotificationHandler> {
        &self.handler
    }

    #[must_use]
    pub fn config(&self) -> &NotifyConfig {
        &self.config
    }

    async fn connect_locked(self: &Arc<Self>, state: &mut ConnectionState) {
        if !state.running {
            debug!("Server not running, skipping bus connect");
            return;
        }
        if !self.config.is_enabled() {
            if !self.disabled_logged.swap(true, Ordering::SeqCst) {
                info!("No bus servers configured, claim notifications disabled");
            }
            return;
        }
        if state.connection.is_some() || state.retry_timer.is_some() {
            return;
        }

        self.retry.send_replace(RetryState::Connecting);
        match self.establish().await {
            Ok(connection) => {
                state.subscriptions = self.subscribe_all(&connection).await;
                info!(
                    id = connection.id(),
                    servers = ?connection.servers(),
                    primary = self.config.primary,
                    "Connected to claim notification bus"
                );
                state.connection = Some(connection);
                self.retry.send_replace(RetryState::Idle);
            }
            Err(e) => {
                error!(
                    servers = ?self.config.servers,
                    error = %e,
                    "Failed to connect to claim notification bus"
                );
                self.schedule_retry(state);
            }
        }
    }

    /// One connection attempt bounded by the connect timeout.
    async fn establish(&self) -> Result<Arc<dyn BusConnection>, BusError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let options = self.config.connect_options();
        let attempt = self.client.connect(&options, self.events_tx.clone());

        match tokio::time::timeout(self.config.connect_timeout(), attempt).await {
            Ok(result) => result,
            Err(_) => Err(BusError::Timeout(self.config.connect_timeout_ms)),
        }
    }

    /// Subscribe the handler to both notification kinds. Primary only.
    async fn subscribe_all(&self, connection: &Arc<dyn BusConnection>) -> Vec<JoinHandle<()>> {
        if !self.config.primary {
            return Vec::new();
        }

        let mut tasks = Vec::with_capacity(NotificationKind::ALL.len());
        for kind in NotificationKind::ALL {
            let subject = kind.subscription_subject();
            match connection.subscribe(&subject).await {
                Ok(subscription) => {
                    debug!(subject = %subject, "Subscribed to claim notifications");
                    let handler = Arc::clone(&self.handler);
                    tasks.push(tokio::spawn(handler.run(subscription, kind)));
                }
                Err(e) => {
                    error!(subject = %subject, error = %e, "Unable to subscribe to claim notifications");
                }
            }
        }
        tasks
    }

    fn schedule_retry(self: &Arc<Self>, state: &mut ConnectionState) {
        let wait = self.config.reconnect_wait();
        self.retries_scheduled.fetch_add(1, Ordering::SeqCst);
        self.retry.send_replace(RetryState::WaitingToRetry);
        state.retry_timer = Some(tokio::spawn(Self::fire_retry(Arc::clone(self), wait)));
        info!(wait_ms = self.config.reconnect_wait_ms, "Bus connect retry scheduled");
    }

    // Boxed to break the connect -> retry -> connect future cycle.
    fn fire_retry(self: Arc<Self>, wait: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            tokio::time::sleep(wait).await;

            let mut state = self.inner.lock().await;
            state.retry_timer = None;
            self.retry.send_replace(RetryState::Idle);
            if state.running {
                self.connect_locked(&mut state).await;
            } else {
                debug!("Server stopped before retry fired");
            }
        })
    }

    fn spawn_event_loop(self: &Arc<Self>) {
        let Some(mut events) = self.events_rx.lock().take() else {
            return;
        };
        let server: Weak<Self> = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(server) = server.upgrade() else {
                    break;
                };
                server.handle_event(event).await;
            }
        });
        *self.event_task.lock() = Some(task);
    }

    async fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Error(reason) => {
                warn!(error = %reason, "Claim notification bus error");
            }
            ConnectionEvent::Disconnected => {
                if self.is_running().await {
                    warn!("Disconnected from claim notification bus");
                }
            }
            ConnectionEvent::Reconnected => {
                warn!("Reconnected to claim notification bus");
            }
            ConnectionEvent::DiscoveredServers { discovered, known } => {
                debug!(?discovered, ?known, "Discovered claim notification bus servers");
            }
            ConnectionEvent::Closed => self.on_closed().await,
        }
    }

    async fn stop_locked(&self, state: &mut ConnectionState) -> bool {
        if !state.running {
            return false;
        }
        state.running = false;

        if let Some(connection) = state.connection.take() {
            connection.close().await;
        }
        // Dispatch tasks end on their own once the connection is closed.
        state.subscriptions.clear();
        info!("Claim notification server stopped");
        true
    }

    /// Permanent connection loss ends the process.
    ///
    /// The staleness check and the stop run under one lock acquisition, so a
    /// `reconnect()` cannot install a fresh connection in between.
    async fn on_closed(&self) {
        let stopped = {
            let mut state = self.inner.lock().await;
            let current_closed = state
                .connection
                .as_ref()
                .is_some_and(|connection| connection.is_closed());
            if !state.running || !current_closed {
                debug!("Ignoring closed event for a stopped or replaced connection");
                return;
            }

            error!("Claim notification bus connection closed permanently");
            self.stop_locked(&mut state).await
        };

        if stopped {
            self.fatal.terminate(FATAL_EXIT_CODE);
        }
    }
}

impl Drop for ServerState {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.get_mut().take() {
            task.abort();
        }
        let state = self.inner.get_mut();
        if let Some(timer) = state.retry_timer.take() {
            timer.abort();
        }
        for task in state.subscriptions.drain(..) {
            task.abort();
        }
    }
}
