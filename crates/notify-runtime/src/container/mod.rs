//! # Notify Container
//!
//! Builds the notification components from a [`RuntimeConfig`] and holds
//! them for the lifetime of the process.
//!
//! ## Wiring
//!
//! ```text
//! ClaimStore ─┐
//! CacheState ─┼─→ NotificationHandler ─→ ServerState ←── BusClient
//! ClaimCodec ─┘                               │
//!                                             └─→ NotificationPublisher
//! ```

pub mod config;

pub use config::{BusKind, RuntimeConfig, BUS_ENV, STORE_DIR_ENV, STORE_READ_ONLY_ENV};

use anyhow::{Context, Result};
use claim_bus::{BusClient, LoopbackBus, NatsBusClient};
use claim_notify::{
    CacheState, FatalHandler, NotificationHandler, NotificationPublisher, ServerState,
};
use claim_types::{ClaimStore, DirClaimStore, JwtClaimCodec, MemoryClaimStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Initialized notification components.
pub struct NotifyContainer {
    pub config: RuntimeConfig,
    pub store: Arc<dyn ClaimStore>,
    pub cache: Arc<CacheState>,
    pub server: Arc<ServerState>,
    pub publisher: NotificationPublisher,
}

impl NotifyContainer {
    /// Wire every component. Nothing connects until [`ServerState::start`].
    ///
    /// # Errors
    ///
    /// Fails if the claim store cannot be opened or the configuration is
    /// rejected.
    pub fn new(
        config: RuntimeConfig,
        client: Arc<dyn BusClient>,
        fatal: Arc<dyn FatalHandler>,
    ) -> Result<Self> {
        let store = open_store(&config)?;
        let cache = Arc::new(CacheState::with_ttl(config.notify.cache_ttl()));
        let handler = Arc::new(NotificationHandler::new(
            Arc::new(JwtClaimCodec::new()),
            Arc::clone(&store),
            Arc::clone(&cache),
        ));
        let server = ServerState::new(config.notify.clone(), client, handler, fatal)
            .context("Failed to create notification server state")?;
        let publisher = NotificationPublisher::new(Arc::clone(&server));

        Ok(Self {
            config,
            store,
            cache,
            server,
            publisher,
        })
    }
}

/// The bus client selected by `kind`.
#[must_use]
pub fn bus_client(kind: BusKind) -> Arc<dyn BusClient> {
    match kind {
        BusKind::Nats => {
            info!("Using NATS bus client");
            Arc::new(NatsBusClient::new())
        }
        BusKind::Loopback => {
            warn!("Using in-process loopback bus; notifications stay inside this process");
            Arc::new(LoopbackBus::new())
        }
    }
}

fn open_store(config: &RuntimeConfig) -> Result<Arc<dyn ClaimStore>> {
    let Some(dir) = &config.store_dir else {
        return Ok(Arc::new(MemoryClaimStore::new()));
    };

    let opened = if config.store_read_only {
        DirClaimStore::open_read_only(dir)
    } else {
        DirClaimStore::open(dir)
    };
    let store =
        opened.with_context(|| format!("Failed to open claim store at {}", dir.display()))?;
    Ok(Arc::new(store))
}
