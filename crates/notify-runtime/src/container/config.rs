//! # Runtime Configuration
//!
//! Notification settings plus the bus client and claim store selection.

use claim_notify::{ConfigError, NotifyConfig};
use std::path::PathBuf;
use tracing::{info, warn};

/// Environment variable selecting the bus client (`nats` or `loopback`).
pub const BUS_ENV: &str = "CLAIM_NOTIFY_BUS";

/// Environment variable naming the claim store directory.
pub const STORE_DIR_ENV: &str = "CLAIM_NOTIFY_STORE_DIR";

/// Environment variable opening the store read-only.
pub const STORE_READ_ONLY_ENV: &str = "CLAIM_NOTIFY_STORE_READ_ONLY";

/// Which bus client the runtime connects through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusKind {
    /// A NATS cluster at the configured servers.
    #[default]
    Nats,
    /// The in-process loopback bus. Nothing leaves the process.
    Loopback,
}

impl BusKind {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "nats" => Some(Self::Nats),
            "loopback" => Some(Self::Loopback),
            _ => None,
        }
    }
}

impl std::fmt::Display for BusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nats => write!(f, "nats"),
            Self::Loopback => write!(f, "loopback"),
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Bus and cache settings.
    pub notify: NotifyConfig,
    /// Bus client selection.
    pub bus: BusKind,
    /// Claim store directory. `None` keeps claims in memory.
    pub store_dir: Option<PathBuf>,
    /// Reject writes to the claim store.
    pub store_read_only: bool,
}

impl RuntimeConfig {
    /// Load from `CLAIM_NOTIFY_*` environment variables and the optional
    /// config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file is unreadable or the result
    /// fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let notify = NotifyConfig::load()?;
        let config = Self::from_parts(notify, |key| std::env::var(key).ok());
        config.notify.validate()?;
        Ok(config)
    }

    /// Combine notification settings with bus and store overrides from
    /// `lookup`. An unknown bus name is warned about and ignored.
    pub fn from_parts<F>(notify: NotifyConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let bus = match lookup(BUS_ENV) {
            Some(value) => BusKind::parse(&value).unwrap_or_else(|| {
                warn!(var = BUS_ENV, value = %value, "Unknown bus client, using nats");
                BusKind::Nats
            }),
            None => BusKind::Nats,
        };
        let store_dir = lookup(STORE_DIR_ENV)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);
        let store_read_only = lookup(STORE_READ_ONLY_ENV)
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        if let Some(dir) = &store_dir {
            info!(dir = %dir.display(), read_only = store_read_only, "Using directory claim store");
        }

        Self {
            notify,
            bus,
            store_dir,
            store_read_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_overrides() {
        let config = RuntimeConfig::from_parts(NotifyConfig::default(), |key| match key {
            STORE_DIR_ENV => Some("/var/lib/claims".to_string()),
            STORE_READ_ONLY_ENV => Some("true".to_string()),
            _ => None,
        });

        assert_eq!(config.store_dir, Some(PathBuf::from("/var/lib/claims")));
        assert!(config.store_read_only);
    }

    #[test]
    fn test_defaults_to_memory_store() {
        let config = RuntimeConfig::from_parts(NotifyConfig::default(), |key| match key {
            STORE_DIR_ENV => Some(String::new()),
            _ => None,
        });

        assert!(config.store_dir.is_none());
        assert!(!config.store_read_only);
    }

    #[test]
    fn test_bus_selection() {
        let default = RuntimeConfig::from_parts(NotifyConfig::default(), |_| None);
        assert_eq!(default.bus, BusKind::Nats);

        let loopback = RuntimeConfig::from_parts(NotifyConfig::default(), |key| match key {
            BUS_ENV => Some("Loopback".to_string()),
            _ => None,
        });
        assert_eq!(loopback.bus, BusKind::Loopback);

        let unknown = RuntimeConfig::from_parts(NotifyConfig::default(), |key| match key {
            BUS_ENV => Some("carrier-pigeon".to_string()),
            _ => None,
        });
        assert_eq!(unknown.bus, BusKind::Nats);
    }
}
