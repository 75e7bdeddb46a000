//! # Notification Configuration
//!
//! Bus connection settings for the notification subsystem.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. JSON file named by `CLAIM_NOTIFY_CONFIG`
//! 3. Individual `CLAIM_NOTIFY_*` environment variables
//!
//! An empty server list is valid and disables notifications.

use claim_bus::{ConnectOptions, TlsOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_FILE_ENV: &str = "CLAIM_NOTIFY_CONFIG";

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("Cannot read config file {path}: {reason}")]
    Io { path: String, reason: String },

    /// Configuration file is not valid JSON for this schema.
    #[error("Cannot parse config file {path}: {reason}")]
    Parse { path: String, reason: String },

    /// TLS client certificate configured without a key.
    #[error("TLS client certificate configured without a key")]
    CertWithoutKey,

    /// TLS client key configured without a certificate.
    #[error("TLS client key configured without a certificate")]
    KeyWithoutCert,

    /// Server entry is blank.
    #[error("Bus server entry {0} is empty")]
    EmptyServer(usize),

    /// A duration that must be positive is zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// TLS material paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Root CA bundle.
    pub root: Option<PathBuf>,
    /// Client certificate.
    pub cert: Option<PathBuf>,
    /// Client private key.
    pub key: Option<PathBuf>,
}

/// Notification subsystem configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Bus server addresses. Empty disables notifications.
    pub servers: Vec<String>,
    /// Reconnect attempts the bus client makes after a drop; negative is unlimited.
    pub max_reconnects: i32,
    /// Wait between reconnect attempts, in milliseconds. Also the interval
    /// of the manager's own initial-connect retry.
    pub reconnect_wait_ms: u64,
    /// Connect timeout, in milliseconds.
    pub connect_timeout_ms: u64,
    /// TLS material.
    pub tls: TlsConfig,
    /// Credentials file.
    pub user_credentials: Option<PathBuf>,
    /// Subscribe to and ingest notifications from other instances.
    pub primary: bool,
    /// Validity window applied to cache entries refreshed by a notification.
    pub cache_ttl_secs: u64,
    /// Connection name reported to the bus.
    pub connection_name: Option<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            max_reconnects: 60,
            reconnect_wait_ms: 2_000,
            connect_timeout_ms: 2_000,
            tls: TlsConfig::default(),
            user_credentials: None,
            primary: false,
            cache_ttl_secs: 3_600,
            connection_name: None,
        }
    }
}

impl NotifyConfig {
    /// Load configuration from the environment.
    ///
    /// Reads the JSON file named by `CLAIM_NOTIFY_CONFIG` if set, then applies
    /// `CLAIM_NOTIFY_*` overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the named file cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(path)?,
            _ => Self::default(),
        };
        Ok(base.with_overrides(|key| std::env::var(key).ok()))
    }

    /// Defaults plus `CLAIM_NOTIFY_*` environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Read a JSON configuration file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] or [`ConfigError::Parse`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Apply overrides from `lookup`, typically the process environment.
    ///
    /// Unparseable numeric or boolean values are logged and ignored.
    #[must_use]
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(servers) = lookup("CLAIM_NOTIFY_SERVERS") {
            self.servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        override_parsed(&lookup, "CLAIM_NOTIFY_MAX_RECONNECTS", &mut self.max_reconnects);
        override_parsed(&lookup, "CLAIM_NOTIFY_RECONNECT_WAIT_MS", &mut self.reconnect_wait_ms);
        override_parsed(&lookup, "CLAIM_NOTIFY_CONNECT_TIMEOUT_MS", &mut self.connect_timeout_ms);
        override_parsed(&lookup, "CLAIM_NOTIFY_PRIMARY", &mut self.primary);
        override_parsed(&lookup, "CLAIM_NOTIFY_CACHE_TTL_SECS", &mut self.cache_ttl_secs);
        override_path(&lookup, "CLAIM_NOTIFY_TLS_ROOT", &mut self.tls.root);
        override_path(&lookup, "CLAIM_NOTIFY_TLS_CERT", &mut self.tls.cert);
        override_path(&lookup, "CLAIM_NOTIFY_TLS_KEY", &mut self.tls.key);
        override_path(&lookup, "CLAIM_NOTIFY_CREDENTIALS", &mut self.user_credentials);
        if let Some(name) = lookup("CLAIM_NOTIFY_NAME") {
            self.connection_name = Some(name).filter(|n| !n.is_empty());
        }
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(index) = self.servers.iter().position(|s| s.trim().is_empty()) {
            return Err(ConfigError::EmptyServer(index));
        }
        match (&self.tls.cert, &self.tls.key) {
            (Some(_), None) => return Err(ConfigError::CertWithoutKey),
            (None, Some(_)) => return Err(ConfigError::KeyWithoutCert),
            _ => {}
        }
        if self.reconnect_wait_ms == 0 {
            return Err(ConfigError::ZeroDuration("reconnect_wait_ms"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("connect_timeout_ms"));
        }
        if self.cache_ttl_secs == 0 {
            return Err(ConfigError::ZeroDuration("cache_ttl_secs"));
        }
        Ok(())
    }

    /// True when at least one bus server is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.servers.is_empty()
    }

    #[must_use]
    pub fn reconnect_wait(&self) -> Duration {
        Duration::from_millis(self.reconnect_wait_ms)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Options for a single connection attempt.
    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::new(self.servers.clone())
            .with_max_reconnects(self.max_reconnects)
            .with_reconnect_wait(self.reconnect_wait())
            .with_connect_timeout(self.connect_timeout())
            .with_tls(TlsOptions {
                root: self.tls.root.clone(),
                cert: self.tls.cert.clone(),
                key: self.tls.key.clone(),
            });
        if let Some(creds) = &self.user_credentials {
            options = options.with_user_credentials(creds.clone());
        }
        if let Some(name) = &self.connection_name {
            options = options.with_name(name.clone());
        }
        options
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(key, value = %raw, "Ignoring unparseable configuration override"),
    }
}

fn override_path<F>(lookup: &F, key: &str, target: &mut Option<PathBuf>)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *target = if raw.is_empty() {
            None
        } else {
            Some(PathBuf::from(raw))
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = NotifyConfig::default();
        assert!(!config.is_enabled());
        assert!(!config.primary);
        assert_eq!(config.reconnect_wait(), Duration::from_secs(2));
        assert_eq!(config.connect_timeout(), Duration::from_secs(2));
        assert_eq!(config.cache_ttl(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = NotifyConfig::default().with_overrides(lookup(&[
            ("CLAIM_NOTIFY_SERVERS", "bus://a:4222, bus://b:4222,"),
            ("CLAIM_NOTIFY_MAX_RECONNECTS", "-1"),
            ("CLAIM_NOTIFY_RECONNECT_WAIT_MS", "500"),
            ("CLAIM_NOTIFY_PRIMARY", "true"),
            ("CLAIM_NOTIFY_TLS_ROOT", "/etc/ca.pem"),
            ("CLAIM_NOTIFY_NAME", "claims-1"),
        ]));

        assert_eq!(config.servers, vec!["bus://a:4222", "bus://b:4222"]);
        assert_eq!(config.max_reconnects, -1);
        assert_eq!(config.reconnect_wait_ms, 500);
        assert!(config.primary);
        assert_eq!(config.tls.root, Some(PathBuf::from("/etc/ca.pem")));
        assert_eq!(config.connection_name.as_deref(), Some("claims-1"));
    }

    #[test]
    fn test_bad_override_ignored() {
        let config = NotifyConfig::default().with_overrides(lookup(&[
            ("CLAIM_NOTIFY_CONNECT_TIMEOUT_MS", "soon"),
            ("CLAIM_NOTIFY_PRIMARY", "maybe"),
        ]));
        assert_eq!(config.connect_timeout_ms, 2_000);
        assert!(!config.primary);
    }

    #[test]
    fn test_validate() {
        let mut config = NotifyConfig {
            servers: vec!["bus://a".into(), " ".into()],
            ..NotifyConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyServer(1)));

        config.servers = vec!["bus://a".into()];
        config.tls.cert = Some(PathBuf::from("cert.pem"));
        assert_eq!(config.validate(), Err(ConfigError::CertWithoutKey));

        config.tls.cert = None;
        config.tls.key = Some(PathBuf::from("key.pem"));
        assert_eq!(config.validate(), Err(ConfigError::KeyWithoutCert));

        config.tls.key = None;
        config.reconnect_wait_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration("reconnect_wait_ms"))
        );
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify.json");
        std::fs::write(
            &path,
            r#"{ "servers": ["bus://a:4222"], "primary": true, "tls": { "root": "/ca.pem" } }"#,
        )
        .unwrap();

        let config = NotifyConfig::from_file(&path).unwrap();
        assert_eq!(config.servers, vec!["bus://a:4222"]);
        assert!(config.primary);
        assert_eq!(config.tls.root, Some(PathBuf::from("/ca.pem")));
        assert_eq!(config.reconnect_wait_ms, 2_000);
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            NotifyConfig::from_file(dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            NotifyConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_connect_options() {
        let config = NotifyConfig {
            servers: vec!["bus://a".into(), "bus://b".into()],
            max_reconnects: 10,
            reconnect_wait_ms: 100,
            connect_timeout_ms: 300,
            user_credentials: Some(PathBuf::from("/creds")),
            ..NotifyConfig::default()
        };
        let options = config.connect_options();
        assert_eq!(options.server_url(), "bus://a,bus://b");
        assert_eq!(options.max_reconnects, 10);
        assert_eq!(options.reconnect_wait, Duration::from_millis(100));
        assert_eq!(options.connect_timeout, Duration::from_millis(300));
        assert_eq!(options.user_credentials, Some(PathBuf::from("/creds")));
    }
}
