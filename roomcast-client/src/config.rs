use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub signaling: SignalingConfig,
    pub transport: TransportConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
    /// Fixed peer id; a random one is generated when unset
    pub peer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Session server origin, e.g. `http://192.168.0.10:3000`
    pub base_url: String,
    /// Path under which every signaling endpoint is mounted
    pub path_prefix: String,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            path_prefix: "/signaling".to_string(),
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl SignalingConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Delay between connection-state polls while waiting for `connected`
    pub connect_poll_interval_ms: u64,
    /// Give up waiting for `connected` after this long (unset = wait forever)
    pub connect_timeout_ms: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_poll_interval_ms: 100,
            connect_timeout_ms: None,
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.connect_poll_interval_ms)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Reconciliation interval
    pub interval_ms: u64,
    /// Capacity of the session event broadcast channel
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            event_capacity: 256,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // ROOMCAST_SIGNALING__BASE_URL, ROOMCAST_SYNC__INTERVAL_MS, ...
        builder = builder.add_source(
            Environment::with_prefix("ROOMCAST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check for misconfigurations, returning every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        match url::Url::parse(&self.signaling.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(format!(
                "signaling.base_url must be http or https, got {}",
                url.scheme()
            )),
            Err(e) => errors.push(format!("signaling.base_url is invalid: {e}")),
        }

        if self.signaling.request_timeout_ms == 0 {
            errors.push("signaling.request_timeout_ms must be positive".to_string());
        }
        if self.transport.connect_poll_interval_ms == 0 {
            errors.push("transport.connect_poll_interval_ms must be positive".to_string());
        }
        if self.transport.connect_timeout_ms == Some(0) {
            errors.push("transport.connect_timeout_ms must be positive when set".to_string());
        }
        if self.sync.interval_ms == 0 {
            errors.push("sync.interval_ms must be positive".to_string());
        }
        if self.sync.event_capacity == 0 {
            errors.push("sync.event_capacity must be positive".to_string());
        }
        if matches!(&self.peer_id, Some(id) if id.trim().is_empty()) {
            errors.push("peer_id must not be blank".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Full URL of one signaling endpoint
    #[must_use]
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        let base = self.signaling.base_url.trim_end_matches('/');
        match self.signaling.path_prefix.trim_matches('/') {
            "" => format!("{base}/{endpoint}"),
            prefix => format!("{base}/{prefix}/{endpoint}"),
        }
    }
}
