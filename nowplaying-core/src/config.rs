use crate::error::{CoreError, Result};
use crate::hub::HubSettings;
use crate::schedule::PollSchedule;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Provider sections, parsed lazily by the provider crates
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally visible base URL, used to derive the OAuth redirect URI
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding the listener
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL clients reach the relay on, without a trailing slash
    #[must_use]
    pub fn base_url(&self) -> String {
        self.public_url.as_deref().map_or_else(
            || format!("http://{}:{}", self.host, self.port),
            |url| url.trim_end_matches('/').to_string(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
    #[serde(default = "default_error_backoff")]
    pub error_backoff_ms: u64,
    #[serde(default = "default_unauthorized_delay")]
    pub unauthorized_delay_ms: u64,
}

const fn default_poll_interval() -> u64 {
    1000
}

const fn default_error_backoff() -> u64 {
    15_000
}

const fn default_unauthorized_delay() -> u64 {
    5000
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            error_backoff_ms: default_error_backoff(),
            unauthorized_delay_ms: default_unauthorized_delay(),
        }
    }
}

impl PollerConfig {
    #[must_use]
    pub const fn schedule(&self) -> PollSchedule {
        PollSchedule {
            interval: Duration::from_millis(self.interval_ms),
            error_backoff: Duration::from_millis(self.error_backoff_ms),
            unauthorized_delay: Duration::from_millis(self.unauthorized_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_backfill_history")]
    pub backfill_history: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

const fn default_heartbeat_interval() -> u64 {
    20
}

const fn default_backfill_history() -> usize {
    10
}

const fn default_queue_capacity() -> usize {
    32
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            backfill_history: default_backfill_history(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl HubConfig {
    #[must_use]
    pub const fn settings(&self) -> HubSettings {
        HubSettings {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            backfill_history: self.backfill_history,
            queue_capacity: self.queue_capacity,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file; defaults to `~/.config/nowplaying/nowplaying.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl StorageConfig {
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(crate::paths::database_path)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to `~/.config/nowplaying/nowplaying.log`
    #[serde(default)]
    pub file: bool,
}

/// Raw `[providers.*]` tables, deserialized on demand by each provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvidersConfig(toml::Table);

impl ProvidersConfig {
    /// Deserialize the section for provider `name`, `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the section exists but does not match `T`.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.0
            .get(name)
            .map(|value| {
                value.clone().try_into().map_err(|e: toml::de::Error| {
                    CoreError::ConfigInvalid {
                        message: format!("providers.{name}: {e}"),
                    }
                })
            })
            .transpose()
    }
}

impl RelayConfig {
    /// Get the configuration directory path (~/.config/nowplaying/)
    #[must_use]
    pub fn config_dir() -> PathBuf {
        crate::paths::config_dir()
    }

    /// Get the config file path
    #[must_use]
    pub fn config_path() -> PathBuf {
        crate::paths::config_path()
    }

    /// Load config from file or create template on first run
    ///
    /// `provider_templates` are appended to the generated template.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigNotFound`] after writing a template, or an
    /// error if the file cannot be read, parsed or validated.
    pub fn load_or_create(provider_templates: Option<&[&str]>) -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent)?;
            }

            fs::write(&config_path, build_config_template(provider_templates))?;

            return Err(CoreError::ConfigNotFound { path: config_path });
        }

        Self::load_from(&config_path)
    }

    /// Load and validate config from `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate config from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or fails validation.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigInvalid`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.poller.interval_ms == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "poller.interval_ms must be greater than 0".into(),
            });
        }
        if self.poller.error_backoff_ms < self.poller.interval_ms {
            return Err(CoreError::ConfigInvalid {
                message: "poller.error_backoff_ms must not be shorter than poller.interval_ms"
                    .into(),
            });
        }
        if self.hub.heartbeat_interval_secs == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "hub.heartbeat_interval_secs must be greater than 0".into(),
            });
        }
        if self.hub.queue_capacity < 2 {
            return Err(CoreError::ConfigInvalid {
                message: "hub.queue_capacity must be at least 2".into(),
            });
        }
        Ok(())
    }
}

/// Build the first-run config template from the core sections and any
/// provider sections.
#[must_use]
pub fn build_config_template(provider_templates: Option<&[&str]>) -> String {
    let mut template = CONFIG_TEMPLATE.to_string();
    for provider in provider_templates.unwrap_or_default() {
        template.push('\n');
        template.push_str(provider);
    }
    template
}

const CONFIG_TEMPLATE: &str = r##"# nowplaying relay configuration
# ~/.config/nowplaying/config.toml

[server]
host = "127.0.0.1"
port = 3000
# Externally visible base URL (used to build the OAuth redirect URI)
# public_url = "https://nowplaying.example.com"

[poller]
interval_ms = 1000
# Delay after a failed poll before trying again
error_backoff_ms = 15000
# Delay between polls while waiting for the first login
unauthorized_delay_ms = 5000

[hub]
heartbeat_interval_secs = 20
# History entries sent to a newly connected client
backfill_history = 10
# Messages buffered per client before it is disconnected
queue_capacity = 32

[storage]
# database_path = "/var/lib/nowplaying/nowplaying.db"

[logging]
# Also write logs to ~/.config/nowplaying/nowplaying.log
file = false
"##;
