//! Spotify provider configuration.

use const_format::concatcp;
use nowplaying_core::{CoreError, ProvidersConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Provider name used in config file
pub const PROVIDER_NAME: &str = "spotify";

/// Refresh the access token when it has less than this left
pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 300;

/// Cadence of the background refresh safety net
pub const DEFAULT_REFRESH_CHECK_INTERVAL_SECS: u64 = 60;

/// Maximum tracks returned for a search request
pub const DEFAULT_SEARCH_LIMIT: u32 = 20;

/// Scopes requested during authorization
pub const SCOPES: &[&str] = &[
    "user-read-playback-state",
    "user-read-currently-playing",
    "user-read-recently-played",
];

/// Environment variable overriding `client_id`
pub const CLIENT_ID_ENV: &str = "SPOTIFY_CLIENT_ID";

/// Environment variable overriding `client_secret`
pub const CLIENT_SECRET_ENV: &str = "SPOTIFY_CLIENT_SECRET";

/// Spotify-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyProviderConfig {
    /// Spotify OAuth client ID
    #[serde(default)]
    pub client_id: String,
    /// Spotify OAuth client secret
    #[serde(default)]
    pub client_secret: String,
    /// OAuth redirect URI; defaults to `<server base url>/callback`
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
    #[serde(default = "default_refresh_check_interval")]
    pub refresh_check_interval_secs: u64,
    #[serde(default = "default_search_limit")]
    pub search_limit: u32,
}

const fn default_refresh_margin() -> u64 {
    DEFAULT_REFRESH_MARGIN_SECS
}

const fn default_refresh_check_interval() -> u64 {
    DEFAULT_REFRESH_CHECK_INTERVAL_SECS
}

const fn default_search_limit() -> u32 {
    DEFAULT_SEARCH_LIMIT
}

impl Default for SpotifyProviderConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: None,
            refresh_margin_secs: default_refresh_margin(),
            refresh_check_interval_secs: default_refresh_check_interval(),
            search_limit: default_search_limit(),
        }
    }
}

impl SpotifyProviderConfig {
    /// Extract Spotify config from the dynamic providers config.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be parsed.
    pub fn from_providers(providers: &ProvidersConfig) -> Result<Option<Self>, CoreError> {
        providers.get(PROVIDER_NAME)
    }

    /// Resolve the effective config: file section (or defaults), then
    /// environment overrides, then validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the section is malformed or credentials are missing.
    pub fn resolve(providers: &ProvidersConfig) -> Result<Self, CoreError> {
        let config = Self::from_providers(providers)?
            .unwrap_or_default()
            .with_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `SPOTIFY_CLIENT_ID` / `SPOTIFY_CLIENT_SECRET` style overrides.
    #[must_use]
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(id) = lookup(CLIENT_ID_ENV).filter(|v| !v.is_empty()) {
            self.client_id = id;
        }
        if let Some(secret) = lookup(CLIENT_SECRET_ENV).filter(|v| !v.is_empty()) {
            self.client_secret = secret;
        }
        self
    }

    /// Validate that required fields are present.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing or empty.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.client_id.is_empty() {
            return Err(CoreError::ConfigMissingField {
                field: "providers.spotify.client_id".into(),
            });
        }
        if self.client_secret.is_empty() {
            return Err(CoreError::ConfigMissingField {
                field: "providers.spotify.client_secret".into(),
            });
        }
        if self.refresh_check_interval_secs == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "providers.spotify.refresh_check_interval_secs must be greater than 0"
                    .into(),
            });
        }
        Ok(())
    }

    /// Redirect URI registered with Spotify
    #[must_use]
    pub fn redirect_uri(&self, base_url: &str) -> String {
        self.redirect_uri
            .clone()
            .unwrap_or_else(|| format!("{}/callback", base_url.trim_end_matches('/')))
    }

    #[must_use]
    pub const fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }

    #[must_use]
    pub const fn refresh_check_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_check_interval_secs)
    }
}

/// Config template for Spotify provider.
/// This is appended to the base config template when creating a new config file.
pub const CONFIG_TEMPLATE: &str = concatcp!(
    "[providers.",
    PROVIDER_NAME,
    r#"]
# Get these from https://developer.spotify.com/dashboard
# (or set SPOTIFY_CLIENT_ID / SPOTIFY_CLIENT_SECRET)
client_id = ""
client_secret = ""
# Must match a redirect URI registered for the app; defaults to <server url>/callback
# redirect_uri = "http://127.0.0.1:3000/callback"
refresh_margin_secs = "#,
    DEFAULT_REFRESH_MARGIN_SECS,
    "\nrefresh_check_interval_secs = ",
    DEFAULT_REFRESH_CHECK_INTERVAL_SECS,
    "\nsearch_limit = ",
    DEFAULT_SEARCH_LIMIT,
    "\n"
);
