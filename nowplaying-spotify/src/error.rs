use std::time::Duration;
use thiserror::Error;

/// Errors from talking to the Spotify Web API and accounts service.
#[derive(Debug, Error)]
pub enum SpotifyError {
    /// The access token was rejected (HTTP 401).
    #[error("Spotify rejected the access token")]
    Unauthorized,

    /// Spotify API returned a rate limit response.
    #[error("Spotify API rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Any other non-success status from the Web API.
    #[error("Spotify API returned HTTP {status}")]
    Status { status: u16 },

    /// The accounts service refused a token request.
    #[error("Spotify token request failed with HTTP {status}: {body}")]
    TokenRequest { status: u16, body: String },

    /// A token grant arrived without a refresh token and none was known.
    #[error("Spotify token response did not include a refresh token")]
    MissingRefreshToken,

    /// Transport-level failure.
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Failure inside the retrying client.
    #[error("HTTP middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    /// Failed to parse or serialize JSON data.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl SpotifyError {
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Delay requested by the upstream, if any
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }
}

/// Convenience type alias for Results with `SpotifyError`.
pub type Result<T> = std::result::Result<T, SpotifyError>;

/// Token lifecycle failures.
///
/// Cloneable so every caller awaiting a shared refresh sees the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// No credential has ever been stored; the user has to log in.
    #[error("Spotify is not authorized yet; visit /login")]
    Unauthorized,

    /// Exchanging the refresh token failed; retried on the next tick.
    #[error("Spotify token refresh failed: {reason}")]
    RefreshFailed { reason: String },

    /// Exchanging an authorization code failed.
    #[error("Spotify authorization code exchange failed: {reason}")]
    ExchangeFailed { reason: String },

    /// A new credential is held in memory but could not be written to disk.
    #[error("Spotify credential could not be persisted: {reason}")]
    PersistFailed { reason: String },

    /// Reading the credential store failed.
    #[error("Credential store unavailable: {reason}")]
    Storage { reason: String },
}
