//! Spotify Web API and accounts service client.

use crate::config::{SpotifyProviderConfig, SCOPES};
use crate::error::{Result, SpotifyError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nowplaying_core::time::{expiry_after, utc_from_millis};
use nowplaying_core::{Credential, PlaybackSnapshot, TrackRef};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const CURRENTLY_PLAYING_URL: &str = "https://api.spotify.com/v1/me/player/currently-playing";
const SEARCH_URL: &str = "https://api.spotify.com/v1/search";

const USER_AGENT: &str = concat!("nowplaying/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SEARCH_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Response of the token endpoint for both grant types.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: u64,
    /// Absent on refresh when Spotify does not rotate the token
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenGrant {
    /// Turn the grant into a credential, keeping `previous_refresh` if the
    /// grant did not rotate the refresh token.
    ///
    /// # Errors
    ///
    /// Returns `MissingRefreshToken` if neither side has a refresh token.
    pub fn into_credential(
        self,
        previous_refresh: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Credential> {
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh.map(str::to_string))
            .ok_or(SpotifyError::MissingRefreshToken)?;
        Ok(Credential::new(
            self.access_token,
            expiry_after(now, Duration::from_secs(self.expires_in)),
            refresh_token,
        ))
    }
}

/// Upstream operations the relay depends on.
#[async_trait]
pub trait SpotifyApi: Send + Sync {
    /// Exchange an authorization code for a token grant.
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant>;

    /// Exchange a refresh token for a new access token.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant>;

    /// Current playback state; `None` when nothing is active.
    async fn currently_playing(&self, access_token: &str) -> Result<Option<PlaybackSnapshot>>;

    async fn search_tracks(
        &self,
        access_token: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<TrackRef>>;
}

/// Wire shape of the currently-playing endpoint; nullable fields included.
#[derive(Debug, Deserialize)]
struct CurrentlyPlayingResponse {
    #[serde(default)]
    is_playing: bool,
    #[serde(default)]
    item: Option<TrackRef>,
    #[serde(default)]
    progress_ms: Option<u64>,
    #[serde(default)]
    timestamp: Option<i64>,
}

impl CurrentlyPlayingResponse {
    fn into_snapshot(self, now: DateTime<Utc>) -> PlaybackSnapshot {
        PlaybackSnapshot {
            is_playing: self.is_playing,
            item: self.item,
            progress_ms: self.progress_ms.unwrap_or_default(),
            timestamp: self.timestamp.map_or(now, utc_from_millis),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    tracks: Option<TrackPage>,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    #[serde(default)]
    items: Vec<Option<TrackRef>>,
}

/// Parse a currently-playing response body.
///
/// An empty body means no active device.
pub(crate) fn parse_currently_playing(
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<Option<PlaybackSnapshot>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let response: CurrentlyPlayingResponse = serde_json::from_slice(body)?;
    Ok(Some(response.into_snapshot(now)))
}

pub(crate) fn parse_search(body: &[u8]) -> Result<Vec<TrackRef>> {
    let response: SearchResponse = serde_json::from_slice(body)?;
    Ok(response
        .tracks
        .map(|page| page.items.into_iter().flatten().collect())
        .unwrap_or_default())
}

/// Map non-success Web API statuses to errors.
fn check_status(response: &Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED => Err(SpotifyError::Unauthorized),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            Err(SpotifyError::RateLimited { retry_after_secs })
        }
        other => Err(SpotifyError::Status {
            status: other.as_u16(),
        }),
    }
}

/// Everything needed to send a user to the Spotify consent page.
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    client_id: String,
    redirect_uri: String,
}

impl AuthorizeRequest {
    #[must_use]
    pub const fn new(client_id: String, redirect_uri: String) -> Self {
        Self {
            client_id,
            redirect_uri,
        }
    }

    /// Build the authorization page URL for a login attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL fails to parse.
    pub fn url(&self, state: &str) -> Result<Url> {
        let scopes = SCOPES.join(" ");
        Ok(Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("scope", scopes.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("state", state),
            ],
        )?)
    }
}

/// Spotify client backed by reqwest.
pub struct SpotifyClient {
    http: Client,
    /// Retrying client for idempotent lookups
    search_http: ClientWithMiddleware,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl SpotifyClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(config: &SpotifyProviderConfig, redirect_uri: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        let retry_policy =
            ExponentialBackoff::builder().build_with_max_retries(SEARCH_MAX_RETRIES);
        let search_http = ClientBuilder::new(http.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            http,
            search_http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri,
        })
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Parameters for the authorization redirect of this client.
    #[must_use]
    pub fn authorize_request(&self) -> AuthorizeRequest {
        AuthorizeRequest::new(self.client_id.clone(), self.redirect_uri.clone())
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant> {
        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpotifyError::TokenRequest {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SpotifyApi for SpotifyClient {
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ])
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn currently_playing(&self, access_token: &str) -> Result<Option<PlaybackSnapshot>> {
        let response = self
            .http
            .get(CURRENTLY_PLAYING_URL)
            .bearer_auth(access_token)
            .send()
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        check_status(&response)?;

        let body = response.bytes().await?;
        parse_currently_playing(&body, Utc::now())
    }

    async fn search_tracks(
        &self,
        access_token: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<TrackRef>> {
        debug!("Searching Spotify for {:?}", query);
        let limit = limit.to_string();
        let response = self
            .search_http
            .get(SEARCH_URL)
            .bearer_auth(access_token)
            .query(&[("q", query), ("type", "track"), ("limit", limit.as_str())])
            .send()
            .await?;

        check_status(&response)?;
        let body = response.bytes().await?;
        parse_search(&body)
    }
}
