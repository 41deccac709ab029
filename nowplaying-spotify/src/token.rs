//! Access token lifecycle.
//!
//! One credential is shared by every upstream call. Refreshes are
//! single-flight: concurrent callers that find the token near expiry all
//! await the same in-flight exchange.

use crate::api::SpotifyApi;
use crate::error::TokenError;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use nowplaying_core::{Credential, CredentialStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delays between attempts to persist a new credential
const PERSIST_RETRY_BACKOFF_MS: [u64; 2] = [100, 500];

/// How long on-demand callers keep using a still-valid token after a failed
/// refresh before trying again themselves
const REFRESH_RETRY_BACKOFF: Duration = Duration::from_secs(60);

type RefreshFuture = Shared<BoxFuture<'static, Result<Credential, TokenError>>>;

#[derive(Default)]
struct TokenState {
    credential: Option<Credential>,
    /// Whether the store has been read at least once
    loaded: bool,
    /// The in-memory credential has not reached the store yet
    dirty: bool,
    /// Bumped on every authorization; refreshes started under an older
    /// epoch must not overwrite the newer credential
    epoch: u64,
    /// Set after a failed refresh; on-demand callers do not retry before it
    retry_not_before: Option<Instant>,
}

struct Inner {
    api: Arc<dyn SpotifyApi>,
    store: Arc<dyn CredentialStore>,
    margin: Duration,
    state: RwLock<TokenState>,
    in_flight: Mutex<Option<RefreshFuture>>,
    /// Serializes store writes so the last save is the newest credential
    persist_lock: Mutex<()>,
}

/// Owns the credential, refreshing and persisting it as needed.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl TokenManager {
    #[must_use]
    pub fn new(
        api: Arc<dyn SpotifyApi>,
        store: Arc<dyn CredentialStore>,
        refresh_margin: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                margin: refresh_margin,
                state: RwLock::new(TokenState::default()),
                in_flight: Mutex::new(None),
                persist_lock: Mutex::new(()),
            }),
        }
    }

    /// Whether a credential exists, in memory or in the store.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store cannot be read.
    pub async fn has_credential(&self) -> Result<bool, TokenError> {
        self.inner.load_if_needed().await?;
        Ok(self.inner.state.read().await.credential.is_some())
    }

    /// A credential valid for immediate use, refreshing first when it is
    /// within the refresh margin of expiry.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` if no credential was ever stored, or
    /// `RefreshFailed` if the token expired and could not be refreshed.
    pub async fn ensure_valid(&self) -> Result<Credential, TokenError> {
        self.ensure_valid_with(true).await
    }

    /// `ensure_valid`, optionally ignoring the backoff after a failed refresh.
    async fn ensure_valid_with(&self, respect_backoff: bool) -> Result<Credential, TokenError> {
        self.inner.load_if_needed().await?;

        // Fast path: read lock only
        let current = {
            let state = self.inner.state.read().await;
            let Some(credential) = state.credential.clone() else {
                return Err(TokenError::Unauthorized);
            };
            if !credential.expires_within(self.inner.margin, Utc::now()) {
                let dirty = state.dirty;
                drop(state);
                if dirty {
                    self.inner.retry_persist().await;
                }
                return Ok(credential);
            }
            credential
        };

        if let Some(fresher) = self.inner.adopt_fresher_persisted(&current).await {
            return Ok(fresher);
        }

        if respect_backoff {
            if let Some(credential) = self.inner.within_retry_backoff(&current).await {
                return Ok(credential);
            }
        }

        match self.shared_refresh(false).await {
            Ok(credential) => Ok(credential),
            Err(TokenError::PersistFailed { reason }) => {
                warn!("Using refreshed token that is not persisted yet: {}", reason);
                self.inner.current().await.ok_or(TokenError::Unauthorized)
            }
            Err(e) => {
                // Still usable until it actually expires
                let current = self.inner.current().await;
                match current {
                    Some(c) if !c.expires_within(Duration::ZERO, Utc::now()) => {
                        warn!("{}; continuing with current token until expiry", e);
                        Ok(c)
                    }
                    _ => Err(e),
                }
            }
        }
    }

    /// Force a refresh regardless of the current expiry, e.g. after the
    /// upstream rejected the access token.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized`, `RefreshFailed`, or `PersistFailed` when the
    /// refreshed credential is only held in memory.
    pub async fn refresh(&self) -> Result<Credential, TokenError> {
        self.inner.load_if_needed().await?;
        self.shared_refresh(true).await
    }

    /// Exchange an authorization code and adopt the resulting credential.
    ///
    /// # Errors
    ///
    /// Returns `ExchangeFailed` if the exchange fails, or `PersistFailed` if
    /// the new credential could not be stored (it is still adopted).
    pub async fn complete_authorization(&self, code: &str) -> Result<Credential, TokenError> {
        let grant = self.inner.api.exchange_code(code).await.map_err(|e| {
            error!("Authorization code exchange failed: {}", e);
            TokenError::ExchangeFailed {
                reason: e.to_string(),
            }
        })?;
        let credential =
            grant
                .into_credential(None, Utc::now())
                .map_err(|e| TokenError::ExchangeFailed {
                    reason: e.to_string(),
                })?;

        {
            let mut state = self.inner.state.write().await;
            state.credential = Some(credential.clone());
            state.loaded = true;
            state.dirty = true;
            state.epoch += 1;
            state.retry_not_before = None;
        }
        info!(
            "Authorized with Spotify, token valid until {}",
            credential.expires_at
        );

        self.inner.persist(&credential).await?;
        Ok(credential)
    }

    /// Spawn the background safety net that keeps the token fresh even when
    /// nothing else calls `ensure_valid`.
    #[must_use]
    pub fn start_refresh_task(
        &self,
        interval: Duration,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        debug!("Token refresh task shutting down");
                        break;
                    }
                    () = tokio::time::sleep(interval) => {
                        match manager.ensure_valid_with(false).await {
                            Ok(credential) => debug!(
                                "Access token valid for another {}s",
                                credential.remaining(Utc::now()).as_secs()
                            ),
                            Err(TokenError::Unauthorized) => {
                                debug!("Token refresh skipped, not authorized");
                            }
                            Err(e) => warn!("Scheduled token refresh failed: {}", e),
                        }
                    }
                }
            }
        })
    }

    /// Join the in-flight refresh or start one.
    async fn shared_refresh(&self, force: bool) -> Result<Credential, TokenError> {
        let refresh = {
            let mut slot = self.inner.in_flight.lock().await;
            if let Some(refresh) = slot.as_ref() {
                refresh.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let refresh = async move {
                    let result = inner.refresh_once(force).await;
                    *inner.in_flight.lock().await = None;
                    result
                }
                .boxed()
                .shared();
                *slot = Some(refresh.clone());
                refresh
            }
        };
        refresh.await
    }
}

impl Inner {
    async fn current(&self) -> Option<Credential> {
        self.state.read().await.credential.clone()
    }

    async fn load_if_needed(&self) -> Result<(), TokenError> {
        if self.state.read().await.loaded {
            return Ok(());
        }
        let mut state = self.state.write().await;
        if state.loaded {
            return Ok(());
        }
        match self.store.load().await {
            Ok(credential) => {
                match &credential {
                    Some(c) => info!("Loaded stored Spotify credential, expires {}", c.expires_at),
                    None => info!("No stored Spotify credential, visit /login to authorize"),
                }
                state.credential = credential;
                state.loaded = true;
                Ok(())
            }
            Err(e) => {
                error!("Failed to load stored credential: {}", e);
                Err(TokenError::Storage {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Adopt the stored credential if something else already refreshed it.
    async fn adopt_fresher_persisted(&self, current: &Credential) -> Option<Credential> {
        let persisted = match self.store.load().await {
            Ok(persisted) => persisted?,
            Err(e) => {
                warn!("Could not re-read stored credential: {}", e);
                return None;
            }
        };
        if persisted.expires_at <= current.expires_at
            || persisted.expires_within(self.margin, Utc::now())
        {
            return None;
        }

        let mut state = self.state.write().await;
        if state.credential.as_ref() != Some(current) {
            return None;
        }
        debug!("Adopting fresher stored credential");
        state.credential = Some(persisted.clone());
        state.dirty = false;
        Some(persisted)
    }

    async fn refresh_once(&self, force: bool) -> Result<Credential, TokenError> {
        let (current, epoch) = {
            let state = self.state.read().await;
            (state.credential.clone(), state.epoch)
        };
        let Some(current) = current else {
            return Err(TokenError::Unauthorized);
        };
        if !force && !current.expires_within(self.margin, Utc::now()) {
            return Ok(current);
        }

        info!("Refreshing Spotify access token");
        let refreshed = match self.request_refresh(&current).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                self.state.write().await.retry_not_before =
                    Some(Instant::now() + REFRESH_RETRY_BACKOFF);
                return Err(e);
            }
        };

        {
            let mut state = self.state.write().await;
            if state.epoch != epoch {
                info!("Authorization changed during refresh, discarding refreshed token");
                return state.credential.clone().ok_or(TokenError::Unauthorized);
            }
            state.credential = Some(refreshed.clone());
            state.dirty = true;
            state.retry_not_before = None;
        }
        debug!("Access token refreshed, expires {}", refreshed.expires_at);

        self.persist(&refreshed).await?;
        // An authorization may have replaced it while it was being saved
        Ok(self.current().await.unwrap_or(refreshed))
    }

    async fn request_refresh(&self, current: &Credential) -> Result<Credential, TokenError> {
        let grant = self
            .api
            .refresh_token(&current.refresh_token)
            .await
            .map_err(|e| {
                warn!("Token refresh failed: {}", e);
                TokenError::RefreshFailed {
                    reason: e.to_string(),
                }
            })?;
        grant
            .into_credential(Some(&current.refresh_token), Utc::now())
            .map_err(|e| TokenError::RefreshFailed {
                reason: e.to_string(),
            })
    }

    /// The current credential while a failed refresh is backing off and the
    /// token has not expired yet.
    async fn within_retry_backoff(&self, current: &Credential) -> Option<Credential> {
        let retry_not_before = self.state.read().await.retry_not_before?;
        if Instant::now() >= retry_not_before || current.expires_within(Duration::ZERO, Utc::now())
        {
            return None;
        }
        debug!("Refresh failed recently, using current token until the next retry");
        Some(current.clone())
    }

    /// Write `credential` to the store, retrying with backoff.
    ///
    /// Gives up quietly once a newer credential replaced it in memory; that
    /// credential's own save lands after this one.
    async fn persist(&self, credential: &Credential) -> Result<(), TokenError> {
        let _guard = self.persist_lock.lock().await;
        let mut last_error = String::new();
        for attempt in 0..=PERSIST_RETRY_BACKOFF_MS.len() {
            if attempt > 0 {
                let delay = PERSIST_RETRY_BACKOFF_MS[attempt - 1];
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.current().await.as_ref() != Some(credential) {
                debug!("Credential superseded before it was persisted");
                return Ok(());
            }
            match self.store.save(credential).await {
                Ok(()) => {
                    let mut state = self.state.write().await;
                    if state.credential.as_ref() == Some(credential) {
                        state.dirty = false;
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to persist credential (attempt {}): {}", attempt + 1, e);
                    last_error = e.to_string();
                }
            }
        }
        error!("Giving up persisting credential: {}", last_error);
        Err(TokenError::PersistFailed { reason: last_error })
    }

    /// Retry a save that failed earlier; failures are logged only.
    async fn retry_persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let Some(credential) = self.current().await else {
            return;
        };
        match self.store.save(&credential).await {
            Ok(()) => {
                let mut state = self.state.write().await;
                if state.credential.as_ref() == Some(&credential) {
                    state.dirty = false;
                }
                info!("Persisted previously unsaved credential");
            }
            Err(e) => warn!("Credential still not persisted: {}", e),
        }
    }
}
