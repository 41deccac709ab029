//! In-memory stand-ins for the upstream API and storage.

use crate::api::{SpotifyApi, TokenGrant};
use crate::error::{Result, SpotifyError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nowplaying_core::time::expiry_after;
use nowplaying_core::{
    AlbumRef, ArtistRef, CoreError, Credential, CredentialStore, ExternalUrls, HistoryEntry,
    HistoryLog, PlaybackSnapshot, TrackRef,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn track(uri: &str) -> TrackRef {
    TrackRef {
        uri: uri.to_string(),
        name: format!("Track {uri}"),
        duration_ms: 180_000,
        artists: vec![ArtistRef {
            name: "Artist".into(),
            uri: "spotify:artist:1".into(),
            external_urls: ExternalUrls::default(),
        }],
        album: AlbumRef::default(),
        external_urls: ExternalUrls::default(),
    }
}

pub fn snapshot(uri: &str, is_playing: bool) -> PlaybackSnapshot {
    PlaybackSnapshot {
        is_playing,
        item: Some(track(uri)),
        progress_ms: 1_000,
        timestamp: Utc::now(),
    }
}

pub fn credential_expiring_in(access: &str, lifetime: Duration) -> Credential {
    Credential::new(access, expiry_after(Utc::now(), lifetime), "refresh-token")
}

/// Scripted currently-playing response.
#[derive(Debug, Clone)]
pub enum FakePlayer {
    Playing(&'static str),
    Paused(&'static str),
    Idle,
    Fail(u16),
    Unauthorized,
    RateLimited(u64),
}

/// Upstream fake with call counters.
///
/// Player responses are consumed in order; the last one repeats.
#[derive(Default)]
pub struct FakeSpotify {
    pub refresh_calls: AtomicUsize,
    pub exchange_calls: AtomicUsize,
    pub player_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
    refresh_fails: AtomicBool,
    exchange_fails: AtomicBool,
    search_fails: AtomicBool,
    rotate_refresh_token: AtomicBool,
    refresh_delay_ms: AtomicU64,
    exchange_expires_in: AtomicU64,
    player: Mutex<VecDeque<FakePlayer>>,
    search_results: Mutex<Vec<TrackRef>>,
}

impl FakeSpotify {
    pub fn with_player(responses: impl IntoIterator<Item = FakePlayer>) -> Self {
        let fake = Self::default();
        fake.script(responses);
        fake
    }

    pub fn script(&self, responses: impl IntoIterator<Item = FakePlayer>) {
        *self.player.lock().unwrap() = responses.into_iter().collect();
    }

    pub fn set_refresh_fails(&self, fails: bool) {
        self.refresh_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_exchange_fails(&self, fails: bool) {
        self.exchange_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_search_fails(&self, fails: bool) {
        self.search_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_rotate_refresh_token(&self, rotate: bool) {
        self.rotate_refresh_token.store(rotate, Ordering::SeqCst);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        self.refresh_delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap(), Ordering::SeqCst);
    }

    pub fn set_exchange_expires_in(&self, secs: u64) {
        self.exchange_expires_in.store(secs, Ordering::SeqCst);
    }

    pub fn set_search_results(&self, tracks: Vec<TrackRef>) {
        *self.search_results.lock().unwrap() = tracks;
    }

    fn next_player(&self) -> FakePlayer {
        let mut queue = self.player.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap_or(FakePlayer::Idle)
        }
    }
}

#[async_trait]
impl SpotifyApi for FakeSpotify {
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        if self.exchange_fails.load(Ordering::SeqCst) {
            return Err(SpotifyError::TokenRequest {
                status: 400,
                body: r#"{"error":"invalid_grant"}"#.into(),
            });
        }
        let expires_in = match self.exchange_expires_in.load(Ordering::SeqCst) {
            0 => 3600,
            secs => secs,
        };
        Ok(TokenGrant {
            access_token: format!("authorized-{code}"),
            expires_in,
            refresh_token: Some("refresh-token".into()),
            scope: None,
        })
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenGrant> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.refresh_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.refresh_fails.load(Ordering::SeqCst) {
            return Err(SpotifyError::TokenRequest {
                status: 503,
                body: String::new(),
            });
        }
        Ok(TokenGrant {
            access_token: format!("refreshed-{n}"),
            expires_in: 3600,
            refresh_token: self
                .rotate_refresh_token
                .load(Ordering::SeqCst)
                .then(|| format!("rotated-{n}")),
            scope: None,
        })
    }

    async fn currently_playing(&self, _access_token: &str) -> Result<Option<PlaybackSnapshot>> {
        self.player_calls.fetch_add(1, Ordering::SeqCst);
        match self.next_player() {
            FakePlayer::Playing(uri) => Ok(Some(snapshot(uri, true))),
            FakePlayer::Paused(uri) => Ok(Some(snapshot(uri, false))),
            FakePlayer::Idle => Ok(None),
            FakePlayer::Fail(status) => Err(SpotifyError::Status { status }),
            FakePlayer::Unauthorized => Err(SpotifyError::Unauthorized),
            FakePlayer::RateLimited(retry_after_secs) => {
                Err(SpotifyError::RateLimited { retry_after_secs })
            }
        }
    }

    async fn search_tracks(
        &self,
        _access_token: &str,
        _query: &str,
        limit: u32,
    ) -> Result<Vec<TrackRef>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.search_fails.load(Ordering::SeqCst) {
            return Err(SpotifyError::Status { status: 502 });
        }
        let results = self.search_results.lock().unwrap();
        Ok(results
            .iter()
            .take(usize::try_from(limit).unwrap())
            .cloned()
            .collect())
    }
}

/// Credential store that can be told to fail.
#[derive(Default)]
pub struct MemoryCredentials {
    credential: Mutex<Option<Credential>>,
    failing_saves: AtomicUsize,
}

impl MemoryCredentials {
    pub fn with(credential: Credential) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
            failing_saves: AtomicUsize::new(0),
        }
    }

    pub fn saved(&self) -> Option<Credential> {
        self.credential.lock().unwrap().clone()
    }

    /// Overwrite the stored credential behind the manager's back.
    pub fn replace(&self, credential: Credential) {
        *self.credential.lock().unwrap() = Some(credential);
    }

    pub fn fail_next_saves(&self, count: usize) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentials {
    async fn load(&self) -> nowplaying_core::error::Result<Option<Credential>> {
        Ok(self.saved())
    }

    async fn save(&self, credential: &Credential) -> nowplaying_core::error::Result<()> {
        let remaining = self.failing_saves.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_saves.store(remaining - 1, Ordering::SeqCst);
            return Err(CoreError::IoError(std::io::Error::other("disk full")));
        }
        self.replace(credential.clone());
        Ok(())
    }
}

/// History log with duplicate suppression and a failure switch.
#[derive(Default)]
pub struct MemoryHistory {
    entries: Mutex<Vec<HistoryEntry>>,
    failing: AtomicBool,
}

impl MemoryHistory {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn uris(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.item.uri.clone())
            .collect()
    }
}

#[async_trait]
impl HistoryLog for MemoryHistory {
    async fn append(
        &self,
        item: &TrackRef,
        played_at: DateTime<Utc>,
    ) -> nowplaying_core::error::Result<Option<HistoryEntry>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::CorruptRecord {
                reason: "history unavailable".into(),
            });
        }
        let mut entries = self.entries.lock().unwrap();
        if entries.first().is_some_and(|latest| latest.item.uri == item.uri) {
            return Ok(None);
        }
        let entry = HistoryEntry {
            item: item.clone(),
            played_at,
        };
        entries.insert(0, entry.clone());
        Ok(Some(entry))
    }

    async fn recent(&self, limit: usize) -> nowplaying_core::error::Result<Vec<HistoryEntry>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }
}
