//! Fakes for exercising the HTTP surface without Spotify.

use crate::routes::AppState;
use async_trait::async_trait;
use nowplaying_core::error::Result as CoreResult;
use nowplaying_core::{
    AlbumRef, BroadcastHub, ExternalUrls, HubSettings, PlaybackSnapshot, PlaybackTracker,
    SqliteStore, TrackRef, TrackSearch,
};
use nowplaying_spotify::{AuthorizeRequest, SpotifyApi, SpotifyError, TokenGrant, TokenManager};
use std::sync::Arc;
use std::time::Duration;

pub fn track(uri: &str) -> TrackRef {
    TrackRef {
        uri: uri.to_string(),
        name: "Song".into(),
        duration_ms: 200_000,
        artists: Vec::new(),
        album: AlbumRef::default(),
        external_urls: ExternalUrls::default(),
    }
}

fn grant(access_token: &str) -> TokenGrant {
    TokenGrant {
        access_token: access_token.to_string(),
        expires_in: 3600,
        refresh_token: Some("refresh".into()),
        scope: None,
    }
}

/// Accounts service that accepts every code except `bad`.
#[derive(Default)]
pub struct FakeApi;

#[async_trait]
impl SpotifyApi for FakeApi {
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, SpotifyError> {
        if code == "bad" {
            return Err(SpotifyError::TokenRequest {
                status: 400,
                body: r#"{"error":"invalid_grant"}"#.into(),
            });
        }
        Ok(grant(&format!("access-{code}")))
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenGrant, SpotifyError> {
        Ok(grant("refreshed"))
    }

    async fn currently_playing(
        &self,
        _access_token: &str,
    ) -> Result<Option<PlaybackSnapshot>, SpotifyError> {
        Ok(None)
    }

    async fn search_tracks(
        &self,
        _access_token: &str,
        _query: &str,
        _limit: u32,
    ) -> Result<Vec<TrackRef>, SpotifyError> {
        Ok(Vec::new())
    }
}

/// Answers every query with a single track named after it.
struct EchoSearch;

#[async_trait]
impl TrackSearch for EchoSearch {
    async fn search_tracks(&self, query: &str) -> CoreResult<Vec<TrackRef>> {
        Ok(vec![track(&format!("spotify:track:{query}"))])
    }
}

/// Unauthorized relay state over an in-memory database.
pub async fn app_state(api: FakeApi) -> AppState {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let tokens = TokenManager::new(Arc::new(api), store.clone(), Duration::from_secs(300));
    let hub = Arc::new(BroadcastHub::new(
        Arc::new(PlaybackTracker::new()),
        store,
        HubSettings::default(),
    ));
    AppState::new(
        tokens,
        hub,
        Arc::new(EchoSearch),
        AuthorizeRequest::new("client".into(), "http://127.0.0.1:3000/callback".into()),
    )
}
