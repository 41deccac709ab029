//! Track search backed by the Spotify catalogue.

use crate::api::SpotifyApi;
use crate::token::TokenManager;
use async_trait::async_trait;
use nowplaying_core::error::Result;
use nowplaying_core::{CoreError, TrackRef, TrackSearch};
use std::sync::Arc;

pub struct SpotifySearch {
    api: Arc<dyn SpotifyApi>,
    tokens: TokenManager,
    limit: u32,
}

impl SpotifySearch {
    #[must_use]
    pub fn new(api: Arc<dyn SpotifyApi>, tokens: TokenManager, limit: u32) -> Self {
        Self { api, tokens, limit }
    }
}

#[async_trait]
impl TrackSearch for SpotifySearch {
    async fn search_tracks(&self, query: &str) -> Result<Vec<TrackRef>> {
        let credential = self
            .tokens
            .ensure_valid()
            .await
            .map_err(|e| CoreError::SearchFailed {
                reason: e.to_string(),
            })?;
        self.api
            .search_tracks(&credential.access_token, query, self.limit)
            .await
            .map_err(|e| CoreError::SearchFailed {
                reason: e.to_string(),
            })
    }
}
