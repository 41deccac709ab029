//! Playback state as observed from the streaming service.
//!
//! Field names follow the Spotify Web API JSON shape so snapshots can be
//! deserialized straight from the player endpoint and re-served to browser
//! clients unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Link-out URLs attached to tracks, albums and artists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalUrls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spotify: Option<String>,
}

/// Album cover image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumImage {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub external_urls: ExternalUrls,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumRef {
    #[serde(default)]
    pub name: String,
    /// Cover images, largest first
    #[serde(default)]
    pub images: Vec<AlbumImage>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
}

/// A playable track. `uri` is the identity used for change detection and
/// history duplicate suppression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRef {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    #[serde(default)]
    pub album: AlbumRef,
    #[serde(default)]
    pub external_urls: ExternalUrls,
}

impl TrackRef {
    /// Artist names joined for display and logging
    #[must_use]
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// The most recently observed playback state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub is_playing: bool,
    pub item: Option<TrackRef>,
    #[serde(default)]
    pub progress_ms: u64,
    /// When the upstream service produced this state
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl PlaybackSnapshot {
    /// URI of the current item, if any
    #[must_use]
    pub fn track_uri(&self) -> Option<&str> {
        self.item.as_ref().map(|t| t.uri.as_str())
    }

    /// The same state with playback marked as stopped; progress stays frozen.
    #[must_use]
    pub fn paused(mut self) -> Self {
        self.is_playing = false;
        self
    }
}

/// Classified result of one poll of the player endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Something is actively playing
    Playing(PlaybackSnapshot),
    /// Nothing is playing; carries the paused state when the service still reports an item
    NotPlaying(Option<PlaybackSnapshot>),
    /// The upstream call failed; no new information about playback
    TransientError(String),
}

impl PollOutcome {
    /// Classify a raw player response.
    ///
    /// A response that claims to be playing but has no item (ads, unsupported
    /// media) counts as not playing.
    #[must_use]
    pub fn classify(snapshot: Option<PlaybackSnapshot>) -> Self {
        match snapshot {
            Some(s) if s.is_playing && s.item.is_some() => Self::Playing(s),
            Some(s) if s.item.is_some() => Self::NotPlaying(Some(s.paused())),
            _ => Self::NotPlaying(None),
        }
    }
}
