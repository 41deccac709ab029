//! Subscriber wire protocol.
//!
//! Every frame is a JSON object `{ "type": ..., "data": ... }` with kebab-case
//! type names.

use crate::history::HistoryEntry;
use crate::playback::{PlaybackSnapshot, TrackRef};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Server to subscriber messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Current playback view; `null` when nothing has been observed yet
    CurrentlyPlaying(Option<PlaybackSnapshot>),
    /// Recent history, newest first. Sent once as backfill on connect.
    History(Vec<HistoryEntry>),
    /// A newly appended history entry
    HistoryUpdate(HistoryEntry),
    /// Results for a `search-track` request, sent only to the requester
    SearchTrackResponse(Vec<TrackRef>),
}

impl ServerMessage {
    /// Serialize to a text frame that can be shared across subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_frame(&self) -> serde_json::Result<Arc<str>> {
        serde_json::to_string(self).map(Arc::from)
    }

    /// Wire name of this message type
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CurrentlyPlaying(_) => "currently-playing",
            Self::History(_) => "history",
            Self::HistoryUpdate(_) => "history-update",
            Self::SearchTrackResponse(_) => "search-track-response",
        }
    }
}

/// Subscriber to server requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Free-text track search
    SearchTrack(String),
}

impl ClientMessage {
    /// Parse a text frame received from a subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON or unknown message types.
    pub fn parse(frame: &str) -> serde_json::Result<Self> {
        serde_json::from_str(frame)
    }
}
