use crate::error::Result;
use crate::playback::TrackRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One distinct playback event. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub item: TrackRef,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub played_at: DateTime<Utc>,
}

/// Append-only log of played tracks.
///
/// Implementations suppress duplicates against the most recent entry only:
/// appending an item whose `uri` equals the latest entry's `uri` is a no-op.
#[async_trait]
pub trait HistoryLog: Send + Sync {
    /// Append `item` unless it repeats the latest entry.
    ///
    /// Returns the entry that was written, or `None` when suppressed.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    async fn append(&self, item: &TrackRef, played_at: DateTime<Utc>)
        -> Result<Option<HistoryEntry>>;

    /// The `limit` most recent entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    async fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>>;
}
