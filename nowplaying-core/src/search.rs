use crate::error::Result;
use crate::playback::TrackRef;
use crate::protocol::{ClientMessage, ServerMessage};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Collaborator answering `search-track` requests.
#[async_trait]
pub trait TrackSearch: Send + Sync {
    /// Search the catalogue for tracks matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SearchFailed`](crate::CoreError::SearchFailed) when
    /// the upstream search fails.
    async fn search_tracks(&self, query: &str) -> Result<Vec<TrackRef>>;
}

/// Route a subscriber request to its collaborator.
///
/// Returns the reply destined for the requesting subscriber only, or `None`
/// when there is nothing to send back.
pub async fn dispatch(message: ClientMessage, search: &dyn TrackSearch) -> Option<ServerMessage> {
    match message {
        ClientMessage::SearchTrack(query) => {
            let query = query.trim();
            if query.is_empty() {
                return Some(ServerMessage::SearchTrackResponse(Vec::new()));
            }

            debug!("Searching tracks for {:?}", query);
            match search.search_tracks(query).await {
                Ok(tracks) => Some(ServerMessage::SearchTrackResponse(tracks)),
                Err(e) => {
                    warn!("Track search for {:?} failed: {}", query, e);
                    None
                }
            }
        }
    }
}
