use nowplaying_core::CoreError;
use nowplaying_spotify::SpotifyError;
use thiserror::Error;

/// Startup and shutdown failures of the relay process.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Failed to create Spotify client: {0}")]
    Spotify(#[from] SpotifyError),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}
