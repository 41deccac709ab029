pub mod api;
pub mod config;
pub mod error;
pub mod poller;
pub mod search;
pub mod token;

#[cfg(test)]
mod testing;

pub use api::{AuthorizeRequest, SpotifyApi, SpotifyClient, TokenGrant};
pub use config::{
    SpotifyProviderConfig, CONFIG_TEMPLATE as SPOTIFY_CONFIG_TEMPLATE, PROVIDER_NAME, SCOPES,
};
pub use error::{SpotifyError, TokenError};
pub use poller::PlaybackPoller;
pub use search::SpotifySearch;
pub use token::TokenManager;
