pub mod config;
pub mod credential;
pub mod error;
pub mod history;
pub mod hub;
pub mod paths;
pub mod playback;
pub mod protocol;
pub mod schedule;
pub mod search;
pub mod store;
pub mod time;
pub mod tracker;

pub use config::{
    build_config_template, HubConfig, LoggingConfig, PollerConfig, ProvidersConfig, RelayConfig,
    ServerConfig, StorageConfig,
};
pub use credential::Credential;
pub use error::CoreError;
pub use history::{HistoryEntry, HistoryLog};
pub use hub::{BroadcastHub, Delivery, HubSettings, Outbound, SubscriberId, Subscription};
pub use paths::{
    config_dir, database_path, log_file_path, CONFIG_DIR_NAME, CONFIG_FILE_NAME,
    CONFIG_PATH_ENV, DATABASE_FILE_NAME,
};
pub use playback::{
    AlbumImage, AlbumRef, ArtistRef, ExternalUrls, PlaybackSnapshot, PollOutcome, TrackRef,
};
pub use protocol::{ClientMessage, ServerMessage};
pub use schedule::{PollSchedule, PollScheduler, TickOutcome};
pub use search::{dispatch, TrackSearch};
pub use store::{CredentialStore, SqliteStore};
pub use time::DurationExt;
pub use tracker::{PlaybackTracker, Transition};
