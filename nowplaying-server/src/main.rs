mod error;
mod login;
mod routes;
mod ws;

#[cfg(test)]
mod testing;

use crate::error::ServerError;
use crate::routes::AppState;
use nowplaying_core::{
    BroadcastHub, CoreError, HistoryLog, PlaybackTracker, RelayConfig, SqliteStore,
};
use nowplaying_spotify::{
    PlaybackPoller, SpotifyApi, SpotifyClient, SpotifyProviderConfig, SpotifySearch, TokenManager,
    SPOTIFY_CONFIG_TEMPLATE,
};
use std::fs::File;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    // Logging comes up before the full config load so config errors are visible
    let file_logging_enabled = check_file_logging_enabled();
    init_tracing(file_logging_enabled);

    let provider_templates: &[&str] = &[SPOTIFY_CONFIG_TEMPLATE];
    let config = match RelayConfig::load_or_create(Some(provider_templates)) {
        Ok(config) => config,
        Err(CoreError::ConfigNotFound { path }) => {
            info!(
                "Created a configuration file at {}. Add your Spotify client_id and \
                client_secret from https://developer.spotify.com/dashboard, then restart.",
                path.display()
            );
            std::process::exit(0);
        }
        Err(e) => {
            error!("Failed to load {}: {e}", RelayConfig::config_path().display());
            std::process::exit(1);
        }
    };

    let spotify_config = match SpotifyProviderConfig::resolve(&config.providers) {
        Ok(spotify_config) => spotify_config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    // Create shared cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();
    let ctrlc_token = cancel_token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal, shutting down gracefully...");
        ctrlc_token.cancel();
    }) {
        error!("Failed to set Ctrl+C handler: {}", e);
    }

    if let Err(e) = runtime.block_on(run(config, spotify_config, cancel_token)) {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(
    config: RelayConfig,
    spotify_config: SpotifyProviderConfig,
    cancel_token: CancellationToken,
) -> Result<(), ServerError> {
    let store = Arc::new(SqliteStore::open(&config.storage.database_path()).await?);

    let client = SpotifyClient::new(
        &spotify_config,
        spotify_config.redirect_uri(&config.server.base_url()),
    )?;
    info!("OAuth redirect URI: {}", client.redirect_uri());
    let authorize = client.authorize_request();
    let api: Arc<dyn SpotifyApi> = Arc::new(client);

    let tokens = TokenManager::new(api.clone(), store.clone(), spotify_config.refresh_margin());
    let tracker = Arc::new(PlaybackTracker::new());
    let history: Arc<dyn HistoryLog> = store.clone();
    let hub = Arc::new(BroadcastHub::new(
        tracker.clone(),
        history.clone(),
        config.hub.settings(),
    ));

    match tokens.has_credential().await {
        Ok(true) => {}
        Ok(false) => info!(
            "Not authorized yet, visit {}/login to connect Spotify",
            config.server.base_url()
        ),
        Err(e) => warn!("{e}"),
    }

    let poller = Arc::new(PlaybackPoller::new(
        api.clone(),
        tokens.clone(),
        tracker,
        history,
        hub.clone(),
        config.poller.schedule(),
        cancel_token.clone(),
    ));
    let poller_handle = poller.start();
    let refresh_handle =
        tokens.start_refresh_task(spotify_config.refresh_check_interval(), cancel_token.clone());
    let heartbeat_handle = hub.clone().start_heartbeat(cancel_token.clone());

    let search = Arc::new(SpotifySearch::new(
        api,
        tokens.clone(),
        spotify_config.search_limit,
    ));
    let app = routes::router(AppState::new(tokens, hub.clone(), search, authorize));

    let listener = tokio::net::TcpListener::bind(config.server.bind_address()).await?;
    info!(
        "Listening on {} (open {} in a browser)",
        listener.local_addr()?,
        config.server.base_url()
    );

    let shutdown_token = cancel_token.clone();
    let shutdown_hub = hub.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
            // Open WebSocket sessions end once their queues close
            shutdown_hub.close_all().await;
        })
        .await?;

    // The server can also stop on its own; make sure background loops follow
    cancel_token.cancel();
    for (name, handle) in [
        ("poller", poller_handle),
        ("token refresh", refresh_handle),
        ("heartbeat", heartbeat_handle),
    ] {
        if let Err(e) = handle.await {
            warn!("{} task ended abnormally: {}", name, e);
        }
    }

    store.checkpoint().await?;
    info!("Shutdown complete");
    Ok(())
}

/// Read `[logging] file` without validating the rest of the config
fn check_file_logging_enabled() -> bool {
    #[derive(serde::Deserialize)]
    struct PartialConfig {
        #[serde(default)]
        logging: PartialLoggingConfig,
    }

    #[derive(serde::Deserialize, Default)]
    struct PartialLoggingConfig {
        #[serde(default)]
        file: bool,
    }

    let Ok(content) = std::fs::read_to_string(RelayConfig::config_path()) else {
        return false;
    };

    toml::from_str::<PartialConfig>(&content)
        .map(|c| c.logging.file)
        .unwrap_or(false)
}

/// Initialize tracing with console output and optional file logging
fn init_tracing(file_logging_enabled: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer();

    if file_logging_enabled {
        let log_path = nowplaying_core::log_file_path();

        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        match File::create(&log_path) {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer)
                    .with(file_layer)
                    .init();

                return;
            }
            Err(e) => {
                eprintln!("Failed to create log file at {}: {e}", log_path.display());
            }
        }
    }

    // Fallback: console only
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
