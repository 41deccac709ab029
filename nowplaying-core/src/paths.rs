//! Path constants for configuration, database and log files.

use std::path::PathBuf;

/// The name of the configuration directory under ~/.config/
pub const CONFIG_DIR_NAME: &str = "nowplaying";

/// The name of the main configuration file
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// The name of the relay database file (credential + play history)
pub const DATABASE_FILE_NAME: &str = "nowplaying.db";

/// The name of the log file written when file logging is enabled
pub const LOG_FILE_NAME: &str = "nowplaying.log";

/// Environment variable that overrides the config file location
pub const CONFIG_PATH_ENV: &str = "NOWPLAYING_CONFIG";

/// Get the configuration directory path (~/.config/nowplaying/)
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(CONFIG_DIR_NAME)
}

/// Get the config file path, honouring `NOWPLAYING_CONFIG` when set.
#[must_use]
pub fn config_path() -> PathBuf {
    match std::env::var_os(CONFIG_PATH_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => config_dir().join(CONFIG_FILE_NAME),
    }
}

/// Get the default database path (`~/.config/nowplaying/nowplaying.db`)
#[must_use]
pub fn database_path() -> PathBuf {
    config_dir().join(DATABASE_FILE_NAME)
}

/// Get the log file path (`~/.config/nowplaying/nowplaying.log`)
#[must_use]
pub fn log_file_path() -> PathBuf {
    config_dir().join(LOG_FILE_NAME)
}
