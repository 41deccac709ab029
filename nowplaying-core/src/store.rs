use crate::credential::Credential;
use crate::error::{CoreError, Result};
use crate::history::{HistoryEntry, HistoryLog};
use crate::playback::TrackRef;
use crate::time::utc_from_millis;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

const SCHEMA_SQL: &str = r"
-- Singleton bearer credential, keyed by a fixed name
CREATE TABLE IF NOT EXISTS credential (
    key TEXT PRIMARY KEY,
    access_token TEXT NOT NULL,
    refresh_token TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Append-only play history; item is the track as JSON
CREATE TABLE IF NOT EXISTS play_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uri TEXT NOT NULL,
    item TEXT NOT NULL,
    played_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_played_at ON play_history(played_at DESC, id DESC);
";

/// Key of the only credential row
const CREDENTIAL_KEY: &str = "spotify";

/// Durable home of the single bearer credential.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the stored credential, `None` if the relay was never authorized.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    async fn load(&self) -> Result<Option<Credential>>;

    /// Insert or replace the stored credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    async fn save(&self, credential: &Credential) -> Result<()>;
}

/// SQLite-backed credential store and history log
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a store at a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(path: &Path) -> Result<Self> {
        info!("Opening relay database at {:?}", path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).await?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            Ok(())
        })
        .await?;

        info!("Relay database initialized");
        Ok(Self { conn })
    }

    /// Open a throwaway in-memory store
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Number of history entries
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn history_len(&self) -> Result<u64> {
        self.conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM play_history", [], |row| row.get(0))?;
                Ok(u64::try_from(count).unwrap_or_default())
            })
            .await
            .map_err(Into::into)
    }

    /// Checkpoint WAL for clean shutdown
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL checkpoint fails.
    pub async fn checkpoint(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE)")?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn load(&self) -> Result<Option<Credential>> {
        let row = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT access_token, refresh_token, expires_at FROM credential WHERE key = ?1",
                )?;
                let row = stmt
                    .query_row([CREDENTIAL_KEY], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    })
                    .optional()?;
                Ok(row)
            })
            .await?;

        Ok(row.map(|(access_token, refresh_token, expires_at)| Credential {
            access_token,
            expires_at: utc_from_millis(expires_at),
            refresh_token,
        }))
    }

    async fn save(&self, credential: &Credential) -> Result<()> {
        let access_token = credential.access_token.clone();
        let refresh_token = credential.refresh_token.clone();
        let expires_at = credential.expires_at.timestamp_millis();
        let updated_at = Utc::now().timestamp_millis();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r"
                    INSERT INTO credential (key, access_token, refresh_token, expires_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(key) DO UPDATE SET
                        access_token = excluded.access_token,
                        refresh_token = excluded.refresh_token,
                        expires_at = excluded.expires_at,
                        updated_at = excluded.updated_at
                    ",
                    rusqlite::params![
                        CREDENTIAL_KEY,
                        access_token,
                        refresh_token,
                        expires_at,
                        updated_at
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!("Saved credential expiring at {}", credential.expires_at);
        Ok(())
    }
}

#[async_trait]
impl HistoryLog for SqliteStore {
    async fn append(
        &self,
        item: &TrackRef,
        played_at: DateTime<Utc>,
    ) -> Result<Option<HistoryEntry>> {
        let uri = item.uri.clone();
        let item_json = serde_json::to_string(item)?;
        let played_at_ms = played_at.timestamp_millis();

        let written = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let latest = tx
                    .query_row(
                        "SELECT uri, played_at FROM play_history ORDER BY played_at DESC, id DESC LIMIT 1",
                        [],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                    )
                    .optional()?;

                if latest.as_ref().is_some_and(|(latest_uri, _)| *latest_uri == uri) {
                    return Ok(None);
                }

                // Never write an entry that would sort below the current head
                let played_at_ms = latest.map_or(played_at_ms, |(_, ts)| ts.max(played_at_ms));
                tx.execute(
                    "INSERT INTO play_history (uri, item, played_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![uri, item_json, played_at_ms],
                )?;
                tx.commit()?;
                Ok(Some(played_at_ms))
            })
            .await?;

        Ok(written.map(|ts| HistoryEntry {
            item: item.clone(),
            played_at: utc_from_millis(ts),
        }))
    }

    async fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT item, played_at FROM play_history ORDER BY played_at DESC, id DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map([limit], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(item, played_at)| -> Result<HistoryEntry> {
                let item: TrackRef =
                    serde_json::from_str(&item).map_err(|e| CoreError::CorruptRecord {
                        reason: format!("history item: {e}"),
                    })?;
                Ok(HistoryEntry {
                    item,
                    played_at: utc_from_millis(played_at),
                })
            })
            .collect()
    }
}
