//! SQLite checkpoint store.
//!
//! A single `checkpoints` table keyed by thread id. The conversation state is
//! stored as a JSON document; `save` is an upsert, so each thread has exactly
//! one row holding its latest state.

use async_trait::async_trait;
use cerebro_core::checkpoint::{Checkpoint, CheckpointStore, validate_thread_id};
use cerebro_core::error::CheckpointError;
use cerebro_core::state::ConversationState;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self, CheckpointError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CheckpointError::Storage(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| CheckpointError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite checkpoint store initialized at {}", path.display());
        Ok(store)
    }

    /// An ephemeral database that lives as long as the store.
    pub async fn in_memory() -> Result<Self, CheckpointError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| CheckpointError::Storage(format!("Invalid SQLite URL: {e}")))?;

        // One long-lived connection: every in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| CheckpointError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), CheckpointError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id  TEXT PRIMARY KEY NOT NULL,
                state      TEXT NOT NULL,
                saved_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CheckpointError::MigrationFailed(format!("checkpoints table: {e}")))?;

        Ok(())
    }

    /// Close the pool, flushing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        validate_thread_id(thread_id)?;

        let row = sqlx::query("SELECT state, saved_at FROM checkpoints WHERE thread_id = ?1")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CheckpointError::Storage(format!("SELECT failed: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let state_json: String = row
            .try_get("state")
            .map_err(|e| CheckpointError::Storage(format!("state column: {e}")))?;
        let saved_at: String = row
            .try_get("saved_at")
            .map_err(|e| CheckpointError::Storage(format!("saved_at column: {e}")))?;

        let state: ConversationState = serde_json::from_str(&state_json)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let saved_at = DateTime::parse_from_rfc3339(&saved_at)
            .map_err(|e| CheckpointError::Serialization(format!("saved_at: {e}")))?
            .with_timezone(&Utc);

        Ok(Some(Checkpoint {
            thread_id: thread_id.to_string(),
            state,
            saved_at,
        }))
    }

    async fn save(
        &self,
        thread_id: &str,
        state: &ConversationState,
    ) -> Result<Checkpoint, CheckpointError> {
        validate_thread_id(thread_id)?;

        let checkpoint = Checkpoint::new(thread_id, state.clone());
        let state_json = serde_json::to_string(&checkpoint.state)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO checkpoints (thread_id, state, saved_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(thread_id) DO UPDATE SET
                state = excluded.state,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(thread_id)
        .bind(&state_json)
        .bind(checkpoint.saved_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| CheckpointError::Storage(format!("INSERT failed: {e}")))?;

        debug!(thread_id, messages = state.messages.len(), "Saved checkpoint");
        Ok(checkpoint)
    }
}
