//! Thread identity: which conversation a new message belongs to.
//!
//! Threads are bucketed per UTC day. The last used id is kept in a small
//! text file so a restarted process resumes today's thread; on a new day a
//! fresh `chat-YYYY-MM-DD` id is used instead. An explicit "new thread"
//! action mints a unique id that still embeds the date, so it resumes for
//! the rest of that day.

use cerebro_core::error::CheckpointError;
use chrono::{DateTime, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const PREFIX: &str = "chat-";

/// A thread id together with the UTC day it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRecord {
    pub thread_id: String,
    pub date_bucket: NaiveDate,
}

impl ThreadRecord {
    /// Parse the date embedded in a thread id.
    ///
    /// Accepts `chat-YYYY-MM-DD...` and the compact `chat-YYYYMMDD...` form.
    pub fn parse(thread_id: &str) -> Option<Self> {
        let rest = thread_id.strip_prefix(PREFIX)?;
        let date = rest
            .get(..10)
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .or_else(|| {
                rest.get(..8)
                    .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
                    .and_then(|s| NaiveDate::parse_from_str(s, "%Y%m%d").ok())
            })?;
        Some(Self {
            thread_id: thread_id.to_string(),
            date_bucket: date,
        })
    }

    /// The daily thread for `now`'s UTC date.
    pub fn daily(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        Self {
            thread_id: format!("{PREFIX}{}", today.format("%Y-%m-%d")),
            date_bucket: today,
        }
    }
}

/// Resolves and persists the active thread id.
pub struct ThreadIdentity {
    path: PathBuf,
}

impl ThreadIdentity {
    /// Use `path` as the last-thread file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data_dir>/last_thread.txt`
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("last_thread.txt"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Today's thread: the remembered id if it belongs to `now`'s UTC day,
    /// otherwise `chat-YYYY-MM-DD`.
    pub async fn resolve_thread_id(&self, now: DateTime<Utc>) -> String {
        self.resolve(now).await.thread_id
    }

    /// Like [`resolve_thread_id`](Self::resolve_thread_id) but with the date bucket.
    pub async fn resolve(&self, now: DateTime<Utc>) -> ThreadRecord {
        let today = ThreadRecord::daily(now);
        match self.last_thread_id().await {
            Some(saved) => match ThreadRecord::parse(&saved) {
                Some(record) if record.date_bucket == today.date_bucket => {
                    debug!(thread_id = %record.thread_id, "Resuming today's thread");
                    record
                }
                _ => today,
            },
            None => today,
        }
    }

    /// Mint a fresh `chat-YYYY-MM-DD-HHMMSS-xxxxxx` id and remember it.
    pub async fn new_thread_id(&self, now: DateTime<Utc>) -> Result<String, CheckpointError> {
        let suffix = Uuid::new_v4().simple().to_string();
        let thread_id = format!("{PREFIX}{}-{}", now.format("%Y-%m-%d-%H%M%S"), &suffix[..6]);
        self.remember(&thread_id).await?;
        Ok(thread_id)
    }

    /// Persist `thread_id` as the last active thread.
    pub async fn remember(&self, thread_id: &str) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CheckpointError::Storage(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }
        tokio::fs::write(&self.path, thread_id).await.map_err(|e| {
            CheckpointError::Storage(format!("Failed to write {}: {e}", self.path.display()))
        })
    }

    /// The remembered id, if the file exists and is readable.
    pub async fn last_thread_id(&self) -> Option<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Some(content.trim().to_string()).filter(|s| !s.is_empty()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unreadable last-thread file");
                None
            }
        }
    }
}
