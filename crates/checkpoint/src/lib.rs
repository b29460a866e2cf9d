//! Conversation persistence for Cerebro.
//!
//! [`CheckpointStore`](cerebro_core::CheckpointStore) implementations plus the
//! daily thread-id policy.

pub mod file_backend;
pub mod in_memory;
pub mod thread;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file_backend::FileCheckpointStore;
pub use in_memory::InMemoryCheckpointStore;
pub use thread::{ThreadIdentity, ThreadRecord};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCheckpointStore;

use cerebro_config::{AppConfig, CheckpointBackend};
use cerebro_core::checkpoint::CheckpointStore;
use cerebro_core::error::CheckpointError;
use std::sync::Arc;

/// Open the checkpoint store selected by the configuration.
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn CheckpointStore>, CheckpointError> {
    let data_dir = config.data_dir();
    match config.checkpoint.backend {
        #[cfg(feature = "sqlite")]
        CheckpointBackend::Sqlite => Ok(Arc::new(
            SqliteCheckpointStore::open(&data_dir.join("chat.db")).await?,
        )),
        #[cfg(not(feature = "sqlite"))]
        CheckpointBackend::Sqlite => Err(CheckpointError::Storage(
            "built without the `sqlite` feature; use the file backend".into(),
        )),
        CheckpointBackend::File => Ok(Arc::new(FileCheckpointStore::in_data_dir(&data_dir))),
        CheckpointBackend::Memory => Ok(Arc::new(InMemoryCheckpointStore::new())),
    }
}
