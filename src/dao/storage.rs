use std::error::Error;
use thiserror::Error;
use uuid::Uuid;

use crate::dao::changes::Table;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or answered with a server error.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// What was being attempted.
        message: String,
        /// Backend failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The store refused the write (constraint violation, malformed row, ...).
    #[error("{message}")]
    Rejected {
        /// The store's own explanation.
        message: String,
    },
    /// A version-guarded update lost the race against another writer.
    #[error("stale write on `{table}` row `{id}` (expected version {expected_version})")]
    Conflict {
        /// Table of the row.
        table: Table,
        /// Row id.
        id: Uuid,
        /// Version the writer read before updating.
        expected_version: u64,
    },
    /// The room already holds its maximum number of players.
    #[error("room `{room_id}` already has {capacity} players")]
    CapacityReached {
        /// Room that refused the player.
        room_id: Uuid,
        /// Players the room admits.
        capacity: usize,
    },
    /// The targeted row does not exist.
    #[error("no `{table}` row with id `{id}`")]
    NotFound {
        /// Table searched.
        table: Table,
        /// Missing row id.
        id: Uuid,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a rejection carrying the store's own message.
    pub fn rejected(message: impl Into<String>) -> Self {
        StorageError::Rejected {
            message: message.into(),
        }
    }
}
