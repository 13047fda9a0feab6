//! Error taxonomy of the core operations.

use thiserror::Error;
use validator::ValidationErrors;

use crate::dao::storage::StorageError;

/// Message surfaced when a room code cannot be joined.
pub const ROOM_NOT_JOINABLE: &str = "room not found or already started";

/// Errors that can occur in service layer operations.
///
/// None of them are fatal: callers keep their previous state and the user may retry.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// The store rejected an insert or update.
    #[error("rejected by store: {0}")]
    Rejected(String),
    /// Joining the room is not possible (unknown code, already started, full).
    #[error("{0}")]
    Admission(String),
    /// Caller lacks the authority for this operation (e.g. not the creator).
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Another device changed the row first; re-read and retry.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Rejected { message } => ServiceError::Rejected(message),
            conflict @ StorageError::Conflict { .. } => ServiceError::Conflict(conflict.to_string()),
            StorageError::CapacityReached { .. } => ServiceError::Admission("room is full".into()),
            missing @ StorageError::NotFound { .. } => ServiceError::NotFound(missing.to_string()),
            unavailable @ StorageError::Unavailable { .. } => ServiceError::Unavailable(unavailable),
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::changes::Table;
    use uuid::Uuid;

    #[test]
    fn store_errors_map_to_service_taxonomy() {
        let rejected: ServiceError = StorageError::rejected("duplicate key").into();
        assert!(matches!(rejected, ServiceError::Rejected(ref m) if m == "duplicate key"));

        let full: ServiceError = StorageError::CapacityReached {
            room_id: Uuid::nil(),
            capacity: 2,
        }
        .into();
        assert!(matches!(full, ServiceError::Admission(_)));

        let stale: ServiceError = StorageError::Conflict {
            table: Table::GameSessions,
            id: Uuid::nil(),
            expected_version: 3,
        }
        .into();
        assert!(matches!(stale, ServiceError::Conflict(_)));
    }
}
