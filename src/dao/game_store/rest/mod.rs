//! Hosted store: PostgREST over HTTP, Realtime over a websocket.

mod error;
mod models;
mod realtime;
/// HTTP store implementation.
pub mod store;

pub use error::RestDaoError;
pub use store::RestStore;

use crate::dao::storage::StorageError;

impl From<RestDaoError> for StorageError {
    fn from(err: RestDaoError) -> Self {
        if err.is_rejection() {
            let message = err.store_message().unwrap_or_default().to_string();
            return StorageError::Rejected { message };
        }
        StorageError::unavailable(err.to_string(), err)
    }
}
