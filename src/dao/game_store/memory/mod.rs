//! In-process store used by tests and offline runs.

mod hub;
mod store;

pub use store::{MemoryStore, MemoryStoreError};
