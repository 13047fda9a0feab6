//! Persistence layer: row models, storage errors, change feeds and store backends.

/// Change-notification primitives (tables, filters, subscriptions).
pub mod changes;
/// Store backends behind the [`game_store::GameStore`] abstraction.
pub mod game_store;
/// Database model definitions.
pub mod models;
/// Storage error types shared by every backend.
pub mod storage;
