//! Process-wide store handle, created once on first use.

use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

#[cfg(feature = "rest-store")]
use std::sync::Arc;

use crate::{config::ConfigError, dao::game_store::StoreHandle};
#[cfg(feature = "rest-store")]
use crate::{config::StoreConfig, dao::game_store::rest::RestStore};

static STORE: OnceCell<StoreHandle> = OnceCell::const_new();

/// Failure to bring up the shared store. Fatal at startup.
#[derive(Debug, Error)]
pub enum StoreInitError {
    /// Credentials could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The store did not answer.
    #[cfg(feature = "rest-store")]
    #[error("failed to connect to the store")]
    Connect(#[source] crate::dao::game_store::rest::RestDaoError),
    /// Built without a remote backend and no store was installed.
    #[error("no store installed and the `rest-store` feature is disabled")]
    NoBackend,
}

/// Shared store handle. Concurrent first callers wait on a single initialization; a failed
/// attempt is reported and retried by the next caller.
pub async fn shared_store() -> Result<StoreHandle, StoreInitError> {
    STORE.get_or_try_init(connect_configured).await.cloned()
}

/// Pin `store` as the process-wide store. Returns `false` if one was already set.
pub fn install_store(store: StoreHandle) -> bool {
    STORE.set(store).is_ok()
}

#[cfg(feature = "rest-store")]
async fn connect_configured() -> Result<StoreHandle, StoreInitError> {
    let (config, source) = StoreConfig::resolve().await?;
    let store = RestStore::connect(config)
        .await
        .map_err(StoreInitError::Connect)?;
    info!(%source, "store client initialized");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "rest-store"))]
async fn connect_configured() -> Result<StoreHandle, StoreInitError> {
    info!("no remote store backend compiled in");
    Err(StoreInitError::NoBackend)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dao::game_store::memory::MemoryStore;

    #[tokio::test]
    async fn installed_store_is_shared() {
        let store: StoreHandle = Arc::new(MemoryStore::new());
        assert!(install_store(store.clone()));
        assert!(!install_store(Arc::new(MemoryStore::new())));

        let (a, b) = tokio::join!(shared_store(), shared_store());
        assert!(Arc::ptr_eq(&a.unwrap(), &store));
        assert!(Arc::ptr_eq(&b.unwrap(), &store));
    }
}
