//! Change-feed consumer shared by the room and session subscriptions.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    dao::{changes::ChangeFilter, game_store::StoreHandle},
    error::ServiceError,
};

/// Handle releasing a change subscription opened by [`watch`].
///
/// Dropping the handle releases the subscription as well.
#[derive(Debug)]
pub struct SubscriptionHandle {
    token: CancellationToken,
    live: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    /// Stop delivering callbacks and release the store subscription. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.token.cancel();
    }

    /// Whether callbacks are still delivered.
    pub fn is_active(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Subscribe to `filter` and, on every change, re-fetch through `fetch` and hand the fresh
/// value to `callback`.
///
/// Changes queued while a fetch is in flight collapse into the next fetch, so the callback
/// sees the latest snapshot at least once per burst. Fetch failures are logged and skipped.
pub async fn watch<T, F, Fut, C>(
    store: &StoreHandle,
    filter: ChangeFilter,
    fetch: F,
    mut callback: C,
) -> Result<SubscriptionHandle, ServiceError>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, ServiceError>> + Send,
    C: FnMut(T) + Send + 'static,
{
    let (mut events, guard) = store.subscribe(filter.clone()).await?.into_parts();
    info!(table = %filter.table, filter = %filter.expression(), "subscription opened");

    let token = CancellationToken::new();
    let live = Arc::new(AtomicBool::new(true));
    let handle = SubscriptionHandle {
        token: token.clone(),
        live: live.clone(),
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else {
                        warn!(table = %filter.table, "change feed closed; relying on re-fetches");
                        break;
                    };
                    let mut coalesced = 0usize;
                    while events.try_recv().is_ok() {
                        coalesced += 1;
                    }
                    debug!(table = %filter.table, kind = ?event.kind, coalesced, "change received");

                    let fetched = tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        fetched = fetch() => fetched,
                    };
                    match fetched {
                        Ok(value) => {
                            if live.load(Ordering::SeqCst) {
                                callback(value);
                            }
                        }
                        Err(err) => {
                            warn!(table = %filter.table, error = %err, "re-fetch after change failed");
                        }
                    }
                }
            }
        }
        live.store(false, Ordering::SeqCst);
        guard.unsubscribe();
        debug!(table = %filter.table, filter = %filter.expression(), "subscription closed");
    });

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use time::OffsetDateTime;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;
    use crate::dao::{
        changes::Table,
        game_store::{GameStore, memory::MemoryStore},
        models::{NewPlayer, NewRoom},
    };

    async fn room(store: &MemoryStore) -> Uuid {
        store
            .insert_room(NewRoom {
                room_code: "AB23CD".into(),
                expires_at: OffsetDateTime::now_utc() + time::Duration::hours(1),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn delivers_fresh_snapshot_and_stops_after_unsubscribe() {
        let memory = MemoryStore::new();
        let store: StoreHandle = Arc::new(memory.clone());
        let room_id = room(&memory).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let fetch_store = store.clone();
        let handle = watch(
            &store,
            ChangeFilter::new(Table::Players, "room_id", room_id),
            move || {
                let store = fetch_store.clone();
                async move { Ok::<_, ServiceError>(store.list_players(room_id).await?.len()) }
            },
            move |count| {
                let _ = tx.send(count);
            },
        )
        .await
        .unwrap();

        let player = NewPlayer {
            room_id,
            nickname: "Alice".into(),
            avatar: "😊".into(),
        };
        memory.insert_player(player.clone(), 2).await.unwrap();
        let count = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count, 1);

        handle.unsubscribe();
        handle.unsubscribe();
        assert!(!handle.is_active());

        memory.insert_player(player, 2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_interrupts_a_stalled_refetch() {
        let memory = MemoryStore::new();
        let store: StoreHandle = Arc::new(memory.clone());
        let room_id = room(&memory).await;

        let handle = watch(
            &store,
            ChangeFilter::new(Table::Players, "room_id", room_id),
            || std::future::pending::<Result<(), ServiceError>>(),
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(memory.open_subscriptions(), 1);

        let player = NewPlayer {
            room_id,
            nickname: "Alice".into(),
            avatar: "😊".into(),
        };
        memory.insert_player(player, 2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        handle.unsubscribe();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(memory.open_subscriptions(), 0);
    }
}
