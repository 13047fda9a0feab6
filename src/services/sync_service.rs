//! Per-room synchronization loop.
//!
//! Three push subscriptions (membership, session, room row), a poll timer and the device's own
//! writes all feed one reconciler; the merged state is published through a `watch` channel.

use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::ClientConfig,
    dao::{game_store::StoreHandle, models::RoomEntity},
    error::ServiceError,
    services::{room_service, session_service, subscription::SubscriptionHandle},
    state::{Applied, Signal, SyncSnapshot},
};

/// Signal queued for the reconciler, with an optional acknowledgement once applied.
#[derive(Debug)]
struct Envelope {
    signal: Signal,
    applied: Option<oneshot::Sender<()>>,
}

impl Envelope {
    fn pushed(signal: Signal) -> Self {
        Self {
            signal,
            applied: None,
        }
    }
}

/// What woke the loop.
enum Wake {
    Signal(Envelope),
    Poll,
}

/// Owner's handle on a running synchronization loop.
///
/// Dropping it stops the loop; [`SyncHandle::shutdown`] also waits for the teardown.
#[derive(Debug)]
pub struct SyncHandle {
    snapshots: watch::Receiver<SyncSnapshot>,
    inbox: mpsc::UnboundedSender<Envelope>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    /// Latest reconciled state.
    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Feed a locally observed result into the reconciler and wait until it is applied.
    pub async fn submit(&self, signal: Signal) {
        let (applied, done) = oneshot::channel();
        let envelope = Envelope {
            signal,
            applied: Some(applied),
        };
        if self.inbox.send(envelope).is_err() || done.await.is_err() {
            debug!("synchronization stopped; local signal dropped");
        }
    }

    /// Wait until the reconciled state satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SyncSnapshot) -> bool,
    ) -> Result<SyncSnapshot, ServiceError> {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(predicate)
            .await
            .map_err(|_| ServiceError::InvalidState("synchronization stopped".into()))?
            .clone();
        Ok(snapshot)
    }

    /// Release every subscription, cancel the poll timer and wait for the loop to exit.
    /// Safe to call more than once.
    pub async fn shutdown(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            warn!(error = %err, "synchronization task ended abnormally");
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Start synchronizing `room`: initial fetch, push subscriptions, then the reconcile loop.
///
/// Subscription failures are logged and not retried; while in the lobby the poll timer
/// keeps looking for the session regardless.
pub async fn start(store: StoreHandle, room: RoomEntity, config: &ClientConfig) -> SyncHandle {
    let room_id = room.id;
    let mut state = SyncSnapshot::entered(room);

    match room_service::get_players_in_room(&store, room_id).await {
        Ok(players) => {
            state.apply(Signal::Players(players));
        }
        Err(err) => warn!(room_id = %room_id, error = %err, "initial player fetch failed"),
    }
    match session_service::get_game_session(&store, room_id).await {
        Ok(session) => reconcile(&store, &mut state, Signal::Session(session)).await,
        Err(err) => warn!(room_id = %room_id, error = %err, "initial session fetch failed"),
    }

    let (inbox, signals) = mpsc::unbounded_channel();
    let subscriptions = open_subscriptions(&store, room_id, &inbox).await;

    let (publisher, snapshots) = watch::channel(state.clone());
    let token = CancellationToken::new();
    let task = tokio::spawn(run(
        store,
        state,
        signals,
        publisher,
        subscriptions,
        config.poll_interval,
        token.clone(),
    ));
    info!(room_id = %room_id, "room synchronization started");

    SyncHandle {
        snapshots,
        inbox,
        token,
        task: Some(task),
    }
}

async fn open_subscriptions(
    store: &StoreHandle,
    room_id: Uuid,
    inbox: &mpsc::UnboundedSender<Envelope>,
) -> Vec<SubscriptionHandle> {
    let mut handles = Vec::with_capacity(3);

    let tx = inbox.clone();
    match room_service::subscribe_to_room(store, room_id, move |players| {
        let _ = tx.send(Envelope::pushed(Signal::Players(players)));
    })
    .await
    {
        Ok(handle) => handles.push(handle),
        Err(err) => warn!(room_id = %room_id, error = %err, "membership subscription failed"),
    }

    let tx = inbox.clone();
    match session_service::subscribe_to_game_session(store, room_id, move |session| {
        let _ = tx.send(Envelope::pushed(Signal::Session(session)));
    })
    .await
    {
        Ok(handle) => handles.push(handle),
        Err(err) => warn!(room_id = %room_id, error = %err, "session subscription failed"),
    }

    let tx = inbox.clone();
    match room_service::subscribe_to_room_status(store, room_id, move |room| {
        let _ = tx.send(Envelope::pushed(Signal::Room(room)));
    })
    .await
    {
        Ok(handle) => handles.push(handle),
        Err(err) => warn!(room_id = %room_id, error = %err, "room status subscription failed"),
    }

    handles
}

async fn run(
    store: StoreHandle,
    mut state: SyncSnapshot,
    mut signals: mpsc::UnboundedReceiver<Envelope>,
    publisher: watch::Sender<SyncSnapshot>,
    subscriptions: Vec<SubscriptionHandle>,
    poll_interval: std::time::Duration,
    token: CancellationToken,
) {
    let room_id = state.room_id();
    let mut poll = time::interval(poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    poll.tick().await;

    loop {
        let wake = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            envelope = signals.recv() => match envelope {
                Some(envelope) => Wake::Signal(envelope),
                None => break,
            },
            _ = poll.tick(), if state.awaiting_session() => Wake::Poll,
        };

        // Store calls race the token so teardown never waits on a stalled request.
        let (signal, applied) = match wake {
            Wake::Signal(envelope) => (Some(envelope.signal), envelope.applied),
            Wake::Poll => {
                let polled = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    polled = poll_session(&store, room_id) => polled,
                };
                (polled, None)
            }
        };

        if let Some(signal) = signal {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = reconcile(&store, &mut state, signal) => {}
            }
            publisher.send_if_modified(|published| {
                if *published == state {
                    return false;
                }
                *published = state.clone();
                true
            });
        }
        if let Some(applied) = applied {
            let _ = applied.send(());
        }
    }

    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    info!(room_id = ?room_id, "room synchronization stopped");
}

/// Session fetched by the lobby poll, if one exists by now.
async fn poll_session(store: &StoreHandle, room_id: Option<Uuid>) -> Option<Signal> {
    let room_id = room_id?;
    match session_service::get_game_session(store, room_id).await {
        Ok(Some(session)) => {
            info!(room_id = %room_id, session_id = %session.id, "session found by polling");
            Some(Signal::Session(Some(session)))
        }
        Ok(None) => None,
        Err(err) => {
            warn!(room_id = %room_id, error = %err, "session poll failed");
            None
        }
    }
}

/// Apply `signal`, then chase the data it implies: the round history when the session moved,
/// and the session itself when the room left `waiting` without one being known.
async fn reconcile(store: &StoreHandle, state: &mut SyncSnapshot, signal: Signal) {
    let mut next = Some(signal);
    while let Some(signal) = next.take() {
        let applied = state.apply(signal);
        next = match applied {
            Applied::SessionChanged => {
                let Some(session_id) = state.session.as_ref().map(|session| session.id) else {
                    continue;
                };
                match session_service::get_game_rounds(store, session_id).await {
                    Ok(rounds) => Some(Signal::Rounds(rounds)),
                    Err(err) => {
                        warn!(session_id = %session_id, error = %err, "round history fetch failed");
                        None
                    }
                }
            }
            Applied::Changed if state.session_missing() => {
                let Some(room_id) = state.room_id() else {
                    continue;
                };
                match session_service::get_game_session(store, room_id).await {
                    Ok(Some(session)) => Some(Signal::Session(Some(session))),
                    Ok(None) => None,
                    Err(err) => {
                        warn!(room_id = %room_id, error = %err, "session fetch failed");
                        None
                    }
                }
            }
            _ => None,
        };
    }
}
