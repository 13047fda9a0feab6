use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::hub::ChangeHub;
use crate::dao::{
    changes::{ChangeEvent, ChangeFilter, ChangeKind, Subscription, Table},
    game_store::GameStore,
    models::{
        GameRoundEntity, GameSessionEntity, NewGameRound, NewGameSession, NewPlayer, NewRoom,
        PlayerEntity, RoomEntity, RoomStatus, SessionPatch,
    },
    storage::{StorageError, StorageResult},
};

const HUB_CAPACITY: usize = 64;

/// Failures specific to the in-process store.
#[derive(Debug, Error)]
pub enum MemoryStoreError {
    /// The store was switched offline with [`MemoryStore::set_offline`].
    #[error("memory store is offline")]
    Offline,
}

/// In-process store with the same semantics as the hosted backend.
///
/// Both devices of a test share one instance; every committed write is broadcast to the
/// open subscriptions unless notifications are muted.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    rooms: DashMap<Uuid, RoomEntity>,
    players: DashMap<Uuid, PlayerEntity>,
    sessions: DashMap<Uuid, GameSessionEntity>,
    rounds: DashMap<Uuid, GameRoundEntity>,
    /// Serializes conditional writes (creator claim, version checks, uniqueness).
    write_gate: Mutex<()>,
    hub: ChangeHub,
    offline: AtomicBool,
    muted: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store with notifications on.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                rooms: DashMap::new(),
                players: DashMap::new(),
                sessions: DashMap::new(),
                rounds: DashMap::new(),
                write_gate: Mutex::new(()),
                hub: ChangeHub::new(HUB_CAPACITY),
                offline: AtomicBool::new(false),
                muted: AtomicBool::new(false),
            }),
        }
    }

    /// Drop change notifications instead of delivering them (simulates lost pushes).
    pub fn mute_notifications(&self, muted: bool) {
        self.inner.muted.store(muted, Ordering::SeqCst);
    }

    /// Make every operation fail as if the backend were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of change feeds currently attached to the store.
    pub fn open_subscriptions(&self) -> usize {
        self.inner.hub.subscriber_count()
    }

    fn ensure_online(&self) -> StorageResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                "memory store offline".into(),
                MemoryStoreError::Offline,
            ));
        }
        Ok(())
    }

    fn publish(&self, table: Table, kind: ChangeKind, row: &impl Serialize) {
        if self.inner.muted.load(Ordering::SeqCst) {
            debug!(%table, "change notification muted");
            return;
        }
        self.inner.hub.publish(ChangeEvent {
            table,
            kind,
            record: serde_json::to_value(row).ok(),
        });
    }

    async fn insert_room_row(&self, room: NewRoom) -> StorageResult<RoomEntity> {
        self.ensure_online()?;
        let _gate = self.inner.write_gate.lock().await;

        let duplicate = self
            .inner
            .rooms
            .iter()
            .any(|entry| entry.room_code == room.room_code && entry.status == RoomStatus::Waiting);
        if duplicate {
            return Err(StorageError::rejected(format!(
                "duplicate key value violates unique constraint on room_code `{}`",
                room.room_code
            )));
        }

        let row = RoomEntity {
            id: Uuid::new_v4(),
            room_code: room.room_code,
            created_at: OffsetDateTime::now_utc(),
            expires_at: room.expires_at,
            status: RoomStatus::Waiting,
            version: 0,
        };
        self.inner.rooms.insert(row.id, row.clone());
        self.publish(Table::Rooms, ChangeKind::Insert, &row);
        Ok(row)
    }

    async fn update_room_row(&self, id: Uuid, status: RoomStatus) -> StorageResult<RoomEntity> {
        self.ensure_online()?;
        let _gate = self.inner.write_gate.lock().await;

        let row = {
            let mut entry = self.inner.rooms.get_mut(&id).ok_or(StorageError::NotFound {
                table: Table::Rooms,
                id,
            })?;
            entry.status = status;
            entry.version += 1;
            entry.clone()
        };
        self.publish(Table::Rooms, ChangeKind::Update, &row);
        Ok(row)
    }

    async fn insert_player_row(
        &self,
        player: NewPlayer,
        capacity: usize,
    ) -> StorageResult<PlayerEntity> {
        self.ensure_online()?;
        let _gate = self.inner.write_gate.lock().await;

        if !self.inner.rooms.contains_key(&player.room_id) {
            return Err(StorageError::NotFound {
                table: Table::Rooms,
                id: player.room_id,
            });
        }

        let existing: Vec<OffsetDateTime> = self
            .inner
            .players
            .iter()
            .filter(|entry| entry.room_id == player.room_id)
            .map(|entry| entry.joined_at)
            .collect();
        if existing.len() >= capacity {
            return Err(StorageError::CapacityReached {
                room_id: player.room_id,
                capacity,
            });
        }

        // Keep join order strict so both devices derive the same turn order.
        let now = OffsetDateTime::now_utc();
        let joined_at = match existing.iter().max() {
            Some(last) if *last >= now => *last + Duration::microseconds(1),
            _ => now,
        };

        let row = PlayerEntity {
            id: Uuid::new_v4(),
            room_id: player.room_id,
            nickname: player.nickname,
            avatar: player.avatar,
            is_creator: existing.is_empty(),
            joined_at,
        };
        self.inner.players.insert(row.id, row.clone());
        self.publish(Table::Players, ChangeKind::Insert, &row);
        Ok(row)
    }

    async fn insert_session_row(
        &self,
        session: NewGameSession,
    ) -> StorageResult<GameSessionEntity> {
        self.ensure_online()?;
        let _gate = self.inner.write_gate.lock().await;

        if self
            .inner
            .sessions
            .iter()
            .any(|entry| entry.room_id == session.room_id)
        {
            return Err(StorageError::rejected(format!(
                "duplicate key value violates unique constraint on game_sessions.room_id `{}`",
                session.room_id
            )));
        }

        let row = GameSessionEntity {
            id: Uuid::new_v4(),
            room_id: session.room_id,
            game_mode: session.game_mode,
            current_round: 0,
            heart_level: 0,
            current_player_id: None,
            started_at: OffsetDateTime::now_utc(),
            completed_at: None,
            version: 0,
        };
        self.inner.sessions.insert(row.id, row.clone());
        self.publish(Table::GameSessions, ChangeKind::Insert, &row);
        Ok(row)
    }

    async fn update_session_row(
        &self,
        id: Uuid,
        expected_version: u64,
        patch: SessionPatch,
    ) -> StorageResult<GameSessionEntity> {
        self.ensure_online()?;
        let _gate = self.inner.write_gate.lock().await;

        let row = {
            let mut entry = self
                .inner
                .sessions
                .get_mut(&id)
                .ok_or(StorageError::NotFound {
                    table: Table::GameSessions,
                    id,
                })?;
            if entry.version != expected_version {
                return Err(StorageError::Conflict {
                    table: Table::GameSessions,
                    id,
                    expected_version,
                });
            }
            patch.apply_to(&mut entry);
            entry.version += 1;
            entry.clone()
        };
        self.publish(Table::GameSessions, ChangeKind::Update, &row);
        Ok(row)
    }

    async fn insert_round_row(&self, round: NewGameRound) -> StorageResult<GameRoundEntity> {
        self.ensure_online()?;
        let _gate = self.inner.write_gate.lock().await;

        if !self.inner.sessions.contains_key(&round.session_id) {
            return Err(StorageError::NotFound {
                table: Table::GameSessions,
                id: round.session_id,
            });
        }
        if self.inner.rounds.iter().any(|entry| {
            entry.session_id == round.session_id && entry.round_number == round.round_number
        }) {
            return Err(StorageError::rejected(format!(
                "round {} already exists for session `{}`",
                round.round_number, round.session_id
            )));
        }

        let row = GameRoundEntity {
            id: Uuid::new_v4(),
            session_id: round.session_id,
            round_number: round.round_number,
            kind: round.kind,
            question: round.question,
            player_id: round.player_id,
            completed: false,
            answer: None,
            completed_at: None,
        };
        self.inner.rounds.insert(row.id, row.clone());
        self.publish(Table::GameRounds, ChangeKind::Insert, &row);
        Ok(row)
    }

    async fn complete_round_row(
        &self,
        id: Uuid,
        answer: Option<String>,
    ) -> StorageResult<GameRoundEntity> {
        self.ensure_online()?;
        let _gate = self.inner.write_gate.lock().await;

        let row = {
            let mut entry = self.inner.rounds.get_mut(&id).ok_or(StorageError::NotFound {
                table: Table::GameRounds,
                id,
            })?;
            entry.completed = true;
            entry.answer = answer;
            entry.completed_at = Some(OffsetDateTime::now_utc());
            entry.clone()
        };
        self.publish(Table::GameRounds, ChangeKind::Update, &row);
        Ok(row)
    }

    fn players_of(&self, room_id: Uuid) -> Vec<PlayerEntity> {
        let mut players: Vec<PlayerEntity> = self
            .inner
            .players
            .iter()
            .filter(|entry| entry.room_id == room_id)
            .map(|entry| entry.clone())
            .collect();
        crate::dao::models::sort_by_join_order(&mut players);
        players
    }

    fn latest_session_of(&self, room_id: Uuid) -> Option<GameSessionEntity> {
        self.inner
            .sessions
            .iter()
            .filter(|entry| entry.room_id == room_id)
            .map(|entry| entry.clone())
            .max_by_key(|session| session.started_at)
    }

    fn rounds_of(&self, session_id: Uuid) -> Vec<GameRoundEntity> {
        let mut rounds: Vec<GameRoundEntity> = self
            .inner
            .rounds
            .iter()
            .filter(|entry| entry.session_id == session_id)
            .map(|entry| entry.clone())
            .collect();
        rounds.sort_by_key(|round| round.round_number);
        rounds
    }

    fn waiting_room_with_code(&self, code: &str) -> Option<RoomEntity> {
        self.inner
            .rooms
            .iter()
            .filter(|entry| entry.room_code == code && entry.status == RoomStatus::Waiting)
            .map(|entry| entry.clone())
            .max_by_key(|room| room.created_at)
    }
}

impl GameStore for MemoryStore {
    fn insert_room(&self, room: NewRoom) -> BoxFuture<'static, StorageResult<RoomEntity>> {
        let store = self.clone();
        Box::pin(async move { store.insert_room_row(room).await })
    }

    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            Ok(store.inner.rooms.get(&id).map(|entry| entry.clone()))
        })
    }

    fn find_waiting_room(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            Ok(store.waiting_room_with_code(&code))
        })
    }

    fn update_room_status(
        &self,
        id: Uuid,
        status: RoomStatus,
    ) -> BoxFuture<'static, StorageResult<RoomEntity>> {
        let store = self.clone();
        Box::pin(async move { store.update_room_row(id, status).await })
    }

    fn insert_player(
        &self,
        player: NewPlayer,
        capacity: usize,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        let store = self.clone();
        Box::pin(async move { store.insert_player_row(player, capacity).await })
    }

    fn list_players(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            Ok(store.players_of(room_id))
        })
    }

    fn insert_session(
        &self,
        session: NewGameSession,
    ) -> BoxFuture<'static, StorageResult<GameSessionEntity>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session_row(session).await })
    }

    fn latest_session(
        &self,
        room_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<GameSessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            Ok(store.latest_session_of(room_id))
        })
    }

    fn update_session(
        &self,
        id: Uuid,
        expected_version: u64,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<GameSessionEntity>> {
        let store = self.clone();
        Box::pin(async move { store.update_session_row(id, expected_version, patch).await })
    }

    fn insert_round(
        &self,
        round: NewGameRound,
    ) -> BoxFuture<'static, StorageResult<GameRoundEntity>> {
        let store = self.clone();
        Box::pin(async move { store.insert_round_row(round).await })
    }

    fn complete_round(
        &self,
        id: Uuid,
        answer: Option<String>,
    ) -> BoxFuture<'static, StorageResult<GameRoundEntity>> {
        let store = self.clone();
        Box::pin(async move { store.complete_round_row(id, answer).await })
    }

    fn list_rounds(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameRoundEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            Ok(store.rounds_of(session_id))
        })
    }

    fn subscribe(&self, filter: ChangeFilter) -> BoxFuture<'static, StorageResult<Subscription>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            Ok(store.inner.hub.subscribe(filter))
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_online() })
    }
}
