/// In-process backend.
pub mod memory;
/// Hosted backend.
#[cfg(feature = "rest-store")]
pub mod rest;

use std::sync::Arc;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::changes::{ChangeFilter, Subscription};
use crate::dao::models::{
    GameRoundEntity, GameSessionEntity, NewGameRound, NewGameSession, NewPlayer, NewRoom,
    PlayerEntity, RoomEntity, RoomStatus, SessionPatch,
};
use crate::dao::storage::StorageResult;

/// Shared handle to whichever store backend is installed.
pub type StoreHandle = Arc<dyn GameStore>;

/// Abstraction over the persistence and notification gateway.
pub trait GameStore: Send + Sync {
    /// Insert a waiting room; the store fills id, timestamps and status.
    fn insert_room(&self, room: NewRoom) -> BoxFuture<'static, StorageResult<RoomEntity>>;
    /// Room by id, whatever its status.
    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;
    /// Room with exactly this code that is still in `waiting` status.
    fn find_waiting_room(&self, code: String)
    -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;
    /// Set the room status and bump its version.
    fn update_room_status(
        &self,
        id: Uuid,
        status: RoomStatus,
    ) -> BoxFuture<'static, StorageResult<RoomEntity>>;

    /// Insert a player, flagging it creator iff the room was empty, in one atomic step.
    ///
    /// Fails with `CapacityReached` once the room holds `capacity` players.
    fn insert_player(
        &self,
        player: NewPlayer,
        capacity: usize,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>>;
    /// Players of a room in join order.
    fn list_players(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>>;

    /// Insert a session at round 0 and heart 0.
    fn insert_session(
        &self,
        session: NewGameSession,
    ) -> BoxFuture<'static, StorageResult<GameSessionEntity>>;
    /// Most recently started session of a room.
    fn latest_session(
        &self,
        room_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<GameSessionEntity>>>;
    /// Compare-and-swap update: applies `patch` only if the row is still at `expected_version`.
    fn update_session(
        &self,
        id: Uuid,
        expected_version: u64,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<GameSessionEntity>>;

    /// Insert a pending round. Round numbers are unique per session.
    fn insert_round(&self, round: NewGameRound)
    -> BoxFuture<'static, StorageResult<GameRoundEntity>>;
    /// Mark a round completed, storing `answer`.
    fn complete_round(
        &self,
        id: Uuid,
        answer: Option<String>,
    ) -> BoxFuture<'static, StorageResult<GameRoundEntity>>;
    /// Rounds of a session ordered by round number.
    fn list_rounds(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameRoundEntity>>>;

    /// Open a change feed for rows matching `filter`.
    fn subscribe(&self, filter: ChangeFilter) -> BoxFuture<'static, StorageResult<Subscription>>;
    /// Cheap round trip proving the store answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
