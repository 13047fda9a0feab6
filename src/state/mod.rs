//! Device-local view of the shared game and the reconciliation feeding it.
//!
//! Every producer (push subscriptions, the poll timer, the device's own writes) turns what it
//! learned into a [`Signal`]; [`SyncSnapshot::apply`] folds signals in by entity id and version,
//! so duplicates and late arrivals are harmless.

pub mod store_client;
pub mod view;

use tracing::debug;
use uuid::Uuid;

use crate::dao::models::{
    GameRoundEntity, GameSessionEntity, PlayerEntity, RoomEntity, RoomStatus, sort_by_join_order,
};

pub use view::{ClientView, InvalidTransition};

/// Fresh data observed by one of the producers.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// Room row.
    Room(RoomEntity),
    /// Full member list.
    Players(Vec<PlayerEntity>),
    /// Latest session of the room, if any.
    Session(Option<GameSessionEntity>),
    /// Round history of the session.
    Rounds(Vec<GameRoundEntity>),
    /// This device's own player row.
    Joined(PlayerEntity),
}

/// What [`SyncSnapshot::apply`] did with a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Stale or duplicate data; nothing moved.
    Unchanged,
    /// State changed, the session excepted.
    Changed,
    /// The session snapshot moved; the round history should be re-fetched.
    SessionChanged,
}

impl Applied {
    /// Whether anything moved.
    pub fn is_change(self) -> bool {
        self != Applied::Unchanged
    }
}

/// Everything a device knows about its room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSnapshot {
    /// Current screen.
    pub view: ClientView,
    /// Room being synchronized.
    pub room: Option<RoomEntity>,
    /// Local player once the profile is submitted.
    pub me: Option<PlayerEntity>,
    /// Join order.
    pub players: Vec<PlayerEntity>,
    /// Latest known session.
    pub session: Option<GameSessionEntity>,
    /// Ordered by round number.
    pub rounds: Vec<GameRoundEntity>,
}

impl SyncSnapshot {
    /// State right after a room was created or found.
    pub fn entered(room: RoomEntity) -> Self {
        let mut snapshot = Self {
            room: Some(room),
            ..Self::default()
        };
        snapshot.settle_view();
        snapshot
    }

    /// Id of the synchronized room.
    pub fn room_id(&self) -> Option<Uuid> {
        self.room.as_ref().map(|room| room.id)
    }

    /// Waiting-room state in which the session is fetched by polling.
    pub fn awaiting_session(&self) -> bool {
        self.view == ClientView::Lobby && self.session.is_none()
    }

    /// The room moved past `waiting` but no session has been seen yet.
    pub fn session_missing(&self) -> bool {
        self.session.is_none()
            && self
                .room
                .as_ref()
                .is_some_and(|room| room.status != RoomStatus::Waiting)
    }

    /// Whether the active session waits on the local player.
    pub fn is_my_turn(&self) -> bool {
        match (&self.me, &self.session) {
            (Some(me), Some(session)) => {
                !session.is_completed() && session.current_player_id == Some(me.id)
            }
            _ => false,
        }
    }

    /// Fold `signal` into the snapshot. Re-applying data already seen is a no-op.
    pub fn apply(&mut self, signal: Signal) -> Applied {
        let Some(room_id) = self.room_id() else {
            return Applied::Unchanged;
        };

        let applied = match signal {
            Signal::Room(room) => self.apply_room(room_id, room),
            Signal::Players(players) => self.apply_players(room_id, players),
            Signal::Session(Some(session)) if session.room_id == room_id => {
                self.apply_session(session)
            }
            Signal::Session(_) => Applied::Unchanged,
            Signal::Rounds(rounds) => self.apply_rounds(rounds),
            Signal::Joined(player) if player.room_id == room_id => self.apply_joined(player),
            Signal::Joined(_) => Applied::Unchanged,
        };
        if applied.is_change() {
            self.settle_view();
        }
        applied
    }

    fn apply_room(&mut self, room_id: Uuid, room: RoomEntity) -> Applied {
        let Some(current) = self.room.as_ref() else {
            return Applied::Unchanged;
        };
        if room.id != room_id || room == *current {
            return Applied::Unchanged;
        }
        if room.version < current.version || room.status.rank() < current.status.rank() {
            debug!(room_id = %room.id, version = room.version, "out-of-order room snapshot ignored");
            return Applied::Unchanged;
        }
        self.room = Some(room);
        Applied::Changed
    }

    fn apply_players(&mut self, room_id: Uuid, mut players: Vec<PlayerEntity>) -> Applied {
        players.retain(|player| player.room_id == room_id);
        sort_by_join_order(&mut players);
        if players == self.players {
            return Applied::Unchanged;
        }
        if let Some(me) = self.me.as_mut()
            && let Some(fresh) = players.iter().find(|player| player.id == me.id)
        {
            *me = fresh.clone();
        }
        self.players = players;
        Applied::Changed
    }

    fn apply_session(&mut self, session: GameSessionEntity) -> Applied {
        if let Some(current) = self.session.as_ref() {
            let stale = if current.id == session.id {
                session.version <= current.version
            } else {
                session.started_at < current.started_at
            };
            if stale {
                return Applied::Unchanged;
            }
            if current.id != session.id {
                self.rounds.clear();
            }
        }
        self.session = Some(session);
        Applied::SessionChanged
    }

    fn apply_rounds(&mut self, mut rounds: Vec<GameRoundEntity>) -> Applied {
        let Some(session_id) = self.session.as_ref().map(|session| session.id) else {
            return Applied::Unchanged;
        };
        rounds.retain(|round| round.session_id == session_id);
        rounds.sort_by_key(|round| round.round_number);
        if rounds == self.rounds {
            return Applied::Unchanged;
        }
        self.rounds = rounds;
        Applied::Changed
    }

    fn apply_joined(&mut self, player: PlayerEntity) -> Applied {
        if self.me.as_ref() == Some(&player) {
            return Applied::Unchanged;
        }
        if !self.players.iter().any(|known| known.id == player.id) {
            self.players.push(player.clone());
            sort_by_join_order(&mut self.players);
        }
        self.me = Some(player);
        Applied::Changed
    }

    fn settle_view(&mut self) {
        let finished = self.session.as_ref().is_some_and(GameSessionEntity::is_completed)
            || self
                .room
                .as_ref()
                .is_some_and(|room| room.status == RoomStatus::Completed);
        let target = match (&self.room, &self.me, &self.session) {
            (None, _, _) => ClientView::Welcome,
            (Some(_), None, _) => ClientView::Profile,
            (Some(_), Some(_), _) if finished => ClientView::Memory,
            (Some(_), Some(_), Some(_)) => ClientView::Game,
            (Some(_), Some(_), None) => ClientView::Lobby,
        };
        if let Err(err) = self.view.advance(target) {
            debug!(error = %err, "view kept");
        }
    }
}
