use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum number of players a room admits.
pub const ROOM_CAPACITY: usize = 2;

/// Lifecycle of a room. Only `Waiting` rooms are joinable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Joinable; players gather in the lobby.
    Waiting,
    /// Game started; no more joins.
    Playing,
    /// Heart level reached the maximum.
    Completed,
}

impl RoomStatus {
    /// Position in the forward-only lifecycle, used to discard out-of-order snapshots.
    pub fn rank(self) -> u8 {
        match self {
            RoomStatus::Waiting => 0,
            RoomStatus::Playing => 1,
            RoomStatus::Completed => 2,
        }
    }

    /// Value stored in the `status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Waiting => "waiting",
            RoomStatus::Playing => "playing",
            RoomStatus::Completed => "completed",
        }
    }
}

/// Prompt flavour chosen by the creator when starting a game.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Light prompts for friends.
    Friendly,
    /// Flirty prompts.
    Crush,
    /// Daring prompts.
    Bold,
}

impl GameMode {
    /// Value stored in the `game_mode` column.
    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::Friendly => "friendly",
            GameMode::Crush => "crush",
            GameMode::Bold => "bold",
        }
    }
}

impl std::str::FromStr for GameMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "friendly" => Ok(GameMode::Friendly),
            "crush" => Ok(GameMode::Crush),
            "bold" => Ok(GameMode::Bold),
            other => Err(format!("unknown game mode `{other}`")),
        }
    }
}

/// Outcome of a spin: answer a question or perform a dare.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RoundType {
    /// Answer a question.
    Truth,
    /// Perform a challenge.
    Dare,
}

/// Joinable lobby identified by a short code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEntity {
    /// Primary key of the room.
    pub id: Uuid,
    /// Six character code shared between the two players.
    pub room_code: String,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Past this instant the room is no longer joinable.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    /// Lifecycle position.
    pub status: RoomStatus,
    /// Bumped by the store on every update.
    #[serde(default)]
    pub version: u64,
}

impl RoomEntity {
    /// Whether a new player may still be admitted at `now`.
    pub fn is_joinable(&self, now: OffsetDateTime) -> bool {
        self.status == RoomStatus::Waiting && self.expires_at > now
    }
}

/// One device's participant row inside a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Primary key of the player.
    pub id: Uuid,
    /// Owning room; never reassigned.
    pub room_id: Uuid,
    /// Display name, 1 to 20 characters.
    pub nickname: String,
    /// Emoji picked from the fixed avatar set.
    pub avatar: String,
    /// Set for the first player admitted to the room.
    pub is_creator: bool,
    /// Admission time; defines turn order.
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
}

/// Sort players into join order, the ordering both devices agree on for turn cycling.
///
/// Ties on `joined_at` fall back to the id so the order stays total.
pub fn sort_by_join_order(players: &mut [PlayerEntity]) {
    players.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
}

/// Authoritative game state shared by both devices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameSessionEntity {
    /// Primary key of the session.
    pub id: Uuid,
    /// Room the session belongs to; one session per room.
    pub room_id: Uuid,
    /// Mode chosen by the creator.
    pub game_mode: GameMode,
    /// Number of completed rounds.
    pub current_round: u32,
    /// Cumulative connection score, 0..=100.
    pub heart_level: u8,
    /// Whose turn it is; unset until the first player is initialized.
    pub current_player_id: Option<Uuid>,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    /// Set once the heart level reaches the maximum.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// Bumped by the store on every update; writers must supply the value they read.
    #[serde(default)]
    pub version: u64,
}

impl GameSessionEntity {
    /// Whether the session reached its terminal state.
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// One truth-or-dare cycle inside a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameRoundEntity {
    /// Primary key of the round.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// 1-based, strictly increasing per session.
    pub round_number: u32,
    /// Outcome of the spin.
    #[serde(rename = "type")]
    pub kind: RoundType,
    /// Prompt drawn for the round.
    pub question: String,
    /// Player who answered the prompt.
    pub player_id: Uuid,
    /// Set when the player finished the round.
    pub completed: bool,
    /// Free-text answer, only kept for truths.
    #[serde(default)]
    pub answer: Option<String>,
    /// Completion time.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

/// Insert payload for a room; the store fills id, timestamps and status.
#[derive(Debug, Clone, Serialize)]
pub struct NewRoom {
    /// Normalized six character code.
    pub room_code: String,
    /// End of the joinable window.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Insert payload for a player; the store decides `is_creator` atomically.
#[derive(Debug, Clone, Serialize)]
pub struct NewPlayer {
    /// Room to join.
    pub room_id: Uuid,
    /// Validated nickname.
    pub nickname: String,
    /// Validated avatar.
    pub avatar: String,
}

/// Insert payload for a session.
#[derive(Debug, Clone, Serialize)]
pub struct NewGameSession {
    /// Room the session is for.
    pub room_id: Uuid,
    /// Mode chosen by the creator.
    pub game_mode: GameMode,
}

/// Insert payload for a round.
#[derive(Debug, Clone, Serialize)]
pub struct NewGameRound {
    /// Owning session.
    pub session_id: Uuid,
    /// `current_round + 1` of the session at insert time.
    pub round_number: u32,
    /// Outcome of the spin.
    #[serde(rename = "type")]
    pub kind: RoundType,
    /// Prompt drawn for the round.
    pub question: String,
    /// Player taking the turn.
    pub player_id: Uuid,
}

/// Partial update of a session row. Unset fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SessionPatch {
    /// New round counter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_round: Option<u32>,
    /// New heart level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_level: Option<u8>,
    /// Player whose turn comes next.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_player_id: Option<Uuid>,
    /// Completion stamp; terminal once set.
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub completed_at: Option<OffsetDateTime>,
}

impl SessionPatch {
    /// Write the set fields onto `session`, leaving the version untouched.
    pub fn apply_to(&self, session: &mut GameSessionEntity) {
        if let Some(round) = self.current_round {
            session.current_round = round;
        }
        if let Some(level) = self.heart_level {
            session.heart_level = level;
        }
        if let Some(player_id) = self.current_player_id {
            session.current_player_id = Some(player_id);
        }
        if let Some(completed_at) = self.completed_at {
            session.completed_at = Some(completed_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn player(joined_at: OffsetDateTime, id: u128) -> PlayerEntity {
        PlayerEntity {
            id: Uuid::from_u128(id),
            room_id: Uuid::nil(),
            nickname: format!("p{id}"),
            avatar: "✨".into(),
            is_creator: false,
            joined_at,
        }
    }

    #[test]
    fn join_order_sorts_by_timestamp_then_id() {
        let t0 = OffsetDateTime::UNIX_EPOCH;
        let mut players = vec![
            player(t0 + Duration::seconds(5), 1),
            player(t0, 9),
            player(t0, 3),
        ];
        sort_by_join_order(&mut players);
        let ids: Vec<u128> = players.iter().map(|p| p.id.as_u128()).collect();
        assert_eq!(ids, vec![3, 9, 1]);
    }

    #[test]
    fn session_row_uses_store_field_names() {
        let json = serde_json::json!({
            "id": Uuid::from_u128(1),
            "room_id": Uuid::from_u128(2),
            "game_mode": "crush",
            "current_round": 3,
            "heart_level": 30,
            "current_player_id": null,
            "started_at": "2025-02-14T20:00:00.123456+00:00",
            "completed_at": null
        });
        let session: GameSessionEntity = serde_json::from_value(json).unwrap();
        assert_eq!(session.game_mode, GameMode::Crush);
        assert_eq!(session.version, 0);
        assert!(!session.is_completed());
    }

    #[test]
    fn round_kind_serializes_as_type() {
        let round = NewGameRound {
            session_id: Uuid::nil(),
            round_number: 1,
            kind: RoundType::Dare,
            question: "dance".into(),
            player_id: Uuid::nil(),
        };
        let value = serde_json::to_value(&round).unwrap();
        assert_eq!(value["type"], "dare");
    }

    #[test]
    fn patch_skips_unset_fields() {
        let patch = SessionPatch {
            heart_level: Some(20),
            ..SessionPatch::default()
        };
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value, serde_json::json!({ "heart_level": 20 }));
        let empty = serde_json::to_value(SessionPatch::default()).unwrap();
        assert_eq!(empty, serde_json::json!({}));
    }

    #[test]
    fn expired_room_is_not_joinable() {
        let now = OffsetDateTime::UNIX_EPOCH + Duration::days(1);
        let room = RoomEntity {
            id: Uuid::nil(),
            room_code: "AB23CD".into(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            expires_at: now - Duration::seconds(1),
            status: RoomStatus::Waiting,
            version: 0,
        };
        assert!(!room.is_joinable(now));
    }
}
