//! Game session coordination: turns, rounds, heart level and completion.

use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    content::Prompt,
    dao::{
        changes::{ChangeFilter, Table},
        game_store::StoreHandle,
        models::{
            GameMode, GameRoundEntity, GameSessionEntity, NewGameRound, NewGameSession,
            PlayerEntity, ROOM_CAPACITY, RoomEntity, RoomStatus, RoundType, SessionPatch,
            sort_by_join_order,
        },
        storage::StorageError,
    },
    error::ServiceError,
    services::{
        room_service,
        subscription::{self, SubscriptionHandle},
    },
};

/// Heart points earned per completed round.
pub const HEART_STEP: u8 = 10;
/// Heart level at which the game is won.
pub const HEART_MAX: u8 = 100;

/// Result of [`start_game`].
#[derive(Debug, Clone)]
pub struct GameStart {
    /// Room after moving to `playing`.
    pub room: RoomEntity,
    /// Session with the first turn assigned.
    pub session: GameSessionEntity,
}

/// Result of [`play_round`]. `room` is set when the round finished the game.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    /// Completed round.
    pub round: GameRoundEntity,
    /// Session after the update.
    pub session: GameSessionEntity,
    /// Room after being marked completed.
    pub room: Option<RoomEntity>,
}

/// Heart level after one more completed round.
pub fn next_heart_level(previous: u8) -> u8 {
    previous.saturating_add(HEART_STEP).min(HEART_MAX)
}

/// Player after `current` in join order, wrapping around. Falls back to the first player.
pub fn next_player(players: &[PlayerEntity], current: Option<Uuid>) -> Option<Uuid> {
    let mut ordered = players.to_vec();
    sort_by_join_order(&mut ordered);
    let index = current.and_then(|id| ordered.iter().position(|player| player.id == id));
    match index {
        Some(index) => ordered.get((index + 1) % ordered.len()).map(|player| player.id),
        None => ordered.first().map(|player| player.id),
    }
}

/// Number of the round that follows the session's last completed one.
fn next_round_number(session: &GameSessionEntity) -> Result<u32, ServiceError> {
    session.current_round.checked_add(1).ok_or_else(|| {
        ServiceError::InvalidState(format!("session {} has no rounds left", session.id))
    })
}

fn ensure_active(session: &GameSessionEntity) -> Result<(), ServiceError> {
    if session.is_completed() {
        return Err(ServiceError::InvalidState(format!(
            "game session {} is already completed",
            session.id
        )));
    }
    Ok(())
}

async fn ensure_member(
    store: &StoreHandle,
    room_id: Uuid,
    player_id: Uuid,
) -> Result<(), ServiceError> {
    let players = store.list_players(room_id).await?;
    if players.iter().any(|player| player.id == player_id) {
        Ok(())
    } else {
        Err(ServiceError::InvalidInput(format!(
            "player {player_id} is not in room {room_id}"
        )))
    }
}

async fn patch_session(
    store: &StoreHandle,
    session: &GameSessionEntity,
    patch: SessionPatch,
) -> Result<GameSessionEntity, ServiceError> {
    ensure_active(session)?;
    match store.update_session(session.id, session.version, patch).await {
        Ok(updated) => Ok(updated),
        Err(err @ StorageError::Conflict { .. }) => {
            warn!(session_id = %session.id, version = session.version, "stale session write rejected");
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}

/// Insert the room's session with round 0, heart 0 and nobody's turn yet.
pub async fn create_game_session(
    store: &StoreHandle,
    room_id: Uuid,
    mode: GameMode,
) -> Result<GameSessionEntity, ServiceError> {
    let session = store
        .insert_session(NewGameSession {
            room_id,
            game_mode: mode,
        })
        .await?;
    info!(room_id = %room_id, session_id = %session.id, mode = mode.as_str(), "game session created");
    Ok(session)
}

/// Most recently started session of the room, if any.
pub async fn get_game_session(
    store: &StoreHandle,
    room_id: Uuid,
) -> Result<Option<GameSessionEntity>, ServiceError> {
    Ok(store.latest_session(room_id).await?)
}

/// Give the first turn to `player_id`. Fails if a turn was already assigned.
pub async fn initialize_first_player(
    store: &StoreHandle,
    session: &GameSessionEntity,
    player_id: Uuid,
) -> Result<GameSessionEntity, ServiceError> {
    if session.current_player_id.is_some() {
        return Err(ServiceError::InvalidState(
            "first player already initialized".into(),
        ));
    }
    set_current_player(store, session, player_id).await
}

/// Hand the turn to `player_id`, who must belong to the session's room.
pub async fn set_current_player(
    store: &StoreHandle,
    session: &GameSessionEntity,
    player_id: Uuid,
) -> Result<GameSessionEntity, ServiceError> {
    ensure_active(session)?;
    ensure_member(store, session.room_id, player_id).await?;
    patch_session(
        store,
        session,
        SessionPatch {
            current_player_id: Some(player_id),
            ..SessionPatch::default()
        },
    )
    .await
}

/// Append the next round of the session for `player_id`.
pub async fn create_game_round(
    store: &StoreHandle,
    session: &GameSessionEntity,
    prompt: &Prompt,
    player_id: Uuid,
) -> Result<GameRoundEntity, ServiceError> {
    ensure_active(session)?;
    let round_number = next_round_number(session)?;
    let round = store
        .insert_round(NewGameRound {
            session_id: session.id,
            round_number,
            kind: prompt.kind,
            question: prompt.question.clone(),
            player_id,
        })
        .await?;
    Ok(round)
}

/// Mark a round completed. The answer is kept for truths only, and blank answers are dropped.
pub async fn complete_round(
    store: &StoreHandle,
    round: &GameRoundEntity,
    answer: Option<String>,
) -> Result<GameRoundEntity, ServiceError> {
    if round.completed {
        return Err(ServiceError::InvalidState(format!(
            "round {} is already completed",
            round.round_number
        )));
    }
    let answer = match round.kind {
        RoundType::Truth => answer
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty()),
        RoundType::Dare => None,
    };
    Ok(store.complete_round(round.id, answer).await?)
}

/// Set the heart level. It never decreases and never exceeds [`HEART_MAX`].
pub async fn update_heart_level(
    store: &StoreHandle,
    session: &GameSessionEntity,
    level: u8,
) -> Result<GameSessionEntity, ServiceError> {
    if level > HEART_MAX {
        return Err(ServiceError::InvalidInput(format!(
            "heart level {level} exceeds {HEART_MAX}"
        )));
    }
    if level < session.heart_level {
        return Err(ServiceError::InvalidInput(format!(
            "heart level cannot drop from {} to {level}",
            session.heart_level
        )));
    }
    patch_session(
        store,
        session,
        SessionPatch {
            heart_level: Some(level),
            ..SessionPatch::default()
        },
    )
    .await
}

/// Advance the round counter.
pub async fn update_current_round(
    store: &StoreHandle,
    session: &GameSessionEntity,
    round_number: u32,
) -> Result<GameSessionEntity, ServiceError> {
    if round_number < session.current_round {
        return Err(ServiceError::InvalidInput(format!(
            "round counter cannot go back from {} to {round_number}",
            session.current_round
        )));
    }
    patch_session(
        store,
        session,
        SessionPatch {
            current_round: Some(round_number),
            ..SessionPatch::default()
        },
    )
    .await
}

/// Stamp the completion time. Terminal: later mutations fail with `InvalidState`.
pub async fn complete_game_session(
    store: &StoreHandle,
    session: &GameSessionEntity,
) -> Result<GameSessionEntity, ServiceError> {
    let completed = patch_session(
        store,
        session,
        SessionPatch {
            completed_at: Some(OffsetDateTime::now_utc()),
            ..SessionPatch::default()
        },
    )
    .await?;
    info!(session_id = %session.id, heart_level = completed.heart_level, "game session completed");
    Ok(completed)
}

/// Rounds of the session ordered by round number.
pub async fn get_game_rounds(
    store: &StoreHandle,
    session_id: Uuid,
) -> Result<Vec<GameRoundEntity>, ServiceError> {
    let mut rounds = store.list_rounds(session_id).await?;
    rounds.sort_by_key(|round| round.round_number);
    Ok(rounds)
}

/// Call `callback` with the re-fetched session whenever a session row of the room changes.
pub async fn subscribe_to_game_session<C>(
    store: &StoreHandle,
    room_id: Uuid,
    callback: C,
) -> Result<SubscriptionHandle, ServiceError>
where
    C: FnMut(Option<GameSessionEntity>) + Send + 'static,
{
    let fetch_store = store.clone();
    subscription::watch(
        store,
        ChangeFilter::new(Table::GameSessions, "room_id", room_id),
        move || {
            let store = fetch_store.clone();
            async move { get_game_session(&store, room_id).await }
        },
        callback,
    )
    .await
}

/// Start the game as the room creator: create the session, give the first turn to the
/// first player in join order and move the room to `playing`.
///
/// Retrying after a partial failure picks up the session created by the earlier attempt.
pub async fn start_game(
    store: &StoreHandle,
    room: &RoomEntity,
    creator: &PlayerEntity,
    mode: GameMode,
) -> Result<GameStart, ServiceError> {
    if !creator.is_creator || creator.room_id != room.id {
        return Err(ServiceError::Unauthorized(
            "only the room creator can start the game".into(),
        ));
    }

    let room = store
        .find_room(room.id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("room {}", room.id)))?;
    if room.status == RoomStatus::Completed {
        return Err(ServiceError::InvalidState("room already completed".into()));
    }

    let players = room_service::get_players_in_room(store, room.id).await?;
    if players.len() < ROOM_CAPACITY {
        return Err(ServiceError::InvalidState(
            "waiting for a second player".into(),
        ));
    }

    let mut session = match get_game_session(store, room.id).await? {
        Some(existing) => {
            ensure_active(&existing)?;
            existing
        }
        None => create_game_session(store, room.id, mode).await?,
    };
    if session.current_player_id.is_none() {
        let first = next_player(&players, None)
            .ok_or_else(|| ServiceError::InvalidState("room has no players".into()))?;
        session = initialize_first_player(store, &session, first).await?;
    }

    let room = if room.status == RoomStatus::Waiting {
        room_service::update_room_status(store, room.id, RoomStatus::Playing).await?
    } else {
        room
    };
    info!(room_id = %room.id, session_id = %session.id, mode = session.game_mode.as_str(), "game started");
    Ok(GameStart { room, session })
}

/// Complete the current player's turn: record the round, then advance round counter,
/// heart level and turn in one version-checked update. Finishes the game at [`HEART_MAX`].
pub async fn play_round(
    store: &StoreHandle,
    session: &GameSessionEntity,
    player_id: Uuid,
    prompt: &Prompt,
    answer: Option<String>,
) -> Result<RoundOutcome, ServiceError> {
    ensure_active(session)?;
    if session.current_player_id != Some(player_id) {
        return Err(ServiceError::InvalidState(format!(
            "it is not player {player_id}'s turn"
        )));
    }

    let players = room_service::get_players_in_room(store, session.room_id).await?;
    let next = next_player(&players, Some(player_id))
        .ok_or_else(|| ServiceError::InvalidState("room has no players".into()))?;
    let round_number = next_round_number(session)?;

    // A previous attempt may have stored this round before failing further on.
    let pending = get_game_rounds(store, session.id)
        .await?
        .into_iter()
        .find(|round| round.round_number == round_number);
    let round = match pending {
        Some(round) if round.player_id != player_id => {
            return Err(ServiceError::Conflict(format!(
                "round {round_number} already belongs to player {}",
                round.player_id
            )));
        }
        Some(round) if round.completed => round,
        Some(round) => complete_round(store, &round, answer).await?,
        None => {
            let round = create_game_round(store, session, prompt, player_id).await?;
            complete_round(store, &round, answer).await?
        }
    };

    let heart_level = next_heart_level(session.heart_level);
    let finished = heart_level >= HEART_MAX;
    let session = patch_session(
        store,
        session,
        SessionPatch {
            current_round: Some(round_number),
            heart_level: Some(heart_level),
            current_player_id: Some(next),
            completed_at: finished.then(OffsetDateTime::now_utc),
        },
    )
    .await?;
    info!(
        session_id = %session.id,
        round_number,
        heart_level,
        next_player = %next,
        "round completed"
    );

    let room = if finished {
        info!(session_id = %session.id, "game session completed");
        Some(room_service::update_room_status(store, session.room_id, RoomStatus::Completed).await?)
    } else {
        None
    };

    Ok(RoundOutcome {
        round,
        session,
        room,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        dao::game_store::memory::MemoryStore,
        dto::profile::PlayerProfile,
    };

    struct Fixture {
        store: StoreHandle,
        room: RoomEntity,
        alice: PlayerEntity,
        bob: PlayerEntity,
    }

    async fn two_player_room() -> Fixture {
        let store: StoreHandle = Arc::new(MemoryStore::new());
        let room = room_service::create_room(&store).await.unwrap();
        let alice = room_service::add_player(&store, room.id, &PlayerProfile::new("Alice", "😊"))
            .await
            .unwrap();
        let bob = room_service::add_player(&store, room.id, &PlayerProfile::new("Bob", "😎"))
            .await
            .unwrap();
        Fixture {
            store,
            room,
            alice,
            bob,
        }
    }

    fn dare() -> Prompt {
        Prompt {
            kind: RoundType::Dare,
            question: "Dance".into(),
        }
    }

    #[test]
    fn heart_level_is_capped() {
        assert_eq!(next_heart_level(0), 10);
        assert_eq!(next_heart_level(95), 100);
        assert_eq!(next_heart_level(100), 100);
    }

    #[tokio::test]
    async fn turn_cycle_alternates_and_game_ends_at_round_ten() {
        let t = two_player_room().await;
        let start = start_game(&t.store, &t.room, &t.alice, GameMode::Friendly)
            .await
            .unwrap();
        assert_eq!(start.room.status, RoomStatus::Playing);
        assert_eq!(start.session.current_round, 0);
        assert_eq!(start.session.heart_level, 0);
        assert_eq!(start.session.current_player_id, Some(t.alice.id));
        assert!(!start.session.is_completed());

        let mut session = start.session;
        let mut previous = t.alice.id;
        for n in 1..=10u32 {
            let outcome = play_round(&t.store, &session, previous, &dare(), None)
                .await
                .unwrap();
            session = outcome.session;
            assert_eq!(outcome.round.round_number, n);
            assert!(outcome.round.completed);
            assert_eq!(u32::from(session.heart_level), (10 * n).min(100));
            let current = session.current_player_id.unwrap();
            assert_ne!(current, previous);
            previous = current;
            assert_eq!(session.is_completed(), n == 10);
            assert_eq!(outcome.room.is_some(), n == 10);
        }
        assert!(session.completed_at.is_some());

        let room = t.store.find_room(t.room.id).await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Completed);
        let rounds = get_game_rounds(&t.store, session.id).await.unwrap();
        assert_eq!(rounds.len(), 10);
        assert_eq!(rounds[1].player_id, t.bob.id);

        let err = play_round(&t.store, &session, previous, &dare(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn only_the_creator_starts_once_both_joined() {
        let t = two_player_room().await;
        let err = start_game(&t.store, &t.room, &t.bob, GameMode::Bold)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let store: StoreHandle = Arc::new(MemoryStore::new());
        let room = room_service::create_room(&store).await.unwrap();
        let solo = room_service::add_player(&store, room.id, &PlayerProfile::new("Solo", "✨"))
            .await
            .unwrap();
        let err = start_game(&store, &room, &solo, GameMode::Crush)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn start_game_resumes_after_partial_failure() {
        let t = two_player_room().await;
        let session = create_game_session(&t.store, t.room.id, GameMode::Crush)
            .await
            .unwrap();
        let start = start_game(&t.store, &t.room, &t.alice, GameMode::Crush)
            .await
            .unwrap();
        assert_eq!(start.session.id, session.id);
        assert_eq!(start.session.current_player_id, Some(t.alice.id));
    }

    #[tokio::test]
    async fn stale_writer_loses() {
        let t = two_player_room().await;
        let session = start_game(&t.store, &t.room, &t.alice, GameMode::Friendly)
            .await
            .unwrap()
            .session;

        play_round(&t.store, &session, t.alice.id, &dare(), None)
            .await
            .unwrap();
        let err = update_heart_level(&t.store, &session, 50).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn out_of_turn_and_foreign_players_are_refused() {
        let t = two_player_room().await;
        let session = start_game(&t.store, &t.room, &t.alice, GameMode::Friendly)
            .await
            .unwrap()
            .session;

        let err = play_round(&t.store, &session, t.bob.id, &dare(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        let err = set_current_player(&t.store, &session, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let err = initialize_first_player(&t.store, &session, t.bob.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn heart_level_never_drops_or_overflows() {
        let t = two_player_room().await;
        let session = create_game_session(&t.store, t.room.id, GameMode::Friendly)
            .await
            .unwrap();
        let session = update_heart_level(&t.store, &session, 40).await.unwrap();
        assert!(matches!(
            update_heart_level(&t.store, &session, 30).await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            update_heart_level(&t.store, &session, 101).await,
            Err(ServiceError::InvalidInput(_))
        ));

        let session = update_current_round(&t.store, &session, 4).await.unwrap();
        assert_eq!(session.current_round, 4);
        let session = complete_game_session(&t.store, &session).await.unwrap();
        assert!(matches!(
            update_current_round(&t.store, &session, 5).await,
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn exhausted_round_counter_is_refused() {
        let t = two_player_room().await;
        let session = create_game_session(&t.store, t.room.id, GameMode::Friendly)
            .await
            .unwrap();
        let session = set_current_player(&t.store, &session, t.alice.id)
            .await
            .unwrap();
        let session = update_current_round(&t.store, &session, u32::MAX)
            .await
            .unwrap();

        assert!(matches!(
            create_game_round(&t.store, &session, &dare(), t.alice.id).await,
            Err(ServiceError::InvalidState(_))
        ));
        assert!(matches!(
            play_round(&t.store, &session, t.alice.id, &dare(), None).await,
            Err(ServiceError::InvalidState(_))
        ));
        assert!(get_game_rounds(&t.store, session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn truth_answers_are_kept_and_dare_answers_dropped() {
        let t = two_player_room().await;
        let session = create_game_session(&t.store, t.room.id, GameMode::Friendly)
            .await
            .unwrap();
        let truth = Prompt {
            kind: RoundType::Truth,
            question: "Why?".into(),
        };
        let round = create_game_round(&t.store, &session, &truth, t.alice.id)
            .await
            .unwrap();
        let round = complete_round(&t.store, &round, Some("  because  ".into()))
            .await
            .unwrap();
        assert_eq!(round.answer.as_deref(), Some("because"));
        assert!(complete_round(&t.store, &round, None).await.is_err());

        let session = update_current_round(&t.store, &session, 1).await.unwrap();
        let round = create_game_round(&t.store, &session, &dare(), t.bob.id)
            .await
            .unwrap();
        let round = complete_round(&t.store, &round, Some("done".into()))
            .await
            .unwrap();
        assert_eq!(round.answer, None);
    }

    #[test]
    fn next_player_wraps_in_join_order() {
        let now = OffsetDateTime::now_utc();
        let player = |id: u128, offset: i64| PlayerEntity {
            id: Uuid::from_u128(id),
            room_id: Uuid::nil(),
            nickname: format!("p{id}"),
            avatar: "✨".into(),
            is_creator: offset == 0,
            joined_at: now + time::Duration::seconds(offset),
        };
        // Listed out of join order on purpose.
        let players = vec![player(2, 5), player(1, 0)];
        let first = Uuid::from_u128(1);
        let second = Uuid::from_u128(2);
        assert_eq!(next_player(&players, None), Some(first));
        assert_eq!(next_player(&players, Some(first)), Some(second));
        assert_eq!(next_player(&players, Some(second)), Some(first));
        assert_eq!(next_player(&[], Some(first)), None);
    }
}
