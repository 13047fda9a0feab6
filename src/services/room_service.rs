//! Room lifecycle: codes, admission, membership and room subscriptions.

use rand::seq::IndexedRandom;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::{
        changes::{ChangeFilter, Table},
        game_store::StoreHandle,
        models::{NewPlayer, NewRoom, PlayerEntity, ROOM_CAPACITY, RoomEntity, RoomStatus, sort_by_join_order},
        storage::StorageError,
    },
    dto::{
        profile::PlayerProfile,
        validation::{ROOM_CODE_ALPHABET, ROOM_CODE_LENGTH, normalize_room_code, validate_room_code},
    },
    error::{ROOM_NOT_JOINABLE, ServiceError},
    services::subscription::{self, SubscriptionHandle},
};

/// How long a room stays joinable after creation.
pub const ROOM_TTL: Duration = Duration::hours(24);
/// Fresh codes tried when the store reports a code already in use.
const CODE_ATTEMPTS: usize = 3;

/// Draw a six character code from the unambiguous alphabet.
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LENGTH)
        .filter_map(|_| ROOM_CODE_ALPHABET.choose(&mut rng).map(|b| char::from(*b)))
        .collect()
}

/// Create a waiting room under a freshly generated code.
pub async fn create_room(store: &StoreHandle) -> Result<RoomEntity, ServiceError> {
    let mut attempt = 1;
    loop {
        match create_room_with_code(store, &generate_room_code()).await {
            Err(ServiceError::Rejected(message)) if attempt < CODE_ATTEMPTS => {
                warn!(attempt, %message, "room insert rejected; retrying with a new code");
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Create a waiting room under `code`.
pub async fn create_room_with_code(
    store: &StoreHandle,
    code: &str,
) -> Result<RoomEntity, ServiceError> {
    let code = normalize_room_code(code);
    validate_room_code(&code).map_err(|err| ServiceError::InvalidInput(err.to_string()))?;

    let room = store
        .insert_room(NewRoom {
            room_code: code,
            expires_at: OffsetDateTime::now_utc() + ROOM_TTL,
        })
        .await?;
    info!(room_id = %room.id, room_code = %room.room_code, "room created");
    Ok(room)
}

/// Look up a joinable room by code.
///
/// Unknown, malformed, started and expired codes all fail with the same admission error.
pub async fn join_room(store: &StoreHandle, code: &str) -> Result<RoomEntity, ServiceError> {
    let code = normalize_room_code(code);
    if validate_room_code(&code).is_err() {
        return Err(ServiceError::Admission(ROOM_NOT_JOINABLE.into()));
    }

    let room = store
        .find_waiting_room(code)
        .await?
        .filter(|room| room.is_joinable(OffsetDateTime::now_utc()))
        .ok_or_else(|| ServiceError::Admission(ROOM_NOT_JOINABLE.into()))?;
    info!(room_id = %room.id, room_code = %room.room_code, "room found");
    Ok(room)
}

/// Add a player to a room. The store decides atomically whether it is the creator.
pub async fn add_player(
    store: &StoreHandle,
    room_id: Uuid,
    profile: &PlayerProfile,
) -> Result<PlayerEntity, ServiceError> {
    profile.validate()?;

    let player = store
        .insert_player(
            NewPlayer {
                room_id,
                nickname: profile.nickname.clone(),
                avatar: profile.avatar.clone(),
            },
            ROOM_CAPACITY,
        )
        .await?;
    info!(
        room_id = %room_id,
        player_id = %player.id,
        is_creator = player.is_creator,
        "player added"
    );
    Ok(player)
}

/// Players of a room in join order.
pub async fn get_players_in_room(
    store: &StoreHandle,
    room_id: Uuid,
) -> Result<Vec<PlayerEntity>, ServiceError> {
    let mut players = store.list_players(room_id).await?;
    sort_by_join_order(&mut players);
    Ok(players)
}

/// Set the room status. Transitions are not checked here.
pub async fn update_room_status(
    store: &StoreHandle,
    room_id: Uuid,
    status: RoomStatus,
) -> Result<RoomEntity, ServiceError> {
    let room = store.update_room_status(room_id, status).await?;
    info!(room_id = %room_id, status = status.as_str(), version = room.version, "room status updated");
    Ok(room)
}

/// Call `callback` with the full player list whenever membership of the room changes.
pub async fn subscribe_to_room<C>(
    store: &StoreHandle,
    room_id: Uuid,
    callback: C,
) -> Result<SubscriptionHandle, ServiceError>
where
    C: FnMut(Vec<PlayerEntity>) + Send + 'static,
{
    let fetch_store = store.clone();
    subscription::watch(
        store,
        ChangeFilter::new(Table::Players, "room_id", room_id),
        move || {
            let store = fetch_store.clone();
            async move { get_players_in_room(&store, room_id).await }
        },
        callback,
    )
    .await
}

/// Call `callback` with the re-fetched room whenever its row changes.
pub async fn subscribe_to_room_status<C>(
    store: &StoreHandle,
    room_id: Uuid,
    callback: C,
) -> Result<SubscriptionHandle, ServiceError>
where
    C: FnMut(RoomEntity) + Send + 'static,
{
    let fetch_store = store.clone();
    subscription::watch(
        store,
        ChangeFilter::new(Table::Rooms, "id", room_id),
        move || {
            let store = fetch_store.clone();
            async move {
                store
                    .find_room(room_id)
                    .await?
                    .ok_or(ServiceError::from(StorageError::NotFound {
                        table: Table::Rooms,
                        id: room_id,
                    }))
            }
        },
        callback,
    )
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dao::game_store::{GameStore, memory::MemoryStore};

    fn store() -> (MemoryStore, StoreHandle) {
        let memory = MemoryStore::new();
        let handle: StoreHandle = Arc::new(memory.clone());
        (memory, handle)
    }

    fn profile(nickname: &str) -> PlayerProfile {
        PlayerProfile::new(nickname, "✨")
    }

    #[test]
    fn generated_codes_use_the_alphabet() {
        for _ in 0..500 {
            let code = generate_room_code();
            assert_eq!(code.len(), ROOM_CODE_LENGTH);
            assert!(code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b)));
        }
    }

    #[tokio::test]
    async fn join_accepts_only_waiting_rooms() {
        let (_, store) = store();
        let room = create_room_with_code(&store, "AB23CD").await.unwrap();
        assert_eq!(room.status, RoomStatus::Waiting);

        let joined = join_room(&store, " ab23cd ").await.unwrap();
        assert_eq!(joined.id, room.id);

        update_room_status(&store, room.id, RoomStatus::Playing)
            .await
            .unwrap();
        let err = join_room(&store, "AB23CD").await.unwrap_err();
        assert!(matches!(err, ServiceError::Admission(ref m) if m == ROOM_NOT_JOINABLE));

        update_room_status(&store, room.id, RoomStatus::Completed)
            .await
            .unwrap();
        assert!(join_room(&store, "AB23CD").await.is_err());
    }

    #[tokio::test]
    async fn unknown_or_malformed_codes_are_not_joinable() {
        let (_, store) = store();
        for code in ["ZZZZZZ", "AB", "AB23C0"] {
            let err = join_room(&store, code).await.unwrap_err();
            assert!(matches!(err, ServiceError::Admission(_)), "{code}");
        }
    }

    #[tokio::test]
    async fn expired_room_is_not_joinable() {
        let (memory, store) = store();
        memory
            .insert_room(NewRoom {
                room_code: "EXP2RE".into(),
                expires_at: OffsetDateTime::now_utc() - Duration::minutes(1),
            })
            .await
            .unwrap();
        assert!(matches!(
            join_room(&store, "EXP2RE").await,
            Err(ServiceError::Admission(_))
        ));
    }

    #[tokio::test]
    async fn first_player_is_creator_and_third_is_refused() {
        let (_, store) = store();
        let room = create_room(&store).await.unwrap();

        let alice = add_player(&store, room.id, &profile("Alice")).await.unwrap();
        let bob = add_player(&store, room.id, &profile("Bob")).await.unwrap();
        assert!(alice.is_creator);
        assert!(!bob.is_creator);

        let err = add_player(&store, room.id, &profile("Carol")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Admission(_)));

        let players = get_players_in_room(&store, room.id).await.unwrap();
        let names: Vec<_> = players.iter().map(|p| p.nickname.as_str()).collect();
        assert_eq!(names, ["Alice", "Bob"]);
    }

    #[tokio::test]
    async fn invalid_profile_is_rejected_before_the_store() {
        let (_, store) = store();
        let room = create_room(&store).await.unwrap();
        let err = add_player(&store, room.id, &PlayerProfile::new("", "🦀"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        assert!(get_players_in_room(&store, room.id).await.unwrap().is_empty());
    }
}
