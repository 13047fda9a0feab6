use std::{sync::Arc, time::Duration};

use duo_dare::{
    config::ClientConfig,
    dao::{
        game_store::{GameStore, StoreHandle, memory::MemoryStore},
        models::{GameMode, RoomStatus},
    },
    error::ServiceError,
    services::{controller::Controller, room_service},
    state::ClientView,
};
use tokio::time::{Instant, sleep, timeout};

const PATIENCE: Duration = Duration::from_secs(10);

fn shared_store() -> (MemoryStore, StoreHandle) {
    let memory = MemoryStore::new();
    let store: StoreHandle = Arc::new(memory.clone());
    (memory, store)
}

fn device(store: &StoreHandle) -> Controller {
    Controller::new(store.clone(), ClientConfig::default())
}

#[tokio::test(start_paused = true)]
async fn two_players_fill_the_heart_in_ten_rounds() {
    let (memory, store) = shared_store();
    let room = room_service::create_room_with_code(&store, "AB23CD")
        .await
        .unwrap();

    let mut alice = device(&store);
    let mut bob = device(&store);

    alice.join_room("AB23CD").await.unwrap();
    let alice_player = alice.submit_profile("Alice", "😊").await.unwrap();
    assert!(alice_player.is_creator);
    assert_eq!(alice.view(), ClientView::Lobby);

    bob.join_room(" ab23cd").await.unwrap();
    let bob_player = bob.submit_profile("Bob", "😎").await.unwrap();
    assert!(!bob_player.is_creator);

    // Alice learns about Bob through the membership subscription.
    timeout(PATIENCE, alice.wait_for(|s| s.players.len() == 2))
        .await
        .unwrap()
        .unwrap();

    let session = alice.start_game(GameMode::Friendly).await.unwrap();
    assert_eq!(session.current_round, 0);
    assert_eq!(session.heart_level, 0);
    assert_eq!(session.current_player_id, Some(alice_player.id));
    assert_eq!(alice.view(), ClientView::Game);

    timeout(PATIENCE, bob.wait_for(|s| s.view == ClientView::Game))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        room_service::join_room(&store, "AB23CD").await,
        Err(ServiceError::Admission(_))
    ));

    let mut previous = None;
    for n in 1..=10u32 {
        let active = if n % 2 == 1 { &mut alice } else { &mut bob };
        let prompt = active.spin().await.unwrap();
        let outcome = active.play_turn(&prompt, Some("honest".into())).await.unwrap();

        assert_eq!(outcome.round.round_number, n);
        assert_eq!(outcome.session.current_round, n);
        assert_eq!(u32::from(outcome.session.heart_level), (10 * n).min(100));
        let next = outcome.session.current_player_id.unwrap();
        assert_ne!(Some(next), previous);
        previous = Some(next);
        if n == 1 {
            assert_eq!(outcome.session.heart_level, 10);
            assert_eq!(next, bob_player.id);
        }
        assert_eq!(outcome.session.is_completed(), n == 10);
    }

    for client in [&alice, &bob] {
        let snapshot = timeout(
            PATIENCE,
            client.wait_for(|s| s.view == ClientView::Memory && s.rounds.len() == 10),
        )
        .await
        .unwrap()
        .unwrap();
        let session = snapshot.session.unwrap();
        assert_eq!(session.heart_level, 100);
        assert!(session.completed_at.is_some());
        assert_eq!(snapshot.room.unwrap().status, RoomStatus::Completed);
    }

    let stored = store.find_room(room.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RoomStatus::Completed);

    alice.play_again().await.unwrap();
    bob.leave().await;
    assert_eq!(alice.view(), ClientView::Welcome);
    assert_eq!(bob.view(), ClientView::Welcome);

    sleep(Duration::from_millis(50)).await;
    assert_eq!(memory.open_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn lobby_poll_recovers_a_lost_session_push() {
    let (memory, store) = shared_store();
    let mut alice = device(&store);
    let mut bob = device(&store);

    let room = alice.create_room().await.unwrap();
    let alice_player = alice.submit_profile("Alice", "🔥").await.unwrap();
    bob.join_room(&room.room_code).await.unwrap();
    bob.submit_profile("Bob", "🌟").await.unwrap();
    assert_eq!(bob.view(), ClientView::Lobby);

    memory.mute_notifications(true);
    let started = Instant::now();
    alice.start_game(GameMode::Bold).await.unwrap();

    let snapshot = timeout(PATIENCE, bob.wait_for(|s| s.view == ClientView::Game))
        .await
        .unwrap()
        .unwrap();
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(
        snapshot.session.unwrap().current_player_id,
        Some(alice_player.id)
    );

    // Turns still work with pushes muted: each device reads the authoritative session.
    assert!(bob.spin().await.is_err());
    let prompt = alice.spin().await.unwrap();
    alice.play_turn(&prompt, None).await.unwrap();
    assert!(bob.spin().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn third_device_is_turned_away() {
    let (_, store) = shared_store();
    let mut alice = device(&store);
    let mut bob = device(&store);
    let mut carol = device(&store);

    let room = alice.create_room().await.unwrap();
    alice.submit_profile("Alice", "😇").await.unwrap();
    bob.join_room(&room.room_code).await.unwrap();
    bob.submit_profile("Bob", "🤗").await.unwrap();

    carol.join_room(&room.room_code).await.unwrap();
    let err = carol.submit_profile("Carol", "💫").await.unwrap_err();
    assert!(matches!(err, ServiceError::Admission(_)));
    assert_eq!(carol.view(), ClientView::Profile);
}
