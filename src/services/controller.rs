//! Per-device controller driving the screens from welcome to the memory box.
//!
//! Every handler either succeeds and feeds its result to the reconciler, or fails and leaves
//! the state untouched so the user can retry.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    config::ClientConfig,
    content::{self, Prompt, PromptBank, PromptSource},
    dao::{
        game_store::StoreHandle,
        models::{GameMode, GameSessionEntity, PlayerEntity, RoomEntity},
    },
    dto::profile::PlayerProfile,
    error::ServiceError,
    services::{
        room_service,
        session_service::{self, RoundOutcome},
        sync_service::{self, SyncHandle},
    },
    state::{ClientView, Signal, SyncSnapshot},
};

/// One device's client: owns the room synchronization and runs the screen handlers.
pub struct Controller {
    store: StoreHandle,
    config: ClientConfig,
    prompts: Arc<dyn PromptSource>,
    sync: Option<SyncHandle>,
}

impl Controller {
    /// Controller on the welcome screen with the built-in prompt bank.
    pub fn new(store: StoreHandle, config: ClientConfig) -> Self {
        Self {
            store,
            config,
            prompts: Arc::new(PromptBank),
            sync: None,
        }
    }

    /// Replace the built-in prompt bank.
    pub fn with_prompts(mut self, prompts: Arc<dyn PromptSource>) -> Self {
        self.prompts = prompts;
        self
    }

    /// Current reconciled state; the default (welcome) state outside a room.
    pub fn snapshot(&self) -> SyncSnapshot {
        self.sync
            .as_ref()
            .map(SyncHandle::snapshot)
            .unwrap_or_default()
    }

    /// Screen the device is on.
    pub fn view(&self) -> ClientView {
        self.snapshot().view
    }

    /// Wait until the room state satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SyncSnapshot) -> bool,
    ) -> Result<SyncSnapshot, ServiceError> {
        let sync = self.sync_handle()?;
        sync.wait_for(predicate).await
    }

    /// Create a room and start synchronizing it; moves to the profile screen.
    pub async fn create_room(&mut self) -> Result<RoomEntity, ServiceError> {
        self.ensure_outside_room()?;
        let room = room_service::create_room(&self.store).await?;
        self.enter(room.clone()).await;
        Ok(room)
    }

    /// Join a waiting room by code; moves to the profile screen.
    pub async fn join_room(&mut self, code: &str) -> Result<RoomEntity, ServiceError> {
        self.ensure_outside_room()?;
        let room = room_service::join_room(&self.store, code).await?;
        self.enter(room.clone()).await;
        Ok(room)
    }

    /// Add the local player to the room; moves to the lobby.
    pub async fn submit_profile(
        &mut self,
        nickname: &str,
        avatar: &str,
    ) -> Result<PlayerEntity, ServiceError> {
        let snapshot = self.snapshot();
        if snapshot.view != ClientView::Profile {
            return Err(ServiceError::InvalidState(format!(
                "profile cannot be submitted from {:?}",
                snapshot.view
            )));
        }
        let room_id = snapshot
            .room_id()
            .ok_or_else(|| ServiceError::InvalidState("no room".into()))?;

        let profile = PlayerProfile::new(nickname, avatar);
        let player = room_service::add_player(&self.store, room_id, &profile).await?;

        let sync = self.sync_handle()?;
        sync.submit(Signal::Joined(player.clone())).await;
        match room_service::get_players_in_room(&self.store, room_id).await {
            Ok(players) => sync.submit(Signal::Players(players)).await,
            Err(err) => warn!(room_id = %room_id, error = %err, "player list refresh failed"),
        }
        Ok(player)
    }

    /// Start the game. Only the creator may call this.
    pub async fn start_game(&mut self, mode: GameMode) -> Result<GameSessionEntity, ServiceError> {
        let snapshot = self.snapshot();
        let (room, me) = joined(&snapshot)?;
        if !me.is_creator {
            return Err(ServiceError::Unauthorized(
                "only the room creator can start the game".into(),
            ));
        }

        let start = session_service::start_game(&self.store, room, me, mode).await?;
        let sync = self.sync_handle()?;
        sync.submit(Signal::Room(start.room)).await;
        sync.submit(Signal::Session(Some(start.session.clone()))).await;
        Ok(start.session)
    }

    /// Spin for the local player's turn and draw the matching prompt.
    pub async fn spin(&self) -> Result<Prompt, ServiceError> {
        let session = self.my_turn_session().await?;
        Ok(content::draw(self.prompts.as_ref(), session.game_mode))
    }

    /// Finish the local player's turn with `prompt`, optionally answering a truth.
    pub async fn play_turn(
        &mut self,
        prompt: &Prompt,
        answer: Option<String>,
    ) -> Result<RoundOutcome, ServiceError> {
        let session = self.my_turn_session().await?;
        let snapshot = self.snapshot();
        let (_, me) = joined(&snapshot)?;

        let outcome =
            session_service::play_round(&self.store, &session, me.id, prompt, answer).await?;
        let sync = self.sync_handle()?;
        sync.submit(Signal::Session(Some(outcome.session.clone()))).await;
        if let Some(room) = outcome.room.clone() {
            sync.submit(Signal::Room(room)).await;
        }
        Ok(outcome)
    }

    /// Leave the room: release every subscription and return to the welcome screen.
    pub async fn leave(&mut self) {
        if let Some(mut sync) = self.sync.take() {
            let room_id = sync.snapshot().room_id();
            sync.shutdown().await;
            info!(room_id = ?room_id, "left room");
        }
    }

    /// Start over from the welcome screen once the memory box has been shown.
    pub async fn play_again(&mut self) -> Result<(), ServiceError> {
        if self.view() != ClientView::Memory {
            return Err(ServiceError::InvalidState(
                "the current game is not finished".into(),
            ));
        }
        self.leave().await;
        Ok(())
    }

    async fn enter(&mut self, room: RoomEntity) {
        let sync = sync_service::start(self.store.clone(), room, &self.config).await;
        self.sync = Some(sync);
    }

    fn ensure_outside_room(&self) -> Result<(), ServiceError> {
        if self.sync.is_some() {
            return Err(ServiceError::InvalidState(
                "already in a room; leave it first".into(),
            ));
        }
        Ok(())
    }

    fn sync_handle(&self) -> Result<&SyncHandle, ServiceError> {
        self.sync
            .as_ref()
            .ok_or_else(|| ServiceError::InvalidState("not in a room".into()))
    }

    /// Authoritative session, checked to be the local player's turn.
    async fn my_turn_session(&self) -> Result<GameSessionEntity, ServiceError> {
        let snapshot = self.snapshot();
        let (room, me) = joined(&snapshot)?;
        let session = session_service::get_game_session(&self.store, room.id)
            .await?
            .ok_or_else(|| ServiceError::InvalidState("the game has not started".into()))?;
        if session.is_completed() {
            return Err(ServiceError::InvalidState("the game is over".into()));
        }
        if session.current_player_id != Some(me.id) {
            return Err(ServiceError::InvalidState("not your turn".into()));
        }
        Ok(session)
    }
}

fn joined(snapshot: &SyncSnapshot) -> Result<(&RoomEntity, &PlayerEntity), ServiceError> {
    match (&snapshot.room, &snapshot.me) {
        (Some(room), Some(me)) => Ok((room, me)),
        (None, _) => Err(ServiceError::InvalidState("not in a room".into())),
        (Some(_), None) => Err(ServiceError::InvalidState("profile not submitted".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{game_store::memory::MemoryStore, models::RoundType};

    struct FixedPrompt;

    impl PromptSource for FixedPrompt {
        fn prompt(&self, _: GameMode, kind: RoundType) -> String {
            format!("{kind:?}")
        }
    }

    fn controller(store: &StoreHandle) -> Controller {
        Controller::new(store.clone(), ClientConfig::default()).with_prompts(Arc::new(FixedPrompt))
    }

    #[tokio::test(start_paused = true)]
    async fn handlers_refuse_out_of_order_calls() {
        let store: StoreHandle = Arc::new(MemoryStore::new());
        let mut alice = controller(&store);

        assert!(matches!(
            alice.submit_profile("Alice", "😊").await,
            Err(ServiceError::InvalidState(_))
        ));
        assert!(alice.play_again().await.is_err());

        alice.create_room().await.unwrap();
        assert_eq!(alice.view(), ClientView::Profile);
        assert!(matches!(
            alice.create_room().await,
            Err(ServiceError::InvalidState(_))
        ));
        assert!(matches!(
            alice.start_game(GameMode::Friendly).await,
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_join_keeps_welcome_view() {
        let store: StoreHandle = Arc::new(MemoryStore::new());
        let mut bob = controller(&store);
        let err = bob.join_room("ZZZZZZ").await.unwrap_err();
        assert!(matches!(err, ServiceError::Admission(_)));
        assert_eq!(bob.view(), ClientView::Welcome);
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_active_player_may_spin() {
        let store: StoreHandle = Arc::new(MemoryStore::new());
        let mut alice = controller(&store);
        let mut bob = controller(&store);

        let room = alice.create_room().await.unwrap();
        alice.submit_profile("Alice", "😊").await.unwrap();
        bob.join_room(&room.room_code).await.unwrap();
        bob.submit_profile("Bob", "😎").await.unwrap();

        assert!(matches!(
            bob.start_game(GameMode::Crush).await,
            Err(ServiceError::Unauthorized(_))
        ));
        alice.start_game(GameMode::Crush).await.unwrap();

        assert!(bob.spin().await.is_err());
        let prompt = alice.spin().await.unwrap();
        let outcome = alice.play_turn(&prompt, None).await.unwrap();
        assert_eq!(outcome.round.question, format!("{:?}", prompt.kind));
        assert!(alice.spin().await.is_err());
        assert!(bob.spin().await.is_ok());

        alice.leave().await;
        alice.leave().await;
        assert_eq!(alice.view(), ClientView::Welcome);
    }
}
