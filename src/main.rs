//! duo-dare headless player: creates or joins a room and plays its turns automatically.

use std::env;

use anyhow::Context;
use duo_dare::{
    config::ClientConfig,
    dao::{
        game_store::GameStore,
        models::{GameMode, RoundType},
    },
    error::ServiceError,
    services::controller::Controller,
    state::{ClientView, SyncSnapshot, store_client},
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ROOM_CODE_VAR: &str = "DUO_DARE_ROOM_CODE";
const NICKNAME_VAR: &str = "DUO_DARE_NICKNAME";
const AVATAR_VAR: &str = "DUO_DARE_AVATAR";
const MODE_VAR: &str = "DUO_DARE_MODE";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let store = store_client::shared_store()
        .await
        .context("initializing store client")?;
    store
        .health_check()
        .await
        .context("store health check failed")?;
    let mut controller = Controller::new(store, ClientConfig::load());

    let room = match env::var(ROOM_CODE_VAR).ok().filter(|code| !code.trim().is_empty()) {
        Some(code) => controller.join_room(&code).await.context("joining room")?,
        None => controller.create_room().await.context("creating room")?,
    };
    info!(room_code = %room.room_code, "share this code with the other player");

    let nickname = env::var(NICKNAME_VAR).unwrap_or_else(|_| "Player".into());
    let avatar = env::var(AVATAR_VAR).unwrap_or_else(|_| "✨".into());
    let me = controller
        .submit_profile(&nickname, &avatar)
        .await
        .context("submitting profile")?;

    let mode = env::var(MODE_VAR)
        .ok()
        .map(|raw| raw.parse::<GameMode>())
        .transpose()
        .map_err(anyhow::Error::msg)?
        .unwrap_or(GameMode::Friendly);

    let outcome = tokio::select! {
        result = autoplay(&mut controller, me.is_creator, mode) => Some(result),
        _ = shutdown_signal() => None,
    };
    let result = match outcome {
        Some(result) => result,
        None => {
            info!("shutdown requested");
            Ok(())
        }
    };
    controller.leave().await;
    result
}

/// Start the game when creator, then take every turn until the session completes.
async fn autoplay(
    controller: &mut Controller,
    is_creator: bool,
    mode: GameMode,
) -> anyhow::Result<()> {
    if is_creator {
        controller
            .wait_for(|snapshot| snapshot.players.len() >= 2)
            .await
            .context("waiting for the second player")?;
        controller
            .start_game(mode)
            .await
            .context("starting game")?;
    }

    loop {
        let snapshot = controller
            .wait_for(|snapshot| snapshot.view == ClientView::Memory || snapshot.is_my_turn())
            .await
            .context("waiting for my turn")?;
        if snapshot.view == ClientView::Memory {
            print_memory_box(&snapshot);
            return Ok(());
        }

        let prompt = match controller.spin().await {
            Ok(prompt) => prompt,
            // The snapshot can run ahead of or behind the store; wait for the next change.
            Err(ServiceError::InvalidState(reason)) => {
                warn!(%reason, "turn not playable yet");
                controller
                    .wait_for(|next| next != &snapshot)
                    .await
                    .context("waiting for state change")?;
                continue;
            }
            Err(err) => return Err(err).context("spinning"),
        };
        let answer = (prompt.kind == RoundType::Truth).then(|| "Pass, but I'll tell you later".to_string());
        info!(kind = ?prompt.kind, question = %prompt.question, "playing turn");

        match controller.play_turn(&prompt, answer).await {
            Ok(outcome) => info!(
                round = outcome.round.round_number,
                heart_level = outcome.session.heart_level,
                "turn done"
            ),
            Err(ServiceError::Conflict(reason)) => warn!(%reason, "turn lost a race; re-reading"),
            Err(err) => return Err(err).context("playing turn"),
        }
    }
}

fn print_memory_box(snapshot: &SyncSnapshot) {
    let heart_level = snapshot.session.as_ref().map_or(0, |session| session.heart_level);
    info!(heart_level, rounds = snapshot.rounds.len(), "game completed");
    for round in &snapshot.rounds {
        let nickname = snapshot
            .players
            .iter()
            .find(|player| player.id == round.player_id)
            .map_or("?", |player| player.nickname.as_str());
        info!(
            round = round.round_number,
            player = nickname,
            kind = ?round.kind,
            question = %round.question,
            answer = round.answer.as_deref().unwrap_or("-"),
            "memory"
        );
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,duo_dare=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
