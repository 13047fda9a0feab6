use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    error::{RestDaoError, RestResult},
    models::ChannelFrame,
};
use crate::dao::changes::{ChangeEvent, ChangeFilter, Subscription, SubscriptionGuard};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const CHANNEL_BUFFER: usize = 16;

/// Open one realtime channel for `filter` and forward its changes until the guard is released.
///
/// The channel is not re-established when the socket drops; the receiver simply closes.
pub(super) async fn open_channel(
    socket_url: &str,
    access_token: &str,
    filter: ChangeFilter,
) -> RestResult<Subscription> {
    let topic = format!("realtime:{}:{}", filter.table, filter.value);
    let (socket, _) = connect_async(socket_url)
        .await
        .map_err(|source| RestDaoError::RealtimeConnect {
            topic: topic.clone(),
            source,
        })?;
    let (mut write, mut read) = socket.split();

    let join = encode(&ChannelFrame::join(&topic, &filter, access_token, 1));
    write
        .send(Message::Text(join))
        .await
        .map_err(|source| RestDaoError::RealtimeSend {
            topic: topic.clone(),
            source,
        })?;
    info!(%topic, filter = %filter.expression(), "realtime channel joined");

    let (tx, rx) = mpsc::channel::<ChangeEvent>(CHANNEL_BUFFER);
    let token = CancellationToken::new();
    let cancelled = token.clone();

    tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut reference: u64 = 1;

        loop {
            tokio::select! {
                _ = cancelled.cancelled() => {
                    reference += 1;
                    let _ = write.send(Message::Text(encode(&ChannelFrame::leave(&topic, reference)))).await;
                    let _ = write.close().await;
                    break;
                }
                _ = tx.closed() => break,
                _ = heartbeat.tick() => {
                    reference += 1;
                    if let Err(err) = write.send(Message::Text(encode(&ChannelFrame::heartbeat(reference)))).await {
                        warn!(%topic, error = %err, "realtime heartbeat failed");
                        break;
                    }
                }
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            let frame = match serde_json::from_str::<ChannelFrame>(&text) {
                                Ok(frame) => frame,
                                Err(err) => {
                                    warn!(%topic, error = %err, "unreadable realtime frame");
                                    continue;
                                }
                            };
                            if let Some(reason) = frame.failure() {
                                warn!(%topic, %reason, "realtime channel failed");
                                break;
                            }
                            if let Some(change) = frame.into_change() {
                                if !filter.matches(change.table, change.record.as_ref()) {
                                    continue;
                                }
                                if tx.send(change).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            warn!(%topic, "realtime socket closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(%topic, error = %err, "realtime socket error");
                            break;
                        }
                    }
                }
            }
        }
        debug!(%topic, "realtime channel released");
    });

    Ok(Subscription::new(rx, SubscriptionGuard::new(token)))
}

fn encode(frame: &ChannelFrame) -> String {
    // Frames only hold strings and JSON values, which always serialize.
    serde_json::to_string(frame).unwrap_or_default()
}
