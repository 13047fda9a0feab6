use tokio::sync::{broadcast, broadcast::error::RecvError, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dao::changes::{ChangeEvent, ChangeFilter, Subscription, SubscriptionGuard};

/// Buffered events per subscription before the forwarder applies back-pressure.
const SUBSCRIPTION_BUFFER: usize = 16;

/// Broadcast hub fanning every committed change out to the open subscriptions.
pub struct ChangeHub {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Number of open subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.sender.send(event);
    }

    /// Open a filtered feed. A forwarder task copies matching events until the guard is released.
    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        let mut receiver = self.sender.subscribe();
        let (tx, rx) = mpsc::channel::<ChangeEvent>(SUBSCRIPTION_BUFFER);
        let token = CancellationToken::new();
        let cancelled = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = tx.closed() => break,
                    recv_result = receiver.recv() => {
                        let event = match recv_result {
                            Ok(event) if filter.matches(event.table, event.record.as_ref()) => event,
                            Ok(_) => continue,
                            // Dropped events may have touched our rows; ask for a re-fetch.
                            Err(RecvError::Lagged(_)) => ChangeEvent::resync(filter.table),
                            Err(RecvError::Closed) => break,
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(table = %filter.table, filter = %filter.expression(), "memory subscription released");
        });

        Subscription::new(rx, SubscriptionGuard::new(token))
    }
}
