//! Change-notification primitives shared by every store backend.

use std::fmt;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Named collections exposed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// `rooms`
    Rooms,
    /// `players`
    Players,
    /// `game_sessions`
    GameSessions,
    /// `game_rounds`
    GameRounds,
}

impl Table {
    /// Table name as the store knows it.
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Rooms => "rooms",
            Table::Players => "players",
            Table::GameSessions => "game_sessions",
            Table::GameRounds => "game_rounds",
        }
    }

    /// Inverse of [`Table::as_str`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rooms" => Some(Table::Rooms),
            "players" => Some(Table::Players),
            "game_sessions" => Some(Table::GameSessions),
            "game_rounds" => Some(Table::GameRounds),
            _ => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of row change carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Row inserted.
    Insert,
    /// Row updated.
    Update,
    /// Row deleted.
    Delete,
    /// The feed may have dropped notifications; consumers must re-fetch.
    Resync,
}

/// Notification delivered to subscribers. `record` is best effort and may be stale or absent.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Table the change happened in.
    pub table: Table,
    /// What happened to the row.
    pub kind: ChangeKind,
    /// New row contents, when the backend delivered them.
    pub record: Option<Value>,
}

impl ChangeEvent {
    /// Payload-less change telling consumers to re-fetch.
    pub fn resync(table: Table) -> Self {
        Self {
            table,
            kind: ChangeKind::Resync,
            record: None,
        }
    }
}

/// Equality filter on one column of one table, e.g. `players.room_id = <id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    /// Table to watch.
    pub table: Table,
    /// Column compared for equality.
    pub column: &'static str,
    /// Value the column must hold.
    pub value: Uuid,
}

impl ChangeFilter {
    /// Filter rows of `table` whose `column` equals `value`.
    pub fn new(table: Table, column: &'static str, value: Uuid) -> Self {
        Self {
            table,
            column,
            value,
        }
    }

    /// Whether a change to `table` carrying `record` falls under this filter.
    ///
    /// Changes without a payload are let through so the consumer re-fetches.
    pub fn matches(&self, table: Table, record: Option<&Value>) -> bool {
        if table != self.table {
            return false;
        }
        match record.and_then(|row| row.get(self.column)) {
            Some(Value::String(raw)) => Uuid::parse_str(raw).is_ok_and(|id| id == self.value),
            Some(_) => false,
            None => true,
        }
    }

    /// Filter expression in the `column=eq.value` syntax used on the wire.
    pub fn expression(&self) -> String {
        format!("{}=eq.{}", self.column, self.value)
    }
}

/// Releases the underlying subscription when cancelled or dropped.
#[derive(Debug)]
pub struct SubscriptionGuard {
    token: CancellationToken,
}

impl SubscriptionGuard {
    /// Guard that cancels `token` when released.
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Release the subscription. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        self.token.cancel();
    }

    /// Whether [`SubscriptionGuard::unsubscribe`] already ran.
    pub fn is_released(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Live change feed for one [`ChangeFilter`].
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::Receiver<ChangeEvent>,
    guard: SubscriptionGuard,
}

impl Subscription {
    /// Pair an event feed with the guard that closes it.
    pub fn new(events: mpsc::Receiver<ChangeEvent>, guard: SubscriptionGuard) -> Self {
        Self { events, guard }
    }

    /// Split into the event receiver and the guard that keeps the feed open.
    pub fn into_parts(self) -> (mpsc::Receiver<ChangeEvent>, SubscriptionGuard) {
        (self.events, self.guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_matches_foreign_key() {
        let room_id = Uuid::from_u128(7);
        let filter = ChangeFilter::new(Table::Players, "room_id", room_id);

        assert!(filter.matches(Table::Players, Some(&json!({ "room_id": room_id }))));
        assert!(!filter.matches(
            Table::Players,
            Some(&json!({ "room_id": Uuid::from_u128(8) }))
        ));
        assert!(!filter.matches(Table::Rooms, Some(&json!({ "room_id": room_id }))));
    }

    #[test]
    fn filter_lets_payloadless_changes_through() {
        let filter = ChangeFilter::new(Table::GameSessions, "room_id", Uuid::nil());
        assert!(filter.matches(Table::GameSessions, None));
        assert_eq!(
            filter.expression(),
            "room_id=eq.00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let guard = SubscriptionGuard::new(CancellationToken::new());
        guard.unsubscribe();
        guard.unsubscribe();
        assert!(guard.is_released());
    }
}
