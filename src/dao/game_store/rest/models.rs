use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::dao::{
    changes::{ChangeEvent, ChangeFilter, ChangeKind, Table},
    models::RoomStatus,
};

/// Message the `claim_player_slot` function raises once a room is full.
pub const ROOM_FULL_MESSAGE: &str = "room_full";

/// Arguments of the `claim_player_slot` RPC.
#[derive(Debug, Serialize)]
pub struct ClaimPlayerSlotArgs<'a> {
    pub p_room_id: Uuid,
    pub p_nickname: &'a str,
    pub p_avatar: &'a str,
    pub p_capacity: usize,
}

#[derive(Debug, Serialize)]
pub struct RoomStatusPatch {
    pub status: RoomStatus,
}

#[derive(Debug, Serialize)]
pub struct RoundCompletionPatch {
    pub completed: bool,
    pub answer: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

/// Error body returned by PostgREST.
#[derive(Debug, Deserialize)]
pub struct StoreErrorBody {
    pub message: Option<String>,
}

/// Frame exchanged on the realtime websocket (Phoenix channel protocol).
#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl ChannelFrame {
    pub fn join(topic: &str, filter: &ChangeFilter, access_token: &str, reference: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: "phx_join".into(),
            payload: json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "*",
                        "schema": "public",
                        "table": filter.table.as_str(),
                        "filter": filter.expression(),
                    }],
                },
                "access_token": access_token,
            }),
            reference: Some(reference.to_string()),
        }
    }

    pub fn heartbeat(reference: u64) -> Self {
        Self {
            topic: "phoenix".into(),
            event: "heartbeat".into(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    pub fn leave(topic: &str, reference: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: "phx_leave".into(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    /// Interpret a `postgres_changes` frame as a change event.
    pub fn into_change(self) -> Option<ChangeEvent> {
        if self.event != "postgres_changes" {
            return None;
        }
        let data = self.payload.get("data")?;
        let table = Table::from_name(data.get("table")?.as_str()?)?;
        let kind = match data.get("type").and_then(Value::as_str) {
            Some("INSERT") => ChangeKind::Insert,
            Some("UPDATE") => ChangeKind::Update,
            Some("DELETE") => ChangeKind::Delete,
            _ => ChangeKind::Resync,
        };
        let record = data.get("record").filter(|value| !value.is_null()).cloned();
        Some(ChangeEvent {
            table,
            kind,
            record,
        })
    }

    /// `Some(reason)` when the frame reports the channel as failed or closed.
    pub fn failure(&self) -> Option<String> {
        match self.event.as_str() {
            "phx_error" | "phx_close" => Some(self.event.clone()),
            "phx_reply" => {
                let status = self.payload.get("status").and_then(Value::as_str)?;
                (status == "error").then(|| self.payload.get("response").map_or_else(
                    || "join refused".to_string(),
                    |response| response.to_string(),
                ))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_change_frame_becomes_change_event() {
        let frame: ChannelFrame = serde_json::from_value(json!({
            "topic": "realtime:players:1",
            "event": "postgres_changes",
            "payload": {
                "ids": [1],
                "data": {
                    "schema": "public",
                    "table": "players",
                    "type": "INSERT",
                    "record": { "nickname": "Bob" },
                    "commit_timestamp": "2025-02-14T20:00:00Z"
                }
            },
            "ref": null
        }))
        .unwrap();

        let change = frame.into_change().unwrap();
        assert_eq!(change.table, Table::Players);
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.record.unwrap()["nickname"], "Bob");
    }

    #[test]
    fn join_frame_carries_filter() {
        let filter = ChangeFilter::new(Table::GameSessions, "room_id", Uuid::nil());
        let frame = ChannelFrame::join("realtime:sessions", &filter, "key", 1);
        let value = serde_json::to_value(&frame).unwrap();
        let change = &value["payload"]["config"]["postgres_changes"][0];
        assert_eq!(change["table"], "game_sessions");
        assert_eq!(change["filter"], filter.expression());
        assert_eq!(value["ref"], "1");
    }

    #[test]
    fn error_reply_is_a_failure() {
        let frame: ChannelFrame = serde_json::from_value(json!({
            "topic": "realtime:x",
            "event": "phx_reply",
            "payload": { "status": "error", "response": { "reason": "unauthorized" } },
            "ref": "1"
        }))
        .unwrap();
        assert!(frame.failure().is_some());

        let ok: ChannelFrame = serde_json::from_value(json!({
            "topic": "realtime:x",
            "event": "phx_reply",
            "payload": { "status": "ok", "response": {} },
            "ref": "1"
        }))
        .unwrap();
        assert!(ok.failure().is_none());
    }
}
