//! Event types for the room synchronization bus.
//!
//! Every room mutation becomes exactly one `RoomEvent` carrying the room's
//! next sequence number. All types are Clone + Send + Sync for use with
//! tokio broadcast channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bot::BotStatus;
use crate::escalation::EscalationRecord;
use crate::message::{MessageKind, RoomMessage};
use crate::room::Room;

/// One entry of a room's append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    pub room_id: String,
    /// Gap-free, strictly increasing per room.
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub payload: RoomEventPayload,
}

/// What changed in the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEventPayload {
    MessageAppended { message: RoomMessage },
    MessageEdited { message: RoomMessage },
    ParticipantAdded { bot_id: String },
    ParticipantRemoved { bot_id: String },
    SummaryUpdated { summary: String },
    RoomArchived,
    RoomDeleted,
    BotStatusChanged { bot_id: String, status: BotStatus },
    EscalationRaised { escalation: EscalationRecord },
    EscalationAcknowledged { escalation: EscalationRecord },
    EscalationResolved { escalation: EscalationRecord },
}

impl RoomEventPayload {
    /// Short stable name of the payload type, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            RoomEventPayload::MessageAppended { .. } => "message_appended",
            RoomEventPayload::MessageEdited { .. } => "message_edited",
            RoomEventPayload::ParticipantAdded { .. } => "participant_added",
            RoomEventPayload::ParticipantRemoved { .. } => "participant_removed",
            RoomEventPayload::SummaryUpdated { .. } => "summary_updated",
            RoomEventPayload::RoomArchived => "room_archived",
            RoomEventPayload::RoomDeleted => "room_deleted",
            RoomEventPayload::BotStatusChanged { .. } => "bot_status_changed",
            RoomEventPayload::EscalationRaised { .. } => "escalation_raised",
            RoomEventPayload::EscalationAcknowledged { .. } => "escalation_acknowledged",
            RoomEventPayload::EscalationResolved { .. } => "escalation_resolved",
        }
    }
}

/// Full state of a room as of a given sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room: Room,
    /// Most recent messages with `seq <= as_of_seq`, ascending.
    pub messages: Vec<RoomMessage>,
    pub open_escalations: Vec<EscalationRecord>,
    pub as_of_seq: u64,
}

/// Items yielded by a room subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncItem {
    /// Always the first item, and re-sent after a detected gap.
    Snapshot {
        snapshot: RoomSnapshot,
        /// True when this snapshot replaces state after a gap.
        resync: bool,
    },
    Event { event: RoomEvent },
}

/// Which physical channel an inbound event came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum InterfaceKind {
    Gui,
    Web,
    Cli,
    /// A messaging-platform bridge, named by platform.
    Channel(String),
}

impl std::fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceKind::Gui => write!(f, "gui"),
            InterfaceKind::Web => write!(f, "web"),
            InterfaceKind::Cli => write!(f, "cli"),
            InterfaceKind::Channel(name) => write!(f, "channel:{name}"),
        }
    }
}

/// A human message as received from some interface, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub interface: InterfaceKind,
    /// Target room; blank means the default room.
    #[serde(default)]
    pub room_id: Option<String>,
    pub sender_id: String,
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Adapter-assigned id used to drop redelivered events.
    #[serde(default)]
    pub client_event_id: Option<String>,
}

impl InboundEvent {
    pub fn text(interface: InterfaceKind, room_id: &str, sender_id: &str, content: &str) -> Self {
        Self {
            interface,
            room_id: Some(room_id.to_string()),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            kind: MessageKind::Text,
            reply_to: None,
            metadata: None,
            client_event_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_tagging() {
        let payload = RoomEventPayload::ParticipantAdded {
            bot_id: "coder".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "participant_added");
        assert_eq!(json["bot_id"], "coder");
        assert_eq!(payload.name(), "participant_added");
    }

    #[test]
    fn test_unit_payload_tagging() {
        let json = serde_json::to_value(RoomEventPayload::RoomArchived).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "room_archived" }));
    }

    #[test]
    fn test_inbound_event_defaults() {
        let inbound: InboundEvent = serde_json::from_value(serde_json::json!({
            "interface": { "type": "channel", "name": "slack" },
            "sender_id": "dana",
            "content": "@researcher find sources"
        }))
        .unwrap();
        assert_eq!(inbound.interface, InterfaceKind::Channel("slack".into()));
        assert!(inbound.room_id.is_none());
        assert_eq!(inbound.kind, MessageKind::Text);
        assert_eq!(inbound.interface.to_string(), "channel:slack");
    }
}
