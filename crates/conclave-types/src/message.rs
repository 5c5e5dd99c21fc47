//! Room message types.
//!
//! A message is created by the Dispatcher (bot output and system notices) or
//! by an interface adapter (human input), and is immutable after it is
//! persisted except for an explicit content edit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Sender id used for messages synthesized by the engine itself.
pub const SYSTEM_SENDER: &str = "system";

/// Rendering kind of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Code,
    /// Internal reasoning a bot chose to surface.
    Reasoning,
    ToolResult,
    File,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Text => write!(f, "text"),
            MessageKind::Code => write!(f, "code"),
            MessageKind::Reasoning => write!(f, "reasoning"),
            MessageKind::ToolResult => write!(f, "tool_result"),
            MessageKind::File => write!(f, "file"),
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(MessageKind::Text),
            "code" => Ok(MessageKind::Code),
            "reasoning" => Ok(MessageKind::Reasoning),
            "tool_result" => Ok(MessageKind::ToolResult),
            "file" => Ok(MessageKind::File),
            other => Err(format!("invalid message kind: '{other}'")),
        }
    }
}

impl Default for MessageKind {
    fn default() -> Self {
        MessageKind::Text
    }
}

/// A persisted room message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMessage {
    pub id: Uuid,
    pub room_id: String,
    /// Per-room sequence number assigned at ingestion.
    pub seq: u64,
    pub content: String,
    pub kind: MessageKind,
    pub sender_id: String,
    pub sender_is_bot: bool,
    pub created_at: DateTime<Utc>,
    pub reply_to: Option<Uuid>,
    pub edited_at: Option<DateTime<Utc>>,
    /// Arbitrary rendering metadata. Always a JSON object.
    pub metadata: serde_json::Value,
    /// Soft-mark set when the owning room is archived.
    #[serde(default)]
    pub archived: bool,
}

impl RoomMessage {
    pub fn is_system(&self) -> bool {
        self.sender_id == SYSTEM_SENDER && !self.sender_is_bot
    }

    /// The `metadata.system.event` tag of a system message, if any.
    pub fn system_event(&self) -> Option<&str> {
        self.metadata
            .get("system")
            .and_then(|s| s.get("event"))
            .and_then(|e| e.as_str())
    }
}

/// A message that has not been appended yet. The Room Registry assigns id,
/// sequence number and timestamp when it appends the draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub room_id: String,
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
    pub sender_id: String,
    #[serde(default)]
    pub sender_is_bot: bool,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
}

pub fn empty_metadata() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl MessageDraft {
    /// A plain-text message from a human or an interface.
    pub fn human(room_id: impl Into<String>, sender_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            content: content.into(),
            kind: MessageKind::Text,
            sender_id: sender_id.into(),
            sender_is_bot: false,
            reply_to: None,
            metadata: empty_metadata(),
        }
    }

    /// A message authored by a bot.
    pub fn bot(
        room_id: impl Into<String>,
        bot_id: impl Into<String>,
        kind: MessageKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            content: content.into(),
            kind,
            sender_id: bot_id.into(),
            sender_is_bot: true,
            reply_to: None,
            metadata: empty_metadata(),
        }
    }

    /// A system notice. `event` becomes `metadata.system.event`; `details`
    /// (a JSON object) is merged into `metadata.system`.
    pub fn system(
        room_id: impl Into<String>,
        event: &str,
        content: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        let mut system = serde_json::Map::new();
        system.insert("event".into(), serde_json::Value::String(event.to_string()));
        if let serde_json::Value::Object(extra) = details {
            for (k, v) in extra {
                system.insert(k, v);
            }
        }
        let mut metadata = serde_json::Map::new();
        metadata.insert("system".into(), serde_json::Value::Object(system));

        Self {
            room_id: room_id.into(),
            content: content.into(),
            kind: MessageKind::Text,
            sender_id: SYSTEM_SENDER.to_string(),
            sender_is_bot: false,
            reply_to: None,
            metadata: serde_json::Value::Object(metadata),
        }
    }

    pub fn in_reply_to(mut self, message_id: Uuid) -> Self {
        self.reply_to = Some(message_id);
        self
    }
}

/// Tags used in `metadata.system.event` of system messages.
pub mod system_event {
    pub const CONSTRAINT_DENIED: &str = "constraint_denied";
    pub const INVOCATION_FAILED: &str = "invocation_failed";
    pub const DELEGATION_DEPTH_EXCEEDED: &str = "delegation_depth_exceeded";
    pub const ESCALATION_RAISED: &str = "escalation_raised";
    pub const ESCALATION_RESOLVED: &str = "escalation_resolved";
    pub const NOT_A_PARTICIPANT: &str = "not_a_participant";
    pub const NO_BOT_AVAILABLE: &str = "no_bot_available";
    pub const CONFIGURATION_ERROR: &str = "configuration_error";
}

/// Pagination and search over a room's history.
///
/// Results are always returned in ascending sequence order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageQuery {
    /// Only messages with `seq < before_seq`.
    pub before_seq: Option<u64>,
    /// Only messages with `seq > after_seq`.
    pub after_seq: Option<u64>,
    /// Maximum number of messages; the most recent ones win when only
    /// `before_seq` (or nothing) is given, the oldest ones when `after_seq` is.
    pub limit: Option<u32>,
    /// Full-text query over message content.
    pub text: Option<String>,
}

impl MessageQuery {
    pub const DEFAULT_LIMIT: u32 = 50;

    pub fn latest(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kind_roundtrip() {
        for kind in [
            MessageKind::Text,
            MessageKind::Code,
            MessageKind::Reasoning,
            MessageKind::ToolResult,
            MessageKind::File,
        ] {
            let parsed: MessageKind = kind.to_string().parse().unwrap();
            assert_eq!(kind, parsed);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn test_system_draft_metadata() {
        let draft = MessageDraft::system(
            "general",
            system_event::CONSTRAINT_DENIED,
            "denied",
            serde_json::json!({ "bot_id": "social", "ban_id": "no-direct-posting" }),
        );
        assert_eq!(draft.sender_id, SYSTEM_SENDER);
        assert!(!draft.sender_is_bot);
        assert_eq!(draft.metadata["system"]["event"], "constraint_denied");
        assert_eq!(draft.metadata["system"]["bot_id"], "social");
    }

    #[test]
    fn test_query_limit_floor() {
        let q = MessageQuery {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(q.effective_limit(), 1);
        assert_eq!(MessageQuery::default().effective_limit(), 50);
    }
}
