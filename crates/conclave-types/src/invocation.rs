//! Types exchanged with the opaque model-invocation collaborator.
//!
//! A `BotInvoker` receives an [`InvocationRequest`] and streams back
//! [`BotOutput`] items. Both are serde types so an invoker can live behind an
//! HTTP boundary (one JSON object per line).

use serde::{Deserialize, Serialize};

use crate::action::ActionCategory;
use crate::message::{MessageKind, RoomMessage};
use crate::role_card::RoleCard;
use crate::room::RoomType;

/// Everything a model needs to answer one message as one bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub bot_id: String,
    pub room_id: String,
    pub room_type: RoomType,
    pub role_card: RoleCard,
    /// The message being answered (a human message or a delegation task).
    pub trigger: RoomMessage,
    /// Recent room history before the trigger, oldest first.
    pub prior_turns: Vec<RoomMessage>,
    pub delegation_depth: u32,
    /// Bot that delegated this task, if any.
    pub delegated_by: Option<String>,
}

/// One item of an invocation's output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotOutput {
    /// A chunk of response text. Consecutive chunks of the same kind form
    /// one message.
    Text {
        #[serde(default)]
        kind: MessageKind,
        delta: String,
    },
    /// A request to run an external tool.
    ToolCall {
        tool: String,
        #[serde(default)]
        arguments: serde_json::Value,
        /// Categories the tool is known to fall under.
        #[serde(default)]
        categories: Vec<ActionCategory>,
    },
    /// A request to hand work to another bot in the same room.
    Delegate { to_bot: String, instruction: String },
    /// The bot asks for a human to look at something.
    Escalate { reason: String },
    /// Self-reported confidence in the response, 0.0 to 1.0.
    Confidence { value: f32 },
}

impl BotOutput {
    pub fn text(delta: impl Into<String>) -> Self {
        BotOutput::Text {
            kind: MessageKind::Text,
            delta: delta.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_wire_format() {
        let line = r#"{"type":"tool_call","tool":"twitter.post","categories":["external_publish"]}"#;
        let output: BotOutput = serde_json::from_str(line).unwrap();
        assert_eq!(
            output,
            BotOutput::ToolCall {
                tool: "twitter.post".into(),
                arguments: serde_json::Value::Null,
                categories: vec![ActionCategory::ExternalPublish],
            }
        );

        let text: BotOutput = serde_json::from_str(r#"{"type":"text","delta":"hi"}"#).unwrap();
        assert_eq!(text, BotOutput::text("hi"));
    }
}
