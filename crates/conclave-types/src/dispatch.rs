//! Dispatch reports: what happened to each bot targeted by a message.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCode;

/// Outcome of one targeted bot within a dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The bot answered; ids of every message it produced, in order.
    Responded { message_ids: Vec<Uuid> },
    /// A hard ban blocked the invocation.
    Denied { reason: String, ban_id: String },
    Failed { code: ErrorCode, message: String },
    /// Output discarded because the room's dispatches were cancelled.
    Cancelled,
    DepthExceeded { depth: u32, max: u32 },
    /// Not invoked (not a participant, task limit reached).
    Skipped { reason: String },
}

impl DispatchOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            DispatchOutcome::Responded { .. } => "responded",
            DispatchOutcome::Denied { .. } => "denied",
            DispatchOutcome::Failed { .. } => "failed",
            DispatchOutcome::Cancelled => "cancelled",
            DispatchOutcome::DepthExceeded { .. } => "depth_exceeded",
            DispatchOutcome::Skipped { .. } => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetReport {
    pub bot_id: String,
    pub delegation_depth: u32,
    /// Bot that delegated this task, if any.
    pub delegated_by: Option<String>,
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
}

/// Result of dispatching one message, in completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub room_id: String,
    pub trigger_id: Uuid,
    pub targets: Vec<TargetReport>,
}

impl DispatchReport {
    pub fn new(room_id: impl Into<String>, trigger_id: Uuid) -> Self {
        Self {
            room_id: room_id.into(),
            trigger_id,
            targets: Vec::new(),
        }
    }

    pub fn outcome_of(&self, bot_id: &str) -> Option<&DispatchOutcome> {
        self.targets
            .iter()
            .find(|t| t.bot_id == bot_id)
            .map(|t| &t.outcome)
    }
}
