//! Action descriptors and constraint decisions.
//!
//! The Dispatcher describes every externally effective step a bot is about
//! to take as an [`ActionDescriptor`] and asks the constraint engine for a
//! [`Decision`] before taking it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

use crate::room::RoomType;

/// Semantic action categories that ban patterns can match on, beyond
/// literal text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    /// Publishing or posting to an external service.
    ExternalPublish,
    /// Contacting people outside the workspace.
    ExternalCommunication,
    /// Moving or committing money.
    Financial,
    /// Irreversible deletion or overwrite.
    Destructive,
    /// Shipping to a production environment.
    Deployment,
    /// Reading or exposing secrets.
    CredentialAccess,
}

impl ActionCategory {
    pub const ALL: [ActionCategory; 6] = [
        ActionCategory::ExternalPublish,
        ActionCategory::ExternalCommunication,
        ActionCategory::Financial,
        ActionCategory::Destructive,
        ActionCategory::Deployment,
        ActionCategory::CredentialAccess,
    ];
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionCategory::ExternalPublish => write!(f, "external_publish"),
            ActionCategory::ExternalCommunication => write!(f, "external_communication"),
            ActionCategory::Financial => write!(f, "financial"),
            ActionCategory::Destructive => write!(f, "destructive"),
            ActionCategory::Deployment => write!(f, "deployment"),
            ActionCategory::CredentialAccess => write!(f, "credential_access"),
        }
    }
}

impl FromStr for ActionCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "external_publish" => Ok(ActionCategory::ExternalPublish),
            "external_communication" => Ok(ActionCategory::ExternalCommunication),
            "financial" => Ok(ActionCategory::Financial),
            "destructive" => Ok(ActionCategory::Destructive),
            "deployment" => Ok(ActionCategory::Deployment),
            "credential_access" => Ok(ActionCategory::CredentialAccess),
            other => Err(format!("invalid action category: '{other}'")),
        }
    }
}

/// What kind of step the bot is about to take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Invoking the bot's model to answer a message.
    ModelInvocation,
    /// Executing an external tool the model asked for.
    ToolCall { tool: String },
    /// Handing work to another bot.
    Delegation { to_bot: String },
}

/// A proposed bot action, as seen by the constraint engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub bot_id: String,
    pub kind: ActionKind,
    /// Free-text summary of the intended operation ("post tweet directly").
    pub summary: String,
    /// Categories declared by whoever built the descriptor, in addition to
    /// the ones inferred from the text.
    #[serde(default)]
    pub categories: Vec<ActionCategory>,
}

impl ActionDescriptor {
    pub fn new(bot_id: impl Into<String>, kind: ActionKind, summary: impl Into<String>) -> Self {
        Self {
            bot_id: bot_id.into(),
            kind,
            summary: summary.into(),
            categories: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: ActionCategory) -> Self {
        if !self.categories.contains(&category) {
            self.categories.push(category);
        }
        self
    }

    /// Text the ban patterns are matched against: the summary plus the tool
    /// or delegate name.
    pub fn match_text(&self) -> String {
        match &self.kind {
            ActionKind::ModelInvocation => self.summary.clone(),
            ActionKind::ToolCall { tool } => format!("{tool} {}", self.summary),
            ActionKind::Delegation { to_bot } => format!("delegate to {to_bot}: {}", self.summary),
        }
    }
}

/// Where and why an action is proposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionContext {
    pub room_id: String,
    pub room_type: RoomType,
    pub message_id: Option<Uuid>,
    pub delegation_depth: u32,
    /// Recent room history, oldest first, as "sender: content" lines.
    #[serde(default)]
    pub prior_turns: Vec<String>,
}

/// Outcome of a constraint check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allowed,
    Denied { reason: String, ban_id: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Outcome of an escalation check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationCheck {
    pub escalate: bool,
    pub reason: Option<String>,
    /// Matching trigger id, or `low_confidence`.
    pub trigger_id: Option<String>,
}

impl EscalationCheck {
    pub fn none() -> Self {
        Self {
            escalate: false,
            reason: None,
            trigger_id: None,
        }
    }
}
