//! Role card types: the constraint and boundary definition of a bot.
//!
//! Role cards come in three scoped layers (workspace override, global
//! override, built-in default). A layer only carries the fields it defines;
//! merging picks the highest-priority layer per field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

use crate::action::ActionCategory;
use crate::room::RoomType;

/// The fully merged role card of a bot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleCard {
    pub bot_id: String,
    pub display_name: String,
    /// What the bot owns.
    pub domain: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub definition_of_done: Vec<String>,
    /// Evaluated in order; the first matching ban is reported.
    pub hard_bans: Vec<HardBan>,
    pub escalation_triggers: Vec<EscalationTrigger>,
    pub metrics: Vec<String>,
}

impl RoleCard {
    /// Convert the card into a layer defining every field.
    pub fn to_layer(&self) -> RoleCardLayer {
        RoleCardLayer {
            display_name: Some(self.display_name.clone()),
            domain: Some(self.domain.clone()),
            inputs: Some(self.inputs.clone()),
            outputs: Some(self.outputs.clone()),
            definition_of_done: Some(self.definition_of_done.clone()),
            hard_bans: Some(self.hard_bans.clone()),
            escalation_triggers: Some(self.escalation_triggers.clone()),
            metrics: Some(self.metrics.clone()),
        }
    }
}

/// One scoped layer of a role card. `None` means "not defined here".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleCardLayer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_of_done: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_bans: Option<Vec<HardBan>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_triggers: Option<Vec<EscalationTrigger>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<String>>,
}

impl RoleCardLayer {
    pub fn is_empty(&self) -> bool {
        *self == RoleCardLayer::default()
    }

    /// Fields defined in `over` replace the ones in `self`.
    pub fn overlay(&self, over: &RoleCardLayer) -> RoleCardLayer {
        RoleCardLayer {
            display_name: over.display_name.clone().or_else(|| self.display_name.clone()),
            domain: over.domain.clone().or_else(|| self.domain.clone()),
            inputs: over.inputs.clone().or_else(|| self.inputs.clone()),
            outputs: over.outputs.clone().or_else(|| self.outputs.clone()),
            definition_of_done: over
                .definition_of_done
                .clone()
                .or_else(|| self.definition_of_done.clone()),
            hard_bans: over.hard_bans.clone().or_else(|| self.hard_bans.clone()),
            escalation_triggers: over
                .escalation_triggers
                .clone()
                .or_else(|| self.escalation_triggers.clone()),
            metrics: over.metrics.clone().or_else(|| self.metrics.clone()),
        }
    }
}

/// Where a role-card layer lives. Ordered from highest to lowest priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleCardScope {
    Workspace,
    Global,
    BuiltIn,
}

impl RoleCardScope {
    /// Scopes a user (or an approved proposal) may write to.
    pub fn is_writable(&self) -> bool {
        !matches!(self, RoleCardScope::BuiltIn)
    }
}

impl fmt::Display for RoleCardScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleCardScope::Workspace => write!(f, "workspace"),
            RoleCardScope::Global => write!(f, "global"),
            RoleCardScope::BuiltIn => write!(f, "builtin"),
        }
    }
}

impl FromStr for RoleCardScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "workspace" => Ok(RoleCardScope::Workspace),
            "global" => Ok(RoleCardScope::Global),
            "builtin" | "built-in" => Ok(RoleCardScope::BuiltIn),
            other => Err(format!("invalid role card scope: '{other}'")),
        }
    }
}

/// The stored override layers of one bot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleCardOverrides {
    pub workspace: Option<RoleCardLayer>,
    pub global: Option<RoleCardLayer>,
}

/// A configurable predicate over an action or situation description.
///
/// Matches when at least one positive clause (`phrases`, `keywords`,
/// `categories`, `regex`) matches and no `unless` phrase is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionPattern {
    /// Case-insensitive substrings; any one suffices.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phrases: Vec<String>,
    /// Words that must all be present (simple inflections allowed).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<ActionCategory>,
    /// Case-insensitive regular expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    /// Case-insensitive substrings that exempt an otherwise matching text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unless: Vec<String>,
}

impl ActionPattern {
    pub fn phrase(text: impl Into<String>) -> Self {
        Self {
            phrases: vec![text.into()],
            ..Default::default()
        }
    }

    pub fn category(category: ActionCategory) -> Self {
        Self {
            categories: vec![category],
            ..Default::default()
        }
    }

    pub fn unless(mut self, text: impl Into<String>) -> Self {
        self.unless.push(text.into());
        self
    }

    /// Whether the pattern has anything that can match.
    pub fn has_positive_clause(&self) -> bool {
        !self.phrases.is_empty()
            || !self.keywords.is_empty()
            || !self.categories.is_empty()
            || self.regex.is_some()
    }
}

/// An action a bot must never be allowed to execute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HardBan {
    pub id: String,
    pub pattern: ActionPattern,
    /// Human-readable reason, shown verbatim when an action is denied.
    pub reason: String,
    /// Room types the ban applies in. Empty means everywhere.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub room_types: Vec<RoomType>,
}

/// A situation that requires human review before proceeding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EscalationTrigger {
    pub id: String,
    pub pattern: ActionPattern,
    pub reason: String,
}

/// A bot-proposed change to its own role card, pending human approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleCardProposal {
    pub id: Uuid,
    pub bot_id: String,
    pub changes: RoleCardLayer,
    pub reason: String,
    pub proposed_by: String,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
    /// Scope the changes were written to on approval.
    pub applied_scope: Option<RoleCardScope>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalStatus::Pending => write!(f, "pending"),
            ProposalStatus::Approved => write!(f, "approved"),
            ProposalStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl FromStr for ProposalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ProposalStatus::Pending),
            "approved" => Ok(ProposalStatus::Approved),
            "rejected" => Ok(ProposalStatus::Rejected),
            other => Err(format!("invalid proposal status: '{other}'")),
        }
    }
}
