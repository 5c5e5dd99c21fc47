use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Trigger id recorded when an escalation fires because of low confidence
/// rather than a matching trigger pattern.
pub const LOW_CONFIDENCE_TRIGGER: &str = "low_confidence";

/// Trigger id recorded when a bot explicitly asks for a human.
pub const BOT_REQUEST_TRIGGER: &str = "bot_request";

/// A situation flagged for human review.
///
/// Escalations are never discarded: an unresolved record stays pending until
/// a human resolves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub id: Uuid,
    pub room_id: String,
    /// Absent when the escalation was raised by the engine itself.
    pub bot_id: Option<String>,
    pub reason: String,
    /// Hard-ban id, escalation-trigger id, or [`LOW_CONFIDENCE_TRIGGER`].
    pub trigger_id: String,
    pub state: ResolutionState,
    pub created_at: DateTime<Utc>,
    pub acknowledged_by: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_note: Option<String>,
}

impl EscalationRecord {
    pub fn is_resolved(&self) -> bool {
        self.state == ResolutionState::Resolved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionState {
    Pending,
    Acknowledged,
    Resolved,
}

impl fmt::Display for ResolutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionState::Pending => write!(f, "pending"),
            ResolutionState::Acknowledged => write!(f, "acknowledged"),
            ResolutionState::Resolved => write!(f, "resolved"),
        }
    }
}

impl FromStr for ResolutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ResolutionState::Pending),
            "acknowledged" => Ok(ResolutionState::Acknowledged),
            "resolved" => Ok(ResolutionState::Resolved),
            other => Err(format!("invalid resolution state: '{other}'")),
        }
    }
}

/// Which escalations a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationFilter {
    Pending,
    Acknowledged,
    Resolved,
    /// Pending or acknowledged.
    Open,
    #[default]
    All,
}

impl EscalationFilter {
    pub fn matches(&self, state: ResolutionState) -> bool {
        match self {
            EscalationFilter::Pending => state == ResolutionState::Pending,
            EscalationFilter::Acknowledged => state == ResolutionState::Acknowledged,
            EscalationFilter::Resolved => state == ResolutionState::Resolved,
            EscalationFilter::Open => state != ResolutionState::Resolved,
            EscalationFilter::All => true,
        }
    }
}

impl fmt::Display for EscalationFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationFilter::Pending => write!(f, "pending"),
            EscalationFilter::Acknowledged => write!(f, "acknowledged"),
            EscalationFilter::Resolved => write!(f, "resolved"),
            EscalationFilter::Open => write!(f, "open"),
            EscalationFilter::All => write!(f, "all"),
        }
    }
}

impl FromStr for EscalationFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(EscalationFilter::Pending),
            "acknowledged" => Ok(EscalationFilter::Acknowledged),
            "resolved" => Ok(EscalationFilter::Resolved),
            "open" => Ok(EscalationFilter::Open),
            "all" => Ok(EscalationFilter::All),
            other => Err(format!("invalid escalation filter: '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches() {
        assert!(EscalationFilter::Open.matches(ResolutionState::Pending));
        assert!(EscalationFilter::Open.matches(ResolutionState::Acknowledged));
        assert!(!EscalationFilter::Open.matches(ResolutionState::Resolved));
        assert!(EscalationFilter::All.matches(ResolutionState::Resolved));
        assert!(!EscalationFilter::Pending.matches(ResolutionState::Acknowledged));
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [
            ResolutionState::Pending,
            ResolutionState::Acknowledged,
            ResolutionState::Resolved,
        ] {
            let parsed: ResolutionState = state.to_string().parse().unwrap();
            assert_eq!(state, parsed);
        }
    }
}
