use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Static identity of a roster bot.
///
/// Bots are process-wide and shared across rooms; rooms reference them by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotProfile {
    /// Stable lowercase id used in mentions (`@researcher`).
    pub id: String,
    pub display_name: String,
    pub description: String,
    /// Whether this bot routes unaddressed messages to specialists.
    #[serde(default)]
    pub coordinator: bool,
}

/// Runtime status of a bot. Owned by the Dispatcher.
///
/// - Online: idle and invocable
/// - Thinking: an invocation is in flight
/// - Away: invocable, flagged by an adapter as slow to respond
/// - Offline: not invoked at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Online,
    Thinking,
    Offline,
    Away,
}

impl BotStatus {
    pub fn is_invocable(&self) -> bool {
        !matches!(self, BotStatus::Offline)
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotStatus::Online => write!(f, "online"),
            BotStatus::Thinking => write!(f, "thinking"),
            BotStatus::Offline => write!(f, "offline"),
            BotStatus::Away => write!(f, "away"),
        }
    }
}

impl FromStr for BotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "online" => Ok(BotStatus::Online),
            "thinking" => Ok(BotStatus::Thinking),
            "offline" => Ok(BotStatus::Offline),
            "away" => Ok(BotStatus::Away),
            other => Err(format!("invalid bot status: '{other}'")),
        }
    }
}

impl Default for BotStatus {
    fn default() -> Self {
        BotStatus::Online
    }
}

/// Status change notification on the process-wide status stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotStatusChange {
    pub bot_id: String,
    pub status: BotStatus,
    pub at: DateTime<Utc>,
}

/// A bot together with its current status, as returned by roster queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotSummary {
    #[serde(flatten)]
    pub profile: BotProfile,
    pub status: BotStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_status_roundtrip() {
        for status in [
            BotStatus::Online,
            BotStatus::Thinking,
            BotStatus::Offline,
            BotStatus::Away,
        ] {
            let parsed: BotStatus = status.to_string().parse().unwrap();
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn test_bot_status_parse_is_case_insensitive() {
        assert_eq!("AWAY".parse::<BotStatus>().unwrap(), BotStatus::Away);
        assert!("sleeping".parse::<BotStatus>().is_err());
    }

    #[test]
    fn test_only_offline_is_not_invocable() {
        assert!(BotStatus::Online.is_invocable());
        assert!(BotStatus::Away.is_invocable());
        assert!(BotStatus::Thinking.is_invocable());
        assert!(!BotStatus::Offline.is_invocable());
    }
}
