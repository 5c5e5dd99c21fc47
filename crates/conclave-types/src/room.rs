use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Id of the permanent default room.
pub const DEFAULT_ROOM_ID: &str = "general";

/// Display name of the permanent default room.
pub const DEFAULT_ROOM_NAME: &str = "General";

/// A named conversational context shared by a set of bots and every
/// interface currently viewing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// Slug derived from the room name ("Launch Plan" -> "launch-plan").
    pub id: String,
    pub name: String,
    pub room_type: RoomType,
    /// Participant bot ids. Membership is a set; display order is join order.
    pub participants: Vec<String>,
    pub owner: String,
    pub summary: String,
    pub archived: bool,
    /// Last event sequence number assigned in this room (0 = none yet).
    pub last_seq: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    /// Whether this is the protected default room.
    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_ROOM_ID
    }

    pub fn has_participant(&self, bot_id: &str) -> bool {
        self.participants.iter().any(|p| p == bot_id)
    }
}

/// Room kinds. Only affects routing defaults and role-card ban scoping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    Open,
    Project,
    Direct,
    Coordination,
}

impl fmt::Display for RoomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomType::Open => write!(f, "open"),
            RoomType::Project => write!(f, "project"),
            RoomType::Direct => write!(f, "direct"),
            RoomType::Coordination => write!(f, "coordination"),
        }
    }
}

impl FromStr for RoomType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(RoomType::Open),
            "project" => Ok(RoomType::Project),
            "direct" => Ok(RoomType::Direct),
            "coordination" => Ok(RoomType::Coordination),
            other => Err(format!("invalid room type: '{other}'")),
        }
    }
}

impl Default for RoomType {
    fn default() -> Self {
        RoomType::Open
    }
}

/// Request to create a room. Participants default to the coordinating bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default)]
    pub room_type: RoomType,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

/// Generate a room id from a display name.
///
/// Rules:
/// - Lowercase
/// - Replace non-alphanumeric characters with hyphens
/// - Collapse consecutive hyphens into one
/// - Trim leading/trailing hyphens
///
/// # Examples
///
/// ```
/// use conclave_types::room::room_id_from_name;
///
/// assert_eq!(room_id_from_name("Launch Plan"), "launch-plan");
/// assert_eq!(room_id_from_name("  Q3 // Roadmap!! "), "q3-roadmap");
/// ```
pub fn room_id_from_name(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    let mut pending_hyphen = false;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !id.is_empty() {
                id.push('-');
            }
            pending_hyphen = false;
            id.push(c);
        } else {
            pending_hyphen = true;
        }
    }
    id
}
