//! Query parameter extractors for list endpoints.

use serde::Deserialize;

use conclave_types::message::MessageQuery;

/// Query parameters for the room list endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct RoomListQuery {
    /// Include archived rooms.
    #[serde(default)]
    pub all: bool,
}

/// Query parameters for a room's message history.
#[derive(Debug, Deserialize, Default)]
pub struct MessageListQuery {
    pub before: Option<u64>,
    pub after: Option<u64>,
    pub limit: Option<u32>,
    /// Full-text search over message content.
    pub q: Option<String>,
}

impl From<MessageListQuery> for MessageQuery {
    fn from(q: MessageListQuery) -> Self {
        MessageQuery {
            before_seq: q.before,
            after_seq: q.after,
            limit: q.limit,
            text: q.q.filter(|t| !t.trim().is_empty()),
        }
    }
}

/// Query parameters for the proposal list endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct ProposalListQuery {
    pub bot: Option<String>,
    /// pending, approved, rejected.
    pub status: Option<String>,
}

/// Query parameters for the escalation list endpoint.
#[derive(Debug, Deserialize)]
pub struct EscalationListQuery {
    /// open (default), pending, acknowledged, resolved, all.
    #[serde(default = "default_filter")]
    pub filter: String,
    pub room: Option<String>,
}

fn default_filter() -> String {
    "open".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_search_is_dropped() {
        let query: MessageQuery = MessageListQuery {
            before: Some(40),
            q: Some("  ".into()),
            ..Default::default()
        }
        .into();
        assert_eq!(query.before_seq, Some(40));
        assert!(query.text.is_none());
    }
}
