//! Inbound normalization: every interface's events become message drafts.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use conclave_types::event::InboundEvent;
use conclave_types::message::{MessageDraft, empty_metadata};
use conclave_types::room::DEFAULT_ROOM_ID;
use dashmap::DashMap;
use tracing::debug;

/// Default number of client event ids remembered per room.
pub const DEFAULT_DEDUP_WINDOW: usize = 256;

/// Result of normalizing an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Draft(MessageDraft),
    /// Same client event id seen recently in this room.
    Duplicate,
    /// Nothing to deliver (blank content).
    Empty,
}

#[derive(Default)]
struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

/// Normalizes inbound events and drops adapter redeliveries.
pub struct InboundNormalizer {
    window: usize,
    seen: DashMap<String, Mutex<SeenIds>>,
}

impl Default for InboundNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

impl InboundNormalizer {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            seen: DashMap::new(),
        }
    }

    /// Trim the content, default the room, tag the source interface, and
    /// drop events whose client id was already seen in the same room.
    pub fn normalize(&self, event: InboundEvent) -> Normalized {
        let room_id = event
            .room_id
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_ROOM_ID)
            .to_string();

        let content = event.content.trim();
        if content.is_empty() {
            return Normalized::Empty;
        }

        if let Some(client_id) = event.client_event_id.as_deref() {
            if !self.remember(&room_id, client_id) {
                debug!(%room_id, %client_id, "dropping redelivered inbound event");
                return Normalized::Duplicate;
            }
        }

        let mut metadata = match event.metadata {
            Some(serde_json::Value::Object(map)) => serde_json::Value::Object(map),
            _ => empty_metadata(),
        };
        if let serde_json::Value::Object(map) = &mut metadata {
            map.insert(
                "interface".into(),
                serde_json::Value::String(event.interface.to_string()),
            );
        }

        Normalized::Draft(MessageDraft {
            room_id,
            content: content.to_string(),
            kind: event.kind,
            sender_id: event.sender_id.trim().to_string(),
            sender_is_bot: false,
            reply_to: event.reply_to,
            metadata,
        })
    }

    /// Drop the remembered client ids of a deleted room.
    pub fn forget_room(&self, room_id: &str) {
        self.seen.remove(room_id);
    }

    /// Returns `false` if the id was already remembered for this room.
    fn remember(&self, room_id: &str, client_id: &str) -> bool {
        if self.window == 0 {
            return true;
        }
        let entry = self.seen.entry(room_id.to_string()).or_default();
        let mut seen = match entry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if seen.ids.contains(client_id) {
            return false;
        }
        if seen.order.len() == self.window {
            if let Some(oldest) = seen.order.pop_front() {
                seen.ids.remove(&oldest);
            }
        }
        seen.order.push_back(client_id.to_string());
        seen.ids.insert(client_id.to_string());
        true
    }
}
