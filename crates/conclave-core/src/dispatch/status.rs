//! Bot status board: current status per roster bot plus a process-wide
//! change stream.

use chrono::Utc;
use conclave_types::bot::{BotStatus, BotStatusChange};
use dashmap::DashMap;
use tokio::sync::broadcast;

const STATUS_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    status: BotStatus,
    /// Last explicitly set status, restored once the bot stops thinking.
    resting: BotStatus,
    in_flight: u32,
}

/// Tracks `online`/`thinking`/`away`/`offline` per bot.
///
/// A bot is `thinking` while at least one invocation runs, across all rooms.
pub struct StatusBoard {
    entries: DashMap<String, Entry>,
    sender: broadcast::Sender<BotStatusChange>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            entries: DashMap::new(),
            sender,
        }
    }

    /// Current status; bots never seen are `online`.
    pub fn get(&self, bot_id: &str) -> BotStatus {
        self.entries
            .get(bot_id)
            .map(|e| e.status)
            .unwrap_or_default()
    }

    /// Set a status explicitly. Returns the change if the status differed.
    pub fn set(&self, bot_id: &str, status: BotStatus) -> Option<BotStatusChange> {
        let mut entry = self.entries.entry(bot_id.to_string()).or_default();
        if status != BotStatus::Thinking {
            entry.resting = status;
        }
        if entry.status == status {
            return None;
        }
        entry.status = status;
        drop(entry);
        Some(self.emit(bot_id, status))
    }

    /// An invocation starts. Returns the change to `thinking`, if any.
    pub fn begin(&self, bot_id: &str) -> Option<BotStatusChange> {
        let mut entry = self.entries.entry(bot_id.to_string()).or_default();
        entry.in_flight += 1;
        if entry.status == BotStatus::Thinking || entry.status == BotStatus::Offline {
            return None;
        }
        entry.status = BotStatus::Thinking;
        drop(entry);
        Some(self.emit(bot_id, BotStatus::Thinking))
    }

    /// An invocation ends. The last one to finish returns the bot to its
    /// resting status (`online` or `away`), unless it was explicitly set
    /// meanwhile.
    pub fn finish(&self, bot_id: &str) -> Option<BotStatusChange> {
        let mut entry = self.entries.entry(bot_id.to_string()).or_default();
        entry.in_flight = entry.in_flight.saturating_sub(1);
        if entry.in_flight > 0 || entry.status != BotStatus::Thinking {
            return None;
        }
        let resting = entry.resting;
        entry.status = resting;
        drop(entry);
        Some(self.emit(bot_id, resting))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotStatusChange> {
        self.sender.subscribe()
    }

    fn emit(&self, bot_id: &str, status: BotStatus) -> BotStatusChange {
        let change = BotStatusChange {
            bot_id: bot_id.to_string(),
            status,
            at: Utc::now(),
        };
        let _ = self.sender.send(change.clone());
        change
    }
}

impl std::fmt::Debug for StatusBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusBoard")
            .field("bots", &self.entries.len())
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_bots_are_online() {
        assert_eq!(StatusBoard::new().get("lead"), BotStatus::Online);
    }

    #[test]
    fn thinking_until_last_invocation_finishes() {
        let board = StatusBoard::new();
        assert_eq!(board.begin("coder").unwrap().status, BotStatus::Thinking);
        assert!(board.begin("coder").is_none());
        assert!(board.finish("coder").is_none());
        assert_eq!(board.get("coder"), BotStatus::Thinking);
        assert_eq!(board.finish("coder").unwrap().status, BotStatus::Online);
    }

    #[test]
    fn offline_survives_finish() {
        let board = StatusBoard::new();
        board.begin("writer");
        board.set("writer", BotStatus::Offline);
        assert!(board.finish("writer").is_none());
        assert_eq!(board.get("writer"), BotStatus::Offline);
    }

    #[test]
    fn away_is_restored_after_thinking() {
        let board = StatusBoard::new();
        board.set("social", BotStatus::Away);
        assert_eq!(board.begin("social").unwrap().status, BotStatus::Thinking);
        assert_eq!(board.finish("social").unwrap().status, BotStatus::Away);
        assert_eq!(board.get("social"), BotStatus::Away);

        board.set("social", BotStatus::Online);
        board.begin("social");
        assert_eq!(board.finish("social").unwrap().status, BotStatus::Online);
    }

    #[tokio::test]
    async fn changes_are_broadcast() {
        let board = StatusBoard::new();
        let mut rx = board.subscribe();
        board.set("social", BotStatus::Away);
        assert!(board.set("social", BotStatus::Away).is_none());
        let change = rx.recv().await.unwrap();
        assert_eq!(change.bot_id, "social");
        assert_eq!(change.status, BotStatus::Away);
        assert!(rx.try_recv().is_err());
    }
}
