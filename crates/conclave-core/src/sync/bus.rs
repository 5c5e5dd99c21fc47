//! Per-room broadcast of room events with a bounded replay buffer.
//!
//! The `SyncBus` is the single fan-out point for room mutations. Each room
//! gets its own `broadcast` channel, created on first use, plus a ring
//! buffer of recent events so reconnecting subscribers can resume without a
//! full snapshot. Publishing with no active subscribers is a no-op apart
//! from the replay buffer.
//!
//! Sequence numbers are assigned by the Room Registry, which publishes while
//! holding the room's exclusive section; the bus only relays them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use conclave_types::event::RoomEvent;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default capacity of each room's broadcast channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default number of events kept per room for resumption.
pub const DEFAULT_REPLAY_BUFFER: usize = 512;

struct RoomChannel {
    sender: broadcast::Sender<RoomEvent>,
    /// Recent events, oldest first. Guarded together with `sender` so an
    /// attach sees every event exactly once across replay and receiver.
    replay: Mutex<VecDeque<RoomEvent>>,
}

/// Receiver attached to a room, plus the buffered events after a given
/// sequence number when they were all still held.
pub struct Attachment {
    pub receiver: broadcast::Receiver<RoomEvent>,
    pub replay: Option<Vec<RoomEvent>>,
}

/// Multi-room event bus. Cloning shares the underlying channels.
#[derive(Clone)]
pub struct SyncBus {
    rooms: Arc<DashMap<String, Arc<RoomChannel>>>,
    capacity: usize,
    replay_size: usize,
}

impl Default for SyncBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY, DEFAULT_REPLAY_BUFFER)
    }
}

impl SyncBus {
    pub fn new(capacity: usize, replay_size: usize) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
            replay_size,
        }
    }

    fn channel(&self, room_id: &str) -> Arc<RoomChannel> {
        if let Some(ch) = self.rooms.get(room_id) {
            return ch.clone();
        }
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                let (sender, _) = broadcast::channel(self.capacity);
                Arc::new(RoomChannel {
                    sender,
                    replay: Mutex::new(VecDeque::with_capacity(self.replay_size.min(64))),
                })
            })
            .clone()
    }

    /// Publish an event to every subscriber of its room.
    pub fn publish(&self, event: RoomEvent) {
        let ch = self.channel(&event.room_id);
        let mut replay = match ch.replay.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if self.replay_size > 0 {
            if replay.len() == self.replay_size {
                replay.pop_front();
            }
            replay.push_back(event.clone());
        }

        debug!(
            room_id = %event.room_id,
            seq = event.seq,
            event = event.payload.name(),
            receivers = ch.sender.receiver_count(),
            "room event published"
        );
        let _ = ch.sender.send(event);
    }

    /// Attach a receiver for live events of a room.
    ///
    /// When `since` is given and the replay buffer still holds every event
    /// after it, those events are returned as well; events published later
    /// arrive through the receiver only.
    pub fn attach(&self, room_id: &str, since: Option<u64>) -> Attachment {
        let ch = self.channel(room_id);
        let replay = match ch.replay.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let receiver = ch.sender.subscribe();

        let replay = since.and_then(|since| {
            let newest = replay.back().map(|e| e.seq);
            match newest {
                // Nothing buffered: only safe if nothing was missed either,
                // which the caller cannot know here.
                None => None,
                Some(newest) if newest == since => Some(Vec::new()),
                // The caller claims events this process never published.
                Some(newest) if newest < since => None,
                Some(_) => {
                    let oldest = replay.front().map(|e| e.seq).unwrap_or(u64::MAX);
                    if oldest <= since + 1 {
                        Some(replay.iter().filter(|e| e.seq > since).cloned().collect())
                    } else {
                        None
                    }
                }
            }
        });

        Attachment { receiver, replay }
    }

    /// Drop a room's channel. Live receivers observe `Closed`.
    pub fn close_room(&self, room_id: &str) {
        if self.rooms.remove(room_id).is_some() {
            debug!(%room_id, "room channel closed");
        }
    }

    pub fn subscriber_count(&self, room_id: &str) -> usize {
        self.rooms
            .get(room_id)
            .map(|ch| ch.sender.receiver_count())
            .unwrap_or(0)
    }

    /// Sequence number of the newest buffered event of a room.
    pub fn latest_buffered_seq(&self, room_id: &str) -> Option<u64> {
        let ch = self.rooms.get(room_id)?.clone();
        let replay = match ch.replay.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(%room_id, "replay buffer lock poisoned");
                poisoned.into_inner()
            }
        };
        replay.back().map(|e| e.seq)
    }
}

impl std::fmt::Debug for SyncBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncBus")
            .field("rooms", &self.rooms.len())
            .field("capacity", &self.capacity)
            .field("replay_size", &self.replay_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conclave_types::event::RoomEventPayload;

    fn event(room: &str, seq: u64) -> RoomEvent {
        RoomEvent {
            room_id: room.into(),
            seq,
            at: Utc::now(),
            payload: RoomEventPayload::SummaryUpdated {
                summary: format!("v{seq}"),
            },
        }
    }

    #[tokio::test]
    async fn publish_reaches_only_that_rooms_subscribers() {
        let bus = SyncBus::new(16, 16);
        let mut a = bus.attach("a", None).receiver;
        let mut b = bus.attach("b", None).receiver;

        bus.publish(event("a", 1));

        assert_eq!(a.recv().await.unwrap().seq, 1);
        assert!(matches!(
            b.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = SyncBus::default();
        bus.publish(event("general", 1));
        bus.publish(event("general", 2));
        assert_eq!(bus.latest_buffered_seq("general"), Some(2));
    }

    #[test]
    fn attach_replays_events_after_since() {
        let bus = SyncBus::new(16, 16);
        for seq in 1..=5 {
            bus.publish(event("r", seq));
        }
        let attachment = bus.attach("r", Some(3));
        let seqs: Vec<u64> = attachment.replay.unwrap().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![4, 5]);

        let up_to_date = bus.attach("r", Some(5));
        assert_eq!(up_to_date.replay.unwrap().len(), 0);

        assert!(bus.attach("r", Some(9)).replay.is_none());
    }

    #[test]
    fn attach_without_coverage_returns_none() {
        let bus = SyncBus::new(16, 3);
        for seq in 1..=6 {
            bus.publish(event("r", seq));
        }
        // Buffer holds 4..=6, so resuming after 2 would miss seq 3.
        assert!(bus.attach("r", Some(2)).replay.is_none());
        assert_eq!(bus.attach("r", Some(3)).replay.unwrap().len(), 3);
        // Empty buffer never vouches for completeness.
        assert!(bus.attach("fresh", Some(0)).replay.is_none());
    }

    #[tokio::test]
    async fn close_room_closes_receivers() {
        let bus = SyncBus::new(16, 16);
        let mut rx = bus.attach("doomed", None).receiver;
        bus.close_room("doomed");
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert_eq!(bus.subscriber_count("doomed"), 0);
    }

    #[test]
    fn debug_impl() {
        let bus = SyncBus::default();
        let debug = format!("{bus:?}");
        assert!(debug.contains("SyncBus"));
        assert!(debug.contains("replay_size"));
    }
}
