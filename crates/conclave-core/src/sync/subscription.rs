//! Room subscriptions: snapshot first, then gap-free live events.
//!
//! The live receiver is attached *before* the snapshot is read, so events
//! produced while the snapshot query runs stay buffered in the receiver.
//! Events already covered by the snapshot are dropped as duplicates by the
//! subscription's [`SequenceTracker`]; a detected gap or channel lag yields a
//! fresh snapshot instead of silently losing data.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use conclave_types::error::RoomError;
use conclave_types::event::{RoomEventPayload, RoomSnapshot, SyncItem};
use futures_util::Stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::bus::SyncBus;
use super::sequence::{Observation, SequenceTracker};

/// Boxed stream of subscription items.
pub type RoomStream = Pin<Box<dyn Stream<Item = Result<SyncItem, RoomError>> + Send>>;

/// Something that can produce a consistent room snapshot.
pub trait SnapshotSource: Send + Sync + 'static {
    fn snapshot(
        &self,
        room_id: &str,
    ) -> impl Future<Output = Result<RoomSnapshot, RoomError>> + Send;
}

/// Subscribe to a room.
///
/// With `resume_after`, events after that sequence number are replayed from
/// the bus buffer when possible and no snapshot is sent; otherwise the
/// stream starts with a snapshot. The stream ends when the room is deleted.
pub fn subscribe<S: SnapshotSource>(
    source: Arc<S>,
    bus: &SyncBus,
    room_id: String,
    resume_after: Option<u64>,
) -> RoomStream {
    // Attach now, not on first poll, so nothing published after this call
    // can be missed.
    let attachment = bus.attach(&room_id, resume_after);

    Box::pin(async_stream::stream! {
        let mut receiver = attachment.receiver;

        let mut tracker = match (resume_after, attachment.replay) {
            (Some(since), Some(replayed)) => {
                debug!(%room_id, since, replayed = replayed.len(), "resuming room subscription");
                let mut tracker = SequenceTracker::starting_at(since);
                for event in replayed {
                    if tracker.observe(event.seq) == Observation::Fresh {
                        yield Ok(SyncItem::Event { event });
                    }
                }
                tracker
            }
            _ => match source.snapshot(&room_id).await {
                Ok(snapshot) => {
                    let tracker = SequenceTracker::starting_at(snapshot.as_of_seq);
                    yield Ok(SyncItem::Snapshot { snapshot, resync: false });
                    tracker
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            },
        };

        loop {
            let needs_resync = match receiver.recv().await {
                Ok(event) => match tracker.observe(event.seq) {
                    Observation::Fresh => {
                        let deleted = matches!(event.payload, RoomEventPayload::RoomDeleted);
                        yield Ok(SyncItem::Event { event });
                        if deleted {
                            return;
                        }
                        false
                    }
                    Observation::Duplicate => false,
                    Observation::Gap { expected, got } => {
                        warn!(%room_id, expected, got, "sequence gap, resynchronizing");
                        true
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%room_id, skipped, "subscriber lagged, resynchronizing");
                    true
                }
                Err(RecvError::Closed) => return,
            };

            if needs_resync {
                match source.snapshot(&room_id).await {
                    Ok(snapshot) => {
                        tracker.reset(snapshot.as_of_seq);
                        yield Ok(SyncItem::Snapshot { snapshot, resync: true });
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conclave_types::event::RoomEvent;
    use conclave_types::room::{Room, RoomType};
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Reports whatever sequence number the test sets as current.
    struct FakeSource {
        as_of: AtomicU64,
    }

    impl SnapshotSource for FakeSource {
        fn snapshot(
            &self,
            room_id: &str,
        ) -> impl Future<Output = Result<RoomSnapshot, RoomError>> + Send {
            let as_of = self.as_of.load(Ordering::SeqCst);
            let room_id = room_id.to_string();
            async move {
                if room_id == "missing" {
                    return Err(RoomError::NotFound(room_id));
                }
                let now = Utc::now();
                Ok(RoomSnapshot {
                    room: Room {
                        id: room_id.clone(),
                        name: room_id,
                        room_type: RoomType::Open,
                        participants: vec!["lead".into()],
                        owner: "dana".into(),
                        summary: String::new(),
                        archived: false,
                        last_seq: as_of,
                        created_at: now,
                        updated_at: now,
                    },
                    messages: vec![],
                    open_escalations: vec![],
                    as_of_seq: as_of,
                })
            }
        }
    }

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

    fn source(as_of: u64) -> Arc<FakeSource> {
        Arc::new(FakeSource {
            as_of: AtomicU64::new(as_of),
        })
    }

    fn seq_of(item: &SyncItem) -> u64 {
        match item {
            SyncItem::Event { event } => event.seq,
            SyncItem::Snapshot { snapshot, .. } => snapshot.as_of_seq,
        }
    }

    #[tokio::test]
    async fn snapshot_comes_first_then_only_newer_events() {
        let bus = SyncBus::new(64, 64);
        let src = source(3);
        let mut stream = subscribe(src, &bus, "r".into(), None);

        // Events 2 and 3 are covered by the snapshot; 4 and 5 are live.
        for seq in 2..=5 {
            bus.publish(event("r", seq));
        }

        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, SyncItem::Snapshot { resync: false, .. }));
        assert_eq!(seq_of(&first), 3);
        assert_eq!(seq_of(&stream.next().await.unwrap().unwrap()), 4);
        assert_eq!(seq_of(&stream.next().await.unwrap().unwrap()), 5);
    }

    #[tokio::test]
    async fn gap_triggers_resync_snapshot() {
        let bus = SyncBus::new(64, 64);
        let src = source(1);
        let mut stream = subscribe(src.clone(), &bus, "r".into(), None);
        assert_eq!(seq_of(&stream.next().await.unwrap().unwrap()), 1);

        // seq 2 never reaches this subscriber.
        src.as_of.store(3, Ordering::SeqCst);
        bus.publish(event("r", 3));
        bus.publish(event("r", 4));

        let resync = stream.next().await.unwrap().unwrap();
        assert!(matches!(resync, SyncItem::Snapshot { resync: true, .. }));
        assert_eq!(seq_of(&resync), 3);
        assert_eq!(seq_of(&stream.next().await.unwrap().unwrap()), 4);
    }

    #[tokio::test]
    async fn lag_triggers_resync_snapshot() {
        let bus = SyncBus::new(2, 0);
        let src = source(0);
        let mut stream = subscribe(src.clone(), &bus, "r".into(), None);
        assert!(matches!(
            stream.next().await.unwrap().unwrap(),
            SyncItem::Snapshot { resync: false, .. }
        ));

        for seq in 1..=6 {
            bus.publish(event("r", seq));
        }
        src.as_of.store(6, Ordering::SeqCst);

        let item = stream.next().await.unwrap().unwrap();
        assert!(matches!(item, SyncItem::Snapshot { resync: true, .. }));
        assert_eq!(seq_of(&item), 6);
    }

    #[tokio::test]
    async fn resume_replays_without_snapshot() {
        let bus = SyncBus::new(64, 64);
        for seq in 1..=4 {
            bus.publish(event("r", seq));
        }
        let mut stream = subscribe(source(4), &bus, "r".into(), Some(2));
        assert_eq!(seq_of(&stream.next().await.unwrap().unwrap()), 3);
        assert_eq!(seq_of(&stream.next().await.unwrap().unwrap()), 4);

        bus.publish(event("r", 5));
        assert_eq!(seq_of(&stream.next().await.unwrap().unwrap()), 5);
    }

    #[tokio::test]
    async fn stream_ends_on_room_deleted() {
        let bus = SyncBus::new(64, 64);
        let mut stream = subscribe(source(0), &bus, "r".into(), None);
        stream.next().await.unwrap().unwrap();

        bus.publish(RoomEvent {
            room_id: "r".into(),
            seq: 1,
            at: Utc::now(),
            payload: RoomEventPayload::RoomDeleted,
        });
        assert!(matches!(
            stream.next().await.unwrap().unwrap(),
            SyncItem::Event { .. }
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn snapshot_error_ends_stream() {
        let bus = SyncBus::default();
        let mut stream = subscribe(source(0), &bus, "missing".into(), None);
        assert!(matches!(
            stream.next().await.unwrap(),
            Err(RoomError::NotFound(_))
        ));
        assert!(stream.next().await.is_none());
    }
}
