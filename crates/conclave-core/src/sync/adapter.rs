//! Interface adapters: thin bridges that render room activity on a surface
//! (desktop window, web socket, terminal, messaging platform).
//!
//! An adapter never talks to the registry directly. It receives normalized
//! [`SyncItem`]s through [`pump`] and sends human input back through the
//! inbound path.

use std::future::Future;

use conclave_types::event::{InterfaceKind, SyncItem};
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::subscription::RoomStream;

/// A surface that renders room activity.
pub trait InterfaceAdapter: Send + Sync + 'static {
    fn kind(&self) -> InterfaceKind;

    /// Render one item. Returning an error detaches the adapter from the room.
    fn deliver(&self, item: SyncItem) -> impl Future<Output = Result<(), String>> + Send;
}

/// Feed a room stream into an adapter until the stream ends, delivery
/// fails, or `cancel` fires. Returns the number of items delivered.
pub fn pump<A: InterfaceAdapter>(
    adapter: A,
    mut stream: RoomStream,
    cancel: CancellationToken,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let kind = adapter.kind();
        let mut delivered = 0u64;
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => break,
                item = stream.next() => item,
            };
            match item {
                Some(Ok(item)) => {
                    if let Err(e) = adapter.deliver(item).await {
                        warn!(interface = %kind, error = %e, "adapter delivery failed, detaching");
                        break;
                    }
                    delivered += 1;
                }
                Some(Err(e)) => {
                    warn!(interface = %kind, error = %e, "room subscription failed");
                    break;
                }
                None => break,
            }
        }
        debug!(interface = %kind, delivered, "adapter pump stopped");
        delivered
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::bus::SyncBus;
    use crate::sync::subscription::{SnapshotSource, subscribe};
    use chrono::Utc;
    use conclave_types::error::RoomError;
    use conclave_types::event::{RoomEvent, RoomEventPayload, RoomSnapshot};
    use conclave_types::room::{Room, RoomType};
    use std::sync::{Arc, Mutex};

    struct EmptySource;

    impl SnapshotSource for EmptySource {
        fn snapshot(
            &self,
            room_id: &str,
        ) -> impl Future<Output = Result<RoomSnapshot, RoomError>> + Send {
            let room_id = room_id.to_string();
            async move {
                let now = Utc::now();
                Ok(RoomSnapshot {
                    room: Room {
                        id: room_id.clone(),
                        name: room_id,
                        room_type: RoomType::Open,
                        participants: vec![],
                        owner: "dana".into(),
                        summary: String::new(),
                        archived: false,
                        last_seq: 0,
                        created_at: now,
                        updated_at: now,
                    },
                    messages: vec![],
                    open_escalations: vec![],
                    as_of_seq: 0,
                })
            }
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        items: Arc<Mutex<Vec<SyncItem>>>,
    }

    impl InterfaceAdapter for Recorder {
        fn kind(&self) -> InterfaceKind {
            InterfaceKind::Cli
        }

        fn deliver(&self, item: SyncItem) -> impl Future<Output = Result<(), String>> + Send {
            self.items.lock().unwrap().push(item);
            async { Ok(()) }
        }
    }

    #[tokio::test]
    async fn pump_delivers_until_room_deleted() {
        let bus = SyncBus::default();
        let stream = subscribe(Arc::new(EmptySource), &bus, "r".into(), None);
        let recorder = Recorder::default();
        let handle = pump(recorder.clone(), stream, CancellationToken::new());

        bus.publish(RoomEvent {
            room_id: "r".into(),
            seq: 1,
            at: Utc::now(),
            payload: RoomEventPayload::RoomDeleted,
        });

        assert_eq!(handle.await.unwrap(), 2);
        let items = recorder.items.lock().unwrap();
        assert!(matches!(items[0], SyncItem::Snapshot { .. }));
        assert!(matches!(items[1], SyncItem::Event { .. }));
    }

    #[tokio::test]
    async fn pump_stops_on_cancel() {
        let bus = SyncBus::default();
        let stream = subscribe(Arc::new(EmptySource), &bus, "r".into(), None);
        let cancel = CancellationToken::new();
        let handle = pump(Recorder::default(), stream, cancel.clone());
        cancel.cancel();
        assert!(handle.await.unwrap() <= 1);
    }
}
