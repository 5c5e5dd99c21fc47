//! `Conclave`: the assembled engine.
//!
//! Wires the Role Card Store, Room Registry, Escalation Manager, Dispatcher
//! and Synchronization Bus over three repositories, and exposes the inbound
//! path (`ingest`) and the outbound path (`subscribe` / `resume`) that every
//! interface adapter uses.

use std::sync::Arc;

use conclave_types::config::ConclaveConfig;
use conclave_types::dispatch::DispatchReport;
use conclave_types::error::{DispatchError, EscalationError, RepositoryError, RoomError};
use conclave_types::escalation::EscalationFilter;
use conclave_types::event::{InboundEvent, RoomSnapshot};
use conclave_types::message::RoomMessage;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::constraint::ConstraintEngine;
use crate::dispatch::{BotInvoker, BoxToolExecutor, DispatchSettings, Dispatcher};
use crate::escalation::EscalationManager;
use crate::repository::escalation::EscalationRepository;
use crate::repository::role_card::RoleCardRepository;
use crate::repository::room::RoomRepository;
use crate::role_card::RoleCardStore;
use crate::room::RoomRegistry;
use crate::sync::{
    InboundNormalizer, InterfaceAdapter, Normalized, RoomStream, SnapshotSource, SyncBus, pump,
    subscribe,
};

/// Builds subscription snapshots from the registry and the open escalations.
pub struct Snapshots<R, C, E>
where
    R: RoomRepository,
    C: RoleCardRepository,
    E: EscalationRepository,
{
    rooms: Arc<RoomRegistry<R, C>>,
    escalations: Arc<EscalationManager<E, R, C>>,
    message_limit: u32,
}

impl<R, C, E> SnapshotSource for Snapshots<R, C, E>
where
    R: RoomRepository + 'static,
    C: RoleCardRepository + 'static,
    E: EscalationRepository + 'static,
{
    async fn snapshot(&self, room_id: &str) -> Result<RoomSnapshot, RoomError> {
        let view = self.rooms.view(room_id, self.message_limit).await?;
        // Read after the view: may include escalations newer than
        // `as_of_seq`, which clients upsert by id.
        let open_escalations = self
            .escalations
            .list(EscalationFilter::Open, Some(room_id))
            .await
            .map_err(|e| match e {
                EscalationError::Storage(e) => RoomError::Storage(e),
                other => RoomError::Storage(RepositoryError::Query(other.to_string())),
            })?;
        Ok(RoomSnapshot {
            room: view.room,
            messages: view.messages,
            open_escalations,
            as_of_seq: view.as_of_seq,
        })
    }
}

pub struct Conclave<R, C, E>
where
    R: RoomRepository,
    C: RoleCardRepository,
    E: EscalationRepository,
{
    config: ConclaveConfig,
    bus: SyncBus,
    cards: Arc<RoleCardStore<C>>,
    rooms: Arc<RoomRegistry<R, C>>,
    escalations: Arc<EscalationManager<E, R, C>>,
    dispatcher: Arc<Dispatcher<R, C, E>>,
    snapshots: Arc<Snapshots<R, C, E>>,
    inbound: InboundNormalizer,
}

impl<R, C, E> Conclave<R, C, E>
where
    R: RoomRepository + 'static,
    C: RoleCardRepository + 'static,
    E: EscalationRepository + 'static,
{
    pub fn new(
        config: ConclaveConfig,
        room_repo: R,
        card_repo: C,
        escalation_repo: E,
        invoker: Arc<dyn BotInvoker>,
        tools: BoxToolExecutor,
    ) -> Self {
        let bus = SyncBus::new(config.event_channel_capacity, config.replay_buffer_size);
        let cards = Arc::new(RoleCardStore::new(card_repo));
        let rooms = Arc::new(RoomRegistry::new(
            room_repo,
            cards.clone(),
            bus.clone(),
            config.coordinator_bot.clone(),
        ));
        let escalations = Arc::new(EscalationManager::new(escalation_repo, rooms.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            rooms.clone(),
            cards.clone(),
            escalations.clone(),
            ConstraintEngine::new(config.escalation_confidence_threshold),
            invoker,
            tools,
            DispatchSettings::from(&config),
        ));
        let snapshots = Arc::new(Snapshots {
            rooms: rooms.clone(),
            escalations: escalations.clone(),
            message_limit: config.snapshot_message_limit,
        });
        let inbound = InboundNormalizer::new(config.inbound_dedup_window);

        Self {
            config,
            bus,
            cards,
            rooms,
            escalations,
            dispatcher,
            snapshots,
            inbound,
        }
    }

    pub fn config(&self) -> &ConclaveConfig {
        &self.config
    }

    pub fn bus(&self) -> &SyncBus {
        &self.bus
    }

    pub fn cards(&self) -> &Arc<RoleCardStore<C>> {
        &self.cards
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry<R, C>> {
        &self.rooms
    }

    pub fn escalations(&self) -> &Arc<EscalationManager<E, R, C>> {
        &self.escalations
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<R, C, E>> {
        &self.dispatcher
    }

    /// Normalize, append and persist an inbound human message. Returns
    /// `None` for redeliveries and blank input. Dispatch runs in the
    /// background; its outcome is visible in the room.
    pub async fn ingest(&self, event: InboundEvent) -> Result<Option<RoomMessage>, RoomError> {
        let Some(message) = self.append_inbound(event).await? else {
            return Ok(None);
        };

        let dispatcher = self.dispatcher.clone();
        let trigger = message.clone();
        tokio::spawn(async move {
            let room_id = trigger.room_id.clone();
            if let Err(e) = dispatcher.dispatch(trigger).await {
                warn!(%room_id, error = %e, "dispatch failed");
            }
        });
        Ok(Some(message))
    }

    /// Like [`ingest`](Self::ingest), but waits for the dispatch (every bot
    /// and delegation) to finish.
    pub async fn ingest_and_wait(
        &self,
        event: InboundEvent,
    ) -> Result<Option<(RoomMessage, DispatchReport)>, DispatchError> {
        let Some(message) = self.append_inbound(event).await? else {
            return Ok(None);
        };
        let report = self.dispatcher.dispatch(message.clone()).await?;
        Ok(Some((message, report)))
    }

    async fn append_inbound(&self, event: InboundEvent) -> Result<Option<RoomMessage>, RoomError> {
        let interface = event.interface.clone();
        let draft = match self.inbound.normalize(event) {
            Normalized::Draft(draft) => draft,
            Normalized::Duplicate | Normalized::Empty => return Ok(None),
        };
        let message = self.rooms.append_message(draft).await?;
        debug!(room_id = %message.room_id, seq = message.seq, %interface, "inbound message accepted");
        Ok(Some(message))
    }

    /// Snapshot, then live events.
    pub fn subscribe(&self, room_id: &str) -> RoomStream {
        subscribe(self.snapshots.clone(), &self.bus, room_id.to_string(), None)
    }

    /// Events after `last_seen_seq`, replayed from the bus buffer when
    /// possible, otherwise a fresh snapshot first.
    pub fn resume(&self, room_id: &str, last_seen_seq: u64) -> RoomStream {
        subscribe(
            self.snapshots.clone(),
            &self.bus,
            room_id.to_string(),
            Some(last_seen_seq),
        )
    }

    pub async fn snapshot(&self, room_id: &str) -> Result<RoomSnapshot, RoomError> {
        self.snapshots.snapshot(room_id).await
    }

    /// Tail a room into an interface adapter until `cancel` fires.
    pub fn attach<A: InterfaceAdapter>(
        &self,
        adapter: A,
        room_id: &str,
        cancel: CancellationToken,
    ) -> JoinHandle<u64> {
        pump(adapter, self.subscribe(room_id), cancel)
    }

    /// Cancel the room's in-flight dispatches, then delete it.
    pub async fn delete_room(&self, room_id: &str) -> Result<(), RoomError> {
        self.rooms.get(room_id).await?;
        self.dispatcher.cancel(room_id);
        self.rooms.delete(room_id).await?;
        // A dispatch may have registered between the cancel and the delete.
        self.dispatcher.cancel(room_id);
        self.inbound.forget_room(room_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        InMemoryEscalationRepository, InMemoryRoleCardRepository, InMemoryRoomRepository,
        ScriptedInvoker,
    };
    use conclave_types::event::{InterfaceKind, RoomEventPayload, SyncItem};
    use conclave_types::message::MessageQuery;
    use conclave_types::room::{CreateRoomRequest, DEFAULT_ROOM_ID, RoomType};
    use futures_util::StreamExt;

    type TestConclave =
        Conclave<InMemoryRoomRepository, InMemoryRoleCardRepository, InMemoryEscalationRepository>;

    fn conclave(invoker: ScriptedInvoker) -> TestConclave {
        Conclave::new(
            ConclaveConfig::default(),
            InMemoryRoomRepository::new(),
            InMemoryRoleCardRepository::new(),
            InMemoryEscalationRepository::new(),
            Arc::new(invoker),
            BoxToolExecutor::default(),
        )
    }

    fn web(room: &str, content: &str) -> InboundEvent {
        InboundEvent::text(InterfaceKind::Web, room, "dana", content)
    }

    #[tokio::test]
    async fn ingest_and_wait_runs_the_coordinator() {
        let invoker = ScriptedInvoker::new();
        let app = conclave(invoker.clone());

        let (message, report) = app
            .ingest_and_wait(web("", "what is on the plan today?"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.room_id, DEFAULT_ROOM_ID);
        assert_eq!(report.targets.len(), 1);
        assert_eq!(report.targets[0].bot_id, "lead");
        assert_eq!(invoker.invoked_bots(), vec!["lead"]);

        let history = app
            .rooms()
            .messages(DEFAULT_ROOM_ID, &MessageQuery::default())
            .await
            .unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.sender_id, "lead");
        assert_eq!(last.reply_to, Some(message.id));
    }

    #[tokio::test]
    async fn redelivered_inbound_is_ignored() {
        let app = conclave(ScriptedInvoker::new());
        let mut event = web("general", "hello");
        event.client_event_id = Some("evt-9".into());

        assert!(app.ingest(event.clone()).await.unwrap().is_some());
        assert!(app.ingest(event).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ingest_into_missing_room_is_not_found() {
        let app = conclave(ScriptedInvoker::new());
        let err = app.ingest(web("nowhere", "hi")).await.unwrap_err();
        assert!(matches!(err, RoomError::NotFound(_)));
    }

    #[tokio::test]
    async fn late_subscriber_snapshot_is_a_prefix_of_the_live_stream() {
        let app = conclave(ScriptedInvoker::new());
        app.rooms().get_or_create_default().await.unwrap();
        let mut early = app.subscribe(DEFAULT_ROOM_ID);
        let SyncItem::Snapshot { snapshot, .. } = early.next().await.unwrap().unwrap() else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.as_of_seq, 0);

        app.ingest_and_wait(web(DEFAULT_ROOM_ID, "first")).await.unwrap();

        let mut late = app.subscribe(DEFAULT_ROOM_ID);
        let SyncItem::Snapshot { snapshot: late_snapshot, .. } = late.next().await.unwrap().unwrap()
        else {
            panic!("expected snapshot");
        };

        // The early subscriber sees, as live events, exactly the messages
        // the late snapshot contains, in the same order.
        let mut live_messages = Vec::new();
        while live_messages.len() < late_snapshot.messages.len() {
            if let SyncItem::Event { event } = early.next().await.unwrap().unwrap() {
                assert!(event.seq <= late_snapshot.as_of_seq);
                if let RoomEventPayload::MessageAppended { message } = event.payload {
                    live_messages.push(message);
                }
            }
        }
        assert_eq!(live_messages, late_snapshot.messages);

        app.ingest_and_wait(web(DEFAULT_ROOM_ID, "second")).await.unwrap();
        let SyncItem::Event { event: next_late } = late.next().await.unwrap().unwrap() else {
            panic!("expected event");
        };
        assert_eq!(next_late.seq, late_snapshot.as_of_seq + 1);
    }

    #[tokio::test]
    async fn resume_replays_missed_events() {
        let app = conclave(ScriptedInvoker::new());
        app.rooms().get_or_create_default().await.unwrap();
        let first = app.ingest_and_wait(web(DEFAULT_ROOM_ID, "one")).await.unwrap().unwrap().0;
        app.ingest_and_wait(web(DEFAULT_ROOM_ID, "two")).await.unwrap();

        let mut stream = app.resume(DEFAULT_ROOM_ID, first.seq);
        let SyncItem::Event { event } = stream.next().await.unwrap().unwrap() else {
            panic!("resume should not start with a snapshot");
        };
        assert_eq!(event.seq, first.seq + 1);
    }

    #[tokio::test]
    async fn delete_room_drops_per_room_state() {
        let app = conclave(ScriptedInvoker::new());
        let scratch = || CreateRoomRequest {
            name: "Scratch".into(),
            room_type: RoomType::Open,
            participants: vec![],
            owner: None,
        };
        app.rooms().create(scratch()).await.unwrap();
        let mut event = web("scratch", "first pass");
        event.client_event_id = Some("evt-1".into());
        assert!(app.ingest_and_wait(event.clone()).await.unwrap().is_some());

        app.delete_room("scratch").await.unwrap();
        assert!(!app.dispatcher().cancel("scratch"));

        // A recreated room does not inherit the old room's dedup window.
        app.rooms().create(scratch()).await.unwrap();
        assert!(app.ingest(event).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_room_ends_subscriptions() {
        let app = conclave(ScriptedInvoker::new());
        app.rooms()
            .create(CreateRoomRequest {
                name: "Scratch".into(),
                room_type: RoomType::Open,
                participants: vec![],
                owner: None,
            })
            .await
            .unwrap();
        let mut stream = app.subscribe("scratch");
        stream.next().await.unwrap().unwrap();

        app.delete_room("scratch").await.unwrap();
        let SyncItem::Event { event } = stream.next().await.unwrap().unwrap() else {
            panic!("expected event");
        };
        assert_eq!(event.payload, RoomEventPayload::RoomDeleted);
        assert!(stream.next().await.is_none());
    }
}
