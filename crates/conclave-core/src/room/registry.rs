//! Room Registry: the single source of truth and single writer per room.
//!
//! Every mutation of a room runs inside that room's exclusive section (a
//! `tokio::sync::Mutex` per room, kept in a `DashMap`): the next sequence
//! number is assigned, the change is persisted, and the resulting
//! [`RoomEvent`] is published on the [`SyncBus`] before the section is
//! released. Bus order therefore equals sequence order. Model invocations
//! never run inside a section.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use conclave_types::error::{RoleCardError, RoomError};
use conclave_types::event::{RoomEvent, RoomEventPayload};
use conclave_types::message::{MessageDraft, MessageQuery, RoomMessage, empty_metadata};
use conclave_types::room::{
    CreateRoomRequest, DEFAULT_ROOM_ID, DEFAULT_ROOM_NAME, Room, RoomType, room_id_from_name,
};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::repository::role_card::RoleCardRepository;
use crate::repository::room::RoomRepository;
use crate::role_card::RoleCardStore;
use crate::sync::bus::SyncBus;

/// Owner recorded on the default room.
const SYSTEM_OWNER: &str = "system";

/// In-memory state of one room, guarded by the room's exclusive section.
#[derive(Debug, Default)]
struct RoomSlot {
    loaded: bool,
    room: Option<Room>,
    last_seq: u64,
    /// Timestamp of the newest event; keeps timestamps non-decreasing.
    last_at: Option<DateTime<Utc>>,
}

impl RoomSlot {
    fn next(&mut self) -> (u64, DateTime<Utc>) {
        let now = Utc::now();
        let at = match self.last_at {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        (self.last_seq + 1, at)
    }

    fn advance(&mut self, seq: u64, at: DateTime<Utc>) {
        self.last_seq = seq;
        self.last_at = Some(at);
    }
}

/// Consistent view of a room for subscription snapshots.
#[derive(Debug, Clone)]
pub struct RoomView {
    pub room: Room,
    pub messages: Vec<RoomMessage>,
    pub as_of_seq: u64,
}

/// Owns room state, participants, lifecycle and message history.
pub struct RoomRegistry<R: RoomRepository, C: RoleCardRepository> {
    repo: R,
    cards: Arc<RoleCardStore<C>>,
    bus: SyncBus,
    coordinator: String,
    slots: DashMap<String, Arc<Mutex<RoomSlot>>>,
}

impl<R: RoomRepository, C: RoleCardRepository> RoomRegistry<R, C> {
    pub fn new(repo: R, cards: Arc<RoleCardStore<C>>, bus: SyncBus, coordinator: impl Into<String>) -> Self {
        Self {
            repo,
            cards,
            bus,
            coordinator: coordinator.into(),
            slots: DashMap::new(),
        }
    }

    pub fn bus(&self) -> &SyncBus {
        &self.bus
    }

    pub fn coordinator(&self) -> &str {
        &self.coordinator
    }

    /// Enter a room's exclusive section, loading its state on first use.
    async fn enter(&self, room_id: &str) -> Result<OwnedMutexGuard<RoomSlot>, RoomError> {
        let slot = self
            .slots
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RoomSlot::default())))
            .clone();
        let mut guard = slot.lock_owned().await;

        if !guard.loaded {
            let room = self.repo.get_room(room_id).await?;
            let message_seq = self.repo.last_message_seq(room_id).await?;
            let room_seq = room.as_ref().map(|r| r.last_seq).unwrap_or(0);
            guard.last_seq = room_seq.max(message_seq);
            guard.last_at = room.as_ref().map(|r| r.updated_at);
            guard.room = room;
            guard.loaded = true;
        }
        Ok(guard)
    }

    /// Persist a new room state together with its event, then publish.
    async fn commit_room(
        &self,
        slot: &mut RoomSlot,
        mut room: Room,
        payload: RoomEventPayload,
    ) -> Result<RoomEvent, RoomError> {
        let (seq, at) = slot.next();
        room.last_seq = seq;
        room.updated_at = at;
        self.repo.put_room(&room).await?;

        slot.advance(seq, at);
        slot.room = Some(room.clone());
        let event = RoomEvent {
            room_id: room.id,
            seq,
            at,
            payload,
        };
        self.bus.publish(event.clone());
        Ok(event)
    }

    async fn validate_bots(&self, bots: &[String]) -> Result<(), RoomError> {
        for bot in bots {
            let known = match self.cards.is_known_bot(bot).await {
                Ok(known) => known,
                Err(RoleCardError::Storage(e)) => return Err(RoomError::Storage(e)),
                Err(_) => false,
            };
            if !known {
                return Err(RoomError::BotNotFound(bot.clone()));
            }
        }
        Ok(())
    }

    fn default_room(&self, at: DateTime<Utc>) -> Room {
        Room {
            id: DEFAULT_ROOM_ID.to_string(),
            name: DEFAULT_ROOM_NAME.to_string(),
            room_type: RoomType::Open,
            participants: vec![self.coordinator.clone()],
            owner: SYSTEM_OWNER.to_string(),
            summary: String::new(),
            archived: false,
            last_seq: 0,
            created_at: at,
            updated_at: at,
        }
    }

    /// Fetch the default room, creating it on first access.
    pub async fn get_or_create_default(&self) -> Result<Room, RoomError> {
        let mut slot = self.enter(DEFAULT_ROOM_ID).await?;
        if let Some(room) = &slot.room {
            return Ok(room.clone());
        }

        let (_, at) = slot.next();
        let room = self.default_room(at);
        self.repo.put_room(&room).await?;
        slot.last_at = Some(at);
        slot.room = Some(room.clone());
        info!(room_id = DEFAULT_ROOM_ID, coordinator = %self.coordinator, "default room created");
        Ok(room)
    }

    pub async fn get(&self, room_id: &str) -> Result<Room, RoomError> {
        if room_id == DEFAULT_ROOM_ID {
            return self.get_or_create_default().await;
        }
        let slot = self.enter(room_id).await?;
        slot.room
            .clone()
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))
    }

    /// All rooms by creation time, the default room included.
    pub async fn list(&self, include_archived: bool) -> Result<Vec<Room>, RoomError> {
        self.get_or_create_default().await?;
        let rooms = self.repo.list_rooms().await?;
        Ok(rooms
            .into_iter()
            .filter(|r| include_archived || !r.archived)
            .collect())
    }

    /// Create a room. The id is the slug of the name.
    pub async fn create(&self, request: CreateRoomRequest) -> Result<Room, RoomError> {
        let name = request.name.trim();
        let id = room_id_from_name(name);
        if id.is_empty() {
            return Err(RoomError::InvalidName(request.name.clone()));
        }
        if id == DEFAULT_ROOM_ID {
            return Err(RoomError::Duplicate(id));
        }

        let mut participants: Vec<String> = Vec::new();
        for bot in request.participants.iter().map(|b| b.trim().to_lowercase()) {
            if !bot.is_empty() && !participants.contains(&bot) {
                participants.push(bot);
            }
        }
        if participants.is_empty() {
            participants.push(self.coordinator.clone());
        }
        self.validate_bots(&participants).await?;

        let mut slot = self.enter(&id).await?;
        if slot.room.is_some() {
            return Err(RoomError::Duplicate(id));
        }

        let (_, at) = slot.next();
        let room = Room {
            id: id.clone(),
            name: name.to_string(),
            room_type: request.room_type,
            participants,
            owner: request.owner.unwrap_or_else(|| SYSTEM_OWNER.to_string()),
            summary: String::new(),
            archived: false,
            last_seq: slot.last_seq,
            created_at: at,
            updated_at: at,
        };
        self.repo.put_room(&room).await?;
        slot.last_at = Some(at);
        slot.room = Some(room.clone());

        info!(room_id = %id, room_type = %room.room_type, participants = ?room.participants, "room created");
        Ok(room)
    }

    pub async fn list_participants(&self, room_id: &str) -> Result<Vec<String>, RoomError> {
        Ok(self.get(room_id).await?.participants)
    }

    /// Add a bot to a room. Adding a current participant is a no-op.
    pub async fn add_participant(&self, room_id: &str, bot_id: &str) -> Result<Room, RoomError> {
        let bot_id = bot_id.trim().to_lowercase();
        if room_id == DEFAULT_ROOM_ID {
            self.get_or_create_default().await?;
        }
        let mut slot = self.enter(room_id).await?;
        let room = slot
            .room
            .clone()
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;
        if room.has_participant(&bot_id) {
            return Ok(room);
        }
        self.validate_bots(std::slice::from_ref(&bot_id)).await?;

        let mut updated = room;
        updated.participants.push(bot_id.clone());
        let event = self
            .commit_room(
                &mut slot,
                updated,
                RoomEventPayload::ParticipantAdded {
                    bot_id: bot_id.clone(),
                },
            )
            .await?;
        debug!(%room_id, %bot_id, seq = event.seq, "participant added");
        slot.room
            .clone()
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))
    }

    /// Remove a bot from a room. The default room can never become empty.
    pub async fn remove_participant(&self, room_id: &str, bot_id: &str) -> Result<Room, RoomError> {
        let bot_id = bot_id.trim().to_lowercase();
        if room_id == DEFAULT_ROOM_ID {
            self.get_or_create_default().await?;
        }
        let mut slot = self.enter(room_id).await?;
        let room = slot
            .room
            .clone()
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;
        if !room.has_participant(&bot_id) {
            return Ok(room);
        }
        if room.is_default() && room.participants.len() == 1 {
            return Err(RoomError::Protected {
                room_id: room_id.to_string(),
                action: "cannot remove the last participant".into(),
            });
        }

        let mut updated = room;
        updated.participants.retain(|p| p != &bot_id);
        let event = self
            .commit_room(
                &mut slot,
                updated,
                RoomEventPayload::ParticipantRemoved {
                    bot_id: bot_id.clone(),
                },
            )
            .await?;
        debug!(%room_id, %bot_id, seq = event.seq, "participant removed");
        slot.room
            .clone()
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))
    }

    pub async fn update_summary(&self, room_id: &str, summary: &str) -> Result<Room, RoomError> {
        if room_id == DEFAULT_ROOM_ID {
            self.get_or_create_default().await?;
        }
        let mut slot = self.enter(room_id).await?;
        let mut room = slot
            .room
            .clone()
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;
        room.summary = summary.trim().to_string();
        let summary = room.summary.clone();
        self.commit_room(&mut slot, room, RoomEventPayload::SummaryUpdated { summary })
            .await?;
        slot.room
            .clone()
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))
    }

    /// Archive a room and soft-mark its messages. Idempotent.
    pub async fn archive(&self, room_id: &str) -> Result<Room, RoomError> {
        if room_id == DEFAULT_ROOM_ID {
            return Err(RoomError::Protected {
                room_id: room_id.to_string(),
                action: "the default room cannot be archived".into(),
            });
        }
        let mut slot = self.enter(room_id).await?;
        let mut room = slot
            .room
            .clone()
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;
        if room.archived {
            return Ok(room);
        }

        let archived = self.repo.archive_messages(room_id).await?;
        room.archived = true;
        self.commit_room(&mut slot, room, RoomEventPayload::RoomArchived)
            .await?;
        info!(%room_id, messages = archived, "room archived");
        slot.room
            .clone()
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))
    }

    /// Delete a room and its history. The caller cancels in-flight
    /// dispatches first.
    pub async fn delete(&self, room_id: &str) -> Result<(), RoomError> {
        if room_id == DEFAULT_ROOM_ID {
            return Err(RoomError::Protected {
                room_id: room_id.to_string(),
                action: "the default room cannot be deleted".into(),
            });
        }
        let mut slot = self.enter(room_id).await?;
        if slot.room.is_none() {
            return Err(RoomError::NotFound(room_id.to_string()));
        }

        self.repo.delete_room(room_id).await?;
        let (seq, at) = slot.next();
        slot.room = None;
        slot.advance(seq, at);
        self.bus.publish(RoomEvent {
            room_id: room_id.to_string(),
            seq,
            at,
            payload: RoomEventPayload::RoomDeleted,
        });
        self.bus.close_room(room_id);
        // A room recreated under the same name starts a new history.
        slot.last_seq = 0;
        info!(%room_id, "room deleted");
        Ok(())
    }

    /// Append a message: assigns id, timestamp and sequence number,
    /// persists it, then broadcasts `message_appended`.
    pub async fn append_message(&self, draft: MessageDraft) -> Result<RoomMessage, RoomError> {
        let room_id = draft.room_id.clone();
        let mut appended = self.append_batch(&room_id, vec![draft]).await?;
        appended
            .pop()
            .ok_or_else(|| RoomError::NotFound(room_id))
    }

    /// Append several messages to `room_id` under one exclusive section, so
    /// their sequence numbers are contiguous. Each message is persisted and
    /// broadcast before the next; a failed write keeps the ones before it.
    pub async fn append_batch(
        &self,
        room_id: &str,
        drafts: Vec<MessageDraft>,
    ) -> Result<Vec<RoomMessage>, RoomError> {
        if room_id == DEFAULT_ROOM_ID {
            self.get_or_create_default().await?;
        }
        let mut slot = self.enter(room_id).await?;
        if slot.room.is_none() {
            return Err(RoomError::NotFound(room_id.to_string()));
        }

        let mut appended = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let (seq, at) = slot.next();
            let metadata = if draft.metadata.is_object() {
                draft.metadata
            } else {
                empty_metadata()
            };
            let message = RoomMessage {
                id: Uuid::now_v7(),
                room_id: room_id.to_string(),
                seq,
                content: draft.content,
                kind: draft.kind,
                sender_id: draft.sender_id,
                sender_is_bot: draft.sender_is_bot,
                created_at: at,
                reply_to: draft.reply_to,
                edited_at: None,
                metadata,
                archived: false,
            };
            self.repo.put_message(&message).await?;

            slot.advance(seq, at);
            self.bus.publish(RoomEvent {
                room_id: message.room_id.clone(),
                seq,
                at,
                payload: RoomEventPayload::MessageAppended {
                    message: message.clone(),
                },
            });
            debug!(room_id = %message.room_id, seq, sender = %message.sender_id, "message appended");
            appended.push(message);
        }
        Ok(appended)
    }

    /// Replace a message's content and stamp the edit time.
    pub async fn edit_message(
        &self,
        room_id: &str,
        message_id: &Uuid,
        content: &str,
    ) -> Result<RoomMessage, RoomError> {
        let mut slot = self.enter(room_id).await?;
        let mut room = slot
            .room
            .clone()
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;
        let mut message = self
            .repo
            .get_message(room_id, message_id)
            .await?
            .ok_or_else(|| RoomError::MessageNotFound(message_id.to_string()))?;

        let (seq, at) = slot.next();
        message.content = content.to_string();
        message.edited_at = Some(at);
        self.repo.update_message(&message).await?;
        // The message keeps its own seq, so the room row carries the edit's.
        room.last_seq = seq;
        room.updated_at = at;
        self.repo.put_room(&room).await?;

        slot.advance(seq, at);
        slot.room = Some(room);
        self.bus.publish(RoomEvent {
            room_id: room_id.to_string(),
            seq,
            at,
            payload: RoomEventPayload::MessageEdited {
                message: message.clone(),
            },
        });
        Ok(message)
    }

    pub async fn get_message(&self, room_id: &str, message_id: &Uuid) -> Result<RoomMessage, RoomError> {
        self.get(room_id).await?;
        self.repo
            .get_message(room_id, message_id)
            .await?
            .ok_or_else(|| RoomError::MessageNotFound(message_id.to_string()))
    }

    /// Page through or search a room's history (ascending by sequence).
    pub async fn messages(&self, room_id: &str, query: &MessageQuery) -> Result<Vec<RoomMessage>, RoomError> {
        self.get(room_id).await?;
        Ok(self.repo.query_messages(room_id, query).await?)
    }

    /// Publish a mutation owned by another component (bot status,
    /// escalations) under the room's next sequence number.
    pub async fn record_event(&self, room_id: &str, payload: RoomEventPayload) -> Result<RoomEvent, RoomError> {
        if room_id == DEFAULT_ROOM_ID {
            self.get_or_create_default().await?;
        }
        let mut slot = self.enter(room_id).await?;
        let room = slot
            .room
            .clone()
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;
        self.commit_room(&mut slot, room, payload).await
    }

    /// The room, its newest `limit` messages and the sequence number they
    /// are current as of, read inside the exclusive section.
    pub async fn view(&self, room_id: &str, limit: u32) -> Result<RoomView, RoomError> {
        if room_id == DEFAULT_ROOM_ID {
            self.get_or_create_default().await?;
        }
        let slot = self.enter(room_id).await?;
        let room = slot
            .room
            .clone()
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;
        let messages = self
            .repo
            .query_messages(room_id, &MessageQuery::latest(limit))
            .await?;
        Ok(RoomView {
            room,
            messages,
            as_of_seq: slot.last_seq,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryRoleCardRepository, InMemoryRoomRepository};
    use conclave_types::error::ErrorCode;
    use conclave_types::message::MessageKind;
    use futures_util::future::join_all;

    fn registry_with(repo: InMemoryRoomRepository) -> RoomRegistry<InMemoryRoomRepository, InMemoryRoleCardRepository> {
        let cards = Arc::new(RoleCardStore::new(InMemoryRoleCardRepository::new()));
        RoomRegistry::new(repo, cards, SyncBus::default(), "lead")
    }

    fn registry() -> RoomRegistry<InMemoryRoomRepository, InMemoryRoleCardRepository> {
        registry_with(InMemoryRoomRepository::new())
    }

    fn request(name: &str, participants: &[&str]) -> CreateRoomRequest {
        CreateRoomRequest {
            name: name.into(),
            room_type: RoomType::Project,
            participants: participants.iter().map(|p| p.to_string()).collect(),
            owner: Some("dana".into()),
        }
    }

    #[tokio::test]
    async fn default_room_is_created_once() {
        let reg = registry();
        let first = reg.get_or_create_default().await.unwrap();
        let second = reg.get(DEFAULT_ROOM_ID).await.unwrap();
        assert_eq!(first.participants, vec!["lead"]);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(reg.list(false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_launch_room() {
        let reg = registry();
        let room = reg
            .create(request("Launch", &["researcher", "coder", "researcher"]))
            .await
            .unwrap();
        assert_eq!(room.id, "launch");
        assert_eq!(room.participants, vec!["researcher", "coder"]);
        assert_eq!(room.owner, "dana");

        let err = reg.create(request("LAUNCH", &[])).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateRoom);
    }

    #[tokio::test]
    async fn create_defaults_participants_and_validates_bots() {
        let reg = registry();
        let room = reg.create(request("Quiet corner", &[])).await.unwrap();
        assert_eq!(room.id, "quiet-corner");
        assert_eq!(room.participants, vec!["lead"]);

        let err = reg.create(request("ghosts", &["ghost"])).await.unwrap_err();
        assert!(matches!(err, RoomError::BotNotFound(b) if b == "ghost"));

        let err = reg.create(request(" !! ", &[])).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn default_room_is_protected() {
        let reg = registry();
        reg.get_or_create_default().await.unwrap();

        let err = reg.delete(DEFAULT_ROOM_ID).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtectedRoom);
        let err = reg.remove_participant(DEFAULT_ROOM_ID, "lead").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtectedRoom);
        let err = reg.archive(DEFAULT_ROOM_ID).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtectedRoom);

        // With a second participant the coordinator may leave.
        reg.add_participant(DEFAULT_ROOM_ID, "writer").await.unwrap();
        let room = reg.remove_participant(DEFAULT_ROOM_ID, "lead").await.unwrap();
        assert_eq!(room.participants, vec!["writer"]);
        assert!(reg.remove_participant(DEFAULT_ROOM_ID, "writer").await.is_err());
    }

    #[tokio::test]
    async fn participant_changes_emit_events() {
        let reg = registry();
        reg.create(request("launch", &["coder"])).await.unwrap();
        let mut rx = reg.bus().attach("launch", None).receiver;

        reg.add_participant("launch", "writer").await.unwrap();
        let same = reg.add_participant("launch", "writer").await.unwrap();
        assert_eq!(same.participants, vec!["coder", "writer"]);
        reg.remove_participant("launch", "coder").await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first.payload, RoomEventPayload::ParticipantAdded { .. }));
        assert!(matches!(second.payload, RoomEventPayload::ParticipantRemoved { .. }));
        assert_eq!((first.seq, second.seq), (1, 2));
        assert!(rx.try_recv().is_err());

        assert!(matches!(
            reg.add_participant("nowhere", "coder").await,
            Err(RoomError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_appends_get_unique_increasing_seqs() {
        let reg = Arc::new(registry());
        reg.get_or_create_default().await.unwrap();
        let mut rx = reg.bus().attach(DEFAULT_ROOM_ID, None).receiver;

        let appends = (0..20).map(|i| {
            let reg = reg.clone();
            async move {
                reg.append_message(MessageDraft::human(DEFAULT_ROOM_ID, "dana", format!("m{i}")))
                    .await
                    .unwrap()
            }
        });
        let mut seqs: Vec<u64> = join_all(appends).await.iter().map(|m| m.seq).collect();
        seqs.sort();
        assert_eq!(seqs, (1..=20).collect::<Vec<_>>());

        // Bus order equals sequence order.
        for expected in 1..=20 {
            assert_eq!(rx.recv().await.unwrap().seq, expected);
        }
    }

    #[tokio::test]
    async fn sequence_survives_reload() {
        let repo = InMemoryRoomRepository::new();
        {
            let reg = registry_with(repo.clone());
            reg.get_or_create_default().await.unwrap();
            for i in 0..3 {
                reg.append_message(MessageDraft::human(DEFAULT_ROOM_ID, "dana", format!("m{i}")))
                    .await
                    .unwrap();
            }
        }
        let reg = registry_with(repo);
        let next = reg
            .append_message(MessageDraft::human(DEFAULT_ROOM_ID, "dana", "again"))
            .await
            .unwrap();
        assert_eq!(next.seq, 4);
    }

    #[tokio::test]
    async fn sequence_survives_reload_after_an_edit() {
        let repo = InMemoryRoomRepository::new();
        let edit_seq = {
            let reg = registry_with(repo.clone());
            let first = reg
                .append_message(MessageDraft::human(DEFAULT_ROOM_ID, "dana", "draft"))
                .await
                .unwrap();
            reg.edit_message(DEFAULT_ROOM_ID, &first.id, "final").await.unwrap();
            reg.view(DEFAULT_ROOM_ID, 1).await.unwrap().as_of_seq
        };

        let reg = registry_with(repo);
        let next = reg
            .append_message(MessageDraft::human(DEFAULT_ROOM_ID, "dana", "after restart"))
            .await
            .unwrap();
        assert!(next.seq > edit_seq, "seq {} reused after edit {edit_seq}", next.seq);
    }

    #[tokio::test]
    async fn concurrent_batches_get_contiguous_seqs() {
        let reg = Arc::new(registry());
        reg.get_or_create_default().await.unwrap();

        let batches = ["researcher", "writer", "analyst"].map(|bot| {
            let reg = reg.clone();
            tokio::spawn(async move {
                let drafts = (0..4)
                    .map(|i| MessageDraft::bot(DEFAULT_ROOM_ID, bot, MessageKind::Text, format!("{bot} {i}")))
                    .collect();
                reg.append_batch(DEFAULT_ROOM_ID, drafts).await.unwrap()
            })
        });
        for batch in join_all(batches).await {
            let seqs: Vec<u64> = batch.unwrap().iter().map(|m| m.seq).collect();
            assert_eq!(seqs.len(), 4);
            assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1), "split batch: {seqs:?}");
        }
    }

    #[tokio::test]
    async fn failed_write_does_not_consume_a_seq() {
        let repo = InMemoryRoomRepository::new();
        let reg = registry_with(repo.clone());
        reg.get_or_create_default().await.unwrap();

        repo.fail_writes(true);
        let err = reg
            .append_message(MessageDraft::human(DEFAULT_ROOM_ID, "dana", "lost"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::StorageError);

        repo.fail_writes(false);
        let ok = reg
            .append_message(MessageDraft::human(DEFAULT_ROOM_ID, "dana", "kept"))
            .await
            .unwrap();
        assert_eq!(ok.seq, 1);
    }

    #[tokio::test]
    async fn edit_and_search_messages() {
        let reg = registry();
        reg.create(request("launch", &["coder"])).await.unwrap();
        let msg = reg
            .append_message(MessageDraft::human("launch", "dana", "draft the release notes"))
            .await
            .unwrap();
        reg.append_message(MessageDraft::human("launch", "dana", "lunch at noon"))
            .await
            .unwrap();

        let edited = reg
            .edit_message("launch", &msg.id, "draft the changelog")
            .await
            .unwrap();
        assert!(edited.edited_at.is_some());
        assert_eq!(edited.seq, msg.seq);

        let hits = reg
            .messages(
                "launch",
                &MessageQuery {
                    text: Some("changelog".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, msg.id);

        let missing = reg.edit_message("launch", &Uuid::now_v7(), "x").await.unwrap_err();
        assert_eq!(missing.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn archive_marks_messages_and_hides_room() {
        let repo = InMemoryRoomRepository::new();
        let reg = registry_with(repo.clone());
        reg.create(request("old", &[])).await.unwrap();
        reg.append_message(MessageDraft::human("old", "dana", "bye")).await.unwrap();

        let room = reg.archive("old").await.unwrap();
        assert!(room.archived);
        let history = reg.messages("old", &MessageQuery::default()).await.unwrap();
        assert!(history.iter().all(|m| m.archived));

        let visible = reg.list(false).await.unwrap();
        assert!(visible.iter().all(|r| r.id != "old"));
        assert_eq!(reg.list(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_publishes_and_removes_history() {
        let repo = InMemoryRoomRepository::new();
        let reg = registry_with(repo.clone());
        reg.create(request("scratch", &[])).await.unwrap();
        reg.append_message(MessageDraft::human("scratch", "dana", "tmp")).await.unwrap();
        let mut rx = reg.bus().attach("scratch", None).receiver;

        reg.delete("scratch").await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload, RoomEventPayload::RoomDeleted);
        assert_eq!(event.seq, 2);
        assert_eq!(repo.message_count("scratch"), 0);
        assert!(matches!(reg.get("scratch").await, Err(RoomError::NotFound(_))));
        assert!(matches!(reg.delete("scratch").await, Err(RoomError::NotFound(_))));

        // Same name starts over.
        reg.create(request("scratch", &[])).await.unwrap();
        let first = reg
            .append_message(MessageDraft::human("scratch", "dana", "again"))
            .await
            .unwrap();
        assert_eq!(first.seq, 1);
    }

    #[tokio::test]
    async fn view_is_consistent_with_seq() {
        let reg = registry();
        reg.get_or_create_default().await.unwrap();
        for i in 0..5 {
            reg.append_message(MessageDraft::human(DEFAULT_ROOM_ID, "dana", format!("m{i}")))
                .await
                .unwrap();
        }
        reg.update_summary(DEFAULT_ROOM_ID, "planning").await.unwrap();

        let view = reg.view(DEFAULT_ROOM_ID, 2).await.unwrap();
        assert_eq!(view.as_of_seq, 6);
        assert_eq!(view.room.summary, "planning");
        let seqs: Vec<u64> = view.messages.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![4, 5]);
    }
}
