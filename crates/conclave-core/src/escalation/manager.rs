//! Escalation Manager: durable records of situations that need a human.
//!
//! Raising never fails on a business rule. The record is inserted first;
//! the room notification (event plus system message) follows and is skipped
//! when the room no longer exists. Resolution is a compare-and-set in the
//! repository, so two concurrent resolvers cannot both succeed.

use std::sync::Arc;

use chrono::Utc;
use conclave_types::error::{EscalationError, RoomError};
use conclave_types::escalation::{
    EscalationFilter, EscalationRecord, ResolutionState,
};
use conclave_types::event::RoomEventPayload;
use conclave_types::message::{MessageDraft, system_event};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::repository::escalation::EscalationRepository;
use crate::repository::role_card::RoleCardRepository;
use crate::repository::room::RoomRepository;
use crate::room::RoomRegistry;

pub struct EscalationManager<E, R, C>
where
    E: EscalationRepository,
    R: RoomRepository,
    C: RoleCardRepository,
{
    repo: E,
    rooms: Arc<RoomRegistry<R, C>>,
}

impl<E, R, C> EscalationManager<E, R, C>
where
    E: EscalationRepository,
    R: RoomRepository,
    C: RoleCardRepository,
{
    pub fn new(repo: E, rooms: Arc<RoomRegistry<R, C>>) -> Self {
        Self { repo, rooms }
    }

    /// Record an escalation and announce it in its room.
    pub async fn raise(
        &self,
        room_id: &str,
        bot_id: Option<&str>,
        reason: &str,
        trigger_id: &str,
    ) -> Result<EscalationRecord, EscalationError> {
        let record = EscalationRecord {
            id: Uuid::now_v7(),
            room_id: room_id.to_string(),
            bot_id: bot_id.map(str::to_string),
            reason: reason.to_string(),
            trigger_id: trigger_id.to_string(),
            state: ResolutionState::Pending,
            created_at: Utc::now(),
            acknowledged_by: None,
            resolved_by: None,
            resolved_at: None,
            resolution_note: None,
        };
        self.repo.insert(&record).await?;
        info!(
            escalation_id = %record.id,
            %room_id,
            bot_id = bot_id.unwrap_or("-"),
            %trigger_id,
            "escalation raised"
        );

        let who = bot_id.unwrap_or("the system");
        self.announce(
            &record,
            RoomEventPayload::EscalationRaised {
                escalation: record.clone(),
            },
            system_event::ESCALATION_RAISED,
            format!("Escalation raised by {who}: {reason}"),
        )
        .await;
        Ok(record)
    }

    pub async fn get(&self, id: &Uuid) -> Result<EscalationRecord, EscalationError> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| EscalationError::NotFound(id.to_string()))
    }

    /// Newest first.
    pub async fn list(
        &self,
        filter: EscalationFilter,
        room_id: Option<&str>,
    ) -> Result<Vec<EscalationRecord>, EscalationError> {
        Ok(self.repo.list(filter, room_id).await?)
    }

    /// Move a pending escalation to acknowledged. Acknowledging twice is a
    /// no-op; a resolved escalation cannot be acknowledged.
    pub async fn acknowledge(&self, id: &Uuid, by: &str) -> Result<EscalationRecord, EscalationError> {
        let current = self.get(id).await?;
        match current.state {
            ResolutionState::Resolved => return Err(EscalationError::AlreadyResolved(id.to_string())),
            ResolutionState::Acknowledged => return Ok(current),
            ResolutionState::Pending => {}
        }

        let mut updated = current;
        updated.state = ResolutionState::Acknowledged;
        updated.acknowledged_by = Some(by.to_string());
        if !self
            .repo
            .compare_and_update(&updated, &[ResolutionState::Pending])
            .await?
        {
            // Lost a race; report whatever won.
            let now = self.get(id).await?;
            return match now.state {
                ResolutionState::Resolved => Err(EscalationError::AlreadyResolved(id.to_string())),
                _ => Ok(now),
            };
        }

        debug!(escalation_id = %id, %by, "escalation acknowledged");
        self.announce_event(
            &updated,
            RoomEventPayload::EscalationAcknowledged {
                escalation: updated.clone(),
            },
        )
        .await;
        Ok(updated)
    }

    /// Resolve an escalation. A second resolve fails with `AlreadyResolved`
    /// and leaves the stored record untouched.
    pub async fn resolve(
        &self,
        id: &Uuid,
        resolver: &str,
        note: Option<&str>,
    ) -> Result<EscalationRecord, EscalationError> {
        let current = self.get(id).await?;
        if current.is_resolved() {
            return Err(EscalationError::AlreadyResolved(id.to_string()));
        }

        let mut updated = current;
        updated.state = ResolutionState::Resolved;
        updated.resolved_by = Some(resolver.to_string());
        updated.resolved_at = Some(Utc::now());
        updated.resolution_note = note.map(str::to_string).filter(|n| !n.trim().is_empty());

        let swapped = self
            .repo
            .compare_and_update(
                &updated,
                &[ResolutionState::Pending, ResolutionState::Acknowledged],
            )
            .await?;
        if !swapped {
            return Err(EscalationError::AlreadyResolved(id.to_string()));
        }

        info!(escalation_id = %id, %resolver, "escalation resolved");
        let content = match &updated.resolution_note {
            Some(note) => format!("Escalation resolved by {resolver}: {note}"),
            None => format!("Escalation resolved by {resolver}"),
        };
        self.announce(
            &updated,
            RoomEventPayload::EscalationResolved {
                escalation: updated.clone(),
            },
            system_event::ESCALATION_RESOLVED,
            content,
        )
        .await;
        Ok(updated)
    }

    /// Event plus system message. Room failures are logged, never returned:
    /// the record is already durable.
    async fn announce(
        &self,
        record: &EscalationRecord,
        payload: RoomEventPayload,
        event: &str,
        content: String,
    ) {
        if !self.announce_event(record, payload).await {
            return;
        }
        let details = serde_json::json!({
            "escalation_id": record.id,
            "trigger_id": record.trigger_id,
            "bot_id": record.bot_id,
        });
        let draft = MessageDraft::system(&record.room_id, event, content, details);
        if let Err(e) = self.rooms.append_message(draft).await {
            warn!(escalation_id = %record.id, room_id = %record.room_id, error = %e, "escalation notice not appended");
        }
    }

    async fn announce_event(&self, record: &EscalationRecord, payload: RoomEventPayload) -> bool {
        match self.rooms.record_event(&record.room_id, payload).await {
            Ok(_) => true,
            Err(RoomError::NotFound(_)) => {
                debug!(escalation_id = %record.id, room_id = %record.room_id, "room gone, escalation stored only");
                false
            }
            Err(e) => {
                warn!(escalation_id = %record.id, room_id = %record.room_id, error = %e, "escalation event not published");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role_card::RoleCardStore;
    use crate::sync::bus::SyncBus;
    use crate::testing::{
        InMemoryEscalationRepository, InMemoryRoleCardRepository, InMemoryRoomRepository,
    };
    use conclave_types::error::ErrorCode;
    use conclave_types::message::MessageQuery;
    use conclave_types::room::DEFAULT_ROOM_ID;

    type Manager = EscalationManager<
        InMemoryEscalationRepository,
        InMemoryRoomRepository,
        InMemoryRoleCardRepository,
    >;

    fn setup() -> (Manager, Arc<RoomRegistry<InMemoryRoomRepository, InMemoryRoleCardRepository>>) {
        let cards = Arc::new(RoleCardStore::new(InMemoryRoleCardRepository::new()));
        let rooms = Arc::new(RoomRegistry::new(
            InMemoryRoomRepository::new(),
            cards,
            SyncBus::default(),
            "lead",
        ));
        (
            EscalationManager::new(InMemoryEscalationRepository::new(), rooms.clone()),
            rooms,
        )
    }

    #[tokio::test]
    async fn raise_stores_and_announces() {
        let (manager, rooms) = setup();
        rooms.get_or_create_default().await.unwrap();
        let mut rx = rooms.bus().attach(DEFAULT_ROOM_ID, None).receiver;

        let record = manager
            .raise(DEFAULT_ROOM_ID, Some("social"), "needs legal review", "legal-or-compliance")
            .await
            .unwrap();
        assert_eq!(record.state, ResolutionState::Pending);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.payload, RoomEventPayload::EscalationRaised { .. }));
        let notice = rx.recv().await.unwrap();
        let RoomEventPayload::MessageAppended { message } = notice.payload else {
            panic!("expected a system message");
        };
        assert!(message.is_system());
        assert_eq!(message.system_event(), Some(system_event::ESCALATION_RAISED));

        let open = manager.list(EscalationFilter::Open, Some(DEFAULT_ROOM_ID)).await.unwrap();
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn raise_in_missing_room_still_stores() {
        let (manager, _rooms) = setup();
        let record = manager.raise("vanished", None, "orphaned", "low_confidence").await.unwrap();
        assert_eq!(manager.get(&record.id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn resolve_twice_is_already_resolved() {
        let (manager, rooms) = setup();
        rooms.get_or_create_default().await.unwrap();
        let record = manager
            .raise(DEFAULT_ROOM_ID, Some("coder"), "unsure", "low_confidence")
            .await
            .unwrap();

        let resolved = manager.resolve(&record.id, "dana", Some("looked fine")).await.unwrap();
        assert_eq!(resolved.state, ResolutionState::Resolved);
        assert_eq!(resolved.resolved_by.as_deref(), Some("dana"));

        let err = manager.resolve(&record.id, "eli", Some("again")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyResolved);
        let stored = manager.get(&record.id).await.unwrap();
        assert_eq!(stored, resolved);

        let history = rooms
            .messages(DEFAULT_ROOM_ID, &MessageQuery::default())
            .await
            .unwrap();
        let resolutions = history
            .iter()
            .filter(|m| m.system_event() == Some(system_event::ESCALATION_RESOLVED))
            .count();
        assert_eq!(resolutions, 1);
    }

    #[tokio::test]
    async fn concurrent_resolvers_one_wins() {
        let (manager, rooms) = setup();
        rooms.get_or_create_default().await.unwrap();
        let record = manager.raise(DEFAULT_ROOM_ID, None, "x", "t").await.unwrap();

        let (a, b) = tokio::join!(
            manager.resolve(&record.id, "dana", None),
            manager.resolve(&record.id, "eli", None)
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    }

    #[tokio::test]
    async fn unknown_escalation_is_not_found() {
        let (manager, _) = setup();
        let err = manager.resolve(&Uuid::now_v7(), "dana", None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn acknowledge_then_resolve() {
        let (manager, rooms) = setup();
        rooms.get_or_create_default().await.unwrap();
        let record = manager.raise(DEFAULT_ROOM_ID, Some("analyst"), "odd numbers", "t").await.unwrap();

        let acked = manager.acknowledge(&record.id, "dana").await.unwrap();
        assert_eq!(acked.state, ResolutionState::Acknowledged);
        let again = manager.acknowledge(&record.id, "eli").await.unwrap();
        assert_eq!(again.acknowledged_by.as_deref(), Some("dana"));

        let pending = manager.list(EscalationFilter::Pending, None).await.unwrap();
        assert!(pending.is_empty());

        manager.resolve(&record.id, "dana", None).await.unwrap();
        let err = manager.acknowledge(&record.id, "dana").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyResolved);
        assert_eq!(manager.list(EscalationFilter::Open, None).await.unwrap().len(), 0);
    }
}
