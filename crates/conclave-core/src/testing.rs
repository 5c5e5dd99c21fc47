//! In-memory repositories and scripted collaborators for tests.
//!
//! Enabled for this crate's own tests and, through the `testing` feature,
//! for downstream crates' tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use conclave_types::error::{InvocationError, RepositoryError};
use conclave_types::escalation::{EscalationFilter, EscalationRecord, ResolutionState};
use conclave_types::invocation::{BotOutput, InvocationRequest};
use conclave_types::message::{MessageKind, MessageQuery, RoomMessage, empty_metadata};
use conclave_types::role_card::{
    ProposalStatus, RoleCardLayer, RoleCardOverrides, RoleCardProposal, RoleCardScope,
};
use conclave_types::room::{Room, RoomType};
use uuid::Uuid;

use crate::dispatch::invoker::{BotInvoker, BotOutputStream, ToolExecutor};
use crate::repository::escalation::EscalationRepository;
use crate::repository::role_card::RoleCardRepository;
use crate::repository::room::RoomRepository;
use crate::role_card::builtin::builtin_card;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RoomTables {
    rooms: Vec<Room>,
    messages: Vec<RoomMessage>,
}

/// Room repository backed by vectors. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryRoomRepository {
    tables: Arc<Mutex<RoomTables>>,
    fail_writes: Arc<Mutex<bool>>,
}

impl InMemoryRoomRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a query error.
    pub fn fail_writes(&self, fail: bool) {
        *lock(&self.fail_writes) = fail;
    }

    pub fn message_count(&self, room_id: &str) -> usize {
        lock(&self.tables)
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .count()
    }

    fn check_writable(&self) -> Result<(), RepositoryError> {
        if *lock(&self.fail_writes) {
            return Err(RepositoryError::Query("writes disabled".into()));
        }
        Ok(())
    }
}

fn text_matches(content: &str, query: &str) -> bool {
    let content = content.to_lowercase();
    query
        .split_whitespace()
        .all(|term| content.contains(&term.to_lowercase()))
}

impl RoomRepository for InMemoryRoomRepository {
    async fn put_room(&self, room: &Room) -> Result<(), RepositoryError> {
        self.check_writable()?;
        let mut t = lock(&self.tables);
        match t.rooms.iter_mut().find(|r| r.id == room.id) {
            Some(existing) => *existing = room.clone(),
            None => t.rooms.push(room.clone()),
        }
        Ok(())
    }

    async fn get_room(&self, id: &str) -> Result<Option<Room>, RepositoryError> {
        Ok(lock(&self.tables).rooms.iter().find(|r| r.id == id).cloned())
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, RepositoryError> {
        let mut rooms = lock(&self.tables).rooms.clone();
        rooms.sort_by_key(|r| r.created_at);
        Ok(rooms)
    }

    async fn delete_room(&self, id: &str) -> Result<bool, RepositoryError> {
        self.check_writable()?;
        let mut t = lock(&self.tables);
        let before = t.rooms.len();
        t.rooms.retain(|r| r.id != id);
        t.messages.retain(|m| m.room_id != id);
        Ok(t.rooms.len() != before)
    }

    async fn put_message(&self, message: &RoomMessage) -> Result<(), RepositoryError> {
        self.check_writable()?;
        let mut t = lock(&self.tables);
        if t
            .messages
            .iter()
            .any(|m| m.room_id == message.room_id && m.seq == message.seq)
        {
            return Err(RepositoryError::Conflict(format!(
                "seq {} already used in room '{}'",
                message.seq, message.room_id
            )));
        }
        t.messages.push(message.clone());
        Ok(())
    }

    async fn update_message(&self, message: &RoomMessage) -> Result<(), RepositoryError> {
        self.check_writable()?;
        let mut t = lock(&self.tables);
        let stored = t
            .messages
            .iter_mut()
            .find(|m| m.id == message.id)
            .ok_or(RepositoryError::NotFound)?;
        stored.content = message.content.clone();
        stored.edited_at = message.edited_at;
        Ok(())
    }

    async fn get_message(
        &self,
        room_id: &str,
        id: &Uuid,
    ) -> Result<Option<RoomMessage>, RepositoryError> {
        Ok(lock(&self.tables)
            .messages
            .iter()
            .find(|m| m.room_id == room_id && &m.id == id)
            .cloned())
    }

    async fn query_messages(
        &self,
        room_id: &str,
        query: &MessageQuery,
    ) -> Result<Vec<RoomMessage>, RepositoryError> {
        let t = lock(&self.tables);
        let mut matching: Vec<RoomMessage> = t
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .filter(|m| query.before_seq.is_none_or(|b| m.seq < b))
            .filter(|m| query.after_seq.is_none_or(|a| m.seq > a))
            .filter(|m| query.text.as_deref().is_none_or(|q| text_matches(&m.content, q)))
            .cloned()
            .collect();
        matching.sort_by_key(|m| m.seq);

        let limit = query.effective_limit() as usize;
        if matching.len() > limit {
            if query.after_seq.is_some() && query.before_seq.is_none() {
                matching.truncate(limit);
            } else {
                matching.drain(..matching.len() - limit);
            }
        }
        Ok(matching)
    }

    async fn last_message_seq(&self, room_id: &str) -> Result<u64, RepositoryError> {
        Ok(lock(&self.tables)
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .map(|m| m.seq)
            .max()
            .unwrap_or(0))
    }

    async fn archive_messages(&self, room_id: &str) -> Result<u64, RepositoryError> {
        self.check_writable()?;
        let mut t = lock(&self.tables);
        let mut count = 0;
        for m in t.messages.iter_mut().filter(|m| m.room_id == room_id && !m.archived) {
            m.archived = true;
            count += 1;
        }
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Role cards
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RoleCardTables {
    overrides: HashMap<(String, RoleCardScope), RoleCardLayer>,
    proposals: Vec<RoleCardProposal>,
    read_delay: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct InMemoryRoleCardRepository {
    tables: Arc<Mutex<RoleCardTables>>,
}

impl InMemoryRoleCardRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `get_layers` return its snapshot only after `delay`.
    pub fn delay_reads(&self, delay: Option<Duration>) {
        lock(&self.tables).read_delay = delay;
    }
}

impl RoleCardRepository for InMemoryRoleCardRepository {
    async fn put_override(
        &self,
        bot_id: &str,
        scope: RoleCardScope,
        layer: &RoleCardLayer,
    ) -> Result<(), RepositoryError> {
        lock(&self.tables)
            .overrides
            .insert((bot_id.to_string(), scope), layer.clone());
        Ok(())
    }

    async fn get_layers(&self, bot_id: &str) -> Result<RoleCardOverrides, RepositoryError> {
        let (layers, delay) = {
            let t = lock(&self.tables);
            let layers = RoleCardOverrides {
                workspace: t
                    .overrides
                    .get(&(bot_id.to_string(), RoleCardScope::Workspace))
                    .cloned(),
                global: t
                    .overrides
                    .get(&(bot_id.to_string(), RoleCardScope::Global))
                    .cloned(),
            };
            (layers, t.read_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(layers)
    }

    async fn list_overridden_bots(&self) -> Result<Vec<String>, RepositoryError> {
        let mut bots: Vec<String> = lock(&self.tables)
            .overrides
            .keys()
            .map(|(bot, _)| bot.clone())
            .collect();
        bots.sort();
        bots.dedup();
        Ok(bots)
    }

    async fn put_proposal(&self, proposal: &RoleCardProposal) -> Result<(), RepositoryError> {
        let mut t = lock(&self.tables);
        match t.proposals.iter_mut().find(|p| p.id == proposal.id) {
            Some(existing) => *existing = proposal.clone(),
            None => t.proposals.push(proposal.clone()),
        }
        Ok(())
    }

    async fn get_proposal(&self, id: &Uuid) -> Result<Option<RoleCardProposal>, RepositoryError> {
        Ok(lock(&self.tables)
            .proposals
            .iter()
            .find(|p| &p.id == id)
            .cloned())
    }

    async fn list_proposals(
        &self,
        bot_id: Option<&str>,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<RoleCardProposal>, RepositoryError> {
        let mut proposals: Vec<RoleCardProposal> = lock(&self.tables)
            .proposals
            .iter()
            .filter(|p| bot_id.is_none_or(|b| p.bot_id == b))
            .filter(|p| status.is_none_or(|s| p.status == s))
            .cloned()
            .collect();
        proposals.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(proposals)
    }
}

// ---------------------------------------------------------------------------
// Escalations
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct InMemoryEscalationRepository {
    records: Arc<Mutex<Vec<EscalationRecord>>>,
}

impl InMemoryEscalationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EscalationRepository for InMemoryEscalationRepository {
    async fn insert(&self, record: &EscalationRecord) -> Result<(), RepositoryError> {
        let mut records = lock(&self.records);
        if records.iter().any(|r| r.id == record.id) {
            return Err(RepositoryError::Conflict(format!(
                "escalation '{}' exists",
                record.id
            )));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<EscalationRecord>, RepositoryError> {
        Ok(lock(&self.records).iter().find(|r| &r.id == id).cloned())
    }

    async fn list(
        &self,
        filter: EscalationFilter,
        room_id: Option<&str>,
    ) -> Result<Vec<EscalationRecord>, RepositoryError> {
        let mut records: Vec<EscalationRecord> = lock(&self.records)
            .iter()
            .filter(|r| filter.matches(r.state))
            .filter(|r| room_id.is_none_or(|room| r.room_id == room))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    async fn compare_and_update(
        &self,
        record: &EscalationRecord,
        expected: &[ResolutionState],
    ) -> Result<bool, RepositoryError> {
        let mut records = lock(&self.records);
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(stored) if expected.contains(&stored.state) => {
                *stored = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Script {
    delay: Option<Duration>,
    outputs: Vec<Result<BotOutput, InvocationError>>,
}

/// Invoker that replays queued scripts per bot.
///
/// A bot without a queued script answers `"<bot_id> on it"`.
#[derive(Clone, Default)]
pub struct ScriptedInvoker {
    scripts: Arc<Mutex<HashMap<String, VecDeque<Script>>>>,
    requests: Arc<Mutex<Vec<InvocationRequest>>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outputs of the bot's next invocation.
    pub fn script(&self, bot_id: &str, outputs: Vec<Result<BotOutput, InvocationError>>) {
        self.push(bot_id, Script { delay: None, outputs });
    }

    /// Like [`script`](Self::script), but wait before producing anything.
    pub fn script_delayed(
        &self,
        bot_id: &str,
        delay: Duration,
        outputs: Vec<Result<BotOutput, InvocationError>>,
    ) {
        self.push(
            bot_id,
            Script {
                delay: Some(delay),
                outputs,
            },
        );
    }

    fn push(&self, bot_id: &str, script: Script) {
        lock(&self.scripts)
            .entry(bot_id.to_string())
            .or_default()
            .push_back(script);
    }

    /// Every request received so far, in invocation order.
    pub fn requests(&self) -> Vec<InvocationRequest> {
        lock(&self.requests).clone()
    }

    pub fn invoked_bots(&self) -> Vec<String> {
        lock(&self.requests).iter().map(|r| r.bot_id.clone()).collect()
    }
}

impl BotInvoker for ScriptedInvoker {
    fn name(&self) -> &str {
        "scripted"
    }

    fn invoke(&self, request: InvocationRequest) -> BotOutputStream {
        let script = lock(&self.scripts)
            .get_mut(&request.bot_id)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| Script {
                delay: None,
                outputs: vec![Ok(BotOutput::text(format!("{} on it", request.bot_id)))],
            });
        lock(&self.requests).push(request);

        Box::pin(async_stream::stream! {
            if let Some(delay) = script.delay {
                tokio::time::sleep(delay).await;
            }
            for output in script.outputs {
                yield output;
            }
        })
    }
}

/// Tool executor that records calls and echoes the tool name.
#[derive(Clone, Default)]
pub struct RecordingTools {
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(bot_id, tool)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        lock(&self.calls).clone()
    }
}

impl ToolExecutor for RecordingTools {
    async fn execute(
        &self,
        bot_id: &str,
        tool: &str,
        _arguments: &serde_json::Value,
    ) -> Result<String, InvocationError> {
        lock(&self.calls).push((bot_id.to_string(), tool.to_string()));
        Ok(format!("ran {tool}"))
    }
}

/// A minimal invocation request for invoker tests.
pub fn sample_request(bot_id: &str) -> InvocationRequest {
    let now = Utc::now();
    InvocationRequest {
        bot_id: bot_id.to_string(),
        room_id: "general".into(),
        room_type: RoomType::Open,
        role_card: builtin_card(bot_id).unwrap_or_default(),
        trigger: RoomMessage {
            id: Uuid::now_v7(),
            room_id: "general".into(),
            seq: 1,
            content: "hello".into(),
            kind: MessageKind::Text,
            sender_id: "dana".into(),
            sender_is_bot: false,
            created_at: now,
            reply_to: None,
            edited_at: None,
            metadata: empty_metadata(),
            archived: false,
        },
        prior_turns: vec![],
        delegation_depth: 0,
        delegated_by: None,
    }
}
