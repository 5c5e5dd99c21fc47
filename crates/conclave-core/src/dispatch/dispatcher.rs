//! Dispatcher: routes an inbound message to bots and drives their work.
//!
//! A dispatch resolves its targets, then runs one task per target bot on a
//! `JoinSet`. Delegations do not recurse: a finished task hands back
//! follow-up tasks (depth + 1) which go through the same bounded work queue.
//! Every externally effective step (model invocation, tool execution,
//! delegation) is checked by the [`ConstraintEngine`] first.
//!
//! A task's output is buffered while the bot streams and appended through
//! the Room Registry as one contiguous batch once the invocation completes,
//! so bots targeted by the same message land in completion order and a
//! cancelled invocation leaves nothing behind.

use std::collections::VecDeque;
use std::sync::Arc;

use conclave_types::action::{
    ActionCategory, ActionContext, ActionDescriptor, ActionKind, Decision,
};
use conclave_types::bot::{BotStatus, BotStatusChange, BotSummary};
use conclave_types::config::ConclaveConfig;
use conclave_types::dispatch::{DispatchOutcome, DispatchReport, TargetReport};
use conclave_types::error::{DispatchError, ErrorCode, InvocationError, RoleCardError, RoomError};
use conclave_types::escalation::BOT_REQUEST_TRIGGER;
use conclave_types::event::RoomEventPayload;
use conclave_types::invocation::{BotOutput, InvocationRequest};
use conclave_types::message::{MessageDraft, MessageKind, MessageQuery, RoomMessage, system_event};
use conclave_types::role_card::RoleCard;
use conclave_types::room::Room;
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::constraint::ConstraintEngine;
use crate::escalation::EscalationManager;
use crate::repository::escalation::EscalationRepository;
use crate::repository::role_card::RoleCardRepository;
use crate::repository::room::RoomRepository;
use crate::role_card::RoleCardStore;
use crate::room::RoomRegistry;

use super::invoker::{BotInvoker, BoxToolExecutor};
use super::mentions::extract_mentions;
use super::status::StatusBoard;

/// Default cap on tasks (initial targets plus delegations) per dispatch.
pub const DEFAULT_MAX_TASKS: usize = 32;

/// Tunables of the Dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    /// Bot that answers messages without mentions.
    pub coordinator: String,
    pub max_delegation_depth: u32,
    /// Recent messages handed to the model.
    pub prior_turns: u32,
    pub max_tasks: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from(&ConclaveConfig::default())
    }
}

impl From<&ConclaveConfig> for DispatchSettings {
    fn from(config: &ConclaveConfig) -> Self {
        Self {
            coordinator: config.coordinator_bot.clone(),
            max_delegation_depth: config.max_delegation_depth,
            prior_turns: config.prior_turns,
            max_tasks: DEFAULT_MAX_TASKS,
        }
    }
}

/// One unit of bot work.
#[derive(Debug, Clone)]
struct Task {
    bot_id: String,
    depth: u32,
    /// The human message, or the delegation message for follow-ups.
    trigger: RoomMessage,
    delegated_by: Option<String>,
}

/// Output held back until the invocation completes.
#[derive(Debug)]
enum Pending {
    /// Bot-authored content; its id is reported.
    Message(MessageDraft),
    /// System notice.
    Notice(MessageDraft),
    /// Delegation message, becomes the trigger of a follow-up task.
    Delegation { draft: MessageDraft, to_bot: String },
    Escalation { reason: String, trigger_id: String },
}

struct TaskResult {
    report: TargetReport,
    follow_ups: Vec<Task>,
}

/// What a finished invocation produced.
struct Invocation {
    pending: Vec<Pending>,
    response: String,
    confidence: Option<f32>,
}

pub struct Dispatcher<R, C, E>
where
    R: RoomRepository,
    C: RoleCardRepository,
    E: EscalationRepository,
{
    rooms: Arc<RoomRegistry<R, C>>,
    cards: Arc<RoleCardStore<C>>,
    escalations: Arc<EscalationManager<E, R, C>>,
    engine: ConstraintEngine,
    invoker: Arc<dyn BotInvoker>,
    tools: Arc<BoxToolExecutor>,
    status: StatusBoard,
    cancellations: DashMap<String, CancellationToken>,
    settings: DispatchSettings,
}

impl<R, C, E> Dispatcher<R, C, E>
where
    R: RoomRepository + 'static,
    C: RoleCardRepository + 'static,
    E: EscalationRepository + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rooms: Arc<RoomRegistry<R, C>>,
        cards: Arc<RoleCardStore<C>>,
        escalations: Arc<EscalationManager<E, R, C>>,
        engine: ConstraintEngine,
        invoker: Arc<dyn BotInvoker>,
        tools: BoxToolExecutor,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            rooms,
            cards,
            escalations,
            engine,
            invoker,
            tools: Arc::new(tools),
            status: StatusBoard::new(),
            cancellations: DashMap::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Bot status
    // -----------------------------------------------------------------------

    /// Every known bot with its current status.
    pub async fn roster(&self) -> Result<Vec<BotSummary>, RoleCardError> {
        Ok(self
            .cards
            .roster()
            .await?
            .into_iter()
            .map(|profile| {
                let status = self.status.get(&profile.id);
                BotSummary { profile, status }
            })
            .collect())
    }

    pub fn status_of(&self, bot_id: &str) -> BotStatus {
        self.status.get(bot_id)
    }

    /// Mark a bot `away`, `offline` or back `online`.
    pub async fn set_status(&self, bot_id: &str, status: BotStatus) -> Result<BotStatus, RoomError> {
        let known = match self.cards.is_known_bot(bot_id).await {
            Ok(known) => known,
            Err(RoleCardError::Storage(e)) => return Err(RoomError::Storage(e)),
            Err(_) => false,
        };
        if !known {
            return Err(RoomError::BotNotFound(bot_id.to_string()));
        }
        if self.status.set(bot_id, status).is_some() {
            info!(%bot_id, %status, "bot status set");
        }
        Ok(status)
    }

    /// Process-wide stream of status changes.
    pub fn status_changes(&self) -> broadcast::Receiver<BotStatusChange> {
        self.status.subscribe()
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    fn room_token(&self, room_id: &str) -> CancellationToken {
        self.cancellations
            .entry(room_id.to_string())
            .or_default()
            .clone()
    }

    /// Cancel every in-flight dispatch of a room. Returns `false` if the
    /// room had none.
    pub fn cancel(&self, room_id: &str) -> bool {
        match self.cancellations.remove(room_id) {
            Some((_, token)) => {
                token.cancel();
                info!(%room_id, "room dispatches cancelled");
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Route a persisted message to its target bots and wait for every task,
    /// delegations included. Bot-authored and system messages never trigger
    /// a dispatch.
    pub async fn dispatch(self: &Arc<Self>, trigger: RoomMessage) -> Result<DispatchReport, DispatchError> {
        let mut report = DispatchReport::new(&trigger.room_id, trigger.id);
        if trigger.sender_is_bot || trigger.is_system() {
            return Ok(report);
        }

        let room = self.rooms.get(&trigger.room_id).await?;
        let token = self.room_token(&room.id).child_token();
        let targets = self.resolve_targets(&room, &trigger, &mut report).await?;
        debug!(room_id = %room.id, seq = trigger.seq, ?targets, "dispatching");

        let mut queue: VecDeque<Task> = targets
            .into_iter()
            .map(|bot_id| Task {
                bot_id,
                depth: 0,
                trigger: trigger.clone(),
                delegated_by: None,
            })
            .collect();
        let mut running = JoinSet::new();
        let mut started = 0usize;

        loop {
            while let Some(task) = queue.pop_front() {
                if started >= self.settings.max_tasks {
                    warn!(room_id = %room.id, bot_id = %task.bot_id, "task limit reached, skipping");
                    report.targets.push(TargetReport {
                        bot_id: task.bot_id,
                        delegation_depth: task.depth,
                        delegated_by: task.delegated_by,
                        outcome: DispatchOutcome::Skipped {
                            reason: "task limit reached".into(),
                        },
                    });
                    continue;
                }
                started += 1;

                let span = info_span!(
                    "bot_task",
                    room_id = %room.id,
                    bot_id = %task.bot_id,
                    depth = task.depth
                );
                let this = Arc::clone(self);
                let token = token.clone();
                running.spawn(async move { this.run_task(task, token).await }.instrument(span));
            }

            match running.join_next().await {
                Some(Ok(result)) => {
                    report.targets.push(result.report);
                    queue.extend(result.follow_ups);
                }
                Some(Err(e)) => warn!(room_id = %room.id, error = %e, "bot task panicked"),
                None => break,
            }
        }

        info!(
            room_id = %room.id,
            trigger_seq = trigger.seq,
            targets = report.targets.len(),
            "dispatch complete"
        );
        Ok(report)
    }

    /// Mentioned bots, or the room's coordinating bot.
    async fn resolve_targets(
        &self,
        room: &Room,
        trigger: &RoomMessage,
        report: &mut DispatchReport,
    ) -> Result<Vec<String>, DispatchError> {
        let mut mentioned = Vec::new();
        for name in extract_mentions(&trigger.content) {
            if self.cards.is_known_bot(&name).await? {
                mentioned.push(name);
            }
        }

        if !mentioned.is_empty() {
            let mut targets = Vec::new();
            for bot_id in mentioned {
                if room.has_participant(&bot_id) {
                    targets.push(bot_id);
                    continue;
                }
                self.notify(
                    MessageDraft::system(
                        &room.id,
                        system_event::NOT_A_PARTICIPANT,
                        format!("@{bot_id} is not a participant of this room"),
                        serde_json::json!({ "bot_id": bot_id }),
                    )
                    .in_reply_to(trigger.id),
                )
                .await;
                report.targets.push(TargetReport {
                    bot_id,
                    delegation_depth: 0,
                    delegated_by: None,
                    outcome: DispatchOutcome::Skipped {
                        reason: "not a participant".into(),
                    },
                });
            }
            return Ok(targets);
        }

        let coordinator = if room.has_participant(&self.settings.coordinator) {
            Some(self.settings.coordinator.clone())
        } else {
            room.participants.first().cloned()
        };
        match coordinator {
            Some(bot_id) => Ok(vec![bot_id]),
            None => {
                self.notify(
                    MessageDraft::system(
                        &room.id,
                        system_event::NO_BOT_AVAILABLE,
                        "No bot is available in this room",
                        serde_json::json!({}),
                    )
                    .in_reply_to(trigger.id),
                )
                .await;
                Ok(Vec::new())
            }
        }
    }

    async fn run_task(self: Arc<Self>, task: Task, token: CancellationToken) -> TaskResult {
        let (outcome, follow_ups) = match self.execute_task(&task, &token).await {
            Ok(done) => done,
            Err(e) => (self.recover(&task, e).await, Vec::new()),
        };
        debug!(bot_id = %task.bot_id, outcome = outcome.name(), "bot task finished");
        TaskResult {
            report: TargetReport {
                bot_id: task.bot_id,
                delegation_depth: task.depth,
                delegated_by: task.delegated_by,
                outcome,
            },
            follow_ups,
        }
    }

    async fn execute_task(
        &self,
        task: &Task,
        token: &CancellationToken,
    ) -> Result<(DispatchOutcome, Vec<Task>), DispatchError> {
        if token.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        if task.depth > self.settings.max_delegation_depth {
            return Err(DispatchError::DelegationDepthExceeded {
                depth: task.depth,
                max: self.settings.max_delegation_depth,
            });
        }

        let room = self.rooms.get(&task.trigger.room_id).await?;
        if !room.has_participant(&task.bot_id) {
            return Ok((
                DispatchOutcome::Skipped {
                    reason: "not a participant".into(),
                },
                Vec::new(),
            ));
        }
        let card = self.cards.load(&task.bot_id).await?;
        if !self.status.get(&task.bot_id).is_invocable() {
            return Err(InvocationError::Offline(task.bot_id.clone()).into());
        }

        let prior_turns = self.prior_turns(&task.trigger).await?;
        let context = ActionContext {
            room_id: room.id.clone(),
            room_type: room.room_type,
            message_id: Some(task.trigger.id),
            delegation_depth: task.depth,
            prior_turns: prior_turns
                .iter()
                .map(|m| format!("{}: {}", m.sender_id, m.content))
                .collect(),
        };

        let action = ActionDescriptor::new(
            &task.bot_id,
            ActionKind::ModelInvocation,
            task.trigger.content.clone(),
        );
        if let Err(DispatchError::ConstraintViolation { reason, ban_id }) =
            self.check(&card, &action, &context)
        {
            let items = self.denial(task, &card, &action, &reason, &ban_id);
            if token.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }
            self.apply(task, items).await?;
            return Ok((DispatchOutcome::Denied { reason, ban_id }, Vec::new()));
        }

        if let Some(change) = self.status.begin(&task.bot_id) {
            self.publish_status(&room.id, change).await;
        }
        let result = self
            .invoke(task, &room, &card, &context, prior_turns, token)
            .await;
        if let Some(change) = self.status.finish(&task.bot_id) {
            self.publish_status(&room.id, change).await;
        }
        let invocation = result?;

        if token.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        let (message_ids, follow_ups) = self.apply(task, invocation.pending).await?;

        let check = self.engine.should_escalate(
            &card,
            &invocation.response,
            invocation.confidence.unwrap_or(1.0),
        );
        if check.escalate {
            self.raise(
                &room.id,
                &task.bot_id,
                check.reason.as_deref().unwrap_or("escalation requested"),
                check.trigger_id.as_deref().unwrap_or(BOT_REQUEST_TRIGGER),
            )
            .await;
        }

        Ok((DispatchOutcome::Responded { message_ids }, follow_ups))
    }

    fn check(
        &self,
        card: &RoleCard,
        action: &ActionDescriptor,
        context: &ActionContext,
    ) -> Result<(), DispatchError> {
        match self.engine.check_action(card, action, Some(context)) {
            Decision::Allowed => Ok(()),
            Decision::Denied { reason, ban_id } => {
                Err(DispatchError::ConstraintViolation { reason, ban_id })
            }
        }
    }

    /// Stream one invocation, buffering everything it produces.
    async fn invoke(
        &self,
        task: &Task,
        room: &Room,
        card: &RoleCard,
        context: &ActionContext,
        prior_turns: Vec<RoomMessage>,
        token: &CancellationToken,
    ) -> Result<Invocation, DispatchError> {
        let request = InvocationRequest {
            bot_id: task.bot_id.clone(),
            room_id: room.id.clone(),
            room_type: room.room_type,
            role_card: card.clone(),
            trigger: task.trigger.clone(),
            prior_turns,
            delegation_depth: task.depth,
            delegated_by: task.delegated_by.clone(),
        };
        let mut stream = self.invoker.invoke(request);

        let mut out = Invocation {
            pending: Vec::new(),
            response: String::new(),
            confidence: None,
        };
        let mut text: Option<(MessageKind, String)> = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(DispatchError::Cancelled),
                next = stream.next() => next,
            };
            let Some(output) = next else { break };

            match output? {
                BotOutput::Text { kind, delta } => {
                    if text.as_ref().is_some_and(|(k, _)| *k != kind) {
                        self.flush_text(task, &mut text, &mut out.pending);
                    }
                    out.response.push_str(&delta);
                    text.get_or_insert_with(|| (kind, String::new()))
                        .1
                        .push_str(&delta);
                }
                BotOutput::ToolCall {
                    tool,
                    arguments,
                    categories,
                } => {
                    self.flush_text(task, &mut text, &mut out.pending);
                    let items = self
                        .tool_call(task, card, context, &tool, &arguments, categories, token)
                        .await?;
                    out.pending.extend(items);
                }
                BotOutput::Delegate {
                    to_bot,
                    instruction,
                } => {
                    self.flush_text(task, &mut text, &mut out.pending);
                    let items = self.delegation(task, room, card, context, &to_bot, &instruction);
                    out.pending.extend(items);
                }
                BotOutput::Escalate { reason } => out.pending.push(Pending::Escalation {
                    reason,
                    trigger_id: BOT_REQUEST_TRIGGER.to_string(),
                }),
                BotOutput::Confidence { value } => out.confidence = Some(value),
            }
        }
        self.flush_text(task, &mut text, &mut out.pending);
        Ok(out)
    }

    fn flush_text(&self, task: &Task, text: &mut Option<(MessageKind, String)>, pending: &mut Vec<Pending>) {
        if let Some((kind, content)) = text.take() {
            if content.trim().is_empty() {
                return;
            }
            pending.push(Pending::Message(
                MessageDraft::bot(&task.trigger.room_id, &task.bot_id, kind, content)
                    .in_reply_to(task.trigger.id),
            ));
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn tool_call(
        &self,
        task: &Task,
        card: &RoleCard,
        context: &ActionContext,
        tool: &str,
        arguments: &serde_json::Value,
        categories: Vec<ActionCategory>,
        token: &CancellationToken,
    ) -> Result<Vec<Pending>, DispatchError> {
        let summary = if arguments.is_null() {
            String::new()
        } else {
            arguments.to_string()
        };
        let mut action = ActionDescriptor::new(
            &task.bot_id,
            ActionKind::ToolCall {
                tool: tool.to_string(),
            },
            summary,
        );
        for category in categories {
            action = action.with_category(category);
        }

        if let Err(DispatchError::ConstraintViolation { reason, ban_id }) =
            self.check(card, &action, context)
        {
            return Ok(self.denial(task, card, &action, &reason, &ban_id));
        }

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(DispatchError::Cancelled),
            result = self.tools.execute(&task.bot_id, tool, arguments) => result,
        };
        let item = match result {
            Ok(output) => {
                let mut draft = MessageDraft::bot(
                    &task.trigger.room_id,
                    &task.bot_id,
                    MessageKind::ToolResult,
                    output,
                )
                .in_reply_to(task.trigger.id);
                draft.metadata = serde_json::json!({ "tool": tool });
                Pending::Message(draft)
            }
            Err(e) => {
                warn!(bot_id = %task.bot_id, %tool, error = %e, "tool failed");
                Pending::Notice(
                    MessageDraft::system(
                        &task.trigger.room_id,
                        system_event::INVOCATION_FAILED,
                        format!("{}: tool {tool} failed: {e}", task.bot_id),
                        serde_json::json!({ "bot_id": task.bot_id, "tool": tool }),
                    )
                    .in_reply_to(task.trigger.id),
                )
            }
        };
        Ok(vec![item])
    }

    fn delegation(
        &self,
        task: &Task,
        room: &Room,
        card: &RoleCard,
        context: &ActionContext,
        to_bot: &str,
        instruction: &str,
    ) -> Vec<Pending> {
        let to_bot = to_bot.trim().trim_start_matches('@').to_lowercase();
        let action = ActionDescriptor::new(
            &task.bot_id,
            ActionKind::Delegation {
                to_bot: to_bot.clone(),
            },
            instruction,
        );
        if let Err(DispatchError::ConstraintViolation { reason, ban_id }) =
            self.check(card, &action, context)
        {
            return self.denial(task, card, &action, &reason, &ban_id);
        }

        if !room.has_participant(&to_bot) {
            return vec![Pending::Notice(MessageDraft::system(
                &room.id,
                system_event::NOT_A_PARTICIPANT,
                format!("{} cannot delegate to @{to_bot}: not a participant of this room", task.bot_id),
                serde_json::json!({ "bot_id": to_bot, "delegated_by": task.bot_id }),
            ))];
        }

        let mut draft = MessageDraft::bot(
            &room.id,
            &task.bot_id,
            MessageKind::Text,
            format!("@{to_bot} {instruction}"),
        )
        .in_reply_to(task.trigger.id);
        draft.metadata = serde_json::json!({
            "delegation": { "to_bot": to_bot, "depth": task.depth + 1 }
        });
        vec![Pending::Delegation { draft, to_bot }]
    }

    /// The notice for a denied action, plus an escalation when the action
    /// matches one of the card's triggers.
    fn denial(
        &self,
        task: &Task,
        card: &RoleCard,
        action: &ActionDescriptor,
        reason: &str,
        ban_id: &str,
    ) -> Vec<Pending> {
        info!(bot_id = %task.bot_id, %ban_id, "action denied");
        let mut items = vec![Pending::Notice(
            MessageDraft::system(
                &task.trigger.room_id,
                system_event::CONSTRAINT_DENIED,
                format!("{} was blocked: {reason}", task.bot_id),
                serde_json::json!({
                    "bot_id": task.bot_id,
                    "ban_id": ban_id,
                    "reason": reason,
                    "action": action.kind,
                }),
            )
            .in_reply_to(task.trigger.id),
        )];

        let check = self.engine.should_escalate(card, &action.match_text(), 1.0);
        if check.escalate {
            items.push(Pending::Escalation {
                reason: check.reason.unwrap_or_else(|| reason.to_string()),
                trigger_id: check.trigger_id.unwrap_or_else(|| ban_id.to_string()),
            });
        }
        items
    }

    /// Append buffered output as one contiguous batch, then raise any
    /// escalations. Returns the ids of bot-authored messages and the
    /// follow-up tasks of delegations.
    async fn apply(&self, task: &Task, items: Vec<Pending>) -> Result<(Vec<uuid::Uuid>, Vec<Task>), DispatchError> {
        enum Appended {
            Message,
            Notice,
            Delegation(String),
        }

        let mut drafts = Vec::new();
        let mut roles = Vec::new();
        let mut escalations = Vec::new();
        for item in items {
            match item {
                Pending::Message(draft) => {
                    drafts.push(draft);
                    roles.push(Appended::Message);
                }
                Pending::Notice(draft) => {
                    drafts.push(draft);
                    roles.push(Appended::Notice);
                }
                Pending::Delegation { draft, to_bot } => {
                    drafts.push(draft);
                    roles.push(Appended::Delegation(to_bot));
                }
                Pending::Escalation { reason, trigger_id } => escalations.push((reason, trigger_id)),
            }
        }

        let mut message_ids = Vec::new();
        let mut follow_ups = Vec::new();
        if !drafts.is_empty() {
            let appended = self.rooms.append_batch(&task.trigger.room_id, drafts).await?;
            for (message, role) in appended.into_iter().zip(roles) {
                match role {
                    Appended::Message => message_ids.push(message.id),
                    Appended::Notice => {}
                    Appended::Delegation(to_bot) => {
                        message_ids.push(message.id);
                        follow_ups.push(Task {
                            bot_id: to_bot,
                            depth: task.depth + 1,
                            trigger: message,
                            delegated_by: Some(task.bot_id.clone()),
                        });
                    }
                }
            }
        }

        for (reason, trigger_id) in escalations {
            self.raise(&task.trigger.room_id, &task.bot_id, &reason, &trigger_id)
                .await;
        }
        Ok((message_ids, follow_ups))
    }

    /// Turn a task failure into its report outcome and room notice.
    async fn recover(&self, task: &Task, error: DispatchError) -> DispatchOutcome {
        let room_id = &task.trigger.room_id;
        let outcome = match &error {
            DispatchError::Cancelled => return DispatchOutcome::Cancelled,
            DispatchError::ConstraintViolation { reason, ban_id } => DispatchOutcome::Denied {
                reason: reason.clone(),
                ban_id: ban_id.clone(),
            },
            DispatchError::DelegationDepthExceeded { depth, max } => {
                DispatchOutcome::DepthExceeded {
                    depth: *depth,
                    max: *max,
                }
            }
            other => DispatchOutcome::Failed {
                code: other.code(),
                message: other.to_string(),
            },
        };

        let notice = match &error {
            DispatchError::DelegationDepthExceeded { depth, max } => Some((
                system_event::DELEGATION_DEPTH_EXCEEDED,
                format!(
                    "Delegation to {} refused: depth {depth} exceeds the maximum of {max}",
                    task.bot_id
                ),
            )),
            DispatchError::Invocation(e) => Some((
                system_event::INVOCATION_FAILED,
                format!("{} failed to respond: {e}", task.bot_id),
            )),
            DispatchError::Configuration(e) if e.code() == ErrorCode::ConfigurationError => Some((
                system_event::CONFIGURATION_ERROR,
                format!("{} is misconfigured: {e}", task.bot_id),
            )),
            _ => None,
        };

        match notice {
            Some((event, content)) => {
                warn!(bot_id = %task.bot_id, %room_id, error = %error, "bot task failed");
                self.notify(
                    MessageDraft::system(
                        room_id,
                        event,
                        content,
                        serde_json::json!({
                            "bot_id": task.bot_id,
                            "code": error.code(),
                            "delegated_by": task.delegated_by,
                        }),
                    )
                    .in_reply_to(task.trigger.id),
                )
                .await;
            }
            None => warn!(bot_id = %task.bot_id, %room_id, error = %error, "bot task aborted"),
        }
        outcome
    }

    async fn prior_turns(&self, trigger: &RoomMessage) -> Result<Vec<RoomMessage>, DispatchError> {
        if self.settings.prior_turns == 0 {
            return Ok(Vec::new());
        }
        let query = MessageQuery {
            before_seq: Some(trigger.seq),
            limit: Some(self.settings.prior_turns),
            ..Default::default()
        };
        Ok(self.rooms.messages(&trigger.room_id, &query).await?)
    }

    /// Append a system notice, logging instead of failing.
    async fn notify(&self, draft: MessageDraft) {
        let room_id = draft.room_id.clone();
        if let Err(e) = self.rooms.append_message(draft).await {
            warn!(%room_id, error = %e, "system notice not appended");
        }
    }

    async fn raise(&self, room_id: &str, bot_id: &str, reason: &str, trigger_id: &str) {
        if let Err(e) = self
            .escalations
            .raise(room_id, Some(bot_id), reason, trigger_id)
            .await
        {
            warn!(%room_id, %bot_id, error = %e, "escalation not recorded");
        }
    }

    async fn publish_status(&self, room_id: &str, change: BotStatusChange) {
        let payload = RoomEventPayload::BotStatusChanged {
            bot_id: change.bot_id,
            status: change.status,
        };
        if let Err(e) = self.rooms.record_event(room_id, payload).await {
            debug!(%room_id, error = %e, "status change not recorded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use conclave_types::escalation::{EscalationFilter, LOW_CONFIDENCE_TRIGGER};
    use conclave_types::room::{CreateRoomRequest, RoomType};

    use crate::sync::bus::SyncBus;
    use crate::testing::{
        InMemoryEscalationRepository, InMemoryRoleCardRepository, InMemoryRoomRepository,
        RecordingTools, ScriptedInvoker,
    };

    type TestDispatcher =
        Dispatcher<InMemoryRoomRepository, InMemoryRoleCardRepository, InMemoryEscalationRepository>;
    type Rooms = Arc<RoomRegistry<InMemoryRoomRepository, InMemoryRoleCardRepository>>;
    type Escalations = Arc<
        EscalationManager<InMemoryEscalationRepository, InMemoryRoomRepository, InMemoryRoleCardRepository>,
    >;

    struct Harness {
        dispatcher: Arc<TestDispatcher>,
        rooms: Rooms,
        escalations: Escalations,
        invoker: ScriptedInvoker,
        tools: RecordingTools,
    }

    fn harness(settings: DispatchSettings) -> Harness {
        let cards = Arc::new(RoleCardStore::new(InMemoryRoleCardRepository::new()));
        let rooms = Arc::new(RoomRegistry::new(
            InMemoryRoomRepository::new(),
            cards.clone(),
            SyncBus::default(),
            "lead",
        ));
        let escalations = Arc::new(EscalationManager::new(
            InMemoryEscalationRepository::new(),
            rooms.clone(),
        ));
        let invoker = ScriptedInvoker::new();
        let tools = RecordingTools::new();
        let dispatcher = Arc::new(Dispatcher::new(
            rooms.clone(),
            cards,
            escalations.clone(),
            ConstraintEngine::default(),
            Arc::new(invoker.clone()),
            BoxToolExecutor::new(tools.clone()),
            settings,
        ));
        Harness {
            dispatcher,
            rooms,
            escalations,
            invoker,
            tools,
        }
    }

    impl Harness {
        async fn room(&self, name: &str, participants: &[&str]) -> Room {
            self.rooms
                .create(CreateRoomRequest {
                    name: name.into(),
                    room_type: RoomType::Open,
                    participants: participants.iter().map(|p| p.to_string()).collect(),
                    owner: Some("dana".into()),
                })
                .await
                .unwrap()
        }

        async fn say(&self, room_id: &str, content: &str) -> RoomMessage {
            self.rooms
                .append_message(MessageDraft::human(room_id, "dana", content))
                .await
                .unwrap()
        }

        async fn history(&self, room_id: &str) -> Vec<RoomMessage> {
            self.rooms
                .messages(room_id, &MessageQuery::latest(500))
                .await
                .unwrap()
        }

        async fn notices(&self, room_id: &str, event: &str) -> Vec<RoomMessage> {
            self.history(room_id)
                .await
                .into_iter()
                .filter(|m| m.system_event() == Some(event))
                .collect()
        }
    }

    #[tokio::test]
    async fn two_mentioned_bots_both_respond() {
        let h = harness(DispatchSettings::default());
        h.room("Launch", &["lead", "researcher", "writer"]).await;
        let trigger = h.say("launch", "@researcher @writer outline the launch notes").await;

        let report = h.dispatcher.dispatch(trigger.clone()).await.unwrap();
        assert_eq!(report.targets.len(), 2);
        for bot in ["researcher", "writer"] {
            assert!(
                matches!(report.outcome_of(bot), Some(DispatchOutcome::Responded { message_ids }) if message_ids.len() == 1),
                "{bot} should have responded"
            );
        }

        let history = h.history("launch").await;
        let replies: Vec<_> = history.iter().filter(|m| m.sender_is_bot).collect();
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|m| m.reply_to == Some(trigger.id)));
        assert!(history.windows(2).all(|w| w[0].seq < w[1].seq));
        assert!(!h.invoker.invoked_bots().contains(&"lead".to_string()));
    }

    #[tokio::test]
    async fn each_bot_output_lands_contiguously() {
        let h = harness(DispatchSettings::default());
        h.room("Launch", &["lead", "researcher", "writer"]).await;
        for bot in ["researcher", "writer"] {
            h.invoker.script(
                bot,
                vec![
                    Ok(BotOutput::Text {
                        kind: MessageKind::Reasoning,
                        delta: format!("{bot} weighing sources"),
                    }),
                    Ok(BotOutput::text(format!("{bot} summary"))),
                ],
            );
        }
        let trigger = h.say("launch", "@researcher @writer summarize the launch").await;

        h.dispatcher.dispatch(trigger).await.unwrap();
        let history = h.history("launch").await;
        for bot in ["researcher", "writer"] {
            let seqs: Vec<u64> = history
                .iter()
                .filter(|m| m.sender_id == bot)
                .map(|m| m.seq)
                .collect();
            assert_eq!(seqs.len(), 2, "{bot}: {seqs:?}");
            assert_eq!(seqs[1], seqs[0] + 1, "{bot} output was split: {seqs:?}");
        }
    }

    #[tokio::test]
    async fn unmentioned_message_goes_to_the_coordinator() {
        let h = harness(DispatchSettings::default());
        h.room("Ops", &["researcher", "lead"]).await;
        let trigger = h.say("ops", "what is the status?").await;

        let report = h.dispatcher.dispatch(trigger).await.unwrap();
        assert_eq!(report.targets.len(), 1);
        assert_eq!(report.targets[0].bot_id, "lead");
    }

    #[tokio::test]
    async fn without_the_coordinator_the_first_participant_answers() {
        let h = harness(DispatchSettings::default());
        h.room("Papers", &["researcher", "analyst"]).await;
        let trigger = h.say("papers", "anything new?").await;

        let report = h.dispatcher.dispatch(trigger).await.unwrap();
        assert_eq!(h.invoker.invoked_bots(), vec!["researcher"]);
        assert_eq!(report.targets[0].bot_id, "researcher");
    }

    #[tokio::test]
    async fn bot_and_system_messages_do_not_dispatch() {
        let h = harness(DispatchSettings::default());
        h.room("Quiet", &["lead"]).await;
        let bot_message = h
            .rooms
            .append_message(MessageDraft::bot("quiet", "lead", MessageKind::Text, "@lead hi"))
            .await
            .unwrap();

        let report = h.dispatcher.dispatch(bot_message).await.unwrap();
        assert!(report.targets.is_empty());
        assert!(h.invoker.invoked_bots().is_empty());
    }

    #[tokio::test]
    async fn social_direct_post_is_denied() {
        let h = harness(DispatchSettings::default());
        h.room("Campaign", &["social"]).await;
        let trigger = h.say("campaign", "@social post this tweet directly").await;

        let report = h.dispatcher.dispatch(trigger).await.unwrap();
        match report.outcome_of("social") {
            Some(DispatchOutcome::Denied { ban_id, .. }) => assert_eq!(ban_id, "no-direct-posting"),
            other => panic!("expected a denial, got {other:?}"),
        }
        assert!(h.invoker.invoked_bots().is_empty());

        let denied = h.notices("campaign", system_event::CONSTRAINT_DENIED).await;
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].content, "social was blocked: No direct posting (drafts only)");
    }

    #[tokio::test]
    async fn drafting_a_post_is_allowed() {
        let h = harness(DispatchSettings::default());
        h.room("Campaign", &["social"]).await;
        let trigger = h.say("campaign", "@social draft a post about the launch").await;

        let report = h.dispatcher.dispatch(trigger).await.unwrap();
        assert!(matches!(
            report.outcome_of("social"),
            Some(DispatchOutcome::Responded { .. })
        ));
    }

    #[tokio::test]
    async fn delegation_beyond_max_depth_is_refused() {
        let h = harness(DispatchSettings {
            max_delegation_depth: 1,
            ..Default::default()
        });
        h.room("Build", &["lead", "researcher", "coder"]).await;
        h.invoker.script(
            "lead",
            vec![Ok(BotOutput::Delegate {
                to_bot: "researcher".into(),
                instruction: "find prior art".into(),
            })],
        );
        h.invoker.script(
            "researcher",
            vec![Ok(BotOutput::Delegate {
                to_bot: "@Coder".into(),
                instruction: "prototype it".into(),
            })],
        );
        let trigger = h.say("build", "plan the prototype").await;

        let report = h.dispatcher.dispatch(trigger).await.unwrap();
        assert_eq!(h.invoker.invoked_bots(), vec!["lead", "researcher"]);

        let researcher = report.targets.iter().find(|t| t.bot_id == "researcher").unwrap();
        assert_eq!(researcher.delegation_depth, 1);
        assert_eq!(researcher.delegated_by.as_deref(), Some("lead"));
        assert_eq!(
            report.outcome_of("coder"),
            Some(&DispatchOutcome::DepthExceeded { depth: 2, max: 1 })
        );
        assert_eq!(
            h.notices("build", system_event::DELEGATION_DEPTH_EXCEEDED).await.len(),
            1
        );

        // The delegation itself is visible as a message addressed to the delegate.
        let history = h.history("build").await;
        assert!(history.iter().any(|m| m.sender_id == "lead" && m.content == "@researcher find prior art"));
        assert!(history.iter().any(|m| m.sender_id == "researcher" && m.content == "@coder prototype it"));
    }

    #[tokio::test]
    async fn delegated_request_carries_the_delegator() {
        let h = harness(DispatchSettings::default());
        h.room("Docs", &["lead", "writer"]).await;
        h.invoker.script(
            "lead",
            vec![
                Ok(BotOutput::text("Handing this to the writer.")),
                Ok(BotOutput::Delegate {
                    to_bot: "writer".into(),
                    instruction: "write the README".into(),
                }),
            ],
        );
        let trigger = h.say("docs", "we need a README").await;
        h.dispatcher.dispatch(trigger).await.unwrap();

        let requests = h.invoker.requests();
        let writer = requests.iter().find(|r| r.bot_id == "writer").unwrap();
        assert_eq!(writer.delegation_depth, 1);
        assert_eq!(writer.delegated_by.as_deref(), Some("lead"));
        assert_eq!(writer.trigger.content, "@writer write the README");
        assert!(writer.prior_turns.iter().any(|m| m.content == "Handing this to the writer."));
    }

    #[tokio::test]
    async fn invocation_failure_is_isolated_to_its_bot() {
        let h = harness(DispatchSettings::default());
        h.room("Pair", &["researcher", "coder"]).await;
        h.invoker.script(
            "researcher",
            vec![
                Ok(BotOutput::text("partial answer")),
                Err(InvocationError::Provider("upstream 503".into())),
            ],
        );
        let trigger = h.say("pair", "@researcher @coder look at issue 12").await;

        let report = h.dispatcher.dispatch(trigger).await.unwrap();
        assert!(matches!(
            report.outcome_of("researcher"),
            Some(DispatchOutcome::Failed { code: ErrorCode::InvocationFailure, .. })
        ));
        assert!(matches!(
            report.outcome_of("coder"),
            Some(DispatchOutcome::Responded { .. })
        ));

        let history = h.history("pair").await;
        assert!(!history.iter().any(|m| m.content == "partial answer"));
        assert_eq!(h.notices("pair", system_event::INVOCATION_FAILED).await.len(), 1);
    }

    #[tokio::test]
    async fn offline_bot_is_not_invoked() {
        let h = harness(DispatchSettings::default());
        h.room("Night", &["coder"]).await;
        h.dispatcher.set_status("coder", BotStatus::Offline).await.unwrap();
        let trigger = h.say("night", "@coder are you there?").await;

        let report = h.dispatcher.dispatch(trigger).await.unwrap();
        assert!(matches!(report.outcome_of("coder"), Some(DispatchOutcome::Failed { .. })));
        assert!(h.invoker.invoked_bots().is_empty());
        assert_eq!(h.notices("night", system_event::INVOCATION_FAILED).await.len(), 1);
    }

    #[tokio::test]
    async fn set_status_of_unknown_bot_fails() {
        let h = harness(DispatchSettings::default());
        let err = h.dispatcher.set_status("ghost", BotStatus::Away).await.unwrap_err();
        assert!(matches!(err, RoomError::BotNotFound(_)));
        assert_eq!(h.dispatcher.status_of("lead"), BotStatus::Online);
    }

    #[tokio::test]
    async fn cancel_discards_in_flight_output() {
        let h = harness(DispatchSettings::default());
        h.room("Slow", &["analyst"]).await;
        h.invoker.script_delayed(
            "analyst",
            Duration::from_secs(30),
            vec![Ok(BotOutput::text("too late"))],
        );
        let trigger = h.say("slow", "@analyst crunch the quarter").await;

        let dispatcher = h.dispatcher.clone();
        let running = tokio::spawn(async move { dispatcher.dispatch(trigger).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.dispatcher.cancel("slow"));

        let report = running.await.unwrap().unwrap();
        assert_eq!(report.outcome_of("analyst"), Some(&DispatchOutcome::Cancelled));
        assert!(!h.history("slow").await.iter().any(|m| m.sender_is_bot));
        assert_eq!(h.dispatcher.status_of("analyst"), BotStatus::Online);
        assert!(!h.dispatcher.cancel("slow"));
    }

    #[tokio::test]
    async fn mentioning_a_non_participant_posts_a_notice() {
        let h = harness(DispatchSettings::default());
        h.room("Solo", &["lead"]).await;
        let trigger = h.say("solo", "@coder fix the login bug").await;

        let report = h.dispatcher.dispatch(trigger).await.unwrap();
        assert!(matches!(report.outcome_of("coder"), Some(DispatchOutcome::Skipped { .. })));
        assert!(h.invoker.invoked_bots().is_empty());
        assert_eq!(h.notices("solo", system_event::NOT_A_PARTICIPANT).await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_mentions_fall_back_to_the_coordinator() {
        let h = harness(DispatchSettings::default());
        h.room("Mail", &["lead"]).await;
        let trigger = h.say("mail", "ping @someone about the invoice").await;

        h.dispatcher.dispatch(trigger).await.unwrap();
        assert_eq!(h.invoker.invoked_bots(), vec!["lead"]);
    }

    #[tokio::test]
    async fn empty_room_reports_no_bot_available() {
        let h = harness(DispatchSettings::default());
        h.room("Empty", &["lead"]).await;
        h.rooms.remove_participant("empty", "lead").await.unwrap();
        let trigger = h.say("empty", "hello?").await;

        let report = h.dispatcher.dispatch(trigger).await.unwrap();
        assert!(report.targets.is_empty());
        assert_eq!(h.notices("empty", system_event::NO_BOT_AVAILABLE).await.len(), 1);
    }

    #[tokio::test]
    async fn tool_calls_are_checked_before_they_run() {
        let h = harness(DispatchSettings::default());
        h.room("Repo", &["coder"]).await;
        h.invoker.script(
            "coder",
            vec![
                Ok(BotOutput::ToolCall {
                    tool: "shell".into(),
                    arguments: serde_json::json!({ "cmd": "rm -rf target" }),
                    categories: vec![],
                }),
                Ok(BotOutput::ToolCall {
                    tool: "run_tests".into(),
                    arguments: serde_json::json!({}),
                    categories: vec![],
                }),
                Ok(BotOutput::text("tests are green")),
            ],
        );
        let trigger = h.say("repo", "@coder clean up and run the tests").await;

        let report = h.dispatcher.dispatch(trigger).await.unwrap();
        assert_eq!(h.tools.calls(), vec![("coder".to_string(), "run_tests".to_string())]);
        let Some(DispatchOutcome::Responded { message_ids }) = report.outcome_of("coder") else {
            panic!("coder should have responded");
        };
        assert_eq!(message_ids.len(), 2);

        let history = h.history("repo").await;
        let denied = h.notices("repo", system_event::CONSTRAINT_DENIED).await;
        assert_eq!(denied.len(), 1);
        let tool_result = history.iter().find(|m| m.kind == MessageKind::ToolResult).unwrap();
        assert_eq!(tool_result.content, "ran run_tests");
        assert_eq!(tool_result.metadata["tool"], "run_tests");
        assert!(denied[0].seq < tool_result.seq);
    }

    #[tokio::test]
    async fn low_confidence_response_escalates() {
        let h = harness(DispatchSettings::default());
        h.room("Numbers", &["analyst"]).await;
        h.invoker.script(
            "analyst",
            vec![
                Ok(BotOutput::text("revenue is maybe up 4%")),
                Ok(BotOutput::Confidence { value: 0.2 }),
            ],
        );
        let trigger = h.say("numbers", "@analyst how did we do?").await;

        h.dispatcher.dispatch(trigger).await.unwrap();
        let open = h
            .escalations
            .list(EscalationFilter::Open, Some("numbers"))
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].trigger_id, LOW_CONFIDENCE_TRIGGER);
        assert_eq!(open[0].bot_id.as_deref(), Some("analyst"));
    }

    #[tokio::test]
    async fn trigger_phrase_in_response_escalates() {
        let h = harness(DispatchSettings::default());
        h.room("Contracts", &["writer"]).await;
        h.invoker.script(
            "writer",
            vec![Ok(BotOutput::text("This touches the contract terms with the vendor."))],
        );
        let trigger = h.say("contracts", "@writer summarize the vendor email").await;

        h.dispatcher.dispatch(trigger).await.unwrap();
        let open = h.escalations.list(EscalationFilter::Open, None).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].trigger_id, "legal-or-compliance");
    }

    #[tokio::test]
    async fn task_limit_skips_the_rest() {
        let h = harness(DispatchSettings {
            max_tasks: 1,
            ..Default::default()
        });
        h.room("Crowd", &["researcher", "analyst"]).await;
        let trigger = h.say("crowd", "@researcher @analyst thoughts?").await;

        let report = h.dispatcher.dispatch(trigger).await.unwrap();
        assert_eq!(h.invoker.invoked_bots(), vec!["researcher"]);
        assert!(matches!(report.outcome_of("analyst"), Some(DispatchOutcome::Skipped { .. })));
    }
}
