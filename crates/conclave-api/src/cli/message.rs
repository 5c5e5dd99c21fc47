//! Message CLI commands: send, history, search, tail, edit.
//!
//! `tail` renders the room through a terminal [`InterfaceAdapter`], the same
//! path every other surface uses.

use std::time::Duration;

use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use conclave_core::sync::{pump, InterfaceAdapter};
use conclave_types::dispatch::DispatchOutcome;
use conclave_types::event::{InboundEvent, InterfaceKind, RoomEvent, RoomEventPayload, SyncItem};
use conclave_types::message::{MessageQuery, RoomMessage};

use super::parse_id;
use crate::state::AppState;

/// Post a human message. Unless `no_wait`, waits for every addressed bot
/// (and their delegations) and prints what they added to the room.
pub async fn send(
    state: &AppState,
    room: &str,
    sender: &str,
    text: &str,
    no_wait: bool,
    json: bool,
) -> Result<()> {
    let event = InboundEvent::text(InterfaceKind::Cli, room, sender, text);

    if no_wait {
        let message = state.conclave.ingest(event).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&message)?);
        } else if let Some(message) = message {
            println!("{}", render_message(&message));
        }
        return Ok(());
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("Waiting for bots...");
    spinner.enable_steady_tick(Duration::from_millis(80));

    let result = state.conclave.ingest_and_wait(event).await;
    spinner.finish_and_clear();

    let Some((message, report)) = result? else {
        if !json {
            println!("  {} Nothing to send.", style("i").blue().bold());
        }
        return Ok(());
    };

    let replies = state
        .conclave
        .rooms()
        .messages(
            &message.room_id,
            &MessageQuery {
                after_seq: Some(message.seq),
                limit: Some(200),
                ..Default::default()
            },
        )
        .await?;

    if json {
        let value = serde_json::json!({
            "message": message,
            "report": report,
            "replies": replies,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}", render_message(&message));
    for reply in &replies {
        println!("{}", render_message(reply));
    }
    for target in &report.targets {
        if let DispatchOutcome::Skipped { reason } = &target.outcome {
            println!(
                "  {} {} skipped: {}",
                style("·").dim(),
                target.bot_id,
                style(reason).dim()
            );
        }
    }
    Ok(())
}

pub async fn history(
    state: &AppState,
    room: &str,
    limit: u32,
    before: Option<u64>,
    after: Option<u64>,
    json: bool,
) -> Result<()> {
    let query = MessageQuery {
        before_seq: before,
        after_seq: after,
        limit: Some(limit),
        text: None,
    };
    let messages = state.conclave.rooms().messages(room, &query).await?;
    print_messages(&messages, json, "No messages yet.")
}

pub async fn search(state: &AppState, room: &str, query: &str, limit: u32, json: bool) -> Result<()> {
    let query = MessageQuery {
        limit: Some(limit),
        text: Some(query.to_string()),
        ..Default::default()
    };
    let messages = state.conclave.rooms().messages(room, &query).await?;
    print_messages(&messages, json, "No matching messages.")
}

pub async fn edit(state: &AppState, room: &str, message_id: &str, content: &str, json: bool) -> Result<()> {
    let id = parse_id(message_id)?;
    let message = state.conclave.rooms().edit_message(room, &id, content).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&message)?);
    } else {
        println!("{}", render_message(&message));
    }
    Ok(())
}

/// Follow a room until Ctrl+C.
pub async fn tail(state: &AppState, room: &str, since: Option<u64>, json: bool) -> Result<()> {
    // Surface a missing room as an error instead of a silent empty stream.
    state.conclave.rooms().get(room).await?;

    let stream = match since {
        Some(seq) => state.conclave.resume(room, seq),
        None => state.conclave.subscribe(room),
    };
    let cancel = CancellationToken::new();
    let mut handle = pump(TerminalAdapter { json }, stream, cancel.clone());

    if !json {
        println!(
            "  {} Following {} {}",
            style("⚡").bold(),
            style(room).cyan(),
            style("(Ctrl+C to stop)").dim()
        );
    }

    // The pump also stops on its own when the room is deleted.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            (&mut handle).await?;
        }
        delivered = &mut handle => {
            delivered?;
        }
    }
    Ok(())
}

fn print_messages(messages: &[RoomMessage], json: bool, empty: &str) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(messages)?);
        return Ok(());
    }
    if messages.is_empty() {
        println!("  {} {empty}", style("i").blue().bold());
        return Ok(());
    }
    for message in messages {
        println!("{}", render_message(message));
    }
    Ok(())
}

/// Renders a room into the terminal.
struct TerminalAdapter {
    json: bool,
}

impl InterfaceAdapter for TerminalAdapter {
    fn kind(&self) -> InterfaceKind {
        InterfaceKind::Cli
    }

    async fn deliver(&self, item: SyncItem) -> Result<(), String> {
        if self.json {
            let line = serde_json::to_string(&item).map_err(|e| e.to_string())?;
            println!("{line}");
            return Ok(());
        }
        match item {
            SyncItem::Snapshot { snapshot, resync } => {
                if resync {
                    println!("  {}", style("── resynchronized ──").dim());
                }
                for message in &snapshot.messages {
                    println!("{}", render_message(message));
                }
            }
            SyncItem::Event { event } => {
                if let Some(line) = render_event(&event) {
                    println!("{line}");
                }
            }
        }
        Ok(())
    }
}

/// One line per message: sequence number, sender, content.
pub fn render_message(message: &RoomMessage) -> String {
    let seq = style(format!("{:>5}", message.seq)).dim();
    if message.is_system() {
        return format!("{seq}  {}", style(format!("※ {}", message.content)).yellow());
    }
    let sender = if message.sender_is_bot {
        style(format!("@{}", message.sender_id)).magenta().bold()
    } else {
        style(message.sender_id.clone()).cyan().bold()
    };
    let edited = if message.edited_at.is_some() {
        format!(" {}", style("(edited)").dim())
    } else {
        String::new()
    };
    format!("{seq}  {sender}: {}{edited}", message.content)
}

/// Render a live event, or `None` for events a terminal does not show.
pub fn render_event(event: &RoomEvent) -> Option<String> {
    let line = match &event.payload {
        RoomEventPayload::MessageAppended { message } | RoomEventPayload::MessageEdited { message } => {
            return Some(render_message(message));
        }
        RoomEventPayload::ParticipantAdded { bot_id } => format!("@{bot_id} joined"),
        RoomEventPayload::ParticipantRemoved { bot_id } => format!("@{bot_id} left"),
        RoomEventPayload::SummaryUpdated { summary } => format!("summary: {summary}"),
        RoomEventPayload::RoomArchived => "room archived".to_string(),
        RoomEventPayload::RoomDeleted => "room deleted".to_string(),
        RoomEventPayload::BotStatusChanged { .. } => return None,
        RoomEventPayload::EscalationRaised { escalation } => {
            format!("escalation {} raised: {}", escalation.id, escalation.reason)
        }
        RoomEventPayload::EscalationAcknowledged { escalation } => format!(
            "escalation {} acknowledged by {}",
            escalation.id,
            escalation.acknowledged_by.as_deref().unwrap_or("?")
        ),
        RoomEventPayload::EscalationResolved { escalation } => format!(
            "escalation {} resolved by {}",
            escalation.id,
            escalation.resolved_by.as_deref().unwrap_or("?")
        ),
    };
    Some(format!(
        "{}  {}",
        style(format!("{:>5}", event.seq)).dim(),
        style(line).dim()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conclave_types::bot::BotStatus;
    use conclave_types::message::{empty_metadata, MessageKind};
    use uuid::Uuid;

    fn message(sender: &str, is_bot: bool, content: &str) -> RoomMessage {
        RoomMessage {
            id: Uuid::now_v7(),
            room_id: "general".into(),
            seq: 7,
            content: content.into(),
            kind: MessageKind::Text,
            sender_id: sender.into(),
            sender_is_bot: is_bot,
            created_at: Utc::now(),
            reply_to: None,
            edited_at: None,
            metadata: empty_metadata(),
            archived: false,
        }
    }

    #[test]
    fn test_render_message_marks_bots() {
        console::set_colors_enabled(false);
        assert_eq!(render_message(&message("coder", true, "done")), "    7  @coder: done");
        assert_eq!(render_message(&message("dana", false, "thanks")), "    7  dana: thanks");
    }

    #[test]
    fn test_render_event_hides_status_changes() {
        console::set_colors_enabled(false);
        let event = |payload| RoomEvent {
            room_id: "general".into(),
            seq: 3,
            at: Utc::now(),
            payload,
        };
        assert!(render_event(&event(RoomEventPayload::BotStatusChanged {
            bot_id: "coder".into(),
            status: BotStatus::Thinking,
        }))
        .is_none());
        assert_eq!(
            render_event(&event(RoomEventPayload::ParticipantAdded { bot_id: "coder".into() })).unwrap(),
            "    3  @coder joined"
        );
    }
}
