//! CLI command definitions and dispatch for the `conclave` binary.
//!
//! Uses clap derive macros for argument parsing. Resource commands follow a
//! noun-verb pattern (e.g., `conclave room create`, `conclave card show`);
//! the everyday room verbs (`send`, `history`, `search`, `tail`) are
//! top-level.

pub mod bot;
pub mod card;
pub mod escalation;
pub mod message;
pub mod room;
pub mod status;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use conclave_types::room::DEFAULT_ROOM_ID;

/// Run and supervise multi-bot rooms.
#[derive(Parser)]
#[command(name = "conclave", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage rooms and their participants.
    Room {
        #[command(subcommand)]
        action: RoomCommand,
    },

    /// Post a message to a room and wait for the bots to answer.
    Send {
        /// Message text. @-mention bots to address them directly.
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,

        /// Target room.
        #[arg(long, short, default_value = DEFAULT_ROOM_ID)]
        room: String,

        /// Sender id.
        #[arg(long = "as", env = "CONCLAVE_USER", default_value = "human")]
        sender: String,

        /// Return as soon as the message is stored.
        #[arg(long)]
        no_wait: bool,
    },

    /// Show a room's message history.
    History {
        /// Room id.
        #[arg(default_value = DEFAULT_ROOM_ID)]
        room: String,

        /// Maximum messages to show.
        #[arg(long, short = 'n', default_value = "50")]
        limit: u32,

        /// Only messages before this sequence number.
        #[arg(long)]
        before: Option<u64>,

        /// Only messages after this sequence number.
        #[arg(long)]
        after: Option<u64>,
    },

    /// Full-text search over a room's messages.
    Search {
        /// Search terms; every term must match (prefix match).
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Room to search.
        #[arg(long, short, default_value = DEFAULT_ROOM_ID)]
        room: String,

        /// Maximum results.
        #[arg(long, short = 'n', default_value = "20")]
        limit: u32,
    },

    /// Follow a room live until Ctrl+C.
    Tail {
        /// Room id.
        #[arg(default_value = DEFAULT_ROOM_ID)]
        room: String,

        /// Resume after this sequence number instead of starting with a snapshot.
        #[arg(long)]
        since: Option<u64>,
    },

    /// Replace the content of a message.
    Edit {
        /// Room id.
        room: String,

        /// Message id.
        message_id: String,

        /// New content.
        content: String,
    },

    /// Bot roster and presence.
    Bot {
        #[command(subcommand)]
        action: BotCommand,
    },

    /// Role cards, overrides and proposals.
    Card {
        #[command(subcommand)]
        action: CardCommand,
    },

    /// Human-review escalations.
    #[command(alias = "esc")]
    Escalation {
        #[command(subcommand)]
        action: EscalationCommand,
    },

    /// System status dashboard.
    Status,

    /// Start the REST/WebSocket API server.
    Serve {
        /// Port to listen on (defaults to `[server] port`).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (defaults to `[server] host`).
        #[arg(long)]
        host: Option<String>,
    },

    /// Write a config.toml with every default spelled out.
    Init,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum RoomCommand {
    /// List rooms.
    #[command(alias = "ls")]
    List {
        /// Include archived rooms.
        #[arg(long)]
        all: bool,
    },

    /// Create a room.
    Create {
        /// Display name; the id is derived from it.
        name: String,

        /// Room type (open, project, direct, coordination).
        #[arg(long = "type", default_value = "open")]
        room_type: String,

        /// Bot participants (repeatable). Defaults to the coordinator.
        #[arg(long = "participant", short = 'p')]
        participants: Vec<String>,

        /// Owner id.
        #[arg(long, env = "CONCLAVE_USER")]
        owner: Option<String>,
    },

    /// Show a room and its participants.
    Show {
        /// Room id.
        id: String,
    },

    /// Archive a room. Its history stays readable.
    Archive {
        /// Room id.
        id: String,
    },

    /// Delete a room and its history.
    #[command(alias = "rm")]
    Delete {
        /// Room id.
        id: String,

        /// Skip confirmation prompt.
        #[arg(long)]
        force: bool,
    },

    /// Replace a room's summary.
    Summary {
        /// Room id.
        id: String,

        /// New summary text.
        summary: String,
    },

    /// Add a bot to a room.
    Add {
        /// Room id.
        id: String,

        /// Bot id.
        bot: String,
    },

    /// Remove a bot from a room.
    Remove {
        /// Room id.
        id: String,

        /// Bot id.
        bot: String,
    },
}

#[derive(Subcommand)]
pub enum BotCommand {
    /// List every known bot with its presence.
    #[command(alias = "ls")]
    List,

    /// Show a bot's profile and the rooms it takes part in.
    Show {
        /// Bot id.
        bot: String,
    },
}

#[derive(Subcommand)]
pub enum CardCommand {
    /// Show a bot's effective (merged) role card.
    Show {
        /// Bot id.
        bot: String,
    },

    /// Show each layer of a bot's role card separately.
    Layers {
        /// Bot id.
        bot: String,
    },

    /// Save a role card layer from a JSON file.
    Set {
        /// Bot id.
        bot: String,

        /// JSON file holding a role card layer.
        #[arg(long, short)]
        file: std::path::PathBuf,

        /// Scope to write (workspace, global).
        #[arg(long, default_value = "workspace")]
        scope: String,
    },

    /// Propose a change for human approval.
    Propose {
        /// Bot id.
        bot: String,

        /// JSON file holding the proposed layer.
        #[arg(long, short)]
        file: std::path::PathBuf,

        /// Why the change is needed.
        #[arg(long)]
        reason: String,

        /// Proposer id.
        #[arg(long = "by", default_value = "human")]
        proposed_by: String,
    },

    /// List proposals.
    Proposals {
        /// Only proposals for this bot.
        #[arg(long)]
        bot: Option<String>,

        /// Only proposals in this status (pending, approved, rejected).
        #[arg(long)]
        status: Option<String>,
    },

    /// Approve a pending proposal.
    Approve {
        /// Proposal id.
        id: String,

        /// Scope the change is applied at (workspace, global).
        #[arg(long, default_value = "workspace")]
        scope: String,

        /// Approver id.
        #[arg(long = "by", env = "CONCLAVE_USER", default_value = "human")]
        approver: String,
    },

    /// Reject a pending proposal.
    Reject {
        /// Proposal id.
        id: String,

        /// Decider id.
        #[arg(long = "by", env = "CONCLAVE_USER", default_value = "human")]
        decider: String,
    },
}

#[derive(Subcommand)]
pub enum EscalationCommand {
    /// List escalations.
    #[command(alias = "ls")]
    List {
        /// Filter (pending, acknowledged, resolved, open, all).
        #[arg(long, default_value = "open")]
        filter: String,

        /// Only escalations raised in this room.
        #[arg(long)]
        room: Option<String>,
    },

    /// Show one escalation.
    Show {
        /// Escalation id.
        id: String,
    },

    /// Acknowledge an escalation.
    Ack {
        /// Escalation id.
        id: String,

        /// Reviewer id.
        #[arg(long = "by", env = "CONCLAVE_USER", default_value = "human")]
        by: String,
    },

    /// Resolve an escalation.
    Resolve {
        /// Escalation id.
        id: String,

        /// Reviewer id.
        #[arg(long = "by", env = "CONCLAVE_USER", default_value = "human")]
        by: String,

        /// Resolution note.
        #[arg(long)]
        note: Option<String>,
    },
}

/// Parse a UUID argument with a readable error.
pub fn parse_id(raw: &str) -> anyhow::Result<uuid::Uuid> {
    raw.parse()
        .map_err(|e| anyhow::anyhow!("invalid id '{raw}': {e}"))
}

/// Render a timestamp as a short relative time.
pub fn format_relative_time(dt: &chrono::DateTime<chrono::Utc>) -> String {
    let now = chrono::Utc::now();
    let diff = now - *dt;

    if diff.num_minutes() < 1 {
        "just now".to_string()
    } else if diff.num_hours() < 1 {
        format!("{}m ago", diff.num_minutes())
    } else if diff.num_days() < 1 {
        format!("{}h ago", diff.num_hours())
    } else if diff.num_days() < 30 {
        format!("{}d ago", diff.num_days())
    } else {
        dt.format("%Y-%m-%d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_send_joins_words_and_defaults_room() {
        let cli = Cli::try_parse_from(["conclave", "send", "@coder", "fix", "the", "build"]).unwrap();
        match cli.command {
            Commands::Send { text, room, .. } => {
                assert_eq!(text.join(" "), "@coder fix the build");
                assert_eq!(room, DEFAULT_ROOM_ID);
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_room_create_collects_participants() {
        let cli = Cli::try_parse_from([
            "conclave", "room", "create", "launch", "-p", "researcher", "-p", "coder", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Room {
                action: RoomCommand::Create { participants, room_type, .. },
            } => {
                assert_eq!(participants, vec!["researcher", "coder"]);
                assert_eq!(room_type, "open");
            }
            _ => panic!("expected room create"),
        }
    }

    #[test]
    fn test_parse_id_rejects_garbage() {
        assert!(parse_id("not-a-uuid").is_err());
        let id = uuid::Uuid::now_v7();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
    }
}
