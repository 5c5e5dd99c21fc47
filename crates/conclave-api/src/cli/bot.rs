//! Bot roster CLI commands: list, show.

use anyhow::Result;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use conclave_types::bot::BotStatus;

use crate::state::AppState;

/// List every known bot in a table.
pub async fn list_bots(state: &AppState, json: bool) -> Result<()> {
    let bots = state.conclave.dispatcher().roster().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&bots)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Bot").fg(Color::White),
        Cell::new("Name").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Description").fg(Color::White),
    ]);

    let coordinator = state.config().coordinator_bot.as_str();
    for bot in &bots {
        let id = if bot.profile.id == coordinator {
            format!("@{} ★", bot.profile.id)
        } else {
            format!("@{}", bot.profile.id)
        };
        table.add_row(vec![
            Cell::new(id).fg(Color::Cyan),
            Cell::new(&bot.profile.display_name),
            status_cell(bot.status),
            Cell::new(&bot.profile.description),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn show_bot(state: &AppState, bot_id: &str, json: bool) -> Result<()> {
    let card = state.conclave.cards().load(bot_id).await?;
    let status = state.conclave.dispatcher().status_of(bot_id);
    let rooms: Vec<String> = state
        .conclave
        .rooms()
        .list(false)
        .await?
        .into_iter()
        .filter(|r| r.has_participant(&card.bot_id))
        .map(|r| r.id)
        .collect();

    if json {
        let value = serde_json::json!({
            "bot_id": card.bot_id,
            "display_name": card.display_name,
            "domain": card.domain,
            "status": status,
            "rooms": rooms,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!();
    println!(
        "  {}  {}",
        style(&card.display_name).bold(),
        style(format!("@{}", card.bot_id)).cyan()
    );
    println!("  {}", style(&card.domain).dim());
    println!();
    println!("  {}  {}", style("Status:").bold(), format_status(status));
    println!(
        "  {}  {}",
        style("Rooms:").bold(),
        if rooms.is_empty() {
            "none".to_string()
        } else {
            rooms.join(", ")
        }
    );
    println!(
        "  {}  {} hard ban(s), {} escalation trigger(s)",
        style("Card:").bold(),
        card.hard_bans.len(),
        card.escalation_triggers.len()
    );
    println!();
    Ok(())
}

fn status_cell(status: BotStatus) -> Cell {
    match status {
        BotStatus::Online => Cell::new("● online").fg(Color::Green),
        BotStatus::Thinking => Cell::new("◐ thinking").fg(Color::Cyan),
        BotStatus::Away => Cell::new("○ away").fg(Color::Yellow),
        BotStatus::Offline => Cell::new("◌ offline").fg(Color::DarkGrey),
    }
}

fn format_status(status: BotStatus) -> String {
    match status {
        BotStatus::Online => format!("{}", style("● online").green()),
        BotStatus::Thinking => format!("{}", style("◐ thinking").cyan()),
        BotStatus::Away => format!("{}", style("○ away").yellow()),
        BotStatus::Offline => format!("{}", style("◌ offline").dim()),
    }
}
