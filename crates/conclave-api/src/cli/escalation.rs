//! Escalation CLI commands: list, show, ack, resolve.

use anyhow::Result;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use conclave_types::escalation::{EscalationFilter, EscalationRecord, ResolutionState};

use super::{format_relative_time, parse_id};
use crate::state::AppState;

pub async fn list_escalations(
    state: &AppState,
    filter: &str,
    room: Option<&str>,
    json: bool,
) -> Result<()> {
    let filter: EscalationFilter = filter.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let records = state.conclave.escalations().list(filter, room).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("  {} Nothing needs review.", style("✓").green().bold());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Room").fg(Color::White),
        Cell::new("Bot").fg(Color::White),
        Cell::new("State").fg(Color::White),
        Cell::new("Reason").fg(Color::White),
        Cell::new("Raised").fg(Color::White),
    ]);
    for record in &records {
        table.add_row(vec![
            Cell::new(record.id.to_string()).fg(Color::DarkGrey),
            Cell::new(&record.room_id).fg(Color::Cyan),
            Cell::new(record.bot_id.as_deref().map(|b| format!("@{b}")).unwrap_or_default()),
            state_cell(record.state),
            Cell::new(&record.reason),
            Cell::new(format_relative_time(&record.created_at)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn show_escalation(state: &AppState, id: &str, json: bool) -> Result<()> {
    let record = state.conclave.escalations().get(&parse_id(id)?).await?;
    print_record(&record, json)
}

pub async fn acknowledge(state: &AppState, id: &str, by: &str, json: bool) -> Result<()> {
    let record = state.conclave.escalations().acknowledge(&parse_id(id)?, by).await?;
    print_record(&record, json)
}

pub async fn resolve(state: &AppState, id: &str, by: &str, note: Option<&str>, json: bool) -> Result<()> {
    let record = state
        .conclave
        .escalations()
        .resolve(&parse_id(id)?, by, note)
        .await?;
    print_record(&record, json)
}

fn print_record(record: &EscalationRecord, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }

    println!();
    println!("  {}  {}", style("Escalation:").bold(), style(record.id).dim());
    println!("  {}  {}", style("Room:").bold(), style(&record.room_id).cyan());
    if let Some(bot) = &record.bot_id {
        println!("  {}  @{bot}", style("Bot:").bold());
    }
    println!("  {}  {}", style("Reason:").bold(), record.reason);
    println!("  {}  {}", style("Trigger:").bold(), style(&record.trigger_id).dim());
    println!("  {}  {}", style("State:").bold(), format_state(record.state));
    if let Some(by) = &record.acknowledged_by {
        println!("  {}  {by}", style("Acknowledged by:").bold());
    }
    if let Some(by) = &record.resolved_by {
        println!("  {}  {by}", style("Resolved by:").bold());
    }
    if let Some(note) = &record.resolution_note {
        println!("  {}  {note}", style("Note:").bold());
    }
    println!();
    Ok(())
}

fn state_cell(state: ResolutionState) -> Cell {
    match state {
        ResolutionState::Pending => Cell::new("pending").fg(Color::Yellow),
        ResolutionState::Acknowledged => Cell::new("acknowledged").fg(Color::Cyan),
        ResolutionState::Resolved => Cell::new("resolved").fg(Color::Green),
    }
}

fn format_state(state: ResolutionState) -> String {
    match state {
        ResolutionState::Pending => format!("{}", style("pending").yellow()),
        ResolutionState::Acknowledged => format!("{}", style("acknowledged").cyan()),
        ResolutionState::Resolved => format!("{}", style("resolved").green()),
    }
}
