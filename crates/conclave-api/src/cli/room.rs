//! Room CLI commands: list, create, show, archive, delete, summary,
//! participants.

use anyhow::Result;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use dialoguer::Confirm;

use conclave_types::room::{CreateRoomRequest, Room, RoomType};

use super::format_relative_time;
use crate::state::AppState;

/// List rooms in a table, newest activity first.
pub async fn list_rooms(state: &AppState, all: bool, json: bool) -> Result<()> {
    let mut rooms = state.conclave.rooms().list(all).await?;
    rooms.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    if json {
        println!("{}", serde_json::to_string_pretty(&rooms)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Room").fg(Color::White),
        Cell::new("Type").fg(Color::White),
        Cell::new("Participants").fg(Color::White),
        Cell::new("Messages").fg(Color::White),
        Cell::new("Updated").fg(Color::White),
    ]);

    for room in &rooms {
        let name = if room.archived {
            Cell::new(format!("{} (archived)", room.id)).fg(Color::DarkGrey)
        } else {
            Cell::new(&room.id).fg(Color::Cyan)
        };
        table.add_row(vec![
            name,
            Cell::new(room.room_type.to_string()),
            Cell::new(room.participants.join(", ")),
            Cell::new(room.last_seq),
            Cell::new(format_relative_time(&room.updated_at)).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn create_room(
    state: &AppState,
    name: String,
    room_type: &str,
    participants: Vec<String>,
    owner: Option<String>,
    json: bool,
) -> Result<()> {
    let room_type: RoomType = room_type.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let room = state
        .conclave
        .rooms()
        .create(CreateRoomRequest {
            name,
            room_type,
            participants,
            owner,
        })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&room)?);
        return Ok(());
    }

    println!();
    println!("  {} Room created", style("✓").green().bold());
    print_room(&room);
    Ok(())
}

pub async fn show_room(state: &AppState, id: &str, json: bool) -> Result<()> {
    let room = state.conclave.rooms().get(id).await?;
    let escalations = state
        .conclave
        .escalations()
        .list(conclave_types::escalation::EscalationFilter::Open, Some(id))
        .await?;

    if json {
        let value = serde_json::json!({
            "room": room,
            "open_escalations": escalations,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!();
    print_room(&room);
    if !escalations.is_empty() {
        println!(
            "  {} {} open escalation(s), see {}",
            style("!").yellow().bold(),
            escalations.len(),
            style(format!("conclave escalation list --room {id}")).yellow()
        );
        println!();
    }
    Ok(())
}

pub async fn archive_room(state: &AppState, id: &str, json: bool) -> Result<()> {
    let room = state.conclave.rooms().archive(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&room)?);
    } else {
        println!("  {} Room '{}' archived", style("✓").green().bold(), room.id);
    }
    Ok(())
}

pub async fn delete_room(state: &AppState, id: &str, force: bool, json: bool) -> Result<()> {
    let room = state.conclave.rooms().get(id).await?;

    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Permanently delete room '{}' and its {} message(s)?",
                style(&room.id).red().bold(),
                room.last_seq
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    state.conclave.delete_room(id).await?;

    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("  {} Room '{}' deleted", style("✓").green().bold(), id);
    }
    Ok(())
}

pub async fn set_summary(state: &AppState, id: &str, summary: &str, json: bool) -> Result<()> {
    let room = state.conclave.rooms().update_summary(id, summary).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&room)?);
    } else {
        println!("  {} Summary updated", style("✓").green().bold());
    }
    Ok(())
}

pub async fn add_participant(state: &AppState, id: &str, bot: &str, json: bool) -> Result<()> {
    let room = state.conclave.rooms().add_participant(id, bot).await?;
    print_participants(&room, json)
}

pub async fn remove_participant(state: &AppState, id: &str, bot: &str, json: bool) -> Result<()> {
    let room = state.conclave.rooms().remove_participant(id, bot).await?;
    print_participants(&room, json)
}

fn print_participants(room: &Room, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&room.participants)?);
    } else {
        println!(
            "  {} {}: {}",
            style("✓").green().bold(),
            style(&room.id).cyan(),
            room.participants.join(", ")
        );
    }
    Ok(())
}

fn print_room(room: &Room) {
    println!();
    println!("  {}  {}", style("Room:").bold(), style(&room.id).cyan());
    println!("  {}  {}", style("Name:").bold(), room.name);
    println!("  {}  {}", style("Type:").bold(), room.room_type);
    println!("  {}  {}", style("Owner:").bold(), room.owner);
    println!(
        "  {}  {}",
        style("Participants:").bold(),
        room.participants.join(", ")
    );
    if !room.summary.is_empty() {
        println!("  {}  {}", style("Summary:").bold(), room.summary);
    }
    if room.archived {
        println!("  {}  {}", style("Status:").bold(), style("archived").dim());
    }
    println!(
        "  {}  {}",
        style("Created:").bold(),
        style(room.created_at.format("%Y-%m-%d %H:%M")).dim()
    );
    println!();
}
