//! Role card CLI commands: show, layers, set, propose, proposals, approve,
//! reject.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use conclave_types::role_card::{ProposalStatus, RoleCard, RoleCardLayer, RoleCardProposal, RoleCardScope};

use super::{format_relative_time, parse_id};
use crate::state::AppState;

pub async fn show_card(state: &AppState, bot_id: &str, json: bool) -> Result<()> {
    let card = state.conclave.cards().load(bot_id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&card)?);
        return Ok(());
    }
    print_card(&card);
    Ok(())
}

/// Print the workspace, global and built-in layers as stored.
pub async fn show_layers(state: &AppState, bot_id: &str, json: bool) -> Result<()> {
    let layers = state.conclave.cards().layers(bot_id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&layers)?);
        return Ok(());
    }

    println!();
    for (name, layer) in [
        ("workspace", &layers.workspace),
        ("global", &layers.global),
        ("built-in", &layers.builtin),
    ] {
        println!("  {}", style(format!("── {name} ──")).dim());
        match layer {
            Some(layer) => println!("{}", indent(&serde_json::to_string_pretty(layer)?)),
            None => println!("    {}", style("(not defined)").dim()),
        }
    }
    println!();
    Ok(())
}

pub async fn set_layer(state: &AppState, bot_id: &str, file: &Path, scope: &str, json: bool) -> Result<()> {
    let scope: RoleCardScope = scope.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let layer = read_layer(file).await?;

    state.conclave.cards().save_layer(bot_id, &layer, scope).await?;
    let card = state.conclave.cards().load(bot_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&card)?);
    } else {
        println!(
            "  {} Saved {scope} layer for {}",
            style("✓").green().bold(),
            style(format!("@{bot_id}")).cyan()
        );
    }
    Ok(())
}

pub async fn propose(
    state: &AppState,
    bot_id: &str,
    file: &Path,
    reason: &str,
    proposed_by: &str,
    json: bool,
) -> Result<()> {
    let changes = read_layer(file).await?;
    let proposal = state
        .conclave
        .cards()
        .propose_update(bot_id, changes, reason, proposed_by)
        .await?;
    print_proposal(&proposal, json)
}

pub async fn list_proposals(
    state: &AppState,
    bot_id: Option<&str>,
    status: Option<&str>,
    json: bool,
) -> Result<()> {
    let status = status
        .map(|s| s.parse::<ProposalStatus>().map_err(|e| anyhow::anyhow!(e)))
        .transpose()?;
    let proposals = state.conclave.cards().list_proposals(bot_id, status).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&proposals)?);
        return Ok(());
    }

    if proposals.is_empty() {
        println!("  {} No proposals.", style("i").blue().bold());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Bot").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Reason").fg(Color::White),
        Cell::new("Proposed").fg(Color::White),
    ]);
    for p in &proposals {
        let status = match p.status {
            ProposalStatus::Pending => Cell::new("pending").fg(Color::Yellow),
            ProposalStatus::Approved => Cell::new("approved").fg(Color::Green),
            ProposalStatus::Rejected => Cell::new("rejected").fg(Color::DarkGrey),
        };
        table.add_row(vec![
            Cell::new(p.id.to_string()).fg(Color::DarkGrey),
            Cell::new(format!("@{}", p.bot_id)).fg(Color::Cyan),
            status,
            Cell::new(&p.reason),
            Cell::new(format_relative_time(&p.created_at)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn approve(state: &AppState, id: &str, scope: &str, approver: &str, json: bool) -> Result<()> {
    let id = parse_id(id)?;
    let scope: RoleCardScope = scope.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let proposal = state.conclave.cards().approve_proposal(&id, scope, approver).await?;
    print_proposal(&proposal, json)
}

pub async fn reject(state: &AppState, id: &str, decider: &str, json: bool) -> Result<()> {
    let id = parse_id(id)?;
    let proposal = state.conclave.cards().reject_proposal(&id, decider).await?;
    print_proposal(&proposal, json)
}

async fn read_layer(file: &Path) -> Result<RoleCardLayer> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not a role card layer", file.display()))
}

fn print_proposal(proposal: &RoleCardProposal, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(proposal)?);
        return Ok(());
    }
    println!();
    println!(
        "  {} Proposal {} for {} is {}",
        style("✓").green().bold(),
        style(proposal.id).dim(),
        style(format!("@{}", proposal.bot_id)).cyan(),
        style(proposal.status).bold()
    );
    if let Some(scope) = proposal.applied_scope {
        println!("    applied at {scope} scope");
    }
    println!();
    Ok(())
}

fn print_card(card: &RoleCard) {
    let list = |items: &[String]| {
        if items.is_empty() {
            "-".to_string()
        } else {
            items.join("; ")
        }
    };

    println!();
    println!(
        "  {}  {}",
        style(&card.display_name).bold(),
        style(format!("@{}", card.bot_id)).cyan()
    );
    println!();
    println!("  {}  {}", style("Domain:").bold(), card.domain);
    println!("  {}  {}", style("Inputs:").bold(), list(&card.inputs));
    println!("  {}  {}", style("Outputs:").bold(), list(&card.outputs));
    println!("  {}  {}", style("Done when:").bold(), list(&card.definition_of_done));
    println!("  {}  {}", style("Metrics:").bold(), list(&card.metrics));

    if !card.hard_bans.is_empty() {
        println!();
        println!("  {}", style("── Hard bans ──").dim());
        for ban in &card.hard_bans {
            println!("  {} {}  {}", style("✗").red(), style(&ban.id).dim(), ban.reason);
        }
    }
    if !card.escalation_triggers.is_empty() {
        println!();
        println!("  {}", style("── Escalates ──").dim());
        for trigger in &card.escalation_triggers {
            println!("  {} {}  {}", style("!").yellow(), style(&trigger.id).dim(), trigger.reason);
        }
    }
    println!();
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
