//! System status dashboard command.

use anyhow::Result;
use console::style;

use conclave_types::escalation::EscalationFilter;
use conclave_types::role_card::ProposalStatus;

use crate::state::AppState;

/// Display system status dashboard.
///
/// Shows room and message counts, the bot roster size, work waiting on a
/// human, and where state lives.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let conclave = &state.conclave;
    let rooms = conclave.rooms().list(true).await?;
    let active = rooms.iter().filter(|r| !r.archived).count();
    let archived = rooms.len() - active;
    let total_messages: u64 = rooms.iter().map(|r| r.last_seq).sum();

    let bots = conclave.dispatcher().roster().await?;
    let open_escalations = conclave
        .escalations()
        .list(EscalationFilter::Open, None)
        .await?
        .len();
    let pending_proposals = conclave
        .cards()
        .list_proposals(None, Some(ProposalStatus::Pending))
        .await?
        .len();

    let config = state.config();
    let gateway = config.invoker.endpoint.as_deref().unwrap_or("not configured");

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "rooms": {
                "total": rooms.len(),
                "active": active,
                "archived": archived,
            },
            "events": total_messages,
            "bots": bots.len(),
            "coordinator": config.coordinator_bot,
            "open_escalations": open_escalations,
            "pending_proposals": pending_proposals,
            "gateway": config.invoker.endpoint,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Conclave v{}",
        style("⚡").bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!();

    println!("  {}", style("── Rooms ──").dim());
    println!("  Active:   {}", style(active).green());
    if archived > 0 {
        println!("  Archived: {}", style(archived).dim());
    }
    println!("  Events:   {}", total_messages);
    println!();

    println!("  {}", style("── Bots ──").dim());
    println!("  Roster:      {}", style(bots.len()).bold());
    println!("  Coordinator: @{}", config.coordinator_bot);
    println!();

    println!("  {}", style("── Needs review ──").dim());
    let count = |n: usize| {
        if n > 0 {
            style(n).yellow().bold()
        } else {
            style(n).dim()
        }
    };
    println!("  Escalations: {}", count(open_escalations));
    println!("  Proposals:   {}", count(pending_proposals));
    println!();

    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Database: {}", style("SQLite (WAL mode)").dim());
    println!("  Gateway:  {}", style(gateway).dim());
    println!();

    Ok(())
}
