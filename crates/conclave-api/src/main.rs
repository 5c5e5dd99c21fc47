//! Conclave CLI and REST API entry point.
//!
//! Binary name: `conclave`
//!
//! Parses CLI arguments, loads configuration, initializes tracing and the
//! engine, then dispatches to the appropriate command handler or starts the
//! REST/WebSocket server.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{BotCommand, CardCommand, Cli, Commands, EscalationCommand, RoomCommand};
use conclave_infra::config::{config_path, resolve_data_dir, try_load_config, write_default_config};
use conclave_observe::{TracingOptions, init_tracing, shutdown_tracing};
use conclave_types::config::ConclaveConfig;
use state::AppState;

/// Log filter for the CLI flags. `None` defers to `RUST_LOG`, then the
/// server default.
fn log_filter(cli: &Cli) -> Option<String> {
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 if std::env::var_os("RUST_LOG").is_some() => return None,
        0 if matches!(cli.command, Commands::Serve { .. }) => return None,
        0 => "warn",
        1 => "info,conclave=debug",
        2 => "debug",
        _ => "trace",
    };
    Some(filter.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "conclave", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = resolve_data_dir();
    let loaded = try_load_config(&data_dir).await;
    let telemetry = loaded
        .as_ref()
        .map(|c| c.telemetry.clone())
        .unwrap_or_default();

    init_tracing(&TracingOptions {
        otel: telemetry.otel,
        json: telemetry.json,
        filter: log_filter(&cli),
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    if matches!(cli.command, Commands::Init) {
        let written = write_default_config(&data_dir).await?;
        let path = config_path(&data_dir);
        let config = loaded?;
        let state = AppState::init(data_dir, config).await?;
        if cli.json {
            let value = serde_json::json!({
                "config": path.display().to_string(),
                "written": written,
                "data_dir": state.data_dir.display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else if written {
            println!(
                "  {} Wrote {}",
                console::style("✓").green().bold(),
                console::style(path.display()).cyan()
            );
        } else {
            println!(
                "  {} {} already exists, left unchanged",
                console::style("i").blue().bold(),
                path.display()
            );
        }
        shutdown_tracing();
        return Ok(());
    }

    let config = loaded.unwrap_or_else(|err| {
        tracing::warn!("{err}, using defaults");
        ConclaveConfig::default()
    });

    // Initialize application state (DB, engine)
    let state = AppState::init(data_dir, config).await?;
    let json = cli.json;

    match cli.command {
        Commands::Room { action } => match action {
            RoomCommand::List { all } => cli::room::list_rooms(&state, all, json).await?,
            RoomCommand::Create {
                name,
                room_type,
                participants,
                owner,
            } => {
                cli::room::create_room(&state, name, &room_type, participants, owner, json).await?;
            }
            RoomCommand::Show { id } => cli::room::show_room(&state, &id, json).await?,
            RoomCommand::Archive { id } => cli::room::archive_room(&state, &id, json).await?,
            RoomCommand::Delete { id, force } => {
                cli::room::delete_room(&state, &id, force, json).await?;
            }
            RoomCommand::Summary { id, summary } => {
                cli::room::set_summary(&state, &id, &summary, json).await?;
            }
            RoomCommand::Add { id, bot } => {
                cli::room::add_participant(&state, &id, &bot, json).await?;
            }
            RoomCommand::Remove { id, bot } => {
                cli::room::remove_participant(&state, &id, &bot, json).await?;
            }
        },

        Commands::Send {
            text,
            room,
            sender,
            no_wait,
        } => {
            let text = text.join(" ");
            cli::message::send(&state, &room, &sender, &text, no_wait, json).await?;
        }

        Commands::History {
            room,
            limit,
            before,
            after,
        } => {
            cli::message::history(&state, &room, limit, before, after, json).await?;
        }

        Commands::Search { query, room, limit } => {
            let query = query.join(" ");
            cli::message::search(&state, &room, &query, limit, json).await?;
        }

        Commands::Tail { room, since } => {
            cli::message::tail(&state, &room, since, json).await?;
        }

        Commands::Edit {
            room,
            message_id,
            content,
        } => {
            cli::message::edit(&state, &room, &message_id, &content, json).await?;
        }

        Commands::Bot { action } => match action {
            BotCommand::List => cli::bot::list_bots(&state, json).await?,
            BotCommand::Show { bot } => cli::bot::show_bot(&state, &bot, json).await?,
        },

        Commands::Card { action } => match action {
            CardCommand::Show { bot } => cli::card::show_card(&state, &bot, json).await?,
            CardCommand::Layers { bot } => cli::card::show_layers(&state, &bot, json).await?,
            CardCommand::Set { bot, file, scope } => {
                cli::card::set_layer(&state, &bot, &file, &scope, json).await?;
            }
            CardCommand::Propose {
                bot,
                file,
                reason,
                proposed_by,
            } => {
                cli::card::propose(&state, &bot, &file, &reason, &proposed_by, json).await?;
            }
            CardCommand::Proposals { bot, status } => {
                cli::card::list_proposals(&state, bot.as_deref(), status.as_deref(), json).await?;
            }
            CardCommand::Approve {
                id,
                scope,
                approver,
            } => {
                cli::card::approve(&state, &id, &scope, &approver, json).await?;
            }
            CardCommand::Reject { id, decider } => {
                cli::card::reject(&state, &id, &decider, json).await?;
            }
        },

        Commands::Escalation { action } => match action {
            EscalationCommand::List { filter, room } => {
                cli::escalation::list_escalations(&state, &filter, room.as_deref(), json).await?;
            }
            EscalationCommand::Show { id } => {
                cli::escalation::show_escalation(&state, &id, json).await?;
            }
            EscalationCommand::Ack { id, by } => {
                cli::escalation::acknowledge(&state, &id, &by, json).await?;
            }
            EscalationCommand::Resolve { id, by, note } => {
                cli::escalation::resolve(&state, &id, &by, note.as_deref(), json).await?;
            }
        },

        Commands::Status => cli::status::status(&state, json).await?,

        Commands::Serve { port, host } => {
            let server = &state.config().server;
            let host = host.unwrap_or_else(|| server.host.clone());
            let port = port.unwrap_or(server.port);

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!(%addr, "server listening");

            println!(
                "  {} Conclave API listening on {}",
                console::style("⚡").bold(),
                console::style(format!("http://{addr}")).cyan()
            );
            println!("  {}", console::style("Press Ctrl+C to stop").dim());

            let router = http::router::build_router(state.clone());

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            state.db_pool.close().await;
            println!("\n  Server stopped.");
        }

        Commands::Init | Commands::Completions { .. } => unreachable!("handled above"),
    }

    shutdown_tracing();
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
