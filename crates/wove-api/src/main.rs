//! Wove CLI and HTTP server entry point.
//!
//! Binary name: `wove`
//!
//! Parses CLI arguments, initializes tracing, the database, and config,
//! then dispatches to the interactive chat, the session commands, or the
//! HTTP server.

mod cli;
mod http;
mod state;

use anyhow::Context;
use clap::Parser;
use clap_complete::generate;
use uuid::Uuid;

use wove_core::chat::Selection;
use wove_observe::tracing_setup::{init_tracing, shutdown_tracing};

use cli::{Cli, Commands, SessionCommand};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity; RUST_LOG wins when set.
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,wove=debug",
        _ => "trace",
    };
    init_tracing(filter, cli.otel).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "wove", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init(cli.owner.clone()).await?;

    match cli.command {
        Commands::Chat { session, new } => {
            let selection = match (session, new) {
                (_, true) => Selection::NewChat,
                (Some(id), false) => Selection::Session(
                    id.parse::<Uuid>()
                        .with_context(|| format!("'{id}' is not a valid session ID"))?,
                ),
                (None, false) => Selection::Latest,
            };
            cli::chat::loop_runner::run_chat_loop(&state, selection).await?;
        }

        Commands::Sessions { action } => match action {
            SessionCommand::List => cli::session::list_sessions(&state, cli.json).await?,
            SessionCommand::Show { id } => cli::session::show_session(&state, &id, cli.json).await?,
            SessionCommand::Rename { id, title } => {
                cli::session::rename_session(&state, &id, &title, cli.json).await?
            }
            SessionCommand::Delete { id, force } => {
                cli::session::delete_session(&state, &id, force, cli.json).await?
            }
        },

        Commands::Serve { port, host } => {
            let host = host.unwrap_or_else(|| state.config.server.host.clone());
            let port = port.unwrap_or(state.config.server.port);
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("could not bind {addr}"))?;

            println!(
                "  {} Wove API listening on {}",
                console::style("⚡").bold(),
                console::style(format!("http://{addr}")).cyan()
            );
            println!("  {}", console::style("Press Ctrl+C to stop").dim());

            let router = http::router::build_router(state.with_default_upstream());

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            println!("\n  Server stopped.");
        }

        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Ctrl+C handler unavailable");
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
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
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
}
