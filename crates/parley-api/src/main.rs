//! Parley CLI and REST API entry point.
//!
//! Binary name: `parley`
//!
//! Parses CLI arguments, initializes tracing, database and services, then
//! dispatches to the appropriate command handler or starts the REST API server.

mod cli;
mod http;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,parley=debug",
        _ => "trace",
    };

    parley_observe::tracing_setup::init_tracing(filter, cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;

    parley_observe::tracing_setup::shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Initialize application state (config, DB, services)
    let state = AppState::init().await?;
    tracing::debug!(data_dir = %state.data_dir.display(), "Application state ready");

    match cli.command {
        Commands::Serve { port, host } => {
            let host = host.unwrap_or_else(|| state.config.server.host.clone());
            let port = port.unwrap_or(state.config.server.port);
            if state.completion_service.is_none() {
                tracing::warn!(
                    env = %state.config.provider.api_key_env,
                    "No provider API key; /chat/stream will answer 503"
                );
            }

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            if !cli.quiet {
                println!(
                    "  {} Parley API listening on {}",
                    console::style("⚡").bold(),
                    console::style(format!("http://{addr}")).cyan()
                );
                println!("  {}", console::style("Press Ctrl+C to stop").dim());
            }

            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            if !cli.quiet {
                println!("\n  Server stopped.");
            }
        }

        Commands::Ask {
            chat_id,
            user,
            message,
        } => {
            cli::ask::ask(&state, chat_id, user, message, cli.json).await?;
        }

        Commands::Show { chat_id } => {
            cli::conversation::show(&state, chat_id, cli.json).await?;
        }

        Commands::End { chat_id } => {
            cli::conversation::end(&state, chat_id, cli.json).await?;
        }
    }

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
}
