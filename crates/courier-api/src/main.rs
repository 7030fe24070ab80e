//! Courier CLI and REST API entry point.
//!
//! Binary name: `courier`
//!
//! Parses CLI arguments, initializes tracing and services, then dispatches
//! to the requested command or starts the REST API server.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;

use courier_infra::config::load_config;
use courier_infra::filesystem::ensure_data_dir;
use courier_observe::{TracingOptions, init_tracing, shutdown_tracing};
use courier_types::stream::StreamOptions;

use cli::{Cli, Commands};
use state::{AppState, build_stream_manager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "courier", &mut std::io::stdout());
        return Ok(());
    }

    let options = TracingOptions::from_verbosity(cli.verbose, cli.quiet)
        .with_json(cli.json_logs)
        .with_otel(cli.otel);
    init_tracing(&options).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve { port, host } => {
            let state = AppState::init().await?;
            cli::serve::serve(state, host, port, cli.quiet).await?;
        }

        Commands::Stream {
            prompt,
            session,
            agent,
            model,
        } => {
            let data_dir = ensure_data_dir().await?;
            let config = load_config(&data_dir).await;
            let manager = build_stream_manager(&config)?;

            let mut options = StreamOptions::new(session);
            options.agent_id = agent;
            options.model = model;

            let mut stdout = std::io::stdout();
            cli::stream::stream_prompt(&manager, prompt, options, cli.json, &mut stdout).await?;
            manager.shutdown();
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}
