//! Conductor CLI entry point.
//!
//! Binary name: `conductor`
//!
//! Parses CLI arguments, loads configuration, sets up tracing, then
//! dispatches to the command handler.

mod cli;
mod config;
mod echo;

use std::path::PathBuf;

use clap::Parser;
use clap_complete::generate;

use cli::run::RunOutput;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need config or logging
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "conductor", &mut std::io::stdout());
        return Ok(());
    }

    let config_path = config::resolve_config_path(cli.config.as_deref());
    let (global, origin) = config::load_global_config(config_path.as_deref()).await;

    // Verbosity flags override the configured filter
    let mut logging = global.logging.clone();
    match cli.verbose {
        0 if cli.quiet => logging.filter = "error".to_string(),
        0 => {}
        1 => logging.filter = "info,conductor_core=debug".to_string(),
        _ => logging.filter = "trace".to_string(),
    }
    if let Err(e) = conductor_observe::init_tracing(&logging) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }
    origin.log();

    let outcome = dispatch(cli, global).await;
    conductor_observe::shutdown_tracing();
    outcome
}

async fn dispatch(cli: Cli, global: conductor_types::config::GlobalConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Validate { file } => cli::workflow::handle_validate(&file, cli.json, cli.quiet),

        Commands::Fmt { file, write } => {
            cli::workflow::handle_fmt(&file, write, cli.json, cli.quiet)
        }

        Commands::Plan { file, dot } => cli::workflow::handle_plan(
            &file,
            dot,
            global.engine.default_max_concurrency,
            cli.json,
        ),

        Commands::List { dir } => {
            let dir = dir
                .or(global.workflows_dir)
                .unwrap_or_else(|| PathBuf::from("."));
            cli::workflow::handle_list(&dir, cli.json)
        }

        Commands::Run {
            file,
            vars,
            vars_json,
        } => {
            cli::run::handle_run(
                &file,
                vars,
                vars_json.as_deref(),
                global.engine,
                RunOutput {
                    json: cli.json,
                    quiet: cli.quiet,
                },
            )
            .await
        }

        Commands::Completions { .. } => unreachable!("handled in main"),
    }
}
