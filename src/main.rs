//! Keiba CLI
//!
//! Ingests historical race results and suggests tickets for upcoming races.

mod cli;

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr; stdout carries command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keiba_history=info,keiba=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::InitDb { db_path } => cli::run_init_db(config, db_path)?,
        Commands::Ingest {
            path,
            recursive,
            db_path,
            format,
        } => {
            if !cli::run_ingest(config, path, recursive, db_path, format)? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Stats {
            profile,
            relax,
            db_path,
            format,
        } => cli::run_stats(config, profile, relax, db_path, format)?,
        Commands::Suggest {
            profile,
            horse_popularities,
            budget,
            num_tickets,
            bet_type,
            relax,
            db_path,
            format,
        } => cli::run_suggest(
            config,
            profile,
            horse_popularities,
            budget,
            num_tickets,
            bet_type,
            relax,
            db_path,
            format,
        )?,
    }

    Ok(ExitCode::SUCCESS)
}
