//! statdiff - what did this run do to the database?
//!
//! Takes a snapshot of PostgreSQL per-table activity counters
//! (`pg_stat_user_tables`) under a correlation key, and later compares the
//! live counters against it:
//! - `statdiff start <key>` stores the baseline
//! - `statdiff end <key>` prints, as JSON, which tables were created or
//!   removed, how each insert/update/delete counter moved, and the rows whose
//!   lifecycle timestamps fall after the baseline

mod catalog;
mod cli;
mod config;
mod error;
mod report;
mod session;
mod snapshot;
mod stats;

use crate::cli::{Cli, Mode};
use crate::config::Settings;
use crate::error::AppError;
use crate::session::Session;
use crate::snapshot::SnapshotStore;
use crate::stats::PostgresStatSource;
use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(app_error) = e.downcast_ref::<AppError>() {
                app_error.log();
            }
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::from_cli(&cli)
        .map_err(AppError::from)
        .context("Failed to load configuration")?;

    let store = SnapshotStore::new(&settings.storage.dir);

    // validate the key, and refuse a duplicate start, before opening a connection
    match cli.mode {
        Mode::Start => store.ensure_absent(&cli.key)?,
        Mode::End => {
            store.path_for(&cli.key)?;
        }
    }

    let source = PostgresStatSource::connect(&settings.database).await?;
    let session = Session::new(&source, &store, &settings.catalog);

    match cli.mode {
        Mode::Start => {
            session.start(&cli.key).await?;
            info!("Baseline stored; run 'statdiff end {}' when done", cli.key);
        }
        Mode::End => {
            let diff = session.end(&cli.key).await?;
            println!("{}", report::render_json(&diff)?);
        }
    }

    Ok(())
}

/// Initialize tracing with structured logging on stderr; stdout is reserved
/// for the diff
fn init_tracing(verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("statdiff=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("statdiff=info"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true)
                .compact(),
        )
        .init();
}
