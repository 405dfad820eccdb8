mod commands;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use wpds::{CatalogKind, SyncError, SyncOutcome};

use crate::commands::update::{self, UpdateArgs, UpdateSettings};

/// Exit status for a run that found nothing new to fetch.
const EXIT_UP_TO_DATE: u8 = 3;

#[derive(Parser)]
#[command(name = "wpds", version)]
#[command(about = "Mirror plugins and themes from the WordPress directory")]
struct Cli {
    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Update files from the WordPress directory
    #[command(visible_alias = "sync")]
    Update {
        #[command(subcommand)]
        target: UpdateTarget,
    },
}

#[derive(Subcommand)]
enum UpdateTarget {
    /// Update plugin files
    #[command(after_help = "Example: wpds update plugins -c 250")]
    Plugins(UpdateArgs),
    /// Update theme files
    #[command(after_help = "Example: wpds update themes -c 250")]
    Themes(UpdateArgs),
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let app_config = config::load_config(cli.config.as_deref());

    match cli.command {
        Command::Update { target } => {
            let (kind, args) = match target {
                UpdateTarget::Plugins(args) => (CatalogKind::Plugins, args),
                UpdateTarget::Themes(args) => (CatalogKind::Themes, args),
            };
            let cwd = std::env::current_dir().context("could not determine working directory")?;
            let settings = UpdateSettings::resolve(kind, args, &app_config, cwd)?;

            match update::run(settings).await? {
                SyncOutcome::UpToDate { .. } => Ok(ExitCode::from(EXIT_UP_TO_DATE)),
                SyncOutcome::Completed(_) => Ok(ExitCode::SUCCESS),
            }
        }
    }
}

/// Extra guidance for failures the user can act on.
fn error_hint(err: &anyhow::Error) -> Option<&'static str> {
    match err.downcast_ref::<SyncError>()? {
        SyncError::Connector(e) if e.is_protocol_mismatch() => Some(
            "the directory answered in an unexpected format; try --connector svn or check the configured endpoints",
        ),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            match error_hint(&err) {
                Some(hint) => error!(hint, "{err:#}"),
                None => error!("{err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}
