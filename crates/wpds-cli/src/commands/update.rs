use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{debug, info};
use wpds::{
    CatalogKind, Concurrency, Connector, ConnectorKind, FileType, RunContext, Stats, StatsSink,
    SyncOutcome, Syncer,
};
use wpds_wporg::{ApiConnector, ArchiveFetcher, Endpoints, SvnConnector, svn_available};

use crate::commands::report;
use crate::config::{AppConfig, ConnectorChoice};

/// Client identifier sent with every HTTP request.
pub const USER_AGENT: &str = concat!("wpds/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Default, Args)]
pub struct UpdateArgs {
    /// Number of simultaneous downloads (10-10000)
    #[arg(short = 'c', long)]
    pub concurrent_actions: Option<usize>,
    /// Files to download per item: all or readme
    #[arg(short = 'f', long, value_parser = parse_file_type)]
    pub file_type: Option<FileType>,
    /// Backend for revisions and item lists
    #[arg(long, value_enum)]
    pub connector: Option<ConnectorChoice>,
    /// Directory holding the mirror (defaults to the current directory)
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

fn parse_file_type(s: &str) -> Result<FileType, String> {
    FileType::parse(s).ok_or_else(|| format!("unknown file type '{s}' (expected all or readme)"))
}

/// Flags merged over the config file, validated before anything touches
/// the network.
#[derive(Debug, Clone)]
pub struct UpdateSettings {
    pub kind: CatalogKind,
    pub concurrency: Concurrency,
    pub file_type: FileType,
    pub connector: ConnectorChoice,
    pub svn_program: PathBuf,
    pub item_timeout: Duration,
    pub endpoints: Endpoints,
    pub working_directory: PathBuf,
}

impl UpdateSettings {
    pub fn resolve(
        kind: CatalogKind,
        args: UpdateArgs,
        config: &AppConfig,
        working_directory: PathBuf,
    ) -> Result<Self> {
        let concurrency =
            Concurrency::new(args.concurrent_actions.unwrap_or(config.concurrent_actions))?;

        if config.fetch_timeout_secs == 0 {
            anyhow::bail!("fetch_timeout_secs must be greater than zero");
        }

        Ok(Self {
            kind,
            concurrency,
            file_type: args.file_type.unwrap_or(config.file_type),
            connector: args.connector.unwrap_or(config.connector),
            svn_program: config.svn_program.clone(),
            item_timeout: Duration::from_secs(config.fetch_timeout_secs),
            endpoints: config.endpoints.clone(),
            working_directory: args.dir.unwrap_or(working_directory),
        })
    }
}

async fn select_connector(settings: &UpdateSettings) -> (ConnectorKind, Arc<dyn Connector>) {
    let use_svn = match settings.connector {
        ConnectorChoice::Api => false,
        ConnectorChoice::Svn => true,
        ConnectorChoice::Auto => {
            let found = svn_available(&settings.svn_program).await;
            debug!(program = %settings.svn_program.display(), found, "probed for svn client");
            found
        }
    };

    if use_svn {
        let connector = SvnConnector::new(&settings.svn_program, settings.endpoints.clone());
        (ConnectorKind::Svn, Arc::new(connector))
    } else {
        let connector = ApiConnector::new(USER_AGENT, settings.endpoints.clone());
        (ConnectorKind::Api, Arc::new(connector))
    }
}

/// Run one update and print its report to stdout.
pub async fn run(settings: UpdateSettings) -> Result<SyncOutcome> {
    let (connector_kind, connector) = select_connector(&settings).await;
    let fetcher = Arc::new(ArchiveFetcher::new(USER_AGENT, settings.endpoints.clone()));

    info!(
        kind = %settings.kind,
        connector = %connector_kind,
        concurrency = %settings.concurrency,
        file_type = %settings.file_type,
        "updating"
    );

    let stats = Arc::new(Stats::new());
    let mut ctx = RunContext::new(
        settings.kind,
        settings.concurrency,
        connector_kind,
        &settings.working_directory,
        stats.clone(),
    )
    .with_file_type(settings.file_type);

    let outcome = Syncer::new(connector, fetcher)
        .with_item_timeout(settings.item_timeout)
        .run(&mut ctx)
        .await
        .with_context(|| format!("failed to update {}", settings.kind))?;

    report::print_outcome(settings.kind, &outcome, &stats.summary());
    Ok(outcome)
}
