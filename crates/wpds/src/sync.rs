use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::catalog::{CatalogItem, CatalogKind, dedup_items};
use crate::connector::{Connector, ConnectorError, PositionRange};
use crate::context::RunContext;
use crate::fetch::{BatchSummary, DEFAULT_ITEM_TIMEOUT, FetchPipeline, Fetcher};
use crate::layout;
use crate::state::{FsStateStore, StateError, StateStore};

/// Errors that abort a sync run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(
        "{} is not empty but has no readable position marker; remove the directory to start a fresh sync",
        .0.display()
    )]
    InconsistentState(PathBuf),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("I/O error: {0}")]
    Io(String),
}

/// How a run was started, decided by inspecting the catalog-kind directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Fresh,
    Resume,
}

/// What a completed run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub kind: CatalogKind,
    pub mode: SyncMode,
    /// Position the mirror was at before the run; `None` for fresh runs.
    pub from_position: Option<u64>,
    /// Position recorded in the marker at the end of the run.
    pub to_position: u64,
    pub main: BatchSummary,
    /// Present when a failure ledger was retried.
    pub retry: Option<BatchSummary>,
    /// Items left in the failure ledger for the next run.
    pub pending_failures: usize,
}

impl RunReport {
    /// The run completed but some items still need fetching.
    pub fn is_partial(&self) -> bool {
        self.pending_failures > 0
    }
}

/// Non-error terminal states of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(RunReport),
    UpToDate { current: u64, latest: u64 },
}

/// Runs fresh and resumable syncs of one catalog kind.
///
/// Phases never overlap: list retrieval, fetch, marker write and retry run
/// strictly in that order, and the marker is written only after every item
/// of the main pass has been attempted.
pub struct Syncer {
    connector: Arc<dyn Connector>,
    fetcher: Arc<dyn Fetcher>,
    item_timeout: Duration,
}

impl Syncer {
    pub fn new(connector: Arc<dyn Connector>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            connector,
            fetcher,
            item_timeout: DEFAULT_ITEM_TIMEOUT,
        }
    }

    pub fn with_item_timeout(mut self, item_timeout: Duration) -> Self {
        self.item_timeout = item_timeout;
        self
    }

    /// Sync using the state files inside the catalog-kind directory.
    pub async fn run(&self, ctx: &mut RunContext) -> Result<SyncOutcome, SyncError> {
        let store = Arc::new(FsStateStore::new(ctx.kind_directory()));
        self.run_with_store(ctx, store).await
    }

    pub async fn run_with_store(
        &self,
        ctx: &mut RunContext,
        store: Arc<dyn StateStore>,
    ) -> Result<SyncOutcome, SyncError> {
        let dir = ctx.kind_directory();
        let state = layout::probe(&dir)
            .map_err(|e| SyncError::Io(format!("{}: {e}", dir.display())))?;

        info!(
            kind = %ctx.kind,
            connector = %ctx.connector,
            dir = %dir.display(),
            ?state,
            "starting sync"
        );

        if state.is_fresh() {
            self.fresh(ctx, store, &dir).await
        } else {
            self.resume(ctx, store, &dir).await
        }
    }

    async fn fresh(
        &self,
        ctx: &mut RunContext,
        store: Arc<dyn StateStore>,
        dir: &Path,
    ) -> Result<SyncOutcome, SyncError> {
        let items = dedup_items(self.connector.full_item_list(ctx.kind).await?);
        let latest = self.connector.latest_position(ctx.kind).await?;
        ctx.latest_position = latest;
        info!(kind = %ctx.kind, items = items.len(), latest, "fresh sync");

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| SyncError::Io(format!("{}: {e}", dir.display())))?;

        let pipeline = self.pipeline(ctx, Arc::clone(&store));
        let main = pipeline.run(ctx.kind, ctx.file_type, dir, items).await;

        store.write_position(latest).await?;
        ctx.current_position = latest;

        let pending_failures = pending_failures(store.as_ref(), &main).await;
        Ok(SyncOutcome::Completed(RunReport {
            kind: ctx.kind,
            mode: SyncMode::Fresh,
            from_position: None,
            to_position: latest,
            main,
            retry: None,
            pending_failures,
        }))
    }

    async fn resume(
        &self,
        ctx: &mut RunContext,
        store: Arc<dyn StateStore>,
        dir: &Path,
    ) -> Result<SyncOutcome, SyncError> {
        let current = match store.read_position().await {
            Ok(position) => position,
            Err(StateError::NotFound(_) | StateError::Corrupt { .. }) => {
                return Err(SyncError::InconsistentState(dir.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        ctx.current_position = current;

        let latest = self.connector.latest_position(ctx.kind).await?;
        ctx.latest_position = latest;

        if latest <= current {
            info!(kind = %ctx.kind, current, latest, "already up to date");
            return Ok(SyncOutcome::UpToDate { current, latest });
        }

        let range = PositionRange::new(current, latest);
        debug!(connector = self.connector.label(), %range, "requesting delta");
        let items = dedup_items(self.connector.delta_item_list(ctx.kind, range).await?);
        info!(kind = %ctx.kind, %range, items = items.len(), "resuming sync");

        let pipeline = self.pipeline(ctx, Arc::clone(&store));
        let main = pipeline.run(ctx.kind, ctx.file_type, dir, items).await;

        store.write_position(latest).await?;
        ctx.current_position = latest;

        let retry = match take_failure_ledger(store.as_ref()).await {
            Some(failed) => {
                info!(kind = %ctx.kind, items = failed.len(), "retrying failed downloads");
                Some(pipeline.run(ctx.kind, ctx.file_type, dir, failed).await)
            }
            None => None,
        };

        let pending_failures = pending_failures(store.as_ref(), retry.as_ref().unwrap_or(&main)).await;
        Ok(SyncOutcome::Completed(RunReport {
            kind: ctx.kind,
            mode: SyncMode::Resume,
            from_position: Some(current),
            to_position: latest,
            main,
            retry,
            pending_failures,
        }))
    }

    fn pipeline(&self, ctx: &RunContext, store: Arc<dyn StateStore>) -> FetchPipeline {
        FetchPipeline::new(
            Arc::clone(&self.fetcher),
            store,
            Arc::clone(&ctx.stats),
            ctx.concurrency,
        )
        .with_item_timeout(self.item_timeout)
    }
}

/// Read and clear the failure ledger, so retry failures start a new one.
///
/// Runs after the marker is written, so nothing here aborts the run. A
/// ledger that cannot be deleted is still retried; entries that succeed
/// stay listed and are fetched again next time.
async fn take_failure_ledger(store: &dyn StateStore) -> Option<Vec<CatalogItem>> {
    if !store.has_failure_ledger().await {
        return None;
    }
    let failed = match store.read_failure_ledger().await {
        Ok(failed) => failed,
        Err(e) => {
            warn!("could not read the failure ledger, skipping retry: {e}");
            return None;
        }
    };
    if let Err(e) = store.delete_failure_ledger().await {
        warn!("could not delete the failure ledger, retrying anyway: {e}");
    }
    Some(failed)
}

/// Size of the ledger left for the next run, falling back to the last
/// batch's failures when the ledger cannot be read.
async fn pending_failures(store: &dyn StateStore, last: &BatchSummary) -> usize {
    match store.read_failure_ledger().await {
        Ok(ledger) => ledger.len(),
        Err(e) => {
            warn!("could not read the failure ledger: {e}");
            last.failure_count()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::context::{Concurrency, ConnectorKind};
    use crate::stats::{Stats, StatsSink};
    use crate::test_support::{ConnectorCall, InMemoryConnector, ScriptedFetcher};

    fn context(dir: &TempDir, stats: Arc<Stats>) -> RunContext {
        RunContext::new(
            CatalogKind::Plugins,
            Concurrency::new(10).unwrap(),
            ConnectorKind::Api,
            dir.path(),
            stats,
        )
    }

    fn slugs(items: &[CatalogItem]) -> Vec<&str> {
        items.iter().map(|i| i.as_str()).collect()
    }

    async fn seed_marker(dir: &TempDir, position: u64) -> FsStateStore {
        let store = FsStateStore::new(dir.path().join("plugins"));
        store.write_position(position).await.unwrap();
        store
    }

    /// Delegates to a real store with selected operations failing.
    struct FaultyStore {
        inner: FsStateStore,
        /// As if the process died between the fetch phase and the write.
        fail_marker_write: bool,
        fail_ledger_delete: bool,
    }

    impl FaultyStore {
        fn new(dir: &TempDir) -> Self {
            Self {
                inner: FsStateStore::new(dir.path().join("plugins")),
                fail_marker_write: false,
                fail_ledger_delete: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl StateStore for FaultyStore {
        async fn read_position(&self) -> Result<u64, StateError> {
            self.inner.read_position().await
        }
        async fn write_position(&self, position: u64) -> Result<(), StateError> {
            if self.fail_marker_write {
                return Err(StateError::Io("simulated crash".into()));
            }
            self.inner.write_position(position).await
        }
        async fn has_failure_ledger(&self) -> bool {
            self.inner.has_failure_ledger().await
        }
        async fn read_failure_ledger(&self) -> Result<Vec<CatalogItem>, StateError> {
            self.inner.read_failure_ledger().await
        }
        async fn delete_failure_ledger(&self) -> Result<(), StateError> {
            if self.fail_ledger_delete {
                return Err(StateError::Io("permission denied".into()));
            }
            self.inner.delete_failure_ledger().await
        }
        async fn append_failure(&self, item: &CatalogItem) -> Result<(), StateError> {
            self.inner.append_failure(item).await
        }
    }

    #[tokio::test]
    async fn missing_directory_runs_fresh_sync() {
        let dir = TempDir::new().unwrap();
        let connector = Arc::new(
            InMemoryConnector::new(3_000).with_items(["akismet", "hello-dolly", "akismet"]),
        );
        let fetcher = Arc::new(ScriptedFetcher::new());
        let stats = Arc::new(Stats::new());
        let mut ctx = context(&dir, stats.clone());

        let outcome = Syncer::new(connector.clone(), fetcher.clone())
            .run(&mut ctx)
            .await
            .unwrap();

        let SyncOutcome::Completed(report) = outcome else {
            panic!("expected completed run");
        };
        assert_eq!(report.mode, SyncMode::Fresh);
        assert_eq!(report.to_position, 3_000);
        assert_eq!(report.main.succeeded, 2);
        assert!(!report.is_partial());
        assert_eq!(
            connector.calls(),
            vec![ConnectorCall::FullItemList, ConnectorCall::LatestPosition]
        );
        assert_eq!(slugs(&fetcher.calls()).len(), 2);
        assert_eq!(ctx.current_position, 3_000);
        assert_eq!(ctx.latest_position, 3_000);

        let store = FsStateStore::new(dir.path().join("plugins"));
        assert_eq!(store.read_position().await.unwrap(), 3_000);
        assert!(dir.path().join("plugins/akismet.zip").is_file());
        assert_eq!(stats.summary().succeeded, 2);
    }

    #[tokio::test]
    async fn empty_directory_runs_fresh_sync() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("plugins")).unwrap();
        let connector = Arc::new(InMemoryConnector::new(10).with_items(["a"]));
        let mut ctx = context(&dir, Arc::new(Stats::new()));

        let outcome = Syncer::new(connector.clone(), Arc::new(ScriptedFetcher::new()))
            .run(&mut ctx)
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            SyncOutcome::Completed(RunReport { mode: SyncMode::Fresh, .. })
        ));
    }

    #[tokio::test]
    async fn populated_directory_without_marker_is_inconsistent() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("plugins")).unwrap();
        fs::write(dir.path().join("plugins/akismet.zip"), "zip").unwrap();
        let connector = Arc::new(InMemoryConnector::new(10));
        let fetcher = Arc::new(ScriptedFetcher::new());
        let mut ctx = context(&dir, Arc::new(Stats::new()));

        let err = Syncer::new(connector.clone(), fetcher.clone())
            .run(&mut ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::InconsistentState(_)));
        assert!(connector.calls().is_empty());
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn corrupt_marker_is_inconsistent() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("plugins")).unwrap();
        fs::write(dir.path().join("plugins/.last-revision"), "12ab").unwrap();
        let mut ctx = context(&dir, Arc::new(Stats::new()));

        let err = Syncer::new(
            Arc::new(InMemoryConnector::new(10)),
            Arc::new(ScriptedFetcher::new()),
        )
        .run(&mut ctx)
        .await
        .unwrap_err();

        assert!(matches!(err, SyncError::InconsistentState(_)));
    }

    #[tokio::test]
    async fn resume_fetches_exactly_the_delta() {
        let dir = TempDir::new().unwrap();
        let store = seed_marker(&dir, 100).await;
        let connector = Arc::new(InMemoryConnector::new(100));
        connector.push_change(99, "too-old");
        connector.push_change(105, "akismet");
        connector.push_change(110, "jetpack");
        connector.push_change(120, "akismet");
        connector.push_change(130, "wordfence");
        let fetcher = Arc::new(ScriptedFetcher::new());
        let mut ctx = context(&dir, Arc::new(Stats::new()));

        let outcome = Syncer::new(connector.clone(), fetcher.clone())
            .run(&mut ctx)
            .await
            .unwrap();

        let SyncOutcome::Completed(report) = outcome else {
            panic!("expected completed run");
        };
        assert_eq!(report.mode, SyncMode::Resume);
        assert_eq!(report.from_position, Some(100));
        assert_eq!(report.to_position, 130);
        assert!(report.retry.is_none());
        assert_eq!(
            connector.calls(),
            vec![
                ConnectorCall::LatestPosition,
                ConnectorCall::DeltaItemList(PositionRange::new(100, 130)),
            ]
        );

        let mut fetched: Vec<String> = fetcher.calls().iter().map(|i| i.to_string()).collect();
        fetched.sort();
        assert_eq!(fetched, vec!["akismet", "jetpack", "wordfence"]);
        assert_eq!(store.read_position().await.unwrap(), 130);
    }

    #[tokio::test]
    async fn resume_with_no_change_is_up_to_date_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = seed_marker(&dir, 500).await;
        let marker_before = fs::read(store.marker_path()).unwrap();
        let connector = Arc::new(InMemoryConnector::new(500));
        let fetcher = Arc::new(ScriptedFetcher::new());
        let syncer = Syncer::new(connector.clone(), fetcher.clone());

        for _ in 0..2 {
            let mut ctx = context(&dir, Arc::new(Stats::new()));
            let outcome = syncer.run(&mut ctx).await.unwrap();
            assert_eq!(
                outcome,
                SyncOutcome::UpToDate {
                    current: 500,
                    latest: 500
                }
            );
        }

        assert!(fetcher.calls().is_empty());
        assert_eq!(
            connector.calls(),
            vec![ConnectorCall::LatestPosition, ConnectorCall::LatestPosition]
        );
        assert_eq!(fs::read(store.marker_path()).unwrap(), marker_before);
    }

    #[tokio::test]
    async fn remote_behind_marker_never_moves_marker_backwards() {
        let dir = TempDir::new().unwrap();
        let store = seed_marker(&dir, 500).await;
        let connector = Arc::new(InMemoryConnector::new(450));
        let mut ctx = context(&dir, Arc::new(Stats::new()));

        let outcome = Syncer::new(connector, Arc::new(ScriptedFetcher::new()))
            .run(&mut ctx)
            .await
            .unwrap();

        assert!(matches!(outcome, SyncOutcome::UpToDate { .. }));
        assert_eq!(store.read_position().await.unwrap(), 500);
    }

    #[tokio::test]
    async fn connector_failure_aborts_before_any_fetch() {
        let dir = TempDir::new().unwrap();
        let connector = Arc::new(InMemoryConnector::new(10).with_items(["a", "b"]));
        connector.set_unavailable(true);
        let fetcher = Arc::new(ScriptedFetcher::new());
        let mut ctx = context(&dir, Arc::new(Stats::new()));

        let err = Syncer::new(connector, fetcher.clone())
            .run(&mut ctx)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Connector(ConnectorError::RemoteUnavailable(_))
        ));
        assert!(fetcher.calls().is_empty());
        assert!(!dir.path().join("plugins/.last-revision").exists());
    }

    #[tokio::test]
    async fn failed_items_are_ledgered_then_retried_on_next_resume() {
        let dir = TempDir::new().unwrap();
        let connector = Arc::new(
            InMemoryConnector::new(200).with_items(["a", "b", "c", "d", "e", "f"]),
        );

        // Fresh run: a deterministic subset fails.
        let fetcher = Arc::new(ScriptedFetcher::new().failing(["b", "e"]));
        let mut ctx = context(&dir, Arc::new(Stats::new()));
        let outcome = Syncer::new(connector.clone(), fetcher)
            .run(&mut ctx)
            .await
            .unwrap();
        let SyncOutcome::Completed(report) = outcome else {
            panic!("expected completed run");
        };
        assert!(report.is_partial());
        assert_eq!(report.pending_failures, 2);

        let store = FsStateStore::new(dir.path().join("plugins"));
        let mut ledger: Vec<String> = store
            .read_failure_ledger()
            .await
            .unwrap()
            .iter()
            .map(|i| i.to_string())
            .collect();
        ledger.sort();
        assert_eq!(ledger, vec!["b", "e"]);

        // Next run: one new change, and the remote works again.
        connector.push_change(201, "g");
        let fetcher = Arc::new(ScriptedFetcher::new());
        let stats = Arc::new(Stats::new());
        let mut ctx = context(&dir, stats.clone());
        let outcome = Syncer::new(connector.clone(), fetcher.clone())
            .run(&mut ctx)
            .await
            .unwrap();
        let SyncOutcome::Completed(report) = outcome else {
            panic!("expected completed run");
        };

        let calls = fetcher.calls();
        assert_eq!(calls[0].as_str(), "g");
        let mut retried: Vec<&str> = slugs(&calls[1..]);
        retried.sort();
        assert_eq!(retried, vec!["b", "e"]);

        let retry = report.retry.expect("retry phase should run");
        assert_eq!(retry.succeeded, 2);
        assert_eq!(report.pending_failures, 0);
        assert!(!store.has_failure_ledger().await);
        assert_eq!(store.read_position().await.unwrap(), 201);
        assert_eq!(stats.summary().succeeded, 3);
        assert_eq!(stats.summary().batches, 2);
    }

    #[tokio::test]
    async fn retry_runs_once_and_leaves_a_fresh_ledger() {
        let dir = TempDir::new().unwrap();
        let store = seed_marker(&dir, 10).await;
        store.append_failure(&CatalogItem::new("stubborn")).await.unwrap();
        let connector = Arc::new(InMemoryConnector::new(10));
        connector.push_change(11, "fine");
        let fetcher = Arc::new(ScriptedFetcher::new().failing(["stubborn"]));
        let mut ctx = context(&dir, Arc::new(Stats::new()));

        let outcome = Syncer::new(connector, fetcher.clone())
            .run(&mut ctx)
            .await
            .unwrap();

        let SyncOutcome::Completed(report) = outcome else {
            panic!("expected completed run");
        };
        assert_eq!(slugs(&fetcher.calls()), vec!["fine", "stubborn"]);
        assert_eq!(report.retry.map(|r| r.failure_count()), Some(1));
        assert_eq!(report.pending_failures, 1);

        // The ledger was cleared before the retry, so the item appears once.
        let raw = fs::read_to_string(store.ledger_path()).unwrap();
        assert_eq!(raw, "stubborn\n");
    }

    #[tokio::test]
    async fn main_pass_failure_is_retried_in_the_same_run() {
        let dir = TempDir::new().unwrap();
        let store = seed_marker(&dir, 1).await;
        let connector = Arc::new(InMemoryConnector::new(1));
        connector.push_change(2, "flaky");
        let fetcher = Arc::new(ScriptedFetcher::new().failing(["flaky"]));
        let mut ctx = context(&dir, Arc::new(Stats::new()));

        Syncer::new(connector, fetcher.clone())
            .run(&mut ctx)
            .await
            .unwrap();

        assert_eq!(slugs(&fetcher.calls()), vec!["flaky", "flaky"]);
        assert_eq!(
            store.read_failure_ledger().await.unwrap(),
            vec![CatalogItem::new("flaky")]
        );
    }

    #[tokio::test]
    async fn crash_before_marker_write_replays_the_same_delta() {
        let dir = TempDir::new().unwrap();
        let store = seed_marker(&dir, 100).await;
        let connector = Arc::new(InMemoryConnector::new(100));
        connector.push_change(115, "akismet");
        connector.push_change(130, "jetpack");

        let crashing = Arc::new(FaultyStore {
            fail_marker_write: true,
            ..FaultyStore::new(&dir)
        });
        let mut ctx = context(&dir, Arc::new(Stats::new()));
        let err = Syncer::new(connector.clone(), Arc::new(ScriptedFetcher::new()))
            .run_with_store(&mut ctx, crashing)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::State(_)));
        assert_eq!(store.read_position().await.unwrap(), 100);

        connector.clear_calls();
        let fetcher = Arc::new(ScriptedFetcher::new());
        let mut ctx = context(&dir, Arc::new(Stats::new()));
        Syncer::new(connector.clone(), fetcher.clone())
            .run(&mut ctx)
            .await
            .unwrap();

        assert_eq!(
            connector.calls(),
            vec![
                ConnectorCall::LatestPosition,
                ConnectorCall::DeltaItemList(PositionRange::new(100, 130)),
            ]
        );
        assert_eq!(fetcher.calls().len(), 2);
        assert_eq!(store.read_position().await.unwrap(), 130);
    }

    #[tokio::test]
    async fn undeletable_ledger_is_still_retried() {
        let dir = TempDir::new().unwrap();
        let store = seed_marker(&dir, 10).await;
        store.append_failure(&CatalogItem::new("old")).await.unwrap();
        let connector = Arc::new(InMemoryConnector::new(10));
        connector.push_change(11, "new");
        let fetcher = Arc::new(ScriptedFetcher::new());
        let faulty = Arc::new(FaultyStore {
            fail_ledger_delete: true,
            ..FaultyStore::new(&dir)
        });
        let mut ctx = context(&dir, Arc::new(Stats::new()));

        let outcome = Syncer::new(connector, fetcher.clone())
            .run_with_store(&mut ctx, faulty)
            .await
            .unwrap();

        let SyncOutcome::Completed(report) = outcome else {
            panic!("expected completed run");
        };
        assert_eq!(slugs(&fetcher.calls()), vec!["new", "old"]);
        assert_eq!(report.retry.map(|r| r.succeeded), Some(1));
        assert_eq!(store.read_position().await.unwrap(), 11);
        // The stale entry stays listed and is fetched again next time.
        assert_eq!(
            store.read_failure_ledger().await.unwrap(),
            vec![CatalogItem::new("old")]
        );
        assert_eq!(report.pending_failures, 1);
    }
}
