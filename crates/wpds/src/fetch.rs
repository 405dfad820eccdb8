use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::catalog::{CatalogItem, CatalogKind, FileType};
use crate::context::Concurrency;
use crate::state::StateStore;
use crate::stats::StatsSink;

/// Upper bound on a single item download.
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors that can occur while fetching a single item.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid item slug: {0:?}")]
    InvalidItem(String),
}

/// Everything a fetcher needs to place one item on disk.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub kind: CatalogKind,
    pub file_type: FileType,
    pub item: CatalogItem,
    /// The catalog-kind directory.
    pub dest_dir: PathBuf,
}

/// Downloads one item into its destination directory.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns the number of bytes written.
    async fn fetch(&self, request: &FetchRequest) -> Result<u64, FetchError>;
}

#[async_trait::async_trait]
impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    async fn fetch(&self, request: &FetchRequest) -> Result<u64, FetchError> {
        (**self).fetch(request).await
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    /// Items recorded in the failure ledger, in completion order.
    pub failed: Vec<CatalogItem>,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }
}

/// Bounded-concurrency download of a list of items.
///
/// Every item is attempted exactly once. Failures are appended to the
/// failure ledger and counted; they never stop the batch. The pipeline
/// does not retry.
pub struct FetchPipeline {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn StateStore>,
    stats: Arc<dyn StatsSink>,
    concurrency: Concurrency,
    item_timeout: Duration,
}

impl FetchPipeline {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn StateStore>,
        stats: Arc<dyn StatsSink>,
        concurrency: Concurrency,
    ) -> Self {
        Self {
            fetcher,
            store,
            stats,
            concurrency,
            item_timeout: DEFAULT_ITEM_TIMEOUT,
        }
    }

    pub fn with_item_timeout(mut self, item_timeout: Duration) -> Self {
        self.item_timeout = item_timeout;
        self
    }

    pub async fn run(
        &self,
        kind: CatalogKind,
        file_type: FileType,
        dest_dir: &Path,
        items: Vec<CatalogItem>,
    ) -> BatchSummary {
        let started = Instant::now();
        let total = items.len();
        info!(%kind, items = total, concurrency = %self.concurrency, "fetching");

        let semaphore = Arc::new(Semaphore::new(self.concurrency.get()));
        let mut tasks = JoinSet::new();
        let mut pending: HashMap<task::Id, CatalogItem> = HashMap::new();
        let mut summary = BatchSummary::default();

        for item in items {
            // The permit is held by the task, so no more than `concurrency`
            // tasks exist at once.
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    self.record_failure(&item, &FetchError::Io("worker pool closed".into()))
                        .await;
                    summary.attempted += 1;
                    summary.failed.push(item);
                    continue;
                }
            };

            while let Some(joined) = tasks.try_join_next_with_id() {
                self.settle(joined, &mut pending, &mut summary).await;
            }

            let request = FetchRequest {
                kind,
                file_type,
                item: item.clone(),
                dest_dir: dest_dir.to_path_buf(),
            };
            let fetcher = Arc::clone(&self.fetcher);
            let store = Arc::clone(&self.store);
            let stats = Arc::clone(&self.stats);
            let item_timeout = self.item_timeout;

            let handle = tasks.spawn(async move {
                let _permit = permit;
                let result = match tokio::time::timeout(item_timeout, fetcher.fetch(&request)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout(item_timeout)),
                };
                match result {
                    Ok(bytes) => {
                        debug!(item = %request.item, bytes, "fetched");
                        stats.record_success(&request.item, bytes);
                        true
                    }
                    Err(e) => {
                        record_failure(store.as_ref(), stats.as_ref(), &request.item, &e).await;
                        false
                    }
                }
            });
            pending.insert(handle.id(), item);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            self.settle(joined, &mut pending, &mut summary).await;
        }

        summary.elapsed = started.elapsed();
        self.stats.record_batch(total, summary.elapsed);
        info!(
            %kind,
            succeeded = summary.succeeded,
            failed = summary.failure_count(),
            elapsed = ?summary.elapsed,
            "fetch finished"
        );
        summary
    }

    async fn settle(
        &self,
        joined: Result<(task::Id, bool), JoinError>,
        pending: &mut HashMap<task::Id, CatalogItem>,
        summary: &mut BatchSummary,
    ) {
        let (id, succeeded) = match joined {
            Ok((id, succeeded)) => (id, succeeded),
            Err(e) => {
                // The worker died before recording anything.
                let id = e.id();
                if let Some(item) = pending.get(&id) {
                    self.record_failure(item, &FetchError::Io(format!("worker failed: {e}")))
                        .await;
                }
                (id, false)
            }
        };

        let Some(item) = pending.remove(&id) else {
            return;
        };
        summary.attempted += 1;
        if succeeded {
            summary.succeeded += 1;
        } else {
            summary.failed.push(item);
        }
    }

    async fn record_failure(&self, item: &CatalogItem, err: &FetchError) {
        record_failure(self.store.as_ref(), self.stats.as_ref(), item, err).await;
    }
}

async fn record_failure(
    store: &dyn StateStore,
    stats: &dyn StatsSink,
    item: &CatalogItem,
    err: &FetchError,
) {
    warn!(%item, "fetch failed: {err}");
    stats.record_failure(item);
    if let Err(e) = store.append_failure(item).await {
        error!(%item, "could not record failed item: {e}");
    }
}
