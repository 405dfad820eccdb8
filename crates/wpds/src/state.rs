use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::catalog::{CatalogItem, dedup_items};

/// File holding the last position the mirror is synchronized to.
pub const MARKER_FILE: &str = ".last-revision";

/// File listing items whose fetch failed during the last run.
pub const LEDGER_FILE: &str = ".failed-downloads";

/// Errors that can occur when reading or writing persisted run state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("no position marker at {}", .0.display())]
    NotFound(PathBuf),

    #[error("corrupt position marker at {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(String),
}

/// Persisted position marker and failure ledger for one catalog kind.
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    /// Fails with [`StateError::NotFound`] when no marker exists.
    async fn read_position(&self) -> Result<u64, StateError>;

    /// Replace the marker. A crash mid-write leaves the previous value.
    async fn write_position(&self, position: u64) -> Result<(), StateError>;

    async fn has_failure_ledger(&self) -> bool;

    /// Ledgered items, deduplicated. Empty when no ledger exists.
    async fn read_failure_ledger(&self) -> Result<Vec<CatalogItem>, StateError>;

    async fn delete_failure_ledger(&self) -> Result<(), StateError>;

    /// Record one failed item. Safe to call from concurrent fetch workers.
    async fn append_failure(&self, item: &CatalogItem) -> Result<(), StateError>;
}

/// State files kept inside the catalog-kind directory.
pub struct FsStateStore {
    dir: PathBuf,
    ledger_lock: Mutex<()>,
}

impl FsStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ledger_lock: Mutex::new(()),
        }
    }

    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(MARKER_FILE)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }
}

fn io_error(path: &Path, e: io::Error) -> StateError {
    StateError::Io(format!("{}: {e}", path.display()))
}

#[async_trait::async_trait]
impl StateStore for FsStateStore {
    async fn read_position(&self) -> Result<u64, StateError> {
        let path = self.marker_path();
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StateError::NotFound(path));
            }
            Err(e) => return Err(io_error(&path, e)),
        };

        contents
            .trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| StateError::Corrupt {
                path,
                reason: e.to_string(),
            })
    }

    async fn write_position(&self, position: u64) -> Result<(), StateError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        let path = self.marker_path();
        let tmp = self.dir.join(format!("{MARKER_FILE}.tmp"));

        let mut file = fs::File::create(&tmp).await.map_err(|e| io_error(&tmp, e))?;
        file.write_all(format!("{position}\n").as_bytes())
            .await
            .map_err(|e| io_error(&tmp, e))?;
        file.sync_all().await.map_err(|e| io_error(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, &path).await.map_err(|e| io_error(&path, e))
    }

    async fn has_failure_ledger(&self) -> bool {
        fs::metadata(self.ledger_path())
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    async fn read_failure_ledger(&self) -> Result<Vec<CatalogItem>, StateError> {
        let path = self.ledger_path();
        let _guard = self.ledger_lock.lock().await;

        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&path, e)),
        };

        Ok(dedup_items(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(CatalogItem::new),
        ))
    }

    async fn delete_failure_ledger(&self) -> Result<(), StateError> {
        let path = self.ledger_path();
        let _guard = self.ledger_lock.lock().await;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn append_failure(&self, item: &CatalogItem) -> Result<(), StateError> {
        let path = self.ledger_path();
        let _guard = self.ledger_lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        // One write per line so a line is never split across appends.
        file.write_all(format!("{item}\n").as_bytes())
            .await
            .map_err(|e| io_error(&path, e))
    }
}
