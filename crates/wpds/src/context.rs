use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogKind, FileType};
use crate::stats::StatsSink;
use crate::sync::SyncError;

/// Validated upper bound on simultaneous fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Concurrency(usize);

impl Concurrency {
    pub const MIN: usize = 10;
    pub const MAX: usize = 10_000;

    pub fn new(limit: usize) -> Result<Self, SyncError> {
        if !(Self::MIN..=Self::MAX).contains(&limit) {
            return Err(SyncError::Configuration(format!(
                "concurrent actions {limit} out of permitted range ({}-{})",
                Self::MIN,
                Self::MAX
            )));
        }
        Ok(Self(limit))
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl fmt::Display for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which remote backend a run talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    Api,
    Svn,
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api => write!(f, "api"),
            Self::Svn => write!(f, "svn"),
        }
    }
}

/// State scoped to a single sync invocation.
pub struct RunContext {
    pub kind: CatalogKind,
    pub concurrency: Concurrency,
    pub connector: ConnectorKind,
    pub working_directory: PathBuf,
    pub file_type: FileType,
    pub current_position: u64,
    pub latest_position: u64,
    pub stats: Arc<dyn StatsSink>,
}

impl RunContext {
    pub fn new(
        kind: CatalogKind,
        concurrency: Concurrency,
        connector: ConnectorKind,
        working_directory: impl Into<PathBuf>,
        stats: Arc<dyn StatsSink>,
    ) -> Self {
        Self {
            kind,
            concurrency,
            connector,
            working_directory: working_directory.into(),
            file_type: FileType::default(),
            current_position: 0,
            latest_position: 0,
            stats,
        }
    }

    pub fn with_file_type(mut self, file_type: FileType) -> Self {
        self.file_type = file_type;
        self
    }

    /// `<working_directory>/<kind>`, where downloads and state files live.
    pub fn kind_directory(&self) -> PathBuf {
        kind_directory(&self.working_directory, self.kind)
    }
}

pub fn kind_directory(working_directory: &Path, kind: CatalogKind) -> PathBuf {
    working_directory.join(kind.as_str())
}
