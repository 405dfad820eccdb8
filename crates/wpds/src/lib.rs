pub mod catalog;
pub mod connector;
pub mod context;
pub mod fetch;
pub mod layout;
pub mod state;
pub mod stats;
pub mod sync;

pub use catalog::{CatalogItem, CatalogKind, FileType, dedup_items};
pub use connector::{Connector, ConnectorError, PositionRange};
pub use context::{Concurrency, ConnectorKind, RunContext};
pub use fetch::{BatchSummary, DEFAULT_ITEM_TIMEOUT, FetchError, FetchPipeline, FetchRequest, Fetcher};
pub use layout::DirState;
pub use state::{FsStateStore, StateError, StateStore};
pub use stats::{Stats, StatsSink, StatsSummary};
pub use sync::{RunReport, SyncError, SyncMode, SyncOutcome, Syncer};

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
