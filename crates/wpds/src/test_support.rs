use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::catalog::{CatalogItem, CatalogKind, dedup_items};
use crate::connector::{Connector, ConnectorError, PositionRange};
use crate::fetch::{FetchError, FetchRequest, Fetcher};

/// A connector call recorded by [`InMemoryConnector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorCall {
    LatestPosition,
    FullItemList,
    DeltaItemList(PositionRange),
}

/// In-memory catalog for testing. Holds a change log of `(position, item)`
/// entries and answers every query from it.
pub struct InMemoryConnector {
    label: String,
    items: Mutex<Vec<CatalogItem>>,
    changes: Mutex<Vec<(u64, CatalogItem)>>,
    latest: Mutex<u64>,
    calls: Mutex<Vec<ConnectorCall>>,
    unavailable: AtomicBool,
}

impl InMemoryConnector {
    pub fn new(latest: u64) -> Self {
        Self {
            label: "in-memory".to_owned(),
            items: Mutex::new(Vec::new()),
            changes: Mutex::new(Vec::new()),
            latest: Mutex::new(latest),
            calls: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn with_items<'a>(self, slugs: impl IntoIterator<Item = &'a str>) -> Self {
        lock(&self.items).extend(slugs.into_iter().map(CatalogItem::new));
        self
    }

    /// Record a change to `slug` at `position`, moving the latest position
    /// forward if needed.
    pub fn push_change(&self, position: u64, slug: &str) {
        let item = CatalogItem::new(slug);
        {
            let mut items = lock(&self.items);
            if !items.contains(&item) {
                items.push(item.clone());
            }
        }
        lock(&self.changes).push((position, item));
        let mut latest = lock(&self.latest);
        *latest = (*latest).max(position);
    }

    /// Make every subsequent call fail with `RemoteUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ConnectorCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn enter(&self, call: ConnectorCall) -> Result<(), ConnectorError> {
        lock(&self.calls).push(call);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ConnectorError::RemoteUnavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Connector for InMemoryConnector {
    fn label(&self) -> &str {
        &self.label
    }

    async fn latest_position(&self, _kind: CatalogKind) -> Result<u64, ConnectorError> {
        self.enter(ConnectorCall::LatestPosition)?;
        Ok(*lock(&self.latest))
    }

    async fn full_item_list(&self, _kind: CatalogKind) -> Result<Vec<CatalogItem>, ConnectorError> {
        self.enter(ConnectorCall::FullItemList)?;
        Ok(lock(&self.items).clone())
    }

    async fn delta_item_list(
        &self,
        _kind: CatalogKind,
        range: PositionRange,
    ) -> Result<Vec<CatalogItem>, ConnectorError> {
        self.enter(ConnectorCall::DeltaItemList(range))?;
        let changes = lock(&self.changes);
        Ok(dedup_items(
            changes
                .iter()
                .filter(|(pos, _)| *pos > range.from && *pos <= range.to)
                .map(|(_, item)| item.clone()),
        ))
    }
}

/// Fetcher with scripted outcomes that tracks how many fetches overlap.
///
/// Successful fetches write a small `<slug>.zip` into the destination.
#[derive(Default)]
pub struct ScriptedFetcher {
    failing: HashSet<String>,
    panicking: HashSet<String>,
    stalling: HashSet<String>,
    stall_for: Duration,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<CatalogItem>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps for `delay` before completing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// These slugs always fail with HTTP 404.
    pub fn failing<'a>(mut self, slugs: impl IntoIterator<Item = &'a str>) -> Self {
        self.failing.extend(slugs.into_iter().map(str::to_owned));
        self
    }

    pub fn panicking<'a>(mut self, slugs: impl IntoIterator<Item = &'a str>) -> Self {
        self.panicking.extend(slugs.into_iter().map(str::to_owned));
        self
    }

    /// These slugs sleep for `stall_for` before succeeding.
    pub fn stalling<'a>(
        mut self,
        slugs: impl IntoIterator<Item = &'a str>,
        stall_for: Duration,
    ) -> Self {
        self.stalling.extend(slugs.into_iter().map(str::to_owned));
        self.stall_for = stall_for;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Every item fetched so far, in call order.
    pub fn calls(&self) -> Vec<CatalogItem> {
        lock(&self.calls).clone()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<u64, FetchError> {
        lock(&self.calls).push(request.item.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let slug = request.item.as_str();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.stalling.contains(slug) {
            tokio::time::sleep(self.stall_for).await;
        }
        if self.panicking.contains(slug) {
            panic!("scripted panic for {slug}");
        }
        if self.failing.contains(slug) {
            return Err(FetchError::Status(404));
        }

        let body = format!("archive for {slug}");
        std::fs::write(request.dest_dir.join(format!("{slug}.zip")), &body)
            .map_err(|e| FetchError::Io(e.to_string()))?;
        Ok(body.len() as u64)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
