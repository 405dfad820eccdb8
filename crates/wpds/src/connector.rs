use std::fmt;
use std::sync::Arc;

use crate::catalog::{CatalogItem, CatalogKind};

/// Errors that can occur when querying a remote catalog.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("unexpected response from remote: {0}")]
    ProtocolMismatch(String),
}

impl ConnectorError {
    pub fn is_protocol_mismatch(&self) -> bool {
        matches!(self, Self::ProtocolMismatch(_))
    }
}

/// The half-open window of positions `(from, to]` covered by a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionRange {
    pub from: u64,
    pub to: u64,
}

impl PositionRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Number of positions in the window.
    pub fn len(&self) -> u64 {
        self.to.saturating_sub(self.from)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for PositionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.from, self.to)
    }
}

/// A remote catalog that reports positions and item lists.
///
/// Backends must agree with each other: for the same remote state every
/// implementation returns the same positions and the same item sequences.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Human-readable label identifying this backend.
    fn label(&self) -> &str;

    /// Current global position of the catalog.
    async fn latest_position(&self, kind: CatalogKind) -> Result<u64, ConnectorError>;

    /// Every item currently in the catalog.
    async fn full_item_list(&self, kind: CatalogKind) -> Result<Vec<CatalogItem>, ConnectorError>;

    /// Items changed within `range`, deduplicated in first-seen order.
    async fn delta_item_list(
        &self,
        kind: CatalogKind,
        range: PositionRange,
    ) -> Result<Vec<CatalogItem>, ConnectorError>;
}

#[async_trait::async_trait]
impl<T: Connector + ?Sized> Connector for Arc<T> {
    fn label(&self) -> &str {
        (**self).label()
    }

    async fn latest_position(&self, kind: CatalogKind) -> Result<u64, ConnectorError> {
        (**self).latest_position(kind).await
    }

    async fn full_item_list(&self, kind: CatalogKind) -> Result<Vec<CatalogItem>, ConnectorError> {
        (**self).full_item_list(kind).await
    }

    async fn delta_item_list(
        &self,
        kind: CatalogKind,
        range: PositionRange,
    ) -> Result<Vec<CatalogItem>, ConnectorError> {
        (**self).delta_item_list(kind, range).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_len_saturates() {
        assert_eq!(PositionRange::new(100, 130).len(), 30);
        assert!(PositionRange::new(130, 100).is_empty());
        assert_eq!(PositionRange::new(100, 130).to_string(), "100..130");
    }

    #[test]
    fn protocol_mismatch_is_distinguishable() {
        assert!(ConnectorError::ProtocolMismatch("x".into()).is_protocol_mismatch());
        assert!(!ConnectorError::RemoteUnavailable("x".into()).is_protocol_mismatch());
    }
}
