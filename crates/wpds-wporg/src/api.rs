use std::time::Duration;

use tracing::debug;
use wpds::{CatalogItem, CatalogKind, Connector, ConnectorError, PositionRange};

use crate::endpoints::Endpoints;
use crate::patterns::ChangelogPatterns;

/// Timeout for latest-position queries.
pub const POSITION_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for listing and change-log queries.
pub const LISTING_TIMEOUT: Duration = Duration::from_secs(60);

/// Talks to the directory over HTTP: the trac change log for positions and
/// deltas, and the repository's HTML listing for the full item list.
pub struct ApiConnector {
    client: reqwest::Client,
    endpoints: Endpoints,
    patterns: ChangelogPatterns,
    user_agent: String,
}

impl ApiConnector {
    pub fn new(user_agent: impl Into<String>, endpoints: Endpoints) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
            patterns: ChangelogPatterns::new(),
            user_agent: user_agent.into(),
        }
    }

    fn build_request(&self, url: &str, timeout: Duration) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("User-Agent", self.user_agent.as_str())
            .timeout(timeout)
    }

    async fn get_text(&self, url: &str, timeout: Duration) -> Result<String, ConnectorError> {
        debug!(url, "GET");

        let response = self
            .build_request(url, timeout)
            .send()
            .await
            .map_err(|e| ConnectorError::RemoteUnavailable(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(ConnectorError::RemoteUnavailable(format!(
                "{url}: HTTP {}",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| ConnectorError::RemoteUnavailable(format!("{url}: {e}")))
    }
}

#[async_trait::async_trait]
impl Connector for ApiConnector {
    fn label(&self) -> &str {
        "api"
    }

    async fn latest_position(&self, kind: CatalogKind) -> Result<u64, ConnectorError> {
        let url = self.endpoints.latest_position_url(kind);
        let body = self.get_text(&url, POSITION_TIMEOUT).await?;

        self.patterns.first_bracketed_position(&body).ok_or_else(|| {
            ConnectorError::ProtocolMismatch(format!("no [revision] marker in {url}"))
        })
    }

    async fn full_item_list(&self, kind: CatalogKind) -> Result<Vec<CatalogItem>, ConnectorError> {
        let url = self.endpoints.full_listing_url(kind);
        let body = self.get_text(&url, LISTING_TIMEOUT).await?;

        let items = self.patterns.listing_entries(&body);
        if items.is_empty() {
            return Err(ConnectorError::ProtocolMismatch(format!(
                "no directory entries in {url}"
            )));
        }
        Ok(items)
    }

    async fn delta_item_list(
        &self,
        kind: CatalogKind,
        range: PositionRange,
    ) -> Result<Vec<CatalogItem>, ConnectorError> {
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.endpoints.changelog_url(kind, range);
        let body = self.get_text(&url, LISTING_TIMEOUT).await?;

        if self.patterns.first_bracketed_position(&body).is_none() {
            return Err(ConnectorError::ProtocolMismatch(format!(
                "no [revision] marker in {url}"
            )));
        }
        Ok(self.patterns.changelog_items(&body))
    }
}
