use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;
use wpds::{CatalogItem, CatalogKind, Connector, ConnectorError, PositionRange};

use crate::api::{LISTING_TIMEOUT, POSITION_TIMEOUT};
use crate::endpoints::Endpoints;
use crate::patterns::ChangelogPatterns;

/// Returns true when `program` is a working Subversion client.
pub async fn svn_available(program: impl AsRef<OsStr>) -> bool {
    Command::new(program)
        .args(["--version", "--quiet"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .is_ok_and(|status| status.success())
}

/// Reads positions and item lists straight from the Subversion repository
/// by driving the `svn` command-line client.
pub struct SvnConnector {
    program: PathBuf,
    endpoints: Endpoints,
    patterns: ChangelogPatterns,
}

impl SvnConnector {
    pub fn new(program: impl Into<PathBuf>, endpoints: Endpoints) -> Self {
        Self {
            program: program.into(),
            endpoints,
            patterns: ChangelogPatterns::new(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn svn(&self, args: &[&str], timeout: Duration) -> Result<String, ConnectorError> {
        debug!(program = %self.program.display(), ?args, "running svn");

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .arg("--non-interactive")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| {
                ConnectorError::RemoteUnavailable(format!("svn timed out after {timeout:?}"))
            })?
            .map_err(|e| {
                ConnectorError::RemoteUnavailable(format!(
                    "failed to run {}: {e}",
                    self.program.display()
                ))
            })?;

        if !output.status.success() {
            return Err(ConnectorError::RemoteUnavailable(format!(
                "svn {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait::async_trait]
impl Connector for SvnConnector {
    fn label(&self) -> &str {
        "svn"
    }

    async fn latest_position(&self, kind: CatalogKind) -> Result<u64, ConnectorError> {
        let root = self.endpoints.svn_root(kind);
        let output = self
            .svn(&["log", "-q", "-r", "HEAD", root.as_str()], POSITION_TIMEOUT)
            .await?;

        self.patterns.svn_revision(&output).ok_or_else(|| {
            ConnectorError::ProtocolMismatch(format!("no revision header in svn log of {root}"))
        })
    }

    async fn full_item_list(&self, kind: CatalogKind) -> Result<Vec<CatalogItem>, ConnectorError> {
        let root = self.endpoints.svn_root(kind);
        let output = self.svn(&["list", root.as_str()], LISTING_TIMEOUT).await?;

        let items = self.patterns.svn_list_entries(&output);
        if items.is_empty() {
            return Err(ConnectorError::ProtocolMismatch(format!(
                "no directory entries in svn list of {root}"
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

        // Newest first, matching the order of the trac change log.
        let root = self.endpoints.svn_root(kind);
        let revisions = format!("{}:{}", range.to, range.from + 1);
        let args = ["log", "-v", "-q", "-r", revisions.as_str(), root.as_str()];
        let output = self.svn(&args, LISTING_TIMEOUT).await?;

        if self.patterns.svn_revision(&output).is_none() {
            return Err(ConnectorError::ProtocolMismatch(format!(
                "no revision header in svn log {revisions} of {root}"
            )));
        }
        Ok(self.patterns.svn_changed_items(&output))
    }
}
