use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use wpds::{FetchError, FetchRequest, Fetcher, FileType};

use crate::endpoints::Endpoints;

/// Downloads one item per call from the directory's public hosts.
///
/// `FileType::All` stores the packaged archive as `<slug>.zip`;
/// `FileType::Readme` stores `<slug>/readme.txt`. Data is streamed into a
/// `.part` file and renamed into place once complete.
pub struct ArchiveFetcher {
    client: reqwest::Client,
    endpoints: Endpoints,
    user_agent: String,
}

impl ArchiveFetcher {
    pub fn new(user_agent: impl Into<String>, endpoints: Endpoints) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
            user_agent: user_agent.into(),
        }
    }

    fn source_and_target(&self, request: &FetchRequest) -> (String, PathBuf) {
        let slug = request.item.as_str();
        match request.file_type {
            FileType::All => (
                self.endpoints.archive_url(request.kind, &request.item),
                request.dest_dir.join(format!("{slug}.zip")),
            ),
            FileType::Readme => (
                self.endpoints.readme_url(request.kind, &request.item),
                request.dest_dir.join(slug).join("readme.txt"),
            ),
        }
    }

    async fn stream_to(
        &self,
        mut response: reqwest::Response,
        part: &Path,
    ) -> Result<u64, FetchError> {
        let io_err = |e: std::io::Error| FetchError::Io(format!("{}: {e}", part.display()));

        let mut file = tokio::fs::File::create(part).await.map_err(io_err)?;
        let mut written = 0u64;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Network(format!("failed to read body: {e}")))?
        {
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }

        file.flush().await.map_err(io_err)?;
        Ok(written)
    }
}

#[async_trait::async_trait]
impl Fetcher for ArchiveFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<u64, FetchError> {
        if !request.item.is_path_safe() {
            return Err(FetchError::InvalidItem(request.item.to_string()));
        }

        let (url, target) = self.source_and_target(request);

        let response = self
            .client
            .get(&url)
            .header("User-Agent", self.user_agent.as_str())
            .send()
            .await
            .map_err(|e| FetchError::Network(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::Io(format!("{}: {e}", parent.display())))?;
        }

        let part = PartFile::new(&target);
        let written = self.stream_to(response, part.path()).await?;

        tokio::fs::rename(part.path(), &target)
            .await
            .map_err(|e| FetchError::Io(format!("{}: {e}", target.display())))?;
        part.disarm();

        Ok(written)
    }
}

/// The `.part` file next to a target. Removed on drop unless the download
/// was renamed into place, including when the future is cancelled mid-stream.
struct PartFile {
    path: PathBuf,
    armed: bool,
}

impl PartFile {
    fn new(target: &Path) -> Self {
        let mut path = target.as_os_str().to_owned();
        path.push(".part");
        Self {
            path: PathBuf::from(path),
            armed: true,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to clean up partial download");
        }
    }
}
