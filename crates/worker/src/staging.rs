//! Materializing job inputs in the ComfyUI input directory.
//!
//! ComfyUI loader nodes reference files by name relative to its `input/`
//! directory, so every URL or inline payload is written there first.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use liveportrait_core::error::CoreError;
use liveportrait_core::media::{decode_inline, MediaSource};

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("Failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to download {url}: HTTP {status}")]
    Status { url: String, status: u16 },

    #[error(transparent)]
    Decode(#[from] CoreError),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Writes job inputs into a fixed directory.
#[derive(Clone)]
pub struct Stager {
    client: reqwest::Client,
    dir: PathBuf,
}

impl Stager {
    pub fn new(client: reqwest::Client, dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `source` to `<dir>/<file_name>` and return the full path.
    pub async fn stage(&self, source: &MediaSource, file_name: &str) -> Result<PathBuf, StagingError> {
        let path = self.dir.join(file_name);
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        match source {
            MediaSource::Url(url) => self.download(url, &path).await?,
            MediaSource::Inline(data) => {
                let bytes = decode_inline(data)?;
                tokio::fs::write(&path, &bytes)
                    .await
                    .map_err(|e| io_error(&path, e))?;
            }
        }

        tracing::debug!(source = %source.describe(), path = %path.display(), "Staged input");
        Ok(path)
    }

    async fn download(&self, url: &str, path: &Path) -> Result<(), StagingError> {
        tracing::info!(%url, path = %path.display(), "Downloading input");

        let download_err = |source: reqwest::Error| StagingError::Download {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(download_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(StagingError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| io_error(path, e))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(download_err)?;
            file.write_all(&chunk).await.map_err(|e| io_error(path, e))?;
        }
        file.flush().await.map_err(|e| io_error(path, e))?;
        Ok(())
    }
}

/// Staged input paths, removed when dropped.
///
/// Removal happens on drop so inputs are cleaned up even when the job
/// future is cancelled mid-flight (request timeout, client disconnect).
#[derive(Debug, Default)]
pub struct StagedFiles {
    paths: Vec<PathBuf>,
}

impl StagedFiles {
    pub fn push(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove staged input");
                }
            }
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StagingError {
    StagingError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn inline_payload_is_decoded_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let stager = Stager::new(reqwest::Client::new(), dir.path().join("input"));

        let path = stager
            .stage(&MediaSource::parse("data:image/png;base64,aGVsbG8="), "j1_source.png")
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("input/j1_source.png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn bad_base64_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let stager = Stager::new(reqwest::Client::new(), dir.path());

        let err = stager
            .stage(&MediaSource::Inline("%%%".into()), "x.png")
            .await
            .unwrap_err();

        assert_matches!(err, StagingError::Decode(_));
    }

    #[test]
    fn staged_files_are_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.png");
        std::fs::write(&file, b"x").unwrap();

        let mut staged = StagedFiles::default();
        staged.push(file.clone());
        staged.push(dir.path().join("missing.png"));
        assert_eq!(staged.paths().len(), 2);
        drop(staged);

        assert!(!file.exists());
    }
}
