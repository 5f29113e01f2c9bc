//! Model downloading
//!
//! Streams the model file into a partial file next to its destination, hashes
//! it on the way and renames it into place once complete, so an interrupted
//! download never leaves a truncated model behind.

use crate::error::{ClearCutError, Result};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

/// Model downloader
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
}

impl ModelDownloader {
    /// Create a new model downloader
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300)) // 5 minute timeout
            .build()
            .map_err(|e| ClearCutError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client })
    }

    /// Download `url` to `destination`, returning the SHA-256 of the file
    ///
    /// # Errors
    /// - Network errors or non-success HTTP status
    /// - File system errors while writing or renaming
    pub async fn download_model(&self, url: &str, destination: &Path) -> Result<String> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ClearCutError::file_io_error("create model directory", parent, &e))?;
        }

        let partial = Self::partial_path(destination);
        match self.download_file(url, &partial).await {
            Ok((downloaded, digest)) => {
                tokio::fs::rename(&partial, destination).await.map_err(|e| {
                    ClearCutError::file_io_error("move downloaded model into place", destination, &e)
                })?;
                log::info!(
                    "Downloaded model to {} ({:.1} MB, sha256 {})",
                    destination.display(),
                    downloaded as f64 / (1024.0 * 1024.0),
                    digest
                );
                Ok(digest)
            },
            Err(e) => {
                if partial.exists() {
                    if let Err(cleanup_err) = tokio::fs::remove_file(&partial).await {
                        log::warn!("Failed to remove partial download: {}", cleanup_err);
                    }
                }
                Err(e)
            },
        }
    }

    fn partial_path(destination: &Path) -> PathBuf {
        let mut name = destination
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".part");
        destination.with_file_name(name)
    }

    /// Stream a single file to disk, hashing as it goes
    async fn download_file(&self, url: &str, local_path: &Path) -> Result<(u64, String)> {
        log::debug!("Downloading: {} -> {}", url, local_path.display());

        let response =
            self.client.get(url).send().await.map_err(|e| {
                ClearCutError::network_error(format!("Failed to download {}", url), e)
            })?;

        if !response.status().is_success() {
            return Err(ClearCutError::network_error(
                format!("Failed to download {}", url),
                format!("HTTP {}", response.status()),
            ));
        }

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| ClearCutError::file_io_error("create file", local_path, &e))?;

        let mut stream =
            StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));

        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];

        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| ClearCutError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
            hasher.update(chunk);
            file.write_all(chunk)
                .await
                .map_err(|e| ClearCutError::file_io_error("write to file", local_path, &e))?;

            downloaded += bytes_read as u64;
        }

        file.flush()
            .await
            .map_err(|e| ClearCutError::file_io_error("flush file", local_path, &e))?;

        Ok((downloaded, format!("{:x}", hasher.finalize())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path_sits_next_to_destination() {
        let partial = ModelDownloader::partial_path(Path::new("/models/u2net.onnx"));
        assert_eq!(partial, PathBuf::from("/models/u2net.onnx.part"));
    }

    #[tokio::test]
    async fn test_failed_download_leaves_no_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let destination = dir.path().join("u2net.onnx");

        let downloader = ModelDownloader::new().unwrap();
        let result = downloader
            .download_model("http://127.0.0.1:9/u2net.onnx", &destination)
            .await;

        assert!(result.is_err());
        assert!(!destination.exists());
        assert!(!dir.path().join("u2net.onnx.part").exists());
    }
}
