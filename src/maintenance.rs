//! Periodic cleanup of stale temporary files

use crate::error::{ClearCutError, Result};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Removes regular files older than `max_age` from a directory on a schedule
#[derive(Debug, Clone)]
pub struct TempCleaner {
    dir: PathBuf,
    max_age: Duration,
    period: Duration,
}

impl TempCleaner {
    pub fn new(dir: impl Into<PathBuf>, max_age: Duration, period: Duration) -> Self {
        Self {
            dir: dir.into(),
            max_age,
            period,
        }
    }

    /// Run sweeps every period until `cancel_token` fires
    ///
    /// The first sweep happens immediately. Failures are logged and the
    /// schedule continues.
    pub fn spawn(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        let mut ticker = interval(self.period.max(Duration::from_millis(1)));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        debug!("Temp cleaner stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match self.sweep().await {
                            Ok(0) => {},
                            Ok(removed) => info!(removed, dir = %self.dir.display(), "Removed stale temp files"),
                            Err(e) => error!(error = %e, "Cleanup error"),
                        }
                    }
                }
            }
        })
    }

    /// Delete stale regular files once, returning how many were removed
    ///
    /// A missing directory counts as empty.
    ///
    /// # Errors
    /// - Directory cannot be listed
    pub async fn sweep(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(ClearCutError::file_io_error("list temp directory", &self.dir, &e)),
        };

        let now = SystemTime::now();
        let mut removed = 0;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ClearCutError::file_io_error("list temp directory", &self.dir, &e))?
        {
            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Skipping unreadable entry");
                    continue;
                },
            };

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age <= self.max_age {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => error!(path = %path.display(), error = %e, "Failed to remove stale file"),
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sweep_removes_only_stale_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("old.png"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let cleaner = TempCleaner::new(dir.path(), Duration::ZERO, Duration::from_secs(600));
        assert_eq!(cleaner.sweep().await.unwrap(), 1);
        assert!(!dir.path().join("old.png").exists());
        assert!(dir.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn test_sweep_keeps_fresh_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("fresh.png"), b"x").unwrap();

        let cleaner = TempCleaner::new(dir.path(), Duration::from_secs(3600), Duration::from_secs(600));
        assert_eq!(cleaner.sweep().await.unwrap(), 0);
        assert!(dir.path().join("fresh.png").exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let cleaner = TempCleaner::new(
            "/definitely/not/a/clearcut/dir",
            Duration::ZERO,
            Duration::from_secs(1),
        );
        assert_eq!(cleaner.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_spawned_cleaner_stops_on_cancel() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("stale.tmp"), b"x").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let token = CancellationToken::new();
        let handle = TempCleaner::new(dir.path(), Duration::ZERO, Duration::from_millis(10))
            .spawn(token.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!dir.path().join("stale.tmp").exists());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
