use crate::dataset::{Dataset, DatasetHandle};
use crate::error::Result;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

/// Polls the CSV modification time and swaps in a freshly loaded dataset when it changes.
pub struct Reloader {
    path: PathBuf,
    poll_interval: Duration,
    handle: DatasetHandle,
    shutdown_rx: watch::Receiver<bool>,
    last_modified: Option<SystemTime>,
}

impl Reloader {
    pub fn new(
        path: PathBuf,
        poll_interval: Duration,
        handle: DatasetHandle,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            path,
            poll_interval,
            handle,
            shutdown_rx,
            last_modified: None,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Reloader watching {} every {}s",
            self.path.display(),
            self.poll_interval.as_secs()
        );

        // The initial load already happened; only later changes count
        self.last_modified = self.modified_time().await.ok();

        let mut ticker = interval(self.poll_interval);
        ticker.tick().await; // First tick is immediate, skip it

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reload_if_changed().await {
                        error!("Reload of {} failed, keeping current dataset: {}", self.path.display(), e);
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping reloader");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn modified_time(&self) -> Result<SystemTime> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        Ok(metadata.modified()?)
    }

    /// Returns whether a new dataset was installed
    pub async fn reload_if_changed(&mut self) -> Result<bool> {
        let modified = self.modified_time().await?;
        if self.last_modified == Some(modified) {
            debug!("{} unchanged", self.path.display());
            return Ok(false);
        }

        // A broken file is not retried until it changes again
        self.last_modified = Some(modified);

        info!("{} changed, reloading", self.path.display());
        let path = self.path.clone();
        let dataset = tokio::task::spawn_blocking(move || Dataset::load(path)).await??;

        let previous = self.handle.replace(dataset);
        info!(
            "Dataset swapped: {} -> {} stations",
            previous.stations().len(),
            self.handle.current().stations().len()
        );

        Ok(true)
    }
}
