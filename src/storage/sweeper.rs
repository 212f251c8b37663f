//! Cleanup sweeper
//!
//! Periodically deletes stale uploads and outputs so the container never
//! exhausts its disk. Age (mtime) past the configured threshold is the
//! only deletion criterion; files younger than the threshold are assumed
//! to be in use.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::CleanupConfig;

pub struct CleanupSweeper {
    dirs: Vec<PathBuf>,
    max_age: Duration,
    interval: Duration,
    shutdown: Notify,
}

impl CleanupSweeper {
    pub fn new(dirs: Vec<PathBuf>, config: &CleanupConfig) -> Self {
        Self {
            dirs,
            max_age: Duration::from_secs(config.max_age_secs),
            interval: Duration::from_secs(config.sweep_interval_secs),
            shutdown: Notify::new(),
        }
    }

    /// One deletion pass. Returns the number of files removed.
    pub fn sweep_once(&self) -> usize {
        let now = SystemTime::now();
        let mut deleted = 0;

        for dir in &self.dirs {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Sweep cannot read {:?}: {}", dir, e);
                    continue;
                }
            };

            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }

                let age = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|mtime| now.duration_since(mtime).ok());

                match age {
                    Some(age) if age > self.max_age => match std::fs::remove_file(&path) {
                        Ok(()) => {
                            info!("Deleted stale file {:?} (age {:?})", path, age);
                            deleted += 1;
                        }
                        Err(e) => warn!("Failed to delete {:?}: {}", path, e),
                    },
                    _ => {}
                }
            }
        }

        deleted
    }

    /// Run the recurring sweep until shutdown is signalled.
    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    debug!("Running cleanup sweep");
                    self.sweep_once();
                }
                _ = self.shutdown.notified() => {
                    info!("Cleanup sweeper shutting down");
                    break;
                }
            }
        }
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
