//! The download worker pool
//!
//! Five workers pull [`DownloadItem`]s off a bounded channel; each transfer
//! lands in a temp file opened `O_EXCL|O_SYNC` and is renamed into its blob
//! path, so a blob is visible iff it is complete. Items are deduplicated by
//! blob path before dispatch and the aggregator counts dispatched items, so
//! duplicate catalog matches can never skew the tally. Workers drain the
//! channel and stop when the producer closes it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use darkroom_store::Store;

use crate::catalog::{BlobDescriptor, Catalog, DownloadItem, Remote};
use crate::error::{SyncError, SyncResult};

/// Fixed pool parallelism.
pub const DOWNLOAD_WORKERS: usize = 5;

/// Outcome counts of one [`Downloader::sync_blobs`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub downloaded: usize,
    pub failed: usize,
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.downloaded == 0 && self.failed == 0 {
            write!(f, "All files already in sync.")
        } else if self.failed == 0 {
            write!(f, "Successfully downloaded {} file(s).", self.downloaded)
        } else {
            write!(
                f,
                "Successfully downloaded {} file(s), {} failed.",
                self.downloaded, self.failed
            )
        }
    }
}

/// Blob fetcher bound to a store, a catalog, and a remote transport.
pub struct Downloader<C, R> {
    store: Arc<Store>,
    catalog: C,
    remote: Arc<R>,
}

impl<C: Catalog, R: Remote> Downloader<C, R> {
    pub fn new(store: Arc<Store>, catalog: C, remote: R) -> Self {
        Self {
            store,
            catalog,
            remote: Arc::new(remote),
        }
    }

    /// Download every blob matching `patterns` that is not already present
    /// locally. Returns the counts on full success; on partial failure the
    /// error carries the counts plus the first failure wrapping the rest.
    pub async fn sync_blobs(&self, patterns: &[String]) -> SyncResult<SyncReport> {
        let list = self.catalog.glob(patterns).map_err(SyncError::Catalog)?;

        let mut seen_paths = HashSet::new();
        let mut work = Vec::new();
        for entry in list {
            if entry.local_only {
                continue;
            }
            let item = DownloadItem {
                blob: BlobDescriptor {
                    file_id: entry.file_id,
                    is_thumbnail: false,
                },
                set: entry.set,
            };
            let path = self.store.blob_path(&item.blob.file_id, item.blob.is_thumbnail);
            if path.is_file() {
                continue;
            }
            if !seen_paths.insert(path.clone()) {
                continue;
            }
            work.push((item, path));
        }

        let dispatched = work.len();
        if dispatched == 0 {
            info!("all files already in sync");
            return Ok(SyncReport::default());
        }
        debug!(count = dispatched, "dispatching downloads");

        let (work_tx, work_rx) = mpsc::channel::<(DownloadItem, PathBuf)>(DOWNLOAD_WORKERS);
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (done_tx, mut done_rx) = mpsc::channel::<anyhow::Result<()>>(dispatched);

        for _ in 0..DOWNLOAD_WORKERS {
            tokio::spawn(download_worker(
                self.remote.clone(),
                work_rx.clone(),
                done_tx.clone(),
            ));
        }
        drop(done_tx);

        tokio::spawn(async move {
            for item in work {
                if work_tx.send(item).await.is_err() {
                    break;
                }
            }
            // Dropping the sender closes the channel; workers drain and exit.
        });

        let mut errors = Vec::new();
        let mut downloaded = 0usize;
        while let Some(result) = done_rx.recv().await {
            match result {
                Ok(()) => downloaded += 1,
                Err(e) => errors.push(e),
            }
        }

        let report = SyncReport {
            downloaded,
            failed: errors.len(),
        };
        info!(%report, "sync finished");

        if errors.is_empty() {
            Ok(report)
        } else {
            let first = errors.remove(0);
            Err(SyncError::Download {
                report,
                first,
                rest: errors,
            })
        }
    }

    /// Delete local blobs matching `patterns` that are backed up remotely.
    /// Returns the number freed.
    pub fn free_blobs(&self, patterns: &[String]) -> SyncResult<usize> {
        let list = self.catalog.glob(patterns).map_err(SyncError::Catalog)?;
        let mut freed = 0;
        for entry in list {
            if entry.local_only {
                continue;
            }
            if self.store.remove_blob(&entry.file_id, false)? {
                freed += 1;
            }
        }
        if freed == 0 {
            info!("there are no files to delete");
        } else {
            info!(count = freed, "successfully freed file(s)");
        }
        Ok(freed)
    }
}

async fn download_worker<R: Remote>(
    remote: Arc<R>,
    work: Arc<Mutex<mpsc::Receiver<(DownloadItem, PathBuf)>>>,
    done: mpsc::Sender<anyhow::Result<()>>,
) {
    loop {
        // Hold the receiver lock only for the pull, never across a transfer.
        let next = { work.lock().await.recv().await };
        let Some((item, path)) = next else { break };

        let result = download_one(remote.as_ref(), &item, &path).await;
        if let Err(e) = &result {
            warn!(file_id = %item.blob.file_id, error = %e, "download failed");
        }
        if done.send(result).await.is_err() {
            break;
        }
    }
}

async fn download_one<R: Remote>(
    remote: &R,
    item: &DownloadItem,
    path: &Path,
) -> anyhow::Result<()> {
    use anyhow::Context;

    let data = remote
        .fetch(item)
        .await
        .with_context(|| format!("fetching {}", item.blob.file_id))?;
    write_blob_atomic(path, &data)
        .await
        .with_context(|| format!("writing blob for {}", item.blob.file_id))?;
    debug!(file_id = %item.blob.file_id, bytes = data.len(), "downloaded");
    Ok(())
}

/// Write `data` to a temp sibling under `O_EXCL|O_SYNC`, then rename into
/// `path` — the same atomicity pattern as envelope saves.
async fn write_blob_atomic(path: &Path, data: &Bytes) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = {
        let mut name = path.as_os_str().to_os_string();
        name.push(format!(
            "-tmp-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        PathBuf::from(name)
    };

    let mut opts = tokio::fs::OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        opts.mode(0o600).custom_flags(libc::O_SYNC);
    }
    let mut file = opts.open(&tmp).await?;
    file.write_all(data).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await
}
