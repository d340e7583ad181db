use thiserror::Error;

use crate::pool::SyncReport;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("catalog lookup failed: {0}")]
    Catalog(anyhow::Error),

    #[error(transparent)]
    Store(#[from] darkroom_store::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Some downloads failed: the report plus the first failure wrapping
    /// the rest.
    #[error("{report} {first} (and {} more failure(s))", .rest.len())]
    Download {
        report: SyncReport,
        first: anyhow::Error,
        rest: Vec<anyhow::Error>,
    },
}

impl SyncError {
    /// The partial outcome of a failed [`sync_blobs`](crate::Downloader::sync_blobs).
    pub fn report(&self) -> Option<SyncReport> {
        match self {
            SyncError::Download { report, .. } => Some(*report),
            _ => None,
        }
    }
}
