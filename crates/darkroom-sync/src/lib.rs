//! darkroom-sync: bounded-parallelism blob fetching
//!
//! [`Downloader::sync_blobs`] pulls every catalog-matched blob that is not
//! already local into the content-addressed tree, five transfers at a time;
//! [`Downloader::free_blobs`] evicts local copies that are safely remote.
//! The catalog lookup and the HTTP transport are collaborator traits — this
//! crate owns only the pool, the dedup policy, and the atomic placement of
//! bytes on disk.

mod catalog;
mod error;
mod pool;

pub use catalog::{BlobDescriptor, Catalog, DownloadItem, ListItem, Remote};
pub use error::{SyncError, SyncResult};
pub use pool::{Downloader, SyncReport, DOWNLOAD_WORKERS};
