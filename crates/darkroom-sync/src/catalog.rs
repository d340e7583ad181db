//! Collaborator seams: the pattern-matching catalog and the remote
//! transport. Implementations live with the protocol client; tests use
//! in-memory stubs.

use std::future::Future;

use bytes::Bytes;

/// What a blob is called on disk: the file id, optionally in its thumbnail
/// variant. Resolved to a path by the store's keyed hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobDescriptor {
    pub file_id: String,
    pub is_thumbnail: bool,
}

/// One catalog entry matched by a glob pattern.
#[derive(Debug, Clone)]
pub struct ListItem {
    pub file_id: String,
    /// Remote file set the blob belongs to (e.g. gallery, trash, an album).
    pub set: String,
    /// Imported but never uploaded; there is nothing to fetch.
    pub local_only: bool,
}

/// A unit of download work: the blob plus the coordinates the remote needs
/// to serve it.
#[derive(Debug, Clone)]
pub struct DownloadItem {
    pub blob: BlobDescriptor,
    pub set: String,
}

/// Pattern-matched catalog lookup, provided by the protocol client.
pub trait Catalog {
    fn glob(&self, patterns: &[String]) -> anyhow::Result<Vec<ListItem>>;
}

/// Remote blob transport. Owns its own timeouts and retries; the pool only
/// counts outcomes.
pub trait Remote: Send + Sync + 'static {
    /// Fetch the full encrypted blob for `item`.
    fn fetch(&self, item: &DownloadItem) -> impl Future<Output = anyhow::Result<Bytes>> + Send;
}
