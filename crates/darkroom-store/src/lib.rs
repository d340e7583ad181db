//! darkroom-store: the encrypted local storage engine
//!
//! Everything lives under a single root directory:
//! ```text
//! <root>/
//!   <logical-name>              encrypted envelope files (may contain "/")
//!   <logical-name>.lock         advisory locks (empty files)
//!   blobs/<hh>/<hashhex>        content-addressed encrypted blobs
//!   .backup-<nanos>/            transactional backup directories
//! ```
//!
//! Mutation of any envelope is serialized through an advisory lock on its
//! logical name; multi-file updates go through [`Store::open_many_for_update`]
//! which backs up the originals before saving so a crash can never leave a
//! half-committed set. [`Store::new`] finishes any such interrupted commit
//! before returning.

mod backup;
mod blob;
mod envelope;
mod error;
mod fsutil;
mod lock;
mod txn;

pub use darkroom_crypto::{EncryptionKey, MasterKey, ObjectKey};
pub use error::{StoreError, StoreResult};
pub use lock::LockConfig;
pub use txn::Transaction;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

/// Handle to a storage root. Cheap to share by reference; all mutation is
/// serialized through per-name advisory locks, not through `&mut self`.
pub struct Store {
    root: PathBuf,
    key: EncryptionKey,
    lock_cfg: LockConfig,
    /// Jitter source for lock retries and stale deadlines; seedable for
    /// deterministic tests.
    lock_rng: Mutex<StdRng>,
}

impl Store {
    /// Open (creating if needed) the storage root and run crash recovery
    /// for any interrupted multi-file commit before anything else touches
    /// the directory.
    pub fn new(root: impl Into<PathBuf>, key: EncryptionKey) -> StoreResult<Self> {
        Self::with_lock_config(root, key, LockConfig::default())
    }

    /// [`Store::new`] with explicit lock tuning (tests shrink the stale
    /// deadline and seed the jitter RNG).
    pub fn with_lock_config(
        root: impl Into<PathBuf>,
        key: EncryptionKey,
        lock_cfg: LockConfig,
    ) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let rng = match lock_cfg.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let store = Store {
            root,
            key,
            lock_cfg,
            lock_rng: Mutex::new(rng),
        };
        store.recover()?;
        Ok(store)
    }

    /// The storage root directory.
    pub fn dir(&self) -> &Path {
        &self.root
    }

    /// Keyed hash of a logical name (lowercase hex); the basis of blob
    /// placement.
    pub fn hash_string(&self, s: &str) -> String {
        self.key.hash_string(s)
    }

    pub(crate) fn master_key(&self) -> &EncryptionKey {
        &self.key
    }

    /// Absolute path of an envelope file.
    pub(crate) fn object_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Remove temp files left behind by interrupted atomic writes, once they
    /// are old enough that no live writer can still own them. Returns the
    /// number removed.
    pub fn sweep_temp_files(&self) -> StoreResult<usize> {
        let mut removed = 0;
        self.sweep_dir(&self.root, &mut removed)?;
        Ok(removed)
    }

    fn sweep_dir(&self, dir: &Path, removed: &mut usize) -> StoreResult<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            let ftype = entry.file_type()?;
            if ftype.is_dir() {
                // Backup directories have their own lifecycle.
                if !name.starts_with(".backup-") {
                    self.sweep_dir(&path, removed)?;
                }
            } else if fsutil::is_temp_name(&name)
                && fsutil::file_age(&path) > self.lock_cfg.stale_after
            {
                if std::fs::remove_file(&path).is_ok() {
                    debug!(file = %path.display(), "removed stale temp file");
                    *removed += 1;
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("root", &self.root).finish()
    }
}
