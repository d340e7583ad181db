//! Advisory filesystem locks
//!
//! A lock is a sentinel file `<root>/<name>.lock` whose existence denotes
//! ownership. Acquisition loops on create-exclusive; contention is not an
//! error, it blocks. Locks older than a randomized deadline are presumed
//! abandoned and reclaimed by any contender. Multi-lock acquisition is
//! ordered (sorted) so that overlapping sets serialize instead of
//! deadlocking.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::fsutil;
use crate::{Store, StoreResult};

/// Tuning for the lock manager. Defaults match the production protocol;
/// tests shrink the durations and pin the RNG seed.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Base age after which a lock file may be reclaimed (default 600 s).
    pub stale_after: Duration,
    /// Random extra age in `[0, stale_jitter)` chosen per acquisition, so
    /// contending processes don't sweep in lockstep (default 60 s).
    pub stale_jitter: Duration,
    /// Minimum sleep between acquisition attempts (default 50 ms).
    pub retry_min: Duration,
    /// Random extra sleep in `[0, retry_jitter)` (default 100 ms).
    pub retry_jitter: Duration,
    /// Seed for the jitter RNG; `None` seeds from the OS.
    pub rng_seed: Option<u64>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(600),
            stale_jitter: Duration::from_secs(60),
            retry_min: Duration::from_millis(50),
            retry_jitter: Duration::from_millis(100),
            rng_seed: None,
        }
    }
}

impl Store {
    /// Acquire the advisory lock for `name`, blocking until it is free or
    /// stale. Only I/O failures error out.
    pub fn lock(&self, name: &str) -> StoreResult<()> {
        let lockf = self.lock_path(name);
        fsutil::create_parent(&lockf)?;
        let deadline = self.lock_cfg.stale_after + self.jitter(self.lock_cfg.stale_jitter);
        loop {
            match fsutil::open_excl_sync(&lockf) {
                Ok(file) => {
                    drop(file);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    self.try_remove_stale_lock(&lockf, deadline);
                    std::thread::sleep(
                        self.lock_cfg.retry_min + self.jitter(self.lock_cfg.retry_jitter),
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Acquire locks for all of `names` without deadlocking against other
    /// holders: acquisition order is always lexicographic, so overlapping
    /// sets serialize on their shared member. On failure every lock taken
    /// so far is released in reverse.
    pub fn lock_many<S: AsRef<str>>(&self, names: &[S]) -> StoreResult<()> {
        let mut sorted: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
        sorted.sort_unstable();
        for (i, name) in sorted.iter().enumerate() {
            if let Err(e) = self.lock(name) {
                for held in sorted[..i].iter().rev() {
                    if let Err(ue) = self.unlock(held) {
                        warn!(lock = held, error = %ue, "failed to release lock while unwinding");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Release the lock for `name`.
    ///
    /// Fails with an I/O error if the lock file is already gone — e.g. a
    /// contender's sweeper reclaimed it as stale. Callers treat that as
    /// log-worthy, not fatal.
    pub fn unlock(&self, name: &str) -> StoreResult<()> {
        std::fs::remove_file(self.lock_path(name))?;
        Ok(())
    }

    /// Release locks taken by [`Store::lock_many`], in reverse of the
    /// acquisition order.
    pub fn unlock_many<S: AsRef<str>>(&self, names: &[S]) -> StoreResult<()> {
        let mut sorted: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
        sorted.sort_unstable();
        for name in sorted.iter().rev() {
            self.unlock(name)?;
        }
        Ok(())
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        let mut path = self.object_path(name).into_os_string();
        path.push(".lock");
        PathBuf::from(path)
    }

    fn try_remove_stale_lock(&self, lockf: &std::path::Path, deadline: Duration) {
        if fsutil::file_age(lockf) > deadline && std::fs::remove_file(lockf).is_ok() {
            warn!(lock = %lockf.display(), "removed stale lock");
        }
    }

    fn jitter(&self, max: Duration) -> Duration {
        let max_ms = max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = self
            .lock_rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Duration::from_millis(rng.gen_range(0..max_ms))
    }
}
