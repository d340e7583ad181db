//! Transactional multi-file updates
//!
//! Protocol: lock N names → read N envelopes in parallel → caller mutates →
//! commit saves N in parallel (with a before-image backup when N > 1) →
//! unlock. A [`Transaction`] that is dropped without committing rolls back
//! implicitly. Startup recovery (see `backup`) finishes the job if the
//! process dies mid-commit.

use std::panic;
use std::thread;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::backup::Backup;
use crate::{ObjectKey, Store, StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Fresh,
    Committed,
    RolledBack,
}

/// An open update over one or more envelopes. Holds the advisory locks for
/// every name until [`commit`](Transaction::commit),
/// [`rollback`](Transaction::rollback), or drop.
pub struct Transaction<'s, T> {
    store: &'s Store,
    names: Vec<String>,
    keys: Vec<Option<ObjectKey>>,
    objects: Vec<T>,
    state: TxState,
}

impl Store {
    /// Open a single envelope for read-modify-write.
    ///
    /// A missing envelope is not an error: the transaction starts from
    /// `T::default()` and the commit creates the file with a fresh key.
    pub fn open_for_update<T>(&self, name: &str) -> StoreResult<Transaction<'_, T>>
    where
        T: DeserializeOwned + Default + Send,
    {
        self.open_many_for_update(&[name])
    }

    /// Open several envelopes under one atomic update.
    ///
    /// Locks are acquired in sorted order (no deadlock between overlapping
    /// sets), then all envelopes are read in parallel. The objects are
    /// exposed in the caller's `names` order; their read completion order is
    /// not observable.
    pub fn open_many_for_update<T, S>(&self, names: &[S]) -> StoreResult<Transaction<'_, T>>
    where
        T: DeserializeOwned + Default + Send,
        S: AsRef<str>,
    {
        self.lock_many(names)?;

        let results: Vec<StoreResult<(T, Option<ObjectKey>)>> = thread::scope(|s| {
            let handles: Vec<_> = names
                .iter()
                .map(|name| {
                    let name = name.as_ref();
                    s.spawn(move || match self.read_data_file::<T>(name) {
                        Ok((obj, key)) => Ok((obj, Some(key))),
                        Err(StoreError::NotFound) => Ok((T::default(), None)),
                        Err(e) => Err(e),
                    })
                })
                .collect();
            handles.into_iter().map(join_scoped).collect()
        });

        let mut objects = Vec::with_capacity(names.len());
        let mut keys = Vec::with_capacity(names.len());
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok((obj, key)) => {
                    objects.push(obj);
                    keys.push(key);
                }
                Err(e) => errors.push(e),
            }
        }
        if !errors.is_empty() {
            if let Err(e) = self.unlock_many(names) {
                warn!(error = %e, "failed to release locks after aborted open");
            }
            return Err(StoreError::aggregate(errors));
        }

        Ok(Transaction {
            store: self,
            names: names.iter().map(|n| n.as_ref().to_owned()).collect(),
            keys,
            objects,
            state: TxState::Fresh,
        })
    }
}

impl<T> Transaction<'_, T> {
    /// The open objects, in the order the names were given.
    pub fn objects(&self) -> &[T] {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut [T] {
        &mut self.objects
    }

    /// The single object of an [`Store::open_for_update`] transaction.
    pub fn object(&self) -> &T {
        &self.objects[0]
    }

    pub fn object_mut(&mut self) -> &mut T {
        &mut self.objects[0]
    }

    /// Abandon the update: nothing is written, locks are released.
    pub fn rollback(mut self) -> StoreResult<()> {
        match self.release() {
            // The informational outcome of a deliberate rollback.
            Err(StoreError::RolledBack) => Ok(()),
            other => other,
        }
    }

    /// The rollback path of the commit state machine. Unlock failures
    /// outrank the informational [`StoreError::RolledBack`].
    fn release(&mut self) -> StoreResult<()> {
        match self.state {
            TxState::Committed => return Err(StoreError::AlreadyCommitted),
            TxState::RolledBack => return Err(StoreError::AlreadyRolledBack),
            TxState::Fresh => {}
        }
        self.state = TxState::RolledBack;
        self.store.unlock_many(&self.names)?;
        Err(StoreError::RolledBack)
    }
}

impl<T: Serialize + Send + Sync> Transaction<'_, T> {
    /// Save every object and release the locks.
    ///
    /// With more than one file, the originals are snapshotted into a backup
    /// record before the first save; any save failure restores them, so the
    /// set is all-or-nothing even across a crash (startup recovery replays
    /// the restore). Lock-release failures are surfaced only when nothing
    /// more important went wrong.
    pub fn commit(mut self) -> StoreResult<()> {
        match self.state {
            TxState::Committed => return Err(StoreError::AlreadyCommitted),
            TxState::RolledBack => return Err(StoreError::AlreadyRolledBack),
            TxState::Fresh => {}
        }

        let outcome = self.save_all();
        self.state = match outcome {
            Ok(()) => TxState::Committed,
            Err(_) => TxState::RolledBack,
        };

        match (outcome, self.store.unlock_many(&self.names)) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(unlock_err)) => Err(unlock_err),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(unlock_err)) => {
                warn!(error = %unlock_err, "failed to release locks after failed commit");
                Err(e)
            }
        }
    }

    fn save_all(&self) -> StoreResult<()> {
        let backup = if self.names.len() > 1 {
            Some(Backup::create(self.store, &self.names)?)
        } else {
            None
        };

        let results: Vec<StoreResult<()>> = thread::scope(|s| {
            let handles: Vec<_> = self
                .names
                .iter()
                .zip(&self.keys)
                .zip(&self.objects)
                .map(|((name, key), obj)| {
                    s.spawn(move || self.store.save_data_file(key.as_ref(), name, obj))
                })
                .collect();
            handles.into_iter().map(join_scoped).collect()
        });

        let mut errors: Vec<StoreError> = results.into_iter().filter_map(Result::err).collect();
        if errors.is_empty() {
            if let Some(backup) = backup {
                if let Err(marker_err) = backup.mark_committed() {
                    // Without the marker the next boot would resurrect the
                    // originals, so the commit must not report success:
                    // restore now and fail.
                    let mut errs = vec![marker_err];
                    if let Err(restore_err) = backup.restore() {
                        errs.push(restore_err);
                    }
                    return Err(StoreError::aggregate(errs));
                }
                backup.delete();
            }
            Ok(())
        } else {
            if let Some(backup) = backup {
                if let Err(restore_err) = backup.restore() {
                    warn!(error = %restore_err, "failed to restore backup after failed saves");
                    errors.push(restore_err);
                }
            }
            Err(StoreError::aggregate(errors))
        }
    }
}

impl<T> Drop for Transaction<'_, T> {
    fn drop(&mut self) {
        match self.release() {
            Ok(())
            | Err(StoreError::RolledBack)
            | Err(StoreError::AlreadyCommitted)
            | Err(StoreError::AlreadyRolledBack) => {}
            Err(e) => warn!(error = %e, "implicit rollback failed to release locks"),
        }
    }
}

fn join_scoped<T>(handle: thread::ScopedJoinHandle<'_, T>) -> T {
    match handle.join() {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}
