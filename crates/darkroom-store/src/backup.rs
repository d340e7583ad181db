//! Before-image backups for multi-file commits, and startup recovery
//!
//! Layout of a backup record:
//! ```text
//! <root>/.backup-<nanos>/
//!     manifest        JSON: the logical names, in save order
//!     <i>.orig        copy of the i-th original envelope (absent originals
//!                     are recorded in the manifest instead)
//!     committed       sentinel created only after every save succeeded
//! ```
//!
//! The record is staged under `.backup-<nanos>.part` and renamed whole, so a
//! visible `.backup-*` directory is always complete. Crash contract: a
//! backup without the `committed` marker means the originals are
//! authoritative and partial new envelopes must be discarded; with the
//! marker, the commit finished and only cleanup remains.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fsutil;
use crate::{Store, StoreError, StoreResult};

const COMMITTED_MARKER: &str = "committed";
const MANIFEST_FILE: &str = "manifest";

#[derive(Serialize, Deserialize)]
struct Manifest {
    entries: Vec<ManifestEntry>,
}

#[derive(Serialize, Deserialize)]
struct ManifestEntry {
    name: String,
    /// Whether an original envelope existed (false = the commit was
    /// creating this file fresh).
    original: bool,
}

pub(crate) struct Backup {
    root: PathBuf,
    dir: PathBuf,
    manifest: Manifest,
}

impl Backup {
    /// Snapshot the current envelopes of `names` into a new backup record.
    /// The record only becomes visible (rename of the staging directory)
    /// once every copy and the manifest are durably written.
    pub(crate) fn create(store: &Store, names: &[String]) -> StoreResult<Backup> {
        let nanos = fsutil::unix_nanos();
        let part = store.dir().join(format!(".backup-{nanos}.part"));
        let dir = store.dir().join(format!(".backup-{nanos}"));
        fs::create_dir(&part)?;

        let mut entries = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let src = store.object_path(name);
            let original = match fs::read(&src) {
                Ok(data) => {
                    write_durable(&part.join(format!("{i}.orig")), &data)?;
                    true
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => return Err(e.into()),
            };
            entries.push(ManifestEntry {
                name: name.clone(),
                original,
            });
        }

        let manifest = Manifest { entries };
        let manifest_bytes =
            serde_json::to_vec_pretty(&manifest).map_err(|e| StoreError::Io(e.into()))?;
        write_durable(&part.join(MANIFEST_FILE), &manifest_bytes)?;
        sync_dir(&part);

        fs::rename(&part, &dir)?;
        Ok(Backup {
            root: store.dir().to_path_buf(),
            dir,
            manifest,
        })
    }

    /// Put every original back, then remove the record. Called when one of
    /// the parallel saves failed; rename is atomic per file, so each name
    /// flips back in one step.
    pub(crate) fn restore(&self) -> StoreResult<()> {
        restore_originals(&self.root, &self.dir, &self.manifest)?;
        fs::remove_dir_all(&self.dir)?;
        Ok(())
    }

    /// Mark the commit reached. After this the originals are dead even if
    /// cleanup is interrupted.
    pub(crate) fn mark_committed(&self) -> StoreResult<()> {
        let marker = fsutil::open_excl_sync(&self.dir.join(COMMITTED_MARKER))?;
        drop(marker);
        sync_dir(&self.dir);
        Ok(())
    }

    /// Remove the record after a successful commit. Failure is tolerable:
    /// the marker makes the next startup finish the cleanup.
    pub(crate) fn delete(&self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            warn!(backup = %self.dir.display(), error = %e, "failed to remove committed backup");
        }
    }
}

fn restore_originals(root: &Path, dir: &Path, manifest: &Manifest) -> StoreResult<()> {
    for (i, entry) in manifest.entries.iter().enumerate() {
        let target = root.join(&entry.name);
        if entry.original {
            // A missing copy means an earlier interrupted pass already
            // moved it back; reruns must keep going.
            match fs::rename(dir.join(format!("{i}.orig")), &target) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        } else {
            // The commit was creating this file; discard any partial save.
            match fs::remove_file(&target) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

/// Durable write with the same 0600 + `O_SYNC` semantics as every other
/// file the store creates.
fn write_durable(path: &Path, data: &[u8]) -> StoreResult<()> {
    let mut file = fsutil::open_excl_sync(path)?;
    file.write_all(data)?;
    Ok(())
}

/// Best-effort directory fsync so the staged record's entries are durable
/// before the rename publishes it.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
}

impl Store {
    /// Finish whatever a previous process left behind: restore interrupted
    /// commits, clear out completed ones. Runs once from [`Store::new`]
    /// before any other operation; idempotent, so a crash mid-recovery just
    /// reruns next boot.
    pub(crate) fn recover(&self) -> StoreResult<()> {
        for entry in fs::read_dir(self.dir())? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(".backup-") || !entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path();

            if name.ends_with(".part") {
                // Staging leftovers: reclaim only once old enough that no
                // live writer can still own them, same policy as stale locks.
                if fsutil::file_age(&path) > self.lock_cfg.stale_after {
                    if fs::remove_dir_all(&path).is_ok() {
                        warn!(backup = %path.display(), "removed abandoned backup staging directory");
                    }
                }
                continue;
            }

            if path.join(COMMITTED_MARKER).is_file() {
                fs::remove_dir_all(&path)?;
                debug!(backup = %path.display(), "cleared backup of completed commit");
                continue;
            }

            let manifest: Manifest = match fs::read(path.join(MANIFEST_FILE))
                .map_err(StoreError::from)
                .and_then(|b| serde_json::from_slice(&b).map_err(StoreError::Decode))
            {
                Ok(m) => m,
                Err(e) => {
                    // A visible record always has a durable manifest; if it
                    // doesn't parse, leave it for a human rather than guess.
                    warn!(backup = %path.display(), error = %e, "unreadable backup manifest, skipping");
                    continue;
                }
            };

            restore_originals(self.dir(), &path, &manifest)?;
            fs::remove_dir_all(&path)?;
            info!(
                backup = %path.display(),
                objects = manifest.entries.len(),
                "restored originals from interrupted commit"
            );
        }
        Ok(())
    }
}
