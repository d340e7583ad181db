//! Shared filesystem helpers: synchronous create-exclusive opens and
//! temp-file naming for the write–rename atomicity pattern.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Open `path` with `O_CREAT|O_EXCL|O_WRONLY|O_SYNC`, mode 0600.
///
/// `O_SYNC` makes every write durable before it returns, so a file that
/// exists after rename is complete by construction.
pub(crate) fn open_excl_sync(path: &Path) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600).custom_flags(libc::O_SYNC);
    }
    opts.open(path)
}

/// Create the parent directory of `path` if it is missing.
pub(crate) fn create_parent(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Nanoseconds since the epoch, for unique temp-file suffixes.
pub(crate) fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// Sibling temp path for an envelope save: `<path>.tmp-<nanos>`.
pub(crate) fn envelope_tmp(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".tmp-{}", unix_nanos()));
    PathBuf::from(name)
}

/// Sibling temp path for a blob download: `<path>-tmp-<nanos>`.
pub(crate) fn blob_tmp(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!("-tmp-{}", unix_nanos()));
    PathBuf::from(name)
}

/// Leftover from an interrupted atomic write?
pub(crate) fn is_temp_name(name: &str) -> bool {
    name.contains(".tmp-") || name.contains("-tmp-")
}

/// Age of a path by mtime; zero when the clock or metadata misbehaves, so
/// sweepers stay conservative.
pub(crate) fn file_age(path: &Path) -> Duration {
    std::fs::metadata(path)
        .and_then(|md| md.modified())
        .ok()
        .and_then(|mtime| mtime.elapsed().ok())
        .unwrap_or_default()
}
