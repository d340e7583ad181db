//! The on-disk envelope codec
//!
//! One file = one envelope:
//! ```text
//! [72 bytes: object key wrapped by the master encryption key]
//! [XChaCha20-Poly1305 STREAM { gzip { pretty JSON } }]
//! ```
//!
//! An envelope is self-describing: reading it needs only the master
//! encryption key. Compression happens inside the encrypted stream so
//! compressed sizes of unrelated objects leak nothing about each other.

use std::fs::File;
use std::io::{self, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::fsutil;
use crate::{ObjectKey, Store, StoreError, StoreResult};

impl Store {
    /// Read and decode the envelope at `name`.
    ///
    /// Returns the object together with its [`ObjectKey`] so a later
    /// [`Store::save_data_file`] can reuse it, keeping the envelope key
    /// stable across rewrites.
    pub fn read_data_file<T: DeserializeOwned>(&self, name: &str) -> StoreResult<(T, ObjectKey)> {
        let mut file = self.open_object(name)?;
        let key = self.master_key().read_encrypted_key(&mut file)?;
        let body = key.start_reader(file)?;
        let gz = GzDecoder::new(body);
        let obj = serde_json::from_reader(gz).map_err(classify_json)?;
        Ok((obj, key))
    }

    /// Atomically replace the envelope at `name`.
    ///
    /// Pass the key returned by a prior read to preserve the object's key;
    /// pass `None` to mint a fresh key (and create parent directories for a
    /// fresh file). The temp file is left in place on failure for the sweep
    /// to reclaim.
    pub fn save_data_file<T: Serialize>(
        &self,
        key: Option<&ObjectKey>,
        name: &str,
        obj: &T,
    ) -> StoreResult<()> {
        let path = self.object_path(name);
        let minted;
        let key = match key {
            Some(k) => k,
            None => {
                fsutil::create_parent(&path)?;
                minted = ObjectKey::generate();
                &minted
            }
        };

        let tmp = fsutil::envelope_tmp(&path);
        let mut file = fsutil::open_excl_sync(&tmp)?;
        self.master_key().write_encrypted_key(&mut file, key)?;
        let body = key.start_writer(file)?;
        let mut gz = GzEncoder::new(body, Compression::best());
        serde_json::to_writer_pretty(&mut gz, obj).map_err(classify_json)?;
        // Close in order: compressor, encryptor, then the O_SYNC file.
        let body = gz.finish()?;
        let file = body.finish()?;
        drop(file);

        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Write the decrypted, decompressed content of an envelope to `out`.
    /// Returns the number of plaintext bytes copied.
    pub fn dump_file<W: Write>(&self, name: &str, out: &mut W) -> StoreResult<u64> {
        let mut file = self.open_object(name)?;
        let key = self.master_key().read_encrypted_key(&mut file)?;
        let body = key.start_reader(file)?;
        let mut gz = GzDecoder::new(body);
        io::copy(&mut gz, out).map_err(classify_io)
    }

    fn open_object(&self, name: &str) -> StoreResult<File> {
        File::open(self.object_path(name)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound
            } else {
                StoreError::Io(e)
            }
        })
    }
}

/// Sort a serde_json error into the taxonomy: stream-level damage (failed
/// authentication, bad gzip, torn tail) is a corrupt envelope; anything the
/// parser rejects after a clean decrypt is a decode error.
fn classify_json(e: serde_json::Error) -> StoreError {
    if e.is_io() {
        match e.io_error_kind() {
            Some(io::ErrorKind::InvalidData) | Some(io::ErrorKind::UnexpectedEof) => {
                StoreError::Corrupt
            }
            _ => StoreError::Io(io::Error::from(e)),
        }
    } else {
        StoreError::Decode(e)
    }
}

fn classify_io(e: io::Error) -> StoreError {
    match e.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => StoreError::Corrupt,
        _ => StoreError::Io(e),
    }
}
