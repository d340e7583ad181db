//! Master key lifecycle: create, passphrase-sealed save, read
//!
//! On-disk format (`master.key`, pretty JSON):
//! ```text
//! {
//!   "kdf": { "mem_cost_kib": ..., "time_cost": ..., "parallelism": ... },
//!   "salt": "<base64, 16 bytes>",
//!   "nonce": "<base64, 24 bytes>",
//!   "ciphertext": "<base64, sealed sub-keys>"
//! }
//! ```
//! The ciphertext seals a JSON object holding the encryption sub-key and the
//! optional signing seed under an Argon2id-derived KEK.

use std::io;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use zeroize::Zeroize;

use crate::kdf::{derive_kek, KdfParams};
use crate::{CryptoError, CryptoResult, EncryptionKey, KEY_SIZE, NONCE_SIZE};

/// The passphrase-derived session key. Holds the encryption sub-key that
/// wraps all object keys, plus an optional signing seed reserved for remote
/// token minting.
pub struct MasterKey {
    encryption_key: EncryptionKey,
    sign_seed: Option<[u8; KEY_SIZE]>,
}

#[derive(Serialize, Deserialize)]
struct KeyFile {
    kdf: KdfParams,
    salt: String,
    nonce: String,
    ciphertext: String,
}

#[derive(Serialize, Deserialize)]
struct SubKeys {
    encryption_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sign_seed: Option<String>,
}

impl MasterKey {
    /// Generate a fresh master key with both sub-keys.
    pub fn create() -> Self {
        let mut seed = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut seed);
        Self {
            encryption_key: EncryptionKey::generate(),
            sign_seed: Some(seed),
        }
    }

    /// The sub-key that wraps object keys and keys the blob-path hash.
    pub fn encryption_key(&self) -> &EncryptionKey {
        &self.encryption_key
    }

    /// Read and unseal a master key file.
    pub fn read(passphrase: &SecretString, path: &Path) -> CryptoResult<Self> {
        let data = std::fs::read(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                CryptoError::NotFound
            } else {
                CryptoError::Io(e)
            }
        })?;
        let file: KeyFile = serde_json::from_slice(&data).map_err(|_| CryptoError::Corrupt)?;

        let salt: [u8; 16] = decode_fixed(&file.salt)?;
        let nonce_bytes: [u8; NONCE_SIZE] = decode_fixed(&file.nonce)?;
        let ciphertext = BASE64.decode(&file.ciphertext).map_err(|_| CryptoError::Corrupt)?;

        let mut kek = derive_kek(passphrase, &salt, &file.kdf)?;
        let cipher = XChaCha20Poly1305::new((&kek).into());
        kek.zeroize();

        let mut plaintext = cipher
            .decrypt(XNonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|_| CryptoError::BadPassphrase)?;

        let parsed: Result<SubKeys, _> = serde_json::from_slice(&plaintext);
        plaintext.zeroize();
        let sub = parsed.map_err(|_| CryptoError::Corrupt)?;

        let encryption_key = EncryptionKey::from_bytes(decode_fixed(&sub.encryption_key)?);
        let sign_seed = match &sub.sign_seed {
            Some(b64) => Some(decode_fixed(b64)?),
            None => None,
        };

        Ok(Self {
            encryption_key,
            sign_seed,
        })
    }

    /// Seal and atomically write the master key file (mode 0600).
    pub fn save(&self, passphrase: &SecretString, path: &Path) -> CryptoResult<()> {
        self.save_with_params(passphrase, path, KdfParams::default())
    }

    /// [`MasterKey::save`] with explicit KDF cost parameters.
    pub fn save_with_params(
        &self,
        passphrase: &SecretString,
        path: &Path,
        kdf: KdfParams,
    ) -> CryptoResult<()> {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let mut kek = derive_kek(passphrase, &salt, &kdf)?;
        let cipher = XChaCha20Poly1305::new((&kek).into());
        kek.zeroize();

        let sub = SubKeys {
            encryption_key: BASE64.encode(self.encryption_key.as_bytes()),
            sign_seed: self.sign_seed.as_ref().map(|s| BASE64.encode(s)),
        };
        let mut plaintext = serde_json::to_vec(&sub).map_err(|_| CryptoError::Corrupt)?;
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce_bytes), plaintext.as_slice())
            .map_err(|_| CryptoError::Corrupt)?;
        plaintext.zeroize();

        let file = KeyFile {
            kdf,
            salt: BASE64.encode(salt),
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(&ciphertext),
        };

        let parent = path.parent().ok_or_else(|| {
            CryptoError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "master key path has no parent directory",
            ))
        })?;
        std::fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))?;
        }
        serde_json::to_writer_pretty(&mut tmp, &file)
            .map_err(|e| CryptoError::Io(io::Error::from(e)))?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(path).map_err(|e| CryptoError::Io(e.error))?;
        Ok(())
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        if let Some(seed) = &mut self.sign_seed {
            seed.zeroize();
        }
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("encryption_key", &"[REDACTED]")
            .field("sign_seed", &self.sign_seed.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn decode_fixed<const N: usize>(b64: &str) -> CryptoResult<[u8; N]> {
    let bytes = BASE64.decode(b64).map_err(|_| CryptoError::Corrupt)?;
    let arr: [u8; N] = bytes.try_into().map_err(|_| CryptoError::Corrupt)?;
    Ok(arr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(s: &str) -> SecretString {
        SecretString::from(s)
    }

    /// Fast KDF params so tests don't pay the production Argon2id cost.
    fn fast() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_save_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.key");

        let master = MasterKey::create();
        master
            .save_with_params(&pass("correct horse"), &path, fast())
            .unwrap();

        let reread = MasterKey::read(&pass("correct horse"), &path).unwrap();
        assert_eq!(
            master.encryption_key().as_bytes(),
            reread.encryption_key().as_bytes()
        );
        assert_eq!(master.sign_seed, reread.sign_seed);
    }

    #[test]
    fn test_read_wrong_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.key");

        MasterKey::create()
            .save_with_params(&pass("right"), &path, fast())
            .unwrap();

        let result = MasterKey::read(&pass("wrong"), &path);
        assert!(matches!(result, Err(CryptoError::BadPassphrase)));
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = MasterKey::read(&pass("any"), &dir.path().join("master.key"));
        assert!(matches!(result, Err(CryptoError::NotFound)));
    }

    #[test]
    fn test_read_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.key");
        std::fs::write(&path, b"not a key file").unwrap();

        let result = MasterKey::read(&pass("any"), &path);
        assert!(matches!(result, Err(CryptoError::Corrupt)));
    }

    #[test]
    fn test_key_file_is_0600() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("master.key");
            MasterKey::create()
                .save_with_params(&pass("p"), &path, fast())
                .unwrap();
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
