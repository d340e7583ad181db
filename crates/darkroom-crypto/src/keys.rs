//! Master encryption key, per-object keys, and object-key wrapping
//!
//! Wrapped object key wire format (the envelope header, exactly 72 bytes):
//! ```text
//! [24 bytes: random nonce][32 bytes: ciphertext][16 bytes: Poly1305 tag]
//! ```

use std::io::{Read, Write};

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use zeroize::Zeroize;

use crate::{CryptoError, CryptoResult, KEY_SIZE, NONCE_SIZE, WRAPPED_KEY_SIZE};

/// Domain string for deriving the blob-path hashing key from the master
/// encryption key. Changing it re-keys every blob path on disk.
const PATH_HASH_CONTEXT: &str = "darkroom 2025 blob path hash v1";

/// The master encryption sub-key. Wraps every [`ObjectKey`] and keys the
/// blob-path hash. Zeroized on drop.
#[derive(Clone)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Generate a random 256-bit encryption key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Wrap `key` under this key and write the fixed-width header to `w`.
    pub fn write_encrypted_key<W: Write>(&self, w: &mut W, key: &ObjectKey) -> CryptoResult<()> {
        let cipher = XChaCha20Poly1305::new((&self.bytes).into());

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, key.as_bytes().as_ref())
            .map_err(|_| CryptoError::Corrupt)?;

        w.write_all(&nonce_bytes)?;
        w.write_all(&ciphertext)?;
        Ok(())
    }

    /// Read a fixed-width wrapped key header from `r` and unwrap it.
    ///
    /// A short read or an authenticator mismatch both surface as
    /// [`CryptoError::Corrupt`]: either way the envelope cannot be trusted.
    pub fn read_encrypted_key<R: Read>(&self, r: &mut R) -> CryptoResult<ObjectKey> {
        let mut wrapped = [0u8; WRAPPED_KEY_SIZE];
        r.read_exact(&mut wrapped).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                CryptoError::Corrupt
            } else {
                CryptoError::Io(e)
            }
        })?;

        let (nonce_bytes, ciphertext) = wrapped.split_at(NONCE_SIZE);
        let nonce = XNonce::from_slice(nonce_bytes);
        let cipher = XChaCha20Poly1305::new((&self.bytes).into());

        let mut plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::Corrupt)?;

        if plaintext.len() != KEY_SIZE {
            plaintext.zeroize();
            return Err(CryptoError::Corrupt);
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(&plaintext);
        plaintext.zeroize();

        Ok(ObjectKey::from_bytes(key_bytes))
    }

    /// Keyed hash of a logical name, used to place blobs on disk.
    ///
    /// The hashing key is derived from this key, so the same logical name
    /// under different accounts lands at different paths. Returns lowercase
    /// hex.
    pub fn hash_string(&self, s: &str) -> String {
        let path_key = blake3::derive_key(PATH_HASH_CONTEXT, &self.bytes);
        blake3::keyed_hash(&path_key, s.as_bytes()).to_hex().to_string()
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A per-object 256-bit encryption key. Lives wrapped inside the envelope it
/// encrypts. Zeroized on drop.
#[derive(Clone)]
pub struct ObjectKey {
    bytes: [u8; KEY_SIZE],
}

impl ObjectKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Mint a fresh random object key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }
}

impl Drop for ObjectKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_master_key() -> EncryptionKey {
        EncryptionKey::from_bytes([42u8; KEY_SIZE])
    }

    #[test]
    fn test_object_key_generation() {
        let k1 = ObjectKey::generate();
        let k2 = ObjectKey::generate();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_key_wrap_unwrap_roundtrip() {
        let master = test_master_key();
        let object_key = ObjectKey::generate();

        let mut wrapped = Vec::new();
        master.write_encrypted_key(&mut wrapped, &object_key).unwrap();
        assert_eq!(wrapped.len(), WRAPPED_KEY_SIZE);

        let unwrapped = master.read_encrypted_key(&mut wrapped.as_slice()).unwrap();
        assert_eq!(object_key.as_bytes(), unwrapped.as_bytes());
    }

    #[test]
    fn test_key_unwrap_wrong_master() {
        let master1 = EncryptionKey::from_bytes([1u8; KEY_SIZE]);
        let master2 = EncryptionKey::from_bytes([2u8; KEY_SIZE]);
        let object_key = ObjectKey::generate();

        let mut wrapped = Vec::new();
        master1.write_encrypted_key(&mut wrapped, &object_key).unwrap();

        let result = master2.read_encrypted_key(&mut wrapped.as_slice());
        assert!(matches!(result, Err(CryptoError::Corrupt)));
    }

    #[test]
    fn test_key_unwrap_truncated() {
        let master = test_master_key();
        let object_key = ObjectKey::generate();

        let mut wrapped = Vec::new();
        master.write_encrypted_key(&mut wrapped, &object_key).unwrap();
        wrapped.truncate(WRAPPED_KEY_SIZE - 1);

        let result = master.read_encrypted_key(&mut wrapped.as_slice());
        assert!(matches!(result, Err(CryptoError::Corrupt)));
    }

    #[test]
    fn test_key_unwrap_tampered() {
        let master = test_master_key();
        let object_key = ObjectKey::generate();

        let mut wrapped = Vec::new();
        master.write_encrypted_key(&mut wrapped, &object_key).unwrap();
        wrapped[30] ^= 0xFF;

        let result = master.read_encrypted_key(&mut wrapped.as_slice());
        assert!(matches!(result, Err(CryptoError::Corrupt)));
    }

    #[test]
    fn test_hash_string_stable_and_keyed() {
        let k1 = EncryptionKey::from_bytes([1u8; KEY_SIZE]);
        let k2 = EncryptionKey::from_bytes([2u8; KEY_SIZE]);

        let h1 = k1.hash_string("file-set/3");
        assert_eq!(h1, k1.hash_string("file-set/3"), "hash must be stable");
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));

        assert_ne!(
            h1,
            k2.hash_string("file-set/3"),
            "different accounts must hash the same name differently"
        );
        assert_ne!(h1, k1.hash_string("file-set/4"));
    }
}
