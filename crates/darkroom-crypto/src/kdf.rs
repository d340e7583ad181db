//! Key derivation: Argon2id passphrase → key-encryption key

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{CryptoError, CryptoResult, KEY_SIZE};

/// Argon2id parameters, stored alongside the sealed master key so that the
/// file remains readable after the defaults change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Derive the 256-bit key-encryption key that seals the master key file.
///
/// The salt is 16 bytes, randomly generated at first save and stored in the
/// key file header (it does not need to be secret).
pub fn derive_kek(
    passphrase: &SecretString,
    salt: &[u8; 16],
    params: &KdfParams,
) -> CryptoResult<[u8; KEY_SIZE]> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::Kdf(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::Kdf(format!("Argon2id KDF failed: {e}")))?;

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fast params for tests; production defaults take ~1s on purpose.
    fn test_params() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_kdf_deterministic() {
        let passphrase = SecretString::from("test-passphrase-123");
        let salt = [1u8; 16];
        let params = test_params();

        let key1 = derive_kek(&passphrase, &salt, &params).unwrap();
        let key2 = derive_kek(&passphrase, &salt, &params).unwrap();

        assert_eq!(key1, key2, "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_different_passphrases() {
        let salt = [1u8; 16];
        let params = test_params();

        let key1 = derive_kek(&SecretString::from("passphrase-a"), &salt, &params).unwrap();
        let key2 = derive_kek(&SecretString::from("passphrase-b"), &salt, &params).unwrap();

        assert_ne!(key1, key2, "different passphrases must produce different keys");
    }

    #[test]
    fn test_kdf_different_salts() {
        let passphrase = SecretString::from("same-passphrase");
        let params = test_params();

        let key1 = derive_kek(&passphrase, &[1u8; 16], &params).unwrap();
        let key2 = derive_kek(&passphrase, &[2u8; 16], &params).unwrap();

        assert_ne!(key1, key2, "different salts must produce different keys");
    }
}
