//! darkroom-crypto: client-side key vault for the darkroom storage engine
//!
//! Key hierarchy:
//! ```text
//! Master Key (persisted passphrase-encrypted, Argon2id KEK)
//!   ├── EncryptionKey (256-bit) — wraps per-object keys, keys the blob-path hash
//!   ├── SignKey seed (optional) — reserved for remote token minting
//!   └── ObjectKey (per stored object, 256-bit random, wrapped by EncryptionKey)
//!       └── envelope body: XChaCha20-Poly1305 STREAM (BE32), 64 KiB segments
//! ```
//!
//! The envelope header written by [`EncryptionKey::write_encrypted_key`] is a
//! fixed 72 bytes; everything after it is the framed STREAM ciphertext
//! produced by [`ObjectKey::start_writer`].

pub mod kdf;
pub mod keys;
pub mod master;
pub mod stream;

mod error;

pub use error::{CryptoError, CryptoResult};
pub use kdf::KdfParams;
pub use keys::{EncryptionKey, ObjectKey};
pub use master::MasterKey;
pub use stream::{DecryptingReader, EncryptingWriter};

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Fixed width of a wrapped object key: `[24B nonce][32B ct][16B tag]`
pub const WRAPPED_KEY_SIZE: usize = NONCE_SIZE + KEY_SIZE + TAG_SIZE;
