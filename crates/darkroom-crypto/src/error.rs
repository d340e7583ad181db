use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// No key material at the requested path.
    #[error("master key file not found")]
    NotFound,

    /// The master key file could not be decrypted with the given passphrase.
    #[error("bad passphrase")]
    BadPassphrase,

    /// Authenticator mismatch, truncation, or malformed key material.
    #[error("corrupt or tampered key material")]
    Corrupt,

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
