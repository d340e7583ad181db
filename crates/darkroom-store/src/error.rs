use darkroom_crypto::CryptoError;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No envelope at the requested logical name. Recoverable: the
    /// transactional store treats it as a fresh object.
    #[error("object not found")]
    NotFound,

    /// Authenticator or gzip failure anywhere in the envelope. Fatal for
    /// that file.
    #[error("corrupt envelope")]
    Corrupt,

    /// The envelope decrypted and decompressed but the object inside did
    /// not parse.
    #[error("object decode error: {0}")]
    Decode(#[source] serde_json::Error),

    /// The intended outcome of an explicit rollback.
    #[error("rolled back")]
    RolledBack,

    #[error("already rolled back")]
    AlreadyRolledBack,

    #[error("already committed")]
    AlreadyCommitted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// First failure wrapping the rest, from a parallel fan-out.
    #[error("{first} (and {} more error(s))", .rest.len())]
    Aggregate {
        first: Box<StoreError>,
        rest: Vec<StoreError>,
    },
}

impl StoreError {
    /// Collapse a non-empty error list: one error stays itself, more become
    /// an aggregate led by the first.
    pub(crate) fn aggregate(mut errors: Vec<StoreError>) -> StoreError {
        debug_assert!(!errors.is_empty());
        if errors.len() == 1 {
            errors.remove(0)
        } else {
            let first = errors.remove(0);
            StoreError::Aggregate {
                first: Box::new(first),
                rest: errors,
            }
        }
    }
}

impl From<CryptoError> for StoreError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::NotFound => StoreError::NotFound,
            CryptoError::Io(io) => StoreError::Io(io),
            // BadPassphrase cannot arise from envelope reads; anything else
            // means the envelope cannot be trusted.
            _ => StoreError::Corrupt,
        }
    }
}
