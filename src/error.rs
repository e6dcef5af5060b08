use thiserror::Error;

/// Error type for every fallible operation of the secure processor.
///
/// Each variant corresponds to one result code of the processor API.
/// Host-library failures (I/O, OpenSSL) convert into their own variants and
/// belong to the generic-failure class.
#[derive(Error, Debug)]
pub enum SecError {
    #[error("operation failed: {0}")]
    Failure(String),

    #[error("invalid handle")]
    InvalidHandle,

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("invalid input size: {0}")]
    InvalidInputSize(String),

    #[error("invalid padding")]
    InvalidPadding,

    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    #[error("no such item")]
    NoSuchItem,

    #[error("item is already provisioned")]
    ItemAlreadyProvisioned,

    #[error("item is stored in a non-removable location")]
    ItemNonRemovable,

    #[error("verification failed")]
    VerificationFailed,

    #[error("unimplemented feature: {0}")]
    UnimplementedFeature(&'static str),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto library error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
}

/// Result type for secure processor operations
pub type Result<T> = std::result::Result<T, SecError>;
