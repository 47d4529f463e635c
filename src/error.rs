//! The crate-wide error type.

use std::path::PathBuf;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, StewardError>;

/// Represents errors that can occur while running an authority.
///
/// Variants are grouped by how a caller is expected to react: configuration
/// errors are never retried, state errors require the caller to establish
/// state first, crypto errors carry the operation that failed, and storage
/// errors carry the offending path.
#[derive(Debug, Error)]
pub enum StewardError {
    /// Invalid name, unsupported algorithm or cipher, malformed template.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The authority is not in a state that allows the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Error due to invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Error during key generation.
    #[error("Key generation error: {0}")]
    KeyGenerationError(String),

    /// Error while producing or checking a signature.
    #[error("Signature error: {0}")]
    SignatureError(String),

    /// Error during data encoding.
    #[error("Failed to encode data: {0}")]
    EncodingError(String),

    /// Error during data decoding.
    #[error("Failed to decode data: {0}")]
    DecodingError(String),

    /// No entry with this identifier exists in the storage folder.
    #[error("No entry {id} in {}", folder.display())]
    MissingEntry { id: String, folder: PathBuf },

    /// A storage invariant does not hold for this path.
    #[error("Storage error at {}: {message}", path.display())]
    Storage { path: PathBuf, message: String },

    /// An I/O operation on this path failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StewardError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StewardError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<der::Error> for StewardError {
    /// Converts a `der::Error` into a `StewardError`.
    fn from(err: der::Error) -> Self {
        StewardError::DecodingError(err.to_string())
    }
}

impl From<spki::Error> for StewardError {
    fn from(err: spki::Error) -> Self {
        StewardError::DecodingError(err.to_string())
    }
}

impl From<pkcs8::Error> for StewardError {
    fn from(err: pkcs8::Error) -> Self {
        StewardError::DecodingError(err.to_string())
    }
}

impl From<rsa::Error> for StewardError {
    fn from(err: rsa::Error) -> Self {
        StewardError::KeyGenerationError(err.to_string())
    }
}

impl From<pem::PemError> for StewardError {
    fn from(err: pem::PemError) -> Self {
        StewardError::DecodingError(err.to_string())
    }
}

impl From<serde_json::Error> for StewardError {
    fn from(err: serde_json::Error) -> Self {
        StewardError::DecodingError(err.to_string())
    }
}
