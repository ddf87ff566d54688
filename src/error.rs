use thiserror::Error;
use uuid::Uuid;

/// Failure taxonomy for the PHI encryption engine.
///
/// Write-path callers (key provisioning, record encryption) propagate these
/// errors; the record-decryption read path catches per-field failures locally
/// so a case read never hard-fails on one bad ciphertext.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("No active encryption key for user {0}")]
    KeyNotFound(Uuid),

    #[error("Encryption key for user {0} is inactive")]
    KeyInactive(Uuid),

    #[error("Key management service unavailable: {0}")]
    KmsUnavailable(String),

    #[error("Key material invalid: {0}")]
    KeyMaterialInvalid(String),

    #[error("Decryption failed authentication")]
    DecryptionAuthFailure,

    #[error("Malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
