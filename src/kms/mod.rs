//! Key management service clients.
//!
//! The engine talks to KMS through the [`KmsClient`] trait: two operations,
//! `GenerateDataKey` against the configured master key and `Decrypt` of a
//! wrapped blob. The master key itself never leaves the KMS. Implementations:
//! [`LocalKms`] (master key from the environment, wraps DEKs with AES-256-GCM)
//! and, behind the `aws-kms` feature, [`aws::AwsKms`].

pub mod local;

#[cfg(feature = "aws-kms")]
pub mod aws;

pub use local::LocalKms;

#[cfg(feature = "aws-kms")]
pub use aws::AwsKms;

use async_trait::async_trait;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CryptoError, Result};

/// Size of a data encryption key in bytes (AES-256).
pub const DEK_SIZE: usize = 32;

/// A per-user data encryption key.
///
/// Key material is zeroized when the value is dropped, including cached
/// copies evicted from the DEK cache. `Debug` never prints the material.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey([u8; DEK_SIZE]);

impl DataKey {
    /// Generate a fresh random 256-bit key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; DEK_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; DEK_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build a key from raw material, e.g. a KMS `Decrypt` response.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != DEK_SIZE {
            return Err(CryptoError::KeyMaterialInvalid(format!(
                "expected {} bytes of key material, got {}",
                DEK_SIZE,
                bytes.len()
            )));
        }
        let mut key = [0u8; DEK_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; DEK_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DataKey").field(&"[REDACTED]").finish()
    }
}

/// Result of a KMS `GenerateDataKey` call: the key in both forms.
pub struct GeneratedDataKey {
    /// Raw key material; zeroized on drop.
    pub plaintext: Zeroizing<Vec<u8>>,
    /// The same key wrapped by the master key; safe to persist.
    pub ciphertext_blob: Vec<u8>,
}

/// Remote key management capability.
///
/// Implementations must be stateless with respect to unwrapped keys; caching
/// is the DEK cache's job.
#[async_trait]
pub trait KmsClient: Send + Sync {
    /// `GenerateDataKey(masterKeyId)`: mint a fresh DEK and return it both in
    /// plaintext and wrapped under the master key.
    async fn generate_data_key(&self, key_id: &str) -> Result<GeneratedDataKey>;

    /// `Decrypt(ciphertextBlob)`: unwrap a previously wrapped DEK. The master
    /// key is identified by the blob itself.
    async fn decrypt(&self, ciphertext_blob: &[u8]) -> Result<Zeroizing<Vec<u8>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(matches!(
            DataKey::from_slice(&[0u8; 16]),
            Err(CryptoError::KeyMaterialInvalid(_))
        ));
        assert!(DataKey::from_slice(&[7u8; 32]).is_ok());
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let key = DataKey::generate();
        assert_eq!(format!("{:?}", key), "DataKey(\"[REDACTED]\")");
    }

    #[test]
    fn test_generated_keys_differ() {
        let a = DataKey::generate();
        let b = DataKey::generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
