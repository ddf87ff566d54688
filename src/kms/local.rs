use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};
use crate::kms::{GeneratedDataKey, KmsClient, DEK_SIZE};

const NONCE_SIZE: usize = 12;

/// In-process stand-in for an external KMS.
///
/// The master key is supplied as base64 through configuration and wraps DEKs
/// with AES-256-GCM (`nonce ‖ sealed` blobs). Development and single-node
/// deployments use this provider; installations that must keep the master key
/// out of application memory build with the `aws-kms` feature instead.
pub struct LocalKms {
    master: Aes256Gcm,
}

impl LocalKms {
    /// Create from a base64-encoded 256-bit master key.
    pub fn new(base64_master_key: &str) -> Result<Self> {
        let key_bytes = Zeroizing::new(BASE64.decode(base64_master_key).map_err(|_| {
            CryptoError::KeyMaterialInvalid("master key is not valid base64".to_string())
        })?);

        if key_bytes.len() != DEK_SIZE {
            return Err(CryptoError::KeyMaterialInvalid(format!(
                "master key must decode to {} bytes, got {}",
                DEK_SIZE,
                key_bytes.len()
            )));
        }

        let master = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|_| CryptoError::KeyMaterialInvalid("master key rejected".to_string()))?;

        Ok(Self { master })
    }

    /// Generate a fresh base64 master key for initial setup.
    pub fn generate_master_key() -> String {
        let mut key_bytes = Zeroizing::new(vec![0u8; DEK_SIZE]);
        rand::thread_rng().fill_bytes(key_bytes.as_mut_slice());
        BASE64.encode(key_bytes.as_slice())
    }
}

#[async_trait]
impl KmsClient for LocalKms {
    // The single local master key serves every alias.
    async fn generate_data_key(&self, _key_id: &str) -> Result<GeneratedDataKey> {
        let mut dek = Zeroizing::new(vec![0u8; DEK_SIZE]);
        rand::thread_rng().fill_bytes(dek.as_mut_slice());

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .master
            .encrypt(nonce, dek.as_slice())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + sealed.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&sealed);

        Ok(GeneratedDataKey {
            plaintext: dek,
            ciphertext_blob: blob,
        })
    }

    async fn decrypt(&self, ciphertext_blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if ciphertext_blob.len() < NONCE_SIZE {
            return Err(CryptoError::KeyMaterialInvalid(
                "wrapped key blob too short".to_string(),
            ));
        }

        let (nonce_bytes, sealed) = ciphertext_blob.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let opened = self.master.decrypt(nonce, sealed).map_err(|_| {
            CryptoError::KeyMaterialInvalid(
                "master key cannot unwrap the stored key blob".to_string(),
            )
        })?;

        Ok(Zeroizing::new(opened))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_master_keys() {
        assert!(LocalKms::new("not-base64!").is_err());
        assert!(LocalKms::new(&BASE64.encode([0u8; 16])).is_err());
        assert!(LocalKms::new(&LocalKms::generate_master_key()).is_ok());
    }

    #[tokio::test]
    async fn test_wrap_unwrap_round_trip() {
        let kms = LocalKms::new(&LocalKms::generate_master_key()).unwrap();
        let generated = kms.generate_data_key("alias/test").await.unwrap();

        let opened = kms.decrypt(&generated.ciphertext_blob).await.unwrap();
        assert_eq!(opened.as_slice(), generated.plaintext.as_slice());
        assert_eq!(opened.len(), DEK_SIZE);
    }

    #[tokio::test]
    async fn test_wrong_master_key_cannot_unwrap() {
        let kms_a = LocalKms::new(&LocalKms::generate_master_key()).unwrap();
        let kms_b = LocalKms::new(&LocalKms::generate_master_key()).unwrap();

        let generated = kms_a.generate_data_key("alias/test").await.unwrap();
        assert!(matches!(
            kms_b.decrypt(&generated.ciphertext_blob).await,
            Err(CryptoError::KeyMaterialInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_blob_is_rejected() {
        let kms = LocalKms::new(&LocalKms::generate_master_key()).unwrap();
        let mut generated = kms.generate_data_key("alias/test").await.unwrap();

        let last = generated.ciphertext_blob.len() - 1;
        generated.ciphertext_blob[last] ^= 0x01;
        assert!(kms.decrypt(&generated.ciphertext_blob).await.is_err());
    }
}
