//! Envelope key manager.
//!
//! Sits between the KMS client and everything that handles stored keys:
//! mints per-user DEKs with `GenerateDataKey`, unwraps persisted blobs with
//! `Decrypt`, and applies the configured timeout so a wedged KMS surfaces as
//! an error instead of a hung request.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::error::{CryptoError, Result};
use crate::kms::{DataKey, KmsClient};

pub struct EnvelopeKeyManager {
    kms: Arc<dyn KmsClient>,
    master_key_id: String,
    kms_timeout: Duration,
}

impl EnvelopeKeyManager {
    pub fn new(
        kms: Arc<dyn KmsClient>,
        master_key_id: impl Into<String>,
        kms_timeout: Duration,
    ) -> Self {
        Self {
            kms,
            master_key_id: master_key_id.into(),
            kms_timeout,
        }
    }

    pub fn master_key_id(&self) -> &str {
        &self.master_key_id
    }

    /// Mint a fresh DEK under the configured master key.
    ///
    /// Returns the plaintext key for immediate use plus the wrapped blob,
    /// base64-encoded for `user_encryption_keys.encrypted_dek`.
    pub async fn generate_data_key(&self) -> Result<(DataKey, String)> {
        let generated = tokio::time::timeout(
            self.kms_timeout,
            self.kms.generate_data_key(&self.master_key_id),
        )
        .await
        .map_err(|_| {
            CryptoError::KmsUnavailable(format!(
                "GenerateDataKey timed out after {}s",
                self.kms_timeout.as_secs()
            ))
        })??;

        let dek = DataKey::from_slice(&generated.plaintext)?;
        Ok((dek, BASE64.encode(&generated.ciphertext_blob)))
    }

    /// Unwrap a stored DEK blob back into usable key material.
    pub async fn unwrap_key(&self, encrypted_dek: &str) -> Result<DataKey> {
        let blob = BASE64.decode(encrypted_dek).map_err(|_| {
            CryptoError::KeyMaterialInvalid("stored key blob is not valid base64".to_string())
        })?;

        let plaintext = tokio::time::timeout(self.kms_timeout, self.kms.decrypt(&blob))
            .await
            .map_err(|_| {
                CryptoError::KmsUnavailable(format!(
                    "Decrypt timed out after {}s",
                    self.kms_timeout.as_secs()
                ))
            })??;

        DataKey::from_slice(&plaintext)
    }
}
