use async_trait::async_trait;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::DataKeySpec;
use aws_sdk_kms::Client;
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};
use crate::kms::{GeneratedDataKey, KmsClient};

/// AWS KMS provider.
///
/// Master key material stays inside KMS; this client only requests data-key
/// generation and decryption of wrapped blobs.
pub struct AwsKms {
    client: Client,
}

impl AwsKms {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from ambient AWS configuration, optionally overriding
    /// the region.
    pub async fn from_env(region: Option<&str>) -> Self {
        let mut loader = aws_config::from_env();
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let config = loader.load().await;
        Self::new(Client::new(&config))
    }
}

#[async_trait]
impl KmsClient for AwsKms {
    async fn generate_data_key(&self, key_id: &str) -> Result<GeneratedDataKey> {
        let response = self
            .client
            .generate_data_key()
            .key_id(key_id)
            .key_spec(DataKeySpec::Aes256)
            .send()
            .await
            .map_err(|e| CryptoError::KmsUnavailable(format!("GenerateDataKey: {e}")))?;

        let plaintext = response
            .plaintext()
            .ok_or_else(|| {
                CryptoError::KmsUnavailable("GenerateDataKey returned no plaintext".to_string())
            })?
            .as_ref()
            .to_vec();

        let ciphertext_blob = response
            .ciphertext_blob()
            .ok_or_else(|| {
                CryptoError::KmsUnavailable("GenerateDataKey returned no ciphertext".to_string())
            })?
            .as_ref()
            .to_vec();

        Ok(GeneratedDataKey {
            plaintext: Zeroizing::new(plaintext),
            ciphertext_blob,
        })
    }

    async fn decrypt(&self, ciphertext_blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let response = self
            .client
            .decrypt()
            .ciphertext_blob(Blob::new(ciphertext_blob))
            .send()
            .await
            .map_err(|e| CryptoError::KmsUnavailable(format!("Decrypt: {e}")))?;

        let plaintext = response
            .plaintext()
            .ok_or_else(|| {
                CryptoError::KmsUnavailable("Decrypt returned no plaintext".to_string())
            })?
            .as_ref()
            .to_vec();

        Ok(Zeroizing::new(plaintext))
    }
}
