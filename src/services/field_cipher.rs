//! AES-256-GCM field cipher.
//!
//! Encrypts individual PHI column values under a per-user DEK. Every call
//! builds the cipher from the caller's key, so one service instance serves
//! all users.
//!
//! Security properties:
//! - AES-256: 256-bit key strength
//! - GCM: Authenticated encryption (detects tampering)
//! - Unique nonce per encryption (never reused across fields or calls)

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore as _;

use crate::error::{CryptoError, Result};
use crate::kms::DataKey;

/// GCM nonce size in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Field cipher for PHI column values.
///
/// Stored format: `base64(nonce(12) || tag(16) || ciphertext)`. The tag sits
/// between nonce and ciphertext so a decoder can slice the header at fixed
/// offsets regardless of plaintext length.
pub struct FieldCipher;

impl FieldCipher {
    /// Encrypt one field value under the given DEK.
    ///
    /// Empty input passes through unchanged; there is nothing to protect.
    pub fn encrypt(key: &DataKey, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let cipher = Self::cipher_for(key)?;

        // Unique 96-bit nonce per call; a repeat under the same key would
        // break GCM confidentiality and authenticity.
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        // aes-gcm emits ciphertext || tag; the stored layout wants the tag
        // up front with the nonce.
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

        let mut combined = Vec::with_capacity(NONCE_SIZE + TAG_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(tag);
        combined.extend_from_slice(ciphertext);

        Ok(BASE64.encode(&combined))
    }

    /// Decrypt one stored field value under the given DEK.
    pub fn decrypt(key: &DataKey, encoded: &str) -> Result<String> {
        if encoded.is_empty() {
            return Ok(String::new());
        }

        let combined = BASE64
            .decode(encoded)
            .map_err(|_| CryptoError::MalformedCiphertext("not valid base64".to_string()))?;

        // Must carry at least nonce (12) + tag (16) = 28 bytes.
        if combined.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::MalformedCiphertext(format!(
                "decoded length {} is shorter than nonce and tag",
                combined.len()
            )));
        }

        let (nonce_bytes, rest) = combined.split_at(NONCE_SIZE);
        let (tag, ciphertext) = rest.split_at(TAG_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        // Rebuild ciphertext || tag for the aead API.
        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        let cipher = Self::cipher_for(key)?;
        let plaintext_bytes = cipher
            .decrypt(nonce, sealed.as_slice())
            .map_err(|_| CryptoError::DecryptionAuthFailure)?;

        String::from_utf8(plaintext_bytes).map_err(|_| {
            CryptoError::MalformedCiphertext("decrypted bytes are not UTF-8".to_string())
        })
    }

    /// Encrypt a nullable field value. Absent and empty both mean there is
    /// nothing to protect, so both come back as `None`.
    pub fn encrypt_optional(key: &DataKey, plaintext: Option<&str>) -> Result<Option<String>> {
        match plaintext {
            Some(text) if !text.is_empty() => Ok(Some(Self::encrypt(key, text)?)),
            _ => Ok(None),
        }
    }

    /// Decrypt a nullable field value, with the same absent/empty collapse as
    /// [`encrypt_optional`](Self::encrypt_optional).
    pub fn decrypt_optional(key: &DataKey, encoded: Option<&str>) -> Result<Option<String>> {
        match encoded {
            Some(text) if !text.is_empty() => Ok(Some(Self::decrypt(key, text)?)),
            _ => Ok(None),
        }
    }

    fn cipher_for(key: &DataKey) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|_| CryptoError::KeyMaterialInvalid("key is not 256 bits".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_encryption_decryption() {
        let key = DataKey::generate();

        let plaintext = "Jonathan";
        let ciphertext = FieldCipher::encrypt(&key, plaintext).unwrap();
        let decrypted = FieldCipher::decrypt(&key, &ciphertext).unwrap();

        assert_eq!(plaintext, decrypted);
        assert_ne!(plaintext, ciphertext);
    }

    #[test]
    fn test_empty_string() {
        let key = DataKey::generate();

        let ciphertext = FieldCipher::encrypt(&key, "").unwrap();
        assert_eq!(ciphertext, "");
        assert_eq!(FieldCipher::decrypt(&key, &ciphertext).unwrap(), "");
    }

    #[test]
    fn test_wire_layout() {
        let key = DataKey::generate();

        let plaintext = "Smith";
        let ciphertext = FieldCipher::encrypt(&key, plaintext).unwrap();

        // Decoded layout is nonce || tag || ciphertext, so total length is
        // 28 bytes of header plus one byte per plaintext byte.
        let decoded = BASE64.decode(&ciphertext).unwrap();
        assert_eq!(decoded.len(), NONCE_SIZE + TAG_SIZE + plaintext.len());

        // Even a one-byte plaintext stays comfortably above the 28-character
        // floor used to tell ciphertext from legacy plaintext.
        let tiny = FieldCipher::encrypt(&key, "J").unwrap();
        assert!(tiny.len() >= 28);
    }

    #[test]
    fn test_unique_nonces() {
        let key = DataKey::generate();

        let ct1 = FieldCipher::encrypt(&key, "same data").unwrap();
        let ct2 = FieldCipher::encrypt(&key, "same data").unwrap();

        assert_ne!(ct1, ct2);
        assert_eq!(FieldCipher::decrypt(&key, &ct1).unwrap(), "same data");
        assert_eq!(FieldCipher::decrypt(&key, &ct2).unwrap(), "same data");
    }

    #[test]
    fn test_nonces_unique_across_many_encryptions() {
        let key = DataKey::generate();
        let mut seen = HashSet::new();

        for _ in 0..10_000 {
            let ciphertext = FieldCipher::encrypt(&key, "fixed plaintext").unwrap();
            let decoded = BASE64.decode(&ciphertext).unwrap();
            let nonce: [u8; NONCE_SIZE] = decoded[..NONCE_SIZE].try_into().unwrap();
            assert!(seen.insert(nonce), "nonce repeated within 10k encryptions");
        }
    }

    #[test]
    fn test_tampered_ciphertext() {
        let key = DataKey::generate();
        let ciphertext = FieldCipher::encrypt(&key, "sensitive data").unwrap();
        let decoded = BASE64.decode(&ciphertext).unwrap();

        // Flipping any single bit of the header or body must fail the tag
        // check.
        for index in 0..decoded.len() {
            let mut tampered = decoded.clone();
            tampered[index] ^= 0x01;
            let reencoded = BASE64.encode(&tampered);
            assert!(
                FieldCipher::decrypt(&key, &reencoded).is_err(),
                "bit flip at byte {} was not detected",
                index
            );
        }
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let key_a = DataKey::generate();
        let key_b = DataKey::generate();

        let ciphertext = FieldCipher::encrypt(&key_a, "cross-user read").unwrap();
        assert!(matches!(
            FieldCipher::decrypt(&key_b, &ciphertext),
            Err(CryptoError::DecryptionAuthFailure)
        ));
    }

    #[test]
    fn test_malformed_inputs() {
        let key = DataKey::generate();

        assert!(matches!(
            FieldCipher::decrypt(&key, "@@not base64@@"),
            Err(CryptoError::MalformedCiphertext(_))
        ));

        // Valid base64 but fewer than 28 decoded bytes.
        let short = BASE64.encode([0u8; 20]);
        assert!(matches!(
            FieldCipher::decrypt(&key, &short),
            Err(CryptoError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn test_optional_fields() {
        let key = DataKey::generate();

        let encrypted = FieldCipher::encrypt_optional(&key, Some("data")).unwrap();
        let decrypted = FieldCipher::decrypt_optional(&key, encrypted.as_deref()).unwrap();
        assert_eq!(decrypted.as_deref(), Some("data"));

        assert!(FieldCipher::encrypt_optional(&key, None).unwrap().is_none());
        assert!(FieldCipher::decrypt_optional(&key, None).unwrap().is_none());
        assert!(FieldCipher::encrypt_optional(&key, Some("")).unwrap().is_none());
        assert!(FieldCipher::decrypt_optional(&key, Some("")).unwrap().is_none());
    }
}
