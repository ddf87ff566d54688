//! PHI field encryption orchestrator.
//!
//! Ties the pieces together for callers persisting or reading case records:
//! resolves the owner's DEK (cache, then store + KMS unwrap), encrypts the
//! fixed set of PHI columns before a write, decrypts them after a read.
//!
//! Failure stance differs by direction. Writes are strict: no key, no save,
//! plaintext PHI must never reach the database. Reads are resilient: a field
//! that cannot be decrypted is logged and returned as stored, so one bad
//! value cannot take down a whole case list.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::kms::DataKey;
use crate::repositories::KeyRepository;
use crate::services::dek_cache::{CacheStats, DekCache};
use crate::services::envelope::EnvelopeKeyManager;
use crate::services::field_cipher::FieldCipher;

/// Case-record columns that hold PHI and are encrypted at rest.
///
/// Date of birth is deliberately absent: it lives in a typed DATE column
/// where a base64 string cannot go.
pub const PHI_FIELDS: [&str; 3] = ["patient_first", "patient_last", "ins_provider"];

/// Shortest stored string that can be ciphertext: base64 of nonce (12) plus
/// tag (16) is 28 characters before any payload. Anything shorter is legacy
/// plaintext from before encryption was rolled out.
pub const MIN_ENCRYPTED_FIELD_LEN: usize = 28;

/// Record column marking whether its PHI fields are stored encrypted.
///
/// When present the marker is authoritative; the length heuristic only
/// applies to records written before the marker existed.
pub const PHI_MARKER_FIELD: &str = "phi_encrypted";

pub struct PhiFieldService {
    repository: Arc<dyn KeyRepository>,
    envelope: Arc<EnvelopeKeyManager>,
    cache: DekCache,
    dek_ttl: Duration,
}

impl PhiFieldService {
    pub fn new(
        repository: Arc<dyn KeyRepository>,
        envelope: Arc<EnvelopeKeyManager>,
        cache: DekCache,
        dek_ttl: Duration,
    ) -> Self {
        Self {
            repository,
            envelope,
            cache,
            dek_ttl,
        }
    }

    /// Resolve a user's plaintext DEK.
    ///
    /// With `use_cache` the cache is consulted first and populated after a
    /// fetch; without it both steps are skipped, which also keeps the key
    /// out of process memory beyond this call.
    pub async fn get_user_key(&self, user_id: Uuid, use_cache: bool) -> Result<DataKey> {
        if use_cache {
            if let Some(dek) = self.cache.get(&user_id) {
                return Ok(dek);
            }
        }

        let key_row = self.repository.fetch_active_key(user_id).await?;
        let dek = self.envelope.unwrap_key(&key_row.encrypted_dek).await?;

        if use_cache {
            self.cache.insert(user_id, dek.clone(), self.dek_ttl);
        }

        Ok(dek)
    }

    /// Encrypt the PHI fields of one record in place before it is persisted.
    ///
    /// Strict: any failure to obtain the key or encrypt a field is returned
    /// and the record must not be saved. Fields that are absent, empty, or
    /// not strings pass through untouched, as does every non-PHI column.
    pub async fn encrypt_record(
        &self,
        record: &mut Map<String, Value>,
        user_id: Uuid,
    ) -> Result<()> {
        // Already-encrypted records (marker set) must not be wrapped twice.
        if record.get(PHI_MARKER_FIELD).and_then(Value::as_bool) == Some(true) {
            return Ok(());
        }

        let pending: Vec<&str> = PHI_FIELDS
            .iter()
            .copied()
            .filter(|field| matches!(record.get(*field), Some(Value::String(s)) if !s.is_empty()))
            .collect();

        if pending.is_empty() {
            return Ok(());
        }

        let dek = self.get_user_key(user_id, true).await?;

        for field in pending {
            let plaintext = match record.get(field) {
                Some(Value::String(s)) => s.clone(),
                _ => continue,
            };
            let ciphertext = FieldCipher::encrypt(&dek, &plaintext)?;
            record.insert(field.to_string(), Value::String(ciphertext));
        }

        record.insert(PHI_MARKER_FIELD.to_string(), json!(true));

        Ok(())
    }

    /// Decrypt the PHI fields of one record in place after it is read.
    ///
    /// Resilient: if the user's key cannot be obtained the record is returned
    /// as stored, and a field that fails decryption keeps its stored value.
    /// Both cases are logged, neither fails the read.
    pub async fn decrypt_record(
        &self,
        record: &mut Map<String, Value>,
        user_id: Uuid,
    ) -> Result<()> {
        if record.get(PHI_MARKER_FIELD).and_then(Value::as_bool) == Some(false) {
            return Ok(());
        }

        let dek = match self.get_user_key(user_id, true).await {
            Ok(dek) => dek,
            Err(e) => {
                tracing::warn!(
                    "Returning record undecrypted for user {}: could not obtain key: {}",
                    user_id,
                    e
                );
                return Ok(());
            }
        };

        self.decrypt_fields(&dek, record, user_id);
        Ok(())
    }

    /// Decrypt a batch of one user's records with a single key resolution.
    ///
    /// Same failure stance as [`decrypt_record`](Self::decrypt_record): if
    /// the key cannot be obtained, every record is returned as stored.
    pub async fn decrypt_records(
        &self,
        records: &mut [Map<String, Value>],
        user_id: Uuid,
    ) -> Result<()> {
        let any_encrypted = records.iter().any(|record| {
            record.get(PHI_MARKER_FIELD).and_then(Value::as_bool) != Some(false)
        });
        if !any_encrypted {
            return Ok(());
        }

        let dek = match self.get_user_key(user_id, true).await {
            Ok(dek) => dek,
            Err(e) => {
                tracing::warn!(
                    "Returning {} records undecrypted for user {}: could not obtain key: {}",
                    records.len(),
                    user_id,
                    e
                );
                return Ok(());
            }
        };

        for record in records.iter_mut() {
            self.decrypt_fields(&dek, record, user_id);
        }

        Ok(())
    }

    fn decrypt_fields(&self, dek: &DataKey, record: &mut Map<String, Value>, user_id: Uuid) {
        let marker = record.get(PHI_MARKER_FIELD).and_then(Value::as_bool);
        if marker == Some(false) {
            return;
        }

        for field in PHI_FIELDS {
            let stored = match record.get(field) {
                Some(Value::String(s)) if !s.is_empty() => s.clone(),
                _ => continue,
            };

            // No marker column: fall back to the length heuristic to leave
            // legacy plaintext rows readable.
            if marker.is_none() && stored.chars().count() < MIN_ENCRYPTED_FIELD_LEN {
                continue;
            }

            match FieldCipher::decrypt(dek, &stored) {
                Ok(plaintext) => {
                    record.insert(field.to_string(), Value::String(plaintext));
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to decrypt field {} for user {}: {} (returning stored value)",
                        field,
                        user_id,
                        e
                    );
                }
            }
        }

        record.remove(PHI_MARKER_FIELD);
    }

    /// Drop cached key material, for one user or everyone.
    pub fn invalidate_cache(&self, user_id: Option<Uuid>) {
        match user_id {
            Some(user_id) => self.cache.invalidate(&user_id),
            None => self.cache.invalidate_all(),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
