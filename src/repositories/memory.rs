//! In-memory [`KeyRepository`] for tests and single-process development.
//!
//! Mirrors the Postgres implementation's semantics: upsert bumps the version,
//! audit rows are append-only, inactive keys surface as `KeyInactive`.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{CryptoError, Result};
use crate::models::{
    KeyAuditEntry, KeyAuditOperation, NewKeyAuditEntry, ProvisionOutcome, UserEncryptionKey,
};
use crate::repositories::KeyRepository;

#[derive(Default)]
pub struct InMemoryKeyRepository {
    keys: Mutex<HashMap<Uuid, UserEncryptionKey>>,
    audit: Mutex<Vec<KeyAuditEntry>>,
}

impl InMemoryKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn push_audit(&self, entry: NewKeyAuditEntry) {
        let mut audit = self.audit.lock().await;
        let id = audit.len() as i64 + 1;
        audit.push(KeyAuditEntry {
            id,
            user_id: entry.user_id,
            operation: entry.operation,
            performed_by: entry.performed_by,
            operation_timestamp: Utc::now(),
            details: entry.details,
            ip_address: entry.ip_address.map(|ip| ip.to_string()),
        });
    }
}

#[async_trait]
impl KeyRepository for InMemoryKeyRepository {
    async fn fetch_active_key(&self, user_id: Uuid) -> Result<UserEncryptionKey> {
        let keys = self.keys.lock().await;
        match keys.get(&user_id) {
            None => Err(CryptoError::KeyNotFound(user_id)),
            Some(key) if !key.is_active => Err(CryptoError::KeyInactive(user_id)),
            Some(key) => Ok(key.clone()),
        }
    }

    async fn store_key_with_audit(
        &self,
        user_id: Uuid,
        encrypted_dek: &str,
        performed_by: Option<Uuid>,
        ip_address: Option<IpAddr>,
    ) -> Result<ProvisionOutcome> {
        let version = {
            let mut keys = self.keys.lock().await;
            match keys.get_mut(&user_id) {
                Some(existing) => {
                    existing.encrypted_dek = encrypted_dek.to_string();
                    existing.key_version += 1;
                    existing.rotated_at = Some(Utc::now());
                    existing.is_active = true;
                    existing.key_version
                }
                None => {
                    keys.insert(
                        user_id,
                        UserEncryptionKey {
                            user_id,
                            encrypted_dek: encrypted_dek.to_string(),
                            key_version: 1,
                            created_at: Utc::now(),
                            rotated_at: None,
                            is_active: true,
                        },
                    );
                    1
                }
            }
        };

        let operation = if version == 1 {
            KeyAuditOperation::Generate
        } else {
            KeyAuditOperation::Rotate
        };

        self.push_audit(NewKeyAuditEntry {
            user_id,
            operation,
            performed_by,
            details: json!({ "key_version": version }),
            ip_address,
        })
        .await;

        Ok(ProvisionOutcome { version, operation })
    }

    async fn insert_audit(&self, entry: NewKeyAuditEntry) -> Result<()> {
        self.push_audit(entry).await;
        Ok(())
    }

    async fn set_key_active(&self, user_id: Uuid, active: bool) -> Result<()> {
        let mut keys = self.keys.lock().await;
        match keys.get_mut(&user_id) {
            Some(key) => {
                key.is_active = active;
                Ok(())
            }
            None => Err(CryptoError::KeyNotFound(user_id)),
        }
    }

    async fn list_active_keys(&self) -> Result<Vec<UserEncryptionKey>> {
        let keys = self.keys.lock().await;
        let mut active: Vec<UserEncryptionKey> =
            keys.values().filter(|key| key.is_active).cloned().collect();
        active.sort_by_key(|key| key.created_at);
        Ok(active)
    }

    async fn list_audit_entries(&self, user_id: Uuid, limit: i64) -> Result<Vec<KeyAuditEntry>> {
        let audit = self.audit.lock().await;
        let mut entries: Vec<KeyAuditEntry> = audit
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.id.cmp(&a.id));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }
}
