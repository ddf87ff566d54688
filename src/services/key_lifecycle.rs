//! Per-user key provisioning, rotation, and the audit trail around both.

use chrono::Utc;
use serde_json::json;
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{CryptoError, Result};
use crate::models::{KeyAuditEntry, KeyAuditOperation, NewKeyAuditEntry, ProvisionOutcome};
use crate::repositories::KeyRepository;
use crate::services::dek_cache::DekCache;
use crate::services::envelope::EnvelopeKeyManager;

/// Recommended maximum age of a user's DEK before rotation.
pub const ROTATION_INTERVAL_DAYS: i64 = 90;

pub struct KeyLifecycleService {
    repository: Arc<dyn KeyRepository>,
    envelope: Arc<EnvelopeKeyManager>,
    cache: DekCache,
}

impl KeyLifecycleService {
    pub fn new(
        repository: Arc<dyn KeyRepository>,
        envelope: Arc<EnvelopeKeyManager>,
        cache: DekCache,
    ) -> Self {
        Self {
            repository,
            envelope,
            cache,
        }
    }

    /// Provision a user's first DEK, or rotate the existing one.
    ///
    /// ⚠️ Rotation replaces the wrapped DEK in place and keeps no copy of the
    /// old one. Every field value encrypted under the previous DEK becomes
    /// undecryptable the moment the new row commits. Rotate only as part of a
    /// workflow that re-encrypts the user's stored records with the new key,
    /// or for break-glass revocation where losing access to the old
    /// ciphertext is the intent.
    ///
    /// The user's cache entry is invalidated before this returns, so no
    /// operation that starts afterwards can encrypt under the superseded key.
    /// A failed attempt leaves an `error` row in the audit trail.
    pub async fn provision_or_rotate_key(
        &self,
        user_id: Uuid,
        performed_by: Option<Uuid>,
        ip_address: Option<IpAddr>,
    ) -> Result<ProvisionOutcome> {
        match self.mint_and_store(user_id, performed_by, ip_address).await {
            Ok(outcome) => {
                self.cache.invalidate(&user_id);

                match outcome.operation {
                    KeyAuditOperation::Rotate => tracing::warn!(
                        "🔑 ENCRYPTION KEY ROTATED for user {}: now v{} (ciphertext from earlier versions requires re-encryption)",
                        user_id,
                        outcome.version
                    ),
                    _ => tracing::info!(
                        "✅ Encryption key generated for user {} (v{})",
                        user_id,
                        outcome.version
                    ),
                }

                Ok(outcome)
            }
            Err(e) => {
                self.audit_failure(user_id, performed_by, ip_address, &e).await;
                Err(e)
            }
        }
    }

    async fn mint_and_store(
        &self,
        user_id: Uuid,
        performed_by: Option<Uuid>,
        ip_address: Option<IpAddr>,
    ) -> Result<ProvisionOutcome> {
        // The plaintext half is discarded right here and zeroizes; the cache
        // is only ever filled from the stored blob.
        let (_, wrapped) = self.envelope.generate_data_key().await?;

        self.repository
            .store_key_with_audit(user_id, &wrapped, performed_by, ip_address)
            .await
    }

    async fn audit_failure(
        &self,
        user_id: Uuid,
        performed_by: Option<Uuid>,
        ip_address: Option<IpAddr>,
        error: &CryptoError,
    ) {
        let entry = NewKeyAuditEntry {
            user_id,
            operation: KeyAuditOperation::Error,
            performed_by,
            details: json!({ "error": error.to_string() }),
            ip_address,
        };

        // Best effort: the caller gets the original error either way.
        if let Err(audit_err) = self.repository.insert_audit(entry).await {
            tracing::error!(
                "Failed to record key provisioning error for user {}: {}",
                user_id,
                audit_err
            );
        }
    }

    /// Enable or disable a user's key, e.g. on offboarding.
    ///
    /// Deactivation also drops the cached DEK; otherwise a disabled key
    /// could keep serving from cache until its TTL ran out.
    pub async fn set_key_active(&self, user_id: Uuid, active: bool) -> Result<()> {
        self.repository.set_key_active(user_id, active).await?;
        self.cache.invalidate(&user_id);

        tracing::info!(
            "Encryption key for user {} set to {}",
            user_id,
            if active { "active" } else { "inactive" }
        );

        Ok(())
    }

    /// Days until the user's key reaches the recommended rotation age.
    /// Negative when rotation is overdue.
    pub async fn rotation_recommendation(&self, user_id: Uuid) -> Result<i64> {
        let key = self.repository.fetch_active_key(user_id).await?;

        let last_rotation = key.rotated_at.unwrap_or(key.created_at);
        let age_days = (Utc::now() - last_rotation).num_days();
        let days_remaining = ROTATION_INTERVAL_DAYS - age_days;

        if days_remaining <= 0 {
            tracing::warn!(
                "⚠️  ENCRYPTION KEY ROTATION OVERDUE: user {} key v{} is {} days old (recommend rotation every {} days)",
                user_id,
                key.key_version,
                age_days,
                ROTATION_INTERVAL_DAYS
            );
        }

        Ok(days_remaining)
    }

    /// A user's key audit trail, newest first.
    pub async fn audit_trail(&self, user_id: Uuid, limit: i64) -> Result<Vec<KeyAuditEntry>> {
        self.repository.list_audit_entries(user_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::{DataKey, GeneratedDataKey, KmsClient, LocalKms};
    use crate::repositories::InMemoryKeyRepository;
    use async_trait::async_trait;
    use std::time::Duration;
    use zeroize::Zeroizing;

    fn rig() -> (KeyLifecycleService, Arc<InMemoryKeyRepository>, DekCache) {
        let kms = LocalKms::new(&LocalKms::generate_master_key()).unwrap();
        let envelope = Arc::new(EnvelopeKeyManager::new(
            Arc::new(kms),
            "alias/test",
            Duration::from_secs(5),
        ));
        let repository = Arc::new(InMemoryKeyRepository::new());
        let cache = DekCache::new(64);
        let service = KeyLifecycleService::new(repository.clone(), envelope, cache.clone());
        (service, repository, cache)
    }

    #[tokio::test]
    async fn test_provision_then_rotate() {
        let (service, repository, _) = rig();
        let user_id = Uuid::new_v4();
        let admin = Uuid::new_v4();

        let first = service
            .provision_or_rotate_key(user_id, Some(admin), None)
            .await
            .unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.operation, KeyAuditOperation::Generate);

        let stored_v1 = repository.fetch_active_key(user_id).await.unwrap();

        let second = service
            .provision_or_rotate_key(user_id, Some(admin), None)
            .await
            .unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.operation, KeyAuditOperation::Rotate);

        // The wrapped blob was replaced in place.
        let stored_v2 = repository.fetch_active_key(user_id).await.unwrap();
        assert_ne!(stored_v1.encrypted_dek, stored_v2.encrypted_dek);
        assert!(stored_v2.rotated_at.is_some());

        let trail = service.audit_trail(user_id, 10).await.unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].operation, KeyAuditOperation::Rotate);
        assert_eq!(trail[0].performed_by, Some(admin));
        assert_eq!(trail[0].details["key_version"], 2);
    }

    #[tokio::test]
    async fn test_rotation_invalidates_cached_key() {
        let (service, _, cache) = rig();
        let user_id = Uuid::new_v4();

        service
            .provision_or_rotate_key(user_id, None, None)
            .await
            .unwrap();

        // Simulate a DEK unwrapped and cached by the read path.
        cache.insert(user_id, DataKey::generate(), Duration::from_secs(3600));
        assert!(cache.get(&user_id).is_some());

        service
            .provision_or_rotate_key(user_id, None, None)
            .await
            .unwrap();

        assert!(cache.get(&user_id).is_none());
    }

    struct BrokenKms;

    #[async_trait]
    impl KmsClient for BrokenKms {
        async fn generate_data_key(&self, _key_id: &str) -> Result<GeneratedDataKey> {
            Err(CryptoError::KmsUnavailable("endpoint unreachable".to_string()))
        }

        async fn decrypt(&self, _blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
            Err(CryptoError::KmsUnavailable("endpoint unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_provisioning_leaves_error_audit() {
        let envelope = Arc::new(EnvelopeKeyManager::new(
            Arc::new(BrokenKms),
            "alias/test",
            Duration::from_secs(5),
        ));
        let repository = Arc::new(InMemoryKeyRepository::new());
        let service =
            KeyLifecycleService::new(repository.clone(), envelope, DekCache::new(64));
        let user_id = Uuid::new_v4();

        let result = service.provision_or_rotate_key(user_id, None, None).await;
        assert!(matches!(result, Err(CryptoError::KmsUnavailable(_))));

        let trail = service.audit_trail(user_id, 10).await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].operation, KeyAuditOperation::Error);
        assert!(trail[0].details["error"]
            .as_str()
            .unwrap()
            .contains("unavailable"));
    }

    #[tokio::test]
    async fn test_deactivation_drops_cached_key() {
        let (service, _, cache) = rig();
        let user_id = Uuid::new_v4();

        service
            .provision_or_rotate_key(user_id, None, None)
            .await
            .unwrap();
        cache.insert(user_id, DataKey::generate(), Duration::from_secs(3600));

        service.set_key_active(user_id, false).await.unwrap();

        assert!(cache.get(&user_id).is_none());
        assert!(matches!(
            service.rotation_recommendation(user_id).await,
            Err(CryptoError::KeyInactive(_))
        ));
    }

    #[tokio::test]
    async fn test_fresh_key_has_full_rotation_window() {
        let (service, _, _) = rig();
        let user_id = Uuid::new_v4();

        service
            .provision_or_rotate_key(user_id, None, None)
            .await
            .unwrap();

        let days = service.rotation_recommendation(user_id).await.unwrap();
        assert_eq!(days, ROTATION_INTERVAL_DAYS);
    }
}
