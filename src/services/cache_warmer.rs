//! Startup DEK cache warming.
//!
//! Unwraps every active user's DEK once at boot so the first request after a
//! deploy does not pay a per-user KMS round trip.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::Result;
use crate::repositories::KeyRepository;
use crate::services::dek_cache::DekCache;
use crate::services::envelope::EnvelopeKeyManager;

#[derive(Debug, Clone, Serialize)]
pub struct UserWarmResult {
    pub user_id: Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one warming pass, for startup logs and health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct WarmingReport {
    pub total_users: usize,
    pub successful: usize,
    pub failed: usize,
    pub duration_seconds: f64,
    pub details: Vec<UserWarmResult>,
}

pub struct CacheWarmer {
    repository: Arc<dyn KeyRepository>,
    envelope: Arc<EnvelopeKeyManager>,
    cache: DekCache,
    dek_ttl: Duration,
}

impl CacheWarmer {
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

    /// Unwrap and cache the DEK of every active user.
    ///
    /// Per-user failures are logged and counted in the report; one corrupt
    /// blob must not keep the rest of the cache cold. Only listing the keys
    /// can fail the pass as a whole.
    pub async fn warm_all(&self) -> Result<WarmingReport> {
        let started = Instant::now();
        let keys = self.repository.list_active_keys().await?;

        let mut report = WarmingReport {
            total_users: keys.len(),
            successful: 0,
            failed: 0,
            duration_seconds: 0.0,
            details: Vec::with_capacity(keys.len()),
        };

        for key in keys {
            match self.envelope.unwrap_key(&key.encrypted_dek).await {
                Ok(dek) => {
                    self.cache.insert(key.user_id, dek, self.dek_ttl);
                    report.successful += 1;
                    report.details.push(UserWarmResult {
                        user_id: key.user_id,
                        success: true,
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::warn!("Failed to warm DEK for user {}: {}", key.user_id, e);
                    report.failed += 1;
                    report.details.push(UserWarmResult {
                        user_id: key.user_id,
                        success: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        report.duration_seconds = started.elapsed().as_secs_f64();

        tracing::info!(
            "🔥 DEK cache warmed: {}/{} users in {:.2}s ({} failed)",
            report.successful,
            report.total_users,
            report.duration_seconds,
            report.failed
        );

        Ok(report)
    }

    /// Run one warming pass on a background task, for hosts that prefer not
    /// to block startup on it.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<Result<WarmingReport>> {
        tokio::spawn(async move { self.warm_all().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::LocalKms;
    use crate::repositories::{InMemoryKeyRepository, KeyRepository};

    struct Rig {
        warmer: CacheWarmer,
        repository: Arc<InMemoryKeyRepository>,
        envelope: Arc<EnvelopeKeyManager>,
        cache: DekCache,
    }

    fn rig() -> Rig {
        let kms = LocalKms::new(&LocalKms::generate_master_key()).unwrap();
        let envelope = Arc::new(EnvelopeKeyManager::new(
            Arc::new(kms),
            "alias/test",
            Duration::from_secs(5),
        ));
        let repository = Arc::new(InMemoryKeyRepository::new());
        let cache = DekCache::new(64);
        let warmer = CacheWarmer::new(
            repository.clone(),
            envelope.clone(),
            cache.clone(),
            Duration::from_secs(3600),
        );
        Rig {
            warmer,
            repository,
            envelope,
            cache,
        }
    }

    async fn provision(rig: &Rig) -> Uuid {
        let user_id = Uuid::new_v4();
        let (_, wrapped) = rig.envelope.generate_data_key().await.unwrap();
        rig.repository
            .store_key_with_audit(user_id, &wrapped, None, None)
            .await
            .unwrap();
        user_id
    }

    #[tokio::test]
    async fn test_warms_every_active_user() {
        let rig = rig();
        let mut users = Vec::new();
        for _ in 0..3 {
            users.push(provision(&rig).await);
        }

        let report = rig.warmer.warm_all().await.unwrap();

        assert_eq!(report.total_users, 3);
        assert_eq!(report.successful, 3);
        assert_eq!(report.failed, 0);
        for user_id in users {
            assert!(rig.cache.get(&user_id).is_some());
        }
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_counted_not_fatal() {
        let rig = rig();
        let good_a = provision(&rig).await;
        let good_b = provision(&rig).await;

        let broken = Uuid::new_v4();
        rig.repository
            .store_key_with_audit(broken, "not-a-wrapped-key", None, None)
            .await
            .unwrap();

        let report = rig.warmer.warm_all().await.unwrap();

        assert_eq!(report.total_users, 3);
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 1);

        let failure = report
            .details
            .iter()
            .find(|d| d.user_id == broken)
            .unwrap();
        assert!(!failure.success);
        assert!(failure.error.is_some());

        assert!(rig.cache.get(&good_a).is_some());
        assert!(rig.cache.get(&good_b).is_some());
        assert!(rig.cache.get(&broken).is_none());
    }

    #[tokio::test]
    async fn test_inactive_users_are_skipped() {
        let rig = rig();
        let active = provision(&rig).await;
        let inactive = provision(&rig).await;
        rig.repository.set_key_active(inactive, false).await.unwrap();

        let report = rig.warmer.warm_all().await.unwrap();

        assert_eq!(report.total_users, 1);
        assert!(rig.cache.get(&active).is_some());
        assert!(rig.cache.get(&inactive).is_none());
    }

    #[tokio::test]
    async fn test_spawned_warming_runs_to_completion() {
        let rig = rig();
        provision(&rig).await;

        let warmer = Arc::new(rig.warmer);
        let report = warmer.spawn().await.unwrap().unwrap();

        assert_eq!(report.successful, 1);
    }
}
