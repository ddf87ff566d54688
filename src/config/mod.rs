use std::env;
use std::time::Duration;

use anyhow::Result;

/// Default TTL for cached plaintext DEKs: 24 hours.
pub const DEFAULT_DEK_TTL_SECS: u64 = 86_400;

/// Default upper bound on cached DEK entries; sized for the expected active
/// user count of a single deployment.
pub const DEFAULT_DEK_CACHE_CAPACITY: usize = 10_000;

/// Default timeout applied around each KMS call.
pub const DEFAULT_KMS_TIMEOUT_SECS: u64 = 10;

/// Settings for the PHI encryption engine. The host application owns the
/// database pool and passes it in separately.
#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    /// Master key identifier handed to KMS `GenerateDataKey`.
    pub master_key_id: String,
    /// Base64 256-bit master key for the `LocalKms` provider. Unused when the
    /// engine is wired to an external KMS.
    pub local_master_key: Option<String>,
    pub dek_cache_ttl_secs: u64,
    pub dek_cache_capacity: usize,
    pub kms_timeout_secs: u64,
    /// Whether the host should run the cache warmer before serving traffic.
    pub warm_cache_on_startup: bool,
}

impl EncryptionConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            master_key_id: env::var("PHI_MASTER_KEY_ID")
                .unwrap_or_else(|_| "alias/casevault-phi".to_string()),
            local_master_key: env::var("PHI_MASTER_KEY").ok(),
            dek_cache_ttl_secs: env::var("PHI_DEK_CACHE_TTL_SECS")
                .unwrap_or_else(|_| DEFAULT_DEK_TTL_SECS.to_string())
                .parse()?,
            dek_cache_capacity: env::var("PHI_DEK_CACHE_CAPACITY")
                .unwrap_or_else(|_| DEFAULT_DEK_CACHE_CAPACITY.to_string())
                .parse()?,
            kms_timeout_secs: env::var("PHI_KMS_TIMEOUT_SECS")
                .unwrap_or_else(|_| DEFAULT_KMS_TIMEOUT_SECS.to_string())
                .parse()?,
            warm_cache_on_startup: env::var("PHI_WARM_CACHE_ON_STARTUP")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(true),
        })
    }

    pub fn dek_ttl(&self) -> Duration {
        Duration::from_secs(self.dek_cache_ttl_secs)
    }

    pub fn kms_timeout(&self) -> Duration {
        Duration::from_secs(self.kms_timeout_secs)
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            master_key_id: "alias/casevault-phi".to_string(),
            local_master_key: None,
            dek_cache_ttl_secs: DEFAULT_DEK_TTL_SECS,
            dek_cache_capacity: DEFAULT_DEK_CACHE_CAPACITY,
            kms_timeout_secs: DEFAULT_KMS_TIMEOUT_SECS,
            warm_cache_on_startup: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let config = EncryptionConfig::default();
        assert_eq!(config.dek_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.dek_cache_capacity, 10_000);
        assert!(config.warm_cache_on_startup);
    }
}
