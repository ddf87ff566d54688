//! Per-user PHI field encryption for the CaseVault case-management backend.
//!
//! Every user's case records carry a handful of protected-health-information
//! columns (patient names, insurance provider). Those values are encrypted
//! with AES-256-GCM under a per-user data encryption key (DEK); each DEK is
//! wrapped by a KMS master key and stored wrapped in Postgres, so a database
//! dump alone never yields plaintext PHI. Unwrapped DEKs live in a bounded
//! in-process cache to keep KMS traffic off the request path.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//! use casevault_phi::config::EncryptionConfig;
//! use casevault_phi::kms::LocalKms;
//! use casevault_phi::repositories::PgKeyRepository;
//! use casevault_phi::services::{DekCache, EnvelopeKeyManager, PhiFieldService};
//!
//! # async fn wire(pool: sqlx::PgPool) -> anyhow::Result<()> {
//! let config = EncryptionConfig::from_env()?;
//! let master_key = config
//!     .local_master_key
//!     .clone()
//!     .ok_or_else(|| anyhow::anyhow!("PHI_MASTER_KEY is not set"))?;
//!
//! let kms = Arc::new(LocalKms::new(&master_key)?);
//! let envelope = Arc::new(EnvelopeKeyManager::new(
//!     kms,
//!     &config.master_key_id,
//!     config.kms_timeout(),
//! ));
//! let repository = Arc::new(PgKeyRepository::new(pool));
//! repository.initialize().await?;
//!
//! let cache = DekCache::new(config.dek_cache_capacity);
//! let phi = PhiFieldService::new(repository, envelope, cache, config.dek_ttl());
//! # let _ = phi;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod kms;
pub mod models;
pub mod repositories;
pub mod services;

pub use error::{CryptoError, Result};
pub use kms::{DataKey, KmsClient};
pub use models::{KeyAuditEntry, KeyAuditOperation, ProvisionOutcome, UserEncryptionKey};
pub use services::{
    CacheWarmer, DekCache, EnvelopeKeyManager, FieldCipher, KeyLifecycleService, PhiFieldService,
    MIN_ENCRYPTED_FIELD_LEN, PHI_FIELDS,
};
