//! Persistence for wrapped per-user DEKs and their audit trail.
//!
//! `KeyRepository` is the storage seam: the Postgres implementation backs
//! production, `InMemoryKeyRepository` backs tests. Plaintext key material
//! never reaches this layer; callers hand over base64 blobs already wrapped
//! by the KMS.

use async_trait::async_trait;
use serde_json::json;
use sqlx::{PgPool, Row};
use std::net::IpAddr;
use uuid::Uuid;

use crate::error::{CryptoError, Result};
use crate::models::{
    KeyAuditEntry, KeyAuditOperation, NewKeyAuditEntry, ProvisionOutcome, UserEncryptionKey,
};

#[async_trait]
pub trait KeyRepository: Send + Sync {
    /// Load a user's key row. `KeyNotFound` when no row exists, `KeyInactive`
    /// when the row is disabled.
    async fn fetch_active_key(&self, user_id: Uuid) -> Result<UserEncryptionKey>;

    /// Upsert a user's wrapped DEK and write the matching audit row in one
    /// transaction. First write for a user is version 1 (`generate`); any
    /// later write replaces the blob in place and bumps the version
    /// (`rotate`).
    async fn store_key_with_audit(
        &self,
        user_id: Uuid,
        encrypted_dek: &str,
        performed_by: Option<Uuid>,
        ip_address: Option<IpAddr>,
    ) -> Result<ProvisionOutcome>;

    /// Append a standalone audit row, e.g. an `error` entry for a failed
    /// provisioning attempt.
    async fn insert_audit(&self, entry: NewKeyAuditEntry) -> Result<()>;

    /// Enable or disable a user's key without touching the material.
    async fn set_key_active(&self, user_id: Uuid, active: bool) -> Result<()>;

    /// All currently active key rows, for cache warming.
    async fn list_active_keys(&self) -> Result<Vec<UserEncryptionKey>>;

    /// A user's audit trail, newest first.
    async fn list_audit_entries(&self, user_id: Uuid, limit: i64) -> Result<Vec<KeyAuditEntry>>;
}

pub struct PgKeyRepository {
    pool: PgPool,
}

impl PgKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the key and audit tables. Run once during application setup.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_encryption_keys (
                user_id UUID PRIMARY KEY,
                encrypted_dek TEXT NOT NULL,
                key_version INTEGER NOT NULL DEFAULT 1,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                rotated_at TIMESTAMPTZ,
                is_active BOOLEAN NOT NULL DEFAULT TRUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS encryption_key_audit (
                id BIGSERIAL PRIMARY KEY,
                user_id UUID NOT NULL,
                operation TEXT NOT NULL,
                performed_by UUID,
                operation_timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                details JSONB NOT NULL DEFAULT '{}',
                ip_address INET,
                CONSTRAINT check_operation CHECK (operation IN ('generate', 'rotate', 'error'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Create indexes separately (PostgreSQL doesn't allow multiple
        // statements in a prepared query)
        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_encryption_key_audit_user
               ON encryption_key_audit(user_id, operation_timestamp DESC)"#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("✅ Encryption key tables initialized");

        Ok(())
    }
}

#[async_trait]
impl KeyRepository for PgKeyRepository {
    async fn fetch_active_key(&self, user_id: Uuid) -> Result<UserEncryptionKey> {
        // Use query instead of query! so compilation never needs a live
        // database.
        let key = sqlx::query_as::<_, UserEncryptionKey>(
            r#"
            SELECT user_id, encrypted_dek, key_version, created_at, rotated_at, is_active
            FROM user_encryption_keys
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match key {
            None => Err(CryptoError::KeyNotFound(user_id)),
            Some(key) if !key.is_active => Err(CryptoError::KeyInactive(user_id)),
            Some(key) => Ok(key),
        }
    }

    async fn store_key_with_audit(
        &self,
        user_id: Uuid,
        encrypted_dek: &str,
        performed_by: Option<Uuid>,
        ip_address: Option<IpAddr>,
    ) -> Result<ProvisionOutcome> {
        let mut tx = self.pool.begin().await?;

        let version: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO user_encryption_keys (user_id, encrypted_dek, key_version, is_active)
            VALUES ($1, $2, 1, TRUE)
            ON CONFLICT (user_id) DO UPDATE
            SET encrypted_dek = EXCLUDED.encrypted_dek,
                key_version = user_encryption_keys.key_version + 1,
                rotated_at = NOW(),
                is_active = TRUE
            RETURNING key_version
            "#,
        )
        .bind(user_id)
        .bind(encrypted_dek)
        .fetch_one(&mut *tx)
        .await?;

        let operation = if version == 1 {
            KeyAuditOperation::Generate
        } else {
            KeyAuditOperation::Rotate
        };

        sqlx::query(
            r#"
            INSERT INTO encryption_key_audit (user_id, operation, performed_by, details, ip_address)
            VALUES ($1, $2, $3, $4, $5::inet)
            "#,
        )
        .bind(user_id)
        .bind(operation.as_str())
        .bind(performed_by)
        .bind(json!({ "key_version": version }))
        .bind(ip_address.map(|ip| ip.to_string()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ProvisionOutcome { version, operation })
    }

    async fn insert_audit(&self, entry: NewKeyAuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO encryption_key_audit (user_id, operation, performed_by, details, ip_address)
            VALUES ($1, $2, $3, $4, $5::inet)
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.operation.as_str())
        .bind(entry.performed_by)
        .bind(entry.details)
        .bind(entry.ip_address.map(|ip| ip.to_string()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_key_active(&self, user_id: Uuid, active: bool) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE user_encryption_keys SET is_active = $2 WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(active)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CryptoError::KeyNotFound(user_id));
        }

        Ok(())
    }

    async fn list_active_keys(&self) -> Result<Vec<UserEncryptionKey>> {
        let keys = sqlx::query_as::<_, UserEncryptionKey>(
            r#"
            SELECT user_id, encrypted_dek, key_version, created_at, rotated_at, is_active
            FROM user_encryption_keys
            WHERE is_active = TRUE
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    async fn list_audit_entries(&self, user_id: Uuid, limit: i64) -> Result<Vec<KeyAuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, operation, performed_by, operation_timestamp, details,
                   ip_address::text AS ip_address
            FROM encryption_key_audit
            WHERE user_id = $1
            ORDER BY operation_timestamp DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let operation_text: String = row.try_get("operation")?;
            let operation = KeyAuditOperation::parse(&operation_text).ok_or_else(|| {
                CryptoError::Database(sqlx::Error::Decode(
                    format!("unknown audit operation '{}'", operation_text).into(),
                ))
            })?;

            entries.push(KeyAuditEntry {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                operation,
                performed_by: row.try_get("performed_by")?,
                operation_timestamp: row.try_get("operation_timestamp")?,
                details: row.try_get("details")?,
                ip_address: row.try_get("ip_address")?,
            });
        }

        Ok(entries)
    }
}
