use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use std::net::IpAddr;
use uuid::Uuid;

/// One row of `user_encryption_keys`: the wrapped per-user DEK plus rotation
/// metadata. At most one row per user; `encrypted_dek` is base64 of the KMS
/// ciphertext blob and never plaintext key material.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserEncryptionKey {
    pub user_id: Uuid,
    pub encrypted_dek: String,
    pub key_version: i32,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// What a key-lifecycle audit row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAuditOperation {
    /// First provisioning of a user's key.
    Generate,
    /// In-place replacement of an existing key.
    Rotate,
    /// A provisioning/rotation attempt that failed.
    Error,
}

impl KeyAuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAuditOperation::Generate => "generate",
            KeyAuditOperation::Rotate => "rotate",
            KeyAuditOperation::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "generate" => Some(KeyAuditOperation::Generate),
            "rotate" => Some(KeyAuditOperation::Rotate),
            "error" => Some(KeyAuditOperation::Error),
            _ => None,
        }
    }
}

/// One row of `encryption_key_audit`. Append-only: rows are never updated or
/// deleted once written.
#[derive(Debug, Clone, Serialize)]
pub struct KeyAuditEntry {
    pub id: i64,
    pub user_id: Uuid,
    pub operation: KeyAuditOperation,
    pub performed_by: Option<Uuid>,
    pub operation_timestamp: DateTime<Utc>,
    pub details: JsonValue,
    pub ip_address: Option<String>,
}

/// Insert form of an audit row; id and timestamp are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewKeyAuditEntry {
    pub user_id: Uuid,
    pub operation: KeyAuditOperation,
    pub performed_by: Option<Uuid>,
    pub details: JsonValue,
    pub ip_address: Option<IpAddr>,
}

/// Result of provisioning or rotating a user's key.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProvisionOutcome {
    pub version: i32,
    pub operation: KeyAuditOperation,
}
