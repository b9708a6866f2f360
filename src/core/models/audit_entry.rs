use serde::{Deserialize, Serialize};

/// Actions that get recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Init,
    KeyGenerate,
    KeyImport,
    KeyRotate,
    KeyArchive,
    KeyDelete,
    TrustAdd,
    TrustRevoke,
    TrustRestore,
    TrustPermanentRevoke,
    TrustExpire,
    TrustImport,
    TrustRestoreBackup,
    PolicyCreate,
    PolicyUpdate,
    PolicyRemove,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Init => "init",
            AuditAction::KeyGenerate => "key_generate",
            AuditAction::KeyImport => "key_import",
            AuditAction::KeyRotate => "key_rotate",
            AuditAction::KeyArchive => "key_archive",
            AuditAction::KeyDelete => "key_delete",
            AuditAction::TrustAdd => "trust_add",
            AuditAction::TrustRevoke => "trust_revoke",
            AuditAction::TrustRestore => "trust_restore",
            AuditAction::TrustPermanentRevoke => "trust_permanent_revoke",
            AuditAction::TrustExpire => "trust_expire",
            AuditAction::TrustImport => "trust_import",
            AuditAction::TrustRestoreBackup => "trust_restore_backup",
            AuditAction::PolicyCreate => "policy_create",
            AuditAction::PolicyUpdate => "policy_update",
            AuditAction::PolicyRemove => "policy_remove",
        }
    }
}

/// A single entry in the audit log (JSON lines format).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub actor: String,
    pub action: AuditAction,
    /// Key id, fingerprint or policy id the action applied to.
    pub target: String,
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn now(action: AuditAction, target: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            actor: current_actor(),
            action,
            target: target.into(),
            detail,
        }
    }
}

/// Best-effort name of the local user for audit records.
pub fn current_actor() -> String {
    std::env::var("KEYTRUST_ACTOR")
        .or_else(|_| std::env::var("USER"))
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
