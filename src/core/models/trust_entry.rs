use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::models::fingerprint::Fingerprint;

/// Where a trusted fingerprint came from.
pub const SOURCE_MANUAL: &str = "manual";
pub const SOURCE_IMPORTED: &str = "imported";

/// Authorization state of one fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustStatus {
    Trusted,
    Revoked,
    PermanentlyRevoked,
}

impl TrustStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustStatus::Trusted => "trusted",
            TrustStatus::Revoked => "revoked",
            TrustStatus::PermanentlyRevoked => "permanently_revoked",
        }
    }
}

/// A trust record, keyed by fingerprint in the trust store.
///
/// Exactly one of trusted / revoked / permanently revoked holds at
/// any time; `permanent_revocation` is never cleared once set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustEntry {
    pub fingerprint: Fingerprint,
    pub added_at: DateTime<Utc>,
    pub added_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    pub source: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub revoked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_reason: Option<String>,
    #[serde(default)]
    pub permanent_revocation: bool,
}

impl TrustEntry {
    /// A freshly trusted entry.
    pub fn new(fingerprint: Fingerprint, options: TrustOptions, now: DateTime<Utc>) -> Self {
        Self {
            fingerprint,
            added_at: now,
            added_by: options.added_by,
            key_id: options.key_id,
            source: options.source,
            notes: options.notes,
            metadata: options.metadata,
            expires_at: options.expires_at,
            is_active: true,
            revoked: false,
            revoked_at: None,
            revocation_reason: None,
            restored_at: None,
            restore_reason: None,
            permanent_revocation: false,
        }
    }

    pub fn status(&self) -> TrustStatus {
        if self.permanent_revocation {
            TrustStatus::PermanentlyRevoked
        } else if self.revoked {
            TrustStatus::Revoked
        } else {
            TrustStatus::Trusted
        }
    }

    /// Trusted right now: active and not revoked.
    pub fn is_trusted(&self) -> bool {
        self.is_active && !self.revoked && !self.permanent_revocation
    }

    /// Make the revocation flags agree: a permanent revocation is
    /// always a revocation. Applied to every entry read from outside.
    pub fn normalize(&mut self) {
        if self.permanent_revocation {
            self.revoked = true;
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Caller-supplied details when trusting a fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct TrustOptions {
    pub added_by: String,
    pub key_id: Option<String>,
    pub source: String,
    pub notes: String,
    pub metadata: BTreeMap<String, String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Default for TrustOptions {
    fn default() -> Self {
        Self {
            added_by: "system".to_string(),
            key_id: None,
            source: SOURCE_MANUAL.to_string(),
            notes: String::new(),
            metadata: BTreeMap::new(),
            expires_at: None,
        }
    }
}

impl TrustOptions {
    pub fn added_by(mut self, who: impl Into<String>) -> Self {
        self.added_by = who.into();
        self
    }

    pub fn key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

/// Counters over the trust store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustStats {
    pub total: usize,
    pub trusted: usize,
    pub revoked: usize,
    pub permanently_revoked: usize,
    pub expired: usize,
    pub policies: usize,
    pub active_policies: usize,
}
