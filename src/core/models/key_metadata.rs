use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::models::fingerprint::Fingerprint;

/// Asymmetric algorithm family of a key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
    Ed25519,
}

impl KeyAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa => "rsa",
            KeyAlgorithm::Ec => "ec",
            KeyAlgorithm::Ed25519 => "ed25519",
        }
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle record of one key pair, persisted in `keys/metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMetadata {
    pub key_id: String,
    pub fingerprint: Fingerprint,
    pub algorithm: KeyAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    pub passphrase_protected: bool,
    pub is_imported: bool,
    pub usage_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl KeyMetadata {
    /// When the key entered the store, by generation or import.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.generated_at.or(self.imported_at)
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Flip to the archived state. Archiving twice keeps the first stamp.
    pub fn archive(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        if self.archived_at.is_none() {
            self.archived_at = Some(now);
        }
    }
}

/// A metadata row as returned by `KeyManager::list_keys`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyListing {
    #[serde(flatten)]
    pub metadata: KeyMetadata,
    pub is_current: bool,
}

/// Aggregate counters over all known keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStats {
    pub total: usize,
    pub active: usize,
    pub archived: usize,
    pub imported: usize,
    pub passphrase_protected: usize,
    pub by_algorithm: std::collections::BTreeMap<KeyAlgorithm, usize>,
    pub current_key_id: Option<String>,
    pub cache: crate::core::services::key_cache::CacheStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> KeyMetadata {
        KeyMetadata {
            key_id: "k1".into(),
            fingerprint: Fingerprint::parse(&"0a".repeat(32)).unwrap(),
            algorithm: KeyAlgorithm::Ed25519,
            key_size: None,
            curve: None,
            generated_at: Some(Utc::now()),
            imported_at: None,
            is_active: true,
            archived_at: None,
            passphrase_protected: false,
            is_imported: false,
            usage_count: 0,
            last_used: None,
        }
    }

    #[test]
    fn serializes_camel_case_and_skips_absent_fields() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains("\"keyId\":\"k1\""));
        assert!(json.contains("\"isActive\":true"));
        assert!(json.contains("\"algorithm\":\"ed25519\""));
        assert!(!json.contains("archivedAt"));
    }

    #[test]
    fn archive_keeps_first_timestamp() {
        let mut meta = sample();
        let first = Utc::now();
        meta.archive(first);
        meta.archive(first + chrono::Duration::seconds(10));
        assert!(!meta.is_active);
        assert_eq!(meta.archived_at, Some(first));
    }

    #[test]
    fn created_at_falls_back_to_import_time() {
        let mut meta = sample();
        let imported = Utc::now();
        meta.generated_at = None;
        meta.imported_at = Some(imported);
        assert_eq!(meta.created_at(), Some(imported));
    }
}
