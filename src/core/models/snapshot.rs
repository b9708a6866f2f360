use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::models::fingerprint::Fingerprint;
use crate::core::models::trust_entry::TrustEntry;

/// Version written into every trust-store file and snapshot.
pub const TRUST_STORE_VERSION: u32 = 1;

/// On-disk shape of `trust/trust-store.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustStoreFile {
    pub entries: Vec<TrustEntry>,
    pub version: u32,
    pub last_updated: DateTime<Utc>,
}

/// Whole-store snapshot used by save/load, backups and JSON export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustSnapshot {
    pub entries: Vec<TrustEntry>,
    #[serde(default)]
    pub revoked_fingerprints: Vec<Fingerprint>,
    pub version: u32,
    pub saved_at: DateTime<Utc>,
}

impl TrustSnapshot {
    /// Build a snapshot, deriving the revoked set from the entries.
    pub fn from_entries(entries: Vec<TrustEntry>, saved_at: DateTime<Utc>) -> Self {
        let revoked_fingerprints = entries
            .iter()
            .filter(|e| e.revoked)
            .map(|e| e.fingerprint.clone())
            .collect();
        Self {
            entries,
            revoked_fingerprints,
            version: TRUST_STORE_VERSION,
            saved_at,
        }
    }
}
