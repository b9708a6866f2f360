use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::adapters::fs_util::{self, DEFAULT_ATTEMPTS};
use crate::core::errors::{KeyTrustError, Result};
use crate::core::models::snapshot::{TRUST_STORE_VERSION, TrustSnapshot, TrustStoreFile};
use crate::core::models::trust_entry::TrustEntry;
use crate::core::models::trust_policy::TrustPolicy;
use crate::core::traits::trust_store::TrustPersistence;

const STORE_FILE: &str = "trust-store.json";

/// JSON-file trust persistence.
///
/// ```text
/// trust/trust-store.json
/// trust/policies/<policyId>.json
/// backups/trust-backup-<YYYYMMDDTHHMMSSZ>.json
/// ```
pub struct JsonTrustStore {
    trust_dir: PathBuf,
    policies_dir: PathBuf,
    backups_dir: PathBuf,
    attempts: u32,
}

impl JsonTrustStore {
    pub fn new(data_dir: &Path) -> Self {
        let trust_dir = data_dir.join("trust");
        Self {
            policies_dir: trust_dir.join("policies"),
            trust_dir,
            backups_dir: data_dir.join("backups"),
            attempts: DEFAULT_ATTEMPTS,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn store_path(&self) -> PathBuf {
        self.trust_dir.join(STORE_FILE)
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    fn policy_path(&self, policy_id: &str) -> PathBuf {
        self.policies_dir.join(format!("{policy_id}.json"))
    }

    fn write_json(&self, operation: &'static str, path: &Path, json: &str) -> Result<()> {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.trust_dir.clone());
        fs_util::with_retry(
            operation,
            &path.display().to_string(),
            &dir,
            self.attempts,
            || fs_util::write_atomic(path, json.as_bytes()),
        )
    }
}

impl TrustPersistence for JsonTrustStore {
    fn load_entries(&self) -> Result<Vec<TrustEntry>> {
        let path = self.store_path();
        let content = fs_util::read_optional(&path).map_err(|source| KeyTrustError::Storage {
            operation: "read trust store",
            target: path.display().to_string(),
            source,
        })?;

        let Some(text) = content.filter(|t| !t.trim().is_empty()) else {
            return Ok(Vec::new());
        };

        let file: TrustStoreFile =
            serde_json::from_str(&text).map_err(|e| KeyTrustError::format("trust store", e))?;
        if file.version > TRUST_STORE_VERSION {
            return Err(KeyTrustError::FormatVersionTooNew {
                found: file.version,
                supported: TRUST_STORE_VERSION,
            });
        }
        Ok(file.entries)
    }

    fn save_entries(&self, entries: &[TrustEntry]) -> Result<()> {
        let file = TrustStoreFile {
            entries: entries.to_vec(),
            version: TRUST_STORE_VERSION,
            last_updated: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| KeyTrustError::format("trust store", e))?;
        self.write_json("write trust store", &self.store_path(), &json)
    }

    fn load_policies(&self) -> Result<Vec<TrustPolicy>> {
        if !self.policies_dir.exists() {
            return Ok(Vec::new());
        }

        let read_dir = fs::read_dir(&self.policies_dir).map_err(|source| KeyTrustError::Storage {
            operation: "list policies",
            target: self.policies_dir.display().to_string(),
            source,
        })?;

        let mut policies = Vec::new();
        for dir_entry in read_dir {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = fs::read_to_string(&path).map_err(|source| KeyTrustError::Storage {
                operation: "read policy",
                target: path.display().to_string(),
                source,
            })?;
            let policy: TrustPolicy = serde_json::from_str(&text).map_err(|e| {
                KeyTrustError::format("policy file", format!("{}: {e}", path.display()))
            })?;
            policies.push(policy);
        }

        policies.sort_by(|a, b| a.policy_id.cmp(&b.policy_id));
        Ok(policies)
    }

    fn save_policy(&self, policy: &TrustPolicy) -> Result<()> {
        let json = serde_json::to_string_pretty(policy)
            .map_err(|e| KeyTrustError::format("policy", e))?;
        self.write_json("write policy", &self.policy_path(&policy.policy_id), &json)
    }

    fn delete_policy(&self, policy_id: &str) -> Result<()> {
        let path = self.policy_path(policy_id);
        fs_util::remove_if_exists(&path).map_err(|source| KeyTrustError::Storage {
            operation: "delete policy",
            target: path.display().to_string(),
            source,
        })
    }

    fn write_snapshot(&self, path: &Path, snapshot: &TrustSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| KeyTrustError::format("trust snapshot", e))?;
        self.write_json("write trust snapshot", path, &json)
    }

    fn read_snapshot(&self, path: &Path) -> Result<TrustSnapshot> {
        let text = fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                KeyTrustError::InvalidArgument {
                    detail: format!("snapshot file {} does not exist", path.display()),
                }
            } else {
                KeyTrustError::Storage {
                    operation: "read trust snapshot",
                    target: path.display().to_string(),
                    source,
                }
            }
        })?;

        let snapshot: TrustSnapshot = serde_json::from_str(&text)
            .map_err(|e| KeyTrustError::format("trust snapshot", e))?;
        if snapshot.version > TRUST_STORE_VERSION {
            return Err(KeyTrustError::FormatVersionTooNew {
                found: snapshot.version,
                supported: TRUST_STORE_VERSION,
            });
        }
        Ok(snapshot)
    }

    fn backup_path(&self, now: DateTime<Utc>) -> PathBuf {
        self.backups_dir
            .join(format!("trust-backup-{}.json", now.format("%Y%m%dT%H%M%SZ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::fingerprint::Fingerprint;
    use crate::core::models::trust_entry::TrustOptions;
    use crate::core::models::trust_policy::{PolicyRule, RuleMatcher};
    use chrono::TimeZone;

    fn temp_store() -> (tempfile::TempDir, JsonTrustStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTrustStore::new(dir.path());
        (dir, store)
    }

    fn entry(hex: &str) -> TrustEntry {
        TrustEntry::new(
            Fingerprint::parse(&hex.repeat(32)).unwrap(),
            TrustOptions::default(),
            Utc::now(),
        )
    }

    #[test]
    fn missing_store_loads_empty() {
        let (_dir, store) = temp_store();
        assert!(store.load_entries().unwrap().is_empty());
        assert!(store.load_policies().unwrap().is_empty());
    }

    #[test]
    fn entries_round_trip_through_file() {
        let (_dir, store) = temp_store();
        let entries = vec![entry("aa"), entry("bb")];

        store.save_entries(&entries).unwrap();

        assert_eq!(store.load_entries().unwrap(), entries);
        let raw = fs::read_to_string(store.store_path()).unwrap();
        assert!(raw.contains("\"lastUpdated\""));
        assert!(raw.contains("\"version\": 1"));
    }

    #[test]
    fn newer_store_version_is_rejected() {
        let (_dir, store) = temp_store();
        fs::create_dir_all(store.store_path().parent().unwrap()).unwrap();
        fs::write(
            store.store_path(),
            r#"{"entries": [], "version": 99, "lastUpdated": "2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let err = store.load_entries().unwrap_err();
        assert!(matches!(err, KeyTrustError::FormatVersionTooNew { found: 99, .. }));
    }

    #[test]
    fn policies_are_one_file_each() {
        let (_dir, store) = temp_store();
        let policy = TrustPolicy::new("deny-sign", "Deny signing", 2)
            .with_rule(PolicyRule::deny(RuleMatcher::Operation("sign".into())));

        store.save_policy(&policy).unwrap();
        assert!(store.policy_path("deny-sign").exists());
        assert_eq!(store.load_policies().unwrap(), vec![policy]);

        store.delete_policy("deny-sign").unwrap();
        assert!(store.load_policies().unwrap().is_empty());
    }

    #[test]
    fn backup_path_is_timestamped() {
        let (_dir, store) = temp_store();
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let path = store.backup_path(at);
        assert!(path.ends_with("backups/trust-backup-20260304T050607Z.json"));
    }

    #[test]
    fn snapshot_write_creates_backup_directory() {
        let (_dir, store) = temp_store();
        let snapshot = TrustSnapshot::from_entries(vec![entry("cc")], Utc::now());
        let path = store.backup_path(Utc::now());

        store.write_snapshot(&path, &snapshot).unwrap();

        assert_eq!(store.read_snapshot(&path).unwrap(), snapshot);
    }

    #[test]
    fn reading_missing_snapshot_is_invalid_argument() {
        let (dir, store) = temp_store();
        let err = store.read_snapshot(&dir.path().join("nope.json")).unwrap_err();
        assert_eq!(err.kind(), crate::core::errors::ErrorKind::InvalidArgument);
    }
}
