use std::path::{Path, PathBuf};

use crate::core::errors::Result;
use crate::core::models::snapshot::TrustSnapshot;
use crate::core::models::trust_entry::TrustEntry;
use crate::core::models::trust_policy::TrustPolicy;

/// Port for the trust store file, policy files and snapshots.
pub trait TrustPersistence: Send + Sync {
    fn load_entries(&self) -> Result<Vec<TrustEntry>>;

    /// Replace the trust store file with `entries`.
    fn save_entries(&self, entries: &[TrustEntry]) -> Result<()>;

    fn load_policies(&self) -> Result<Vec<TrustPolicy>>;

    /// Write one policy to its own file.
    fn save_policy(&self, policy: &TrustPolicy) -> Result<()>;

    fn delete_policy(&self, policy_id: &str) -> Result<()>;

    fn write_snapshot(&self, path: &Path, snapshot: &TrustSnapshot) -> Result<()>;

    fn read_snapshot(&self, path: &Path) -> Result<TrustSnapshot>;

    /// Where a backup taken at `now` should be written.
    fn backup_path(&self, now: chrono::DateTime<chrono::Utc>) -> PathBuf;
}
