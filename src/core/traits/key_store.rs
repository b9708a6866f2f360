use std::collections::BTreeMap;
use std::path::PathBuf;

use secrecy::SecretString;

use crate::core::errors::Result;
use crate::core::models::key_metadata::KeyMetadata;

/// Paths written for one key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFiles {
    pub public_key: PathBuf,
    pub private_key: PathBuf,
}

/// Port for persisting key material and the metadata map.
///
/// Every write replaces the whole target file. Implementations are
/// responsible for retrying transient file-system failures.
pub trait KeyMaterialStore: Send + Sync {
    /// Write both halves of a freshly generated key pair.
    fn write_key_pair(
        &self,
        key_id: &str,
        public_pem: &str,
        private_pem: &SecretString,
    ) -> Result<KeyFiles>;

    /// Write an imported public key (no private half).
    fn write_public_key(&self, key_id: &str, public_pem: &str) -> Result<PathBuf>;

    /// Read a public key, looking in the live and the archive location.
    fn read_public_key(&self, key_id: &str) -> Result<String>;

    /// Read a private key, looking in the live and the archive location.
    fn read_private_key(&self, key_id: &str) -> Result<SecretString>;

    /// Move a key's files from the live location to the archive.
    fn archive_key_files(&self, key_id: &str) -> Result<()>;

    /// Move a key's files back from the archive. Undoes `archive_key_files`.
    fn unarchive_key_files(&self, key_id: &str) -> Result<()>;

    /// Remove every file belonging to a key, live or archived.
    fn delete_key_files(&self, key_id: &str) -> Result<()>;

    fn load_metadata(&self) -> Result<BTreeMap<String, KeyMetadata>>;

    fn save_metadata(&self, metadata: &BTreeMap<String, KeyMetadata>) -> Result<()>;

    /// Id stored in the current-key pointer, if any.
    fn load_current(&self) -> Result<Option<String>>;

    fn save_current(&self, key_id: Option<&str>) -> Result<()>;
}
