use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};

use crate::adapters::fs_util::{self, DEFAULT_ATTEMPTS};
use crate::core::errors::{KeyTrustError, Result};
use crate::core::models::key_metadata::KeyMetadata;
use crate::core::traits::key_store::{KeyFiles, KeyMaterialStore};

const METADATA_FILE: &str = "metadata.json";
const CURRENT_FILE: &str = "current";

/// File-based key store.
///
/// Layout under the data directory:
/// ```text
/// keys/<keyId>.pub.pem
/// keys/<keyId>.key.pem
/// keys/metadata.json
/// keys/current
/// archive/<keyId>.pub.pem
/// archive/<keyId>.key.pem
/// ```
#[derive(Clone)]
pub struct FileKeyStore {
    keys_dir: PathBuf,
    archive_dir: PathBuf,
    attempts: u32,
}

impl FileKeyStore {
    /// Create a key store rooted at `data_dir`.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            keys_dir: data_dir.join("keys"),
            archive_dir: data_dir.join("archive"),
            attempts: DEFAULT_ATTEMPTS,
        }
    }

    /// Override how many times a failed write is attempted.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn keys_dir(&self) -> &Path {
        &self.keys_dir
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    fn public_path(dir: &Path, key_id: &str) -> PathBuf {
        dir.join(format!("{key_id}.pub.pem"))
    }

    fn private_path(dir: &Path, key_id: &str) -> PathBuf {
        dir.join(format!("{key_id}.key.pem"))
    }

    /// First existing path among the live and archive locations.
    fn locate(&self, key_id: &str, path_for: fn(&Path, &str) -> PathBuf) -> Option<PathBuf> {
        [&self.keys_dir, &self.archive_dir]
            .into_iter()
            .map(|dir| path_for(dir, key_id))
            .find(|p| p.exists())
    }

    fn write_file(&self, operation: &'static str, path: &Path, contents: &[u8]) -> Result<()> {
        let dir = path.parent().unwrap_or(&self.keys_dir).to_path_buf();
        fs_util::with_retry(
            operation,
            &path.display().to_string(),
            &dir,
            self.attempts,
            || fs_util::write_atomic(path, contents),
        )
    }

    fn move_file(&self, operation: &'static str, from: &Path, to: &Path) -> Result<()> {
        if !from.exists() {
            return Ok(());
        }
        let dir = to.parent().unwrap_or(&self.archive_dir).to_path_buf();
        fs_util::with_retry(
            operation,
            &from.display().to_string(),
            &dir,
            self.attempts,
            || fs::rename(from, to),
        )
    }

    /// Move both halves of a key from `from_dir` to `to_dir`. When the
    /// second move fails the first one is undone.
    fn move_pair(&self, operation: &'static str, key_id: &str, from_dir: &Path, to_dir: &Path) -> Result<()> {
        fs_util::with_retry(
            "create key directory",
            &to_dir.display().to_string(),
            to_dir,
            self.attempts,
            || fs::create_dir_all(to_dir),
        )?;

        let public_from = Self::public_path(from_dir, key_id);
        let public_to = Self::public_path(to_dir, key_id);
        self.move_file(operation, &public_from, &public_to)?;
        if let Err(e) = self.move_file(
            operation,
            &Self::private_path(from_dir, key_id),
            &Self::private_path(to_dir, key_id),
        ) {
            if public_to.exists() && !public_from.exists() {
                let _ = fs::rename(&public_to, &public_from);
            }
            return Err(e);
        }
        Ok(())
    }
}

impl KeyMaterialStore for FileKeyStore {
    fn write_key_pair(
        &self,
        key_id: &str,
        public_pem: &str,
        private_pem: &SecretString,
    ) -> Result<KeyFiles> {
        let public_key = Self::public_path(&self.keys_dir, key_id);
        let private_key = Self::private_path(&self.keys_dir, key_id);

        self.write_file(
            "write private key",
            &private_key,
            private_pem.expose_secret().as_bytes(),
        )?;
        if let Err(e) = self.write_file("write public key", &public_key, public_pem.as_bytes()) {
            // Leave no half-written pair behind
            let _ = fs_util::remove_if_exists(&private_key);
            return Err(e);
        }

        Ok(KeyFiles {
            public_key,
            private_key,
        })
    }

    fn write_public_key(&self, key_id: &str, public_pem: &str) -> Result<PathBuf> {
        let path = Self::public_path(&self.keys_dir, key_id);
        self.write_file("write public key", &path, public_pem.as_bytes())?;
        Ok(path)
    }

    fn read_public_key(&self, key_id: &str) -> Result<String> {
        let path = self
            .locate(key_id, Self::public_path)
            .ok_or_else(|| KeyTrustError::KeyNotFound {
                key_id: key_id.to_string(),
            })?;
        fs::read_to_string(&path).map_err(|source| KeyTrustError::Storage {
            operation: "read public key",
            target: path.display().to_string(),
            source,
        })
    }

    fn read_private_key(&self, key_id: &str) -> Result<SecretString> {
        let path = self
            .locate(key_id, Self::private_path)
            .ok_or_else(|| KeyTrustError::KeyNotFound {
                key_id: key_id.to_string(),
            })?;
        let content = fs::read_to_string(&path).map_err(|source| KeyTrustError::Storage {
            operation: "read private key",
            target: path.display().to_string(),
            source,
        })?;
        Ok(SecretString::from(content))
    }

    fn archive_key_files(&self, key_id: &str) -> Result<()> {
        self.move_pair("archive key file", key_id, &self.keys_dir, &self.archive_dir)
    }

    fn unarchive_key_files(&self, key_id: &str) -> Result<()> {
        self.move_pair("unarchive key file", key_id, &self.archive_dir, &self.keys_dir)
    }

    fn delete_key_files(&self, key_id: &str) -> Result<()> {
        for dir in [&self.keys_dir, &self.archive_dir] {
            for path in [Self::public_path(dir, key_id), Self::private_path(dir, key_id)] {
                fs_util::remove_if_exists(&path).map_err(|source| KeyTrustError::Storage {
                    operation: "delete key file",
                    target: path.display().to_string(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    fn load_metadata(&self) -> Result<BTreeMap<String, KeyMetadata>> {
        let path = self.keys_dir.join(METADATA_FILE);
        let content = fs_util::read_optional(&path).map_err(|source| KeyTrustError::Storage {
            operation: "read key metadata",
            target: path.display().to_string(),
            source,
        })?;

        match content {
            None => Ok(BTreeMap::new()),
            Some(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Some(text) => {
                serde_json::from_str(&text).map_err(|e| KeyTrustError::format("key metadata", e))
            }
        }
    }

    fn save_metadata(&self, metadata: &BTreeMap<String, KeyMetadata>) -> Result<()> {
        let json = serde_json::to_string_pretty(metadata)
            .map_err(|e| KeyTrustError::format("key metadata", e))?;
        self.write_file(
            "write key metadata",
            &self.keys_dir.join(METADATA_FILE),
            json.as_bytes(),
        )
    }

    fn load_current(&self) -> Result<Option<String>> {
        let path = self.keys_dir.join(CURRENT_FILE);
        let content = fs_util::read_optional(&path).map_err(|source| KeyTrustError::Storage {
            operation: "read current key pointer",
            target: path.display().to_string(),
            source,
        })?;
        Ok(content
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    fn save_current(&self, key_id: Option<&str>) -> Result<()> {
        let path = self.keys_dir.join(CURRENT_FILE);
        match key_id {
            Some(id) => self.write_file("write current key pointer", &path, format!("{id}\n").as_bytes()),
            None => fs_util::remove_if_exists(&path).map_err(|source| KeyTrustError::Storage {
                operation: "clear current key pointer",
                target: path.display().to_string(),
                source,
            }),
        }
    }
}
