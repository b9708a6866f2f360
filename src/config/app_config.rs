use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::adapters::keygen::pkcs8_generator::RSA_SIZES;
use crate::core::errors::{KeyTrustError, Result};
use crate::core::models::key_metadata::KeyAlgorithm;
use crate::core::services::key_manager::KeyManagerConfig;
use crate::core::traits::key_generator::KeySpec;

/// Name of the configuration file inside the data directory.
pub const CONFIG_FILE: &str = "keytrust.toml";

/// Current format version supported by this build of keytrust.
pub const CURRENT_FORMAT_VERSION: u32 = 1;

/// Top-level configuration read from `<data dir>/keytrust.toml`.
///
/// Every section is optional; missing values take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub keytrust: KeyTrustSection,
    pub keys: KeysSection,
    pub cache: CacheSection,
    pub trust: TrustSection,
    pub audit: Option<AuditSection>,
}

impl AppConfig {
    /// Load the configuration from `keytrust.toml`, or defaults when the
    /// file does not exist.
    ///
    /// After parsing, validates value ranges and the audit log filename
    /// so a tampered config cannot point writes outside the data directory.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&config_path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| KeyTrustError::InvalidConfig {
            detail: format!("Failed to parse {CONFIG_FILE}: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.keytrust.format_version > CURRENT_FORMAT_VERSION {
            return Err(KeyTrustError::FormatVersionTooNew {
                found: self.keytrust.format_version,
                supported: CURRENT_FORMAT_VERSION,
            });
        }

        if !RSA_SIZES.contains(&self.keys.rsa_bits) {
            return Err(KeyTrustError::InvalidConfig {
                detail: format!(
                    "[keys] rsa_bits = {} is not one of {:?}",
                    self.keys.rsa_bits, RSA_SIZES
                ),
            });
        }
        if !(1..=5).contains(&self.keys.storage_retries) {
            return Err(KeyTrustError::InvalidConfig {
                detail: format!(
                    "[keys] storage_retries = {} must be between 1 and 5",
                    self.keys.storage_retries
                ),
            });
        }
        if self.keys.generation_timeout_secs == 0 {
            return Err(KeyTrustError::InvalidConfig {
                detail: "[keys] generation_timeout_secs must be greater than 0".into(),
            });
        }
        if self.cache.max_size < 1 {
            return Err(KeyTrustError::InvalidConfig {
                detail: "[cache] max_size must be at least 1".into(),
            });
        }

        if let Some(audit) = &self.audit {
            validate_simple_filename(&audit.log_file, "audit log file")?;
        }

        Ok(())
    }

    /// Key manager tunables from the `[keys]` and `[cache]` sections.
    pub fn key_manager_config(&self) -> KeyManagerConfig {
        KeyManagerConfig {
            key_spec: self.keys.key_spec(),
            enforce_strong_passphrase: self.keys.enforce_strong_passphrase,
            generation_timeout: self.keys.generation_timeout(),
            cache_max_size: self.cache.max_size,
            cache_ttl: self.cache.default_ttl(),
        }
    }

    /// Serialize for `keytrust init`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| KeyTrustError::InvalidConfig {
            detail: format!("Failed to serialize {CONFIG_FILE}: {e}"),
        })
    }
}

/// The `[keytrust]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyTrustSection {
    /// Format version for backward compatibility.
    pub format_version: u32,
}

impl Default for KeyTrustSection {
    fn default() -> Self {
        Self {
            format_version: CURRENT_FORMAT_VERSION,
        }
    }
}

/// The `[keys]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysSection {
    pub algorithm: KeyAlgorithm,
    pub rsa_bits: u32,
    pub curve: String,
    pub enforce_strong_passphrase: bool,
    pub generation_timeout_secs: u64,
    pub storage_retries: u32,
}

impl Default for KeysSection {
    fn default() -> Self {
        Self {
            algorithm: KeyAlgorithm::Ed25519,
            rsa_bits: 2048,
            curve: "P-256".to_string(),
            enforce_strong_passphrase: true,
            generation_timeout_secs: 120,
            storage_retries: 3,
        }
    }
}

impl KeysSection {
    /// The key pair shape new keys are generated with.
    pub fn key_spec(&self) -> KeySpec {
        match self.algorithm {
            KeyAlgorithm::Rsa => KeySpec::Rsa {
                bits: self.rsa_bits,
            },
            KeyAlgorithm::Ec => KeySpec::Ec {
                curve: self.curve.clone(),
            },
            KeyAlgorithm::Ed25519 => KeySpec::Ed25519,
        }
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

/// The `[cache]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_size: usize,
    pub default_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_size: 100,
            default_ttl_secs: 3600,
        }
    }
}

impl CacheSection {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// The `[trust]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustSection {
    /// Take a backup before `trust import` and `trust restore-backup`.
    pub auto_backup: bool,
}

/// The `[audit]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSection {
    pub enabled: bool,
    pub log_file: String,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            enabled: true,
            log_file: "audit.log".to_string(),
        }
    }
}

/// Validate that a configured file name is a plain name inside the data
/// directory: no separators, no `..`, no leading dot.
pub fn validate_simple_filename(name: &str, what: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.contains('\0');
    if bad {
        return Err(KeyTrustError::InvalidConfig {
            detail: format!("Invalid {what} '{name}': must be a plain file name"),
        });
    }
    Ok(())
}
