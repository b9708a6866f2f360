use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use keytrust::adapters::audit::json_audit_logger::JsonAuditLogger;
use keytrust::adapters::hardening::permission_hardener::PermissionHardener;
use keytrust::adapters::key_stores::file_key_store::FileKeyStore;
use keytrust::adapters::keygen::pkcs8_generator::Pkcs8KeyGenerator;
use keytrust::adapters::passphrase::strength_validator::StrengthValidator;
use keytrust::adapters::trust_stores::json_trust_store::JsonTrustStore;
use keytrust::config::app_config::{AppConfig, CONFIG_FILE};
use keytrust::core::errors::{KeyTrustError, Result};
use keytrust::core::services::key_manager::{KeyCollaborators, KeyManager};
use keytrust::core::services::trust_manager::TrustManager;
use keytrust::core::traits::audit::AuditLogger;

const LOCAL_DIR: &str = ".keytrust";

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Initialize the global data directory path.
///
/// `--dir` (or `KEYTRUST_DIR`) wins; `--global` picks the per-user data
/// directory; otherwise `./.keytrust`.
pub fn init(custom: Option<&Path>, global: bool) {
    let dir = match (custom, global) {
        (Some(path), _) => path.to_path_buf(),
        (None, true) => dirs::data_local_dir()
            .map(|d| d.join("keytrust"))
            .unwrap_or_else(|| PathBuf::from(LOCAL_DIR)),
        (None, false) => PathBuf::from(LOCAL_DIR),
    };
    let _ = DATA_DIR.set(dir);
}

/// Get the current data directory path.
pub fn data_dir() -> &'static Path {
    DATA_DIR
        .get()
        .map(|p| p.as_path())
        .unwrap_or(Path::new(LOCAL_DIR))
}

/// Managers wired to the data directory, as every command but `init` needs them.
pub struct Workspace {
    pub dir: &'static Path,
    pub config: AppConfig,
    pub trust: Arc<TrustManager<JsonTrustStore>>,
    audit: Option<Arc<dyn AuditLogger>>,
}

impl Workspace {
    /// Load the config and open the trust manager. Fails when the data
    /// directory was never initialized.
    pub fn open() -> Result<Self> {
        let dir = data_dir();
        if !dir.join(CONFIG_FILE).exists() {
            return Err(KeyTrustError::InvalidConfig {
                detail: format!(
                    "keytrust is not initialized in {}. Run 'keytrust init' first.",
                    dir.display()
                ),
            });
        }

        let config = AppConfig::load(dir)?;
        let audit = audit_logger(dir, &config);
        let store = JsonTrustStore::new(dir).with_attempts(config.keys.storage_retries);
        let trust = Arc::new(TrustManager::open(store, audit.clone())?);

        Ok(Self {
            dir,
            config,
            trust,
            audit,
        })
    }

    /// Open the key manager, wired to the trust manager for `keys import --trust`.
    pub fn key_manager(&self) -> Result<KeyManager<FileKeyStore>> {
        let store = FileKeyStore::new(self.dir).with_attempts(self.config.keys.storage_retries);
        let mut collaborators = KeyCollaborators::new(
            Arc::new(Pkcs8KeyGenerator::default()),
            Box::new(PermissionHardener),
            Box::new(StrengthValidator),
        )
        .with_trust(self.trust.clone());
        if let Some(audit) = &self.audit {
            collaborators = collaborators.with_audit(audit.clone());
        }
        KeyManager::open(store, self.config.key_manager_config(), collaborators)
    }

    pub fn audit(&self) -> Option<&Arc<dyn AuditLogger>> {
        self.audit.as_ref()
    }
}

/// The configured audit logger, or `None` when auditing is off.
pub fn audit_logger(dir: &Path, config: &AppConfig) -> Option<Arc<dyn AuditLogger>> {
    let section = config.audit.as_ref();
    if !JsonAuditLogger::is_enabled(section) {
        return None;
    }
    Some(Arc::new(JsonAuditLogger::from_config(dir, section)))
}
