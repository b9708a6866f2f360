use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use rand_core::{OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};

use crate::core::errors::{ErrorKind, KeyTrustError, Result};
use crate::core::models::audit_entry::{AuditAction, AuditEntry};
use crate::core::models::fingerprint::PublicKeyInfo;
use crate::core::models::key_metadata::{KeyListing, KeyMetadata, KeyStats};
use crate::core::services::key_cache::{CachedValue, KeyCache};
use crate::core::traits::audit::AuditLogger;
use crate::core::traits::hardening::FileHardener;
use crate::core::traits::key_generator::{GeneratedKeyPair, KeyGenerator, KeySpec};
use crate::core::traits::key_store::KeyMaterialStore;
use crate::core::traits::passphrase::PassphraseValidator;
use crate::core::traits::trust_registrar::TrustRegistrar;

const MAX_KEY_ID_LEN: usize = 64;

/// Tunables for a [`KeyManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyManagerConfig {
    pub key_spec: KeySpec,
    pub enforce_strong_passphrase: bool,
    pub generation_timeout: Duration,
    pub cache_max_size: usize,
    pub cache_ttl: Duration,
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self {
            key_spec: KeySpec::Ed25519,
            enforce_strong_passphrase: true,
            generation_timeout: Duration::from_secs(120),
            cache_max_size: 100,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Everything the key manager talks to besides its own store.
pub struct KeyCollaborators {
    pub generator: Arc<dyn KeyGenerator>,
    pub hardener: Box<dyn FileHardener>,
    pub passphrase_validator: Box<dyn PassphraseValidator>,
    pub trust: Option<Arc<dyn TrustRegistrar>>,
    pub audit: Option<Arc<dyn AuditLogger>>,
}

impl KeyCollaborators {
    pub fn new(
        generator: Arc<dyn KeyGenerator>,
        hardener: Box<dyn FileHardener>,
        passphrase_validator: Box<dyn PassphraseValidator>,
    ) -> Self {
        Self {
            generator,
            hardener,
            passphrase_validator,
            trust: None,
            audit: None,
        }
    }

    pub fn with_trust(mut self, trust: Arc<dyn TrustRegistrar>) -> Self {
        self.trust = Some(trust);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }
}

/// Outcome of [`KeyManager::rotate_key`].
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRotation {
    pub archived: KeyMetadata,
    pub current: KeyMetadata,
}

struct KeyState {
    metadata: BTreeMap<String, KeyMetadata>,
    current: Option<String>,
    /// Ids reserved by generations or imports still in flight.
    pending: HashSet<String>,
}

/// Holds a key id in the pending set until dropped.
struct Reservation<'a> {
    state: &'a Mutex<KeyState>,
    key_id: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.pending.remove(&self.key_id);
        }
    }
}

/// Owns the lifecycle of asymmetric key pairs and their metadata.
///
/// All mutations run under one state lock and write through to the
/// store before touching memory, so a failed write leaves the manager
/// exactly as it was. Key generation itself runs outside the lock on a
/// worker thread bounded by the configured timeout.
pub struct KeyManager<S: KeyMaterialStore> {
    store: S,
    config: KeyManagerConfig,
    generator: Arc<dyn KeyGenerator>,
    hardener: Box<dyn FileHardener>,
    passphrase_validator: Box<dyn PassphraseValidator>,
    trust: Option<Arc<dyn TrustRegistrar>>,
    audit: Option<Arc<dyn AuditLogger>>,
    cache: Mutex<KeyCache>,
    state: Mutex<KeyState>,
    /// Held for a whole rotation so two rotations never mint from the same current key.
    rotation: Mutex<()>,
}

impl<S: KeyMaterialStore> KeyManager<S> {
    /// Load metadata and the current-key pointer from `store`.
    ///
    /// A missing or dangling pointer falls back to the newest active key
    /// that has a private half.
    pub fn open(store: S, config: KeyManagerConfig, collaborators: KeyCollaborators) -> Result<Self> {
        let metadata = store.load_metadata()?;
        let current = match store.load_current()? {
            Some(id) if metadata.get(&id).is_some_and(|m| m.is_active) => Some(id),
            stored => {
                if let Some(id) = stored {
                    tracing::warn!(key_id = %id, "current key pointer names no active key, ignoring it");
                }
                newest_active(&metadata)
            }
        };
        let cache = KeyCache::new(config.cache_max_size, config.cache_ttl)?;

        tracing::debug!(keys = metadata.len(), current = ?current, "key manager opened");

        Ok(Self {
            store,
            config,
            generator: collaborators.generator,
            hardener: collaborators.hardener,
            passphrase_validator: collaborators.passphrase_validator,
            trust: collaborators.trust,
            audit: collaborators.audit,
            cache: Mutex::new(cache),
            state: Mutex::new(KeyState {
                metadata,
                current,
                pending: HashSet::new(),
            }),
            rotation: Mutex::new(()),
        })
    }

    /// Replace the cache, e.g. with one driven by a manual clock.
    pub fn with_cache(mut self, cache: KeyCache) -> Self {
        self.cache = Mutex::new(cache);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Generate and persist a new key pair.
    ///
    /// Without `key_id` an id of the form `key_<millis>_<random>` is
    /// minted. The new key becomes current when there is no current key.
    pub fn generate_key_pair(
        &self,
        key_id: Option<&str>,
        passphrase: Option<&SecretString>,
    ) -> Result<KeyMetadata> {
        let metadata = self.create_key(key_id, passphrase, true)?;
        self.audit(
            AuditAction::KeyGenerate,
            &metadata.key_id,
            Some(format!("{} {}", metadata.algorithm, metadata.fingerprint)),
        );
        Ok(metadata)
    }

    /// Mint a new current key and archive the previous one.
    ///
    /// Rotations run one at a time. If any step after minting fails, the
    /// new key is removed again and the previous key stays current.
    pub fn rotate_key(&self, passphrase: Option<&SecretString>) -> Result<KeyRotation> {
        let _rotation = self
            .rotation
            .lock()
            .map_err(|_| KeyTrustError::LockPoisoned { operation: "rotate key" })?;

        let previous_id = {
            let state = self.lock_state("rotate key")?;
            active_current(&state).ok_or(KeyTrustError::NoActiveKey)?
        };

        let current = self.create_key(None, passphrase, false)?;

        let archived = match self.promote_rotation(&previous_id, &current.key_id) {
            Ok(archived) => archived,
            Err(e) => {
                self.evict(&current.key_id)?;
                return Err(e);
            }
        };
        self.evict(&previous_id)?;

        tracing::info!(previous = %previous_id, current = %current.key_id, "key rotated");
        self.audit(
            AuditAction::KeyRotate,
            &previous_id,
            Some(format!("new current key {}", current.key_id)),
        );

        Ok(KeyRotation { archived, current })
    }

    /// Retire a key: mark it archived and move its files to the archive.
    pub fn archive_key(&self, key_id: &str) -> Result<KeyMetadata> {
        let archived = {
            let mut state = self.lock_state("archive key")?;
            let before = state.metadata.get(key_id).cloned();
            let archived = self.archive_locked(&mut state, key_id)?;
            if state.current.as_deref() == Some(key_id) {
                if let Err(e) = self.store.save_current(None) {
                    if let Some(before) = before {
                        self.unarchive_locked(&mut state, before);
                    }
                    return Err(e);
                }
                state.current = None;
            }
            archived
        };
        self.evict(key_id)?;

        tracing::info!(key_id, "key archived");
        self.audit(AuditAction::KeyArchive, key_id, None);
        Ok(archived)
    }

    /// Public key PEM, from the cache when possible. Optionally also
    /// written to `output`.
    pub fn export_public_key(&self, key_id: &str, output: Option<&Path>) -> Result<String> {
        self.require_known(key_id, "export public key")?;

        let cache_key = cache_key(PUBLIC_KEY, key_id);
        let cached = self.lock_cache("export public key")?.get(&cache_key);
        let pem = match cached {
            Some(CachedValue::PublicKeyPem(pem)) => pem,
            _ => {
                let pem = self.store.read_public_key(key_id)?;
                self.lock_cache("export public key")?
                    .set(&cache_key, CachedValue::PublicKeyPem(pem.clone()))?;
                pem
            }
        };

        if let Some(path) = output {
            std::fs::write(path, &pem).map_err(|source| KeyTrustError::Storage {
                operation: "write exported public key",
                target: path.display().to_string(),
                source,
            })?;
            tracing::info!(key_id, path = %path.display(), "public key exported");
        }

        Ok(pem)
    }

    /// Register an external public key under `key_id`.
    ///
    /// With `trust`, the key's fingerprint is also handed to the attached
    /// trust registrar with source "imported". A fingerprint the trust
    /// store already knows is left as it is.
    pub fn import_public_key(&self, key_id: &str, source: &Path, trust: bool) -> Result<KeyMetadata> {
        validate_key_id(key_id)?;
        let registrar = match (trust, &self.trust) {
            (false, _) => None,
            (true, Some(registrar)) => Some(registrar),
            (true, None) => {
                return Err(KeyTrustError::InvalidArgument {
                    detail: "trust on import requested but no trust manager is attached".into(),
                });
            }
        };

        let pem = std::fs::read_to_string(source).map_err(|source_err| KeyTrustError::Storage {
            operation: "read public key to import",
            target: source.display().to_string(),
            source: source_err,
        })?;
        let info = PublicKeyInfo::parse(&pem).map_err(|e| KeyTrustError::InvalidPublicKey {
            path: source.to_path_buf(),
            detail: e.to_string(),
        })?;

        let _reservation = self.reserve(key_id)?;
        self.store.write_public_key(key_id, &pem)?;

        let metadata = KeyMetadata {
            key_id: key_id.to_string(),
            fingerprint: info.fingerprint.clone(),
            algorithm: info.algorithm,
            key_size: info.key_size,
            curve: None,
            generated_at: None,
            imported_at: Some(Utc::now()),
            is_active: true,
            archived_at: None,
            passphrase_protected: false,
            is_imported: true,
            usage_count: 0,
            last_used: None,
        };

        {
            let mut state = self.lock_state("import public key")?;
            state.metadata.insert(key_id.to_string(), metadata.clone());
            if let Err(e) = self.store.save_metadata(&state.metadata) {
                self.rollback_new_key(&mut state, key_id);
                return Err(e);
            }
        }
        self.cache_key_material(&pem, &metadata)?;

        tracing::info!(key_id, fingerprint = %info.fingerprint.short(), "public key imported");
        self.audit(
            AuditAction::KeyImport,
            key_id,
            Some(info.fingerprint.to_string()),
        );

        if let Some(registrar) = registrar {
            match registrar.trust_imported_key(&info.fingerprint, key_id) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::warn!(key_id, fingerprint = %info.fingerprint.short(), "fingerprint already known to the trust store");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(metadata)
    }

    /// All keys, newest first, flagged with which one is current.
    pub fn list_keys(&self) -> Result<Vec<KeyListing>> {
        let state = self.lock_state("list keys")?;
        let mut listing: Vec<KeyListing> = state
            .metadata
            .values()
            .map(|m| KeyListing {
                metadata: m.clone(),
                is_current: state.current.as_deref() == Some(m.key_id.as_str()),
            })
            .collect();

        listing.sort_by(|a, b| {
            b.metadata
                .created_at()
                .cmp(&a.metadata.created_at())
                .then_with(|| a.metadata.key_id.cmp(&b.metadata.key_id))
        });
        Ok(listing)
    }

    pub fn get_key_stats(&self) -> Result<KeyStats> {
        let mut stats = KeyStats::default();
        {
            let state = self.lock_state("key stats")?;
            for m in state.metadata.values() {
                stats.total += 1;
                stats.active += usize::from(m.is_active);
                stats.archived += usize::from(m.is_archived());
                stats.imported += usize::from(m.is_imported);
                stats.passphrase_protected += usize::from(m.passphrase_protected);
                *stats.by_algorithm.entry(m.algorithm).or_default() += 1;
            }
            stats.current_key_id = state.current.clone();
        }
        stats.cache = self.lock_cache("key stats")?.stats();
        Ok(stats)
    }

    /// Remove a key's metadata, files and cache entries for good.
    pub fn delete_key(&self, key_id: &str) -> Result<KeyMetadata> {
        let removed = {
            let mut state = self.lock_state("delete key")?;
            let removed = state
                .metadata
                .remove(key_id)
                .ok_or_else(|| KeyTrustError::KeyNotFound {
                    key_id: key_id.to_string(),
                })?;
            if let Err(e) = self.store.save_metadata(&state.metadata) {
                state.metadata.insert(key_id.to_string(), removed);
                return Err(e);
            }
            if state.current.as_deref() == Some(key_id) {
                state.current = None;
                if let Err(e) = self.store.save_current(None) {
                    tracing::warn!(key_id, error = %e, "could not clear current key pointer");
                }
            }
            self.store.delete_key_files(key_id)?;
            removed
        };
        self.evict(key_id)?;

        tracing::info!(key_id, "key deleted");
        self.audit(AuditAction::KeyDelete, key_id, Some(removed.fingerprint.to_string()));
        Ok(removed)
    }

    /// Count one use of an active key.
    pub fn record_key_usage(&self, key_id: &str) -> Result<KeyMetadata> {
        let updated = {
            let mut state = self.lock_state("record key usage")?;
            let entry = state
                .metadata
                .get_mut(key_id)
                .ok_or_else(|| KeyTrustError::KeyNotFound {
                    key_id: key_id.to_string(),
                })?;
            if entry.is_archived() {
                return Err(KeyTrustError::KeyArchived {
                    key_id: key_id.to_string(),
                    action: "used",
                });
            }
            let before = entry.clone();
            entry.usage_count += 1;
            entry.last_used = Some(Utc::now());
            let updated = entry.clone();

            if let Err(e) = self.store.save_metadata(&state.metadata) {
                state.metadata.insert(key_id.to_string(), before);
                return Err(e);
            }
            updated
        };

        self.lock_cache("record key usage")?.set(
            &cache_key(METADATA, key_id),
            CachedValue::Metadata(Box::new(updated.clone())),
        )?;
        Ok(updated)
    }

    /// Private key PEM, decrypted when it is passphrase-protected.
    pub fn load_private_key(
        &self,
        key_id: &str,
        passphrase: Option<&SecretString>,
    ) -> Result<SecretString> {
        let metadata = self.get_key_metadata(key_id)?;
        if metadata.is_imported {
            return Err(KeyTrustError::InvalidArgument {
                detail: format!("key '{key_id}' was imported and has no private key"),
            });
        }

        let stored = self.store.read_private_key(key_id)?;
        if !metadata.passphrase_protected {
            return Ok(stored);
        }

        let passphrase = passphrase.ok_or_else(|| KeyTrustError::InvalidArgument {
            detail: format!("key '{key_id}' is passphrase-protected, a passphrase is required"),
        })?;
        self.generator.decrypt_private_key(&stored, passphrase)
    }

    pub fn get_key_metadata(&self, key_id: &str) -> Result<KeyMetadata> {
        let cache_key = cache_key(METADATA, key_id);
        if let Some(CachedValue::Metadata(metadata)) =
            self.lock_cache("key metadata")?.get(&cache_key)
        {
            return Ok(*metadata);
        }

        let metadata = self
            .lock_state("key metadata")?
            .metadata
            .get(key_id)
            .cloned()
            .ok_or_else(|| KeyTrustError::KeyNotFound {
                key_id: key_id.to_string(),
            })?;
        self.lock_cache("key metadata")?
            .set(&cache_key, CachedValue::Metadata(Box::new(metadata.clone())))?;
        Ok(metadata)
    }

    pub fn current_key_id(&self) -> Result<Option<String>> {
        Ok(self.lock_state("current key")?.current.clone())
    }

    /// Periodic upkeep: sweep expired cache entries. Returns how many went.
    pub fn maintenance(&self) -> Result<usize> {
        Ok(self.lock_cache("maintenance")?.cleanup())
    }

    fn create_key(
        &self,
        key_id: Option<&str>,
        passphrase: Option<&SecretString>,
        claim_current: bool,
    ) -> Result<KeyMetadata> {
        let key_id = match key_id {
            Some(id) => {
                validate_key_id(id)?;
                id.to_string()
            }
            None => generate_key_id(),
        };
        if let Some(pass) = passphrase {
            self.check_passphrase(pass)?;
        }

        let _reservation = self.reserve(&key_id)?;

        let spec = self.config.key_spec.clone();
        let pair = self.generate_with_timeout(&spec, passphrase)?;
        let info = PublicKeyInfo::parse(&pair.public_pem)?;
        let files = self
            .store
            .write_key_pair(&key_id, &pair.public_pem, &pair.private_pem)?;

        let report = self
            .hardener
            .secure_files(&[files.public_key.clone(), files.private_key.clone()]);
        if !report.secured {
            tracing::warn!(key_id = %key_id, details = ?report.details, "could not restrict key file permissions");
        }

        let metadata = KeyMetadata {
            key_id: key_id.clone(),
            fingerprint: info.fingerprint.clone(),
            algorithm: info.algorithm,
            key_size: info.key_size,
            curve: match &spec {
                KeySpec::Ec { curve } => Some(curve.clone()),
                _ => None,
            },
            generated_at: Some(Utc::now()),
            imported_at: None,
            is_active: true,
            archived_at: None,
            passphrase_protected: passphrase.is_some(),
            is_imported: false,
            usage_count: 0,
            last_used: None,
        };

        {
            let mut state = self.lock_state("generate key")?;
            state.metadata.insert(key_id.clone(), metadata.clone());
            if let Err(e) = self.store.save_metadata(&state.metadata) {
                self.rollback_new_key(&mut state, &key_id);
                return Err(e);
            }
            if claim_current && state.current.is_none() {
                if let Err(e) = self.store.save_current(Some(&key_id)) {
                    self.rollback_new_key(&mut state, &key_id);
                    return Err(e);
                }
                state.current = Some(key_id.clone());
            }
        }
        self.cache_key_material(&pair.public_pem, &metadata)?;

        tracing::info!(
            key_id = %key_id,
            algorithm = %metadata.algorithm,
            fingerprint = %metadata.fingerprint.short(),
            "key generated"
        );
        Ok(metadata)
    }

    fn generate_with_timeout(
        &self,
        spec: &KeySpec,
        passphrase: Option<&SecretString>,
    ) -> Result<GeneratedKeyPair> {
        let (tx, rx) = mpsc::channel();
        let generator = Arc::clone(&self.generator);
        let spec = spec.clone();
        let passphrase = passphrase.map(|p| SecretString::from(p.expose_secret().to_string()));

        thread::Builder::new()
            .name("keytrust-keygen".into())
            .spawn(move || {
                // Nobody is listening any more after a timeout.
                let _ = tx.send(generator.generate(&spec, passphrase.as_ref()));
            })
            .map_err(|e| KeyTrustError::Crypto {
                reason: format!("cannot start key generation worker: {e}"),
            })?;

        let timeout = self.config.generation_timeout;
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "key generation timed out");
                Err(KeyTrustError::GenerationTimeout {
                    seconds: timeout.as_secs(),
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(KeyTrustError::Crypto {
                reason: "key generation worker stopped without a result".into(),
            }),
        }
    }

    fn check_passphrase(&self, passphrase: &SecretString) -> Result<()> {
        if !self.config.enforce_strong_passphrase {
            return Ok(());
        }
        let report = self.passphrase_validator.validate(passphrase.expose_secret());
        if report.is_valid {
            Ok(())
        } else {
            Err(KeyTrustError::WeakPassphrase {
                strength: report.strength.as_str().to_string(),
                issues: report.issues,
            })
        }
    }

    /// Mark `key_id` archived and move its files. Caller holds the lock.
    fn archive_locked(&self, state: &mut KeyState, key_id: &str) -> Result<KeyMetadata> {
        let mut updated = state
            .metadata
            .get(key_id)
            .cloned()
            .ok_or_else(|| KeyTrustError::KeyNotFound {
                key_id: key_id.to_string(),
            })?;
        if updated.is_archived() {
            return Err(KeyTrustError::KeyArchived {
                key_id: key_id.to_string(),
                action: "archived again",
            });
        }
        updated.archive(Utc::now());

        self.store.archive_key_files(key_id)?;
        let before = state.metadata.insert(key_id.to_string(), updated.clone());
        if let Err(e) = self.store.save_metadata(&state.metadata) {
            if let Some(before) = before {
                state.metadata.insert(key_id.to_string(), before);
            }
            if let Err(undo) = self.store.unarchive_key_files(key_id) {
                tracing::warn!(key_id, error = %undo, "could not move key files back after failed write");
            }
            return Err(e);
        }
        Ok(updated)
    }

    /// Undo a successful `archive_locked` after a later step failed.
    fn unarchive_locked(&self, state: &mut KeyState, before: KeyMetadata) {
        let key_id = before.key_id.clone();
        if let Err(e) = self.store.unarchive_key_files(&key_id) {
            tracing::warn!(key_id = %key_id, error = %e, "could not move key files back after failed write");
        }
        state.metadata.insert(key_id.clone(), before);
        if let Err(e) = self.store.save_metadata(&state.metadata) {
            tracing::warn!(key_id = %key_id, error = %e, "could not restore key metadata after failed write");
        }
    }

    /// Second half of a rotation: archive `previous_id` and point the
    /// current-key pointer at `new_id`. On failure the new key is rolled
    /// back and `previous_id` is left current.
    fn promote_rotation(&self, previous_id: &str, new_id: &str) -> Result<KeyMetadata> {
        let mut state = self.lock_state("rotate key")?;

        if active_current(&state).as_deref() != Some(previous_id) {
            // archived or deleted while the replacement was generated
            self.rollback_new_key(&mut state, new_id);
            return Err(KeyTrustError::NoActiveKey);
        }

        let before = state.metadata.get(previous_id).cloned();
        let archived = match self.archive_locked(&mut state, previous_id) {
            Ok(archived) => archived,
            Err(e) => {
                self.rollback_new_key(&mut state, new_id);
                return Err(e);
            }
        };
        if let Err(e) = self.store.save_current(Some(new_id)) {
            if let Some(before) = before {
                self.unarchive_locked(&mut state, before);
            }
            self.rollback_new_key(&mut state, new_id);
            return Err(e);
        }
        state.current = Some(new_id.to_string());
        Ok(archived)
    }

    /// Undo an insert whose persistence failed.
    fn rollback_new_key(&self, state: &mut KeyState, key_id: &str) {
        state.metadata.remove(key_id);
        if let Err(e) = self.store.save_metadata(&state.metadata) {
            tracing::warn!(key_id, error = %e, "could not restore key metadata after failed write");
        }
        if let Err(e) = self.store.delete_key_files(key_id) {
            tracing::warn!(key_id, error = %e, "could not remove key files after failed write");
        }
    }

    fn reserve(&self, key_id: &str) -> Result<Reservation<'_>> {
        let mut state = self.lock_state("reserve key id")?;
        if state.metadata.contains_key(key_id) || !state.pending.insert(key_id.to_string()) {
            return Err(KeyTrustError::KeyAlreadyExists {
                key_id: key_id.to_string(),
            });
        }
        Ok(Reservation {
            state: &self.state,
            key_id: key_id.to_string(),
        })
    }

    fn require_known(&self, key_id: &str, operation: &'static str) -> Result<()> {
        if self.lock_state(operation)?.metadata.contains_key(key_id) {
            Ok(())
        } else {
            Err(KeyTrustError::KeyNotFound {
                key_id: key_id.to_string(),
            })
        }
    }

    fn cache_key_material(&self, public_pem: &str, metadata: &KeyMetadata) -> Result<()> {
        let key_id = &metadata.key_id;
        let mut cache = self.lock_cache("cache key material")?;
        cache.set(
            &cache_key(PUBLIC_KEY, key_id),
            CachedValue::PublicKeyPem(public_pem.to_string()),
        )?;
        cache.set(
            &cache_key(FINGERPRINT, key_id),
            CachedValue::Fingerprint(metadata.fingerprint.to_string()),
        )?;
        cache.set(
            &cache_key(METADATA, key_id),
            CachedValue::Metadata(Box::new(metadata.clone())),
        )
    }

    fn evict(&self, key_id: &str) -> Result<()> {
        let mut cache = self.lock_cache("evict key")?;
        for kind in [PUBLIC_KEY, FINGERPRINT, METADATA] {
            cache.delete(&cache_key(kind, key_id));
        }
        Ok(())
    }

    fn audit(&self, action: AuditAction, target: &str, detail: Option<String>) {
        if let Some(logger) = &self.audit
            && let Err(e) = logger.log_event(&AuditEntry::now(action, target, detail))
        {
            tracing::warn!(action = action.as_str(), target, error = %e, "could not write audit entry");
        }
    }

    fn lock_state(&self, operation: &'static str) -> Result<MutexGuard<'_, KeyState>> {
        self.state
            .lock()
            .map_err(|_| KeyTrustError::LockPoisoned { operation })
    }

    fn lock_cache(&self, operation: &'static str) -> Result<MutexGuard<'_, KeyCache>> {
        self.cache
            .lock()
            .map_err(|_| KeyTrustError::LockPoisoned { operation })
    }
}

/// Id of the current key, when it names an active key.
fn active_current(state: &KeyState) -> Option<String> {
    state
        .current
        .as_ref()
        .filter(|id| state.metadata.get(*id).is_some_and(|m| m.is_active))
        .cloned()
}

const PUBLIC_KEY: &str = "pub";
const FINGERPRINT: &str = "fp";
const METADATA: &str = "meta";

fn cache_key(kind: &str, key_id: &str) -> String {
    format!("{kind}:{key_id}")
}

/// Key ids are 1..=64 characters of `[A-Za-z0-9_.-]`, not starting with `.`.
pub fn validate_key_id(key_id: &str) -> Result<()> {
    let valid = !key_id.is_empty()
        && key_id.len() <= MAX_KEY_ID_LEN
        && !key_id.starts_with('.')
        && key_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(KeyTrustError::InvalidKeyId {
            key_id: key_id.to_string(),
        })
    }
}

fn generate_key_id() -> String {
    format!(
        "key_{}_{:08x}",
        Utc::now().timestamp_millis(),
        OsRng.next_u32()
    )
}

/// Newest active key that can sign (i.e. not imported).
fn newest_active(metadata: &BTreeMap<String, KeyMetadata>) -> Option<String> {
    metadata
        .values()
        .filter(|m| m.is_active && !m.is_imported)
        .max_by_key(|m| m.created_at())
        .map(|m| m.key_id.clone())
}
