use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::core::errors::{KeyTrustError, Result};
use crate::core::models::audit_entry::{AuditAction, AuditEntry};
use crate::core::models::fingerprint::Fingerprint;
use crate::core::models::snapshot::TrustSnapshot;
use crate::core::models::trust_context::{
    BatchResult, DeepValidation, OperationContext, PolicyDecision, TrustLevel, TrustScore,
    TrustVerification, ValidationCheck,
};
use crate::core::models::trust_entry::{
    SOURCE_IMPORTED, TrustEntry, TrustOptions, TrustStats, TrustStatus,
};
use crate::core::models::trust_policy::TrustPolicy;
use crate::core::services::policy_engine;
use crate::core::services::trust_scoring;
use crate::core::services::trust_search::{self, SearchHit};
use crate::core::services::trust_transfer::{self, TransferFormat};
use crate::core::traits::audit::AuditLogger;
use crate::core::traits::trust_registrar::TrustRegistrar;
use crate::core::traits::trust_store::TrustPersistence;

/// Who trusted a fingerprint forwarded by the key manager.
const KEY_MANAGER_ACTOR: &str = "key-manager";
const IMPORT_ACTOR: &str = "import";

/// What an import changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Fingerprints that were not in the store before.
    pub added: usize,
    /// Live entries that picked up a revocation from the import.
    pub revocations_applied: usize,
    pub unchanged: usize,
}

struct TrustState {
    entries: BTreeMap<Fingerprint, TrustEntry>,
    policies: BTreeMap<String, TrustPolicy>,
}

/// Authoritative record of which fingerprints are trusted, plus the
/// policies that authorize operations.
///
/// Each fingerprint moves through
/// `absent → trusted → revoked → {trusted | permanently revoked}`;
/// permanent revocation is terminal. All state lives behind one lock and
/// every mutation writes the store before it is visible in memory.
pub struct TrustManager<P: TrustPersistence> {
    persistence: P,
    audit: Option<Arc<dyn AuditLogger>>,
    state: Mutex<TrustState>,
}

impl<P: TrustPersistence> TrustManager<P> {
    /// Load trust entries and policies from `persistence`.
    pub fn open(persistence: P, audit: Option<Arc<dyn AuditLogger>>) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for mut entry in persistence.load_entries()? {
            entry.normalize();
            let fingerprint = entry.fingerprint.clone();
            if entries.insert(fingerprint.clone(), entry).is_some() {
                tracing::warn!(fingerprint = %fingerprint.short(), "duplicate trust entry in store, keeping the last one");
            }
        }
        let policies: BTreeMap<String, TrustPolicy> = persistence
            .load_policies()?
            .into_iter()
            .map(|p| (p.policy_id.clone(), p))
            .collect();

        tracing::debug!(entries = entries.len(), policies = policies.len(), "trust manager opened");

        Ok(Self {
            persistence,
            audit,
            state: Mutex::new(TrustState { entries, policies }),
        })
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    // ── Trust state transitions ──

    /// Trust a fingerprint that the store has never seen.
    ///
    /// A fingerprint that is already present, even revoked, is rejected
    /// with `AlreadyTrustedOrKnown`.
    pub fn add_trusted_fingerprint(&self, fingerprint: &str, options: TrustOptions) -> Result<TrustEntry> {
        let fingerprint = Fingerprint::parse(fingerprint)?;
        let now = Utc::now();
        let mut state = self.lock_state("add trusted fingerprint")?;
        let entry = self.add_locked(&mut state, fingerprint, options, now)?;
        drop(state);

        tracing::info!(fingerprint = %entry.fingerprint.short(), source = %entry.source, "fingerprint trusted");
        self.audit(AuditAction::TrustAdd, entry.fingerprint.as_str(), non_empty(&entry.notes));
        Ok(entry)
    }

    /// Best-effort batch add; one bad item never stops the rest.
    pub fn add_trusted_fingerprints<I>(&self, fingerprints: I, options: &TrustOptions) -> Result<BatchResult>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let now = Utc::now();
        let mut result = BatchResult::default();
        let mut added = Vec::new();

        let mut state = self.lock_state("add trusted fingerprints")?;
        for raw in fingerprints {
            let raw = raw.as_ref();
            let outcome = Fingerprint::parse(raw)
                .and_then(|fp| self.add_locked(&mut state, fp, options.clone(), now));
            match outcome {
                Ok(entry) => {
                    result.record_success();
                    added.push(entry.fingerprint);
                }
                Err(e) => result.record_failure(raw, e.kind(), e.to_string()),
            }
        }
        drop(state);

        tracing::info!(succeeded = result.succeeded_count, failed = result.failed_count, "batch trust finished");
        for fingerprint in &added {
            self.audit(AuditAction::TrustAdd, fingerprint.as_str(), Some("batch".into()));
        }
        Ok(result)
    }

    /// Revoke a trusted fingerprint. The reason is kept in its history.
    pub fn revoke_fingerprint(&self, fingerprint: &str, reason: &str) -> Result<TrustEntry> {
        let fingerprint = Fingerprint::parse(fingerprint)?;
        let reason = require_reason(reason, "revoke")?;
        let mut state = self.lock_state("revoke fingerprint")?;
        let entry = self.revoke_locked(&mut state, &fingerprint, reason, Utc::now())?;
        drop(state);

        tracing::info!(fingerprint = %fingerprint.short(), reason, "fingerprint revoked");
        self.audit(AuditAction::TrustRevoke, fingerprint.as_str(), Some(reason.to_string()));
        Ok(entry)
    }

    /// Best-effort batch revoke with a shared reason.
    pub fn revoke_fingerprints<I>(&self, fingerprints: I, reason: &str) -> Result<BatchResult>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let reason = require_reason(reason, "revoke")?;
        let now = Utc::now();
        let mut result = BatchResult::default();
        let mut revoked = Vec::new();

        let mut state = self.lock_state("revoke fingerprints")?;
        for raw in fingerprints {
            let raw = raw.as_ref();
            let outcome = Fingerprint::parse(raw)
                .and_then(|fp| self.revoke_locked(&mut state, &fp, reason, now));
            match outcome {
                Ok(entry) => {
                    result.record_success();
                    revoked.push(entry.fingerprint);
                }
                Err(e) => result.record_failure(raw, e.kind(), e.to_string()),
            }
        }
        drop(state);

        tracing::info!(succeeded = result.succeeded_count, failed = result.failed_count, "batch revoke finished");
        for fingerprint in &revoked {
            self.audit(AuditAction::TrustRevoke, fingerprint.as_str(), Some(reason.to_string()));
        }
        Ok(result)
    }

    /// Re-trust a revoked fingerprint. Permanently revoked ones stay revoked.
    ///
    /// An entry whose expiry has already passed comes back deactivated,
    /// as `cleanup_expired` would leave it.
    pub fn restore_fingerprint(&self, fingerprint: &str, reason: &str) -> Result<TrustEntry> {
        let fingerprint = Fingerprint::parse(fingerprint)?;
        let reason = require_reason(reason, "restore")?;
        let mut state = self.lock_state("restore fingerprint")?;

        let current = known_entry(&state, &fingerprint, "restore")?;
        match current.status() {
            TrustStatus::Revoked => {}
            TrustStatus::Trusted => {
                return Err(KeyTrustError::transition(
                    fingerprint.as_str(),
                    "restore",
                    "fingerprint is not revoked",
                ));
            }
            TrustStatus::PermanentlyRevoked => {
                return Err(KeyTrustError::transition(
                    fingerprint.as_str(),
                    "restore",
                    "fingerprint is permanently revoked",
                ));
            }
        }

        let now = Utc::now();
        let mut updated = current.clone();
        updated.revoked = false;
        updated.restored_at = Some(now);
        updated.restore_reason = Some(reason.to_string());
        if updated.is_expired(now) {
            updated.is_active = false;
        }
        let entry = self.commit(&mut state, updated)?;
        drop(state);

        if !entry.is_active {
            tracing::warn!(fingerprint = %fingerprint.short(), "restored fingerprint has expired and stays inactive");
        }
        tracing::info!(fingerprint = %fingerprint.short(), reason, "fingerprint restored");
        self.audit(AuditAction::TrustRestore, fingerprint.as_str(), Some(reason.to_string()));
        Ok(entry)
    }

    /// Revoke for good. Valid from trusted or revoked; there is no way back.
    pub fn permanently_revoke_fingerprint(&self, fingerprint: &str, reason: &str) -> Result<TrustEntry> {
        let fingerprint = Fingerprint::parse(fingerprint)?;
        let reason = require_reason(reason, "permanently revoke")?;
        let mut state = self.lock_state("permanently revoke fingerprint")?;

        let current = known_entry(&state, &fingerprint, "permanently revoke")?;
        if current.permanent_revocation {
            return Err(KeyTrustError::transition(
                fingerprint.as_str(),
                "permanently revoke",
                "fingerprint is already permanently revoked",
            ));
        }

        let mut updated = current.clone();
        if !updated.revoked {
            updated.revoked = true;
            updated.revoked_at = Some(Utc::now());
        }
        updated.revocation_reason = Some(reason.to_string());
        updated.permanent_revocation = true;
        let entry = self.commit(&mut state, updated)?;
        drop(state);

        tracing::warn!(fingerprint = %fingerprint.short(), reason, "fingerprint permanently revoked");
        self.audit(AuditAction::TrustPermanentRevoke, fingerprint.as_str(), Some(reason.to_string()));
        Ok(entry)
    }

    /// Deactivate trusted entries whose expiry has passed.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut state = self.lock_state("cleanup expired trust")?;

        let mut entries = state.entries.clone();
        let mut expired = Vec::new();
        for entry in entries.values_mut() {
            if entry.is_trusted() && entry.is_expired(now) {
                entry.is_active = false;
                expired.push(entry.fingerprint.clone());
            }
        }
        if expired.is_empty() {
            return Ok(0);
        }

        self.persist(&entries)?;
        state.entries = entries;
        drop(state);

        tracing::info!(count = expired.len(), "expired trust entries deactivated");
        for fingerprint in &expired {
            self.audit(AuditAction::TrustExpire, fingerprint.as_str(), None);
        }
        Ok(expired.len())
    }

    // ── Queries ──

    /// Exists, active and not revoked. Malformed input is simply not trusted.
    pub fn is_fingerprint_trusted(&self, fingerprint: &str) -> Result<bool> {
        self.query_entry(fingerprint, "check trust", TrustEntry::is_trusted)
    }

    pub fn is_fingerprint_revoked(&self, fingerprint: &str) -> Result<bool> {
        self.query_entry(fingerprint, "check revocation", |e| e.revoked)
    }

    pub fn is_fingerprint_permanently_revoked(&self, fingerprint: &str) -> Result<bool> {
        self.query_entry(fingerprint, "check permanent revocation", |e| e.permanent_revocation)
    }

    pub fn get_trust_entry(&self, fingerprint: &str) -> Result<TrustEntry> {
        let fingerprint = Fingerprint::parse(fingerprint)?;
        let state = self.lock_state("get trust entry")?;
        state
            .entries
            .get(&fingerprint)
            .cloned()
            .ok_or_else(|| KeyTrustError::FingerprintNotFound {
                fingerprint: fingerprint.to_string(),
            })
    }

    /// Every entry, in fingerprint order.
    pub fn list_entries(&self) -> Result<Vec<TrustEntry>> {
        let state = self.lock_state("list trust entries")?;
        Ok(state.entries.values().cloned().collect())
    }

    pub fn list_trusted_fingerprints(&self) -> Result<Vec<TrustEntry>> {
        self.filtered(|e| e.is_trusted())
    }

    /// Revoked entries, permanent ones included.
    pub fn list_revoked_fingerprints(&self) -> Result<Vec<TrustEntry>> {
        self.filtered(|e| e.revoked)
    }

    pub fn get_trust_stats(&self) -> Result<TrustStats> {
        let now = Utc::now();
        let state = self.lock_state("trust stats")?;
        let mut stats = TrustStats {
            total: state.entries.len(),
            policies: state.policies.len(),
            active_policies: state.policies.values().filter(|p| p.is_active).count(),
            ..TrustStats::default()
        };
        for entry in state.entries.values() {
            match entry.status() {
                TrustStatus::Trusted if entry.is_active && !entry.is_expired(now) => stats.trusted += 1,
                TrustStatus::Trusted => {}
                TrustStatus::Revoked => stats.revoked += 1,
                TrustStatus::PermanentlyRevoked => stats.permanently_revoked += 1,
            }
            if entry.is_expired(now) {
                stats.expired += 1;
            }
        }
        Ok(stats)
    }

    /// Rank entries against a free-text query.
    pub fn search_trust_entries(&self, query: &str) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(KeyTrustError::InvalidArgument {
                detail: "search query must not be empty".into(),
            });
        }
        let state = self.lock_state("search trust entries")?;
        Ok(trust_search::search(state.entries.values(), query))
    }

    /// Fingerprint a PEM public key and report whether it is trusted.
    pub fn verify_key_trust(&self, public_key_pem: &str) -> Result<TrustVerification> {
        let fingerprint = Fingerprint::of_public_key_pem(public_key_pem)?;
        let now = Utc::now();
        let state = self.lock_state("verify key trust")?;

        let (trusted, reason) = match state.entries.get(&fingerprint) {
            None => (false, "fingerprint is not in the trust store".to_string()),
            Some(e) if e.permanent_revocation => (
                false,
                format!("fingerprint was permanently revoked: {}", reason_text(e)),
            ),
            Some(e) if e.revoked => (false, format!("fingerprint was revoked: {}", reason_text(e))),
            Some(e) if !e.is_active => (false, "fingerprint trust has expired and was deactivated".into()),
            Some(e) => match e.expires_at {
                Some(at) if at <= now => (false, format!("fingerprint trust expired at {}", at.to_rfc3339())),
                _ => (true, "fingerprint is trusted".into()),
            },
        };

        Ok(TrustVerification {
            trusted,
            fingerprint: fingerprint.to_string(),
            reason,
        })
    }

    /// Run the trust checks in order, stopping at the first failure.
    ///
    /// The level reflects how many checks passed: none is low, all three
    /// is very high.
    pub fn deep_trust_validation(&self, context: &OperationContext) -> Result<DeepValidation> {
        let now = Utc::now();
        let state = self.lock_state("deep trust validation")?;
        let entry = context
            .fingerprint
            .as_deref()
            .and_then(|raw| Fingerprint::parse(raw).ok())
            .and_then(|fp| state.entries.get(&fp));

        let mut checks = Vec::with_capacity(3);

        let (passed, detail) = match entry {
            None if context.fingerprint.is_none() => (false, "no fingerprint given".to_string()),
            None => (false, "fingerprint is not in the trust store".to_string()),
            Some(e) if !e.is_active => (false, "entry is deactivated".to_string()),
            Some(e) if e.is_expired(now) => (false, "entry has expired".to_string()),
            Some(_) => (true, "fingerprint is known and active".to_string()),
        };
        checks.push(ValidationCheck {
            name: "fingerprint_trusted",
            passed,
            detail,
        });

        if let (true, Some(e)) = (passed, entry) {
            let (passed, detail) = match e.status() {
                TrustStatus::Trusted => (true, "not revoked".to_string()),
                TrustStatus::Revoked => (false, format!("revoked: {}", reason_text(e))),
                TrustStatus::PermanentlyRevoked => {
                    (false, format!("permanently revoked: {}", reason_text(e)))
                }
            };
            checks.push(ValidationCheck {
                name: "not_revoked",
                passed,
                detail,
            });

            if passed {
                let decision = policy_engine::evaluate(state.policies.values(), context);
                checks.push(ValidationCheck {
                    name: "policy",
                    passed: decision.allowed,
                    detail: decision.reason,
                });
            }
        }

        let passed = checks.iter().filter(|c| c.passed).count();
        let trust_level = match passed {
            0 => TrustLevel::Low,
            1 => TrustLevel::Medium,
            2 => TrustLevel::High,
            _ => TrustLevel::VeryHigh,
        };
        Ok(DeepValidation {
            valid: checks.len() == 3 && passed == 3,
            trust_level,
            checks,
        })
    }

    /// Additive 0-100 trust score for an operation context.
    pub fn calculate_trust_score(&self, context: &OperationContext) -> Result<TrustScore> {
        self.calculate_trust_score_at(context, Utc::now())
    }

    pub fn calculate_trust_score_at(&self, context: &OperationContext, now: DateTime<Utc>) -> Result<TrustScore> {
        let state = self.lock_state("calculate trust score")?;
        let trusted = context
            .fingerprint
            .as_deref()
            .and_then(|raw| Fingerprint::parse(raw).ok())
            .and_then(|fp| state.entries.get(&fp))
            .is_some_and(|e| e.is_trusted() && !e.is_expired(now));
        let allowed = policy_engine::evaluate(state.policies.values(), context).allowed;
        Ok(trust_scoring::calculate(trusted, allowed, context, now))
    }

    // ── Policies ──

    /// Decide an operation: the first matching rule of the highest
    /// priority active policy wins; no match allows.
    pub fn apply_trust_policies(&self, context: &OperationContext) -> Result<PolicyDecision> {
        let state = self.lock_state("apply trust policies")?;
        Ok(policy_engine::evaluate(state.policies.values(), context))
    }

    pub fn evaluate_operation(&self, context: &OperationContext) -> Result<PolicyDecision> {
        self.apply_trust_policies(context)
    }

    pub fn create_policy(&self, policy: TrustPolicy) -> Result<TrustPolicy> {
        policy.validate()?;
        let mut state = self.lock_state("create policy")?;
        if state.policies.contains_key(&policy.policy_id) {
            return Err(KeyTrustError::PolicyAlreadyExists {
                policy_id: policy.policy_id,
            });
        }

        let now = Utc::now();
        let policy = TrustPolicy {
            created_at: Some(now),
            updated_at: Some(now),
            ..policy
        };
        self.persistence.save_policy(&policy)?;
        state.policies.insert(policy.policy_id.clone(), policy.clone());
        drop(state);

        tracing::info!(policy = %policy.policy_id, priority = policy.priority, "policy created");
        self.audit(AuditAction::PolicyCreate, &policy.policy_id, Some(policy.name.clone()));
        Ok(policy)
    }

    /// Replace an existing policy, keeping its creation time.
    pub fn update_policy(&self, policy: TrustPolicy) -> Result<TrustPolicy> {
        policy.validate()?;
        let mut state = self.lock_state("update policy")?;
        let created_at = state
            .policies
            .get(&policy.policy_id)
            .ok_or_else(|| KeyTrustError::PolicyNotFound {
                policy_id: policy.policy_id.clone(),
            })?
            .created_at;

        let policy = TrustPolicy {
            created_at,
            updated_at: Some(Utc::now()),
            ..policy
        };
        self.persistence.save_policy(&policy)?;
        state.policies.insert(policy.policy_id.clone(), policy.clone());
        drop(state);

        tracing::info!(policy = %policy.policy_id, "policy updated");
        self.audit(AuditAction::PolicyUpdate, &policy.policy_id, None);
        Ok(policy)
    }

    pub fn set_policy_active(&self, policy_id: &str, active: bool) -> Result<TrustPolicy> {
        let mut policy = self.get_policy(policy_id)?;
        policy.is_active = active;
        self.update_policy(policy)
    }

    pub fn remove_policy(&self, policy_id: &str) -> Result<TrustPolicy> {
        let mut state = self.lock_state("remove policy")?;
        if !state.policies.contains_key(policy_id) {
            return Err(KeyTrustError::PolicyNotFound {
                policy_id: policy_id.to_string(),
            });
        }
        self.persistence.delete_policy(policy_id)?;
        let removed = state
            .policies
            .remove(policy_id)
            .ok_or_else(|| KeyTrustError::PolicyNotFound {
                policy_id: policy_id.to_string(),
            })?;
        drop(state);

        tracing::info!(policy = policy_id, "policy removed");
        self.audit(AuditAction::PolicyRemove, policy_id, None);
        Ok(removed)
    }

    pub fn get_policy(&self, policy_id: &str) -> Result<TrustPolicy> {
        let state = self.lock_state("get policy")?;
        state
            .policies
            .get(policy_id)
            .cloned()
            .ok_or_else(|| KeyTrustError::PolicyNotFound {
                policy_id: policy_id.to_string(),
            })
    }

    /// All policies, highest priority first.
    pub fn list_policies(&self) -> Result<Vec<TrustPolicy>> {
        let state = self.lock_state("list policies")?;
        let mut policies: Vec<TrustPolicy> = state.policies.values().cloned().collect();
        policies.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.policy_id.cmp(&b.policy_id))
        });
        Ok(policies)
    }

    // ── Export, import and snapshots ──

    pub fn export_trust_store(&self, format: TransferFormat) -> Result<String> {
        trust_transfer::export(self.list_entries()?, format, Utc::now())
    }

    /// Merge an export into the live store.
    ///
    /// Unknown fingerprints are added as exported. Known ones only pick
    /// up revocations: an import can revoke or permanently revoke a live
    /// entry but never restore one. A fingerprint listed as revoked with
    /// no entry anywhere is added and revoked in one step. A malformed
    /// payload changes nothing.
    pub fn import_trust_store(&self, data: &str, format: TransferFormat) -> Result<ImportReport> {
        let now = Utc::now();
        let snapshot = trust_transfer::parse(data, format, now)?;
        let imported = index_snapshot_entries(snapshot.entries)?;

        let mut state = self.lock_state("import trust store")?;
        let mut entries = state.entries.clone();
        let mut report = ImportReport::default();

        for (fingerprint, incoming) in imported.iter() {
            match entries.get_mut(fingerprint) {
                None => {
                    entries.insert(fingerprint.clone(), incoming.clone());
                    report.added += 1;
                }
                Some(live) => {
                    if merge_revocation(live, incoming, now) {
                        report.revocations_applied += 1;
                    } else {
                        report.unchanged += 1;
                    }
                }
            }
        }

        for fingerprint in &snapshot.revoked_fingerprints {
            if imported.contains_key(fingerprint) {
                continue;
            }
            match entries.get_mut(fingerprint) {
                None => {
                    entries.insert(fingerprint.clone(), revoked_placeholder(fingerprint.clone(), now));
                    report.added += 1;
                }
                Some(live) if !live.revoked => {
                    revoke_in_place(live, now, "listed as revoked in import");
                    report.revocations_applied += 1;
                }
                Some(_) => report.unchanged += 1,
            }
        }

        self.persist(&entries)?;
        state.entries = entries;
        drop(state);

        tracing::info!(
            format = %format,
            added = report.added,
            revocations = report.revocations_applied,
            unchanged = report.unchanged,
            "trust store imported"
        );
        self.audit(
            AuditAction::TrustImport,
            format.as_str(),
            Some(format!(
                "added {}, revocations applied {}, unchanged {}",
                report.added, report.revocations_applied, report.unchanged
            )),
        );
        Ok(report)
    }

    /// Write the whole store as a snapshot file.
    pub fn save_trust_state(&self, path: &Path) -> Result<()> {
        let snapshot = TrustSnapshot::from_entries(self.list_entries()?, Utc::now());
        self.persistence.write_snapshot(path, &snapshot)?;
        tracing::info!(path = %path.display(), entries = snapshot.entries.len(), "trust state saved");
        Ok(())
    }

    /// Replace the whole store with a snapshot file. Returns the entry count.
    pub fn load_trust_state(&self, path: &Path) -> Result<usize> {
        let count = self.replace_from_snapshot(path, "load trust state")?;
        tracing::info!(path = %path.display(), entries = count, "trust state loaded");
        Ok(count)
    }

    /// Snapshot the store into the backups directory and return the file.
    pub fn create_backup(&self) -> Result<PathBuf> {
        let now = Utc::now();
        let path = self.persistence.backup_path(now);
        let snapshot = TrustSnapshot::from_entries(self.list_entries()?, now);
        self.persistence.write_snapshot(&path, &snapshot)?;
        tracing::info!(path = %path.display(), "trust backup created");
        Ok(path)
    }

    pub fn restore_from_backup(&self, path: &Path) -> Result<usize> {
        let count = self.replace_from_snapshot(path, "restore trust backup")?;
        tracing::info!(path = %path.display(), entries = count, "trust store restored from backup");
        self.audit(
            AuditAction::TrustRestoreBackup,
            &path.display().to_string(),
            Some(format!("{count} entries")),
        );
        Ok(count)
    }

    /// Audit entries whose target is `fingerprint`, oldest first.
    pub fn audit_trail(&self, fingerprint: &str) -> Result<Vec<AuditEntry>> {
        let fingerprint = Fingerprint::parse(fingerprint)?;
        match &self.audit {
            Some(logger) => logger.query(Some(fingerprint.as_str()), None),
            None => Ok(Vec::new()),
        }
    }

    // ── Internals ──

    fn add_locked(
        &self,
        state: &mut TrustState,
        fingerprint: Fingerprint,
        options: TrustOptions,
        now: DateTime<Utc>,
    ) -> Result<TrustEntry> {
        if state.entries.contains_key(&fingerprint) {
            return Err(KeyTrustError::AlreadyTrustedOrKnown {
                fingerprint: fingerprint.to_string(),
            });
        }
        if let Some(at) = options.expires_at
            && at <= now
        {
            return Err(KeyTrustError::InvalidArgument {
                detail: format!("expiry {} is not in the future", at.to_rfc3339()),
            });
        }
        self.commit(state, TrustEntry::new(fingerprint, options, now))
    }

    fn revoke_locked(
        &self,
        state: &mut TrustState,
        fingerprint: &Fingerprint,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<TrustEntry> {
        let current = known_entry(state, fingerprint, "revoke")?;
        match current.status() {
            TrustStatus::Trusted => {}
            TrustStatus::Revoked => {
                return Err(KeyTrustError::transition(
                    fingerprint.as_str(),
                    "revoke",
                    "fingerprint is already revoked",
                ));
            }
            TrustStatus::PermanentlyRevoked => {
                return Err(KeyTrustError::transition(
                    fingerprint.as_str(),
                    "revoke",
                    "fingerprint is permanently revoked",
                ));
            }
        }
        let mut updated = current.clone();
        revoke_in_place(&mut updated, now, reason);
        self.commit(state, updated)
    }

    /// Put `entry` in the map and write the store, undoing the insert if
    /// the write fails.
    fn commit(&self, state: &mut TrustState, entry: TrustEntry) -> Result<TrustEntry> {
        let fingerprint = entry.fingerprint.clone();
        let previous = state.entries.insert(fingerprint.clone(), entry.clone());
        if let Err(e) = self.persist(&state.entries) {
            match previous {
                Some(previous) => state.entries.insert(fingerprint, previous),
                None => state.entries.remove(&fingerprint),
            };
            return Err(e);
        }
        Ok(entry)
    }

    fn persist(&self, entries: &BTreeMap<Fingerprint, TrustEntry>) -> Result<()> {
        let list: Vec<TrustEntry> = entries.values().cloned().collect();
        self.persistence.save_entries(&list)
    }

    fn replace_from_snapshot(&self, path: &Path, operation: &'static str) -> Result<usize> {
        let snapshot = self.persistence.read_snapshot(path)?;
        let now = Utc::now();
        let mut entries = index_snapshot_entries(snapshot.entries)?;
        for fingerprint in snapshot.revoked_fingerprints {
            match entries.get_mut(&fingerprint) {
                Some(entry) if !entry.revoked => revoke_in_place(entry, now, "listed as revoked in snapshot"),
                Some(_) => {}
                None => {
                    entries.insert(fingerprint.clone(), revoked_placeholder(fingerprint, now));
                }
            }
        }

        let mut state = self.lock_state(operation)?;
        self.persist(&entries)?;
        state.entries = entries;
        Ok(state.entries.len())
    }

    fn query_entry(
        &self,
        fingerprint: &str,
        operation: &'static str,
        predicate: impl Fn(&TrustEntry) -> bool,
    ) -> Result<bool> {
        let Ok(fingerprint) = Fingerprint::parse(fingerprint) else {
            return Ok(false);
        };
        let state = self.lock_state(operation)?;
        Ok(state.entries.get(&fingerprint).is_some_and(predicate))
    }

    fn filtered(&self, predicate: impl Fn(&TrustEntry) -> bool) -> Result<Vec<TrustEntry>> {
        let state = self.lock_state("list trust entries")?;
        Ok(state.entries.values().filter(|e| predicate(e)).cloned().collect())
    }

    fn audit(&self, action: AuditAction, target: &str, detail: Option<String>) {
        if let Some(logger) = &self.audit
            && let Err(e) = logger.log_event(&AuditEntry::now(action, target, detail))
        {
            tracing::warn!(action = action.as_str(), target, error = %e, "could not write audit entry");
        }
    }

    fn lock_state(&self, operation: &'static str) -> Result<MutexGuard<'_, TrustState>> {
        self.state
            .lock()
            .map_err(|_| KeyTrustError::LockPoisoned { operation })
    }
}

impl<P: TrustPersistence> TrustRegistrar for TrustManager<P> {
    fn trust_imported_key(&self, fingerprint: &Fingerprint, key_id: &str) -> Result<()> {
        let options = TrustOptions::default()
            .added_by(KEY_MANAGER_ACTOR)
            .key_id(key_id)
            .source(SOURCE_IMPORTED);
        self.add_trusted_fingerprint(fingerprint.as_str(), options)
            .map(|_| ())
    }
}

fn known_entry<'a>(
    state: &'a TrustState,
    fingerprint: &Fingerprint,
    action: &'static str,
) -> Result<&'a TrustEntry> {
    state.entries.get(fingerprint).ok_or_else(|| {
        KeyTrustError::transition(fingerprint.as_str(), action, "fingerprint is not in the trust store")
    })
}

fn require_reason<'a>(reason: &'a str, action: &str) -> Result<&'a str> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(KeyTrustError::InvalidArgument {
            detail: format!("a reason is required to {action} a fingerprint"),
        });
    }
    Ok(reason)
}

fn revoke_in_place(entry: &mut TrustEntry, now: DateTime<Utc>, reason: &str) {
    entry.revoked = true;
    entry.revoked_at = Some(now);
    entry.revocation_reason = Some(reason.to_string());
}

/// Copy a revocation from an imported entry onto a live one. Returns
/// whether the live entry changed.
fn merge_revocation(live: &mut TrustEntry, incoming: &TrustEntry, now: DateTime<Utc>) -> bool {
    let mut changed = false;
    if incoming.revoked && !live.revoked {
        live.revoked = true;
        live.revoked_at = incoming.revoked_at.or(Some(now));
        live.revocation_reason = incoming.revocation_reason.clone();
        changed = true;
    }
    if incoming.permanent_revocation && !live.permanent_revocation {
        live.revoked = true;
        live.revoked_at = live.revoked_at.or(incoming.revoked_at).or(Some(now));
        live.revocation_reason = incoming
            .revocation_reason
            .clone()
            .or_else(|| live.revocation_reason.clone());
        live.permanent_revocation = true;
        changed = true;
    }
    changed
}

fn revoked_placeholder(fingerprint: Fingerprint, now: DateTime<Utc>) -> TrustEntry {
    let options = TrustOptions::default()
        .added_by(IMPORT_ACTOR)
        .source(SOURCE_IMPORTED);
    let mut entry = TrustEntry::new(fingerprint, options, now);
    revoke_in_place(&mut entry, now, "listed as revoked in import");
    entry
}

fn index_snapshot_entries(entries: Vec<TrustEntry>) -> Result<BTreeMap<Fingerprint, TrustEntry>> {
    let mut map = BTreeMap::new();
    for mut entry in entries {
        entry.normalize();
        let fingerprint = entry.fingerprint.clone();
        if map.insert(fingerprint.clone(), entry).is_some() {
            return Err(KeyTrustError::format(
                "trust snapshot",
                format!("fingerprint {fingerprint} appears more than once"),
            ));
        }
    }
    Ok(map)
}

fn reason_text(entry: &TrustEntry) -> &str {
    entry.revocation_reason.as_deref().unwrap_or("no reason recorded")
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::audit::json_audit_logger::JsonAuditLogger;
    use crate::adapters::keygen::pkcs8_generator::Pkcs8KeyGenerator;
    use crate::adapters::trust_stores::json_trust_store::JsonTrustStore;
    use crate::core::errors::ErrorKind;
    use crate::core::models::trust_policy::{ANY_OPERATION, PolicyRule, RuleMatcher};
    use crate::core::traits::key_generator::{KeyGenerator, KeySpec};
    use chrono::Duration;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn fp(hex: &str) -> String {
        hex.repeat(32)
    }

    fn temp_manager() -> (tempfile::TempDir, TrustManager<JsonTrustStore>) {
        let dir = tempfile::tempdir().unwrap();
        let audit: Arc<dyn AuditLogger> = Arc::new(JsonAuditLogger::new(dir.path(), "audit.log"));
        let manager = TrustManager::open(JsonTrustStore::new(dir.path()), Some(audit)).unwrap();
        (dir, manager)
    }

    fn trusted(manager: &TrustManager<JsonTrustStore>, hex: &str) {
        manager
            .add_trusted_fingerprint(&fp(hex), TrustOptions::default())
            .unwrap();
    }

    #[test]
    fn added_fingerprint_is_trusted_and_persisted() {
        let (dir, manager) = temp_manager();
        let entry = manager
            .add_trusted_fingerprint(&fp("AB"), TrustOptions::default().added_by("alice").notes("ci"))
            .unwrap();

        assert_eq!(entry.fingerprint.as_str(), fp("ab"));
        assert!(manager.is_fingerprint_trusted(&fp("ab")).unwrap());
        assert!(!manager.is_fingerprint_revoked(&fp("ab")).unwrap());

        let reopened = TrustManager::open(JsonTrustStore::new(dir.path()), None).unwrap();
        assert_eq!(reopened.get_trust_entry(&fp("ab")).unwrap().added_by, "alice");
    }

    #[test]
    fn malformed_fingerprints_are_rejected_or_untrusted() {
        let (_dir, manager) = temp_manager();
        let err = manager
            .add_trusted_fingerprint("xyz", TrustOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(!manager.is_fingerprint_trusted("xyz").unwrap());
    }

    #[test]
    fn known_fingerprint_cannot_be_added_again_even_when_revoked() {
        let (_dir, manager) = temp_manager();
        trusted(&manager, "aa");
        manager.revoke_fingerprint(&fp("aa"), "lost laptop").unwrap();

        let err = manager
            .add_trusted_fingerprint(&fp("aa"), TrustOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn revoke_then_restore_is_trusted_again_with_history() {
        let (_dir, manager) = temp_manager();
        trusted(&manager, "aa");

        manager.revoke_fingerprint(&fp("aa"), "suspicious").unwrap();
        assert!(!manager.is_fingerprint_trusted(&fp("aa")).unwrap());
        assert!(manager.is_fingerprint_revoked(&fp("aa")).unwrap());

        let restored = manager.restore_fingerprint(&fp("aa"), "false alarm").unwrap();
        assert!(manager.is_fingerprint_trusted(&fp("aa")).unwrap());
        assert!(!manager.is_fingerprint_revoked(&fp("aa")).unwrap());
        assert_eq!(restored.revocation_reason.as_deref(), Some("suspicious"));
        assert_eq!(restored.restore_reason.as_deref(), Some("false alarm"));
        assert!(restored.restored_at.is_some());
    }

    #[test]
    fn permanent_revocation_is_terminal() {
        let (_dir, manager) = temp_manager();
        trusted(&manager, "aa");
        manager
            .permanently_revoke_fingerprint(&fp("aa"), "key compromised")
            .unwrap();

        assert!(manager.is_fingerprint_permanently_revoked(&fp("aa")).unwrap());
        for err in [
            manager.restore_fingerprint(&fp("aa"), "please").unwrap_err(),
            manager.revoke_fingerprint(&fp("aa"), "again").unwrap_err(),
            manager
                .permanently_revoke_fingerprint(&fp("aa"), "again")
                .unwrap_err(),
        ] {
            assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
        }
        assert!(manager.is_fingerprint_permanently_revoked(&fp("aa")).unwrap());
    }

    #[test]
    fn permanent_revoke_from_revoked_keeps_original_revocation_time() {
        let (_dir, manager) = temp_manager();
        trusted(&manager, "aa");
        let revoked = manager.revoke_fingerprint(&fp("aa"), "first").unwrap();
        let banned = manager
            .permanently_revoke_fingerprint(&fp("aa"), "confirmed")
            .unwrap();

        assert_eq!(banned.revoked_at, revoked.revoked_at);
        assert_eq!(banned.revocation_reason.as_deref(), Some("confirmed"));
        assert_eq!(banned.status(), TrustStatus::PermanentlyRevoked);
    }

    #[test]
    fn invalid_transitions_are_rejected_without_side_effects() {
        let (_dir, manager) = temp_manager();
        trusted(&manager, "aa");

        let unknown = manager.revoke_fingerprint(&fp("bb"), "nope").unwrap_err();
        assert_eq!(unknown.kind(), ErrorKind::InvalidStateTransition);

        let not_revoked = manager.restore_fingerprint(&fp("aa"), "nope").unwrap_err();
        assert_eq!(not_revoked.kind(), ErrorKind::InvalidStateTransition);

        let no_reason = manager.revoke_fingerprint(&fp("aa"), "  ").unwrap_err();
        assert_eq!(no_reason.kind(), ErrorKind::InvalidArgument);

        assert!(manager.is_fingerprint_trusted(&fp("aa")).unwrap());
        assert_eq!(manager.list_entries().unwrap().len(), 1);
    }

    #[test]
    fn batch_revoke_reports_per_item_failures() {
        let (_dir, manager) = temp_manager();
        trusted(&manager, "aa");
        trusted(&manager, "bb");

        let unknown = fp("cc");
        let result = manager
            .revoke_fingerprints([fp("aa"), unknown.clone(), fp("bb")], "rotation")
            .unwrap();

        assert_eq!(result.succeeded_count, 2);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.errors[0].fingerprint, unknown);
        assert_eq!(result.errors[0].kind, "INVALID_STATE_TRANSITION");
        assert_eq!(manager.list_revoked_fingerprints().unwrap().len(), 2);
    }

    #[test]
    fn batch_add_continues_past_bad_items() {
        let (_dir, manager) = temp_manager();
        trusted(&manager, "aa");

        let (known, fresh) = (fp("aa"), fp("dd"));
        let result = manager
            .add_trusted_fingerprints([known.as_str(), "bogus", fresh.as_str()], &TrustOptions::default())
            .unwrap();

        assert_eq!(result.succeeded_count, 1);
        assert_eq!(result.failed_count, 2);
        let kinds: Vec<_> = result.errors.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, ["ALREADY_EXISTS", "INVALID_ARGUMENT"]);
        assert!(manager.is_fingerprint_trusted(&fp("dd")).unwrap());
    }

    #[test]
    fn concurrent_revocations_have_one_winner() {
        let (_dir, manager) = temp_manager();
        trusted(&manager, "aa");
        let manager = Arc::new(manager);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || manager.revoke_fingerprint(&fp("aa"), &format!("thread {i}")))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.kind() == ErrorKind::InvalidStateTransition));
    }

    #[test]
    fn cleanup_deactivates_expired_entries() {
        let (_dir, manager) = temp_manager();
        trusted(&manager, "aa");
        manager
            .add_trusted_fingerprint(
                &fp("bb"),
                TrustOptions::default().expires_at(Utc::now() + Duration::milliseconds(50)),
            )
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(80));

        // Unswept expiry still answers the basic query.
        assert!(manager.is_fingerprint_trusted(&fp("bb")).unwrap());
        assert_eq!(manager.get_trust_stats().unwrap().expired, 1);

        assert_eq!(manager.cleanup_expired().unwrap(), 1);
        assert!(!manager.is_fingerprint_trusted(&fp("bb")).unwrap());
        assert!(manager.is_fingerprint_trusted(&fp("aa")).unwrap());
        assert_eq!(manager.cleanup_expired().unwrap(), 0);
    }

    #[test]
    fn expiry_in_the_past_is_rejected() {
        let (_dir, manager) = temp_manager();
        let err = manager
            .add_trusted_fingerprint(
                &fp("aa"),
                TrustOptions::default().expires_at(Utc::now() - Duration::days(1)),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn stats_count_each_state() {
        let (_dir, manager) = temp_manager();
        trusted(&manager, "aa");
        trusted(&manager, "bb");
        trusted(&manager, "cc");
        manager.revoke_fingerprint(&fp("bb"), "r").unwrap();
        manager.permanently_revoke_fingerprint(&fp("cc"), "p").unwrap();
        manager
            .create_policy(
                TrustPolicy::new("p1", "all", 1)
                    .with_rule(PolicyRule::allow(RuleMatcher::Operation(ANY_OPERATION.into()))),
            )
            .unwrap();

        let stats = manager.get_trust_stats().unwrap();
        assert_eq!(
            stats,
            TrustStats {
                total: 3,
                trusted: 1,
                revoked: 1,
                permanently_revoked: 1,
                expired: 0,
                policies: 1,
                active_policies: 1,
            }
        );
    }

    #[test]
    fn policy_priority_decides_operations() {
        let (_dir, manager) = temp_manager();
        manager
            .create_policy(
                TrustPolicy::new("allow-all", "A", 1)
                    .with_rule(PolicyRule::allow(RuleMatcher::Operation(ANY_OPERATION.into()))),
            )
            .unwrap();
        manager
            .create_policy(
                TrustPolicy::new("deny-sign", "B", 2)
                    .with_rule(PolicyRule::deny(RuleMatcher::Operation("sign".into()))),
            )
            .unwrap();

        let sign = OperationContext::new().operation("sign");
        let verify = OperationContext::new().operation("verify");
        assert!(!manager.apply_trust_policies(&sign).unwrap().allowed);
        assert!(manager.evaluate_operation(&verify).unwrap().allowed);

        manager.set_policy_active("deny-sign", false).unwrap();
        assert!(manager.apply_trust_policies(&sign).unwrap().allowed);
    }

    #[test]
    fn policy_crud_round_trips_through_files() {
        let (dir, manager) = temp_manager();
        let policy = TrustPolicy::new("p1", "First", 5)
            .with_rule(PolicyRule::deny(RuleMatcher::KeyName("legacy".into())));

        let created = manager.create_policy(policy.clone()).unwrap();
        assert!(created.created_at.is_some());
        assert_eq!(
            manager.create_policy(policy.clone()).unwrap_err().kind(),
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            manager
                .create_policy(TrustPolicy::new("empty", "No rules", 1))
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidArgument
        );

        let updated = manager
            .update_policy(policy.clone().with_description("legacy keys"))
            .unwrap();
        assert_eq!(updated.created_at, created.created_at);

        let reopened = TrustManager::open(JsonTrustStore::new(dir.path()), None).unwrap();
        assert_eq!(reopened.get_policy("p1").unwrap().description, "legacy keys");

        manager.remove_policy("p1").unwrap();
        assert_eq!(manager.get_policy("p1").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(manager.remove_policy("p1").unwrap_err().kind(), ErrorKind::NotFound);
        assert!(TrustManager::open(JsonTrustStore::new(dir.path()), None)
            .unwrap()
            .list_policies()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn list_policies_is_highest_priority_first() {
        let (_dir, manager) = temp_manager();
        for (id, priority) in [("low", 1), ("high", 9), ("mid", 5)] {
            manager
                .create_policy(
                    TrustPolicy::new(id, id, priority)
                        .with_rule(PolicyRule::allow(RuleMatcher::Operation(ANY_OPERATION.into()))),
                )
                .unwrap();
        }
        let ids: Vec<_> = manager
            .list_policies()
            .unwrap()
            .into_iter()
            .map(|p| p.policy_id)
            .collect();
        assert_eq!(ids, ["high", "mid", "low"]);
    }

    #[test]
    fn verify_key_trust_explains_the_outcome() {
        let (_dir, manager) = temp_manager();
        let pair = Pkcs8KeyGenerator::default()
            .generate(&KeySpec::Ed25519, None)
            .unwrap();
        let fingerprint = Fingerprint::of_public_key_pem(&pair.public_pem).unwrap();

        let unknown = manager.verify_key_trust(&pair.public_pem).unwrap();
        assert!(!unknown.trusted);
        assert!(unknown.reason.contains("not in the trust store"));

        manager
            .add_trusted_fingerprint(fingerprint.as_str(), TrustOptions::default())
            .unwrap();
        let ok = manager.verify_key_trust(&pair.public_pem).unwrap();
        assert!(ok.trusted);
        assert_eq!(ok.fingerprint, fingerprint.as_str());

        manager
            .revoke_fingerprint(fingerprint.as_str(), "rotated out")
            .unwrap();
        let revoked = manager.verify_key_trust(&pair.public_pem).unwrap();
        assert!(!revoked.trusted);
        assert!(revoked.reason.contains("revoked: rotated out"));

        let err = manager.verify_key_trust("not a key").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatError);
    }

    #[test]
    fn deep_validation_stops_at_first_failed_check() {
        let (_dir, manager) = temp_manager();
        trusted(&manager, "aa");
        trusted(&manager, "bb");
        manager.revoke_fingerprint(&fp("bb"), "r").unwrap();
        manager
            .create_policy(
                TrustPolicy::new("no-sign", "No signing", 1)
                    .with_rule(PolicyRule::deny(RuleMatcher::Operation("sign".into()))),
            )
            .unwrap();

        let good = manager
            .deep_trust_validation(&OperationContext::new().fingerprint(fp("aa")).operation("verify"))
            .unwrap();
        assert!(good.valid);
        assert_eq!(good.trust_level, TrustLevel::VeryHigh);
        assert_eq!(good.checks.len(), 3);

        let denied = manager
            .deep_trust_validation(&OperationContext::new().fingerprint(fp("aa")).operation("sign"))
            .unwrap();
        assert!(!denied.valid);
        assert_eq!(denied.trust_level, TrustLevel::High);

        let revoked = manager
            .deep_trust_validation(&OperationContext::new().fingerprint(fp("bb")))
            .unwrap();
        assert!(!revoked.valid);
        assert_eq!(revoked.checks.len(), 2);
        assert_eq!(revoked.checks[1].name, "not_revoked");
        assert_eq!(revoked.trust_level, TrustLevel::Medium);

        let unknown = manager
            .deep_trust_validation(&OperationContext::new().fingerprint(fp("cc")))
            .unwrap();
        assert_eq!(unknown.checks.len(), 1);
        assert_eq!(unknown.trust_level, TrustLevel::Low);
    }

    #[test]
    fn trust_score_rewards_trusted_fingerprints() {
        let (_dir, manager) = temp_manager();
        trusted(&manager, "aa");
        let now = Utc::now();
        let ctx = |hex: &str| {
            OperationContext::new()
                .fingerprint(fp(hex))
                .key_created_at(now)
                .usage(20, Some(now))
        };

        let known = manager.calculate_trust_score_at(&ctx("aa"), now).unwrap();
        assert_eq!(known.score, 100);
        let stranger = manager.calculate_trust_score_at(&ctx("bb"), now).unwrap();
        assert_eq!(stranger.score, 60);
        assert_eq!(stranger.level, TrustLevel::High);
    }

    #[test]
    fn search_ranks_and_rejects_empty_queries() {
        let (_dir, manager) = temp_manager();
        manager
            .add_trusted_fingerprint(&fp("aa"), TrustOptions::default().added_by("release"))
            .unwrap();
        manager
            .add_trusted_fingerprint(&fp("bb"), TrustOptions::default().notes("release candidate"))
            .unwrap();

        let hits = manager.search_trust_entries("release").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry.fingerprint.as_str(), fp("aa"));
        assert_eq!(
            manager.search_trust_entries(" ").unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn import_adds_new_and_propagates_revocations_only() {
        let (_src_dir, source) = temp_manager();
        trusted(&source, "aa");
        trusted(&source, "bb");
        trusted(&source, "cc");
        source.revoke_fingerprint(&fp("bb"), "leaked").unwrap();
        let export = source.export_trust_store(TransferFormat::Json).unwrap();

        let (_dst_dir, target) = temp_manager();
        trusted(&target, "bb");
        trusted(&target, "cc");
        trusted(&target, "dd");
        target.revoke_fingerprint(&fp("dd"), "local").unwrap();

        let report = target.import_trust_store(&export, TransferFormat::Json).unwrap();
        assert_eq!(
            report,
            ImportReport {
                added: 1,
                revocations_applied: 1,
                unchanged: 1,
            }
        );
        assert!(target.is_fingerprint_trusted(&fp("aa")).unwrap());
        assert!(target.is_fingerprint_revoked(&fp("bb")).unwrap());
        assert!(target.is_fingerprint_trusted(&fp("cc")).unwrap());
        assert!(target.is_fingerprint_revoked(&fp("dd")).unwrap());
    }

    #[test]
    fn import_revoked_list_adds_then_revokes_unknown_fingerprints() {
        let (_dir, manager) = temp_manager();
        let payload = format!(
            r#"{{"entries": [], "revokedFingerprints": ["{}"], "version": 1, "savedAt": "2026-01-01T00:00:00Z"}}"#,
            fp("ee")
        );

        let report = manager.import_trust_store(&payload, TransferFormat::Json).unwrap();
        assert_eq!(report.added, 1);

        let entry = manager.get_trust_entry(&fp("ee")).unwrap();
        assert!(entry.revoked);
        assert_eq!(entry.source, SOURCE_IMPORTED);
    }

    fn contradictory_json(hex: &str) -> String {
        format!(
            r#"{{"entries": [{{"fingerprint": "{}", "addedAt": "2026-05-01T12:00:00Z", "addedBy": "ops", "source": "manual", "isActive": true, "revoked": false, "permanentRevocation": true}}], "version": 1, "savedAt": "2026-05-01T12:00:00Z"}}"#,
            fp(hex)
        )
    }

    fn assert_only_permanently_revoked(manager: &TrustManager<JsonTrustStore>, hex: &str) {
        assert!(!manager.is_fingerprint_trusted(&fp(hex)).unwrap());
        assert!(manager.is_fingerprint_revoked(&fp(hex)).unwrap());
        assert!(manager.is_fingerprint_permanently_revoked(&fp(hex)).unwrap());
        assert!(manager.list_trusted_fingerprints().unwrap().is_empty());
        assert_eq!(manager.get_trust_stats().unwrap().trusted, 0);
    }

    #[test]
    fn imported_permanent_flag_without_revoked_is_not_trusted() {
        let csv = format!(
            "{}\n{},trusted,2026-05-01T12:00:00Z,ops,,manual,,,,true\n",
            trust_transfer::CSV_HEADER.join(","),
            fp("ab")
        );
        let (_dir, manager) = temp_manager();
        manager.import_trust_store(&csv, TransferFormat::Csv).unwrap();
        assert_only_permanently_revoked(&manager, "ab");

        let (_dir, manager) = temp_manager();
        manager
            .import_trust_store(&contradictory_json("cd"), TransferFormat::Json)
            .unwrap();
        assert_only_permanently_revoked(&manager, "cd");
        let err = manager.restore_fingerprint(&fp("cd"), "try").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
    }

    #[test]
    fn loaded_snapshot_with_permanent_flag_is_not_trusted() {
        let (dir, manager) = temp_manager();
        let path = dir.path().join("state.json");
        std::fs::write(&path, contradictory_json("ef")).unwrap();

        manager.load_trust_state(&path).unwrap();
        assert_only_permanently_revoked(&manager, "ef");

        let reopened = TrustManager::open(JsonTrustStore::new(dir.path()), None).unwrap();
        assert_only_permanently_revoked(&reopened, "ef");
    }

    #[test]
    fn restoring_an_expired_entry_leaves_it_inactive() {
        let (_dir, manager) = temp_manager();
        manager
            .add_trusted_fingerprint(
                &fp("aa"),
                TrustOptions::default().expires_at(Utc::now() + Duration::milliseconds(50)),
            )
            .unwrap();
        manager.revoke_fingerprint(&fp("aa"), "lost").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(80));

        let entry = manager.restore_fingerprint(&fp("aa"), "found").unwrap();

        assert!(!entry.revoked);
        assert!(!entry.is_active);
        assert!(!manager.is_fingerprint_trusted(&fp("aa")).unwrap());
    }

    #[test]
    fn malformed_import_changes_nothing() {
        let (_dir, manager) = temp_manager();
        trusted(&manager, "aa");

        let err = manager
            .import_trust_store("fingerprint,oops\n", TransferFormat::Csv)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatError);
        assert_eq!(manager.list_entries().unwrap().len(), 1);
    }

    #[test]
    fn csv_export_round_trips_into_an_empty_store() {
        let (_src_dir, source) = temp_manager();
        trusted(&source, "aa");
        trusted(&source, "bb");
        source.permanently_revoke_fingerprint(&fp("bb"), "gone").unwrap();
        let csv = source.export_trust_store(TransferFormat::Csv).unwrap();

        let (_dst_dir, target) = temp_manager();
        let report = target.import_trust_store(&csv, TransferFormat::Csv).unwrap();
        assert_eq!(report.added, 2);
        assert!(target.is_fingerprint_trusted(&fp("aa")).unwrap());
        assert!(target.is_fingerprint_permanently_revoked(&fp("bb")).unwrap());
    }

    #[test]
    fn backup_and_restore_replace_the_store_wholesale() {
        let (dir, manager) = temp_manager();
        trusted(&manager, "aa");
        manager.revoke_fingerprint(&fp("aa"), "r").unwrap();

        let backup = manager.create_backup().unwrap();
        assert!(backup.starts_with(dir.path().join("backups")));

        trusted(&manager, "bb");
        manager.restore_fingerprint(&fp("aa"), "fine").unwrap();

        assert_eq!(manager.restore_from_backup(&backup).unwrap(), 1);
        assert!(manager.is_fingerprint_revoked(&fp("aa")).unwrap());
        assert!(manager.get_trust_entry(&fp("bb")).is_err());

        let reopened = TrustManager::open(JsonTrustStore::new(dir.path()), None).unwrap();
        assert_eq!(reopened.list_entries().unwrap().len(), 1);
    }

    #[test]
    fn save_and_load_trust_state_via_explicit_path() {
        let (dir, manager) = temp_manager();
        trusted(&manager, "aa");
        let path = dir.path().join("exported-state.json");
        manager.save_trust_state(&path).unwrap();

        let (_other_dir, other) = temp_manager();
        assert_eq!(other.load_trust_state(&path).unwrap(), 1);
        assert!(other.is_fingerprint_trusted(&fp("aa")).unwrap());

        let err = other
            .load_trust_state(&dir.path().join("missing.json"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn snapshot_with_duplicate_fingerprints_is_rejected() {
        let (dir, manager) = temp_manager();
        trusted(&manager, "aa");
        let entry = manager.get_trust_entry(&fp("aa")).unwrap();
        let snapshot = TrustSnapshot::from_entries(vec![entry.clone(), entry], Utc::now());
        let path = dir.path().join("dup.json");
        std::fs::write(&path, serde_json::to_string(&snapshot).unwrap()).unwrap();

        let err = manager.load_trust_state(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatError);
    }

    #[test]
    fn every_transition_lands_in_the_audit_trail() {
        let (_dir, manager) = temp_manager();
        trusted(&manager, "aa");
        manager.revoke_fingerprint(&fp("aa"), "r").unwrap();
        manager.restore_fingerprint(&fp("aa"), "ok").unwrap();
        manager.permanently_revoke_fingerprint(&fp("aa"), "p").unwrap();

        let actions: Vec<_> = manager
            .audit_trail(&fp("aa"))
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(
            actions,
            [
                AuditAction::TrustAdd,
                AuditAction::TrustRevoke,
                AuditAction::TrustRestore,
                AuditAction::TrustPermanentRevoke,
            ]
        );
    }

    #[test]
    fn registrar_trusts_imported_keys_as_imported() {
        let (_dir, manager) = temp_manager();
        let fingerprint = Fingerprint::parse(&fp("ab")).unwrap();

        manager.trust_imported_key(&fingerprint, "partner").unwrap();

        let entry = manager.get_trust_entry(fingerprint.as_str()).unwrap();
        assert_eq!(entry.source, SOURCE_IMPORTED);
        assert_eq!(entry.key_id.as_deref(), Some("partner"));
        assert_eq!(
            manager
                .trust_imported_key(&fingerprint, "partner")
                .unwrap_err()
                .kind(),
            ErrorKind::AlreadyExists
        );
    }

    struct FlakyStore {
        inner: JsonTrustStore,
        fail_writes: AtomicBool,
    }

    impl TrustPersistence for FlakyStore {
        fn load_entries(&self) -> Result<Vec<TrustEntry>> {
            self.inner.load_entries()
        }

        fn save_entries(&self, entries: &[TrustEntry]) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(KeyTrustError::Storage {
                    operation: "write trust store",
                    target: "trust-store.json".into(),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.inner.save_entries(entries)
        }

        fn load_policies(&self) -> Result<Vec<TrustPolicy>> {
            self.inner.load_policies()
        }

        fn save_policy(&self, policy: &TrustPolicy) -> Result<()> {
            self.inner.save_policy(policy)
        }

        fn delete_policy(&self, policy_id: &str) -> Result<()> {
            self.inner.delete_policy(policy_id)
        }

        fn write_snapshot(&self, path: &Path, snapshot: &TrustSnapshot) -> Result<()> {
            self.inner.write_snapshot(path, snapshot)
        }

        fn read_snapshot(&self, path: &Path) -> Result<TrustSnapshot> {
            self.inner.read_snapshot(path)
        }

        fn backup_path(&self, now: DateTime<Utc>) -> PathBuf {
            self.inner.backup_path(now)
        }
    }

    #[test]
    fn failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlakyStore {
            inner: JsonTrustStore::new(dir.path()),
            fail_writes: AtomicBool::new(false),
        };
        let manager = TrustManager::open(store, None).unwrap();
        manager
            .add_trusted_fingerprint(&fp("aa"), TrustOptions::default())
            .unwrap();

        manager.persistence().fail_writes.store(true, Ordering::SeqCst);

        let err = manager
            .add_trusted_fingerprint(&fp("bb"), TrustOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert!(manager.get_trust_entry(&fp("bb")).is_err());

        assert!(manager.revoke_fingerprint(&fp("aa"), "r").is_err());
        assert!(manager.is_fingerprint_trusted(&fp("aa")).unwrap());
    }
}
