use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::errors::ErrorKind;

/// What an operation-authorization caller knows about the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationContext {
    pub fingerprint: Option<String>,
    pub key_name: Option<String>,
    pub operation: Option<String>,
    /// Used by trust scoring only.
    pub key_created_at: Option<DateTime<Utc>>,
    pub usage_count: u64,
    pub last_used: Option<DateTime<Utc>>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn key_name(mut self, key_name: impl Into<String>) -> Self {
        self.key_name = Some(key_name.into());
        self
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn key_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.key_created_at = Some(at);
        self
    }

    pub fn usage(mut self, count: u64, last_used: Option<DateTime<Utc>>) -> Self {
        self.usage_count = count;
        self.last_used = last_used;
        self
    }
}

/// Outcome of policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: String,
    /// Policy whose rule decided, `None` for the default.
    pub policy_id: Option<String>,
    pub rule_index: Option<usize>,
}

/// Result of `verify_key_trust`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustVerification {
    pub trusted: bool,
    pub fingerprint: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl TrustLevel {
    /// <40 low, <60 medium, <80 high, otherwise very high.
    pub fn from_score(score: u32) -> Self {
        match score {
            0..40 => TrustLevel::Low,
            40..60 => TrustLevel::Medium,
            60..80 => TrustLevel::High,
            _ => TrustLevel::VeryHigh,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::Low => "low",
            TrustLevel::Medium => "medium",
            TrustLevel::High => "high",
            TrustLevel::VeryHigh => "very high",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub fingerprint: u32,
    pub key_age: u32,
    pub usage: u32,
    pub recency: u32,
    pub policy: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustScore {
    pub score: u32,
    pub level: TrustLevel,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationCheck {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

/// Result of `deep_trust_validation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepValidation {
    pub valid: bool,
    pub trust_level: TrustLevel,
    pub checks: Vec<ValidationCheck>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchError {
    pub fingerprint: String,
    pub kind: &'static str,
    pub error: String,
}

/// Tally of a best-effort batch operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub succeeded_count: usize,
    pub failed_count: usize,
    pub errors: Vec<BatchError>,
}

impl BatchResult {
    pub(crate) fn record_success(&mut self) {
        self.succeeded_count += 1;
    }

    pub(crate) fn record_failure(&mut self, fingerprint: &str, kind: ErrorKind, error: String) {
        self.failed_count += 1;
        self.errors.push(BatchError {
            fingerprint: fingerprint.to_string(),
            kind: kind.as_str(),
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_thresholds() {
        assert_eq!(TrustLevel::from_score(0), TrustLevel::Low);
        assert_eq!(TrustLevel::from_score(39), TrustLevel::Low);
        assert_eq!(TrustLevel::from_score(40), TrustLevel::Medium);
        assert_eq!(TrustLevel::from_score(59), TrustLevel::Medium);
        assert_eq!(TrustLevel::from_score(60), TrustLevel::High);
        assert_eq!(TrustLevel::from_score(79), TrustLevel::High);
        assert_eq!(TrustLevel::from_score(80), TrustLevel::VeryHigh);
        assert_eq!(TrustLevel::from_score(100), TrustLevel::VeryHigh);
    }

    #[test]
    fn batch_result_tallies() {
        let mut result = BatchResult::default();
        result.record_success();
        result.record_failure("ff", ErrorKind::NotFound, "unknown".into());
        assert_eq!(result.succeeded_count, 1);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.errors[0].kind, "NOT_FOUND");
    }
}
