use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{KeyTrustError, Result};

/// Wildcard accepted by operation rules.
pub const ANY_OPERATION: &str = "*";

/// What a rule looks at in an operation context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMatcher {
    Fingerprint(String),
    Operation(String),
    KeyName(String),
}

impl RuleMatcher {
    pub fn type_name(&self) -> &'static str {
        match self {
            RuleMatcher::Fingerprint(_) => "fingerprint",
            RuleMatcher::Operation(_) => "operation",
            RuleMatcher::KeyName(_) => "keyName",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            RuleMatcher::Fingerprint(v) | RuleMatcher::Operation(v) | RuleMatcher::KeyName(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Deny,
}

/// One allow/deny rule. Serialized as `{type, value, action}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRule", into = "RawRule")]
pub struct PolicyRule {
    pub matcher: RuleMatcher,
    pub action: RuleAction,
}

impl PolicyRule {
    pub fn allow(matcher: RuleMatcher) -> Self {
        Self {
            matcher,
            action: RuleAction::Allow,
        }
    }

    pub fn deny(matcher: RuleMatcher) -> Self {
        Self {
            matcher,
            action: RuleAction::Deny,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawRule {
    #[serde(rename = "type")]
    rule_type: String,
    value: String,
    action: RuleAction,
}

impl TryFrom<RawRule> for PolicyRule {
    type Error = String;

    fn try_from(raw: RawRule) -> std::result::Result<Self, Self::Error> {
        let matcher = match raw.rule_type.as_str() {
            "fingerprint" => RuleMatcher::Fingerprint(raw.value),
            "operation" => RuleMatcher::Operation(raw.value),
            "keyName" | "key_name" => RuleMatcher::KeyName(raw.value),
            other => return Err(format!("unknown rule type '{other}'")),
        };
        Ok(Self {
            matcher,
            action: raw.action,
        })
    }
}

impl From<PolicyRule> for RawRule {
    fn from(rule: PolicyRule) -> Self {
        RawRule {
            rule_type: rule.matcher.type_name().to_string(),
            value: rule.matcher.value().to_string(),
            action: rule.action,
        }
    }
}

/// A prioritized, ordered set of rules. Persisted as `policies/<policyId>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustPolicy {
    pub policy_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rules: Vec<PolicyRule>,
    pub priority: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl TrustPolicy {
    pub fn new(policy_id: impl Into<String>, name: impl Into<String>, priority: i32) -> Self {
        Self {
            policy_id: policy_id.into(),
            name: name.into(),
            description: String::new(),
            rules: Vec::new(),
            priority,
            is_active: true,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Reject ids that cannot be file names and rule sets that cannot match.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_policy_id(&self.policy_id) {
            return Err(KeyTrustError::InvalidArgument {
                detail: format!(
                    "policy id '{}' must be 1-64 characters of letters, digits, '_' or '-'",
                    self.policy_id
                ),
            });
        }
        if self.rules.is_empty() {
            return Err(KeyTrustError::InvalidArgument {
                detail: format!("policy '{}' has no rules", self.policy_id),
            });
        }
        if let Some(rule) = self.rules.iter().find(|r| r.matcher.value().trim().is_empty()) {
            return Err(KeyTrustError::InvalidArgument {
                detail: format!(
                    "policy '{}' has a {} rule with an empty value",
                    self.policy_id,
                    rule.matcher.type_name()
                ),
            });
        }
        Ok(())
    }
}

fn is_valid_policy_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
