use crate::core::models::trust_context::{OperationContext, PolicyDecision};
use crate::core::models::trust_policy::{ANY_OPERATION, PolicyRule, RuleAction, RuleMatcher, TrustPolicy};

/// Reason given when no rule of any active policy matched.
pub const DEFAULT_REASON: &str = "default policy allows";

/// Active policies in evaluation order: descending priority, then id.
pub fn evaluation_order<'a>(policies: impl IntoIterator<Item = &'a TrustPolicy>) -> Vec<&'a TrustPolicy> {
    let mut active: Vec<&TrustPolicy> = policies.into_iter().filter(|p| p.is_active).collect();
    active.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.policy_id.cmp(&b.policy_id))
    });
    active
}

/// Decide an operation against `policies`.
///
/// The first matching rule, walking policies by descending priority and
/// rules in declared order, decides. Allow and deny are treated alike:
/// a lower-priority policy never overrides a decision already made.
pub fn evaluate<'a>(
    policies: impl IntoIterator<Item = &'a TrustPolicy>,
    context: &OperationContext,
) -> PolicyDecision {
    for policy in evaluation_order(policies) {
        for (index, rule) in policy.rules.iter().enumerate() {
            if !rule_matches(rule, context) {
                continue;
            }
            let allowed = rule.action == RuleAction::Allow;
            tracing::debug!(
                policy = %policy.policy_id,
                rule = index,
                allowed,
                "policy rule matched"
            );
            return PolicyDecision {
                allowed,
                reason: format!(
                    "{} by policy '{}' rule {} ({} = {})",
                    if allowed { "allowed" } else { "denied" },
                    policy.policy_id,
                    index + 1,
                    rule.matcher.type_name(),
                    rule.matcher.value()
                ),
                policy_id: Some(policy.policy_id.clone()),
                rule_index: Some(index),
            };
        }
    }

    tracing::debug!("no policy rule matched, allowing by default");
    PolicyDecision {
        allowed: true,
        reason: DEFAULT_REASON.to_string(),
        policy_id: None,
        rule_index: None,
    }
}

/// Whether one rule applies to the context. Fingerprints compare
/// case-insensitively; `*` matches any operation.
pub fn rule_matches(rule: &PolicyRule, context: &OperationContext) -> bool {
    match &rule.matcher {
        RuleMatcher::Fingerprint(value) => context
            .fingerprint
            .as_deref()
            .is_some_and(|fp| fp.trim().eq_ignore_ascii_case(value.trim())),
        RuleMatcher::Operation(value) if value == ANY_OPERATION => true,
        RuleMatcher::Operation(value) => context.operation.as_deref() == Some(value.as_str()),
        RuleMatcher::KeyName(value) => context.key_name.as_deref() == Some(value.as_str()),
    }
}
