use chrono::{DateTime, Utc};

use crate::core::models::trust_context::{OperationContext, ScoreBreakdown, TrustLevel, TrustScore};

pub const FINGERPRINT_POINTS: u32 = 40;
pub const KEY_AGE_POINTS: f64 = 20.0;
pub const USAGE_POINTS: u64 = 15;
pub const RECENCY_POINTS: f64 = 15.0;
pub const POLICY_POINTS: u32 = 10;

const KEY_AGE_HORIZON_DAYS: f64 = 365.0;
const RECENCY_HORIZON_DAYS: f64 = 30.0;

/// Additive trust score for one operation context.
///
/// Key age and recency decay linearly: a key created now earns the full
/// age points and nothing after a year; a key used now earns the full
/// recency points and nothing after thirty days. Usage earns one point
/// per recorded use.
pub fn calculate(
    fingerprint_trusted: bool,
    policy_allows: bool,
    context: &OperationContext,
    now: DateTime<Utc>,
) -> TrustScore {
    let breakdown = ScoreBreakdown {
        fingerprint: if fingerprint_trusted { FINGERPRINT_POINTS } else { 0 },
        key_age: decayed(KEY_AGE_POINTS, context.key_created_at, now, KEY_AGE_HORIZON_DAYS),
        usage: context.usage_count.min(USAGE_POINTS) as u32,
        recency: decayed(RECENCY_POINTS, context.last_used, now, RECENCY_HORIZON_DAYS),
        policy: if policy_allows { POLICY_POINTS } else { 0 },
    };
    let score = (breakdown.fingerprint
        + breakdown.key_age
        + breakdown.usage
        + breakdown.recency
        + breakdown.policy)
        .min(100);

    TrustScore {
        score,
        level: TrustLevel::from_score(score),
        breakdown,
    }
}

fn decayed(max: f64, since: Option<DateTime<Utc>>, now: DateTime<Utc>, horizon_days: f64) -> u32 {
    let Some(since) = since else {
        return 0;
    };
    // Timestamps in the future count as "just now".
    let days = ((now - since).num_seconds().max(0) as f64) / 86_400.0;
    let factor = (1.0 - days / horizon_days).clamp(0.0, 1.0);
    (max * factor).round() as u32
}
