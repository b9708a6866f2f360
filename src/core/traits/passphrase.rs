use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassphraseStrength {
    Weak,
    Fair,
    Strong,
    VeryStrong,
}

impl PassphraseStrength {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassphraseStrength::Weak => "weak",
            PassphraseStrength::Fair => "fair",
            PassphraseStrength::Strong => "strong",
            PassphraseStrength::VeryStrong => "very strong",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassphraseReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub strength: PassphraseStrength,
}

/// Port for the strong-passphrase policy.
pub trait PassphraseValidator: Send + Sync {
    fn validate(&self, passphrase: &str) -> PassphraseReport;
}
