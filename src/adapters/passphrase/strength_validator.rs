use crate::core::traits::passphrase::{PassphraseReport, PassphraseStrength, PassphraseValidator};

/// Minimum passphrase length accepted for key encryption.
pub const MIN_LENGTH: usize = 12;

const COMMON_PASSWORDS: &[&str] = &[
    "password", "passw0rd", "qwerty", "letmein", "welcome", "admin", "iloveyou", "123456",
    "abc123",
];

/// Rule-based passphrase strength check.
///
/// A passphrase is valid when it is at least [`MIN_LENGTH`] long, mixes
/// lower case, upper case, digits and symbols, avoids well-known
/// passwords and has no run of three identical characters.
#[derive(Debug, Default, Clone, Copy)]
pub struct StrengthValidator;

impl PassphraseValidator for StrengthValidator {
    fn validate(&self, passphrase: &str) -> PassphraseReport {
        let length = passphrase.chars().count();
        let mut issues = Vec::new();

        if length < MIN_LENGTH {
            issues.push(format!("must be at least {MIN_LENGTH} characters (got {length})"));
        }

        let classes: [(fn(&char) -> bool, &str); 4] = [
            (char::is_ascii_lowercase, "a lower-case letter"),
            (char::is_ascii_uppercase, "an upper-case letter"),
            (char::is_ascii_digit, "a digit"),
            (|c: &char| !c.is_ascii_alphanumeric(), "a symbol"),
        ];
        let mut present = 0;
        for (matches, name) in classes {
            if passphrase.chars().any(|c| matches(&c)) {
                present += 1;
            } else {
                issues.push(format!("must contain {name}"));
            }
        }

        let lowered = passphrase.to_lowercase();
        if COMMON_PASSWORDS.iter().any(|common| lowered.contains(common)) {
            issues.push("contains a commonly used password".to_string());
        }
        if has_repeated_run(passphrase, 3) {
            issues.push("repeats the same character three or more times in a row".to_string());
        }

        let strength = if !issues.is_empty() {
            if issues.len() > 1 {
                PassphraseStrength::Weak
            } else {
                PassphraseStrength::Fair
            }
        } else {
            let score = present + usize::from(length >= 16) + usize::from(length >= 20);
            if score >= 6 {
                PassphraseStrength::VeryStrong
            } else {
                PassphraseStrength::Strong
            }
        };

        PassphraseReport {
            is_valid: issues.is_empty(),
            issues,
            strength,
        }
    }
}

fn has_repeated_run(s: &str, run: usize) -> bool {
    let mut last = None;
    let mut count = 0;
    for c in s.chars() {
        if Some(c) == last {
            count += 1;
        } else {
            last = Some(c);
            count = 1;
        }
        if count >= run {
            return true;
        }
    }
    false
}
