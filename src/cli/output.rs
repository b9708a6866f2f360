use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use keytrust::core::errors::KeyTrustError;
use keytrust::core::models::fingerprint::Fingerprint;
use keytrust::core::models::trust_entry::TrustStatus;

/// Print a success message.
pub fn success(msg: &str) {
    println!("  {} {}", "✓".green(), msg);
}

/// Print a warning message.
pub fn warning(msg: &str) {
    println!("  {} {}", "⚠".yellow(), msg);
}

/// Print an error with its stable kind code.
pub fn error(err: &KeyTrustError) {
    eprintln!("  {} Error [{}]: {}", "✗".red(), err.kind(), err);
}

/// Print a header line.
pub fn header(msg: &str) {
    println!("\n{}", msg.bold());
}

/// Print an aligned `label: value` line.
pub fn field(label: &str, value: &str) {
    println!("  {:<14} {}", format!("{label}:").dimmed(), value);
}

/// Spinner on stderr for slow work such as RSA key generation.
pub fn spinner(msg: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("  {spinner} {msg}") {
        bar.set_style(style);
    }
    bar.set_message(msg.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

pub fn status_label(status: TrustStatus) -> String {
    match status {
        TrustStatus::Trusted => "trusted".green().to_string(),
        TrustStatus::Revoked => "revoked".yellow().to_string(),
        TrustStatus::PermanentlyRevoked => "banned".red().to_string(),
    }
}

/// Fingerprint shortened for tables.
pub fn short(fingerprint: &Fingerprint) -> String {
    format!("{}…", fingerprint.short())
}
