use keytrust::config::app_config::{AppConfig, AuditSection, CONFIG_FILE};
use keytrust::core::errors::{KeyTrustError, Result};
use keytrust::core::models::audit_entry::{AuditAction, AuditEntry};

use crate::cli::context;
use crate::cli::output;

/// Execute the `keytrust init` command.
///
/// Creates the data directory and writes `keytrust.toml` with every
/// default spelled out so it is easy to edit.
pub fn execute() -> Result<()> {
    let dir = context::data_dir();
    let config_path = dir.join(CONFIG_FILE);

    if config_path.exists() {
        return Err(KeyTrustError::InvalidConfig {
            detail: format!(
                "keytrust is already initialized in {} ({CONFIG_FILE} exists)",
                dir.display()
            ),
        });
    }

    output::header("keytrust: initializing data directory");

    std::fs::create_dir_all(dir)?;
    output::success(&format!("Created {}", dir.display()));

    let config = AppConfig {
        audit: Some(AuditSection::default()),
        ..AppConfig::default()
    };
    std::fs::write(&config_path, config.to_toml()?)?;
    output::success(&format!("Generated {CONFIG_FILE} with defaults"));
    tracing::debug!(path = %config_path.display(), "config written");

    if let Some(logger) = context::audit_logger(dir, &config) {
        let entry = AuditEntry::now(
            AuditAction::Init,
            dir.display().to_string(),
            Some("data directory initialized".into()),
        );
        if let Err(e) = logger.log_event(&entry) {
            output::warning(&format!("Could not write audit log: {e}"));
        }
    }

    println!("\n  Next: keytrust keys generate");
    Ok(())
}
