use colored::Colorize;

use keytrust::config::app_config::CONFIG_FILE;
use keytrust::core::errors::Result;

use crate::cli::context::Workspace;
use crate::cli::output;

/// Execute the `keytrust status` command.
///
/// Displays configuration, the current key and trust store counters.
pub fn execute() -> Result<()> {
    let workspace = Workspace::open()?;
    let config = &workspace.config;

    output::header(&format!("keytrust v{}", env!("CARGO_PKG_VERSION")));
    output::field("Data dir", &workspace.dir.display().to_string());
    output::field("Config", CONFIG_FILE);
    output::field("Algorithm", config.keys.algorithm.as_str());

    println!("\n{}", "  Keys".bold());
    match workspace.key_manager().and_then(|m| m.get_key_stats()) {
        Ok(stats) => {
            match &stats.current_key_id {
                Some(id) => output::success(&format!("Current key: {id}")),
                None => {
                    output::warning("No current key");
                    println!("  Run 'keytrust keys generate' to create one.");
                }
            }
            println!(
                "  {} active, {} archived, {} imported",
                stats.active, stats.archived, stats.imported
            );
        }
        Err(e) => output::warning(&format!("Could not read keys: {e}")),
    }

    println!("\n{}", "  Trust store".bold());
    let stats = workspace.trust.get_trust_stats()?;
    println!(
        "  {} trusted, {} revoked, {} banned, {} expired",
        stats.trusted, stats.revoked, stats.permanently_revoked, stats.expired
    );
    println!(
        "  {} policies ({} active)",
        stats.policies, stats.active_policies
    );

    println!("\n{}", "  Audit".bold());
    match workspace.audit() {
        Some(logger) => match logger.query(None, None) {
            Ok(entries) => output::success(&format!("Enabled ({} entries)", entries.len())),
            Err(e) => output::warning(&format!("Enabled, but unreadable: {e}")),
        },
        None => output::warning("Disabled"),
    }

    Ok(())
}
