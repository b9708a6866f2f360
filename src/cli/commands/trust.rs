use std::path::Path;

use colored::Colorize;

use keytrust::adapters::trust_stores::json_trust_store::JsonTrustStore;
use keytrust::core::errors::Result;
use keytrust::core::models::audit_entry::current_actor;
use keytrust::core::models::trust_entry::{TrustEntry, TrustOptions};
use keytrust::core::services::trust_manager::TrustManager;
use keytrust::core::services::trust_transfer::TransferFormat;

use crate::cli::TrustAction;
use crate::cli::commands::parse_date;
use crate::cli::context::Workspace;
use crate::cli::output;

/// Execute the `keytrust trust` command.
pub fn execute(action: &TrustAction) -> Result<()> {
    let workspace = Workspace::open()?;
    let trust = workspace.trust.as_ref();

    match action {
        TrustAction::Add {
            fingerprint,
            note,
            key_id,
            expires,
        } => {
            let mut options = TrustOptions::default().added_by(current_actor());
            if let Some(note) = note {
                options = options.notes(note);
            }
            if let Some(key_id) = key_id {
                options = options.key_id(key_id);
            }
            if let Some(date) = expires {
                options = options.expires_at(parse_date(date)?);
            }
            let entry = trust.add_trusted_fingerprint(fingerprint, options)?;
            output::success(&format!("Trusted {}", entry.fingerprint));
            Ok(())
        }
        TrustAction::Revoke { fingerprint, reason } => {
            let entry = trust.revoke_fingerprint(fingerprint, reason)?;
            output::success(&format!("Revoked {}", entry.fingerprint));
            Ok(())
        }
        TrustAction::Restore { fingerprint, reason } => {
            let entry = trust.restore_fingerprint(fingerprint, reason)?;
            output::success(&format!("Restored {}", entry.fingerprint));
            Ok(())
        }
        TrustAction::Ban { fingerprint, reason } => {
            let entry = trust.permanently_revoke_fingerprint(fingerprint, reason)?;
            output::success(&format!("Permanently revoked {}", entry.fingerprint));
            output::warning("This cannot be undone");
            Ok(())
        }
        TrustAction::Verify { path } => execute_verify(trust, path),
        TrustAction::Show { fingerprint } => execute_show(trust, fingerprint),
        TrustAction::List { revoked } => {
            let entries = if *revoked {
                trust.list_revoked_fingerprints()?
            } else {
                trust.list_entries()?
            };
            print_entries(if *revoked { "Revoked fingerprints" } else { "Trust store" }, &entries);
            Ok(())
        }
        TrustAction::Search { query } => {
            let hits = trust.search_trust_entries(query)?;
            let entries: Vec<TrustEntry> = hits.into_iter().map(|h| h.entry).collect();
            print_entries(&format!("Matches for '{query}'"), &entries);
            Ok(())
        }
        TrustAction::Export { format, output: path } => {
            let format: TransferFormat = format.parse()?;
            let data = trust.export_trust_store(format)?;
            match path {
                Some(p) => {
                    std::fs::write(p, data)?;
                    output::success(&format!("Exported trust store as {format} to {}", p.display()));
                }
                None => print!("{data}"),
            }
            Ok(())
        }
        TrustAction::Import { path, format } => {
            let format: TransferFormat = format.parse()?;
            let data = std::fs::read_to_string(path)?;
            auto_backup(&workspace)?;
            let report = trust.import_trust_store(&data, format)?;
            output::success(&format!(
                "Imported: {} added, {} revocations applied, {} unchanged",
                report.added, report.revocations_applied, report.unchanged
            ));
            Ok(())
        }
        TrustAction::Backup => {
            let path = trust.create_backup()?;
            output::success(&format!("Backup written to {}", path.display()));
            Ok(())
        }
        TrustAction::RestoreBackup { path } => {
            auto_backup(&workspace)?;
            let count = trust.restore_from_backup(path)?;
            output::success(&format!("Restored {count} entries from {}", path.display()));
            Ok(())
        }
        TrustAction::Cleanup => {
            let count = trust.cleanup_expired()?;
            output::success(&format!("Deactivated {count} expired entries"));
            Ok(())
        }
    }
}

/// Exit status 2 when the key is not trusted, so scripts can branch on it.
fn execute_verify(trust: &TrustManager<JsonTrustStore>, path: &Path) -> Result<()> {
    let pem = std::fs::read_to_string(path)?;
    let verification = trust.verify_key_trust(&pem)?;

    output::field("Fingerprint", &verification.fingerprint);
    if verification.trusted {
        output::success(&verification.reason);
        Ok(())
    } else {
        output::warning(&verification.reason);
        std::process::exit(2);
    }
}

fn execute_show(trust: &TrustManager<JsonTrustStore>, fingerprint: &str) -> Result<()> {
    let entry = trust.get_trust_entry(fingerprint)?;

    output::header(entry.fingerprint.as_str());
    output::field("Status", &output::status_label(entry.status()));
    output::field("Added", &format!("{} by {}", entry.added_at.to_rfc3339(), entry.added_by));
    output::field("Source", &entry.source);
    if let Some(key_id) = &entry.key_id {
        output::field("Key id", key_id);
    }
    if !entry.notes.is_empty() {
        output::field("Notes", &entry.notes);
    }
    if let Some(at) = entry.expires_at {
        output::field("Expires", &at.to_rfc3339());
    }
    if !entry.is_active {
        output::field("Active", "no");
    }
    if let Some(reason) = &entry.revocation_reason {
        output::field("Revoked for", reason);
    }

    let trail = trust.audit_trail(fingerprint)?;
    if !trail.is_empty() {
        output::header("History");
        for event in trail {
            println!(
                "  {} {} {}",
                event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                event.action.as_str(),
                event.detail.unwrap_or_default().dimmed(),
            );
        }
    }
    Ok(())
}

fn print_entries(title: &str, entries: &[TrustEntry]) {
    output::header(&format!("{title} ({})", entries.len()));
    if entries.is_empty() {
        output::warning("No entries");
        return;
    }
    for entry in entries {
        println!(
            "  {} {:<10} {:<9} {}",
            entry.fingerprint,
            output::status_label(entry.status()),
            entry.source,
            entry.notes.dimmed(),
        );
    }
}

fn auto_backup(workspace: &Workspace) -> Result<()> {
    if workspace.config.trust.auto_backup {
        let path = workspace.trust.create_backup()?;
        output::success(&format!("Backup written to {}", path.display()));
    }
    Ok(())
}
