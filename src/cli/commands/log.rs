use colored::Colorize;

use keytrust::core::errors::Result;
use keytrust::core::models::audit_entry::{AuditAction, AuditEntry};

use crate::cli::commands::parse_date;
use crate::cli::context::Workspace;
use crate::cli::output;

/// Execute the `keytrust log` command.
///
/// Displays the audit log with optional filters for target, date,
/// and entry count.
pub fn execute(target: Option<&str>, since: Option<&str>, last: Option<usize>) -> Result<()> {
    let workspace = Workspace::open()?;
    let Some(logger) = workspace.audit() else {
        output::header("keytrust log");
        output::warning("Auditing is disabled in keytrust.toml");
        return Ok(());
    };

    let since_dt = since.map(parse_date).transpose()?;
    let entries = logger.query(target, since_dt)?;

    if entries.is_empty() {
        output::header("keytrust log");
        output::warning("No audit entries found");
        if target.is_some() || since.is_some() {
            println!("  Try removing filters to see all entries.");
        }
        return Ok(());
    }

    // --last N keeps the newest N, still printed oldest first
    let skip = last.map_or(0, |n| entries.len().saturating_sub(n));
    let display = &entries[skip..];

    output::header(&format!("keytrust log ({} entries)", display.len()));
    println!();

    for entry in display {
        print_entry(entry);
    }

    Ok(())
}

fn print_entry(entry: &AuditEntry) {
    let date = entry.timestamp.format("%Y-%m-%d %H:%M:%S");
    let target = if entry.target.chars().count() > 24 {
        let head: String = entry.target.chars().take(16).collect();
        format!("{head}…")
    } else {
        entry.target.clone()
    };
    let detail = entry.detail.as_deref().unwrap_or("").dimmed().to_string();

    println!(
        "  {} {} {:<24} {:<10} {:<24} {}",
        date.to_string().dimmed(),
        "│".dimmed(),
        format_action(entry.action),
        entry.actor,
        target,
        detail,
    );
}

fn format_action(action: AuditAction) -> String {
    let name = action.as_str();
    match action {
        AuditAction::Init => name.cyan().to_string(),
        AuditAction::KeyGenerate | AuditAction::KeyImport | AuditAction::TrustAdd => {
            name.green().to_string()
        }
        AuditAction::KeyRotate | AuditAction::TrustRestore | AuditAction::TrustRestoreBackup => {
            name.blue().to_string()
        }
        AuditAction::KeyArchive | AuditAction::TrustRevoke | AuditAction::TrustExpire => {
            name.yellow().to_string()
        }
        AuditAction::KeyDelete | AuditAction::TrustPermanentRevoke | AuditAction::PolicyRemove => {
            name.red().to_string()
        }
        AuditAction::TrustImport | AuditAction::PolicyCreate | AuditAction::PolicyUpdate => {
            name.magenta().to_string()
        }
    }
}
