use colored::Colorize;
use secrecy::SecretString;

use keytrust::adapters::key_stores::file_key_store::FileKeyStore;
use keytrust::core::errors::{KeyTrustError, Result};
use keytrust::core::models::key_metadata::{KeyListing, KeyMetadata};
use keytrust::core::services::key_manager::KeyManager;

use crate::cli::KeysAction;
use crate::cli::context::Workspace;
use crate::cli::output;

/// Execute the `keytrust keys` command.
pub fn execute(action: &KeysAction) -> Result<()> {
    let workspace = Workspace::open()?;
    let manager = workspace.key_manager()?;

    match action {
        KeysAction::Generate { id, passphrase_env } => {
            execute_generate(&manager, id.as_deref(), passphrase_env.as_deref())
        }
        KeysAction::Rotate { passphrase_env } => execute_rotate(&manager, passphrase_env.as_deref()),
        KeysAction::Archive { id } => {
            let meta = manager.archive_key(id)?;
            output::success(&format!("Archived key {}", meta.key_id));
            Ok(())
        }
        KeysAction::Delete { id } => {
            let meta = manager.delete_key(id)?;
            output::success(&format!("Deleted key {} ({})", meta.key_id, meta.fingerprint.short()));
            Ok(())
        }
        KeysAction::Export { id, output: path } => {
            let pem = manager.export_public_key(id, path.as_deref())?;
            match path {
                Some(p) => output::success(&format!("Public key written to {}", p.display())),
                None => print!("{pem}"),
            }
            Ok(())
        }
        KeysAction::Import { id, path, trust } => {
            let meta = manager.import_public_key(id, path, *trust)?;
            output::success(&format!("Imported {} key {}", meta.algorithm, meta.key_id));
            output::field("Fingerprint", meta.fingerprint.as_str());
            if *trust {
                output::success("Fingerprint added to the trust store");
            }
            Ok(())
        }
        KeysAction::List => execute_list(&manager),
        KeysAction::Stats => execute_stats(&manager),
    }
}

fn execute_generate(
    manager: &KeyManager<FileKeyStore>,
    id: Option<&str>,
    passphrase_env: Option<&str>,
) -> Result<()> {
    let passphrase = read_passphrase(passphrase_env)?;

    let spinner = output::spinner("Generating key pair...");
    let result = manager.generate_key_pair(id, passphrase.as_ref());
    spinner.finish_and_clear();
    let meta = result?;

    output::success(&format!("Generated {} key {}", meta.algorithm, meta.key_id));
    print_key_details(&meta);
    if manager.current_key_id()?.as_deref() == Some(meta.key_id.as_str()) {
        output::success("This is now the current key");
    }
    Ok(())
}

fn execute_rotate(manager: &KeyManager<FileKeyStore>, passphrase_env: Option<&str>) -> Result<()> {
    let passphrase = read_passphrase(passphrase_env)?;

    let spinner = output::spinner("Generating replacement key...");
    let result = manager.rotate_key(passphrase.as_ref());
    spinner.finish_and_clear();
    let rotation = result?;

    output::success(&format!("Archived {}", rotation.archived.key_id));
    output::success(&format!("Current key is now {}", rotation.current.key_id));
    print_key_details(&rotation.current);
    Ok(())
}

fn execute_list(manager: &KeyManager<FileKeyStore>) -> Result<()> {
    let keys = manager.list_keys()?;
    if keys.is_empty() {
        output::header("Keys");
        output::warning("No keys yet");
        println!("  Run 'keytrust keys generate' to create one.");
        return Ok(());
    }

    output::header(&format!("Keys ({})", keys.len()));
    for listing in &keys {
        print_listing(listing);
    }
    Ok(())
}

fn execute_stats(manager: &KeyManager<FileKeyStore>) -> Result<()> {
    let stats = manager.get_key_stats()?;

    output::header("Key statistics");
    output::field("Total", &stats.total.to_string());
    output::field("Active", &stats.active.to_string());
    output::field("Archived", &stats.archived.to_string());
    output::field("Imported", &stats.imported.to_string());
    output::field("Protected", &stats.passphrase_protected.to_string());
    for (algorithm, count) in &stats.by_algorithm {
        output::field(algorithm.as_str(), &count.to_string());
    }
    output::field("Current", stats.current_key_id.as_deref().unwrap_or("none"));

    output::header("Cache");
    let cache = &stats.cache;
    output::field("Entries", &format!("{}/{}", cache.size, cache.max_size));
    output::field("Hit rate", &format!("{:.1}%", cache.hit_rate));
    output::field("Evictions", &cache.evictions.to_string());
    Ok(())
}

fn print_key_details(meta: &KeyMetadata) {
    output::field("Fingerprint", meta.fingerprint.as_str());
    let protection = if meta.passphrase_protected {
        "passphrase"
    } else {
        "none (set --passphrase-env to encrypt)"
    };
    output::field("Protection", protection);
}

fn print_listing(listing: &KeyListing) {
    let meta = &listing.metadata;
    let marker = if listing.is_current {
        "*".green().to_string()
    } else {
        " ".to_string()
    };
    let state = if meta.is_archived() {
        "archived".dimmed().to_string()
    } else if meta.is_imported {
        "imported".blue().to_string()
    } else {
        "active".green().to_string()
    };
    let created = meta
        .created_at()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();

    println!(
        "  {marker} {:<28} {:<8} {:<9} {} {}",
        meta.key_id,
        meta.algorithm.as_str(),
        state,
        output::short(&meta.fingerprint),
        created.dimmed(),
    );
}

/// Read a passphrase from the named environment variable, if one was given.
fn read_passphrase(var: Option<&str>) -> Result<Option<SecretString>> {
    let Some(var) = var else {
        return Ok(None);
    };
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(Some(SecretString::from(value))),
        _ => Err(KeyTrustError::InvalidArgument {
            detail: format!("environment variable {var} is not set or empty"),
        }),
    }
}
