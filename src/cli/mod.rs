pub mod commands;
pub mod context;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Generate, rotate and archive signing keys. Decide which fingerprints you trust.
#[derive(Parser, Debug)]
#[command(name = "keytrust", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory (default: ./.keytrust)
    #[arg(long, global = true, env = "KEYTRUST_DIR")]
    pub dir: Option<PathBuf>,

    /// Use the per-user data directory instead of ./.keytrust
    #[arg(long, global = true, conflicts_with = "dir")]
    pub global: bool,

    /// Verbose output (debug logging on stderr)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data directory with a default keytrust.toml
    Init,

    /// Generate, rotate and manage key pairs
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Manage trusted and revoked fingerprints
    Trust {
        #[command(subcommand)]
        action: TrustAction,
    },

    /// Manage trust policies
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// Show the audit log
    Log {
        /// Only entries for this key id, fingerprint or policy id
        #[arg(long)]
        target: Option<String>,
        /// Filter entries since this date (ISO 8601)
        #[arg(long)]
        since: Option<String>,
        /// Show last N entries
        #[arg(long)]
        last: Option<usize>,
    },

    /// Show keys, trust store and configuration at a glance
    Status,
}

#[derive(Subcommand, Debug)]
pub enum KeysAction {
    /// Generate a new key pair
    Generate {
        /// Key id (default: generated)
        #[arg(long)]
        id: Option<String>,
        /// Read the private key passphrase from this environment variable
        #[arg(long, value_name = "VAR")]
        passphrase_env: Option<String>,
    },
    /// Archive the current key and generate its replacement
    Rotate {
        /// Read the new key's passphrase from this environment variable
        #[arg(long, value_name = "VAR")]
        passphrase_env: Option<String>,
    },
    /// Archive a key without replacing it
    Archive {
        /// Key id
        id: String,
    },
    /// Delete a key, its files and its metadata
    Delete {
        /// Key id
        id: String,
    },
    /// Print or write a public key
    Export {
        /// Key id
        id: String,
        /// Write the PEM to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Register an external public key
    Import {
        /// Key id to register it under
        id: String,
        /// PEM file with a PUBLIC KEY block
        path: PathBuf,
        /// Also trust its fingerprint
        #[arg(long)]
        trust: bool,
    },
    /// List keys, newest first
    List,
    /// Show key counts and cache statistics
    Stats,
}

#[derive(Subcommand, Debug)]
pub enum TrustAction {
    /// Trust a fingerprint
    Add {
        /// 64-character hex fingerprint
        fingerprint: String,
        /// Free-form note stored with the entry
        #[arg(long)]
        note: Option<String>,
        /// Key id this fingerprint belongs to
        #[arg(long)]
        key_id: Option<String>,
        /// Stop trusting after this date (YYYY-MM-DD)
        #[arg(long)]
        expires: Option<String>,
    },
    /// Revoke a trusted fingerprint
    Revoke {
        fingerprint: String,
        #[arg(long)]
        reason: String,
    },
    /// Re-trust a revoked fingerprint
    Restore {
        fingerprint: String,
        #[arg(long)]
        reason: String,
    },
    /// Permanently revoke a fingerprint
    Ban {
        fingerprint: String,
        #[arg(long)]
        reason: String,
    },
    /// Check whether a public key file is trusted
    Verify {
        /// PEM file with a PUBLIC KEY block
        path: PathBuf,
    },
    /// Show one entry and its audit trail
    Show { fingerprint: String },
    /// List trust entries
    List {
        /// Only revoked entries
        #[arg(long)]
        revoked: bool,
    },
    /// Search entries by fingerprint, key id, author, source, notes or metadata
    Search { query: String },
    /// Export the trust store
    Export {
        #[arg(long, default_value = "json")]
        format: String,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Merge an export into the trust store
    Import {
        path: PathBuf,
        #[arg(long, default_value = "json")]
        format: String,
    },
    /// Snapshot the trust store into the backups directory
    Backup,
    /// Replace the trust store with a backup
    RestoreBackup { path: PathBuf },
    /// Deactivate entries whose expiry has passed
    Cleanup,
}

#[derive(Subcommand, Debug)]
pub enum PolicyAction {
    /// Create or replace a policy from a JSON file
    Add {
        file: PathBuf,
        /// Replace an existing policy with the same id
        #[arg(long)]
        replace: bool,
    },
    /// List policies, highest priority first
    List,
    /// Remove a policy
    Remove { id: String },
    /// Turn a policy on
    Enable { id: String },
    /// Turn a policy off without removing it
    Disable { id: String },
    /// Evaluate an operation against the active policies
    Eval {
        #[arg(long)]
        operation: String,
        #[arg(long)]
        fingerprint: Option<String>,
        #[arg(long)]
        key_name: Option<String>,
    },
}
