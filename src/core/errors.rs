use std::path::PathBuf;

/// Stable, machine-readable classification of a [`KeyTrustError`].
///
/// Callers branch on the kind, never on the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    WeakSecret,
    InvalidStateTransition,
    StorageFailure,
    FormatError,
    CryptoFailure,
    Timeout,
}

impl ErrorKind {
    /// Upper-snake code used in logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::WeakSecret => "WEAK_SECRET",
            ErrorKind::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            ErrorKind::StorageFailure => "STORAGE_FAILURE",
            ErrorKind::FormatError => "FORMAT_ERROR",
            ErrorKind::CryptoFailure => "CRYPTO_FAILURE",
            ErrorKind::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All domain errors for keytrust.
///
/// Each variant provides enough context to diagnose the issue
/// without needing a debugger.
#[derive(Debug, thiserror::Error)]
pub enum KeyTrustError {
    #[error("Invalid argument: {detail}")]
    InvalidArgument { detail: String },

    #[error(
        "Invalid key id '{key_id}'\n\n  \
         Key ids are 1-64 characters of letters, digits, '_', '-' or '.',\n  \
         and must not start with '.'."
    )]
    InvalidKeyId { key_id: String },

    #[error(
        "Invalid fingerprint '{fingerprint}'\n\n  \
         A fingerprint is the 64-character hex SHA-256 of the public key.\n  \
         Run 'keytrust keys list' to see the fingerprints of local keys."
    )]
    InvalidFingerprint { fingerprint: String },

    #[error("Key '{key_id}' not found\n\n  Run 'keytrust keys list' to see available keys.")]
    KeyNotFound { key_id: String },

    #[error("Fingerprint '{fingerprint}' is not in the trust store")]
    FingerprintNotFound { fingerprint: String },

    #[error("Policy '{policy_id}' not found\n\n  Run 'keytrust policy list' to see policies.")]
    PolicyNotFound { policy_id: String },

    #[error("Key '{key_id}' already exists")]
    KeyAlreadyExists { key_id: String },

    #[error(
        "Fingerprint '{fingerprint}' is already known to the trust store\n\n  \
         A known fingerprint cannot be added again, even after revocation.\n  \
         Use 'keytrust trust restore' to re-trust a revoked fingerprint."
    )]
    AlreadyTrustedOrKnown { fingerprint: String },

    #[error("Policy '{policy_id}' already exists")]
    PolicyAlreadyExists { policy_id: String },

    #[error(
        "Passphrase is too weak ({strength})\n\n  \
         Issues:\n    \
         → {}",
        .issues.join("\n    → ")
    )]
    WeakPassphrase {
        strength: String,
        issues: Vec<String>,
    },

    #[error(
        "No current key\n\n  \
         Rotation needs an active current key to archive.\n  \
         Generate one first: keytrust keys generate"
    )]
    NoActiveKey,

    #[error("Cannot {action} fingerprint '{fingerprint}': {reason}")]
    InvalidTransition {
        fingerprint: String,
        action: &'static str,
        reason: String,
    },

    #[error("Key '{key_id}' is archived and cannot be {action}")]
    KeyArchived { key_id: String, action: &'static str },

    #[error("{operation} failed for '{target}': {source}")]
    Storage {
        operation: &'static str,
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal state lock was poisoned while running {operation}")]
    LockPoisoned { operation: &'static str },

    #[error(
        "Invalid public key in {}: {detail}\n\n  \
         Expected a PEM file framed by\n    \
         -----BEGIN PUBLIC KEY-----\n    \
         -----END PUBLIC KEY-----",
        .path.display()
    )]
    InvalidPublicKey { path: PathBuf, detail: String },

    #[error("Malformed {what}: {detail}")]
    Format { what: &'static str, detail: String },

    #[error("Key operation failed: {reason}")]
    Crypto { reason: String },

    #[error(
        "Key generation timed out after {seconds}s\n\n  \
         Large RSA keys can take a while on slow machines.\n  \
         Raise [keys] generation_timeout_secs in keytrust.toml or pick a smaller key."
    )]
    GenerationTimeout { seconds: u64 },

    #[error("Invalid configuration: {detail}")]
    InvalidConfig { detail: String },

    #[error(
        "This data directory uses format version {found}, but this keytrust \
         only supports up to version {supported}."
    )]
    FormatVersionTooNew { found: u32, supported: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl KeyTrustError {
    /// The stable classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeyTrustError::InvalidArgument { .. }
            | KeyTrustError::InvalidKeyId { .. }
            | KeyTrustError::InvalidFingerprint { .. }
            | KeyTrustError::InvalidConfig { .. } => ErrorKind::InvalidArgument,
            KeyTrustError::KeyNotFound { .. }
            | KeyTrustError::FingerprintNotFound { .. }
            | KeyTrustError::PolicyNotFound { .. } => ErrorKind::NotFound,
            KeyTrustError::KeyAlreadyExists { .. }
            | KeyTrustError::AlreadyTrustedOrKnown { .. }
            | KeyTrustError::PolicyAlreadyExists { .. } => ErrorKind::AlreadyExists,
            KeyTrustError::WeakPassphrase { .. } => ErrorKind::WeakSecret,
            KeyTrustError::NoActiveKey
            | KeyTrustError::InvalidTransition { .. }
            | KeyTrustError::KeyArchived { .. } => ErrorKind::InvalidStateTransition,
            KeyTrustError::Storage { .. }
            | KeyTrustError::LockPoisoned { .. }
            | KeyTrustError::Io(_) => ErrorKind::StorageFailure,
            KeyTrustError::InvalidPublicKey { .. }
            | KeyTrustError::Format { .. }
            | KeyTrustError::FormatVersionTooNew { .. } => ErrorKind::FormatError,
            KeyTrustError::Crypto { .. } => ErrorKind::CryptoFailure,
            KeyTrustError::GenerationTimeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Shorthand for a state-transition rejection.
    pub(crate) fn transition(
        fingerprint: &str,
        action: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        KeyTrustError::InvalidTransition {
            fingerprint: fingerprint.to_string(),
            action,
            reason: reason.into(),
        }
    }

    /// Shorthand for a serialization or parse failure.
    pub(crate) fn format(what: &'static str, detail: impl std::fmt::Display) -> Self {
        KeyTrustError::Format {
            what,
            detail: detail.to_string(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KeyTrustError>;
