use std::path::PathBuf;

/// What the file hardening hook reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardeningReport {
    pub secured: bool,
    pub details: Vec<String>,
}

/// Post-write hook that restricts access to freshly written key files.
///
/// Failures are reported, never raised: key generation must not fail
/// because permissions could not be tightened.
pub trait FileHardener: Send + Sync {
    fn secure_files(&self, files: &[PathBuf]) -> HardeningReport;
}
