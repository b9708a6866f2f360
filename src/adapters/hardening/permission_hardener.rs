use std::path::PathBuf;

use crate::core::traits::hardening::{FileHardener, HardeningReport};

/// Restricts key files to their owner (mode 0600) on unix.
///
/// Other platforms report `secured = false` without touching the files.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissionHardener;

impl FileHardener for PermissionHardener {
    #[cfg(unix)]
    fn secure_files(&self, files: &[PathBuf]) -> HardeningReport {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let mut report = HardeningReport {
            secured: true,
            details: Vec::new(),
        };

        for file in files {
            match fs::set_permissions(file, fs::Permissions::from_mode(0o600)) {
                Ok(()) => report.details.push(format!("{}: mode 0600", file.display())),
                Err(e) => {
                    report.secured = false;
                    report.details.push(format!("{}: {e}", file.display()));
                }
            }
        }

        report
    }

    #[cfg(not(unix))]
    fn secure_files(&self, files: &[PathBuf]) -> HardeningReport {
        HardeningReport {
            secured: false,
            details: files
                .iter()
                .map(|f| format!("{}: permission hardening not supported here", f.display()))
                .collect(),
        }
    }
}
