use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::config::app_config::AuditSection;
use crate::core::errors::{KeyTrustError, Result};
use crate::core::models::audit_entry::AuditEntry;
use crate::core::traits::audit::AuditLogger;

/// Audit logger that appends entries as JSON lines to a file.
///
/// Each line is one self-contained `AuditEntry`, so appends never
/// rewrite earlier history and reads can stream line by line.
pub struct JsonAuditLogger {
    log_path: PathBuf,
}

impl JsonAuditLogger {
    /// Create a logger that writes to `{data_dir}/{log_file}`.
    pub fn new(data_dir: &Path, log_file: &str) -> Self {
        Self {
            log_path: data_dir.join(log_file),
        }
    }

    /// Create a logger from the `[audit]` section, falling back to
    /// `audit.log` when the section is missing.
    pub fn from_config(data_dir: &Path, audit_section: Option<&AuditSection>) -> Self {
        let log_file = audit_section
            .map(|a| a.log_file.as_str())
            .unwrap_or("audit.log");
        Self::new(data_dir, log_file)
    }

    /// Auditing is on unless the section explicitly disables it.
    pub fn is_enabled(audit_section: Option<&AuditSection>) -> bool {
        audit_section.map(|a| a.enabled).unwrap_or(true)
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn storage_error(&self, operation: &'static str, source: std::io::Error) -> KeyTrustError {
        KeyTrustError::Storage {
            operation,
            target: self.log_path.display().to_string(),
            source,
        }
    }
}

impl AuditLogger for JsonAuditLogger {
    fn log_event(&self, entry: &AuditEntry) -> Result<()> {
        let line =
            serde_json::to_string(entry).map_err(|e| KeyTrustError::format("audit entry", e))?;

        if let Some(parent) = self.log_path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| self.storage_error("create audit directory", e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| self.storage_error("open audit log", e))?;

        writeln!(file, "{line}").map_err(|e| self.storage_error("append audit entry", e))?;

        Ok(())
    }

    fn query(&self, target: Option<&str>, since: Option<DateTime<Utc>>) -> Result<Vec<AuditEntry>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&self.log_path).map_err(|e| self.storage_error("read audit log", e))?;

        let reader = BufReader::new(file);
        let mut entries = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| self.storage_error("read audit log", e))?;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let entry: AuditEntry = serde_json::from_str(trimmed).map_err(|e| {
                KeyTrustError::format("audit log", format!("line {}: {e}", line_num + 1))
            })?;

            if let Some(wanted) = target
                && !entry.target.eq_ignore_ascii_case(wanted)
            {
                continue;
            }

            if let Some(since_date) = since
                && entry.timestamp < since_date
            {
                continue;
            }

            entries.push(entry);
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::audit_entry::AuditAction;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample_entry(target: &str, action: AuditAction) -> AuditEntry {
        AuditEntry {
            timestamp: Utc::now(),
            actor: "alice".to_string(),
            action,
            target: target.to_string(),
            detail: None,
        }
    }

    #[test]
    fn log_and_query_round_trip() {
        let tmp = TempDir::new().unwrap();
        let logger = JsonAuditLogger::new(tmp.path(), "audit.log");

        logger
            .log_event(&sample_entry("key_1", AuditAction::KeyGenerate))
            .unwrap();

        let results = logger.query(None, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].target, "key_1");
        assert_eq!(results[0].action, AuditAction::KeyGenerate);
    }

    #[test]
    fn filter_by_target() {
        let tmp = TempDir::new().unwrap();
        let logger = JsonAuditLogger::new(tmp.path(), "audit.log");

        logger
            .log_event(&sample_entry("aa", AuditAction::TrustAdd))
            .unwrap();
        logger
            .log_event(&sample_entry("bb", AuditAction::TrustAdd))
            .unwrap();
        logger
            .log_event(&sample_entry("aa", AuditAction::TrustRevoke))
            .unwrap();

        let results = logger.query(Some("AA"), None).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].action, AuditAction::TrustRevoke);
    }

    #[test]
    fn filter_by_since() {
        let tmp = TempDir::new().unwrap();
        let logger = JsonAuditLogger::new(tmp.path(), "audit.log");

        let old = AuditEntry {
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            ..sample_entry("aa", AuditAction::Init)
        };
        let recent = AuditEntry {
            timestamp: Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap(),
            ..sample_entry("bb", AuditAction::TrustAdd)
        };

        logger.log_event(&old).unwrap();
        logger.log_event(&recent).unwrap();

        let cutoff = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let results = logger.query(None, Some(cutoff)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].target, "bb");
    }

    #[test]
    fn malformed_line_is_a_format_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("audit.log"), "{broken\n").unwrap();
        let logger = JsonAuditLogger::new(tmp.path(), "audit.log");

        let err = logger.query(None, None).unwrap_err();
        assert_eq!(err.kind(), crate::core::errors::ErrorKind::FormatError);
    }

    #[test]
    fn query_nonexistent_file_returns_empty() {
        let logger = JsonAuditLogger::new(Path::new("/nonexistent"), "audit.log");
        assert!(logger.query(None, None).unwrap().is_empty());
    }

    #[test]
    fn is_enabled_respects_config() {
        let disabled = AuditSection {
            enabled: false,
            log_file: "audit.log".to_string(),
        };

        assert!(JsonAuditLogger::is_enabled(None));
        assert!(!JsonAuditLogger::is_enabled(Some(&disabled)));
    }
}
