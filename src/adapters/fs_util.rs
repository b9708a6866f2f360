use std::fs;
use std::io::Write;
use std::path::Path;

use crate::core::errors::{KeyTrustError, Result};

/// Default number of attempts for a file-system operation.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Replace `path` with `contents` through a temp file in the same directory.
///
/// Readers see either the old or the new file, never a torn write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Run `op` up to `attempts` times, re-creating `dir` before each retry.
///
/// Directory re-creation is the only remediation. When the attempts are
/// used up the last error is returned wrapped with `operation` and `target`.
pub fn with_retry<T>(
    operation: &'static str,
    target: &str,
    dir: &Path,
    attempts: u32,
    mut op: impl FnMut() -> std::io::Result<T>,
) -> Result<T> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(source) if attempt >= attempts => {
                return Err(KeyTrustError::Storage {
                    operation,
                    target: target.to_string(),
                    source,
                });
            }
            Err(e) => {
                tracing::warn!(
                    operation,
                    target,
                    attempt,
                    error = %e,
                    "storage operation failed, recreating directory and retrying"
                );
                if let Err(dir_err) = fs::create_dir_all(dir) {
                    tracing::warn!(dir = %dir.display(), error = %dir_err, "could not recreate directory");
                }
                attempt += 1;
            }
        }
    }
}

/// Read a file, mapping "missing" to `None`.
pub fn read_optional(path: &Path) -> std::io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorKind;

    #[test]
    fn write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");

        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
    }

    #[test]
    fn retry_recreates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("gone");
        let path = nested.join("file.txt");

        let result = with_retry("write test file", "file.txt", &nested, 2, || {
            write_atomic(&path, b"hello")
        });

        assert!(result.is_ok());
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn retry_gives_up_after_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let mut calls = 0;

        let result: Result<()> = with_retry("always fails", "target", dir.path(), 3, || {
            calls += 1;
            Err(std::io::Error::other("boom"))
        });

        let err = result.unwrap_err();
        assert_eq!(calls, 3);
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert!(err.to_string().contains("always fails"));
    }

    #[test]
    fn read_optional_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_optional(&dir.path().join("nope")).unwrap().is_none());
    }
}
