//! Scan-root path validation.
//!
//! Resolves a user-supplied path and authorizes it for scanning before any
//! directory walk happens. System directories are refused outright so a
//! knowledge base can never be registered over `/etc` or friends.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Directories never accepted as a scan root, nor anything nested under
/// them. Compared case-insensitively against the canonicalized path.
const DENYLISTED_PREFIXES: &[&str] = &[
    "/root",
    "/etc",
    "/var",
    "/sys",
    "/proc",
    "/boot",
    "c:\\windows",
    "c:\\system",
    "c:\\program files",
];

/// Resolve and authorize a scan root.
///
/// Returns the canonicalized directory path, or the first failed check in
/// order: existence, directory-ness, read permission, denylist.
pub fn validate_scan_root(path: &Path) -> Result<PathBuf> {
    let resolved = std::fs::canonicalize(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
        std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(path.to_path_buf()),
        _ => Error::InvalidInput(format!("cannot resolve path {}: {e}", path.display())),
    })?;

    let meta = std::fs::metadata(&resolved)
        .map_err(|_| Error::NotFound(resolved.clone()))?;
    if !meta.is_dir() {
        return Err(Error::InvalidInput(format!(
            "not a directory: {}",
            resolved.display()
        )));
    }

    // Probe readability; a root we cannot list is useless downstream.
    if let Err(e) = std::fs::read_dir(&resolved) {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            return Err(Error::PermissionDenied(resolved));
        }
        return Err(Error::InvalidInput(format!(
            "cannot read directory {}: {e}",
            resolved.display()
        )));
    }

    let lowered = resolved.to_string_lossy().to_lowercase();
    for prefix in DENYLISTED_PREFIXES {
        if lowered.starts_with(prefix) {
            tracing::warn!(path = %resolved.display(), "refused scan root in system directory");
            return Err(Error::SecurityViolation(resolved));
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let resolved = validate_scan_root(tmp.path()).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.is_dir());
    }

    #[test]
    fn missing_path_is_not_found() {
        let tmp = tempfile::TempDir::new().unwrap();
        let missing = tmp.path().join("does-not-exist");
        assert!(matches!(
            validate_scan_root(&missing),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn file_is_invalid_input() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("plain.txt");
        std::fs::write(&file, "hello").unwrap();
        assert!(matches!(
            validate_scan_root(&file),
            Err(Error::InvalidInput(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn system_directory_is_refused() {
        assert!(matches!(
            validate_scan_root(Path::new("/etc")),
            Err(Error::SecurityViolation(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn nested_system_path_is_refused() {
        assert!(matches!(
            validate_scan_root(Path::new("/proc/self")),
            Err(Error::SecurityViolation(_)) | Err(Error::InvalidInput(_))
        ));
    }
}
