//! Recursive directory scanning.
//!
//! Enumerates eligible files under a validated scan root and produces
//! [`DocumentMetadata`] for each. Eligibility is extension-based: a fixed
//! allow-list of text/code formats plus a second list of binary document
//! formats that need specialized extraction. Oversized and unreadable
//! files are skipped with a warning, never failing the whole scan.

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::ScannerConfig;
use crate::error::{Error, Result};
use crate::models::DocumentMetadata;

/// Plain text, markup, source code, and structured config formats that can
/// be decoded directly.
pub const TEXT_EXTENSIONS: &[&str] = &[
    ".txt", ".md", ".markdown", ".rst", ".py", ".js", ".ts", ".jsx", ".tsx", ".html", ".htm",
    ".css", ".json", ".xml", ".yaml", ".yml", ".ini", ".cfg", ".conf", ".log", ".csv", ".sql",
    ".sh", ".bat", ".ps1", ".c", ".cpp", ".h", ".hpp", ".java", ".php", ".rb", ".go", ".rs",
];

/// Binary document formats routed through the specialized extractors.
pub const DOCUMENT_EXTENSIONS: &[&str] =
    &[".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx"];

pub fn is_text_extension(ext: &str) -> bool {
    TEXT_EXTENSIONS.contains(&ext)
}

pub fn is_document_extension(ext: &str) -> bool {
    DOCUMENT_EXTENSIONS.contains(&ext)
}

/// Recursively scan `root` (already validated) for eligible files.
///
/// Returns an empty vector, not an error, when nothing matches; the
/// orchestrator decides what that means for the run. Results are sorted by
/// relative path so downstream chunk_index assignment is deterministic
/// within a single invocation.
pub fn scan_directory(root: &Path, config: &ScannerConfig) -> Result<Vec<DocumentMetadata>> {
    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }

        let extension = match path.extension() {
            Some(ext) => format!(".{}", ext.to_string_lossy().to_lowercase()),
            None => continue,
        };
        if !is_text_extension(&extension) && !is_document_extension(&extension) {
            continue;
        }

        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot stat file, skipping");
                continue;
            }
        };

        if meta.len() > config.max_file_size {
            tracing::warn!(
                path = %path.display(),
                size = meta.len(),
                limit = config.max_file_size,
                "file exceeds size limit, skipping"
            );
            continue;
        }

        // Probe readability now so one unreadable file surfaces here as a
        // skip instead of failing extraction mid-run.
        if std::fs::File::open(path).is_err() {
            tracing::warn!(path = %path.display(), "no read permission, skipping");
            continue;
        }

        let modified = meta
            .modified()
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        let modified_time: DateTime<Utc> = modified.into();

        files.push(DocumentMetadata {
            absolute_path: path.to_path_buf(),
            relative_path: rel_str,
            size_bytes: meta.len(),
            mime_type: guess_mime_type(&extension),
            extension,
            modified_time,
            encoding: None,
        });
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    tracing::info!(root = %root.display(), count = files.len(), "scan complete");
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::InvalidInput(format!("bad exclude glob '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::InvalidInput(format!("cannot build exclude set: {e}")))
}

fn guess_mime_type(extension: &str) -> Option<String> {
    let mime = match extension {
        ".txt" | ".log" | ".conf" | ".cfg" | ".ini" => "text/plain",
        ".md" | ".markdown" => "text/markdown",
        ".html" | ".htm" => "text/html",
        ".css" => "text/css",
        ".csv" => "text/csv",
        ".json" => "application/json",
        ".xml" => "application/xml",
        ".yaml" | ".yml" => "application/yaml",
        ".js" | ".jsx" => "text/javascript",
        ".pdf" => "application/pdf",
        ".docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ".pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        ".xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ".doc" => "application/msword",
        ".xls" => "application/vnd.ms-excel",
        ".ppt" => "application/vnd.ms-powerpoint",
        _ => return None,
    };
    Some(mime.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> ScannerConfig {
        ScannerConfig::default()
    }

    #[test]
    fn finds_eligible_files_sorted() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.md"), "# B").unwrap();
        std::fs::write(tmp.path().join("a.txt"), "A").unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/c.rs"), "fn main() {}").unwrap();

        let files = scan_directory(tmp.path(), &default_config()).unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(rels, vec!["a.txt", "b.md", "sub/c.rs"]);
    }

    #[test]
    fn ignores_unknown_extensions_and_extensionless_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("binary.bin"), [0u8; 4]).unwrap();
        std::fs::write(tmp.path().join("Makefile"), "all:").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "ok").unwrap();

        let files = scan_directory(tmp.path(), &default_config()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "notes.txt");
    }

    #[test]
    fn oversized_file_is_skipped() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("big.txt"), "x".repeat(128)).unwrap();
        std::fs::write(tmp.path().join("small.txt"), "y").unwrap();

        let config = ScannerConfig {
            max_file_size: 64,
            ..Default::default()
        };
        let files = scan_directory(tmp.path(), &config).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "small.txt");
    }

    #[test]
    fn default_excludes_apply() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join(".git")).unwrap();
        std::fs::write(tmp.path().join(".git/config.txt"), "x").unwrap();
        std::fs::create_dir_all(tmp.path().join("node_modules/pkg")).unwrap();
        std::fs::write(tmp.path().join("node_modules/pkg/index.js"), "x").unwrap();
        std::fs::write(tmp.path().join("keep.md"), "x").unwrap();

        let files = scan_directory(tmp.path(), &default_config()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "keep.md");
    }

    #[test]
    fn empty_directory_yields_empty_vec() {
        let tmp = tempfile::TempDir::new().unwrap();
        let files = scan_directory(tmp.path(), &default_config()).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn document_extensions_are_eligible() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("report.pdf"), "%PDF-1.4").unwrap();
        let files = scan_directory(tmp.path(), &default_config()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].extension, ".pdf");
        assert_eq!(files[0].mime_type.as_deref(), Some("application/pdf"));
    }
}
