//! File content extraction.
//!
//! Turns file bytes into `(text, encoding_used)`. Text and code files go
//! through a prioritized encoding ladder; markdown additionally gets its
//! heading markers collapsed; PDF and OOXML documents are extracted
//! best-effort. Binary-document extraction never fails an ingestion run:
//! when it cannot produce text it degrades to a labeled placeholder naming
//! the file, so one broken document never blocks a whole knowledge base.

use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};
use crate::models::DocumentMetadata;
use crate::scanner;

/// Decoding attempts for text files, in priority order. Windows-1252 is
/// last because it accepts any byte sequence, making it the terminal
/// fallback of the ladder.
fn encoding_ladder() -> [(&'static str, &'static encoding_rs::Encoding); 4] {
    [
        ("utf-8", encoding_rs::UTF_8),
        ("gbk", encoding_rs::GBK),
        ("big5", encoding_rs::BIG5),
        ("windows-1252", encoding_rs::WINDOWS_1252),
    ]
}

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract text from a scanned file.
///
/// Returns the text and a label for the encoding (or extraction mode) used.
/// Fails with `UnreadableContent` only for text files no ladder encoding
/// can decode, and `UnsupportedFormat` for extensions the scanner should
/// not have let through.
pub fn extract_text(metadata: &DocumentMetadata) -> Result<(String, String)> {
    let ext = metadata.extension.as_str();
    let path = metadata.absolute_path.as_path();

    match ext {
        ".md" | ".markdown" => {
            let (content, encoding) = decode_text_file(path)?;
            Ok((normalize_markdown_headings(&content), encoding))
        }
        ".pdf" => Ok(extract_pdf(path)),
        ".docx" => Ok(extract_ooxml(path, OoxmlKind::Docx)),
        ".pptx" => Ok(extract_ooxml(path, OoxmlKind::Pptx)),
        ".xlsx" => Ok(extract_ooxml(path, OoxmlKind::Xlsx)),
        ".doc" | ".xls" | ".ppt" => Ok((placeholder_text(path, "legacy Office"), "placeholder".into())),
        _ if scanner::is_text_extension(ext) => decode_text_file(path),
        other => Err(Error::UnsupportedFormat(other.to_string())),
    }
}

/// Read and decode a text file, trying each ladder encoding until one
/// decodes without replacement errors.
fn decode_text_file(path: &Path) -> Result<(String, String)> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
        std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(path.to_path_buf()),
        _ => Error::Storage(format!("cannot read {}: {e}", path.display())),
    })?;

    let has_bom = bytes.starts_with(&[0xEF, 0xBB, 0xBF]);

    for (label, encoding) in encoding_ladder() {
        let (text, _, had_errors) = encoding.decode(&bytes);
        if !had_errors {
            let label = if label == "utf-8" && has_bom {
                "utf-8-sig"
            } else {
                label
            };
            tracing::debug!(path = %path.display(), encoding = label, "decoded text file");
            return Ok((text.into_owned(), label.to_string()));
        }
    }

    Err(Error::UnreadableContent(path.to_path_buf()))
}

/// Collapse multi-level markdown heading markers (`##`–`######`) to a
/// single `#`, preserving the heading text.
fn normalize_markdown_headings(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for (i, line) in content.lines().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let hashes = line.chars().take_while(|c| *c == '#').count();
        if (1..=6).contains(&hashes) {
            let rest = &line[hashes..];
            if rest.starts_with(char::is_whitespace) {
                out.push_str("# ");
                out.push_str(rest.trim_start());
                continue;
            }
        }
        out.push_str(line);
    }
    if content.ends_with('\n') {
        out.push('\n');
    }
    out
}

fn placeholder_text(path: &Path, kind: &str) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("[{kind} document] - {name}\n(content extraction unavailable for this file)")
}

fn extract_pdf(path: &Path) -> (String, String) {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read PDF, using placeholder");
            return (placeholder_text(path, "PDF"), "error".into());
        }
    };

    match pdf_extract::extract_text_from_mem(&bytes) {
        Ok(text) if !text.trim().is_empty() => (text, "pdf-extracted".into()),
        Ok(_) => (placeholder_text(path, "PDF"), "placeholder".into()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "PDF extraction failed, using placeholder");
            (placeholder_text(path, "PDF"), "error".into())
        }
    }
}

#[derive(Clone, Copy)]
enum OoxmlKind {
    Docx,
    Pptx,
    Xlsx,
}

impl OoxmlKind {
    fn label(&self) -> &'static str {
        match self {
            OoxmlKind::Docx => "Word",
            OoxmlKind::Pptx => "PowerPoint",
            OoxmlKind::Xlsx => "Excel",
        }
    }
}

fn extract_ooxml(path: &Path, kind: OoxmlKind) -> (String, String) {
    match try_extract_ooxml(path, kind) {
        Ok(text) if !text.trim().is_empty() => (text, "ooxml-extracted".into()),
        Ok(_) => (placeholder_text(path, kind.label()), "placeholder".into()),
        Err(reason) => {
            tracing::warn!(
                path = %path.display(),
                error = %reason,
                "OOXML extraction failed, using placeholder"
            );
            (placeholder_text(path, kind.label()), "error".into())
        }
    }
}

fn try_extract_ooxml(path: &Path, kind: OoxmlKind) -> std::result::Result<String, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes.as_slice())).map_err(|e| e.to_string())?;

    match kind {
        OoxmlKind::Docx => {
            let xml = read_zip_entry(&mut archive, "word/document.xml")?;
            collect_text_elements(&xml)
        }
        OoxmlKind::Pptx => {
            let mut slides: Vec<String> = archive
                .file_names()
                .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
                .map(|s| s.to_string())
                .collect();
            slides.sort_by_key(|name| {
                name.trim_start_matches("ppt/slides/slide")
                    .trim_end_matches(".xml")
                    .parse::<u32>()
                    .unwrap_or(u32::MAX)
            });
            let mut out = String::new();
            for name in slides {
                let xml = read_zip_entry(&mut archive, &name)?;
                let text = collect_text_elements(&xml)?;
                if !out.is_empty() && !text.is_empty() {
                    out.push('\n');
                }
                out.push_str(&text);
            }
            Ok(out)
        }
        OoxmlKind::Xlsx => {
            let xml = read_zip_entry(&mut archive, "xl/sharedStrings.xml")?;
            collect_text_elements(&xml)
        }
    }
}

fn read_zip_entry(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> std::result::Result<Vec<u8>, String> {
    let entry = archive.by_name(name).map_err(|e| e.to_string())?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(format!("ZIP entry {name} exceeds size limit"));
    }
    Ok(out)
}

/// Collect the character content of every `t` element (`w:t`, `a:t`,
/// shared-string `t`), separated by spaces.
fn collect_text_elements(xml: &[u8]) -> std::result::Result<String, String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                in_t = e.local_name().as_ref() == b"t";
            }
            Ok(quick_xml::events::Event::Text(te)) if in_t => {
                let text = te.unescape().unwrap_or_default();
                if !text.is_empty() {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(text.as_ref());
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
