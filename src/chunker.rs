//! Boundary-aware text chunker.
//!
//! Splits normalized document text into overlapping [`TextChunk`]s
//! according to the configured [`ChunkingConfig`]. Cuts prefer paragraph
//! breaks, then sentence terminators, scanning backward within a bounded
//! lookback window from the target cut point. Deterministic for identical
//! inputs: chunk indices are contiguous from 0 and start offsets strictly
//! increase, so downstream ordering never depends on traversal luck.
//!
//! All offsets are character offsets into the normalized text.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::models::{DocumentMetadata, TextChunk};

/// Backward search window for a paragraph break (blank line).
const PARAGRAPH_LOOKBACK: usize = 200;
/// Backward search window for a sentence terminator.
const SENTENCE_LOOKBACK: usize = 100;
/// Characters that end a sentence, covering ASCII and CJK punctuation.
const SENTENCE_ENDINGS: &[char] = &['.', '!', '?', '\u{3002}', '\u{ff01}', '\u{ff1f}', '\n'];

/// Fraction of CJK code points above which the text is tagged `"zh"`.
const CJK_THRESHOLD: f64 = 0.3;

/// Split `text` into chunks for one document.
///
/// Empty or whitespace-only text yields no chunks; text shorter than
/// `min_chunk_size` yields exactly one chunk holding the whole trimmed
/// text.
pub fn chunk_text(
    text: &str,
    metadata: &DocumentMetadata,
    strategy: &ChunkingConfig,
) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let normalized = normalize_whitespace(text);
    let chars: Vec<char> = normalized.chars().collect();
    let text_length = chars.len();
    let language = detect_language(&chars);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut chunk_index = 0usize;

    tracing::debug!(
        path = %metadata.relative_path,
        chars = text_length,
        "chunking document"
    );

    while start < text_length {
        let target_end = (start + strategy.chunk_size).min(text_length);
        let mut actual_end = find_chunk_boundary(&chars, start, target_end, strategy);

        let mut content = slice_trimmed(&chars, start, actual_end);

        if content.chars().count() < strategy.min_chunk_size && actual_end < text_length {
            actual_end = (start + strategy.min_chunk_size).min(text_length);
            content = slice_trimmed(&chars, start, actual_end);
        } else if content.chars().count() > strategy.max_chunk_size {
            actual_end = start + strategy.max_chunk_size;
            content = slice_trimmed(&chars, start, actual_end);
        }

        if !content.is_empty() {
            let char_count = content.chars().count();
            let content_hash = hash_content(&content);
            chunks.push(TextChunk {
                chunk_index,
                content,
                document_path: metadata.relative_path.clone(),
                start_offset: start,
                end_offset: actual_end,
                char_count,
                language: language.clone(),
                file_type: metadata.extension.clone(),
                encoding: metadata.encoding.clone(),
                content_hash,
            });
            chunk_index += 1;
        }

        if actual_end >= text_length {
            break;
        }

        // Overlap the next chunk, but never let start regress.
        let next_start = actual_end.saturating_sub(strategy.chunk_overlap);
        start = (start + 1).max(next_start).min(actual_end);
    }

    tracing::debug!(
        path = %metadata.relative_path,
        chunks = chunks.len(),
        "chunking complete"
    );
    chunks
}

/// Collapse runs of blank lines to one blank line, runs of horizontal
/// whitespace to one space, and trim the whole text.
pub fn normalize_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut pending_blank = false;

    for raw_line in text.lines() {
        let line = collapse_horizontal(raw_line);
        if line.trim().is_empty() {
            pending_blank = !lines.is_empty();
            continue;
        }
        if pending_blank {
            lines.push(String::new());
            pending_blank = false;
        }
        lines.push(line);
    }

    lines.join("\n").trim().to_string()
}

fn collapse_horizontal(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_run = false;
    for c in line.chars() {
        if c == ' ' || c == '\t' {
            if !in_run {
                out.push(' ');
                in_run = true;
            }
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

/// Tag the dominant language: `"zh"` when CJK code points exceed the
/// threshold, `"en"` otherwise, `"unknown"` for empty input.
pub fn detect_language(chars: &[char]) -> String {
    if chars.is_empty() {
        return "unknown".to_string();
    }
    let cjk = chars
        .iter()
        .filter(|c| ('\u{4e00}'..='\u{9fff}').contains(*c))
        .count();
    if (cjk as f64) > (chars.len() as f64) * CJK_THRESHOLD {
        "zh".to_string()
    } else {
        "en".to_string()
    }
}

/// Pick the cut point for a chunk ending near `target_end`.
///
/// Prefers a paragraph break, then a sentence terminator, each searched
/// backward within its lookback window; otherwise cuts exactly at
/// `target_end`.
fn find_chunk_boundary(
    chars: &[char],
    start: usize,
    target_end: usize,
    strategy: &ChunkingConfig,
) -> usize {
    if target_end >= chars.len() {
        return chars.len();
    }

    if strategy.respect_paragraph_boundaries {
        let floor = target_end.saturating_sub(PARAGRAPH_LOOKBACK).max(start);
        let mut i = target_end;
        while i > floor {
            if i + 1 < chars.len() && chars[i] == '\n' && chars[i + 1] == '\n' {
                return i + 2;
            }
            i -= 1;
        }
    }

    if strategy.respect_sentence_boundaries {
        let floor = target_end.saturating_sub(SENTENCE_LOOKBACK).max(start);
        let mut i = target_end;
        while i > floor {
            if i < chars.len() && SENTENCE_ENDINGS.contains(&chars[i]) {
                return i + 1;
            }
            i -= 1;
        }
    }

    target_end
}

fn slice_trimmed(chars: &[char], start: usize, end: usize) -> String {
    chars[start..end.min(chars.len())]
        .iter()
        .collect::<String>()
        .trim()
        .to_string()
}

fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn metadata() -> DocumentMetadata {
        DocumentMetadata {
            absolute_path: PathBuf::from("/kb/doc.txt"),
            relative_path: "doc.txt".into(),
            size_bytes: 0,
            extension: ".txt".into(),
            mime_type: Some("text/plain".into()),
            modified_time: Utc::now(),
            encoding: Some("utf-8".into()),
        }
    }

    fn strategy() -> ChunkingConfig {
        ChunkingConfig::default()
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", &metadata(), &strategy()).is_empty());
        assert!(chunk_text("   \n\n  \t ", &metadata(), &strategy()).is_empty());
    }

    #[test]
    fn short_text_yields_single_whole_chunk() {
        let chunks = chunk_text("Tiny note.", &metadata(), &strategy());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].content, "Tiny note.");
        assert_eq!(chunks[0].start_offset, 0);
    }

    #[test]
    fn text_of_exactly_min_size_is_one_chunk() {
        let s = strategy();
        let text = "a".repeat(s.min_chunk_size);
        let chunks = chunk_text(&text, &metadata(), &s);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].char_count, s.min_chunk_size);
    }

    #[test]
    fn indices_contiguous_and_starts_strictly_increase() {
        let text = (0..200)
            .map(|i| format!("Sentence number {i} keeps the text flowing."))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text(&text, &metadata(), &strategy());
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert!(c.start_offset < c.end_offset);
            if i > 0 {
                assert!(c.start_offset > chunks[i - 1].start_offset);
            }
        }
    }

    #[test]
    fn overlap_scenario_two_chunks() {
        // 1600 chars of "A." with size=1000/overlap=100/min=50/max=2000.
        let text = "A.".repeat(800);
        let s = ChunkingConfig {
            chunk_size: 1000,
            chunk_overlap: 100,
            respect_sentence_boundaries: true,
            respect_paragraph_boundaries: true,
            min_chunk_size: 50,
            max_chunk_size: 2000,
        };
        let chunks = chunk_text(&text, &metadata(), &s);
        assert_eq!(chunks.len(), 2);
        let second = &chunks[1];
        assert!(second.char_count >= 50 && second.char_count <= 2000);
        assert!(second.start_offset < chunks[0].end_offset);
    }

    #[test]
    fn paragraph_boundary_is_preferred() {
        let para_a = "alpha ".repeat(150).trim_end().to_string(); // ~900 chars
        let para_b = "beta ".repeat(100).trim_end().to_string();
        let text = format!("{para_a}\n\n{para_b}");
        let chunks = chunk_text(&text, &metadata(), &strategy());
        // The first cut lands on the blank line, so chunk 0 is exactly para_a.
        assert_eq!(chunks[0].content, para_a);
    }

    #[test]
    fn max_chunk_size_truncates() {
        let text = "x".repeat(3000);
        let s = ChunkingConfig {
            chunk_size: 2500,
            chunk_overlap: 0,
            respect_sentence_boundaries: false,
            respect_paragraph_boundaries: false,
            min_chunk_size: 10,
            max_chunk_size: 1000,
        };
        let chunks = chunk_text(&text, &metadata(), &s);
        assert!(chunks.iter().all(|c| c.char_count <= 1000));
    }

    #[test]
    fn deterministic_across_calls() {
        let text = "Alpha beats beta.\n\nGamma follows delta. ".repeat(60);
        let a = chunk_text(&text, &metadata(), &strategy());
        let b = chunk_text(&text, &metadata(), &strategy());
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.content, y.content);
            assert_eq!(x.start_offset, y.start_offset);
            assert_eq!(x.content_hash, y.content_hash);
        }
    }

    #[test]
    fn cjk_heavy_text_detected_as_zh() {
        let text = "\u{4e2d}\u{6587}\u{5167}\u{5bb9}\u{6e2c}\u{8a66} ok";
        let chunks = chunk_text(text, &metadata(), &strategy());
        assert_eq!(chunks[0].language, "zh");
    }

    #[test]
    fn whitespace_normalization_rules() {
        let text = "first  line\t\there\n\n\n\nsecond   paragraph\n";
        assert_eq!(
            normalize_whitespace(text),
            "first line here\n\nsecond paragraph"
        );
    }

    #[test]
    fn coverage_has_no_gaps_beyond_lookback() {
        let text = "word ".repeat(1000);
        let s = strategy();
        let chunks = chunk_text(&text, &metadata(), &s);
        for pair in chunks.windows(2) {
            // Each chunk starts at or before the previous end (overlap), so
            // coverage of the normalized text is contiguous.
            assert!(pair[1].start_offset <= pair[0].end_offset);
        }
    }
}
