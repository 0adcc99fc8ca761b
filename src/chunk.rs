//! Text normalization and fixed-window chunking.
//!
//! Splitting uses contiguous character windows with overlap rather than a
//! tokenizer: windows of `size` characters advance by `size - overlap`, so
//! consecutive chunks share `overlap` characters of context across the
//! boundary. Windows with too few non-whitespace characters are dropped.
//!
//! Offsets are character-based, never byte-based: corpora are multilingual
//! and byte slicing would split UTF-8 sequences.

use crate::models::Chunk;

/// Canonicalize extracted text.
///
/// NUL bytes become spaces, runs of spaces/tabs collapse to one space, line
/// endings become `\n`, runs of three or more newlines collapse to exactly
/// two, and the result is trimmed. Idempotent.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());

    // Pass 1: NUL → space, CRLF/CR → \n, collapse space/tab runs.
    let mut chars = text.chars().peekable();
    let mut pending_space = false;
    while let Some(c) = chars.next() {
        let c = if c == '\0' { ' ' } else { c };
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                out.push('\n');
            }
            ' ' | '\t' => pending_space = true,
            '\n' => {
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                out.push('\n');
            }
            _ => {
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                out.push(c);
            }
        }
    }

    // Pass 2: collapse 3+ newlines to exactly two.
    let mut collapsed = String::with_capacity(out.len());
    let mut newline_run = 0usize;
    for c in out.chars() {
        if c == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                collapsed.push('\n');
            }
        } else {
            newline_run = 0;
            collapsed.push(c);
        }
    }

    collapsed.trim().to_string()
}

/// Split normalized text into overlapping character windows.
///
/// Window `k` spans `[start, start + size)` clamped to the text end; the next
/// window starts at `end - overlap`. Windows with fewer than `min_chars`
/// non-whitespace characters are dropped. Requires `size > overlap` (enforced
/// by config validation) so every step makes progress.
pub fn chunk_windows(text: &str, size: usize, overlap: usize, min_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut windows = Vec::new();

    if len == 0 {
        return windows;
    }

    let mut start = 0usize;
    loop {
        let end = (start + size).min(len);
        let window: String = chars[start..end].iter().collect();
        if window.chars().filter(|c| !c.is_whitespace()).count() >= min_chars {
            windows.push(window);
        }
        if end >= len {
            break;
        }
        start = end.saturating_sub(overlap);
    }

    windows
}

/// Build chunk records for one page of a document.
///
/// Ordinals count from 0 within the page; embeddings start absent and are
/// assigned by the ingestion pipeline after batch embedding.
pub fn build_chunks(
    doc_id: &str,
    doc_name: &str,
    page: u32,
    text: &str,
    size: usize,
    overlap: usize,
    min_chars: usize,
) -> Vec<Chunk> {
    chunk_windows(text, size, overlap, min_chars)
        .into_iter()
        .enumerate()
        .map(|(ordinal, window)| Chunk {
            id: Chunk::make_id(doc_id, page, ordinal as u32),
            doc_id: doc_id.to_string(),
            doc_name: doc_name.to_string(),
            page,
            ordinal: ordinal as u32,
            text: window,
            embedding: None,
            extra: Default::default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_replaces_nul_and_collapses_spaces() {
        assert_eq!(normalize("a\0b"), "a b");
        assert_eq!(normalize("a  \t  b"), "a b");
    }

    #[test]
    fn normalize_canonicalizes_line_endings() {
        assert_eq!(normalize("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn normalize_collapses_newline_runs() {
        assert_eq!(normalize("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(normalize("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn normalize_trims() {
        assert_eq!(normalize("  \n hello \n  "), "hello");
    }

    #[test]
    fn normalize_is_idempotent() {
        let raw = "  a\0\tb\r\n\r\n\r\n\r\nc   d  \n";
        let once = normalize(raw);
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn empty_text_yields_no_windows() {
        assert!(chunk_windows("", 1200, 200, 30).is_empty());
    }

    #[test]
    fn short_fragment_is_dropped() {
        assert!(chunk_windows("too short", 1200, 200, 30).is_empty());
    }

    #[test]
    fn consecutive_windows_overlap_exactly() {
        let text: String = "abcdefghij".repeat(300); // 3000 chars, no whitespace
        let windows = chunk_windows(&text, 1200, 200, 30);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].chars().count(), 1200);
        assert_eq!(windows[1].chars().count(), 1200);
        // Window 2 starts at 1000, window 3 at 2000; last spans 2000..3000.
        assert_eq!(windows[2].chars().count(), 1000);
        let tail: String = windows[0].chars().skip(1000).collect();
        let head: String = windows[1].chars().take(200).collect();
        assert_eq!(tail, head);
    }

    #[test]
    fn windows_cover_the_whole_text() {
        let text: String = "x".repeat(2500);
        let windows = chunk_windows(&text, 1200, 200, 30);
        let covered: usize =
            windows.iter().map(|w| w.chars().count()).sum::<usize>() - 200 * (windows.len() - 1);
        assert_eq!(covered, 2500);
    }

    #[test]
    fn windows_are_char_indexed_not_byte_indexed() {
        // Multibyte text must not panic or split scalar values.
        let text: String = "가나다라마바사아자차".repeat(150); // 1500 chars
        let windows = chunk_windows(&text, 1200, 200, 30);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].chars().count(), 1200);
    }

    #[test]
    fn chunking_normalized_text_is_stable() {
        let raw = format!("A. B. C.\r\n\r\n\r\n{}", "lorem ipsum dolor sit amet ".repeat(100));
        let once = normalize(&raw);
        let twice = normalize(&once);
        assert_eq!(
            chunk_windows(&once, 1200, 200, 30),
            chunk_windows(&twice, 1200, 200, 30)
        );
    }

    #[test]
    fn build_chunks_tags_position() {
        let text = "hello world, this text is long enough to survive filtering".repeat(2);
        let chunks = build_chunks("doc-1", "a.txt", 3, &text, 1200, 200, 30);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "doc-1|p3|c0");
        assert_eq!(chunks[0].page, 3);
        assert_eq!(chunks[0].ordinal, 0);
        assert!(chunks[0].embedding.is_none());
    }
}
