//! Plain-text extraction and word-window chunking

use std::path::Path;

use async_trait::async_trait;

use super::TextExtractor;
use crate::error::{Error, Result};

/// Rows shown in the CSV rendering
const CSV_SAMPLE_ROWS: usize = 10;

/// Split text into windows of `size` words overlapping by `overlap` words.
///
/// Text of at most `size` words comes back as a single chunk. The final
/// window is kept even when shorter than `size`.
pub fn chunk_words(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let size = size.max(1);
    if words.len() <= size {
        return vec![words.join(" ")];
    }

    let step = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end >= words.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Extracts text from txt, md and csv files.
///
/// PDF and DOCX need a dedicated extractor and are reported as unsupported.
#[derive(Debug, Default, Clone)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub fn new() -> Self {
        Self
    }

    fn render_csv(name: &str, raw: &str) -> String {
        let mut lines = raw.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next().unwrap_or_default();
        let rows: Vec<&str> = lines.collect();

        let mut out = format!(
            "CSV File: {name}\nColumns: {}\nRows: {}\n\nSample data:\n",
            header.split(',').map(str::trim).collect::<Vec<_>>().join(", "),
            rows.len()
        );
        for row in rows.iter().take(CSV_SAMPLE_ROWS) {
            out.push_str(row);
            out.push('\n');
        }
        out
    }
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, path: &Path) -> Result<String> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "txt" | "md" => Ok(tokio::fs::read_to_string(path).await?),
            "csv" => {
                let raw = tokio::fs::read_to_string(path).await?;
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default();
                Ok(Self::render_csv(name, &raw))
            }
            "pdf" | "docx" => Err(Error::capability(format!(
                "no extractor available for .{ext} files"
            ))),
            other => Err(Error::capability(format!("unsupported file type: .{other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        assert_eq!(chunk_words("a b c", 500, 50), vec!["a b c"]);
        assert!(chunk_words("   ", 500, 50).is_empty());
    }

    #[test]
    fn test_windows_overlap_and_keep_tail() {
        let chunks = chunk_words(&words(12), 5, 2);
        // starts at 0, 3, 6, 9
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], "w0 w1 w2 w3 w4");
        assert_eq!(chunks[1], "w3 w4 w5 w6 w7");
        assert_eq!(chunks[3], "w9 w10 w11");
    }

    #[test]
    fn test_overlap_not_smaller_than_size_still_advances() {
        let chunks = chunk_words(&words(4), 2, 5);
        assert_eq!(chunks, vec!["w0 w1", "w1 w2", "w2 w3"]);
    }

    #[tokio::test]
    async fn test_extract_csv_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.csv");
        std::fs::write(&path, "name, age\nada,36\ngrace,45\n").unwrap();

        let text = PlainTextExtractor.extract(&path).await.unwrap();
        assert!(text.starts_with("CSV File: people.csv"));
        assert!(text.contains("Columns: name, age"));
        assert!(text.contains("Rows: 2"));
        assert!(text.contains("grace,45"));
    }

    #[tokio::test]
    async fn test_extract_pdf_is_capability_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let err = PlainTextExtractor.extract(&path).await.unwrap_err();
        assert!(matches!(err, Error::Capability(_)));
    }
}
