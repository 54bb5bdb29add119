use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::json;

use super::{AgentContext, AgentKind, AgentReply, INVALID_INPUT_MESSAGE, StepAgent};
use crate::capability::{Metadata, SharedExtractor, SharedStore};
use crate::config::ChunkConfig;
use crate::error::{Error, Result};

const NAME: &str = "FileAgent";
const PREVIEW_CHARS: usize = 200;
pub const SUPPORTED_EXTENSIONS: [&str; 5] = ["pdf", "docx", "txt", "md", "csv"];

static FILENAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([A-Za-z0-9_\-.]+\.(?:pdf|docx|txt|md|csv))\b").expect("valid regex")
});
static QUOTED_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)""#).expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOperation {
    List,
    Info,
    Ingest,
    Delete,
    Stats,
    Help,
}

/// One entry in the upload directory
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub extension: String,
}

impl FileEntry {
    pub fn is_supported(&self) -> bool {
        SUPPORTED_EXTENSIONS.contains(&self.extension.as_str())
    }
}

/// Manages documents in the upload directory and feeds them to the retrieval store
pub struct FileAgent {
    upload_dir: PathBuf,
    store: SharedStore,
    extractor: SharedExtractor,
    chunking: ChunkConfig,
    max_upload_bytes: u64,
}

impl FileAgent {
    pub fn new(
        upload_dir: impl Into<PathBuf>,
        store: SharedStore,
        extractor: SharedExtractor,
        chunking: ChunkConfig,
    ) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            store,
            extractor,
            chunking,
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }

    pub fn with_max_upload_bytes(mut self, max: u64) -> Self {
        self.max_upload_bytes = max;
        self
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    fn determine_operation(instruction: &str, has_filename: bool) -> FileOperation {
        let lower = instruction.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let any = |candidates: &[&str]| candidates.iter().any(|c| words.contains(c));

        if any(&["stats", "statistics", "summary"]) {
            FileOperation::Stats
        } else if any(&["delete", "remove"]) {
            FileOperation::Delete
        } else if any(&["info", "details", "about"]) && (lower.contains("file") || has_filename)
        {
            FileOperation::Info
        } else if any(&["process", "ingest", "upload", "add"]) {
            FileOperation::Ingest
        } else if any(&["list", "show", "files", "documents"]) {
            FileOperation::List
        } else {
            FileOperation::Help
        }
    }

    /// Pull a filename out of free text
    pub fn extract_filename(instruction: &str) -> Option<String> {
        if let Some(m) = FILENAME_PATTERN.captures(instruction) {
            return Some(m[1].to_string());
        }
        if let Some(m) = QUOTED_PATTERN.captures(instruction) {
            return Some(m[1].to_string());
        }
        instruction
            .split_whitespace()
            .find(|w| w.contains('.') && w.chars().count() > 3)
            .map(|w| w.trim_end_matches(['.', ',', '?', '!']).to_string())
    }

    /// Resolve a bare filename inside the upload directory
    fn resolve(&self, filename: &str) -> Result<PathBuf> {
        let path = Path::new(filename);
        let is_bare = path.components().count() == 1
            && !filename.contains("..")
            && !filename.contains(['/', '\\']);
        if !is_bare {
            return Err(Error::InvalidInput(format!(
                "'{filename}' is not a plain file name"
            )));
        }
        Ok(self.upload_dir.join(filename))
    }

    /// Files in the upload directory, newest first
    pub async fn list_files(&self) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.upload_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            entries.push(file_entry(entry.path(), &meta));
        }
        entries.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(entries)
    }

    async fn entry_for(&self, filename: &str) -> Result<Option<FileEntry>> {
        let path = self.resolve(filename)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(file_entry(path, &meta))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write an uploaded file into the upload directory
    pub async fn save_upload(&self, filename: &str, bytes: &[u8]) -> AgentReply {
        let path = match self.resolve(filename) {
            Ok(path) => path,
            Err(e) => return AgentReply::failure(NAME, e.to_string()),
        };
        if bytes.len() as u64 > self.max_upload_bytes {
            return AgentReply::failure(
                NAME,
                format!(
                    "File '{filename}' is {} which exceeds the {} upload limit.",
                    format_size(bytes.len() as u64),
                    format_size(self.max_upload_bytes)
                ),
            );
        }
        let ext = extension_of(&path);
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return AgentReply::failure(
                NAME,
                format!("File format not supported for {filename}"),
            );
        }
        let written = async {
            tokio::fs::create_dir_all(&self.upload_dir).await?;
            tokio::fs::write(&path, bytes).await
        }
        .await;
        match written {
            Ok(()) => AgentReply::success(NAME, format!("Saved {filename} ({})", format_size(bytes.len() as u64))),
            Err(e) => AgentReply::failure(NAME, format!("Error saving {filename}: {e}")),
        }
    }

    /// Extract, chunk and store a file, reporting how many chunks made it
    pub async fn ingest(&self, path: &Path) -> AgentReply {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let ext = extension_of(path);
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return AgentReply::failure(NAME, format!("File format not supported for {filename}"));
        }

        let text = match self.extractor.extract(path).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                return AgentReply::failure(
                    NAME,
                    format!("No content could be extracted from {filename}"),
                );
            }
            Err(e) => {
                tracing::warn!(file = %filename, "extraction failed: {}", e);
                return AgentReply::failure(NAME, format!("Error processing file: {e}"));
            }
        };

        let chunks = self.extractor.chunk(
            &text,
            self.chunking.chunk_size,
            self.chunking.chunk_overlap,
        );
        let file_size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
        let processed_at = Utc::now().to_rfc3339();
        let total = chunks.len();
        let mut stored = 0usize;

        for (i, chunk) in chunks.iter().enumerate() {
            let mut meta = Metadata::new();
            meta.insert("source".into(), filename.clone().into());
            meta.insert("chunk_id".into(), i.into());
            meta.insert("total_chunks".into(), total.into());
            meta.insert("file_path".into(), path.display().to_string().into());
            meta.insert("file_type".into(), ext.clone().into());
            meta.insert("processed_at".into(), processed_at.clone().into());
            meta.insert("file_size".into(), file_size.into());
            match self.store.store(chunk, meta).await {
                Ok(_) => stored += 1,
                Err(e) => tracing::warn!(file = %filename, chunk = i, "failed to store chunk: {}", e),
            }
        }
        tracing::info!(file = %filename, stored, total, "ingested file");

        if stored == 0 {
            return AgentReply::failure(NAME, format!("Failed to store any chunks from {filename}"));
        }
        AgentReply::success(NAME, processing_summary(&filename, stored, total))
            .with_sources(vec![filename.clone()])
            .with_data(json!({
                "filename": filename,
                "chunks_created": total,
                "chunks_stored": stored,
                "partial": stored < total,
            }))
    }

    async fn handle_list(&self) -> Result<AgentReply> {
        let files = self.list_files().await?;
        if files.is_empty() {
            return Ok(AgentReply::success(NAME, "No files found in the upload directory."));
        }
        let mut lines = vec!["Uploaded files:".to_string()];
        for f in &files {
            let mark = if f.is_supported() { "+" } else { "-" };
            lines.push(format!(
                "{mark} {} ({}) - Modified: {}",
                f.name,
                format_size(f.size),
                f.modified.format("%Y-%m-%d %H:%M")
            ));
        }
        lines.push(format!("\nTotal: {} files", files.len()));
        Ok(AgentReply::success(NAME, lines.join("\n")).with_data(json!({ "count": files.len() })))
    }

    async fn handle_info(&self, filename: &str) -> Result<AgentReply> {
        let Some(entry) = self.entry_for(filename).await? else {
            return Ok(AgentReply::failure(NAME, format!("File '{filename}' not found.")));
        };
        let mut lines = vec![
            format!("File Information: {}", entry.name),
            format!("Size: {}", format_size(entry.size)),
            format!("Type: {} file", entry.extension.to_uppercase()),
            format!("Modified: {}", entry.modified.format("%Y-%m-%d %H:%M:%S")),
            format!("Supported Format: {}", if entry.is_supported() { "yes" } else { "no" }),
        ];
        if entry.is_supported() {
            let preview = match self.extractor.extract(&entry.path).await {
                Ok(text) if text.trim().is_empty() => "No text content could be extracted".to_string(),
                Ok(text) => preview(&text),
                Err(e) => format!("Preview unavailable: {e}"),
            };
            lines.push(format!("\nContent Preview:\n{preview}"));
        }
        Ok(AgentReply::success(NAME, lines.join("\n")))
    }

    async fn handle_delete(&self, filename: &str) -> Result<AgentReply> {
        let Some(entry) = self.entry_for(filename).await? else {
            return Ok(AgentReply::failure(NAME, format!("File '{filename}' not found.")));
        };
        tokio::fs::remove_file(&entry.path).await?;

        let mut filter = Metadata::new();
        filter.insert("source".into(), entry.name.clone().into());
        let purged = match self.store.delete_where(&filter).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(file = %entry.name, "could not purge chunks: {}", e);
                0
            }
        };
        Ok(AgentReply::success(
            NAME,
            format!("Successfully deleted {} ({purged} indexed chunks removed)", entry.name),
        ))
    }

    async fn handle_stats(&self) -> Result<AgentReply> {
        let files = self.list_files().await?;
        if files.is_empty() {
            return Ok(AgentReply::success(NAME, "No files have been uploaded yet."));
        }
        let total_size: u64 = files.iter().map(|f| f.size).sum();
        let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
        for f in &files {
            let key = if f.extension.is_empty() { "none" } else { f.extension.as_str() };
            *by_type.entry(key).or_default() += 1;
        }
        let chunks = self.store.stats().await.map(|s| s.count).unwrap_or(0);

        let mut lines = vec![
            "File Statistics".to_string(),
            format!("Total Files: {}", files.len()),
            format!("Total Size: {}", format_size(total_size)),
            "File Types:".to_string(),
        ];
        for (ext, count) in &by_type {
            lines.push(format!("  - {}: {count} files", ext.to_uppercase()));
        }
        if let Some(largest) = files.iter().max_by_key(|f| f.size) {
            lines.push(format!("Largest File: {} ({})", largest.name, format_size(largest.size)));
        }
        if let (Some(newest), Some(oldest)) = (files.first(), files.last()) {
            lines.push(format!("Newest File: {}", newest.name));
            lines.push(format!("Oldest File: {}", oldest.name));
        }
        lines.push(format!("Indexed Chunks: {chunks}"));

        Ok(AgentReply::success(NAME, lines.join("\n")).with_data(json!({
            "total_files": files.len(),
            "total_size": total_size,
            "indexed_chunks": chunks,
        })))
    }
}

fn file_entry(path: PathBuf, meta: &std::fs::Metadata) -> FileEntry {
    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    FileEntry {
        name: path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string(),
        extension: extension_of(&path),
        size: meta.len(),
        modified: DateTime::<Utc>::from(modified),
        path,
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}...")
}

/// Human-readable size with one decimal place
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

fn processing_summary(filename: &str, stored: usize, total: usize) -> String {
    let rate = if total > 0 {
        stored as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    let mut summary = format!(
        "File Processing Complete: {filename}\n\nChunks Created: {total}\nChunks Stored: {stored}\nSuccess Rate: {rate:.1}%\n\n"
    );
    if stored == total {
        summary.push_str("All chunks were stored. The document is now searchable.");
    } else {
        summary.push_str(&format!(
            "Partial failure: {} chunks failed to store. The document is only partially searchable.",
            total - stored
        ));
    }
    summary
}

const HELP_TEXT: &str = "File Operations Help:

  List files:        \"list files\", \"show documents\"
  File information:  \"info about report.pdf\"
  Process a file:    \"process notes.md\", \"ingest data.csv\"
  Delete a file:     \"delete old_file.txt\"
  File statistics:   \"file stats\"

Supported file types: PDF, DOCX, TXT, MD, CSV";

#[async_trait]
impl StepAgent for FileAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::File
    }

    async fn handle_message(&self, instruction: &str, _context: &AgentContext) -> AgentReply {
        if instruction.trim().is_empty() {
            return AgentReply::failure(NAME, INVALID_INPUT_MESSAGE);
        }

        let filename = Self::extract_filename(instruction);
        let operation = Self::determine_operation(instruction, filename.is_some());
        tracing::debug!(?operation, ?filename, "file agent");

        let needs_file = |verb: &str| {
            AgentReply::failure(NAME, format!("Please specify which file you want to {verb}."))
        };
        let outcome = match (operation, filename.as_deref()) {
            (FileOperation::List, _) => self.handle_list().await,
            (FileOperation::Stats, _) => self.handle_stats().await,
            (FileOperation::Help, _) => Ok(AgentReply::success(NAME, HELP_TEXT)),
            (FileOperation::Info, None) => Ok(needs_file("get information about")),
            (FileOperation::Ingest, None) => Ok(needs_file("process")),
            (FileOperation::Delete, None) => Ok(needs_file("delete")),
            (FileOperation::Info, Some(name)) => self.handle_info(name).await,
            (FileOperation::Delete, Some(name)) => self.handle_delete(name).await,
            (FileOperation::Ingest, Some(name)) => match self.entry_for(name).await {
                Ok(Some(entry)) => Ok(self.ingest(&entry.path).await),
                Ok(None) => Ok(AgentReply::failure(NAME, format!("File '{name}' not found."))),
                Err(e) => Err(e),
            },
        };

        outcome.unwrap_or_else(|e| {
            tracing::warn!("file operation failed: {}", e);
            AgentReply::failure(NAME, format!("File operation error: {e}"))
        })
    }
}
