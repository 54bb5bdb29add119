use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::file::format_size;
use super::{AgentContext, AgentKind, AgentReply, INVALID_INPUT_MESSAGE, StepAgent};
use crate::error::Result;

const NAME: &str = "MultimediaAgent";

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff"];
const AUDIO_EXTENSIONS: [&str; 6] = ["mp3", "wav", "flac", "aac", "ogg", "m4a"];
const VIDEO_EXTENSIONS: [&str; 7] = ["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];

/// Broad kind of a media file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Image,
    Audio,
    Video,
}

impl MediaCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaCategory::Image => "image",
            MediaCategory::Audio => "audio",
            MediaCategory::Video => "video",
        }
    }
}

/// Stores image, audio and video uploads. Nothing is ingested for retrieval.
pub struct MultimediaAgent {
    upload_dir: PathBuf,
    max_upload_bytes: u64,
}

impl MultimediaAgent {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }

    pub fn with_max_upload_bytes(mut self, max: u64) -> Self {
        self.max_upload_bytes = max;
        self
    }

    /// Category of a file name by extension, if it is on the allow-list
    pub fn media_category(filename: &str) -> Option<MediaCategory> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())?
            .to_lowercase();
        let ext = ext.as_str();
        if IMAGE_EXTENSIONS.contains(&ext) {
            Some(MediaCategory::Image)
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            Some(MediaCategory::Audio)
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            Some(MediaCategory::Video)
        } else {
            None
        }
    }

    pub fn is_supported_format(filename: &str) -> bool {
        Self::media_category(filename).is_some()
    }

    /// Write an upload after checking its extension, name and size
    pub async fn save_upload(&self, filename: &str, bytes: &[u8]) -> AgentReply {
        if filename.contains(['/', '\\']) || filename.contains("..") || filename.trim().is_empty()
        {
            return AgentReply::failure(NAME, format!("Invalid file name: {filename}"));
        }
        let Some(category) = Self::media_category(filename) else {
            return AgentReply::failure(NAME, format!("File type not supported: {filename}"));
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

        let path = self.upload_dir.join(filename);
        let written = async {
            tokio::fs::create_dir_all(&self.upload_dir).await?;
            tokio::fs::write(&path, bytes).await
        }
        .await;
        match written {
            Ok(()) => {
                tracing::info!(file = %filename, category = category.as_str(), "saved media upload");
                AgentReply::success(NAME, format!("File '{filename}' uploaded successfully."))
                    .with_data(json!({ "filename": filename, "category": category }))
            }
            Err(e) => {
                tracing::error!(file = %filename, "error saving media file: {}", e);
                AgentReply::failure(NAME, format!("Error saving file: {e}"))
            }
        }
    }

    /// Media files in the upload directory, sorted by name
    pub async fn list_media(&self) -> Result<Vec<(String, MediaCategory, u64)>> {
        let mut media = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.upload_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(media),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(category) = Self::media_category(&name) else {
                continue;
            };
            let meta = entry.metadata().await?;
            if meta.is_file() {
                media.push((name, category, meta.len()));
            }
        }
        media.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(media)
    }
}

const HELP_TEXT: &str = "Multimedia Operations Help:

I can store image, audio and video uploads and list what has been uploaded.

Supported formats:
  Images: jpg, jpeg, png, gif, bmp, webp, tiff
  Audio:  mp3, wav, flac, aac, ogg, m4a
  Video:  mp4, avi, mov, mkv, wmv, flv, webm

Examples:
  - list media files";

#[async_trait]
impl StepAgent for MultimediaAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Multimedia
    }

    async fn handle_message(&self, instruction: &str, _context: &AgentContext) -> AgentReply {
        if instruction.trim().is_empty() {
            return AgentReply::failure(NAME, INVALID_INPUT_MESSAGE);
        }
        if !instruction.to_lowercase().contains("list") {
            return AgentReply::success(NAME, HELP_TEXT);
        }

        match self.list_media().await {
            Ok(media) if media.is_empty() => {
                AgentReply::success(NAME, "No media files have been uploaded.")
            }
            Ok(media) => {
                let mut lines = vec!["Media files:".to_string()];
                lines.extend(media.iter().map(|(name, category, size)| {
                    format!("- {name} ({}, {})", category.as_str(), format_size(*size))
                }));
                AgentReply::success(NAME, lines.join("\n"))
                    .with_data(json!({ "count": media.len() }))
            }
            Err(e) => AgentReply::failure(NAME, format!("Could not list media files: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list_and_categories() {
        assert_eq!(MultimediaAgent::media_category("cat.JPG"), Some(MediaCategory::Image));
        assert_eq!(MultimediaAgent::media_category("song.m4a"), Some(MediaCategory::Audio));
        assert_eq!(MultimediaAgent::media_category("clip.webm"), Some(MediaCategory::Video));
        assert!(!MultimediaAgent::is_supported_format("notes.pdf"));
        assert!(!MultimediaAgent::is_supported_format("noextension"));
    }

    #[tokio::test]
    async fn test_save_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let agent = MultimediaAgent::new(dir.path());

        let saved = agent.save_upload("cat.png", b"\x89PNG").await;
        assert!(saved.success);
        assert_eq!(saved.text, "File 'cat.png' uploaded successfully.");
        std::fs::write(dir.path().join("notes.txt"), "not media").unwrap();

        let listed = agent
            .handle_message("list media", &AgentContext::default())
            .await;
        assert!(listed.text.contains("- cat.png (image, 4.0 B)"));
        assert!(!listed.text.contains("notes.txt"));
    }

    #[tokio::test]
    async fn test_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let agent = MultimediaAgent::new(dir.path()).with_max_upload_bytes(2);

        assert!(!agent.save_upload("doc.pdf", b"x").await.success);
        assert!(!agent.save_upload("big.mp3", b"xyz").await.success);
        assert!(!agent.save_upload("../escape.png", b"x").await.success);
    }

    #[tokio::test]
    async fn test_other_messages_get_help() {
        let agent = MultimediaAgent::new("unused");
        let reply = agent
            .handle_message("process my video", &AgentContext::default())
            .await;
        assert!(reply.success);
        assert!(reply.text.starts_with("Multimedia Operations Help"));
    }
}
