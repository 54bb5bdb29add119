//! Configuration file support

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use docent_agent::{AgentProfiles, ChunkConfig, ConversationConfig, RagConfig, TaskEngineConfig};
use docent_ai::ModelTask;
use serde::{Deserialize, Serialize};

const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 16 * 1024 * 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Configuration for docent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Generation provider (google, openai, anthropic, groq, openrouter, ollama)
    pub provider: Option<String>,
    /// Default model
    pub model: Option<String>,
    /// Per-task model overrides, keyed by task (reasoning, fast, classification, search)
    pub models: HashMap<String, String>,
    /// Custom API base URL
    pub base_url: Option<String>,
    /// Deadline for one generation call, in seconds
    pub request_timeout_secs: Option<u64>,
    /// Directory holding uploaded documents and media
    pub upload_dir: Option<String>,
    pub max_upload_bytes: Option<u64>,
    /// API keys (alternative to environment variables)
    pub api_keys: ApiKeys,
    /// Google Custom Search credentials for the internet fallback
    pub search: SearchKeys,
    pub conversation: ConversationConfig,
    pub rag: RagConfig,
    pub tasks: TaskEngineConfig,
    pub chunking: ChunkConfig,
    /// Sampling parameters per assistant
    pub profiles: AgentProfiles,
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub google: Option<String>,
    pub openai: Option<String>,
    pub anthropic: Option<String>,
    pub groq: Option<String>,
    pub openrouter: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchKeys {
    pub api_key: Option<String>,
    pub engine_id: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docent")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("DOCENT_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, falling back to defaults on any problem
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Write the example config to `path` unless a file already exists there
    pub fn init_at(path: &Path) -> std::io::Result<()> {
        if path.exists() {
            return Ok(());
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, example_config())
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        Self::init_at(&path)?;
        Ok(path)
    }

    /// API key from the config file. Environment variables are consulted
    /// later, by the provider settings.
    pub fn api_key(&self, provider: &str) -> Option<String> {
        match provider {
            "google" => self.api_keys.google.clone(),
            "openai" => self.api_keys.openai.clone(),
            "anthropic" => self.api_keys.anthropic.clone(),
            "groq" => self.api_keys.groq.clone(),
            "openrouter" => self.api_keys.openrouter.clone(),
            _ => None,
        }
    }

    /// Per-task model overrides; unknown task names are skipped with a warning
    pub fn model_overrides(&self) -> Vec<(ModelTask, String)> {
        let mut overrides = Vec::new();
        for (task, model) in &self.models {
            match serde_json::from_value::<ModelTask>(serde_json::Value::String(task.clone())) {
                Ok(task) => overrides.push((task, model.clone())),
                Err(_) => eprintln!("Warning: Unknown model task in config: {}", task),
            }
        }
        overrides
    }

    pub fn upload_dir(&self) -> PathBuf {
        PathBuf::from(
            self.upload_dir
                .as_deref()
                .unwrap_or(DEFAULT_UPLOAD_DIR),
        )
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES)
    }

    pub fn request_timeout_secs(&self) -> u64 {
        self.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)
    }

    /// Search credentials from the file, else from the environment
    pub fn search_credentials(&self) -> Option<(String, String)> {
        let key = self
            .search
            .api_key
            .clone()
            .or_else(|| std::env::var("GOOGLE_SEARCH_API_KEY").ok())?;
        let engine = self
            .search
            .engine_id
            .clone()
            .or_else(|| std::env::var("GOOGLE_SEARCH_ENGINE_ID").ok())?;
        Some((key, engine))
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# docent configuration file
# Place at ~/.config/docent/config.toml (Linux), ~/Library/Application Support/docent/config.toml
# (macOS) or %APPDATA%\docent\config.toml (Windows), or point DOCENT_CONFIG_PATH at it.

# Generation provider (google, openai, anthropic, groq, openrouter, ollama)
provider = "google"

# Default model
model = "gemini-2.0-flash"

# Deadline for one generation call, in seconds
request_timeout_secs = 60

# Uploaded documents and media live here
upload_dir = "uploads"
max_upload_bytes = 16777216

# Per-task model overrides (optional)
[models]
# reasoning = "gemini-2.5-pro"
# classification = "gemini-2.0-flash-lite"

# API keys (optional - can also use environment variables such as GEMINI_API_KEY)
[api_keys]
# google = "..."
# openai = "sk-..."
# anthropic = "sk-ant-..."

# Google Custom Search for the internet fallback
# (or GOOGLE_SEARCH_API_KEY / GOOGLE_SEARCH_ENGINE_ID)
[search]
# api_key = "..."
# engine_id = "..."

[conversation]
max_messages = 20
expiry_hours = 24
context_chars = 2000

[rag]
top_k = 3
rerank_top_n = 3
search_fallback_results = 3
recursive_component_k = 2

[tasks]
max_steps = 10
max_concurrent_steps = 3
max_retries = 3
step_timeout_secs = 300
task_max_age_hours = 24

[chunking]
chunk_size = 500
chunk_overlap = 50

# Sampling parameters for the assistants that call the model directly
[profiles]
concierge = { temperature = 0.2, max_tokens = 1024 }
search = { temperature = 0.2, max_tokens = 1024 }
function = { temperature = 0.1, max_tokens = 512 }
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.provider.as_deref(), Some("google"));
        assert_eq!(config.tasks.max_concurrent_steps, 3);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.max_upload_bytes(), 16 * 1024 * 1024);
        assert_eq!(config.profiles.search.max_tokens, 1024);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            model = "gpt-4o"
            [tasks]
            max_retries = 5
            [models]
            reasoning = "o3-mini"
            [profiles]
            concierge = { temperature = 0.7, max_tokens = 256 }
            "#,
        )
        .unwrap();
        assert_eq!(config.tasks.max_retries, 5);
        assert_eq!(config.tasks.max_steps, 10);
        assert_eq!(config.conversation.max_messages, 20);
        assert_eq!(
            config.model_overrides(),
            vec![(ModelTask::Reasoning, "o3-mini".to_string())]
        );
        assert_eq!(config.upload_dir(), PathBuf::from("uploads"));
        assert_eq!(config.profiles.concierge.max_tokens, 256);
        assert_eq!(config.profiles.function.max_tokens, 512);
    }

    #[test]
    fn test_init_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        Config::init_at(&path).unwrap();
        assert!(path.exists());

        let loaded = Config::load_from(&path);
        assert_eq!(loaded.model.as_deref(), Some("gemini-2.0-flash"));
        assert_eq!(loaded.api_key("google"), None);

        fs::write(&path, "not = [valid").unwrap();
        assert!(Config::load_from(&path).model.is_none());
    }
}
