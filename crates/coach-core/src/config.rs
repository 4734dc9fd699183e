use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

/// Top-level configuration for the Coach service.
///
/// Loaded from `~/.coach/config.toml` by default. Each section corresponds
/// to a bounded context or cross-cutting concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            model: ModelConfig::default(),
            cache: CacheConfig::default(),
            prompt: PromptConfig::default(),
            auth: AuthConfig::default(),
            schema: SchemaConfig::default(),
        }
    }
}

impl CoachConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CoachConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// API server port.
    pub port: u16,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Path to the SQLite database holding tenant data.
    pub database_path: String,
    /// Explicit CORS origins for browser clients. When empty, localhost on
    /// the API port and port+1 is allowed.
    pub allowed_origins: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            port: 4040,
            log_level: "info".to_string(),
            database_path: "~/.coach/coach.db".to_string(),
            allowed_origins: Vec::new(),
        }
    }
}

/// Model provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// API key for the model provider. The `GEMINI_API_KEY` environment
    /// variable takes precedence over this value.
    pub api_key: Option<String>,
    /// Base URL of the model REST API.
    pub base_url: String,
    /// Preferred model variant.
    pub primary_variant: String,
    /// Ordered alternates tried after the primary fails as unavailable.
    /// Both namespaced (`models/...`) and bare identifiers are accepted.
    pub fallback_variants: Vec<String>,
    /// HTTP timeout for a single model call, in seconds.
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            primary_variant: "gemini-2.0-flash".to_string(),
            fallback_variants: vec![
                "models/gemini-2.0-flash".to_string(),
                "gemini-1.5-flash".to_string(),
                "models/gemini-1.5-flash".to_string(),
                "gemini-1.5-flash-8b".to_string(),
                "models/gemini-1.5-flash-8b".to_string(),
                "gemini-pro".to_string(),
                "models/gemini-pro".to_string(),
            ],
            timeout_secs: 30,
        }
    }
}

impl ModelConfig {
    /// Resolve the API key: environment variable first, config file second.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Some(key);
            }
        }
        self.api_key
            .as_ref()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

/// Answer cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time-to-live for a cached answer, in seconds. Minutes-scale by
    /// default; this is a chat-session convenience, not long-term memory.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 600 }
    }
}

/// Prompt-embedding size caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Maximum result rows rendered into a synthesis prompt.
    pub max_result_rows: usize,
    /// Maximum serialized bytes of page data embedded into a prompt.
    pub max_page_data_bytes: usize,
    /// Maximum sample rows returned in buffered response metadata.
    pub sample_rows: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_result_rows: 20,
            max_page_data_bytes: 4096,
            sample_rows: 3,
        }
    }
}

/// Identity configuration: opaque bearer tokens mapped to tenant user ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// token -> user id.
    pub tokens: HashMap<String, String>,
}

/// Schema description configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Override for the built-in schema description text.
    pub description: Option<String>,
}
