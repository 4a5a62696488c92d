use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash-exp".to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeminiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key. The key itself
    /// never lives in this file.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        GeminiConfig {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum number of turns sent as context (user and model each count).
    pub history_limit: usize,
    pub fallback_message: String,
    pub copy_label: String,
    pub copied_label: String,
    /// Caption next to the spinner while a request is outstanding.
    pub thinking_label: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        ChatConfig {
            history_limit: 10,
            fallback_message: "申し訳ありません。エラーが発生しました。".to_string(),
            copy_label: "コピー".to_string(),
            copied_label: "コピー完了!".to_string(),
            thinking_label: "考え中...".to_string(),
        }
    }
}

impl ChatConfig {
    /// The newest user turn must always survive truncation.
    pub fn effective_history_limit(&self) -> usize {
        self.history_limit.max(1)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            width: 800,
            height: 600,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(&Self::get_config_path())
    }

    /// Read `config_path`, falling back to defaults on any problem. A missing
    /// file gets its directory created.
    pub fn load_from(config_path: &Path) -> Self {
        if config_path.exists() {
            match Self::from_file(config_path) {
                Ok(config) => return config,
                Err(e) => warn!("{:#}. Using defaults.", e),
            }
        } else if let Some(parent) = config_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("Could not create config directory {}: {}", parent.display(), e);
            }
        }

        Config::default()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Error reading {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("Error parsing {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn get_config_path() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/gem-chat/config.toml")
        } else {
            PathBuf::from("config.toml")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.gemini.model, "gemini-2.0-flash-exp");
        assert_eq!(config.gemini.api_key_env, "GEMINI_API_KEY");
        assert_eq!(config.generation, GenerationConfig::default());
        assert_eq!(config.chat.history_limit, 10);
        assert_eq!(config.window.width, 800);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml(
            r#"
            [gemini]
            base_url = "http://localhost:8080/proxy"

            [generation]
            temperature = 0.2

            [chat]
            history_limit = 4
            fallback_message = "Something went wrong."
            "#,
        )
        .unwrap();

        assert_eq!(config.gemini.base_url, "http://localhost:8080/proxy");
        assert_eq!(config.gemini.model, "gemini-2.0-flash-exp");
        assert!((config.generation.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.generation.top_k, 40);
        assert_eq!(config.chat.history_limit, 4);
        assert_eq!(config.chat.fallback_message, "Something went wrong.");
        assert_eq!(config.chat.copy_label, "コピー");
        assert_eq!(config.chat.thinking_label, "考え中...");
    }

    #[test]
    fn test_history_limit_is_at_least_one() {
        let chat = ChatConfig { history_limit: 0, ..ChatConfig::default() };
        assert_eq!(chat.effective_history_limit(), 1);
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(Config::from_toml("[chat\nhistory_limit = ").is_err());
    }

    #[test]
    fn test_load_missing_file_creates_dir_and_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gem-chat").join("config.toml");

        let config = Config::load_from(&path);

        assert!(path.parent().unwrap().is_dir());
        assert!(!path.exists());
        assert_eq!(config.chat.history_limit, 10);
        assert_eq!(config.gemini.model, "gemini-2.0-flash-exp");
    }

    #[test]
    fn test_load_malformed_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[chat\nhistory_limit = ").unwrap();

        let config = Config::load_from(&path);

        assert_eq!(config.chat.history_limit, 10);
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_load_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[chat]\nhistory_limit = 6\nthinking_label = \"Thinking...\"\n\n[window]\nwidth = 1024\n",
        )
        .unwrap();

        let config = Config::load_from(&path);

        assert_eq!(config.chat.history_limit, 6);
        assert_eq!(config.chat.thinking_label, "Thinking...");
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
    }

    #[test]
    fn test_load_unreadable_path_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be cannot be read as a string.
        let path = dir.path().join("config.toml");
        fs::create_dir(&path).unwrap();

        let config = Config::load_from(&path);

        assert_eq!(config.chat.history_limit, 10);
    }
}
