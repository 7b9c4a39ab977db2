//! Configuration file support

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_ENDPOINT: &str =
    "https://w3af7ebiihzxumrnhjb2nh2o.agents.do-ai.run/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-oss-120b";
pub const API_KEY_ENV: &str = "GENARYN_API_KEY";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are the Genaryn AI Deputy Commander, a strategic advisor for military operations.

Your role:
- Provide clear, actionable intelligence and recommendations
- Analyze multiple courses of action (COAs) with risk assessments
- Support the Military Decision Making Process (MDMP)
- Maintain operational security (OPSEC)
- Consider tactical, operational, and strategic implications

Always consider:
- Mission objectives and commander's intent
- Available resources and time constraints
- Enemy capabilities and terrain factors
- Force protection and risk mitigation
- Legal and ethical considerations

Communicate in clear, concise military language. Use proper military terminology and brevity codes when appropriate.
Classification: UNCLASSIFIED unless otherwise specified.";

/// Configuration for genaryn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat completions URL
    pub endpoint: Option<String>,
    /// Model identifier
    pub model: Option<String>,
    /// API key (alternative to GENARYN_API_KEY)
    pub api_key: Option<String>,
    /// Inline system prompt; overrides the built-in one
    pub system_prompt: Option<String>,
    /// File to read the system prompt from
    pub system_prompt_file: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
    /// Instruction sent by /continue
    pub continue_instruction: Option<String>,
    /// Cancel a response still streaming after this many seconds
    pub stream_timeout_secs: Option<u64>,
    /// Extra request headers
    pub headers: HashMap<String, String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("genaryn")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("GENARYN_CONFIG_PATH") {
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
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            endpoint: Some(DEFAULT_ENDPOINT.to_string()),
            model: Some(DEFAULT_MODEL.to_string()),
            temperature: Some(genaryn_chat::session::DEFAULT_TEMPERATURE),
            max_tokens: Some(genaryn_chat::session::DEFAULT_MAX_TOKENS),
            ..Default::default()
        };

        default_config.save_to(&path)?;
        Ok(path)
    }

    /// API key from config, then the environment
    pub fn api_key(&self) -> Option<String> {
        genaryn_ai::providers::get_api_key(self.api_key.as_deref(), API_KEY_ENV).ok()
    }

    /// System prompt from the inline setting, the prompt file, or the built-in default
    pub fn system_prompt(&self) -> std::io::Result<String> {
        if let Some(ref prompt) = self.system_prompt {
            return Ok(prompt.clone());
        }
        if let Some(ref file) = self.system_prompt_file {
            return fs::read_to_string(expand_home(file));
        }
        Ok(DEFAULT_SYSTEM_PROMPT.to_string())
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# genaryn configuration file
# Place at ~/.config/genaryn/config.toml (Linux) or set GENARYN_CONFIG_PATH

# OpenAI-compatible chat completions URL
endpoint = "https://w3af7ebiihzxumrnhjb2nh2o.agents.do-ai.run/api/v1/chat/completions"

# Model identifier sent with every request
model = "gpt-oss-120b"

# Sampling
temperature = 0.7
max_tokens = 2000

# Cancel a response still streaming after this many seconds (optional)
# stream_timeout_secs = 120

# System prompt (optional; the built-in Deputy Commander prompt is used otherwise)
# system_prompt = "You are a concise staff officer."
# system_prompt_file = "~/.config/genaryn/system_prompt.txt"

# Instruction sent by /continue (optional)
# continue_instruction = "Continue exactly where you stopped."

# API key (optional - GENARYN_API_KEY is preferred)
# api_key = "..."

# Extra request headers (optional)
[headers]
# "X-Request-Source" = "genaryn-cli"
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.model.as_deref(), Some(DEFAULT_MODEL));
        assert_eq!(config.endpoint.as_deref(), Some(DEFAULT_ENDPOINT));
        assert_eq!(config.max_tokens, Some(2000));
        assert!(config.headers.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            model: Some("local-model".into()),
            stream_timeout_secs: Some(30),
            headers: HashMap::from([("X-Team".to_string(), "ops".to_string())]),
            ..Default::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn test_invalid_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "model = [not toml").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Config::load_from(&dir.path().join("absent.toml")), Config::default());
    }

    #[test]
    fn test_system_prompt_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("prompt.txt");
        fs::write(&file, "from file").unwrap();

        let mut config = Config::default();
        assert_eq!(config.system_prompt().unwrap(), DEFAULT_SYSTEM_PROMPT);

        config.system_prompt_file = Some(file.display().to_string());
        assert_eq!(config.system_prompt().unwrap(), "from file");

        config.system_prompt = Some("inline".into());
        assert_eq!(config.system_prompt().unwrap(), "inline");
    }

    #[test]
    fn test_api_key_from_config() {
        let config = Config {
            api_key: Some("sk-config".into()),
            ..Default::default()
        };
        assert_eq!(config.api_key().as_deref(), Some("sk-config"));
    }
}
