use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, VoxError};

/// Top-level configuration for the Vox assistant core.
///
/// Loaded from `~/.vox/config.toml` by default. Each section corresponds
/// to one component or cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoxConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub composer: ComposerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
}

impl VoxConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: VoxConfig = toml::from_str(&content)?;
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
        let content =
            toml::to_string_pretty(self).map_err(|e| VoxError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite conversation log.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.vox/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Memory store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum similarity results returned per query.
    pub top_k: usize,
    /// Interval between background flushes, in seconds.
    pub flush_interval_secs: u64,
    /// Bounded retry count for transient persistence failures.
    pub append_retries: u32,
    /// Base backoff between append retries, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Retrieval deadline; past it the turn proceeds with no memory context.
    pub query_timeout_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            flush_interval_secs: 30,
            append_retries: 3,
            retry_backoff_ms: 50,
            query_timeout_ms: 250,
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of most recent turns kept verbatim for prompt context.
    pub short_term_turns: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { short_term_turns: 6 }
    }
}

/// Prompt composer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    /// Length budget for the composed prompt, in characters.
    pub max_prompt_chars: usize,
    /// Name the assistant refers to itself by in the system preamble.
    pub assistant_name: String,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            max_prompt_chars: 6000,
            assistant_name: "Vox".to_string(),
        }
    }
}

/// Generative model service configuration (OpenAI-compatible endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of the chat-completions endpoint.
    pub base_url: String,
    /// Model identifier to request.
    pub model: String,
    /// Environment variable holding the API key, if the endpoint needs one.
    pub api_key_env: String,
    /// Hard deadline for one model invocation, in milliseconds.
    pub timeout_ms: u64,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_string(),
            model: "Qwen/Qwen2.5-3B-Instruct".to_string(),
            api_key_env: "VOX_API_KEY".to_string(),
            timeout_ms: 10_000,
            temperature: 0.7,
            max_tokens: 256,
        }
    }
}

/// Action dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    /// Whether matched actions are executed at all.
    pub enabled: bool,
    /// Application names `open_app` may spawn.
    pub app_allowlist: Vec<String>,
    /// Commands `run_command` may execute (first word of the command line).
    pub command_allowlist: Vec<String>,
    /// Hard deadline for one `run_command` invocation, in seconds.
    pub command_timeout_secs: u64,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_allowlist: vec![
                "cursor".to_string(),
                "firefox".to_string(),
                "gnome-terminal".to_string(),
            ],
            command_allowlist: vec![
                "ls".to_string(),
                "pwd".to_string(),
                "date".to_string(),
                "whoami".to_string(),
            ],
            command_timeout_secs: 5,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VoxConfig::default();
        assert_eq!(config.memory.top_k, 3);
        assert_eq!(config.session.short_term_turns, 6);
        assert_eq!(config.composer.assistant_name, "Vox");
        assert!(config.actions.enabled);
        assert!(config
            .actions
            .command_allowlist
            .contains(&"pwd".to_string()));
    }

    #[test]
    fn test_load_missing_file_falls_back_to_default() {
        let config = VoxConfig::load_or_default(Path::new("/nonexistent/vox.toml"));
        assert_eq!(config.memory.top_k, 3);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = VoxConfig::default();
        config.memory.top_k = 7;
        config.session.short_term_turns = 3;
        config.save(&path).unwrap();

        let loaded = VoxConfig::load(&path).unwrap();
        assert_eq!(loaded.memory.top_k, 7);
        assert_eq!(loaded.session.short_term_turns, 3);
    }

    #[test]
    fn test_partial_toml_uses_section_defaults() {
        let toml_str = r#"
            [memory]
            top_k = 9
        "#;
        let config: VoxConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.memory.top_k, 9);
        // Untouched fields and sections keep their defaults.
        assert_eq!(config.memory.append_retries, 3);
        assert_eq!(config.composer.max_prompt_chars, 6000);
    }

    #[test]
    fn test_load_invalid_toml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "not [ valid").unwrap();
        assert!(VoxConfig::load(&path).is_err());
    }
}
