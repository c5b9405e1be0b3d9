//! Configuration management for opsflow.
//!
//! Handles loading and saving configuration from TOML files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable consulted for the gateway API key unless overridden.
pub const DEFAULT_API_KEY_ENV: &str = "OPSFLOW_API_KEY";

/// Intent confidence below this is routed to clarification.
pub const DEFAULT_INTENT_THRESHOLD: f64 = 0.7;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Workflow engine behaviour
    pub engine: EngineConfig,

    /// Agent gateway settings
    pub gateway: GatewayConfig,

    /// Execution store settings
    pub store: StoreConfig,

    /// System prompt overrides keyed by prompt id
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub prompts: HashMap<String, String>,
}

/// What the engine does when a step marked `requiresHumanInput` completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanInputPolicy {
    /// Pause the execution until the input is confirmed
    Gate,
    /// Record the step as successful and keep going (demo mode)
    AutoPass,
}

/// How templates containing step types without an executor are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownStepPolicy {
    /// Run the step as a no-op that only logs the unrecognized type
    Tolerate,
    /// Refuse to start the template
    Reject,
}

/// Workflow engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Human-input gate behaviour
    pub human_input: HumanInputPolicy,

    /// Upper bound for a single step executor call, in seconds
    pub step_timeout_secs: u64,

    /// Policy for unrecognized step types
    pub unknown_steps: UnknownStepPolicy,
}

impl EngineConfig {
    /// Step executor timeout as a [`Duration`].
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            human_input: HumanInputPolicy::Gate,
            step_timeout_secs: 120,
            unknown_steps: UnknownStepPolicy::Tolerate,
        }
    }
}

/// Agent gateway (chat-completion backend) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of a chat-completion compatible API
    pub base_url: String,

    /// Model name sent with every request
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Minimum intent confidence for routing to a workflow
    pub intent_threshold: f64,

    /// Number of recent conversation turns sent with intent recognition
    pub history_window: usize,
}

impl GatewayConfig {
    /// Read the API key from the configured environment variable.
    ///
    /// Empty values count as missing.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|key| !key.trim().is_empty())
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            request_timeout_secs: 30,
            intent_threshold: DEFAULT_INTENT_THRESHOLD,
            history_window: 6,
        }
    }
}

/// Execution store settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for persisted execution records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// Resolve the store directory, falling back to the data directory.
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            Config::data_dir()
                .unwrap_or_else(|| PathBuf::from(".opsflow"))
                .join("executions")
        })
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Looks for config in:
    /// 1. `.opsflow.toml` in current directory
    /// 2. `~/.config/opsflow/config.toml`
    /// 3. Falls back to defaults
    pub fn load() -> anyhow::Result<Self> {
        let local_config = PathBuf::from(".opsflow.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(config_dir) = Self::config_dir() {
            let global_config = config_dir.join("config.toml");
            if global_config.exists() {
                return Self::load_from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        tracing::debug!(path = ?path, "Loaded configuration");
        Ok(config)
    }

    /// Save configuration to a specific file.
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("opsflow"))
    }

    /// Get the data directory path (for persisted executions).
    pub fn data_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("opsflow"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.human_input, HumanInputPolicy::Gate);
        assert_eq!(config.engine.unknown_steps, UnknownStepPolicy::Tolerate);
        assert_eq!(config.engine.step_timeout(), Duration::from_secs(120));
        assert!((config.gateway.intent_threshold - 0.7).abs() < f64::EPSILON);
        assert!(config.prompts.is_empty());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[engine]"));
        assert!(toml_str.contains("[gateway]"));
        assert!(toml_str.contains("human_input = \"gate\""));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [engine]
            human_input = "auto_pass"
            step_timeout_secs = 5

            [gateway]
            model = "local-model"
            intent_threshold = 0.8

            [prompts]
            "plan.analysis" = "You are a strict budget analyst."
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.human_input, HumanInputPolicy::AutoPass);
        assert_eq!(config.engine.step_timeout_secs, 5);
        assert_eq!(config.engine.unknown_steps, UnknownStepPolicy::Tolerate);
        assert_eq!(config.gateway.model, "local-model");
        assert_eq!(config.gateway.base_url, "https://api.openai.com/v1");
        assert_eq!(
            config.prompts.get("plan.analysis").map(String::as_str),
            Some("You are a strict budget analyst.")
        );
    }

    #[test]
    fn test_save_and_load_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.engine.unknown_steps = UnknownStepPolicy::Reject;
        config.store.path = Some(dir.path().join("executions"));
        config.save_to_file(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.engine.unknown_steps, UnknownStepPolicy::Reject);
        assert_eq!(loaded.store.resolved_path(), dir.path().join("executions"));
    }

    #[test]
    #[serial(opsflow_env)]
    fn test_api_key_reads_configured_env() {
        let gateway = GatewayConfig {
            api_key_env: "OPSFLOW_TEST_CONFIG_KEY".to_string(),
            ..GatewayConfig::default()
        };

        std::env::remove_var("OPSFLOW_TEST_CONFIG_KEY");
        assert!(gateway.api_key().is_none());

        std::env::set_var("OPSFLOW_TEST_CONFIG_KEY", "   ");
        assert!(gateway.api_key().is_none());

        std::env::set_var("OPSFLOW_TEST_CONFIG_KEY", "sk-test");
        assert_eq!(gateway.api_key().as_deref(), Some("sk-test"));

        std::env::remove_var("OPSFLOW_TEST_CONFIG_KEY");
    }
}
