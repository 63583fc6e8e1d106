//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.parley/config.toml` (user)
//! 3. `/etc/parley/config.toml` (system)
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.parley/secrets.toml` (user, must be 0600)
//! 2. `/etc/parley/secrets.toml` (system, must be 0600)
//!
//! Every section is optional; an empty file yields the built-in models and
//! default chat behaviour.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::memory::DEFAULT_MEMORY_SIZE;
use crate::plugins::DEFAULT_PLUGIN_TIMEOUT;
use crate::providers::RetryConfig;
use crate::registry::{ModelDescriptor, ModelRegistry};
use crate::{ParleyError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub plugins: PluginsConfig,
    /// Model table. Empty means the built-in models.
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
}

/// Per-conversation chain behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Turns remembered per conversation (default: 10).
    #[serde(default = "default_memory_size")]
    pub memory_size: usize,
    /// Deadline for a single provider call in seconds (default: 120).
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,
    /// Drop chains idle for longer than this many seconds (default: 3600).
    /// Unset disables the sweep.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: Option<u64>,
    /// How often the idle sweep runs in seconds (default: 60).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Items buffered between a reply stream and its consumer (default: 64).
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            memory_size: default_memory_size(),
            provider_timeout_secs: default_provider_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

fn default_memory_size() -> usize {
    DEFAULT_MEMORY_SIZE
}

fn default_provider_timeout() -> u64 {
    120
}

fn default_idle_timeout() -> Option<u64> {
    Some(3600)
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_stream_buffer() -> usize {
    crate::providers::backpressure::DEFAULT_STREAM_BUFFER
}

/// Retry policy for provider calls.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// Attempts including the first (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds (default: 4000).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Cap on the backoff delay in milliseconds (default: 10000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    4_000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl From<RetrySettings> for RetryConfig {
    fn from(settings: RetrySettings) -> Self {
        RetryConfig::new()
            .max_attempts(settings.max_attempts)
            .initial_delay(Duration::from_millis(settings.initial_delay_ms))
            .max_delay(Duration::from_millis(settings.max_delay_ms))
    }
}

/// Plugin discovery.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginsConfig {
    /// Directory holding `installed.json`. Unset disables plugins.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Per-plugin invoke timeout in seconds (default: 30).
    #[serde(default = "default_plugin_timeout")]
    pub timeout_secs: u64,
    /// Prefix plugin replies with the plugin's name.
    #[serde(default)]
    pub annotate: bool,
    /// How long a parsed `installed.json` is reused, in seconds (default: 5).
    #[serde(default = "default_plugin_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            timeout_secs: default_plugin_timeout(),
            annotate: false,
            cache_ttl_secs: default_plugin_cache_ttl(),
        }
    }
}

fn default_plugin_timeout() -> u64 {
    DEFAULT_PLUGIN_TIMEOUT.as_secs()
}

fn default_plugin_cache_ttl() -> u64 {
    5
}

/// Secrets configuration (API keys).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub openai: Option<ApiKeySecret>,
    #[serde(default)]
    pub google: Option<ApiKeySecret>,
    #[serde(default)]
    pub nvidia: Option<ApiKeySecret>,
    #[serde(default)]
    pub openrouter: Option<ApiKeySecret>,
    #[serde(default)]
    pub anthropic: Option<ApiKeySecret>,
}

/// A single API key secret.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
}

/// Provider name → environment variable name mapping.
const PROVIDER_ENV_VARS: &[(&str, &str)] = &[
    ("openai", "OPENAI_API_KEY"),
    ("google", "GOOGLE_API_KEY"),
    ("nvidia", "NVIDIA_API_KEY"),
    ("openrouter", "OPENROUTER_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
];

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.parley/config.toml`
    /// 3. `/etc/parley/config.toml`
    ///
    /// Without an explicit path and with no file present, returns the
    /// default configuration.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse a specific config file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ParleyError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            ParleyError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every request fail.
    pub fn validate(&self) -> Result<()> {
        if self.chat.provider_timeout_secs == 0 {
            return Err(ParleyError::Configuration(
                "chat.provider_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.plugins.timeout_secs == 0 {
            return Err(ParleyError::Configuration(
                "plugins.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ParleyError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(ParleyError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".parley").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/parley/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Build the model registry: configured models, or the built-ins when
    /// none are configured.
    pub fn model_registry(&self) -> Result<ModelRegistry> {
        if self.models.is_empty() {
            Ok(ModelRegistry::builtin())
        } else {
            ModelRegistry::new(self.models.clone())
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.chat.provider_timeout_secs)
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Resolution order:
    /// 1. `~/.parley/secrets.toml` (if exists, must be 0600)
    /// 2. `/etc/parley/secrets.toml` (if exists, must be 0600)
    ///
    /// Returns empty secrets if no file exists (providers may use env vars).
    pub fn load() -> Result<Self> {
        // Try user secrets first
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".parley").join("secrets.toml");
            if user_secrets.exists() {
                Self::check_permissions(&user_secrets)?;
                return Self::load_from_file(&user_secrets);
            }
        }

        // Try system secrets
        let system_secrets = PathBuf::from("/etc/parley/secrets.toml");
        if system_secrets.exists() {
            Self::check_permissions(&system_secrets)?;
            return Self::load_from_file(&system_secrets);
        }

        // No secrets file - return empty (providers can fall back to env vars)
        Ok(Secrets::default())
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ParleyError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            ParleyError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            ParleyError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        // Reject if group or other bits are set
        if mode & 0o077 != 0 {
            return Err(ParleyError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// Get API key for a provider, falling back to the corresponding environment variable.
    pub fn api_key(&self, provider: &str) -> Option<String> {
        let from_file = match provider {
            "openai" => self.openai.as_ref(),
            "google" => self.google.as_ref(),
            "nvidia" => self.nvidia.as_ref(),
            "openrouter" => self.openrouter.as_ref(),
            "anthropic" => self.anthropic.as_ref(),
            _ => None,
        }
        .map(|s| s.api_key.clone());

        from_file.or_else(|| {
            PROVIDER_ENV_VARS
                .iter()
                .find(|(name, _)| *name == provider)
                .and_then(|(_, env_var)| std::env::var(env_var).ok())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Backend;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.chat.memory_size, 10);
        assert_eq!(config.chat.provider_timeout_secs, 120);
        assert_eq!(config.chat.idle_timeout_secs, Some(3600));
        assert_eq!(config.plugins.timeout_secs, 30);
        assert!(config.plugins.dir.is_none());
        assert_eq!(RetryConfig::from(config.retry), RetryConfig::default());
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let config: Config = toml::from_str("[chat]\nprovider_timeout_secs = 0").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("provider_timeout_secs"));

        let config: Config = toml::from_str("[plugins]\ntimeout_secs = 0").unwrap();
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn load_from_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[chat]\nprovider_timeout_secs = 0\n").unwrap();
        assert!(matches!(
            Config::load_from_file(&path),
            Err(ParleyError::Configuration(_))
        ));
    }

    #[test]
    fn empty_model_table_uses_builtins() {
        let registry = Config::default().model_registry().unwrap();
        assert_eq!(registry.default_model().unwrap().id, "gemini-pro");
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [chat]
            memory_size = 4
            provider_timeout_secs = 30

            [retry]
            max_attempts = 5
            initial_delay_ms = 100

            [plugins]
            dir = "/var/lib/parley/plugins"
            annotate = true

            [[models]]
            id = "gpt-4"
            display_name = "GPT-4o Mini"
            vendor = "OpenAI"
            fallback = "local"
            backend = { kind = "openai", model = "gpt-4o-mini" }

            [[models]]
            id = "local"
            display_name = "Llama"
            vendor = "Meta"
            backend = { kind = "ollama", model = "llama3" }
            params = { temperature = 0.2 }
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.chat.memory_size, 4);
        assert_eq!(config.provider_timeout(), Duration::from_secs(30));
        assert_eq!(config.chat.stream_buffer, 64);

        let retry = RetryConfig::from(config.retry.clone());
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.initial_delay, Duration::from_millis(100));
        assert_eq!(retry.max_delay, Duration::from_secs(10));

        assert_eq!(
            config.plugins.dir,
            Some(PathBuf::from("/var/lib/parley/plugins"))
        );
        assert!(config.plugins.annotate);

        let registry = config.model_registry().unwrap();
        assert_eq!(registry.fallback_of("gpt-4").unwrap().id, "local");
        let local = registry.get("local").unwrap();
        assert_eq!(local.params.temperature, Some(0.2));
        assert!(local.params.top_p.is_none());
        assert!(matches!(local.backend, Backend::Ollama { ref base_url, .. } if base_url == "http://localhost:11434"));
    }

    #[test]
    fn cyclic_model_table_is_rejected() {
        let toml = r#"
            [[models]]
            id = "a"
            display_name = "A"
            vendor = "X"
            fallback = "b"
            backend = { kind = "openai", model = "a" }

            [[models]]
            id = "b"
            display_name = "B"
            vendor = "X"
            fallback = "a"
            backend = { kind = "openai", model = "b" }
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(matches!(
            config.model_registry(),
            Err(ParleyError::Configuration(_))
        ));
    }

    #[test]
    fn parse_secrets() {
        let toml = r#"
            [openai]
            api_key = "sk-test-key"

            [nvidia]
            api_key = "nvapi-test"
        "#;
        let secrets: Secrets = toml::from_str(toml).unwrap();
        assert_eq!(secrets.openai.as_ref().unwrap().api_key, "sk-test-key");
        assert_eq!(secrets.api_key("nvidia"), Some("nvapi-test".to_string()));
        assert!(secrets.google.is_none());
    }

    #[test]
    fn api_key_unknown_provider_is_none() {
        assert_eq!(Secrets::default().api_key("nonexistent"), None);
    }

    #[test]
    fn config_not_found_returns_error() {
        let result = Config::load(Some(Path::new("/nonexistent/config.toml")));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Config file not found"));
    }

    #[test]
    fn load_from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[chat]\nmemory_size = 2\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.chat.memory_size, 2);
    }

    #[cfg(unix)]
    #[test]
    fn insecure_secrets_file_is_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        fs::write(&path, "[openai]\napi_key = \"x\"\n").unwrap();

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(Secrets::check_permissions(&path).is_err());

        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
        assert!(Secrets::check_permissions(&path).is_ok());
        let secrets = Secrets::load_from_file(&path).unwrap();
        assert_eq!(secrets.api_key("openai"), Some("x".to_string()));
    }
}
