use crate::store::{Department, SessionState, Theme};
use crate::triggers::Trigger;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Env var naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "LIVECHAT_WIDGET_CONFIG";
pub const SERVER_URL_ENV: &str = "LIVECHAT_SERVER_URL";
pub const AGENT_TTL_ENV: &str = "LIVECHAT_AGENT_CACHE_TTL_MS";

// ── Top-level config ──────────────────────────────────────────────

/// Widget runtime configuration, loaded from `config.toml`.
///
/// Resolution order: `--config` path → `LIVECHAT_WIDGET_CONFIG` env →
/// platform config dir `config.toml` → built-in defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path the config was read from; empty when running on defaults.
    #[serde(skip)]
    pub config_path: PathBuf,
    /// Livechat server base URL. Overridden by `LIVECHAT_SERVER_URL`. Default: `"http://localhost:3000"`.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Tag host pages put in `src` to address this widget. Default: `"rocketchat"`.
    #[serde(default = "default_source_tag")]
    pub source_tag: String,
    /// Agent resolution cache (`[agent_cache]`).
    #[serde(default)]
    pub agent_cache: AgentCacheConfig,
    /// REST client settings (`[http]`).
    #[serde(default)]
    pub http: HttpConfig,
    /// Initial widget presentation (`[widget]`).
    #[serde(default)]
    pub widget: WidgetDefaults,
    /// Trigger definitions available before the server config is loaded.
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    /// Department list available before the server config is loaded.
    #[serde(default)]
    pub departments: Vec<Department>,
}

fn default_server_url() -> String {
    "http://localhost:3000".into()
}

fn default_source_tag() -> String {
    "rocketchat".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            server_url: default_server_url(),
            source_tag: default_source_tag(),
            agent_cache: AgentCacheConfig::default(),
            http: HttpConfig::default(),
            widget: WidgetDefaults::default(),
            triggers: Vec::new(),
            departments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentCacheConfig {
    /// How long a resolved queue agent is reused, in milliseconds. Overridden by `LIVECHAT_AGENT_CACHE_TTL_MS`. Default: `3600000`.
    #[serde(default = "default_agent_ttl_ms")]
    pub ttl_ms: u64,
}

fn default_agent_ttl_ms() -> u64 {
    3_600_000
}

impl Default for AgentCacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_agent_ttl_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HttpConfig {
    /// Per-request timeout in seconds. Default: `30`.
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WidgetDefaults {
    /// Initial UI language (e.g. `"pt-BR"`).
    #[serde(default)]
    pub language: Option<String>,
    /// Initial theme (`[widget.theme]`).
    #[serde(default)]
    pub theme: Theme,
}

/// Where the effective config came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Explicit,
    EnvPath,
    ProjectDir,
    Defaults,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "--config",
            Self::EnvPath => CONFIG_PATH_ENV,
            Self::ProjectDir => "project_dir",
            Self::Defaults => "defaults",
        }
    }
}

fn project_config_path() -> Option<PathBuf> {
    ProjectDirs::from("chat", "rocket", "livechat-widget")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Pick the config file to read, if any.
fn resolve_config_path(explicit: Option<&Path>) -> Option<(PathBuf, ConfigSource)> {
    if let Some(path) = explicit {
        return Some((path.to_path_buf(), ConfigSource::Explicit));
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some((PathBuf::from(path), ConfigSource::EnvPath));
        }
    }
    project_config_path()
        .filter(|path| path.exists())
        .map(|path| (path, ConfigSource::ProjectDir))
}

impl Config {
    /// Load, apply env overrides, and validate.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let (mut config, source) = match resolve_config_path(explicit) {
            Some((path, source)) => {
                let contents = fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                let mut config = Self::from_toml(&contents)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?;
                config.config_path = path;
                (config, source)
            }
            None => (Self::default(), ConfigSource::Defaults),
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            source = source.as_str(),
            triggers = config.triggers.len(),
            "Config loaded"
        );
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Invalid widget configuration")
    }

    /// Validate configuration values that would cause runtime failures.
    pub fn validate(&self) -> Result<()> {
        if self.server_url.trim().is_empty() {
            anyhow::bail!("server_url must not be empty");
        }
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            anyhow::bail!(
                "server_url must start with http:// or https:// (got '{}')",
                self.server_url
            );
        }
        if self.source_tag.trim().is_empty() {
            anyhow::bail!("source_tag must not be empty");
        }
        if self.agent_cache.ttl_ms == 0 {
            anyhow::bail!("agent_cache.ttl_ms must be greater than 0");
        }
        if self.http.timeout_secs == 0 {
            anyhow::bail!("http.timeout_secs must be greater than 0");
        }
        for (i, trigger) in self.triggers.iter().enumerate() {
            if trigger.id.trim().is_empty() {
                anyhow::bail!("triggers[{i}]._id must not be empty");
            }
        }
        for (i, department) in self.departments.iter().enumerate() {
            if department.id.trim().is_empty() {
                anyhow::bail!("departments[{i}]._id must not be empty");
            }
        }
        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(SERVER_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.server_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(AGENT_TTL_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ttl_ms) => self.agent_cache.ttl_ms = ttl_ms,
                Err(_) => tracing::warn!("Ignoring invalid {AGENT_TTL_ENV}='{raw}'"),
            }
        }
    }

    pub fn agent_ttl(&self) -> Duration {
        Duration::from_millis(self.agent_cache.ttl_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    /// Session state a new widget starts from.
    pub fn initial_state(&self) -> SessionState {
        let mut state = SessionState::default();
        state.iframe.language.clone_from(&self.widget.language);
        state.iframe.theme = self.widget.theme.clone();
        state.config.triggers = self.triggers.clone();
        state.config.departments = self.departments.clone();
        state
    }

    /// JSON schema for `config.toml`.
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(Config)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.server_url, "http://localhost:3000");
        assert_eq!(config.source_tag, "rocketchat");
        assert_eq!(config.agent_ttl(), Duration::from_millis(3_600_000));
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
        config.validate().unwrap();
    }

    #[test]
    fn env_overrides_apply_and_bad_ttl_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides_from(|name| match name {
            SERVER_URL_ENV => Some(" https://chat.example ".into()),
            AGENT_TTL_ENV => Some("1500".into()),
            _ => None,
        });
        assert_eq!(config.server_url, "https://chat.example");
        assert_eq!(config.agent_cache.ttl_ms, 1500);

        config.apply_overrides_from(|name| (name == AGENT_TTL_ENV).then(|| "soon".to_string()));
        assert_eq!(config.agent_cache.ttl_ms, 1500);
    }

    #[test]
    fn validate_rejects_zero_ttl_and_bad_url() {
        let mut config = Config::default();
        config.agent_cache.ttl_ms = 0;
        assert!(config.validate().unwrap_err().to_string().contains("ttl_ms"));

        let mut config = Config::default();
        config.server_url = "chat.example".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.source_tag = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn initial_state_carries_widget_defaults() {
        let config = Config::from_toml(
            r##"
            [widget]
            language = "pt-BR"

            [widget.theme]
            color = "#C1272D"

            [[departments]]
            _id = "d1"
            name = "Sales"
            "##,
        )
        .unwrap();

        let state = config.initial_state();
        assert_eq!(state.iframe.language.as_deref(), Some("pt-BR"));
        assert_eq!(state.iframe.theme.color.as_deref(), Some("#C1272D"));
        assert_eq!(state.config.departments[0].name, "Sales");
        assert!(state.minimized);
    }

    #[test]
    fn json_schema_lists_top_level_fields() {
        let schema = Config::json_schema();
        let properties = schema["properties"].as_object().unwrap();
        assert!(properties.contains_key("server_url"));
        assert!(properties.contains_key("agent_cache"));
        assert!(properties.contains_key("triggers"));
        assert!(!properties.contains_key("config_path"));
    }

    #[tokio::test]
    async fn load_reads_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widget.toml");
        std::fs::write(&path, "source_tag = \"acme\"\n[http]\ntimeout_secs = 5\n").unwrap();

        let config = Config::load(Some(&path)).await.unwrap();

        assert_eq!(config.source_tag, "acme");
        assert_eq!(config.http.timeout_secs, 5);
        assert_eq!(config.config_path, path);
    }

    #[tokio::test]
    async fn load_fails_for_missing_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("absent.toml")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
