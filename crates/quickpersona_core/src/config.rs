use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::format::PromptFormat;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub llm: LlmConfig,
    pub persona: PersonaConfig,
    pub profile: ProfileConfig,
    pub templates: TemplateOverrides,
    pub storage: StorageConfig,
}

impl PluginConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: PluginConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if file doesn't exist, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("QP_LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("QP_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("QP_LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("QP_ARCHITECT_TIMEOUT") {
            if let Ok(n) = v.parse() {
                self.llm.timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("QP_MAX_PROMPT_LENGTH") {
            if let Ok(n) = v.parse() {
                self.persona.max_prompt_length = n;
            }
        }
        if let Ok(v) = std::env::var("QP_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// Host provider id of the "architect" model. Empty means the
    /// conversation's own provider.
    pub provider_id: String,
    pub timeout_secs: u64,
    /// Attempts per architect call, including the first one.
    pub max_attempts: u32,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            provider_id: String::new(),
            timeout_secs: 60,
            max_attempts: 2,
            max_tokens: 4096,
            temperature: 0.8,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub max_prompt_length: usize,
    pub confirm_before_apply: bool,
    pub backup_versions: usize,
    pub auto_compress: bool,
    pub enable_guided_generation: bool,
    pub default_prompt_format: PromptFormat,
    /// Unconfirmed drafts older than this are discarded.
    pub pending_timeout_secs: u64,
    /// How long a guided generation waits for the user's supplement reply.
    pub guided_timeout_secs: u64,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            max_prompt_length: 800,
            confirm_before_apply: true,
            backup_versions: 5,
            auto_compress: true,
            enable_guided_generation: true,
            default_prompt_format: PromptFormat::Natural,
            pending_timeout_secs: 600,
            guided_timeout_secs: 120,
        }
    }
}

impl PersonaConfig {
    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_secs)
    }

    pub fn guided_timeout(&self) -> Duration {
        Duration::from_secs(self.guided_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub enabled: bool,
    pub min_messages: usize,
    pub max_buffer_age_secs: u64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_messages: 10,
            max_buffer_age_secs: 300,
        }
    }
}

/// User supplied replacements for the built-in prompt templates.
/// Blank values are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TemplateOverrides {
    pub generate: Option<String>,
    pub refine: Option<String>,
    pub shrink: Option<String>,
    pub convert: Option<String>,
    pub intent: Option<String>,
    pub missing_analysis: Option<String>,
    pub guided_generate: Option<String>,
    pub profile_init: Option<String>,
    pub profile_update: Option<String>,
}

impl TemplateOverrides {
    /// Returns the override if the user set a non-blank one, else `default`.
    pub fn pick<'a>(custom: &'a Option<String>, default: &'a str) -> &'a str {
        match custom {
            Some(s) if !s.trim().is_empty() => s.as_str(),
            _ => default,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of plugin data; backups live in `<data_dir>/backups`.
    pub data_dir: PathBuf,
    pub profile_db: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/plugin_data/quickpersona"),
            profile_db: "profiles.db".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    pub fn profile_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.profile_db)
    }
}

// ============================================================================
// Accessor
// ============================================================================

/// Read access to the live plugin configuration.
///
/// Components hold a `ConfigSource` instead of a config snapshot and call
/// `current()` every time they need a value, so host-side edits take effect
/// on the next command.
pub trait ConfigSource: Send + Sync {
    fn current(&self) -> Arc<PluginConfig>;
}

/// `ConfigSource` backed by an atomically swappable pointer.
#[derive(Debug)]
pub struct SharedConfig {
    inner: ArcSwap<PluginConfig>,
}

impl SharedConfig {
    pub fn new(config: PluginConfig) -> Self {
        Self {
            inner: ArcSwap::from_pointee(config),
        }
    }

    /// Replace the configuration seen by every component.
    pub fn store(&self, config: PluginConfig) {
        self.inner.store(Arc::new(config));
        tracing::info!("Plugin configuration reloaded");
    }
}

impl ConfigSource for SharedConfig {
    fn current(&self) -> Arc<PluginConfig> {
        self.inner.load_full()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = PluginConfig::default();
        assert_eq!(cfg.persona.max_prompt_length, 800);
        assert!(cfg.persona.confirm_before_apply);
        assert_eq!(cfg.persona.backup_versions, 5);
        assert_eq!(cfg.persona.default_prompt_format, PromptFormat::Natural);
        assert!(!cfg.profile.enabled);
        assert_eq!(cfg.profile.min_messages, 10);
        assert_eq!(cfg.llm.timeout_secs, 60);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[persona]
max_prompt_length = 1200
default_prompt_format = "md"
"#;
        let cfg: PluginConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.persona.max_prompt_length, 1200);
        assert_eq!(cfg.persona.default_prompt_format, PromptFormat::Markdown);
        // Defaults for unspecified fields
        assert!(cfg.persona.auto_compress);
        assert_eq!(cfg.llm.max_attempts, 2);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[llm]
provider = "openai"
model = "deepseek-chat"
base_url = "https://api.deepseek.com/v1"
provider_id = "architect"
timeout_secs = 30
max_attempts = 3

[persona]
confirm_before_apply = false
backup_versions = 3
auto_compress = false
enable_guided_generation = false
default_prompt_format = "yaml"
pending_timeout_secs = 60

[profile]
enabled = true
min_messages = 5
max_buffer_age_secs = 120

[templates]
refine = "自定义优化模板 {current_prompt} {feedback}"

[storage]
data_dir = "/tmp/qp"
profile_db = "p.db"
"#;
        let cfg: PluginConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.llm.provider_id, "architect");
        assert_eq!(cfg.llm.timeout(), Duration::from_secs(30));
        assert!(!cfg.persona.confirm_before_apply);
        assert_eq!(cfg.persona.default_prompt_format, PromptFormat::Yaml);
        assert_eq!(cfg.persona.pending_timeout(), Duration::from_secs(60));
        assert!(cfg.profile.enabled);
        assert_eq!(cfg.storage.backups_dir(), PathBuf::from("/tmp/qp/backups"));
        assert_eq!(cfg.storage.profile_db_path(), PathBuf::from("/tmp/qp/p.db"));
        assert!(cfg.templates.refine.is_some());
    }

    #[test]
    fn test_unknown_format_falls_back_to_natural() {
        let cfg: PluginConfig = toml::from_str("[persona]\ndefault_prompt_format = \"rtf\"\n").unwrap();
        assert_eq!(cfg.persona.default_prompt_format, PromptFormat::Natural);
    }

    #[test]
    fn test_template_pick_ignores_blank() {
        let blank = Some("   ".to_string());
        let custom = Some("mine".to_string());
        assert_eq!(TemplateOverrides::pick(&None, "builtin"), "builtin");
        assert_eq!(TemplateOverrides::pick(&blank, "builtin"), "builtin");
        assert_eq!(TemplateOverrides::pick(&custom, "builtin"), "mine");
    }

    #[test]
    fn test_shared_config_sees_updates() {
        let shared = SharedConfig::new(PluginConfig::default());
        let before = shared.current();
        assert_eq!(before.persona.max_prompt_length, 800);

        let mut next = PluginConfig::default();
        next.persona.max_prompt_length = 300;
        shared.store(next);

        // Old snapshot is unchanged, new reads see the update
        assert_eq!(before.persona.max_prompt_length, 800);
        assert_eq!(shared.current().persona.max_prompt_length, 300);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let cfg = PluginConfig::load_or_default("/nonexistent/quickpersona.toml");
        assert!(cfg.persona.confirm_before_apply);
    }
}
