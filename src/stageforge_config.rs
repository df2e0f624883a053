//! Unified configuration system for stageforge.
//!
//! Settings are read from `.stageforge/stageforge.toml` and layered
//! (file → environment → CLI). Every field has a default, so an empty or
//! missing file yields a working configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [llm]
//! base_url = "https://api.deepseek.com/v1"
//! model = "deepseek-chat"
//! api_key_env = "DEEPSEEK_API_KEY"
//! timeout_secs = 180
//!
//! [generation]
//! max_rounds = 4
//! chunk_max_tokens = 4000
//! critique = true
//! inter_artifact_delay_ms = 500
//!
//! [generation.overrides."prototype"]
//! max_rounds = 8
//! chunk_max_tokens = 8000
//! critique = false
//!
//! [context]
//! value_max_chars = 8000
//! total_budget_chars = 36000
//! dependency_max_chars = 4200
//!
//! [ledger]
//! stale_after_minutes = 60
//!
//! [templates]
//! cache_capacity = 64
//! cache_ttl_secs = 300
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-project state directory.
pub const STATE_DIR: &str = ".stageforge";

/// Name of the configuration file inside the state directory.
pub const CONFIG_FILE: &str = "stageforge.toml";

/// Text-generation endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSection {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model identifier sent with every request
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Per-call timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.deepseek.com/v1".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_api_key_env() -> String {
    "DEEPSEEK_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    180
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Per-artifact-type overrides for the generation loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationOverride {
    #[serde(default)]
    pub max_rounds: Option<u32>,
    #[serde(default)]
    pub chunk_max_tokens: Option<u32>,
    #[serde(default)]
    pub critique: Option<bool>,
}

/// Chunked generation loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSection {
    /// Maximum number of model calls per artifact
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Output token cap per round
    #[serde(default = "default_chunk_max_tokens")]
    pub chunk_max_tokens: u32,
    /// End marker for HTML and JSON artifacts
    #[serde(default = "default_structured_end_marker")]
    pub structured_end_marker: String,
    /// Characters of prior output quoted in continuation prompts
    #[serde(default = "default_continuation_tail_chars")]
    pub continuation_tail_chars: usize,
    /// Largest suffix/prefix window scanned when merging chunks
    #[serde(default = "default_merge_window_chars")]
    pub merge_window_chars: usize,
    /// Smallest overlap accepted when merging chunks
    #[serde(default = "default_merge_min_overlap")]
    pub merge_min_overlap: usize,
    /// Run the critique/revise gate after generation
    #[serde(default = "default_critique")]
    pub critique: bool,
    #[serde(default = "default_critique_max_tokens")]
    pub critique_max_tokens: u32,
    #[serde(default = "default_revise_max_tokens")]
    pub revise_max_tokens: u32,
    #[serde(default = "default_repair_max_tokens")]
    pub repair_max_tokens: u32,
    /// Pause between artifact types in a multi-type request
    #[serde(default = "default_inter_artifact_delay_ms")]
    pub inter_artifact_delay_ms: u64,
    /// Overrides keyed by artifact type glob pattern
    #[serde(default)]
    pub overrides: HashMap<String, GenerationOverride>,
}

fn default_max_rounds() -> u32 {
    4
}

fn default_chunk_max_tokens() -> u32 {
    4000
}

fn default_structured_end_marker() -> String {
    "<<END_OF_DOCUMENT>>".to_string()
}

fn default_continuation_tail_chars() -> usize {
    5000
}

fn default_merge_window_chars() -> usize {
    1200
}

fn default_merge_min_overlap() -> usize {
    1
}

fn default_critique() -> bool {
    true
}

fn default_critique_max_tokens() -> u32 {
    600
}

fn default_revise_max_tokens() -> u32 {
    4000
}

fn default_repair_max_tokens() -> u32 {
    8000
}

fn default_inter_artifact_delay_ms() -> u64 {
    500
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            chunk_max_tokens: default_chunk_max_tokens(),
            structured_end_marker: default_structured_end_marker(),
            continuation_tail_chars: default_continuation_tail_chars(),
            merge_window_chars: default_merge_window_chars(),
            merge_min_overlap: default_merge_min_overlap(),
            critique: default_critique(),
            critique_max_tokens: default_critique_max_tokens(),
            revise_max_tokens: default_revise_max_tokens(),
            repair_max_tokens: default_repair_max_tokens(),
            inter_artifact_delay_ms: default_inter_artifact_delay_ms(),
            overrides: HashMap::new(),
        }
    }
}

/// Character budgets for context assembly and compression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSection {
    #[serde(default = "default_value_max_chars")]
    pub value_max_chars: usize,
    #[serde(default = "default_total_budget_chars")]
    pub total_budget_chars: usize,
    #[serde(default = "default_dependency_max_chars")]
    pub dependency_max_chars: usize,
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
    #[serde(default = "default_key_points_max")]
    pub key_points_max: usize,
    #[serde(default = "default_key_point_max_chars")]
    pub key_point_max_chars: usize,
    #[serde(default = "default_conversation_max_chars")]
    pub conversation_max_chars: usize,
}

fn default_value_max_chars() -> usize {
    8000
}

fn default_total_budget_chars() -> usize {
    36000
}

fn default_dependency_max_chars() -> usize {
    4200
}

fn default_summary_max_chars() -> usize {
    1600
}

fn default_key_points_max() -> usize {
    8
}

fn default_key_point_max_chars() -> usize {
    220
}

fn default_conversation_max_chars() -> usize {
    6000
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            value_max_chars: default_value_max_chars(),
            total_budget_chars: default_total_budget_chars(),
            dependency_max_chars: default_dependency_max_chars(),
            summary_max_chars: default_summary_max_chars(),
            key_points_max: default_key_points_max(),
            key_point_max_chars: default_key_point_max_chars(),
            conversation_max_chars: default_conversation_max_chars(),
        }
    }
}

/// Run ledger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSection {
    /// Minutes after which a `running` run is considered abandoned
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: i64,
}

fn default_stale_after_minutes() -> i64 {
    60
}

/// Largest staleness threshold accepted without a warning (one year).
pub const MAX_STALE_AFTER_MINUTES: i64 = 525_600;

impl LedgerSection {
    /// Staleness threshold as a time delta, `None` when out of range.
    pub fn stale_after(&self) -> Option<chrono::TimeDelta> {
        chrono::TimeDelta::try_minutes(self.stale_after_minutes)
    }
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            stale_after_minutes: default_stale_after_minutes(),
        }
    }
}

/// Prompt template cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesSection {
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_cache_capacity() -> usize {
    64
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for TemplatesSection {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// The complete stageforge.toml configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StageforgeToml {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub ledger: LedgerSection,
    #[serde(default)]
    pub templates: TemplatesSection,
}

impl StageforgeToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse stageforge.toml")
    }

    /// Load configuration from `<state_dir>/stageforge.toml`.
    /// Returns default configuration if the file doesn't exist.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let config_path = state_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize stageforge.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `STAGEFORGE_*` environment overrides to the LLM section.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("STAGEFORGE_MODEL")
            && !model.trim().is_empty()
        {
            self.llm.model = model;
        }
        if let Ok(url) = std::env::var("STAGEFORGE_BASE_URL")
            && !url.trim().is_empty()
        {
            self.llm.base_url = url;
        }
        if let Ok(var) = std::env::var("STAGEFORGE_API_KEY_ENV")
            && !var.trim().is_empty()
        {
            self.llm.api_key_env = var;
        }
    }

    /// Effective loop settings for an artifact type.
    ///
    /// `base` carries the catalog's per-type values (if any); config
    /// overrides whose glob pattern matches the type are applied on top.
    pub fn generation_settings(
        &self,
        artifact_type: &str,
        base: &GenerationOverride,
    ) -> GenerationSettings {
        let generation = &self.generation;
        let mut settings = GenerationSettings {
            max_rounds: base.max_rounds.unwrap_or(generation.max_rounds),
            chunk_max_tokens: base.chunk_max_tokens.unwrap_or(generation.chunk_max_tokens),
            critique: base.critique.unwrap_or(generation.critique),
        };

        let mut patterns: Vec<&String> = generation.overrides.keys().collect();
        patterns.sort();
        for pattern in patterns {
            if !pattern_matches(pattern, artifact_type) {
                continue;
            }
            let override_cfg = &generation.overrides[pattern];
            if let Some(rounds) = override_cfg.max_rounds {
                settings.max_rounds = rounds;
            }
            if let Some(tokens) = override_cfg.chunk_max_tokens {
                settings.chunk_max_tokens = tokens;
            }
            if let Some(critique) = override_cfg.critique {
                settings.critique = critique;
            }
        }

        settings.max_rounds = settings.max_rounds.max(1);
        settings
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.llm.base_url.trim().is_empty() {
            warnings.push("[llm] base_url is empty".to_string());
        }
        if self.llm.model.trim().is_empty() {
            warnings.push("[llm] model is empty".to_string());
        }
        if self.generation.max_rounds == 0 {
            warnings.push(
                "[generation] max_rounds is 0; at least one round always runs".to_string(),
            );
        }
        if self.generation.merge_min_overlap > self.generation.merge_window_chars {
            warnings.push(format!(
                "[generation] merge_min_overlap ({}) exceeds merge_window_chars ({}); chunks will never overlap",
                self.generation.merge_min_overlap, self.generation.merge_window_chars
            ));
        }
        if self.context.value_max_chars > self.context.total_budget_chars {
            warnings.push(format!(
                "[context] value_max_chars ({}) exceeds total_budget_chars ({})",
                self.context.value_max_chars, self.context.total_budget_chars
            ));
        }
        if self.ledger.stale_after_minutes <= 0 {
            warnings.push("[ledger] stale_after_minutes must be positive".to_string());
        } else if self.ledger.stale_after_minutes > MAX_STALE_AFTER_MINUTES {
            warnings.push(format!(
                "[ledger] stale_after_minutes ({}) exceeds {}; stale run recovery may be skipped",
                self.ledger.stale_after_minutes, MAX_STALE_AFTER_MINUTES
            ));
        }

        for (pattern, override_cfg) in &self.generation.overrides {
            if glob::Pattern::new(pattern).is_err() {
                warnings.push(format!("Invalid override pattern '{}'", pattern));
            }
            if override_cfg.max_rounds == Some(0) {
                warnings.push(format!(
                    "max_rounds = 0 in override for pattern '{}'",
                    pattern
                ));
            }
        }

        warnings
    }
}

/// Resolved loop settings for one artifact type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationSettings {
    pub max_rounds: u32,
    pub chunk_max_tokens: u32,
    pub critique: bool,
}

/// Check if a glob pattern matches an artifact type (case-insensitive).
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    glob::Pattern::new(&pattern.to_lowercase())
        .map(|p| p.matches(&name.to_lowercase()))
        .unwrap_or(false)
}

/// Unified configuration that combines `StageforgeToml` with runtime paths.
#[derive(Debug, Clone)]
pub struct StageforgeConfig {
    /// Path to the project directory
    pub project_dir: PathBuf,
    /// Path to the .stageforge directory
    pub state_dir: PathBuf,
    /// Parsed stageforge.toml with environment overrides applied
    pub toml: StageforgeToml,
    /// CLI override: verbose mode
    pub verbose: bool,
}

impl StageforgeConfig {
    /// Create a new config from a project directory.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let state_dir = project_dir.join(STATE_DIR);
        let mut toml = StageforgeToml::load_or_default(&state_dir)?;
        toml.apply_env_overrides();

        Ok(Self {
            project_dir,
            state_dir,
            toml,
            verbose: false,
        })
    }

    /// Create a config with CLI overrides.
    pub fn with_cli_args(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        Ok(config)
    }

    /// Path to stageforge.toml.
    pub fn config_file(&self) -> PathBuf {
        self.state_dir.join(CONFIG_FILE)
    }

    /// Path to the artifact catalog.
    pub fn catalog_file(&self) -> PathBuf {
        self.state_dir.join("catalog.toml")
    }

    /// Root directory for prompt templates.
    pub fn templates_dir(&self) -> PathBuf {
        self.state_dir.join("templates")
    }

    /// Root directory for project stores.
    pub fn projects_dir(&self) -> PathBuf {
        self.state_dir.join("projects")
    }

    /// Path to the run ledger database.
    pub fn ledger_file(&self) -> PathBuf {
        self.state_dir.join("ledger.db")
    }

    /// Path to the log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    /// Per-call timeout for the generation endpoint.
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.llm.timeout_secs)
    }

    /// Staleness threshold for abandoned runs, `None` when out of range.
    pub fn stale_after(&self) -> Option<chrono::TimeDelta> {
        self.toml.ledger.stale_after()
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
