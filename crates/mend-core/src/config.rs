//! Configuration management for mend
//!
//! This module provides the repository-level settings for the patch pipeline:
//! the target source unit, generation service, policy gate, sandbox thresholds,
//! phase plan and operator test cases.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{MendError, Result, TestCase};

/// Repository-level mend configuration
///
/// Loaded from `.mend/config.toml` in the repo root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MendConfig {
    /// Source file the pipeline patches
    #[serde(default = "default_target_file")]
    pub target_file: String,

    /// Function the sandbox calls for each test case
    #[serde(default = "default_entry_point")]
    pub entry_point: String,

    /// Directory for pipeline state (phase record, generation cache)
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub patch: PatchConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub goals: GoalsConfig,

    #[serde(default)]
    pub reflection: ReflectionConfig,

    /// Cases every candidate must be evaluated against
    #[serde(default = "default_test_cases")]
    pub test_cases: Vec<TestCase>,
}

/// Which wire format the generation service speaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationProvider {
    #[default]
    Anthropic,
    /// `/v1/chat/completions`-style endpoints (OpenAI, Hugging Face router, vLLM)
    OpenaiCompatible,
}

/// Generation service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub provider: GenerationProvider,

    #[serde(default = "default_model")]
    pub model: String,

    /// Override for the provider's default URL
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Environment variable containing the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_query_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound for one query, retries included
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Save cached responses under `state_dir`
    #[serde(default = "default_true")]
    pub persist_cache: bool,
}

/// Patch generation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchConfig {
    /// Largest accepted number of lines across all hunks
    #[serde(default = "default_max_hunk_lines")]
    pub max_hunk_lines: usize,

    #[serde(default = "default_patch_max_tokens")]
    pub max_tokens: usize,
}

/// Lexical policy filter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Tokens that reject a proposal outright (case-insensitive substring)
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,

    /// Tokens that indicate network capability
    #[serde(default = "default_network_keywords")]
    pub network_keywords: Vec<String>,

    /// First phase index at which network capability is allowed
    #[serde(default = "default_network_phase_threshold")]
    pub network_phase_threshold: usize,
}

/// Sandbox execution and acceptance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    #[serde(default = "default_accuracy_floor")]
    pub accuracy_floor: f64,

    #[serde(default = "default_latency_ceiling_secs")]
    pub latency_ceiling_secs: f64,

    /// Candidates shorter than this are treated as truncated
    #[serde(default = "default_min_source_len")]
    pub min_source_len: usize,

    #[serde(default = "default_case_timeout_secs")]
    pub case_timeout_secs: u64,

    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

/// Ordered improvement phases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalsConfig {
    #[serde(default = "default_phases")]
    pub phases: Vec<PhaseConfig>,
}

/// One improvement phase and its seed queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub description: String,
    #[serde(default)]
    pub queries: Vec<String>,
}

/// Background reflection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_alert_capacity")]
    pub alert_capacity: usize,
}

// Default value providers
fn default_target_file() -> String {
    "core.py".to_string()
}

fn default_entry_point() -> String {
    "process_query".to_string()
}

fn default_state_dir() -> String {
    ".mend".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_query_max_tokens() -> usize {
    200
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_max_hunk_lines() -> usize {
    30
}

fn default_patch_max_tokens() -> usize {
    500
}

fn default_denylist() -> Vec<String> {
    ["hack", "delete", "malware", "bias", "hate", "unauthorized"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_network_keywords() -> Vec<String> {
    ["requests", "urllib", "socket", "http.client", "httpx", "aiohttp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_network_phase_threshold() -> usize {
    4
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_accuracy_floor() -> f64 {
    0.8
}

fn default_latency_ceiling_secs() -> f64 {
    1.0
}

fn default_min_source_len() -> usize {
    10
}

fn default_case_timeout_secs() -> u64 {
    5
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

fn default_interval_secs() -> u64 {
    300
}

fn default_alert_capacity() -> usize {
    100
}

fn default_phases() -> Vec<PhaseConfig> {
    let phase = |description: &str, query: &str| PhaseConfig {
        description: description.to_string(),
        queries: vec![query.to_string()],
    };
    vec![
        phase(
            "Patch to optimize existing functions for efficiency (e.g., better algorithms).",
            "Patch sorting for faster performance on large lists.",
        ),
        phase(
            "Patch to add simple new functions (e.g., basic math or string ops).",
            "Patch to add a simple math addition handler to queries.",
        ),
        phase(
            "Patch to introduce state and memory for query history.",
            "Patch to add query history memory to remember last input.",
        ),
        phase(
            "Patch to enable multi-turn conversational handling.",
            "Patch to handle follow-up questions based on history.",
        ),
        phase(
            "Patch to implement a self-contained code generator (e.g., template-based) to replace external LLM.",
            "Patch to implement a basic template-based code generator to reduce LLM dependency.",
        ),
    ]
}

fn default_test_cases() -> Vec<TestCase> {
    vec![
        TestCase::new("hello", "Hello! How can I help?"),
        TestCase::new("sort 5 3 1", serde_json::json!([1, 3, 5])),
    ]
}

impl MendConfig {
    /// Load configuration from `.mend/config.toml` or use defaults
    pub fn load_or_default(repo_root: &Path) -> Result<Self> {
        let config_path = repo_root.join(".mend/config.toml");

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content).map_err(|e| {
                MendError::Config(format!("Failed to parse config file: {}", e))
            })?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Write default configuration to `.mend/config.toml`
    pub fn write_default(repo_root: &Path) -> Result<PathBuf> {
        let config_dir = repo_root.join(".mend");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| MendError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.goals.phases.is_empty() {
            return Err(MendError::Config("at least one phase is required".to_string()));
        }
        if !(0.0..=1.0).contains(&self.sandbox.accuracy_floor) {
            return Err(MendError::Config(format!(
                "accuracy_floor must be within 0.0..=1.0, got {}",
                self.sandbox.accuracy_floor
            )));
        }
        if self.sandbox.latency_ceiling_secs <= 0.0 {
            return Err(MendError::Config(
                "latency_ceiling_secs must be positive".to_string(),
            ));
        }
        if self.sandbox.interpreter.trim().is_empty() {
            return Err(MendError::Config("sandbox interpreter is empty".to_string()));
        }
        if self.patch.max_hunk_lines == 0 {
            return Err(MendError::Config("max_hunk_lines must be at least 1".to_string()));
        }
        if self.generation.timeout_secs == 0 || self.sandbox.case_timeout_secs == 0 {
            return Err(MendError::Config("timeouts must be at least 1 second".to_string()));
        }
        Ok(())
    }

    /// Absolute path of the target file
    pub fn target_path(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(&self.target_file)
    }

    /// Absolute path of the state directory
    pub fn state_path(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(&self.state_dir)
    }
}

impl Default for MendConfig {
    fn default() -> Self {
        Self {
            target_file: default_target_file(),
            entry_point: default_entry_point(),
            state_dir: default_state_dir(),
            generation: GenerationConfig::default(),
            patch: PatchConfig::default(),
            policy: PolicyConfig::default(),
            sandbox: SandboxConfig::default(),
            goals: GoalsConfig::default(),
            reflection: ReflectionConfig::default(),
            test_cases: default_test_cases(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: GenerationProvider::default(),
            model: default_model(),
            endpoint: None,
            api_key_env: default_api_key_env(),
            max_tokens: default_query_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            persist_cache: true,
        }
    }
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            max_hunk_lines: default_max_hunk_lines(),
            max_tokens: default_patch_max_tokens(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            denylist: default_denylist(),
            network_keywords: default_network_keywords(),
            network_phase_threshold: default_network_phase_threshold(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            accuracy_floor: default_accuracy_floor(),
            latency_ceiling_secs: default_latency_ceiling_secs(),
            min_source_len: default_min_source_len(),
            case_timeout_secs: default_case_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl Default for GoalsConfig {
    fn default() -> Self {
        Self {
            phases: default_phases(),
        }
    }
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            alert_capacity: default_alert_capacity(),
        }
    }
}
