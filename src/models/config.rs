//! Configuration models for labelrun.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! The user resolves these unknowns at runtime via config file; nothing in
//! the core reads process environment after `Config::resolve_service`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level configuration for labelrun.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Classification service endpoint
    #[serde(default)]
    pub service: ServiceConfig,

    /// Prompt and category set
    pub classification: ClassificationConfig,

    /// Input dataset
    pub dataset: DatasetConfig,

    /// Checkpoint location
    pub checkpoint: CheckpointConfig,

    /// Batch runner settings
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// OpenAI-compatible endpoint configuration.
///
/// K_i: Every endpoint speaks the chat completions API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// API key (can also be set via the env var named in `api_key_env`)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL for the API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model ID
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum completion tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: f64,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Transport-level attempts per call (1 = no transport retry)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Custom headers; values may contain ${ENV_VAR}
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    256
}

fn default_timeout() -> u64 {
    180
}

fn default_max_retries() -> u32 {
    1
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            headers: HashMap::new(),
        }
    }
}

/// Credentials and endpoint settings after env resolution.
///
/// This is what the client constructor receives; it never looks at the
/// process environment itself.
#[derive(Debug, Clone)]
pub struct ResolvedService {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub headers: HashMap<String, String>,
}

/// What to do with a record whose response could not be interpreted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParseFailurePolicy {
    /// Persist the record with the null category (terminal for the record)
    #[default]
    Sentinel,
    /// Leave the record unprocessed so a later cycle tries again
    Retry,
}

/// Prompt and category configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Path to system prompt file
    pub system_prompt: PathBuf,

    /// Allowed category labels; empty accepts any label
    #[serde(default)]
    pub categories: Vec<String>,

    /// Handling of uninterpretable responses
    #[serde(default)]
    pub parse_failure: ParseFailurePolicy,
}

/// Input dataset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// CSV or JSONL file
    pub path: PathBuf,

    /// Column holding the record text
    #[serde(default = "default_text_column")]
    pub text_column: String,

    /// Column holding the ground-truth label
    #[serde(default = "default_label_column")]
    pub label_column: Option<String>,

    /// Column holding the record index; row position is used when absent
    #[serde(default)]
    pub index_column: Option<String>,
}

fn default_text_column() -> String {
    "text".to_string()
}

fn default_label_column() -> Option<String> {
    Some("label".to_string())
}

/// Checkpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Checkpoint CSV path
    pub path: PathBuf,
}

/// Batch runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Total records to classify before stopping
    #[serde(default = "default_target_count")]
    pub target_count: u64,

    /// Records processed per persisted batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Failures before a record is dead-lettered (0 = retry forever)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-record timeout for the service call
    #[serde(default = "default_record_timeout")]
    pub record_timeout_secs: u64,

    /// Stop after this many cycles in one invocation
    #[serde(default)]
    pub max_cycles: Option<u32>,
}

fn default_target_count() -> u64 {
    10_000
}

fn default_batch_size() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    3
}

fn default_record_timeout() -> u64 {
    300
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            target_count: default_target_count(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            record_timeout_secs: default_record_timeout(),
            max_cycles: None,
        }
    }
}

impl RunnerConfig {
    /// Attempt bound, `None` when retries are unbounded.
    pub fn attempt_limit(&self) -> Option<u32> {
        (self.max_attempts > 0).then_some(self.max_attempts)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_owned(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.batch_size == 0 {
            return Err(ConfigError::Invalid("runner.batch_size must be > 0".into()));
        }
        if self.runner.target_count == 0 {
            return Err(ConfigError::Invalid(
                "runner.target_count must be > 0".into(),
            ));
        }
        if self.runner.record_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "runner.record_timeout_secs must be > 0".into(),
            ));
        }
        if self.service.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "service.max_retries must be >= 1".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for category in &self.classification.categories {
            let key = category.trim().to_lowercase();
            if key.is_empty() {
                return Err(ConfigError::Invalid("empty category label".into()));
            }
            if !seen.insert(key) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate category label '{category}'"
                )));
            }
        }
        Ok(())
    }

    /// Resolve API key from config or environment.
    ///
    /// B_i(api key available) → Result
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.service.api_key {
            return Ok(expand_env_vars(key));
        }

        std::env::var(&self.service.api_key_env).map_err(|_| ConfigError::MissingApiKey {
            env_var: self.service.api_key_env.clone(),
        })
    }

    /// Resolve everything the client needs into an explicit object.
    ///
    /// Local endpoints may run without a key, so a missing key is only an
    /// error when `require_key` is set.
    pub fn resolve_service(&self, require_key: bool) -> Result<ResolvedService, ConfigError> {
        let api_key = match self.resolve_api_key() {
            Ok(key) => Some(key),
            Err(e) if require_key => return Err(e),
            Err(_) => None,
        };

        Ok(ResolvedService {
            api_key,
            base_url: self.service.base_url.trim_end_matches('/').to_string(),
            model: self.service.model.clone(),
            max_tokens: self.service.max_tokens,
            temperature: self.service.temperature,
            timeout_secs: self.service.timeout_secs,
            max_retries: self.service.max_retries,
            headers: expand_headers(&self.service.headers),
        })
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let re = match regex::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };

    re.replace_all(s, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| cap[0].to_string())
    })
    .into_owned()
}

/// Expand environment variables in all headers.
pub fn expand_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), expand_env_vars(v)))
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key: set {env_var} env var or service.api_key in config")]
    MissingApiKey { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[classification]
system_prompt = "prompts/system.md"
categories = ["Anxiety", "Bipolar", "Depression", "Normal"]

[dataset]
path = "data/records.csv"

[checkpoint]
path = "out/results.csv"
"#;

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.runner.target_count, 10_000);
        assert_eq!(config.runner.batch_size, 100);
        assert_eq!(config.runner.attempt_limit(), Some(3));
        assert_eq!(config.service.max_retries, 1);
        assert_eq!(config.dataset.text_column, "text");
        assert_eq!(config.dataset.label_column.as_deref(), Some("label"));
        assert_eq!(
            config.classification.parse_failure,
            ParseFailurePolicy::Sentinel
        );
    }

    #[test]
    fn test_zero_attempts_means_unbounded() {
        let toml = format!("{MINIMAL}\n[runner]\nmax_attempts = 0\n");
        let config = Config::from_toml(&toml).unwrap();
        assert_eq!(config.runner.attempt_limit(), None);
    }

    #[test]
    fn test_parse_failure_policy_parses() {
        let toml = MINIMAL.replace(
            "categories =",
            "parse_failure = \"retry\"\ncategories =",
        );
        let config = Config::from_toml(&toml).unwrap();
        assert_eq!(config.classification.parse_failure, ParseFailurePolicy::Retry);
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let toml = format!("{MINIMAL}\n[runner]\nbatch_size = 0\n");
        assert!(matches!(
            Config::from_toml(&toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_categories() {
        let toml = MINIMAL.replace("\"Normal\"]", "\"Normal\", \"normal\"]");
        assert!(matches!(
            Config::from_toml(&toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_explicit_key_wins_over_env() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.service.api_key = Some("sk-inline".to_string());
        config.service.api_key_env = "LABELRUN_TEST_UNSET_KEY".to_string();
        let resolved = config.resolve_service(true).unwrap();
        assert_eq!(resolved.api_key.as_deref(), Some("sk-inline"));
    }

    #[test]
    fn test_missing_key_only_fatal_when_required() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.service.api_key_env = "LABELRUN_TEST_DEFINITELY_UNSET".to_string();
        assert!(matches!(
            config.resolve_service(true),
            Err(ConfigError::MissingApiKey { .. })
        ));
        assert!(config.resolve_service(false).unwrap().api_key.is_none());
    }

    #[test]
    fn test_unset_placeholder_left_unchanged() {
        assert_eq!(
            expand_env_vars("Bearer ${LABELRUN_TEST_DEFINITELY_UNSET}"),
            "Bearer ${LABELRUN_TEST_DEFINITELY_UNSET}"
        );
    }
}
