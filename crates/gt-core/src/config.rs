use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration loaded from `~/.gt-eval/config.toml`.
///
/// **Security**: This struct NEVER stores API keys or tokens. The invocation
/// section names the env var holding the credential and
/// [`CredentialProvider`] resolves it at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub invocation: InvocationConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// Load config from `~/.gt-eval/config.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.invocation.validate()?;
        self.rate_limit.validate()?;
        self.batch.validate()?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gt-eval")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Upper bound for any delay or backoff setting, in seconds (one day).
pub const MAX_DELAY_SECS: f64 = 86_400.0;

fn require_non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::Validation(format!(
            "{name} must be a finite, non-negative number of seconds (got {value})"
        )));
    }
    if value > MAX_DELAY_SECS {
        return Err(ConfigError::Validation(format!(
            "{name} must be at most {MAX_DELAY_SECS} seconds (got {value})"
        )));
    }
    Ok(())
}

/// Seconds to a `Duration`, clamped to `[0, MAX_DELAY_SECS]`; NaN maps to zero.
fn clamped_secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.clamp(0.0, MAX_DELAY_SECS)).unwrap_or(Duration::ZERO)
}

fn require_nonzero(name: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Validation(format!("{name} must be greater than 0")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

/// Remote model invocation: endpoint, size limits and retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationConfig {
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Name of the env var holding the bearer token (never the token itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Hard ceiling on request content, in words.
    #[serde(default = "default_max_input_words")]
    pub max_input_words: usize,
    /// Hard ceiling on accepted response size, in words.
    #[serde(default = "default_max_output_words")]
    pub max_output_words: usize,
    /// Outbound `max_tokens` is clamped to this value.
    #[serde(default = "default_max_output_tokens_requested")]
    pub max_output_tokens_requested: u32,
    /// `max_tokens` used when a caller does not ask for a specific size.
    #[serde(default = "default_output_tokens")]
    pub default_output_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_min_backoff_secs")]
    pub min_backoff_secs: f64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: f64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            max_input_words: default_max_input_words(),
            max_output_words: default_max_output_words(),
            max_output_tokens_requested: default_max_output_tokens_requested(),
            default_output_tokens: default_output_tokens(),
            max_retries: default_max_retries(),
            min_backoff_secs: default_min_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl InvocationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "invocation.model_id must not be empty".to_string(),
            ));
        }
        require_nonzero("invocation.max_input_words", self.max_input_words as u64)?;
        require_nonzero("invocation.max_output_words", self.max_output_words as u64)?;
        require_nonzero(
            "invocation.max_output_tokens_requested",
            u64::from(self.max_output_tokens_requested),
        )?;
        require_nonzero("invocation.max_retries", u64::from(self.max_retries))?;
        require_non_negative("invocation.min_backoff_secs", self.min_backoff_secs)?;
        require_non_negative("invocation.max_backoff_secs", self.max_backoff_secs)?;
        if self.max_backoff_secs < self.min_backoff_secs {
            return Err(ConfigError::Validation(format!(
                "invocation.max_backoff_secs ({}) must not be below min_backoff_secs ({})",
                self.max_backoff_secs, self.min_backoff_secs
            )));
        }
        Ok(())
    }

    pub fn min_backoff(&self) -> Duration {
        clamped_secs(self.min_backoff_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        clamped_secs(self.max_backoff_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_model_id() -> String {
    "anthropic.claude-3-5-sonnet-20240620-v1:0".into()
}
fn default_endpoint() -> String {
    "https://bedrock-runtime.us-east-1.amazonaws.com".into()
}
fn default_api_key_env() -> String {
    "AWS_BEARER_TOKEN_BEDROCK".into()
}
fn default_max_input_words() -> usize {
    150_000
}
fn default_max_output_words() -> usize {
    6_200
}
fn default_max_output_tokens_requested() -> u32 {
    10_000
}
fn default_output_tokens() -> u32 {
    2_000
}
fn default_max_retries() -> u32 {
    15
}
fn default_min_backoff_secs() -> f64 {
    5.0
}
fn default_max_backoff_secs() -> f64 {
    30.0
}
fn default_request_timeout_secs() -> u64 {
    120
}

/// Sliding-window admission control for outbound calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_calls_per_minute")]
    pub max_calls_per_minute: u32,
    /// Baseline spacing between calls before exponential scaling.
    #[serde(default = "default_inter_call_delay_secs")]
    pub inter_call_delay_secs: f64,
    #[serde(default = "default_max_dynamic_delay_secs")]
    pub max_dynamic_delay_secs: f64,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls_per_minute: default_max_calls_per_minute(),
            inter_call_delay_secs: default_inter_call_delay_secs(),
            max_dynamic_delay_secs: default_max_dynamic_delay_secs(),
            window_secs: default_window_secs(),
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero(
            "rate_limit.max_calls_per_minute",
            u64::from(self.max_calls_per_minute),
        )?;
        require_nonzero("rate_limit.window_secs", self.window_secs)?;
        require_non_negative("rate_limit.inter_call_delay_secs", self.inter_call_delay_secs)?;
        require_non_negative("rate_limit.max_dynamic_delay_secs", self.max_dynamic_delay_secs)?;
        Ok(())
    }

    pub fn inter_call_delay(&self) -> Duration {
        clamped_secs(self.inter_call_delay_secs)
    }

    pub fn max_dynamic_delay(&self) -> Duration {
        clamped_secs(self.max_dynamic_delay_secs)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_max_calls_per_minute() -> u32 {
    10
}
fn default_inter_call_delay_secs() -> f64 {
    1.0
}
fn default_max_dynamic_delay_secs() -> f64 {
    30.0
}
fn default_window_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_inter_batch_delay_secs")]
    pub inter_batch_delay_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            inter_batch_delay_secs: default_inter_batch_delay_secs(),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("batch.batch_size", self.batch_size as u64)
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_secs(self.inter_batch_delay_secs)
    }
}

fn default_batch_size() -> usize {
    3
}
fn default_inter_batch_delay_secs() -> u64 {
    40
}

/// When the JSON snapshot is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JsonFlushPolicy {
    /// Only when the run finishes.
    #[default]
    EndOfRun,
    /// After every appended record.
    PerRecord,
}

/// How the tabular log treats sample ids it already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TabularPolicy {
    /// Every record gets a row, reprocessed samples included.
    #[default]
    Append,
    /// Rows for sample ids already present in the log are not written again.
    SkipExisting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default)]
    pub json_flush: JsonFlushPolicy,
    #[serde(default)]
    pub tabular: TabularPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            json_flush: JsonFlushPolicy::default(),
            tabular: TabularPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// `<output_dir>/<label>_results.json`
    pub fn json_path(&self, label: &str) -> PathBuf {
        PathBuf::from(&self.output_dir).join(format!("{label}_results.json"))
    }

    /// `<output_dir>/<label>_results.csv`
    pub fn tabular_path(&self, label: &str) -> PathBuf {
        PathBuf::from(&self.output_dir).join(format!("{label}_results.csv"))
    }
}

fn default_output_dir() -> String {
    "results".into()
}

// ---------------------------------------------------------------------------
// Credential provider: resolves secrets from the environment at runtime
// ---------------------------------------------------------------------------

/// Reads credentials from environment variables at runtime.
///
/// Config stores env var *names*; this provider resolves them to values on
/// demand. Empty values are treated as unset.
pub struct CredentialProvider;

impl CredentialProvider {
    /// Read a credential from a named env var.
    pub fn from_env(var_name: &str) -> Option<String> {
        std::env::var(var_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Bearer token for the model endpoint, if one is configured.
    pub fn invocation_token(cfg: &InvocationConfig) -> Option<String> {
        Self::from_env(&cfg.api_key_env)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
