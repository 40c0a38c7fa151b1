//! Runtime configuration for the dispatcher and workers.
//!
//! Values come from environment variables with sensible defaults; the CLI
//! layers its own flag overrides on top of [`ForgeConfig::from_env`].

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// How workers treat a job's `depends_on` link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DependencyPolicy {
    /// A job waits (is re-enqueued) until its predecessor has a terminal result.
    #[default]
    Strict,
    /// `depends_on` is recorded metadata only; steps may run out of order.
    Advisory,
}

impl FromStr for DependencyPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" | "gate" => Ok(Self::Strict),
            "advisory" | "metadata" => Ok(Self::Advisory),
            other => Err(ConfigError::InvalidValue {
                key: "FORGE_DEPENDENCY_POLICY".to_string(),
                message: format!("expected 'strict' or 'advisory', got '{}'", other),
            }),
        }
    }
}

impl std::fmt::Display for DependencyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyPolicy::Strict => write!(f, "strict"),
            DependencyPolicy::Advisory => write!(f, "advisory"),
        }
    }
}

/// Configuration shared by every agent-forge component.
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    // Store settings
    /// Redis connection URL.
    pub redis_url: String,
    /// Upper bound for a single store round-trip.
    pub store_timeout: Duration,

    // Collaborator settings
    /// Base URL of the OpenAI-compatible API.
    pub llm_api_base: String,
    /// API key for the collaborator, if any.
    pub llm_api_key: Option<String>,
    /// Model used when an agent does not name one.
    pub default_model: String,
    /// Completion token cap per call.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,

    // Retention
    /// How long result records live.
    pub result_ttl: Duration,
    /// How long upload records live.
    pub upload_ttl: Duration,

    // Caches
    /// TTL of the memoized health snapshot.
    pub health_ttl: Duration,
    /// TTL of the memoized analytics summary.
    pub analytics_ttl: Duration,

    // Worker settings
    /// Number of worker loops to run in the `worker` process.
    pub num_workers: usize,
    /// Sleep between polls when every queue is empty.
    pub poll_interval: Duration,
    /// Time box for a single collaborator call.
    pub job_timeout: Duration,
    /// Heartbeats older than this mean the worker is considered down.
    pub heartbeat_stale_after: Duration,
    /// Dependency enforcement policy.
    pub dependency_policy: DependencyPolicy,
    /// How long after creation a job may wait on its predecessor before it
    /// is failed. Measured from `created_at`, so it does not depend on how
    /// many workers keep requeueing the job.
    pub dependency_timeout: Duration,
    /// Minimum spacing between index expiry sweeps.
    pub sweep_interval: Duration,
    /// Timeout for graceful worker shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            store_timeout: Duration::from_millis(2000),

            llm_api_base: "https://api.openai.com/v1".to_string(),
            llm_api_key: None,
            default_model: "gpt-4o-mini".to_string(),
            max_tokens: 800,
            temperature: 0.7,

            result_ttl: Duration::from_secs(3600),
            upload_ttl: Duration::from_secs(7 * 86_400),

            health_ttl: Duration::from_secs(5),
            analytics_ttl: Duration::from_secs(60),

            num_workers: 1,
            poll_interval: Duration::from_millis(1000),
            job_timeout: Duration::from_secs(120),
            heartbeat_stale_after: Duration::from_secs(120),
            dependency_policy: DependencyPolicy::Strict,
            dependency_timeout: Duration::from_secs(1800),
            sweep_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl ForgeConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REDIS_URL` (default: redis://localhost:6379)
    /// - `FORGE_STORE_TIMEOUT_MS` (default: 2000)
    /// - `LLM_API_BASE` (default: https://api.openai.com/v1)
    /// - `OPENAI_API_KEY` or `LLM_API_KEY`
    /// - `LLM_DEFAULT_MODEL` (default: gpt-4o-mini)
    /// - `LLM_MAX_TOKENS` (default: 800), `LLM_TEMPERATURE` (default: 0.7)
    /// - `FORGE_RESULT_TTL_SECS` (3600), `FORGE_UPLOAD_TTL_SECS` (604800)
    /// - `FORGE_HEALTH_TTL_SECS` (5), `FORGE_ANALYTICS_TTL_SECS` (60)
    /// - `FORGE_WORKERS` (1), `FORGE_POLL_INTERVAL_MS` (1000)
    /// - `FORGE_JOB_TIMEOUT_SECS` (120), `FORGE_HEARTBEAT_STALE_SECS` (120)
    /// - `FORGE_DEPENDENCY_POLICY` (strict | advisory), `FORGE_DEPENDENCY_TIMEOUT_SECS` (1800)
    /// - `FORGE_SWEEP_INTERVAL_SECS` (60)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    ///
    /// `from_env` delegates here; tests pass a map-backed closure instead of
    /// mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("REDIS_URL") {
            config.redis_url = val;
        }
        if let Some(val) = lookup("FORGE_STORE_TIMEOUT_MS") {
            config.store_timeout =
                Duration::from_millis(parse_env_value(&val, "FORGE_STORE_TIMEOUT_MS")?);
        }

        if let Some(val) = lookup("LLM_API_BASE") {
            config.llm_api_base = val.trim_end_matches('/').to_string();
        }
        config.llm_api_key = lookup("OPENAI_API_KEY")
            .or_else(|| lookup("LLM_API_KEY"))
            .filter(|k| !k.is_empty());
        if let Some(val) = lookup("LLM_DEFAULT_MODEL") {
            config.default_model = val;
        }
        if let Some(val) = lookup("LLM_MAX_TOKENS") {
            config.max_tokens = parse_env_value(&val, "LLM_MAX_TOKENS")?;
        }
        if let Some(val) = lookup("LLM_TEMPERATURE") {
            config.temperature = parse_env_value(&val, "LLM_TEMPERATURE")?;
        }

        if let Some(val) = lookup("FORGE_RESULT_TTL_SECS") {
            config.result_ttl = parse_secs(&val, "FORGE_RESULT_TTL_SECS")?;
        }
        if let Some(val) = lookup("FORGE_UPLOAD_TTL_SECS") {
            config.upload_ttl = parse_secs(&val, "FORGE_UPLOAD_TTL_SECS")?;
        }
        if let Some(val) = lookup("FORGE_HEALTH_TTL_SECS") {
            config.health_ttl = parse_secs(&val, "FORGE_HEALTH_TTL_SECS")?;
        }
        if let Some(val) = lookup("FORGE_ANALYTICS_TTL_SECS") {
            config.analytics_ttl = parse_secs(&val, "FORGE_ANALYTICS_TTL_SECS")?;
        }

        if let Some(val) = lookup("FORGE_WORKERS") {
            config.num_workers = parse_env_value(&val, "FORGE_WORKERS")?;
        }
        if let Some(val) = lookup("FORGE_POLL_INTERVAL_MS") {
            config.poll_interval =
                Duration::from_millis(parse_env_value(&val, "FORGE_POLL_INTERVAL_MS")?);
        }
        if let Some(val) = lookup("FORGE_JOB_TIMEOUT_SECS") {
            config.job_timeout = parse_secs(&val, "FORGE_JOB_TIMEOUT_SECS")?;
        }
        if let Some(val) = lookup("FORGE_HEARTBEAT_STALE_SECS") {
            config.heartbeat_stale_after = parse_secs(&val, "FORGE_HEARTBEAT_STALE_SECS")?;
        }
        if let Some(val) = lookup("FORGE_DEPENDENCY_POLICY") {
            config.dependency_policy = val.parse()?;
        }
        if let Some(val) = lookup("FORGE_DEPENDENCY_TIMEOUT_SECS") {
            config.dependency_timeout = parse_secs(&val, "FORGE_DEPENDENCY_TIMEOUT_SECS")?;
        }
        if let Some(val) = lookup("FORGE_SWEEP_INTERVAL_SECS") {
            config.sweep_interval = parse_secs(&val, "FORGE_SWEEP_INTERVAL_SECS")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url cannot be empty".to_string(),
            ));
        }

        if self.num_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "num_workers must be greater than 0".to_string(),
            ));
        }

        if self.job_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "job_timeout must be greater than 0".to_string(),
            ));
        }

        if self.dependency_timeout < self.job_timeout {
            return Err(ConfigError::ValidationFailed(format!(
                "dependency_timeout ({:?}) must be at least job_timeout ({:?})",
                self.dependency_timeout, self.job_timeout
            )));
        }

        if self.store_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "store_timeout must be greater than 0".to_string(),
            ));
        }

        if self.result_ttl.as_secs() == 0 || self.upload_ttl.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "retention TTLs must be at least one second".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }

        if self.default_model.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "default_model cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Sets the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Sets the number of worker loops.
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the collaborator time box.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Sets the dependency policy.
    pub fn with_dependency_policy(mut self, policy: DependencyPolicy) -> Self {
        self.dependency_policy = policy;
        self
    }

    /// Sets the result retention.
    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    /// Sets the health snapshot TTL.
    pub fn with_health_ttl(mut self, ttl: Duration) -> Self {
        self.health_ttl = ttl;
        self
    }

    /// Sets the analytics summary TTL.
    pub fn with_analytics_ttl(mut self, ttl: Duration) -> Self {
        self.analytics_ttl = ttl;
        self
    }

    pub fn with_dependency_timeout(mut self, timeout: Duration) -> Self {
        self.dependency_timeout = timeout;
        self
    }

    /// Sets the default model.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

/// Parse an environment variable value into the target type.
fn parse_env_value<T: FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

fn parse_secs(value: &str, key: &str) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(parse_env_value(value, key)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ForgeConfig::default();
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.result_ttl, Duration::from_secs(3600));
        assert_eq!(config.upload_ttl, Duration::from_secs(604_800));
        assert_eq!(config.health_ttl, Duration::from_secs(5));
        assert_eq!(config.analytics_ttl, Duration::from_secs(60));
        assert_eq!(config.default_model, "gpt-4o-mini");
        assert_eq!(config.max_tokens, 800);
        assert_eq!(config.dependency_policy, DependencyPolicy::Strict);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ForgeConfig::from_lookup(lookup_from(&[
            ("REDIS_URL", "redis://cache:6380"),
            ("LLM_API_BASE", "http://localhost:4000/"),
            ("LLM_API_KEY", "sk-test"),
            ("FORGE_RESULT_TTL_SECS", "120"),
            ("FORGE_WORKERS", "4"),
            ("FORGE_DEPENDENCY_POLICY", "advisory"),
            ("FORGE_POLL_INTERVAL_MS", "50"),
        ]))
        .expect("config should parse");

        assert_eq!(config.redis_url, "redis://cache:6380");
        assert_eq!(config.llm_api_base, "http://localhost:4000");
        assert_eq!(config.llm_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.result_ttl, Duration::from_secs(120));
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.dependency_policy, DependencyPolicy::Advisory);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_openai_key_takes_precedence() {
        let config = ForgeConfig::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "sk-openai"),
            ("LLM_API_KEY", "sk-other"),
        ]))
        .expect("config should parse");
        assert_eq!(config.llm_api_key.as_deref(), Some("sk-openai"));
    }

    #[test]
    fn test_invalid_value_reports_key() {
        let err = ForgeConfig::from_lookup(lookup_from(&[("FORGE_WORKERS", "many")]))
            .expect_err("should reject non-numeric worker count");
        assert!(err.to_string().contains("FORGE_WORKERS"));
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let err = ForgeConfig::from_lookup(lookup_from(&[("FORGE_WORKERS", "0")]))
            .expect_err("zero workers is invalid");
        assert!(err.to_string().contains("num_workers"));
    }

    #[test]
    fn test_dependency_policy_parse() {
        assert_eq!(
            "STRICT".parse::<DependencyPolicy>().ok(),
            Some(DependencyPolicy::Strict)
        );
        assert_eq!(
            "advisory".parse::<DependencyPolicy>().ok(),
            Some(DependencyPolicy::Advisory)
        );
        assert!("sometimes".parse::<DependencyPolicy>().is_err());
        assert_eq!(DependencyPolicy::Advisory.to_string(), "advisory");
    }

    #[test]
    fn test_builder_methods() {
        let config = ForgeConfig::new()
            .with_num_workers(3)
            .with_poll_interval(Duration::from_millis(10))
            .with_job_timeout(Duration::from_secs(5))
            .with_dependency_policy(DependencyPolicy::Advisory)
            .with_dependency_timeout(Duration::from_secs(600));

        assert_eq!(config.num_workers, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.job_timeout, Duration::from_secs(5));
        assert_eq!(config.dependency_policy, DependencyPolicy::Advisory);
        assert_eq!(config.dependency_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_dependency_timeout_must_cover_a_job() {
        let config = ForgeConfig::new()
            .with_job_timeout(Duration::from_secs(120))
            .with_dependency_timeout(Duration::from_secs(60));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));

        let config = ForgeConfig::from_lookup(|key| {
            (key == "FORGE_DEPENDENCY_TIMEOUT_SECS").then(|| "900".to_string())
        })
        .unwrap();
        assert_eq!(config.dependency_timeout, Duration::from_secs(900));
    }
}
