//! Configuration loading and types for s3verify.
//!
//! Configuration is read from an optional YAML file and deserialized into
//! the [`Config`] struct.  Command-line flags and environment variables are
//! applied on top by the binary, then the result is validated with `garde`.

use garde::Validate;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct Config {
    /// Server under test.
    #[serde(default)]
    #[garde(dive)]
    pub server: ServerConfig,

    /// Key pair used to sign every request.
    #[serde(default)]
    #[garde(dive)]
    pub auth: AuthConfig,

    /// How the suite runs.
    #[serde(default)]
    #[garde(dive)]
    pub run: RunConfig,

    /// Logging settings.
    #[serde(default)]
    #[garde(dive)]
    pub logging: LoggingConfig,
}

/// The endpoint under test.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ServerConfig {
    /// Base URL, e.g. `http://127.0.0.1:9000`.  Requests are path-style.
    #[serde(default = "default_endpoint")]
    #[garde(pattern(r"^https?://[^/\s]+/?$"))]
    pub endpoint: String,

    /// Region in the credential scope.
    #[serde(default = "default_region")]
    #[garde(length(min = 1))]
    pub region: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            region: default_region(),
        }
    }
}

/// Authentication settings.
#[derive(Clone, Default, Deserialize, Validate)]
pub struct AuthConfig {
    /// Access key (also accepts `access_key_id`).
    #[serde(alias = "access_key_id", default)]
    #[garde(length(min = 1))]
    pub access_key: String,

    /// Secret key (also accepts `secret_access_key`).
    #[serde(alias = "secret_access_key", default)]
    #[garde(length(min = 1))]
    pub secret_key: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_key", &self.access_key)
            .field("secret_key", &"**REDACTED**")
            .finish()
    }
}

/// Suite execution settings.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RunConfig {
    /// Maximum fixture operations in flight within one batch.
    #[serde(default = "default_concurrency")]
    #[garde(range(min = 1, max = 256))]
    pub concurrency: usize,

    /// Objects seeded per case.
    #[serde(default = "default_objects")]
    #[garde(range(min = 1, max = 64))]
    pub objects: usize,

    /// Create shared fixtures once and also run the read-only cases on them.
    #[serde(default)]
    #[garde(skip)]
    pub prepare: bool,

    /// Leave the shared fixtures in place after the run.
    #[serde(default)]
    #[garde(skip)]
    pub keep_fixtures: bool,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    #[garde(range(min = 1))]
    pub timeout_seconds: u64,
}

impl RunConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            objects: default_objects(),
            prepare: false,
            keep_fixtures: false,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.  `RUST_LOG` wins.
    #[serde(default = "default_log_level")]
    #[garde(length(min = 1))]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    #[garde(pattern(r"^(text|json)$"))]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_endpoint() -> String {
    "http://127.0.0.1:9000".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_concurrency() -> usize {
    crate::DEFAULT_CONCURRENCY
}

fn default_objects() -> usize {
    crate::DEFAULT_OBJECTS
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

/// Check every constraint, reporting all violations at once.
pub fn validate(config: &Config) -> anyhow::Result<()> {
    config
        .validate()
        .map_err(|report| anyhow::anyhow!("invalid configuration:\n{report}"))
}
