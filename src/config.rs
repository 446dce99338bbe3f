use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::generator::ChainShape;
use crate::store::BackendKind;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ConfigFormat {
    Auto,
    Toml,
    Yaml,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {format:?} config: {details}")]
    Parse {
        format: ConfigFormat,
        details: String,
    },
    #[error("configuration invalid: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadConfig {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub chain: ChainShape,
    #[serde(default)]
    pub write: WritePolicy,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunSection {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Global run-time budget.
    #[serde(default = "default_run_time_ms")]
    pub run_time_ms: u64,
    /// Cadence of per-worker throughput samples.
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
    /// Pending statements tolerated before a commit (strictly greater triggers).
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: usize,
    /// Base seed; worker `n` uses `seed + n`. Entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Upper bound on a single apply call.
    #[serde(default)]
    pub apply_timeout_ms: Option<u64>,
}

const fn default_workers() -> usize {
    4
}

const fn default_run_time_ms() -> u64 {
    1_000
}

const fn default_report_interval_ms() -> u64 {
    5_000
}

const fn default_batch_threshold() -> usize {
    15
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            run_time_ms: default_run_time_ms(),
            report_interval_ms: default_report_interval_ms(),
            batch_threshold: default_batch_threshold(),
            seed: None,
            apply_timeout_ms: None,
        }
    }
}

impl RunSection {
    pub fn run_time(&self) -> Duration {
        Duration::from_millis(self.run_time_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn apply_timeout(&self) -> Option<Duration> {
        self.apply_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum WriteErrorPolicy {
    /// Drop the failed batch and keep going.
    Skip,
    /// Retry up to `max-retries` times, then drop.
    Retry,
    /// Stop the worker on the first failed commit.
    Abort,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WritePolicy {
    #[serde(default = "default_on_error")]
    pub on_error: WriteErrorPolicy,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

const fn default_on_error() -> WriteErrorPolicy {
    WriteErrorPolicy::Retry
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_retry_backoff_ms() -> u64 {
    50
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            on_error: default_on_error(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl WritePolicy {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Number of extra attempts made after the first failed apply.
    pub fn retries(&self) -> u32 {
        match self.on_error {
            WriteErrorPolicy::Retry => self.max_retries,
            WriteErrorPolicy::Skip | WriteErrorPolicy::Abort => 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

const fn default_backend() -> BackendKind {
    BackendKind::Memory
}

fn default_endpoint() -> String {
    "http://127.0.0.1:64210".to_string()
}

const fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            endpoint: default_endpoint(),
            username: None,
            password: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl LoadConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.workers == 0 {
            return Err(ConfigError::Validation(
                "worker pool must contain at least one worker".into(),
            ));
        }
        if self.run.run_time_ms == 0 {
            return Err(ConfigError::Validation(
                "run time must be greater than zero".into(),
            ));
        }
        if self.run.report_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "report interval must be greater than zero".into(),
            ));
        }
        if self.run.apply_timeout_ms == Some(0) {
            return Err(ConfigError::Validation(
                "apply timeout must be greater than zero when set".into(),
            ));
        }
        if !self.chain.is_valid() {
            return Err(ConfigError::Validation(format!(
                "chain length range {}..={} is invalid (minimum length is 2)",
                self.chain.min_len, self.chain.max_len
            )));
        }
        if self.store.backend == BackendKind::Http && self.store.endpoint.trim().is_empty() {
            return Err(ConfigError::Validation(
                "http backend requires an endpoint".into(),
            ));
        }
        if self.store.password.is_some() && self.store.username.is_none() {
            return Err(ConfigError::Validation(
                "password supplied without a username".into(),
            ));
        }
        Ok(())
    }
}

pub fn load_config(path: &Path, format: ConfigFormat) -> Result<LoadConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&contents, resolve_format(path, format))?;
    config.validate()?;
    Ok(config)
}

pub fn parse_config(contents: &str, format: ConfigFormat) -> Result<LoadConfig, ConfigError> {
    match format {
        ConfigFormat::Toml | ConfigFormat::Auto => {
            toml::from_str(contents).map_err(|err| ConfigError::Parse {
                format: ConfigFormat::Toml,
                details: err.to_string(),
            })
        }
        ConfigFormat::Yaml => serde_yaml::from_str(contents).map_err(|err| ConfigError::Parse {
            format,
            details: err.to_string(),
        }),
    }
}

fn resolve_format(path: &Path, format: ConfigFormat) -> ConfigFormat {
    match format {
        ConfigFormat::Auto => match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Toml,
        },
        _ => format,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_reference_constants() {
        let cfg = LoadConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.run.workers, 4);
        assert_eq!(cfg.run.run_time(), Duration::from_secs(1));
        assert_eq!(cfg.run.report_interval(), Duration::from_secs(5));
        assert_eq!(cfg.run.batch_threshold, 15);
        assert_eq!(cfg.chain, ChainShape { min_len: 2, max_len: 11 });
    }

    #[test]
    fn parses_partial_toml() {
        let cfg = parse_config(
            r#"
            [run]
            workers = 8
            batch-threshold = 1

            [store]
            backend = "http"
            endpoint = "http://cayley:64210"
            "#,
            ConfigFormat::Toml,
        )
        .unwrap();
        assert_eq!(cfg.run.workers, 8);
        assert_eq!(cfg.run.batch_threshold, 1);
        assert_eq!(cfg.run.run_time_ms, 1_000);
        assert_eq!(cfg.store.backend, BackendKind::Http);
        assert_eq!(cfg.write, WritePolicy::default());
    }

    #[test]
    fn parses_yaml() {
        let cfg = parse_config(
            "write:\n  on-error: abort\nchain:\n  min-len: 4\n  max-len: 4\n",
            ConfigFormat::Yaml,
        )
        .unwrap();
        assert_eq!(cfg.write.on_error, WriteErrorPolicy::Abort);
        assert_eq!(cfg.write.retries(), 0);
        assert_eq!(cfg.chain, ChainShape::fixed(4));
    }

    #[test]
    fn rejects_empty_pool_and_short_chains() {
        let mut cfg = LoadConfig::default();
        cfg.run.workers = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));

        let mut cfg = LoadConfig::default();
        cfg.chain = ChainShape::fixed(1);
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/loadgen.toml"), ConfigFormat::Auto).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/loadgen.toml"));
    }
}
