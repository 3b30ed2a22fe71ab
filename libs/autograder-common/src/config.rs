// Service configuration, read from the environment with defaults
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 1024;
pub const DEFAULT_PROBLEMS_DIR: &str = "problems";
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 8;
pub const DEFAULT_EXECUTION_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 1024 * 1024; // 1MB
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024; // 1MB per stream

/// Upper bound on `MAX_CONCURRENT_JOBS`; each slot is a live container.
pub const MAX_CONCURRENT_JOBS_LIMIT: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub problems_dir: PathBuf,
    pub languages_file: Option<PathBuf>,
    pub tick_interval: Duration,
    pub max_concurrent_jobs: usize,
    pub execution_timeout: Duration,
    pub max_source_bytes: usize,
    pub max_output_bytes: usize,
    pub pull_images: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            problems_dir: PathBuf::from(DEFAULT_PROBLEMS_DIR),
            languages_file: None,
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            execution_timeout: Duration::from_millis(DEFAULT_EXECUTION_TIMEOUT_MS),
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            pull_images: true,
        }
    }
}

impl Config {
    /// Load from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(v) => parse(&v, "PORT", "a port number")?,
            None => defaults.port,
        };
        let tick_ms: u64 = match get("TICK_INTERVAL_MS") {
            Some(v) => positive("TICK_INTERVAL_MS", parse(&v, "TICK_INTERVAL_MS", "a positive integer")?)?,
            None => DEFAULT_TICK_INTERVAL_MS,
        };
        let max_concurrent_jobs: usize = match get("MAX_CONCURRENT_JOBS") {
            Some(v) => {
                let jobs = positive(
                    "MAX_CONCURRENT_JOBS",
                    parse(&v, "MAX_CONCURRENT_JOBS", "a positive integer")?,
                )?;
                if jobs > MAX_CONCURRENT_JOBS_LIMIT {
                    return Err(ConfigError::Invalid {
                        name: "MAX_CONCURRENT_JOBS",
                        expected: "at most 1024",
                        value: v,
                    });
                }
                jobs
            }
            None => defaults.max_concurrent_jobs,
        };
        let timeout_ms: u64 = match get("EXECUTION_TIMEOUT_MS") {
            Some(v) => positive(
                "EXECUTION_TIMEOUT_MS",
                parse(&v, "EXECUTION_TIMEOUT_MS", "a positive integer")?,
            )?,
            None => DEFAULT_EXECUTION_TIMEOUT_MS,
        };
        let max_source_bytes: usize = match get("MAX_SOURCE_BYTES") {
            Some(v) => positive("MAX_SOURCE_BYTES", parse(&v, "MAX_SOURCE_BYTES", "a positive integer")?)?,
            None => defaults.max_source_bytes,
        };
        let max_output_bytes: usize = match get("MAX_OUTPUT_BYTES") {
            Some(v) => positive("MAX_OUTPUT_BYTES", parse(&v, "MAX_OUTPUT_BYTES", "a positive integer")?)?,
            None => defaults.max_output_bytes,
        };
        let pull_images = match get("PULL_IMAGES") {
            Some(v) => parse_bool(&v, "PULL_IMAGES")?,
            None => defaults.pull_images,
        };

        Ok(Self {
            port,
            problems_dir: get("PROBLEMS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.problems_dir),
            languages_file: get("LANGUAGES_FILE").map(PathBuf::from),
            tick_interval: Duration::from_millis(tick_ms),
            max_concurrent_jobs,
            execution_timeout: Duration::from_millis(timeout_ms),
            max_source_bytes,
            max_output_bytes,
            pull_images,
        })
    }
}

fn parse<T: std::str::FromStr>(
    value: &str,
    name: &'static str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        expected,
        value: value.to_string(),
    })
}

fn positive<T>(name: &'static str, value: T) -> Result<T, ConfigError>
where
    T: Copy + PartialEq + From<u8>,
{
    if value == T::from(0) {
        return Err(ConfigError::Invalid {
            name,
            expected: "a positive integer",
            value: "0".to_string(),
        });
    }
    Ok(value)
}

fn parse_bool(value: &str, name: &'static str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            expected: "a boolean",
            value: value.to_string(),
        }),
    }
}
