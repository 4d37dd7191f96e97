//! Pipeline configuration from environment variables and CLI flags

use super::buffer::FlushPolicy;
use super::validator::{BoundingBox, ValidationConfig, DEFAULT_MAX_SPEED_MPS};
use crate::sink_core::BreadcrumbSink;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackendType {
    Sqlite,
    Jsonl,
}

impl FromStr for BackendType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(BackendType::Sqlite),
            "jsonl" => Ok(BackendType::Jsonl),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown backend '{}' (expected sqlite or jsonl)",
                other
            ))),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing value for: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration for the breadcrumb receiver
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Inbound stream: JSONL file path, or `-` for stdin
    pub source: String,

    /// Sink location (SQLite database, or JSONL file for the jsonl backend)
    pub db_path: String,

    pub backend: BackendType,

    /// Rows per bulk append
    pub batch_capacity: usize,

    /// Rule 10 threshold, m/s
    pub max_speed_mps: f64,

    /// Rule 3 service area
    pub bbox: BoundingBox,

    /// Work-queue capacity per partition (deliveries)
    pub channel_buffer: usize,

    /// Timeout around each bulk append
    pub sink_timeout_ms: u64,

    /// Extra attempts after a failed bulk append
    pub flush_max_retries: u32,

    pub flush_retry_base_ms: u64,

    /// Where rows of unflushable batches go; `None` discards them
    pub dead_letter_path: Option<String>,

    /// Upper bound on trips kept in history
    pub history_max_trips: usize,

    /// Sequential consumer loops, sharded by trip id
    pub partitions: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: "-".to_string(),
            db_path: "breadcrumbs.db".to_string(),
            backend: BackendType::Sqlite,
            batch_capacity: super::buffer::DEFAULT_BATCH_CAPACITY,
            max_speed_mps: DEFAULT_MAX_SPEED_MPS,
            bbox: BoundingBox::default(),
            channel_buffer: 10_000,
            sink_timeout_ms: 30_000,
            flush_max_retries: 0,
            flush_retry_base_ms: 500,
            dead_letter_path: None,
            history_max_trips: super::history::DEFAULT_MAX_TRIPS,
            partitions: 1,
        }
    }
}

/// Maximum backoff between flush attempts
pub const FLUSH_RETRY_MAX: Duration = Duration::from_secs(30);

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `BREADCRUMB_SOURCE` (default: `-`, stdin)
    /// - `BREADCRUMB_DB_PATH` (default: breadcrumbs.db)
    /// - `BREADCRUMB_BACKEND` (default: sqlite)
    /// - `BATCH_CAPACITY` (default: 1000)
    /// - `MAX_SPEED_MPS` (default: 35.0)
    /// - `BBOX_MIN_LAT` / `BBOX_MAX_LAT` / `BBOX_MIN_LON` / `BBOX_MAX_LON`
    ///   (default: 45.0 / 46.0 / -123.5 / -122.0)
    /// - `CHANNEL_BUFFER` (default: 10000)
    /// - `SINK_TIMEOUT_MS` (default: 30000)
    /// - `FLUSH_MAX_RETRIES` (default: 0)
    /// - `FLUSH_RETRY_BASE_MS` (default: 500)
    /// - `DEAD_LETTER_PATH` (default: unset)
    /// - `HISTORY_MAX_TRIPS` (default: 200000)
    /// - `PARTITIONS` (default: 1)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup (environment, map in tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let parse = |key: &str| -> Option<String> { lookup(key).filter(|v| !v.trim().is_empty()) };

        let config = Self {
            source: parse("BREADCRUMB_SOURCE").unwrap_or(defaults.source),
            db_path: parse("BREADCRUMB_DB_PATH").unwrap_or(defaults.db_path),
            backend: match parse("BREADCRUMB_BACKEND") {
                Some(v) => v.parse()?,
                None => defaults.backend,
            },
            batch_capacity: parsed(&parse, "BATCH_CAPACITY", defaults.batch_capacity)?,
            max_speed_mps: parsed(&parse, "MAX_SPEED_MPS", defaults.max_speed_mps)?,
            bbox: BoundingBox {
                min_lat: parsed(&parse, "BBOX_MIN_LAT", defaults.bbox.min_lat)?,
                max_lat: parsed(&parse, "BBOX_MAX_LAT", defaults.bbox.max_lat)?,
                min_lon: parsed(&parse, "BBOX_MIN_LON", defaults.bbox.min_lon)?,
                max_lon: parsed(&parse, "BBOX_MAX_LON", defaults.bbox.max_lon)?,
            },
            channel_buffer: parsed(&parse, "CHANNEL_BUFFER", defaults.channel_buffer)?,
            sink_timeout_ms: parsed(&parse, "SINK_TIMEOUT_MS", defaults.sink_timeout_ms)?,
            flush_max_retries: parsed(&parse, "FLUSH_MAX_RETRIES", defaults.flush_max_retries)?,
            flush_retry_base_ms: parsed(
                &parse,
                "FLUSH_RETRY_BASE_MS",
                defaults.flush_retry_base_ms,
            )?,
            dead_letter_path: parse("DEAD_LETTER_PATH"),
            history_max_trips: parsed(&parse, "HISTORY_MAX_TRIPS", defaults.history_max_trips)?,
            partitions: parsed(&parse, "PARTITIONS", defaults.partitions)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Override settings from command-line flags
    ///
    /// Flags: `--source <path|->`, `--db <path>`, `--backend <sqlite|jsonl>`,
    /// `--batch-size <n>`, `--max-speed <m/s>`, `--partitions <n>`,
    /// `--dead-letter <path>`
    pub fn apply_args(&mut self, args: &[String]) -> Result<(), ConfigError> {
        let mut iter = args.iter();

        while let Some(flag) = iter.next() {
            let mut value = || {
                iter.next()
                    .cloned()
                    .ok_or_else(|| ConfigError::MissingVariable(flag.clone()))
            };

            match flag.as_str() {
                "--source" => self.source = value()?,
                "--db" => self.db_path = value()?,
                "--backend" => self.backend = value()?.parse()?,
                "--batch-size" => self.batch_capacity = parse_flag(flag, &value()?)?,
                "--max-speed" => self.max_speed_mps = parse_flag(flag, &value()?)?,
                "--partitions" => self.partitions = parse_flag(flag, &value()?)?,
                "--dead-letter" => self.dead_letter_path = Some(value()?),
                other => log::warn!("Ignoring unknown argument '{}'", other),
            }
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_capacity == 0 {
            return Err(ConfigError::InvalidValue("batch capacity must be at least 1".to_string()));
        }
        if self.partitions == 0 {
            return Err(ConfigError::InvalidValue("partitions must be at least 1".to_string()));
        }
        if !(self.max_speed_mps > 0.0) {
            return Err(ConfigError::InvalidValue(format!(
                "max speed must be positive, got {}",
                self.max_speed_mps
            )));
        }
        if self.bbox.min_lat > self.bbox.max_lat || self.bbox.min_lon > self.bbox.max_lon {
            return Err(ConfigError::InvalidValue(format!(
                "bounding box min exceeds max: {:?}",
                self.bbox
            )));
        }
        if self.sink_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue("sink timeout must be at least 1 ms".to_string()));
        }
        if self.source.is_empty() {
            return Err(ConfigError::MissingVariable("BREADCRUMB_SOURCE".to_string()));
        }
        Ok(())
    }

    pub fn validation_config(&self) -> ValidationConfig {
        ValidationConfig {
            max_speed_mps: self.max_speed_mps,
            bbox: self.bbox,
        }
    }

    pub fn flush_policy(&self, dead_letter: Option<Arc<dyn BreadcrumbSink>>) -> FlushPolicy {
        FlushPolicy {
            sink_timeout: Duration::from_millis(self.sink_timeout_ms),
            max_retries: self.flush_max_retries,
            retry_base: Duration::from_millis(self.flush_retry_base_ms),
            retry_max: FLUSH_RETRY_MAX,
            dead_letter,
        }
    }
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}={}", key, raw))),
        None => Ok(default),
    }
}

fn parse_flag<T: FromStr>(flag: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{} {}", flag, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.source, "-");
        assert_eq!(config.backend, BackendType::Sqlite);
        assert_eq!(config.batch_capacity, 1_000);
        assert_eq!(config.max_speed_mps, 35.0);
        assert_eq!(config.bbox, BoundingBox::default());
        assert_eq!(config.flush_max_retries, 0);
        assert_eq!(config.dead_letter_path, None);
        assert_eq!(config.partitions, 1);
    }

    #[test]
    fn test_custom_config() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("BREADCRUMB_SOURCE", "/tmp/crumbs.jsonl"),
            ("BREADCRUMB_BACKEND", "JSONL"),
            ("BATCH_CAPACITY", "250"),
            ("MAX_SPEED_MPS", "30.5"),
            ("BBOX_MIN_LAT", "-37.5"),
            ("BBOX_MAX_LAT", "-36.5"),
            ("DEAD_LETTER_PATH", "/tmp/dead.jsonl"),
            ("PARTITIONS", "4"),
        ]))
        .unwrap();

        assert_eq!(config.source, "/tmp/crumbs.jsonl");
        assert_eq!(config.backend, BackendType::Jsonl);
        assert_eq!(config.batch_capacity, 250);
        assert_eq!(config.max_speed_mps, 30.5);
        assert_eq!(config.bbox.min_lat, -37.5);
        assert_eq!(config.dead_letter_path.as_deref(), Some("/tmp/dead.jsonl"));
        assert_eq!(config.partitions, 4);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(PipelineConfig::from_lookup(lookup(&[("BATCH_CAPACITY", "lots")])).is_err());
        assert!(PipelineConfig::from_lookup(lookup(&[("BATCH_CAPACITY", "0")])).is_err());
        let backend = lookup(&[("BREADCRUMB_BACKEND", "postgres")]);
        assert!(PipelineConfig::from_lookup(backend).is_err());
        assert!(PipelineConfig::from_lookup(lookup(&[("BBOX_MIN_LAT", "47.0")])).is_err());
    }

    #[test]
    fn test_zero_sink_timeout_rejected() {
        let result = PipelineConfig::from_lookup(lookup(&[("SINK_TIMEOUT_MS", "0")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));

        let config = PipelineConfig::from_lookup(lookup(&[("SINK_TIMEOUT_MS", "1")])).unwrap();
        assert_eq!(config.sink_timeout_ms, 1);
    }

    #[test]
    fn test_args_override_env() {
        let mut config = PipelineConfig::default();
        let args: Vec<String> = ["--source", "a.jsonl", "--batch-size", "5", "--backend", "jsonl"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        config.apply_args(&args).unwrap();

        assert_eq!(config.source, "a.jsonl");
        assert_eq!(config.batch_capacity, 5);
        assert_eq!(config.backend, BackendType::Jsonl);
    }

    #[test]
    fn test_flag_without_value() {
        let mut config = PipelineConfig::default();
        let args = vec!["--db".to_string()];

        assert!(matches!(config.apply_args(&args), Err(ConfigError::MissingVariable(_))));
    }
}
