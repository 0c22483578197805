use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Deserializer};

use crate::ingest::{PipelineConfig, DEFAULT_QUEUE_CAPACITY};

/// Top-level configuration for a rollup run.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Delimited input with one header line. Default: "input.csv".
    #[serde(default = "default_input_path")]
    pub input_path: PathBuf,

    /// Report destination, overwritten if present. Default: "output.csv".
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    /// Number of decode workers. Default: 1.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Number of accumulator shards. Default: 10.
    #[serde(default = "default_num_shards")]
    pub num_shards: usize,

    /// Metering interval added to each timestamp before quarter
    /// resolution. Default: 15m.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Fixed offset source timestamps are read in, e.g. "+01:00".
    /// Default: "+01:00".
    #[serde(
        default = "default_utc_offset",
        deserialize_with = "deserialize_utc_offset"
    )]
    pub utc_offset: FixedOffset,

    /// Lines buffered between the reader and workers. Default: 1000.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// --- Default value functions ---

fn default_input_path() -> PathBuf {
    PathBuf::from("input.csv")
}

fn default_output_path() -> PathBuf {
    PathBuf::from("output.csv")
}

fn default_worker_count() -> usize {
    1
}

fn default_num_shards() -> usize {
    10
}

fn default_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_utc_offset() -> FixedOffset {
    FixedOffset::east_opt(3600).expect("one hour is a valid UTC offset")
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: default_input_path(),
            output_path: default_output_path(),
            worker_count: default_worker_count(),
            num_shards: default_num_shards(),
            interval: default_interval(),
            utc_offset: default_utc_offset(),
            queue_capacity: default_queue_capacity(),
            log_level: default_log_level(),
        }
    }
}

/// Parses a UTC offset such as "+01:00", "-05:30" or "Z".
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return Ok(FixedOffset::east_opt(0).expect("zero is a valid UTC offset"));
    }
    FixedOffset::from_str(raw).with_context(|| format!("invalid UTC offset {raw:?}"))
}

fn deserialize_utc_offset<'de, D>(deserializer: D) -> std::result::Result<FixedOffset, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_utc_offset(&raw).map_err(serde::de::Error::custom)
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.input_path.as_os_str().is_empty() {
            bail!("input_path is required");
        }

        if self.output_path.as_os_str().is_empty() {
            bail!("output_path is required");
        }

        if self.worker_count == 0 {
            bail!("worker_count must be positive");
        }

        if self.num_shards == 0 {
            bail!("num_shards must be positive");
        }

        if self.queue_capacity == 0 {
            bail!("queue_capacity must be positive");
        }

        Ok(())
    }

    /// Pipeline settings derived from this configuration.
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            worker_count: self.worker_count,
            queue_capacity: self.queue_capacity,
            interval: self.interval,
            utc_offset: self.utc_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.input_path, PathBuf::from("input.csv"));
        assert_eq!(cfg.output_path, PathBuf::from("output.csv"));
        assert_eq!(cfg.worker_count, 1);
        assert_eq!(cfg.num_shards, 10);
        assert_eq!(cfg.interval, Duration::from_secs(900));
        assert_eq!(cfg.utc_offset.local_minus_utc(), 3600);
        assert_eq!(cfg.queue_capacity, 1000);
        assert_eq!(cfg.log_level, "info");
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn test_yaml_overrides_and_defaults() {
        let yaml = r#"
input_path: readings.csv
worker_count: 8
interval: 30m
utc_offset: "-05:00"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).expect("valid yaml");
        assert_eq!(cfg.input_path, PathBuf::from("readings.csv"));
        assert_eq!(cfg.output_path, PathBuf::from("output.csv"));
        assert_eq!(cfg.worker_count, 8);
        assert_eq!(cfg.num_shards, 10);
        assert_eq!(cfg.interval, Duration::from_secs(1800));
        assert_eq!(cfg.utc_offset.local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn test_yaml_rejects_bad_offset() {
        let err = serde_yaml::from_str::<Config>("utc_offset: noon").expect_err("bad offset");
        assert!(err.to_string().contains("invalid UTC offset"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rollup.yaml");
        std::fs::write(&path, "num_shards: 4\nqueue_capacity: 64\n").expect("write config");

        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.num_shards, 4);
        assert_eq!(cfg.queue_capacity, 64);
    }

    #[test]
    fn test_load_validates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rollup.yaml");
        std::fs::write(&path, "worker_count: 0\n").expect("write config");

        let err = Config::load(&path).expect_err("zero workers");
        assert!(err.to_string().contains("worker_count"));
    }

    #[test]
    fn test_validation_zero_values() {
        let cfg = Config {
            num_shards: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            queue_capacity: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            output_path: PathBuf::new(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(
            parse_utc_offset("+01:00").expect("valid").local_minus_utc(),
            3600
        );
        assert_eq!(
            parse_utc_offset("-05:30").expect("valid").local_minus_utc(),
            -(5 * 3600 + 30 * 60)
        );
        assert_eq!(parse_utc_offset("Z").expect("valid").local_minus_utc(), 0);
        assert!(parse_utc_offset("1 hour").is_err());
    }

    #[test]
    fn test_pipeline_config_mirrors_fields() {
        let cfg = Config {
            worker_count: 3,
            queue_capacity: 7,
            ..Config::default()
        };
        let p = cfg.pipeline();
        assert_eq!(p.worker_count, 3);
        assert_eq!(p.queue_capacity, 7);
        assert_eq!(p.interval, cfg.interval);
        assert_eq!(p.utc_offset, cfg.utc_offset);
    }
}
