use crate::dataset::Variable;
use crate::error::{AppError, Result};
use crate::time::{parse_interval, seconds_to_duration};
use chrono::Duration;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

/// Upper bound accepted for `max_frames`
const MAX_FRAMES_LIMIT: usize = 100_000;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub resampling: ResamplingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    pub csv_path: PathBuf,
    /// 0 disables reloading
    #[serde(default = "default_reload_interval")]
    pub reload_interval_seconds: u64,
}

fn default_reload_interval() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResamplingConfig {
    #[serde(default = "default_max_gap", deserialize_with = "deserialize_max_gap")]
    pub max_gap: Duration,
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,
    /// Empty means every variable the dataset provides
    #[serde(default, deserialize_with = "deserialize_variables")]
    pub default_variables: Vec<Variable>,
}

fn default_max_gap() -> Duration {
    Duration::minutes(60)
}

fn default_max_frames() -> usize {
    1000
}

impl Default for ResamplingConfig {
    fn default() -> Self {
        Self {
            max_gap: default_max_gap(),
            max_frames: default_max_frames(),
            default_variables: Vec::new(),
        }
    }
}

/// Accepts an interval string (`90min`, `2H`) or a plain number of minutes
fn deserialize_max_gap<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum GapValue {
        Minutes(i64),
        Text(String),
    }

    match GapValue::deserialize(deserializer)? {
        GapValue::Minutes(m) => seconds_to_duration(m, 60)
            .ok_or_else(|| serde::de::Error::custom(format!("max_gap of {} minutes is out of range", m))),
        GapValue::Text(s) => parse_interval(&s)
            .map_err(|e| serde::de::Error::custom(format!("Invalid max_gap '{}': {}", s, e))),
    }
}

fn deserialize_variables<'de, D>(deserializer: D) -> std::result::Result<Vec<Variable>, D::Error>
where
    D: Deserializer<'de>,
{
    let names = Vec::<String>::deserialize(deserializer)?;
    let mut variables = Vec::with_capacity(names.len());
    for name in names {
        let variable: Variable = name.parse().map_err(serde::de::Error::custom)?;
        if !variables.contains(&variable) {
            variables.push(variable);
        }
    }
    Ok(variables)
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AppError::Config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content)?;

        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults for everything except the dataset location
    pub fn from_csv_path<P: Into<PathBuf>>(csv_path: P) -> Self {
        Self {
            dataset: DatasetConfig {
                csv_path: csv_path.into(),
                reload_interval_seconds: default_reload_interval(),
            },
            resampling: ResamplingConfig::default(),
        }
    }

    /// Validate configuration values
    ///
    /// Checks for:
    /// - Unexpanded environment variables in the dataset path
    /// - A positive gap tolerance
    /// - A frame cap between 1 and 100000
    pub fn validate(&self) -> Result<()> {
        let csv_path = self.dataset.csv_path.to_string_lossy();
        if csv_path.trim().is_empty() {
            return Err(AppError::Config(
                "dataset.csv_path cannot be empty".to_string(),
            ));
        }
        if csv_path.contains("${") {
            return Err(AppError::Config(format!(
                "dataset.csv_path '{}' contains an unexpanded environment variable",
                csv_path
            )));
        }

        if self.resampling.max_gap <= Duration::zero() {
            return Err(AppError::Config(
                "resampling.max_gap must be greater than 0".to_string(),
            ));
        }

        if self.resampling.max_frames == 0 {
            return Err(AppError::Config(
                "resampling.max_frames must be at least 1".to_string(),
            ));
        }

        if self.resampling.max_frames > MAX_FRAMES_LIMIT {
            return Err(AppError::Config(format!(
                "resampling.max_frames {} is too high, maximum is {}",
                self.resampling.max_frames, MAX_FRAMES_LIMIT
            )));
        }

        if self.dataset.reload_interval_seconds > 0 && self.dataset.reload_interval_seconds < 5 {
            tracing::warn!(
                "Reload interval of {} seconds is very short, consider using at least 5 seconds",
                self.dataset.reload_interval_seconds
            );
        }

        Ok(())
    }
}

/// Replace `${VAR}` with the variable's value; every missing variable is reported at once
fn expand_env_vars(content: &str) -> Result<String> {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| AppError::Config(format!("Invalid substitution pattern: {}", e)))?;

    let mut missing: Vec<String> = re
        .captures_iter(content)
        .map(|cap| cap[1].to_string())
        .filter(|name| std::env::var(name).is_err())
        .collect();
    missing.sort();
    missing.dedup();

    if !missing.is_empty() {
        return Err(AppError::Config(format!(
            "Missing required environment variable{}: {} (set it in the environment or in a .env file)",
            if missing.len() > 1 { "s" } else { "" },
            missing.join(", ")
        )));
    }

    Ok(re
        .replace_all(content, |cap: &regex_lite::Captures| {
            std::env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned())
}
