//! Workflow configuration: defaults, an optional TOML file, then
//! `PROCURE_APPROVAL_*` environment overrides.
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "PROCURE_APPROVAL_";

/// Upper bound for hour-based windows: ten years, far inside the range of the
/// nanosecond timestamps stored on tasks.
pub const MAX_WINDOW_HOURS: i64 = 24 * 366 * 10;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub token: TokenConfig,
    pub batch: BatchConfig,
    pub reminders: ReminderConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub expiry_hours: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub limit: usize,
    pub governance_threshold: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    pub after_hours: i64,
    pub max_reminders: u32,
    pub escalate_after_final: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self { expiry_hours: 72 }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            limit: 50,
            governance_threshold: 200,
        }
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            after_hours: 24,
            max_reminders: 3,
            escalate_after_final: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
    #[error("could not initialise logging: {0}")]
    Logging(String),
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl WorkflowConfig {
    /// Loads `path` when given, applies environment overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `lookup` resolves a variable name, normally from the process environment.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let read = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .map(|value| (key, value))
        };

        if let Some((key, value)) = read("TOKEN_EXPIRY_HOURS") {
            self.token.expiry_hours = parse(&key, &value)?;
        }
        if let Some((key, value)) = read("BATCH_LIMIT") {
            self.batch.limit = parse(&key, &value)?;
        }
        if let Some((key, value)) = read("BATCH_GOVERNANCE_THRESHOLD") {
            self.batch.governance_threshold = parse(&key, &value)?;
        }
        if let Some((key, value)) = read("REMINDER_AFTER_HOURS") {
            self.reminders.after_hours = parse(&key, &value)?;
        }
        if let Some((key, value)) = read("REMINDER_MAX") {
            self.reminders.max_reminders = parse(&key, &value)?;
        }
        if let Some((key, value)) = read("REMINDER_ESCALATE") {
            self.reminders.escalate_after_final = parse(&key, &value)?;
        }
        if let Some((_, value)) = read("LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some((_, value)) = read("LOG_FORMAT") {
            self.logging.format = value.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_WINDOW_HOURS).contains(&self.token.expiry_hours) {
            return Err(ConfigError::Validation(format!(
                "token.expiry_hours must be between 1 and {MAX_WINDOW_HOURS}"
            )));
        }
        if self.batch.limit == 0 {
            return Err(ConfigError::Validation(
                "batch.limit must be at least 1".to_string(),
            ));
        }
        if !(0..=MAX_WINDOW_HOURS).contains(&self.reminders.after_hours) {
            return Err(ConfigError::Validation(format!(
                "reminders.after_hours must be between 0 and {MAX_WINDOW_HOURS}"
            )));
        }
        if self.reminders.max_reminders == 0 {
            return Err(ConfigError::Validation(
                "reminders.max_reminders must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = WorkflowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch.limit, 50);
        assert_eq!(config.batch.governance_threshold, 200);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = WorkflowConfig::from_toml_str(
            r#"
            [batch]
            limit = 10

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.batch.limit, 10);
        assert_eq!(config.batch.governance_threshold, 200);
        assert_eq!(config.token.expiry_hours, 72);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn env_overrides_win() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PROCURE_APPROVAL_BATCH_GOVERNANCE_THRESHOLD", "500"),
            ("PROCURE_APPROVAL_TOKEN_EXPIRY_HOURS", " 12 "),
            ("PROCURE_APPROVAL_LOG_FORMAT", "pretty"),
        ]);
        let mut config = WorkflowConfig::default();
        config
            .apply_env_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.batch.governance_threshold, 500);
        assert_eq!(config.token.expiry_hours, 12);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn bad_override_is_reported() {
        let mut config = WorkflowConfig::default();
        let result = config.apply_env_overrides(|key| {
            (key == "PROCURE_APPROVAL_BATCH_LIMIT").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidEnvOverride { .. })));
    }

    #[test]
    fn hour_windows_are_bounded() {
        for raw in [
            "[token]\nexpiry_hours = 3000000\n",
            "[token]\nexpiry_hours = 9223372036854775807\n",
            "[token]\nexpiry_hours = 0\n",
            "[reminders]\nafter_hours = 9223372036854775807\n",
            "[reminders]\nafter_hours = -1\n",
        ] {
            let result = WorkflowConfig::from_toml_str(raw);
            assert!(matches!(result, Err(ConfigError::Validation(_))), "{raw}");
        }

        let mut config = WorkflowConfig::default();
        config.token.expiry_hours = MAX_WINDOW_HOURS;
        config.reminders.after_hours = MAX_WINDOW_HOURS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_limit_is_rejected() {
        let result = WorkflowConfig::from_toml_str("[batch]\nlimit = 0\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }
}
