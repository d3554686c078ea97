//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

use crate::domain::deadlock::DetectorSettings;
use crate::domain::locking::LockingPolicy;
use crate::error::{Error, Result};

/// Lockbench simulation configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub workload: WorkloadConfig,
    pub locking: LockingConfig,
    pub detection: DetectionConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub population: usize,
    pub pool_size: usize,
    pub required_per_task: usize,
    pub service_time: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    pub policy: LockingPolicy,
    pub max_wait_time: u64,
    pub backoff_range: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub enabled: bool,
    pub check_interval: u64,
    pub wait_threshold: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub termination: TerminationMode,
    pub max_steps: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// When a run ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationMode {
    /// Run exactly `max_steps` steps with a continuous workload
    #[default]
    FixedSteps,
    /// One task per process; stop once all of them completed
    AllComplete,
}

impl TerminationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FixedSteps => "fixed_steps",
            Self::AllComplete => "all_complete",
        }
    }
}

impl fmt::Display for TerminationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TerminationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fixed_steps" => Ok(Self::FixedSteps),
            "all_complete" => Ok(Self::AllComplete),
            other => Err(format!(
                "Unknown termination mode: {}. Valid options: fixed_steps, all_complete",
                other
            )),
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            population: 5,
            pool_size: 5,
            required_per_task: 2,
            service_time: 5,
        }
    }
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            policy: LockingPolicy::TwoPhase,
            max_wait_time: 10,
            backoff_range: 3,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: 10,
            wait_threshold: 5,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            termination: TerminationMode::FixedSteps,
            max_steps: 1000,
            seed: None,
        }
    }
}

impl DetectionConfig {
    /// Settings consumed by the deadlock detector
    pub fn settings(&self) -> DetectorSettings {
        DetectorSettings {
            enabled: self.enabled,
            check_interval: self.check_interval,
            wait_threshold: self.wait_threshold,
        }
    }
}

/// Every key accepted by `get` and `set`
pub const CONFIG_KEYS: &[&str] = &[
    "workload.population",
    "workload.pool_size",
    "workload.required_per_task",
    "workload.service_time",
    "locking.policy",
    "locking.max_wait_time",
    "locking.backoff_range",
    "detection.enabled",
    "detection.check_interval",
    "detection.wait_threshold",
    "run.termination",
    "run.max_steps",
    "run.seed",
];

impl SimulationConfig {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("LOCKBENCH_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("lockbench")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location, or defaults if absent
    ///
    /// Loading only parses. Callers layer their overrides on top and the
    /// result is validated when it is saved or a simulation is built.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file without validating it
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    ///
    /// Capacity and backoff problems are reported with their dedicated
    /// errors; everything else is a generic configuration error.
    pub fn validate(&self) -> Result<()> {
        let w = &self.workload;
        if w.population == 0 {
            return Err(Error::Config("workload.population must be at least 1".into()));
        }
        if w.pool_size == 0 {
            return Err(Error::Config("workload.pool_size must be at least 1".into()));
        }
        if w.required_per_task == 0 {
            return Err(Error::Config(
                "workload.required_per_task must be at least 1".into(),
            ));
        }
        if w.service_time == 0 {
            return Err(Error::Config("workload.service_time must be at least 1".into()));
        }
        if w.pool_size < w.required_per_task {
            return Err(Error::InsufficientCapacity {
                pool_size: w.pool_size,
                required: w.required_per_task,
            });
        }

        if self.locking.max_wait_time == 0 {
            return Err(Error::Config("locking.max_wait_time must be positive".into()));
        }
        if self.locking.backoff_range == 0 {
            return Err(Error::InvalidBackoffRange(self.locking.backoff_range));
        }

        if self.detection.check_interval == 0 {
            return Err(Error::Config("detection.check_interval must be positive".into()));
        }
        if self.detection.enabled && self.detection.wait_threshold >= self.locking.max_wait_time {
            warn!(
                wait_threshold = self.detection.wait_threshold,
                max_wait_time = self.locking.max_wait_time,
                "Processes time out before they can qualify as stalled; the detector will never fire"
            );
        }

        if self.run.max_steps == 0 {
            return Err(Error::Config("run.max_steps must be positive".into()));
        }

        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "workload.population" => Ok(self.workload.population.to_string()),
            "workload.pool_size" => Ok(self.workload.pool_size.to_string()),
            "workload.required_per_task" => Ok(self.workload.required_per_task.to_string()),
            "workload.service_time" => Ok(self.workload.service_time.to_string()),

            "locking.policy" => Ok(self.locking.policy.to_string()),
            "locking.max_wait_time" => Ok(self.locking.max_wait_time.to_string()),
            "locking.backoff_range" => Ok(self.locking.backoff_range.to_string()),

            "detection.enabled" => Ok(self.detection.enabled.to_string()),
            "detection.check_interval" => Ok(self.detection.check_interval.to_string()),
            "detection.wait_threshold" => Ok(self.detection.wait_threshold.to_string()),

            "run.termination" => Ok(self.run.termination.to_string()),
            "run.max_steps" => Ok(self.run.max_steps.to_string()),
            "run.seed" => Ok(self
                .run
                .seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "(not set - seeded from entropy)".to_string())),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `lockbench config show` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "workload.population" => self.workload.population = parse_value(key, value)?,
            "workload.pool_size" => self.workload.pool_size = parse_value(key, value)?,
            "workload.required_per_task" => {
                self.workload.required_per_task = parse_value(key, value)?
            }
            "workload.service_time" => self.workload.service_time = parse_value(key, value)?,

            "locking.policy" => {
                self.locking.policy = value.parse().map_err(|e: String| anyhow!(e))?;
            }
            "locking.max_wait_time" => self.locking.max_wait_time = parse_value(key, value)?,
            "locking.backoff_range" => self.locking.backoff_range = parse_value(key, value)?,

            "detection.enabled" => self.detection.enabled = parse_value(key, value)?,
            "detection.check_interval" => {
                self.detection.check_interval = parse_value(key, value)?
            }
            "detection.wait_threshold" => {
                self.detection.wait_threshold = parse_value(key, value)?
            }

            "run.termination" => {
                self.run.termination = value.parse().map_err(|e: String| anyhow!(e))?;
            }
            "run.max_steps" => self.run.max_steps = parse_value(key, value)?,
            "run.seed" => {
                self.run.seed = match value.trim() {
                    "" | "none" => None,
                    v => Some(parse_value(key, v)?),
                };
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `lockbench config show` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys with their current values
    pub fn list(&self) -> Vec<(String, String)> {
        CONFIG_KEYS
            .iter()
            .filter_map(|key| self.get(key).ok().map(|v| (key.to_string(), v)))
            .collect()
    }
}

fn parse_value<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid {} value: {}", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = SimulationConfig::default();

        assert_eq!(config.workload.population, 5);
        assert_eq!(config.workload.pool_size, 5);
        assert_eq!(config.workload.required_per_task, 2);
        assert_eq!(config.workload.service_time, 5);
        assert_eq!(config.locking.policy, LockingPolicy::TwoPhase);
        assert_eq!(config.locking.max_wait_time, 10);
        assert_eq!(config.locking.backoff_range, 3);
        assert!(config.detection.enabled);
        assert_eq!(config.detection.check_interval, 10);
        assert_eq!(config.run.termination, TerminationMode::FixedSteps);
        assert!(config.run.seed.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_capacity() {
        let mut config = SimulationConfig::default();
        config.workload.pool_size = 1;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientCapacity {
                pool_size: 1,
                required: 2
            }
        ));
    }

    #[test]
    fn test_validate_backoff_range() {
        let mut config = SimulationConfig::default();
        config.locking.backoff_range = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            Error::InvalidBackoffRange(0)
        ));
    }

    #[test]
    fn test_validate_zero_fields() {
        let cases: [fn(&mut SimulationConfig); 5] = [
            |c| c.workload.population = 0,
            |c| c.workload.service_time = 0,
            |c| c.locking.max_wait_time = 0,
            |c| c.detection.check_interval = 0,
            |c| c.run.max_steps = 0,
        ];
        for mutate in cases {
            let mut config = SimulationConfig::default();
            mutate(&mut config);
            assert!(matches!(config.validate().unwrap_err(), Error::Config(_)));
        }
    }

    #[test]
    fn test_get_and_set() {
        let mut config = SimulationConfig::default();

        config.set("locking.policy", "incremental").unwrap();
        assert_eq!(config.get("locking.policy").unwrap(), "incremental");

        config.set("workload.population", "12").unwrap();
        assert_eq!(config.workload.population, 12);

        config.set("detection.enabled", "false").unwrap();
        assert!(!config.detection.enabled);

        config.set("run.termination", "all-complete").unwrap();
        assert_eq!(config.run.termination, TerminationMode::AllComplete);

        config.set("run.seed", "42").unwrap();
        assert_eq!(config.run.seed, Some(42));
        config.set("run.seed", "none").unwrap();
        assert_eq!(config.run.seed, None);
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = SimulationConfig::default();
        assert!(config.set("workload.population", "many").is_err());
        assert!(config.set("locking.policy", "optimistic").is_err());
        assert!(config.set("no.such.key", "1").is_err());
        assert!(config.get("no.such.key").is_err());
    }

    #[test]
    fn test_list_covers_every_key() {
        let config = SimulationConfig::default();
        assert_eq!(config.list().len(), CONFIG_KEYS.len());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = SimulationConfig::default();
        config.locking.policy = LockingPolicy::Incremental;
        config.run.seed = Some(7);
        config.save_to(&path).unwrap();

        let loaded = SimulationConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[locking]\npolicy = \"incremental\"\n").unwrap();

        let loaded = SimulationConfig::load_from(&path).unwrap();
        assert_eq!(loaded.locking.policy, LockingPolicy::Incremental);
        assert_eq!(loaded.locking.max_wait_time, 10);
        assert_eq!(loaded.workload, WorkloadConfig::default());
    }

    #[test]
    fn test_load_defers_validation() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[workload]\npool_size = 1\n").unwrap();

        let mut config = SimulationConfig::load_from(&path).unwrap();
        assert_eq!(config.workload.pool_size, 1);
        assert!(matches!(
            config.validate().unwrap_err(),
            Error::InsufficientCapacity { .. }
        ));

        config.workload.pool_size = 4;
        assert!(config.validate().is_ok());
    }
}
