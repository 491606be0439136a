//! Configuration loading
//!
//! Layers, later wins:
//!
//! 1. Built-in defaults
//! 2. Global config (`~/.config/backlog/config.toml` or platform equivalent)
//! 3. Project config (`.backlog/config.toml`)
//! 4. Environment variables (`BACKLOG_*`)
//!
//! Files are merged key by key, so a project file that only sets
//! `scheduler.aging_cap` keeps every other value from the layers below.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dependency::UnknownDependencyPolicy;
use crate::task::{Complexity, Priority};
use crate::{Error, Result};

/// Aging can never exceed the gap between low and critical
const MAX_AGING_CAP: f64 = 3.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub store: StoreConfig,
    pub lock: LockConfig,
    pub scheduler: SchedulerConfig,
    pub dependencies: DependencyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file shared by every agent process
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".backlog/backlog.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub timeout_ms: u64,
    pub stale_after_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            stale_after_ms: 30_000,
            initial_backoff_ms: 10,
            max_backoff_ms: 1_000,
        }
    }
}

/// Aging rate per priority level, in priority points per hour waited
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgingRates {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for AgingRates {
    fn default() -> Self {
        Self {
            critical: 0.0,
            high: 0.02,
            medium: 0.05,
            low: 0.1,
        }
    }
}

impl AgingRates {
    #[must_use]
    pub const fn rate(&self, priority: Priority) -> f64 {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }
}

/// Urgency subtracted per complexity level when batch planning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityPenalties {
    pub trivial: f64,
    pub simple: f64,
    pub moderate: f64,
    pub complex: f64,
    pub epic: f64,
}

impl Default for ComplexityPenalties {
    fn default() -> Self {
        Self {
            trivial: 0.0,
            simple: 0.05,
            moderate: 0.1,
            complex: 0.2,
            epic: 0.3,
        }
    }
}

impl ComplexityPenalties {
    #[must_use]
    pub const fn penalty(&self, complexity: Complexity) -> f64 {
        match complexity {
            Complexity::Trivial => self.trivial,
            Complexity::Simple => self.simple,
            Complexity::Moderate => self.moderate,
            Complexity::Complex => self.complex,
            Complexity::Epic => self.epic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub aging_rate: AgingRates,
    /// Upper bound on the aging bonus
    pub aging_cap: f64,
    pub complexity_penalty: ComplexityPenalties,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            aging_rate: AgingRates::default(),
            aging_cap: 2.0,
            complexity_penalty: ComplexityPenalties::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
    /// What to do with dependency ids that name no existing task
    pub on_unknown: UnknownDependencyPolicy,
}

// ═══════════════════════════════════════════════════════════════════════════
// LOADING
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration from the global and project files plus environment
///
/// # Errors
///
/// Returns error if:
/// - A config file exists but cannot be read or is malformed TOML
/// - An environment override does not parse
/// - Values fail validation
pub async fn load_config() -> Result<BoardConfig> {
    let paths: Vec<PathBuf> = [global_config_path(), project_config_path()]
        .into_iter()
        .filter_map(Result::ok)
        .collect();
    load_config_from(&paths).await
}

/// Load configuration from explicit files (missing files are skipped)
pub async fn load_config_from(paths: &[PathBuf]) -> Result<BoardConfig> {
    let mut merged = toml::Value::Table(toml::Table::new());
    for path in paths {
        if path.exists() {
            merge_toml(&mut merged, load_toml_file(path).await?);
        }
    }

    let mut config: BoardConfig = merged
        .try_into()
        .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {e}")))?;
    config.apply_env_vars()?;
    config.validate()?;
    Ok(config)
}

fn project_config_path() -> Result<PathBuf> {
    std::env::current_dir()
        .map(|dir| dir.join(".backlog/config.toml"))
        .map_err(|e| Error::IoError(format!("Failed to get current directory: {e}")))
}

fn global_config_path() -> Result<PathBuf> {
    directories::ProjectDirs::from("", "", "backlog")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .ok_or_else(|| Error::IoError("Failed to determine global config directory".to_string()))
}

async fn load_toml_file(path: &Path) -> Result<toml::Value> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::IoError(format!("Failed to read config file {}: {e}", path.display()))
    })?;

    toml::from_str(&content).map_err(|e| {
        Error::InvalidConfig(format!("Failed to parse config: {}: {e}", path.display()))
    })
}

/// Overlay `overlay` onto `base`, recursing into tables
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(name)
        .ok()
        .map(|value| {
            value
                .parse()
                .map_err(|e| Error::InvalidConfig(format!("Invalid {name} value: {e}")))
        })
        .transpose()
}

impl BoardConfig {
    /// Apply `BACKLOG_*` environment variable overrides
    fn apply_env_vars(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("BACKLOG_DB") {
            self.store.path = PathBuf::from(value);
        }

        if let Some(value) = env_parse("BACKLOG_LOCK_TIMEOUT_MS")? {
            self.lock.timeout_ms = value;
        }

        if let Some(value) = env_parse("BACKLOG_LOCK_STALE_MS")? {
            self.lock.stale_after_ms = value;
        }

        if let Some(value) = env_parse("BACKLOG_AGING_CAP")? {
            self.scheduler.aging_cap = value;
        }

        if let Some(value) = env_parse("BACKLOG_ON_UNKNOWN_DEPENDENCY")? {
            self.dependencies.on_unknown = value;
        }

        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        let lock = &self.lock;
        if lock.timeout_ms == 0 || lock.stale_after_ms == 0 {
            return Err(Error::InvalidConfig(
                "lock.timeout_ms and lock.stale_after_ms must be positive".to_string(),
            ));
        }
        if lock.initial_backoff_ms == 0 || lock.initial_backoff_ms > lock.max_backoff_ms {
            return Err(Error::InvalidConfig(
                "lock.initial_backoff_ms must be between 1 and lock.max_backoff_ms".to_string(),
            ));
        }

        let scheduler = &self.scheduler;
        let rates = scheduler.aging_rate;
        if [rates.critical, rates.high, rates.medium, rates.low]
            .iter()
            .any(|r| !r.is_finite() || *r < 0.0)
        {
            return Err(Error::InvalidConfig(
                "scheduler.aging_rate values must be non-negative numbers".to_string(),
            ));
        }
        if !scheduler.aging_cap.is_finite()
            || scheduler.aging_cap < 0.0
            || scheduler.aging_cap >= MAX_AGING_CAP
        {
            return Err(Error::InvalidConfig(format!(
                "scheduler.aging_cap must be in [0, {MAX_AGING_CAP})"
            )));
        }

        let p = scheduler.complexity_penalty;
        if [p.trivial, p.simple, p.moderate, p.complex, p.epic]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0 || *v >= 1.0)
        {
            return Err(Error::InvalidConfig(
                "scheduler.complexity_penalty values must be in [0, 1)".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;

    fn write_file(dir: &Path, name: &str, body: &str) -> std::io::Result<PathBuf> {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path)?;
        file.write_all(body.as_bytes())?;
        Ok(path)
    }

    #[tokio::test]
    #[serial]
    async fn test_no_files_gives_defaults() -> Result<()> {
        let config = load_config_from(&[PathBuf::from("/nonexistent/config.toml")]).await?;
        assert_eq!(config, BoardConfig::default());
        assert_eq!(config.scheduler.aging_rate.rate(Priority::Low), 0.1);
        assert_eq!(config.scheduler.aging_rate.rate(Priority::Critical), 0.0);
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_project_overrides_global_key_by_key() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let global = write_file(
            dir.path(),
            "global.toml",
            "[scheduler]\naging_cap = 1.5\n[scheduler.aging_rate]\nlow = 0.2\n",
        )?;
        let project = write_file(dir.path(), "project.toml", "[scheduler.aging_rate]\nhigh = 0.03\n")?;

        let config = load_config_from(&[global, project]).await?;
        assert_eq!(config.scheduler.aging_cap, 1.5);
        assert_eq!(config.scheduler.aging_rate.low, 0.2);
        assert_eq!(config.scheduler.aging_rate.high, 0.03);
        assert_eq!(config.scheduler.aging_rate.medium, 0.05);
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_env_overrides_files() -> Result<()> {
        std::env::set_var("BACKLOG_LOCK_TIMEOUT_MS", "2500");
        std::env::set_var("BACKLOG_ON_UNKNOWN_DEPENDENCY", "reject");
        let config = load_config_from(&[]).await;
        std::env::remove_var("BACKLOG_LOCK_TIMEOUT_MS");
        std::env::remove_var("BACKLOG_ON_UNKNOWN_DEPENDENCY");

        let config = config?;
        assert_eq!(config.lock.timeout_ms, 2500);
        assert_eq!(config.dependencies.on_unknown, UnknownDependencyPolicy::Reject);
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_bad_env_value_is_an_error() {
        std::env::set_var("BACKLOG_AGING_CAP", "lots");
        let result = load_config_from(&[]).await;
        std::env::remove_var("BACKLOG_AGING_CAP");
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    #[serial]
    async fn test_malformed_toml_is_an_error() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = write_file(dir.path(), "config.toml", "[scheduler\naging_cap = ")?;
        let result = load_config_from(&[path]).await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn test_cap_that_lets_low_outrank_critical_is_rejected() {
        let mut config = BoardConfig::default();
        config.scheduler.aging_cap = 3.0;
        assert!(config.validate().is_err());

        config.scheduler.aging_cap = 2.0;
        config.lock.initial_backoff_ms = 5_000;
        assert!(config.validate().is_err());
    }
}
