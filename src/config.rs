use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::roster::Worker;
use crate::{Error, Result};

/// Default interval between execution loop ticks.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

/// Default budget for a single task before it is failed with a timeout.
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 120;

/// Default simulated work duration for the headless executor.
pub const DEFAULT_SIMULATED_DELAY_MS: u64 = 250;

/// Default number of store checks before a missing artifact is given up on.
pub const DEFAULT_ARTIFACT_CHECK_LIMIT: u32 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    #[serde(default = "default_simulated_delay_ms")]
    pub simulated_delay_ms: u64,
    #[serde(default = "default_artifact_check_limit")]
    pub artifact_check_limit: u32,
    pub state_dir: Option<String>,
    pub artifact_dir: Option<String>,
    /// External command run once per task; the simulated executor is used when unset.
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roster: Vec<Worker>,
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_task_timeout_secs() -> u64 {
    DEFAULT_TASK_TIMEOUT_SECS
}

fn default_simulated_delay_ms() -> u64 {
    DEFAULT_SIMULATED_DELAY_MS
}

fn default_artifact_check_limit() -> u32 {
    DEFAULT_ARTIFACT_CHECK_LIMIT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            simulated_delay_ms: DEFAULT_SIMULATED_DELAY_MS,
            artifact_check_limit: DEFAULT_ARTIFACT_CHECK_LIMIT,
            state_dir: None,
            artifact_dir: None,
            command: None,
            roster: Vec::new(),
        }
    }
}

impl Config {
    pub fn overseer_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".overseer"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::overseer_dir()?.join("overseer.toml"))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn simulated_delay(&self) -> Duration {
        Duration::from_millis(self.simulated_delay_ms)
    }

    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::overseer_dir()?.join("workflows")),
        }
    }

    pub fn artifact_dir(&self) -> Result<PathBuf> {
        match &self.artifact_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::overseer_dir()?.join("artifacts")),
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        debug!("Config::load path={}", path.display());
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        debug!(
            "Config loaded: tick={}ms, timeout={}s, command={:?}, roster={}",
            config.tick_interval_ms,
            config.task_timeout_secs,
            config.command,
            config.roster.len()
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::overseer_dir()?;
        if !dir.exists() {
            debug!("Creating overseer directory");
            fs::create_dir_all(&dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let state_dir = self.state_dir()?;
        let artifact_dir = self.artifact_dir()?;
        debug!(
            "Config::ensure_dirs state={} artifacts={}",
            state_dir.display(),
            artifact_dir.display()
        );
        fs::create_dir_all(&state_dir)?;
        fs::create_dir_all(&artifact_dir)?;
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
