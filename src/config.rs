//! Orchestrator configuration.
//!
//! All fields have defaults so an embedding application can construct the
//! orchestrator with `SwitchConfig::default()` and only override what it
//! needs, or load overrides from a YAML file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SwitchConfig {
    /// Upper bound on the wait for the target process to exit after a kill.
    #[serde(default = "default_kill_wait_ms")]
    pub kill_wait_ms: u64,

    /// Interval between liveness polls while waiting for process exit.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Fixed delay after a forced close so filesystem locks release before
    /// any file mutation starts.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Credit cost of one account switch.
    #[serde(default = "default_switch_credit_cost")]
    pub switch_credit_cost: u32,

    /// Credits granted per unspent entitlement unit.
    #[serde(default = "default_credits_per_unit")]
    pub credits_per_unit: u32,

    /// Optional pool selector forwarded to account fetches.
    #[serde(default)]
    pub pool_selector: Option<String>,

    /// Whether a forced workflow relaunches the editor at the end.
    #[serde(default = "default_relaunch_after_force_kill")]
    pub relaunch_after_force_kill: bool,

    /// Directory for the local history fallback buffer. Defaults under the
    /// platform-local data directory.
    #[serde(default)]
    pub pending_dir: Option<PathBuf>,

    /// Operator name stamped into history records.
    #[serde(default = "default_operator")]
    pub operator: String,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            kill_wait_ms: default_kill_wait_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            switch_credit_cost: default_switch_credit_cost(),
            credits_per_unit: default_credits_per_unit(),
            pool_selector: None,
            relaunch_after_force_kill: default_relaunch_after_force_kill(),
            pending_dir: None,
            operator: default_operator(),
        }
    }
}

impl SwitchConfig {
    /// Loads configuration from a YAML file. Missing fields fall back to
    /// their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn kill_wait(&self) -> Duration {
        Duration::from_millis(self.kill_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Resolved pending-buffer directory.
    pub fn pending_dir(&self) -> PathBuf {
        self.pending_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("cursor-switch")
                .join("pending")
        })
    }
}

fn default_kill_wait_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_settle_delay_ms() -> u64 {
    1_000
}

fn default_switch_credit_cost() -> u32 {
    50
}

fn default_credits_per_unit() -> u32 {
    50
}

fn default_relaunch_after_force_kill() -> bool {
    true
}

fn default_operator() -> String {
    "user".to_string()
}
