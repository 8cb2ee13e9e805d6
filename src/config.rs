// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Boot supervisor configuration.
//!
//! Values come from built-in defaults, an optional JSON file and finally
//! `COHBOOT_*` environment overrides.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// What to do when the die temperature sensor cannot be read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorPolicy {
    /// Treat a missing sensor as safe and continue booting.
    FailOpen,
    /// Treat a missing sensor as an overheat.
    FailClosed,
}

/// How much of the running partition the integrity scan covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityScope {
    /// Every byte of the partition, erased tail included.
    FullPartition,
    /// Only the image length declared by the partition descriptor, falling
    /// back to the full partition when no length is declared.
    DeclaredImage,
}

/// Clock steps used by safe mode and overclock validation.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClockSteps {
    pub safe_mhz: u32,
    pub probe_mhz: u32,
    pub max_mhz: u32,
}

impl Default for ClockSteps {
    fn default() -> Self {
        Self {
            safe_mhz: 80,
            probe_mhz: 160,
            max_mhz: 240,
        }
    }
}

/// Full supervisor configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    pub mount_budget_ms: u64,
    pub mount_poll_ms: u64,
    /// How long a cancelled mount worker may take to reach a quiescent point.
    pub mount_grace_ms: u64,
    pub primary_bus_hz: u32,
    pub fallback_bus_hz: u32,
    pub thermal_ceiling_c: f32,
    pub thermal_policy: SensorPolicy,
    pub battery_floor_raw: u16,
    pub battery_wake_secs: u64,
    pub watchdog_timeout_ms: u64,
    pub integrity_block_size: usize,
    pub integrity_scope: IntegrityScope,
    pub hash_file: String,
    pub crash_log_file: String,
    pub crash_log_cap: u64,
    pub clock: ClockSteps,
    pub probe_iterations: u32,
    pub probe_delay_ms: u64,
    pub safe_loop_beat_ms: u64,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            mount_budget_ms: 500,
            mount_poll_ms: 10,
            mount_grace_ms: 50,
            primary_bus_hz: 40_000_000,
            fallback_bus_hz: 10_000_000,
            thermal_ceiling_c: 70.0,
            thermal_policy: SensorPolicy::FailOpen,
            battery_floor_raw: 2000,
            battery_wake_secs: 3,
            watchdog_timeout_ms: 3000,
            integrity_block_size: 4096,
            integrity_scope: IntegrityScope::FullPartition,
            hash_file: "hash.txt".into(),
            crash_log_file: "crash.log".into(),
            crash_log_cap: 20 * 1024,
            clock: ClockSteps::default(),
            probe_iterations: 10,
            probe_delay_ms: 10,
            safe_loop_beat_ms: 1000,
        }
    }
}

fn env_override<T: std::str::FromStr>(
    key: &'static str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(key) {
        *slot = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { key, value })?;
    }
    Ok(())
}

impl BootConfig {
    /// Load a JSON config file; missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let cfg: BootConfig = serde_json::from_str(&text)?;
        Ok(cfg)
    }

    /// Apply `COHBOOT_*` environment overrides in place.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        env_override("COHBOOT_MOUNT_BUDGET_MS", &mut self.mount_budget_ms)?;
        env_override("COHBOOT_MOUNT_POLL_MS", &mut self.mount_poll_ms)?;
        env_override("COHBOOT_MOUNT_GRACE_MS", &mut self.mount_grace_ms)?;
        env_override("COHBOOT_THERMAL_CEILING_C", &mut self.thermal_ceiling_c)?;
        env_override("COHBOOT_BATTERY_FLOOR_RAW", &mut self.battery_floor_raw)?;
        env_override("COHBOOT_WATCHDOG_TIMEOUT_MS", &mut self.watchdog_timeout_ms)?;
        env_override("COHBOOT_CRASH_LOG_CAP", &mut self.crash_log_cap)?;
        if let Ok(path) = std::env::var("COHBOOT_HASH_FILE") {
            self.hash_file = path;
        }
        if let Ok(path) = std::env::var("COHBOOT_CRASH_LOG_FILE") {
            self.crash_log_file = path;
        }
        Ok(())
    }

    /// Reject values the supervisor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mount_budget_ms == 0 || self.mount_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "mount budget and poll interval must be non-zero".into(),
            ));
        }
        if self.integrity_block_size == 0 {
            return Err(ConfigError::Invalid("integrity block size is zero".into()));
        }
        if self.crash_log_cap == 0 {
            return Err(ConfigError::Invalid("crash log cap is zero".into()));
        }
        let c = &self.clock;
        if !(c.safe_mhz < c.probe_mhz && c.probe_mhz < c.max_mhz) {
            return Err(ConfigError::Invalid(format!(
                "clock steps must ascend: {} < {} < {}",
                c.safe_mhz, c.probe_mhz, c.max_mhz
            )));
        }
        if self.fallback_bus_hz >= self.primary_bus_hz {
            return Err(ConfigError::Invalid(
                "fallback bus rate must be below the primary rate".into(),
            ));
        }
        Ok(())
    }

    pub fn mount_budget(&self) -> Duration {
        Duration::from_millis(self.mount_budget_ms)
    }

    pub fn mount_poll(&self) -> Duration {
        Duration::from_millis(self.mount_poll_ms)
    }

    pub fn mount_grace(&self) -> Duration {
        Duration::from_millis(self.mount_grace_ms)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn battery_wake(&self) -> Duration {
        Duration::from_secs(self.battery_wake_secs)
    }

    pub fn probe_delay(&self) -> Duration {
        Duration::from_millis(self.probe_delay_ms)
    }

    pub fn safe_loop_beat(&self) -> Duration {
        Duration::from_millis(self.safe_loop_beat_ms)
    }
}
