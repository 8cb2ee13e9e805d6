// CLASSIFICATION: COMMUNITY
// Filename: error.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Error types shared across the boot supervisor.
//!
//! Driver-facing errors (`BusError`, `VolumeError`, ...) are returned by the
//! [`crate::hal`] traits. [`BootFault`] is the supervisor-level taxonomy: only
//! the fatal variants ever leave a phase, `ResourceUnavailable` is absorbed by
//! the mount acquirer and `LockUnavailable` is logged and ignored.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while bringing up the removable storage bus.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("no card detected on the storage bus")]
    NoCard,
    #[error("bus transfer failed at {rate_hz} Hz")]
    Transfer { rate_hz: u32 },
    #[error("filesystem mount failed: {0}")]
    Mount(String),
    #[error("mount cancelled before completion")]
    Cancelled,
}

/// Errors raised by a mounted [`crate::hal::Volume`].
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("volume not mounted")]
    NotMounted,
    #[error("path {0:?} escapes the volume root")]
    InvalidPath(String),
    #[error("volume io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw flash read failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlashError {
    #[error("read of {len} bytes at offset {offset:#x} is outside the partition")]
    OutOfBounds { offset: u64, len: usize },
    #[error("flash read failed at offset {0:#x}")]
    Read(u64),
}

/// The performance-management lock could not be taken.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("performance lock unavailable: {0}")]
pub struct LockError(pub String);

/// The CPU refused a frequency change.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cpu rejected frequency {0} MHz")]
pub struct ClockError(pub u32);

/// The update manager could not invalidate the running slot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RollbackError {
    #[error("platform has no alternate firmware slot")]
    Unsupported,
    #[error("rollback failed: {0}")]
    Failed(String),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {key}: {value:?}")]
    Env { key: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Supervisor-level fault taxonomy.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BootFault {
    #[error("storage unavailable within {budget:?}")]
    ResourceUnavailable { budget: Duration },
    #[error("firmware integrity mismatch: expected {expected:08X}, computed {computed:08X}")]
    IntegrityMismatch { expected: u32, computed: u32 },
    #[error("die temperature {celsius:.1} C over ceiling")]
    ThermalCritical { celsius: f32 },
    #[error("battery reading {raw} under floor")]
    PowerCritical { raw: u16 },
    #[error(transparent)]
    LockUnavailable(#[from] LockError),
}

impl BootFault {
    /// Whether the fault ends the boot sequence.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BootFault::IntegrityMismatch { .. }
                | BootFault::ThermalCritical { .. }
                | BootFault::PowerCritical { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality_matches_taxonomy() {
        assert!(BootFault::ThermalCritical { celsius: 80.0 }.is_fatal());
        assert!(BootFault::PowerCritical { raw: 10 }.is_fatal());
        assert!(BootFault::IntegrityMismatch { expected: 1, computed: 2 }.is_fatal());
        assert!(!BootFault::ResourceUnavailable { budget: Duration::from_millis(500) }.is_fatal());
        assert!(!BootFault::LockUnavailable(LockError("busy".into())).is_fatal());
    }

    #[test]
    fn mismatch_message_uses_hex() {
        let msg = BootFault::IntegrityMismatch {
            expected: 0xDEADBEEF,
            computed: 0,
        }
        .to_string();
        assert!(msg.contains("DEADBEEF"));
        assert!(msg.contains("00000000"));
    }
}
