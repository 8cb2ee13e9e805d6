// CLASSIFICATION: COMMUNITY
// Filename: crashlog.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Size‑capped crash log.
//!
//! One line per record, `<uptime_ms> | <reason>`. When the next record would
//! push the file over its cap the file is deleted and restarted, never
//! trimmed.

use std::fmt;

use log::{debug, warn};

use crate::error::VolumeError;
use crate::hal::Volume;

/// A single crash record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrashLogEntry {
    pub uptime_ms: u64,
    pub reason: String,
}

impl CrashLogEntry {
    pub fn new(uptime_ms: u64, reason: impl Into<String>) -> Self {
        Self {
            uptime_ms,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CrashLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.uptime_ms, self.reason.replace(['\n', '\r'], " "))
    }
}

/// Append‑only log file with a wipe‑on‑overflow policy.
#[derive(Clone, Debug)]
pub struct CrashLog {
    path: String,
    cap: u64,
}

impl CrashLog {
    pub fn new(path: impl Into<String>, cap: u64) -> Self {
        Self {
            path: path.into(),
            cap,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Append `entry` to `volume`. Returns `Ok(false)` without touching
    /// anything when no volume is mounted.
    pub fn append<V: Volume + ?Sized>(
        &self,
        volume: Option<&mut V>,
        entry: &CrashLogEntry,
    ) -> Result<bool, VolumeError> {
        let Some(volume) = volume else {
            debug!("[crashlog] no storage mounted, dropping {entry}");
            return Ok(false);
        };

        let line = self.fit(entry.to_string());
        let needed = line.len() as u64 + 1;
        let existing = volume.file_len(&self.path)?.unwrap_or(0);
        if existing + needed > self.cap {
            warn!(
                "[crashlog] {} at {existing} bytes, wiping (cap {})",
                self.path, self.cap
            );
            volume.remove(&self.path)?;
        }
        volume.append_line(&self.path, &line)?;
        Ok(true)
    }

    /// Clip a line so line plus newline never exceeds the cap on its own.
    fn fit(&self, mut line: String) -> String {
        let max = self.cap.saturating_sub(1) as usize;
        if line.len() > max {
            let mut cut = max;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
        }
        line
    }
}
