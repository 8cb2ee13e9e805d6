// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Boot‑time storage: bounded card mount and the crash log.

pub mod crashlog;
pub mod mount;

pub use crashlog::{CrashLog, CrashLogEntry};
pub use mount::{MountMode, MountReport, ResourceAcquisitionOutcome, TimedResourceAcquirer};
