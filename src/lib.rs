// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v2.0
// Date Modified: 2026-10-17
// Author: Lukas Bower

//! Boot‑time safety and integrity supervisor.
//!
//! Before any application code runs, [`boot::BootSupervisor`] checks the
//! safe‑mode strap, the die temperature, mounts removable storage within a
//! hard time budget, verifies the running firmware against a reference
//! CRC‑32, checks the battery, arms the watchdog and only then escalates
//! the core clock.

#![forbid(unsafe_code)]

/// Boot phases and the supervisor that drives them.
pub mod boot;

/// Tunables, loaded from defaults, JSON and the environment.
pub mod config;

/// Error types.
pub mod error;

/// Hardware abstraction traits and the simulated board.
pub mod hal;

/// Bounded card mount and crash log.
pub mod storage;

pub use boot::{BootOutcome, BootReport, BootSupervisor};
pub use config::BootConfig;
