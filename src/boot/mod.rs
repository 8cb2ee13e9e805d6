// CLASSIFICATION: COMMUNITY
// Filename: mod.rs · Cohboot boot subsystem
// Date Modified: 2026-10-17
// Author: Lukas Bower
//
// ─────────────────────────────────────────────────────────────
// Cohboot Boot Subsystem – Root Module
//
// Everything that runs between reset and the application loop.
//
// ## Sub‑modules
// * `phase`       – boot phase state machine.
// * `environment` – thermal and battery circuit breaker.
// * `verify`      – CRC‑32 firmware integrity check.
// * `overclock`   – probe‑validated clock escalation.
// * `supervisor`  – drives the phases over a [`crate::hal::Board`].
// ─────────────────────────────────────────────────────────────

pub mod environment;
pub mod overclock;
pub mod phase;
pub mod supervisor;
pub mod verify;

pub use environment::{EnvironmentGuard, EnvironmentReading, PowerVerdict, ThermalVerdict};
pub use overclock::{AccumulatorProbe, OverclockState, OverclockValidator, StabilityProbe};
pub use phase::{BootPhase, IllegalTransition, PhaseTracker};
pub use supervisor::{
    BootOutcome, BootReport, BootSupervisor, DiagnosticsStore, IntegrityFailure, IntegrityStatus,
};
pub use verify::{IntegrityRecord, IntegrityVerifier, ReferenceHash};
