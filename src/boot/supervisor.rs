// CLASSIFICATION: COMMUNITY
// Filename: supervisor.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Boot supervisor.
//!
//! Runs the boot phases strictly in order:
//!
//! ```text
//! safe-mode-check → thermal-check → storage-mount → integrity-check
//!   → power-check → watchdog-arm → overclock → running
//! ```
//!
//! A fatal phase moves straight to its terminal state (emergency sleep or
//! rollback reboot) and nothing after it runs. Safe mode skips the thermal
//! and overclock phases, pins the clock to the safe step, mounts storage for
//! diagnostics only and parks in the safe loop.

use std::sync::Arc;
use std::thread;

use log::{error, info, warn};
use thiserror::Error;

use super::environment::{EnvironmentGuard, EnvironmentReading, PowerVerdict, ThermalVerdict};
use super::overclock::{OverclockState, OverclockValidator, StabilityProbe};
use super::phase::{BootPhase, PhaseTracker};
use super::verify::{read_reference, IntegrityRecord, IntegrityVerifier, ReferenceHash};
use crate::config::{BootConfig, SensorPolicy};
use crate::error::{BootFault, FlashError, VolumeError};
use crate::hal::{Board, WakeSource};
use crate::storage::{CrashLog, CrashLogEntry, MountReport, TimedResourceAcquirer};

/// Terminal result of [`BootSupervisor::run`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootOutcome {
    /// Boot finished; the application loop may start and must call
    /// [`BootSupervisor::tick`].
    Continue,
    /// Safe mode; the caller parks in [`BootSupervisor::safe_loop`].
    HangInSafeLoop,
    /// Rollback was requested and the device is rebooting.
    Rebooted,
    /// Deep sleep was entered on a thermal, power or integrity fault.
    EmergencySleep(WakeSource),
}

/// Where crash records go.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DiagnosticsStore {
    #[default]
    None,
    Card,
    Internal,
}

/// Why integrity could not be trusted.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum IntegrityFailure {
    #[error("checksum mismatch: expected {:08X}, computed {:08X}", .0.expected, .0.computed)]
    Mismatch(IntegrityRecord),
    #[error("malformed reference hash {0:?}")]
    MalformedReference(String),
    #[error("reference hash unreadable: {0}")]
    ReferenceUnreadable(String),
    #[error("no running firmware slot")]
    NoRunningSlot,
    #[error("partition read failed: {0}")]
    Flash(#[from] FlashError),
}

impl IntegrityFailure {
    /// Supervisor fault for a checksum that was computed and disagreed.
    pub fn fault(&self) -> Option<BootFault> {
        match self {
            IntegrityFailure::Mismatch(record) => Some(BootFault::IntegrityMismatch {
                expected: record.expected,
                computed: record.computed,
            }),
            _ => None,
        }
    }
}

/// Result of the integrity phase.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum IntegrityStatus {
    /// Card not mounted or safe mode.
    #[default]
    NotRun,
    /// No reference file on the card.
    SkippedNoReference,
    Passed(IntegrityRecord),
    Failed(IntegrityFailure),
}

/// What the boot found, for the application and for tests.
#[derive(Clone, Debug, Default)]
pub struct BootReport {
    pub outcome: Option<BootOutcome>,
    /// Phases visited, starting at `init`.
    pub phases: Vec<BootPhase>,
    pub safe_mode: bool,
    pub mount: Option<MountReport>,
    pub diagnostics: DiagnosticsStore,
    pub integrity: IntegrityStatus,
    pub reading: EnvironmentReading,
    pub overclock: Option<OverclockState>,
}

impl BootReport {
    /// Whether the removable card is usable by the application.
    pub fn card_mounted(&self) -> bool {
        self.diagnostics == DiagnosticsStore::Card
    }
}

fn log_fault(fault: &BootFault) {
    if fault.is_fatal() {
        error!("[boot] {fault}");
    } else {
        warn!("[boot] {fault}");
    }
}

/// Drives the boot phases over a [`Board`].
pub struct BootSupervisor {
    cfg: BootConfig,
    board: Board,
    tracker: PhaseTracker,
    guard: EnvironmentGuard,
    verifier: IntegrityVerifier,
    overclock: OverclockValidator,
    crash_log: CrashLog,
    report: BootReport,
}

impl BootSupervisor {
    pub fn new(board: Board, cfg: BootConfig) -> Self {
        Self {
            guard: EnvironmentGuard::from_config(&cfg),
            verifier: IntegrityVerifier::from_config(&cfg),
            overclock: OverclockValidator::from_config(&cfg),
            crash_log: CrashLog::new(cfg.crash_log_file.clone(), cfg.crash_log_cap),
            tracker: PhaseTracker::default(),
            report: BootReport::default(),
            board,
            cfg,
        }
    }

    /// Replace the default accumulator stability probe.
    pub fn with_probe(mut self, probe: Box<dyn StabilityProbe>) -> Self {
        self.overclock = OverclockValidator::new(self.cfg.clock.clone(), probe);
        self
    }

    pub fn phase(&self) -> BootPhase {
        self.tracker.current()
    }

    pub fn history(&self) -> &[BootPhase] {
        self.tracker.history()
    }

    pub fn report(&self) -> &BootReport {
        &self.report
    }

    /// Run the boot sequence once. Later calls return the first outcome.
    pub fn run(&mut self) -> BootOutcome {
        if let Some(outcome) = self.report.outcome {
            return outcome;
        }
        info!("[boot] initializing paranoid mode");

        self.enter(BootPhase::SafeModeCheck);
        if self.board.safe_mode_pin.is_low() {
            return self.safe_mode();
        }

        self.enter(BootPhase::ThermalCheck);
        if let Some(outcome) = self.thermal_phase() {
            return self.finish(outcome);
        }

        self.enter(BootPhase::StorageMount);
        let mount = self.mount_phase();

        if mount.outcome.is_mounted() {
            if let Some(outcome) = self.integrity_phase() {
                return self.finish(outcome);
            }
        } else {
            info!("[boot] skipping integrity check (no card)");
        }

        self.enter(BootPhase::PowerCheck);
        if let Some(outcome) = self.power_phase() {
            return self.finish(outcome);
        }

        self.enter(BootPhase::WatchdogArm);
        self.board.watchdog.arm(self.cfg.watchdog_timeout());

        self.enter(BootPhase::Overclock);
        let state = self
            .overclock
            .escalate(self.board.cpu.as_mut(), self.board.perf_lock.as_mut());
        self.report.overclock = Some(state);

        self.enter(BootPhase::Running);
        info!("[boot] system secure, everything alive");
        self.finish(BootOutcome::Continue)
    }

    /// Liveness hook for the application main loop: feeds the watchdog.
    pub fn tick(&mut self) {
        self.board.watchdog.feed();
    }

    /// One iteration of the safe loop.
    pub fn safe_loop_beat(&mut self) {
        thread::sleep(self.cfg.safe_loop_beat());
        info!("SAFE MODE");
        self.board.watchdog.feed();
    }

    /// Park forever, feeding the watchdog.
    pub fn safe_loop(&mut self) -> ! {
        loop {
            self.safe_loop_beat();
        }
    }

    fn enter(&mut self, next: BootPhase) {
        let from = self.tracker.current();
        match self.tracker.advance(next) {
            Ok(()) => info!("[boot] {from} -> {next}"),
            Err(e) => error!("[boot] {e}"),
        }
    }

    fn finish(&mut self, outcome: BootOutcome) -> BootOutcome {
        info!("[boot] outcome {outcome:?} in phase {}", self.tracker.current());
        self.report.phases = self.tracker.history().to_vec();
        self.report.outcome = Some(outcome);
        outcome
    }

    fn safe_mode(&mut self) -> BootOutcome {
        warn!("[boot] safe mode selected, overclock off");
        self.report.safe_mode = true;
        let state = self.overclock.force_safe(self.board.cpu.as_mut());
        info!("[boot] clock {} MHz", state.current_mhz);
        self.report.overclock = Some(state);

        self.enter(BootPhase::StorageMount);
        if self.mount_phase().outcome.is_mounted() {
            info!("[boot] safe mode: card OK");
        }

        self.enter(BootPhase::SafeLoop);
        self.board.watchdog.arm(self.cfg.watchdog_timeout());
        self.finish(BootOutcome::HangInSafeLoop)
    }

    fn thermal_phase(&mut self) -> Option<BootOutcome> {
        match self.guard.check_thermal(self.board.temperature.as_mut()) {
            ThermalVerdict::Ok(celsius) => {
                self.report.reading.temperature_c = Some(celsius);
                None
            }
            ThermalVerdict::Unavailable => match self.cfg.thermal_policy {
                SensorPolicy::FailOpen => {
                    warn!("[boot] temperature sensor unavailable, continuing");
                    None
                }
                SensorPolicy::FailClosed => {
                    error!("[boot] temperature sensor unavailable, policy is fail-closed");
                    Some(self.overheat())
                }
            },
            ThermalVerdict::Critical(celsius) => {
                self.report.reading.temperature_c = Some(celsius);
                log_fault(&BootFault::ThermalCritical { celsius });
                Some(self.overheat())
            }
        }
    }

    fn overheat(&mut self) -> BootOutcome {
        self.report.overclock = Some(self.overclock.force_safe(self.board.cpu.as_mut()));
        self.crash("Overheating");
        self.sleep(WakeSource::None)
    }

    fn mount_phase(&mut self) -> MountReport {
        let acquirer = TimedResourceAcquirer::new(Arc::clone(&self.board.card), &self.cfg);
        let report = acquirer.mount(self.cfg.mount_budget(), self.board.internal.as_mut());
        self.report.diagnostics = if report.outcome.is_mounted() {
            DiagnosticsStore::Card
        } else if report.internal_mounted {
            DiagnosticsStore::Internal
        } else {
            DiagnosticsStore::None
        };
        self.report.mount = Some(report);
        report
    }

    fn reference(&mut self) -> Result<ReferenceHash, VolumeError> {
        let path = self.cfg.hash_file.as_str();
        match self.board.card.lock() {
            Ok(mut card) => read_reference(&mut *card, path),
            Err(_) => Err(VolumeError::NotMounted),
        }
    }

    fn integrity_phase(&mut self) -> Option<BootOutcome> {
        let expected = match self.reference() {
            Ok(ReferenceHash::Missing) => {
                info!("[boot] no reference hash at {}, skipping integrity check", self.cfg.hash_file);
                self.report.integrity = IntegrityStatus::SkippedNoReference;
                return None;
            }
            Ok(ReferenceHash::Value(v)) => Ok(v),
            Ok(ReferenceHash::Malformed(text)) => Err(IntegrityFailure::MalformedReference(text)),
            Err(e) => Err(IntegrityFailure::ReferenceUnreadable(e.to_string())),
        };

        self.enter(BootPhase::IntegrityCheck);
        info!("[boot] verifying firmware integrity");
        let result = expected.and_then(|expected| {
            let slot = self
                .board
                .updater
                .running_slot()
                .ok_or(IntegrityFailure::NoRunningSlot)?;
            let record = self.verifier.verify(
                self.board.flash.as_mut(),
                self.board.watchdog.as_mut(),
                &slot,
                expected,
            )?;
            if record.matches() {
                Ok(record)
            } else {
                Err(IntegrityFailure::Mismatch(record))
            }
        });

        match result {
            Ok(record) => {
                info!("[boot] integrity OK");
                self.report.integrity = IntegrityStatus::Passed(record);
                None
            }
            Err(failure) => {
                self.report.integrity = IntegrityStatus::Failed(failure.clone());
                self.integrity_failed(failure)
            }
        }
    }

    fn integrity_failed(&mut self, failure: IntegrityFailure) -> Option<BootOutcome> {
        match failure.fault() {
            Some(fault) => log_fault(&fault),
            None => error!("[boot] INTEGRITY FAIL: {failure}"),
        }
        self.crash("Integrity Fail");
        if !self.board.updater.supports_rollback() {
            warn!("[boot] single-slot platform, integrity failure is advisory only");
            return None;
        }
        info!("[boot] rolling back");
        match self.board.updater.mark_invalid_and_reboot() {
            Ok(()) => {
                self.enter(BootPhase::RollbackReboot);
                Some(BootOutcome::Rebooted)
            }
            Err(e) => {
                error!("[boot] rollback failed: {e}, refusing to run untrusted firmware");
                Some(self.sleep(WakeSource::None))
            }
        }
    }

    fn power_phase(&mut self) -> Option<BootOutcome> {
        match self.guard.check_power(self.board.battery.as_mut()) {
            PowerVerdict::Ok(raw) => {
                self.report.reading.battery_raw = Some(raw);
                None
            }
            PowerVerdict::Unavailable => {
                warn!("[boot] battery reading unavailable, continuing");
                None
            }
            PowerVerdict::Critical(raw) => {
                self.report.reading.battery_raw = Some(raw);
                log_fault(&BootFault::PowerCritical { raw });
                self.crash("Battery Low");
                Some(self.sleep(WakeSource::Timer(self.cfg.battery_wake())))
            }
        }
    }

    fn sleep(&mut self, wake: WakeSource) -> BootOutcome {
        self.enter(BootPhase::EmergencySleep);
        self.board.power.deep_sleep(wake);
        BootOutcome::EmergencySleep(wake)
    }

    fn crash(&mut self, reason: &str) {
        let entry = CrashLogEntry::new(self.board.uptime.uptime_ms(), reason);
        let result = match self.report.diagnostics {
            DiagnosticsStore::Card => match self.board.card.lock() {
                Ok(mut card) => self.crash_log.append(Some(&mut *card), &entry),
                Err(_) => Err(VolumeError::NotMounted),
            },
            DiagnosticsStore::Internal => {
                self.crash_log.append(Some(self.board.internal.as_mut()), &entry)
            }
            DiagnosticsStore::None => self.crash_log.append(None::<&mut dyn crate::hal::Volume>, &entry),
        };
        if let Err(e) = result {
            warn!("[boot] crash log {} write failed: {e}", self.crash_log.path());
        }
    }
}
