// CLASSIFICATION: COMMUNITY
// Filename: phase.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Boot phase state machine.

use std::fmt;

use thiserror::Error;

/// One discrete step of the boot sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BootPhase {
    Init,
    SafeModeCheck,
    ThermalCheck,
    StorageMount,
    IntegrityCheck,
    PowerCheck,
    WatchdogArm,
    Overclock,
    Running,
    SafeLoop,
    EmergencySleep,
    RollbackReboot,
}

use BootPhase::*;

impl BootPhase {
    /// Phases reachable from `self` in one step.
    pub fn successors(self) -> &'static [BootPhase] {
        match self {
            Init => &[SafeModeCheck],
            SafeModeCheck => &[ThermalCheck, StorageMount],
            ThermalCheck => &[StorageMount, EmergencySleep],
            StorageMount => &[IntegrityCheck, PowerCheck, SafeLoop],
            IntegrityCheck => &[PowerCheck, RollbackReboot, EmergencySleep],
            PowerCheck => &[WatchdogArm, EmergencySleep],
            WatchdogArm => &[Overclock],
            Overclock => &[Running],
            Running | SafeLoop | EmergencySleep | RollbackReboot => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }
}

impl fmt::Display for BootPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Init => "init",
            SafeModeCheck => "safe-mode-check",
            ThermalCheck => "thermal-check",
            StorageMount => "storage-mount",
            IntegrityCheck => "integrity-check",
            PowerCheck => "power-check",
            WatchdogArm => "watchdog-arm",
            Overclock => "overclock",
            Running => "running",
            SafeLoop => "safe-loop",
            EmergencySleep => "emergency-sleep",
            RollbackReboot => "rollback-reboot",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal boot transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: BootPhase,
    pub to: BootPhase,
}

/// Current phase plus everything visited so far.
#[derive(Clone, Debug)]
pub struct PhaseTracker {
    history: Vec<BootPhase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self { history: vec![Init] }
    }
}

impl PhaseTracker {
    pub fn current(&self) -> BootPhase {
        self.history.last().copied().unwrap_or(Init)
    }

    pub fn history(&self) -> &[BootPhase] {
        &self.history
    }

    pub fn visited(&self, phase: BootPhase) -> bool {
        self.history.contains(&phase)
    }

    /// Move forward to `next`; the current phase is unchanged on error.
    pub fn advance(&mut self, next: BootPhase) -> Result<(), IllegalTransition> {
        let from = self.current();
        if !from.successors().contains(&next) {
            return Err(IllegalTransition { from, to: next });
        }
        self.history.push(next);
        Ok(())
    }
}
