// CLASSIFICATION: COMMUNITY
// Filename: overclock.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Validated clock escalation.
//!
//! The core is raised to the probe step, a [`StabilityProbe`] runs there,
//! and only then is the maximum step applied and the performance lock
//! taken. A failed probe drops the core back to the safe step.

use std::hint::black_box;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use crate::config::{BootConfig, ClockSteps};
use crate::error::BootFault;
use crate::hal::{CpuClock, PerfLock};

/// Workload run at a candidate frequency before committing to it.
pub trait StabilityProbe {
    /// `true` when the core behaved at `mhz`.
    fn run(&mut self, mhz: u32) -> bool;
}

/// Fixed‑iteration accumulator loop with a short delay per iteration.
#[derive(Clone, Debug)]
pub struct AccumulatorProbe {
    iterations: u32,
    delay: Duration,
}

impl AccumulatorProbe {
    pub fn new(iterations: u32, delay: Duration) -> Self {
        Self { iterations, delay }
    }
}

impl StabilityProbe for AccumulatorProbe {
    fn run(&mut self, _mhz: u32) -> bool {
        let mut acc: u64 = 0;
        for i in 0..self.iterations {
            acc = black_box(acc + u64::from(i));
            thread::sleep(self.delay);
        }
        let n = u64::from(self.iterations);
        acc == n * n.saturating_sub(1) / 2
    }
}

/// Clock state after escalation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverclockState {
    pub current_mhz: u32,
    pub locked: bool,
}

/// Raises the core clock in validated steps.
pub struct OverclockValidator {
    steps: ClockSteps,
    probe: Box<dyn StabilityProbe>,
}

impl OverclockValidator {
    pub fn new(steps: ClockSteps, probe: Box<dyn StabilityProbe>) -> Self {
        Self { steps, probe }
    }

    /// Validator using the accumulator probe configured in `cfg`.
    pub fn from_config(cfg: &BootConfig) -> Self {
        Self::new(
            cfg.clock.clone(),
            Box::new(AccumulatorProbe::new(cfg.probe_iterations, cfg.probe_delay())),
        )
    }

    /// Force the lowest validated step.
    pub fn force_safe(&self, cpu: &mut dyn CpuClock) -> OverclockState {
        if let Err(e) = cpu.set_frequency_mhz(self.steps.safe_mhz) {
            error!("[overclock] cannot drop to safe clock: {e}");
        }
        OverclockState {
            current_mhz: cpu.frequency_mhz(),
            locked: false,
        }
    }

    pub fn escalate(&mut self, cpu: &mut dyn CpuClock, lock: &mut dyn PerfLock) -> OverclockState {
        let probe_mhz = self.steps.probe_mhz;
        info!("[overclock] testing stability at {probe_mhz} MHz");
        if let Err(e) = cpu.set_frequency_mhz(probe_mhz) {
            warn!("[overclock] {e}, staying at safe clock");
            return self.force_safe(cpu);
        }
        if !self.probe.run(probe_mhz) {
            warn!("[overclock] stability probe failed at {probe_mhz} MHz");
            return self.force_safe(cpu);
        }

        let max_mhz = self.steps.max_mhz;
        info!("[overclock] engaging {max_mhz} MHz");
        if let Err(e) = cpu.set_frequency_mhz(max_mhz) {
            warn!("[overclock] {e}, keeping {probe_mhz} MHz");
            return OverclockState {
                current_mhz: cpu.frequency_mhz(),
                locked: false,
            };
        }

        let locked = match lock.acquire() {
            Ok(()) => {
                info!("[overclock] power lock acquired ({max_mhz} MHz enforced)");
                true
            }
            Err(e) => {
                warn!("[overclock] {}, running unlocked", BootFault::LockUnavailable(e));
                false
            }
        };
        OverclockState {
            current_mhz: cpu.frequency_mhz(),
            locked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{SimCpu, SimPerfLock};

    struct Fails;

    impl StabilityProbe for Fails {
        fn run(&mut self, _mhz: u32) -> bool {
            false
        }
    }

    fn validator(probe: Box<dyn StabilityProbe>) -> OverclockValidator {
        OverclockValidator::new(ClockSteps::default(), probe)
    }

    #[test]
    fn escalates_through_probe_step() {
        let mut cpu = SimCpu::new(160, 240);
        let mut lock = SimPerfLock::new(true);
        let state = validator(Box::new(AccumulatorProbe::new(3, Duration::ZERO)))
            .escalate(&mut cpu, &mut lock);
        assert_eq!(state, OverclockState { current_mhz: 240, locked: true });
        assert_eq!(cpu.history(), vec![160, 240]);
        assert!(lock.is_held());
    }

    #[test]
    fn lock_failure_is_soft() {
        let mut cpu = SimCpu::new(160, 240);
        let mut lock = SimPerfLock::new(false);
        let state = validator(Box::new(AccumulatorProbe::new(1, Duration::ZERO)))
            .escalate(&mut cpu, &mut lock);
        assert_eq!(state, OverclockState { current_mhz: 240, locked: false });
    }

    #[test]
    fn failed_probe_falls_back_to_safe() {
        let mut cpu = SimCpu::new(160, 240);
        let mut lock = SimPerfLock::new(true);
        let state = validator(Box::new(Fails)).escalate(&mut cpu, &mut lock);
        assert_eq!(state, OverclockState { current_mhz: 80, locked: false });
        assert!(!lock.is_held());
    }

    #[test]
    fn unsupported_max_keeps_probe_step() {
        let mut cpu = SimCpu::new(160, 200);
        let mut lock = SimPerfLock::new(true);
        let state = validator(Box::new(AccumulatorProbe::new(1, Duration::ZERO)))
            .escalate(&mut cpu, &mut lock);
        assert_eq!(state, OverclockState { current_mhz: 160, locked: false });
    }

    #[test]
    fn accumulator_probe_passes() {
        assert!(AccumulatorProbe::new(10, Duration::ZERO).run(160));
        assert!(AccumulatorProbe::new(0, Duration::ZERO).run(160));
    }
}
