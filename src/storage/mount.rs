// CLASSIFICATION: COMMUNITY
// Filename: mount.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Time‑bounded removable storage mount.
//!
//! A worker thread tries the card at the primary bus rate while the caller
//! waits on a one‑shot result channel in short slices. When the budget runs
//! out the worker is cancelled through its [`CancelToken`] and given a short
//! grace window to report back from a quiescent point. A worker that reports
//! in time is joined and the mount is retried synchronously at the fallback
//! rate; a worker that does not is left detached and the card is given up,
//! since the bus is still in use. If the card stays unavailable the internal
//! flash is mounted so diagnostics still have somewhere to go.
//!
//! A primary mount that completes after the deadline but inside the grace
//! window is kept rather than remounted at the fallback rate.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info, warn};

use crate::config::BootConfig;
use crate::error::{BootFault, BusError};
use crate::hal::{CancelToken, InternalFlash, SdCard};

/// Which bus rate the card came up at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MountMode {
    Primary,
    Fallback,
}

/// Result of a storage acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceAcquisitionOutcome {
    Mounted(MountMode),
    Unmounted,
}

impl ResourceAcquisitionOutcome {
    pub fn is_mounted(&self) -> bool {
        matches!(self, ResourceAcquisitionOutcome::Mounted(_))
    }
}

/// Everything [`TimedResourceAcquirer::mount`] found out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MountReport {
    pub outcome: ResourceAcquisitionOutcome,
    /// Internal flash came up as the diagnostics fallback.
    pub internal_mounted: bool,
    /// Whether the primary attempt ran out of budget.
    pub timed_out: bool,
    /// The cancelled worker missed its grace window and still owns the bus.
    pub worker_detached: bool,
    /// Time spent on the primary attempt, cancellation included.
    pub primary_elapsed: Duration,
    pub elapsed: Duration,
}

/// How the worker-side primary attempt ended.
#[derive(Debug)]
enum PrimaryAttempt {
    /// Reported before the deadline.
    Finished(Result<(), BusError>),
    /// Reported after cancellation, inside the grace window.
    Quiesced(Result<(), BusError>),
    /// No report inside the grace window.
    Stuck,
}

/// Mounts the removable card under a wall‑clock budget.
pub struct TimedResourceAcquirer {
    card: Arc<Mutex<dyn SdCard>>,
    primary_hz: u32,
    fallback_hz: u32,
    poll: Duration,
    grace: Duration,
}

impl TimedResourceAcquirer {
    pub fn new(card: Arc<Mutex<dyn SdCard>>, cfg: &BootConfig) -> Self {
        Self {
            card,
            primary_hz: cfg.primary_bus_hz,
            fallback_hz: cfg.fallback_bus_hz,
            poll: cfg.mount_poll(),
            grace: cfg.mount_grace(),
        }
    }

    /// Acquire the card within `budget` plus the cancellation grace window
    /// and, when the worker quiesced, one synchronous fallback attempt.
    /// Falls back to internal flash if the card stays unavailable.
    pub fn mount(&self, budget: Duration, internal: &mut dyn InternalFlash) -> MountReport {
        let start = Instant::now();
        let attempt = self.primary(budget);
        let primary_elapsed = start.elapsed();

        let mut timed_out = true;
        let mut worker_detached = false;
        let outcome = match attempt {
            PrimaryAttempt::Finished(Ok(())) => {
                timed_out = false;
                ResourceAcquisitionOutcome::Mounted(MountMode::Primary)
            }
            PrimaryAttempt::Finished(Err(e)) => {
                timed_out = false;
                warn!("[mount] card failed at {} Hz: {e}", self.primary_hz);
                ResourceAcquisitionOutcome::Unmounted
            }
            PrimaryAttempt::Quiesced(Ok(())) => {
                info!("[mount] primary mount completed during cancellation, keeping it");
                ResourceAcquisitionOutcome::Mounted(MountMode::Primary)
            }
            PrimaryAttempt::Quiesced(Err(_)) => self.fallback(),
            PrimaryAttempt::Stuck => {
                warn!(
                    "[mount] worker did not quiesce within {:?}, abandoning card",
                    self.grace
                );
                worker_detached = true;
                ResourceAcquisitionOutcome::Unmounted
            }
        };

        let mut internal_mounted = false;
        if outcome == ResourceAcquisitionOutcome::Unmounted {
            warn!("[mount] {}", BootFault::ResourceUnavailable { budget });
            match internal.mount() {
                Ok(()) => {
                    info!("[mount] internal flash mounted for diagnostics");
                    internal_mounted = true;
                }
                Err(e) => warn!("[mount] internal flash unavailable: {e}"),
            }
        }

        let report = MountReport {
            outcome,
            internal_mounted,
            timed_out,
            worker_detached,
            primary_elapsed,
            elapsed: start.elapsed(),
        };
        debug!("[mount] {report:?}");
        report
    }

    /// Run the primary attempt on a worker, cancelling it at the deadline.
    fn primary(&self, budget: Duration) -> PrimaryAttempt {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let token = CancelToken::new();
        let worker_token = token.clone();
        let card = Arc::clone(&self.card);
        let rate = self.primary_hz;
        let spawned = thread::Builder::new()
            .name("sd-mount".into())
            .spawn(move || {
                let result = match card.lock() {
                    Ok(mut bus) => bus.mount(rate, &worker_token),
                    Err(_) => Err(BusError::Mount("card lock poisoned".into())),
                };
                let _ = tx.send(result);
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                warn!("[mount] could not spawn mount worker: {e}");
                return PrimaryAttempt::Quiesced(Err(BusError::Mount(e.to_string())));
            }
        };

        info!("[mount] mounting card at {} Hz (budget {budget:?})", rate);
        let deadline = Instant::now() + budget;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match rx.recv_timeout(self.poll.min(deadline - now)) {
                Ok(result) => {
                    join(handle);
                    return PrimaryAttempt::Finished(result);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    join(handle);
                    return PrimaryAttempt::Finished(Err(worker_exited()));
                }
            }
        }

        warn!("[mount] card timeout after {budget:?}, cancelling worker");
        token.cancel();
        match self.await_quiescence(&rx) {
            Some(result) => {
                join(handle);
                PrimaryAttempt::Quiesced(result)
            }
            // Dropping the handle detaches the worker.
            None => PrimaryAttempt::Stuck,
        }
    }

    /// Wait up to the grace window for the cancelled worker to report.
    fn await_quiescence(
        &self,
        rx: &Receiver<Result<(), BusError>>,
    ) -> Option<Result<(), BusError>> {
        let cancel_started = Instant::now();
        let result = match rx.recv_timeout(self.grace) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Disconnected) => Some(Err(worker_exited())),
            Err(RecvTimeoutError::Timeout) => None,
        };
        debug!(
            "[mount] worker {} after {:?}",
            if result.is_some() { "quiescent" } else { "still busy" },
            cancel_started.elapsed()
        );
        result
    }

    fn fallback(&self) -> ResourceAcquisitionOutcome {
        let result = match self.card.lock() {
            Ok(mut bus) => bus.mount(self.fallback_hz, &CancelToken::new()),
            Err(_) => Err(BusError::Mount("card lock poisoned".into())),
        };
        match result {
            Ok(()) => {
                info!("[mount] card recovered at {} Hz", self.fallback_hz);
                ResourceAcquisitionOutcome::Mounted(MountMode::Fallback)
            }
            Err(e) => {
                warn!("[mount] card dead: {e}");
                ResourceAcquisitionOutcome::Unmounted
            }
        }
    }
}

fn worker_exited() -> BusError {
    BusError::Mount("mount worker exited".into())
}

/// Join a worker that has already reported, so it is about to return.
fn join(handle: thread::JoinHandle<()>) {
    if handle.join().is_err() {
        warn!("[mount] mount worker panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{MemVolume, SimCard, SimInternalFlash};

    fn acquirer(card: &SimCard) -> TimedResourceAcquirer {
        TimedResourceAcquirer::new(Arc::new(Mutex::new(card.clone())), &BootConfig::default())
    }

    #[test]
    fn fast_card_mounts_primary() {
        let card = SimCard::new(MemVolume::default()).latency(Duration::from_millis(20));
        let mut internal = SimInternalFlash::new(true);
        let report = acquirer(&card).mount(Duration::from_millis(500), &mut internal);
        assert_eq!(
            report.outcome,
            ResourceAcquisitionOutcome::Mounted(MountMode::Primary)
        );
        assert!(!report.timed_out);
        assert!(!report.internal_mounted);
        assert_eq!(card.attempts().len(), 1);
    }

    #[test]
    fn early_failure_is_not_retried() {
        let card = SimCard::new(MemVolume::default())
            .present(false)
            .latency(Duration::from_millis(5));
        let mut internal = SimInternalFlash::new(true);
        let report = acquirer(&card).mount(Duration::from_millis(500), &mut internal);
        assert_eq!(report.outcome, ResourceAcquisitionOutcome::Unmounted);
        assert!(!report.timed_out);
        assert!(report.internal_mounted);
        assert!(internal.is_mounted());
        assert_eq!(card.attempts().len(), 1);
    }

    #[test]
    fn slow_card_recovers_at_fallback_rate() {
        let cfg = BootConfig::default();
        let card = SimCard::new(MemVolume::default())
            .latency(Duration::from_millis(5))
            .latency_at(cfg.primary_bus_hz, Duration::from_secs(2));
        let mut internal = SimInternalFlash::new(true);
        let report = acquirer(&card).mount(Duration::from_millis(100), &mut internal);
        assert_eq!(
            report.outcome,
            ResourceAcquisitionOutcome::Mounted(MountMode::Fallback)
        );
        assert!(report.timed_out);
        let attempts = card.attempts();
        assert_eq!(attempts[0].result, Err(BusError::Cancelled));
        assert_eq!(attempts[1].rate_hz, cfg.fallback_bus_hz);
        assert!(!internal.is_mounted());
    }

    #[test]
    fn missing_internal_flash_is_tolerated() {
        let card = SimCard::new(MemVolume::default())
            .present(false)
            .latency(Duration::ZERO);
        let mut internal = SimInternalFlash::new(false);
        let report = acquirer(&card).mount(Duration::from_millis(50), &mut internal);
        assert_eq!(report.outcome, ResourceAcquisitionOutcome::Unmounted);
        assert!(!report.internal_mounted);
    }
}
