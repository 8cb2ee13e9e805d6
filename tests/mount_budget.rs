// CLASSIFICATION: COMMUNITY
// Filename: mount_budget.rs v0.2
// Date Modified: 2026-10-17
// Author: Lukas Bower

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cohboot::boot::{BootOutcome, BootPhase, BootSupervisor, DiagnosticsStore};
use cohboot::config::BootConfig;
use cohboot::error::{BusError, VolumeError};
use cohboot::hal::sim::{MemVolume, SimBoard, SimCard, SimFirmware, SimInternalFlash};
use cohboot::hal::{CancelToken, SdCard, StorageBus, Volume};
use cohboot::storage::{MountMode, ResourceAcquisitionOutcome, TimedResourceAcquirer};
use serial_test::serial;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn cfg() -> BootConfig {
    BootConfig {
        probe_delay_ms: 0,
        ..BootConfig::default()
    }
}

#[test]
#[serial]
fn hung_primary_mount_falls_back_within_budget() {
    init_logger();
    let cfg = cfg();
    let card = SimCard::new(MemVolume::default())
        .latency(Duration::from_millis(20))
        .latency_at(cfg.primary_bus_hz, Duration::from_secs(2));
    let sim = SimBoard::new(card, SimFirmware::new(vec![0u8; 64], 4096));
    let mut sup = BootSupervisor::new(sim.board(), cfg.clone());

    assert_eq!(sup.run(), BootOutcome::Continue);

    let mount = sup.report().mount.unwrap();
    assert_eq!(
        mount.outcome,
        ResourceAcquisitionOutcome::Mounted(MountMode::Fallback)
    );
    assert!(mount.timed_out);
    assert!(!mount.worker_detached);
    assert!(mount.primary_elapsed >= cfg.mount_budget());
    // Budget, a few ms of cancellation, then the 20 ms fallback mount.
    let bound = cfg.mount_budget() + Duration::from_millis(50 + 20);
    assert!(mount.elapsed <= bound, "mount took {:?}", mount.elapsed);

    let attempts = sim.card.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].rate_hz, cfg.primary_bus_hz);
    assert_eq!(attempts[0].result, Err(BusError::Cancelled));
    assert_eq!(attempts[1].rate_hz, cfg.fallback_bus_hz);
    assert_eq!(attempts[1].result, Ok(()));
    assert_eq!(sup.report().diagnostics, DiagnosticsStore::Card);
}

#[test]
#[serial]
fn card_that_never_answers_leaves_storage_on_internal_flash() {
    init_logger();
    let cfg = BootConfig {
        mount_budget_ms: 100,
        ..cfg()
    };
    let card = SimCard::new(MemVolume::default())
        .latency(Duration::from_millis(5))
        .latency_at(cfg.primary_bus_hz, Duration::from_secs(2))
        .fail_at(cfg.fallback_bus_hz);
    let sim = SimBoard::new(card, SimFirmware::new(vec![0u8; 64], 4096));
    let mut sup = BootSupervisor::new(sim.board(), cfg);

    let start = Instant::now();
    assert_eq!(sup.run(), BootOutcome::Continue);
    assert!(start.elapsed() < Duration::from_millis(1000));

    let mount = sup.report().mount.unwrap();
    assert_eq!(mount.outcome, ResourceAcquisitionOutcome::Unmounted);
    assert!(mount.internal_mounted);
    assert!(sim.internal.is_mounted());
    assert!(!sup.history().contains(&BootPhase::IntegrityCheck));
    assert_eq!(sup.report().diagnostics, DiagnosticsStore::Internal);
}

#[test]
#[serial]
fn absent_card_fails_fast_without_retry() {
    init_logger();
    let card = SimCard::new(MemVolume::default())
        .present(false)
        .latency(Duration::from_millis(5));
    let sim = SimBoard::new(card, SimFirmware::new(vec![0u8; 64], 4096));
    let mut sup = BootSupervisor::new(sim.board(), cfg());

    let start = Instant::now();
    assert_eq!(sup.run(), BootOutcome::Continue);
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(sim.card.attempts().len(), 1);
    assert!(!sup.report().mount.unwrap().timed_out);
}

/// Bus whose mount is a single blocking operation that only looks at the
/// cancellation token once it returns.
struct BlockingBus {
    hold: Duration,
    honour_cancel: bool,
    calls: Arc<AtomicU32>,
}

impl BlockingBus {
    fn new(hold: Duration, honour_cancel: bool) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let bus = Self {
            hold,
            honour_cancel,
            calls: Arc::clone(&calls),
        };
        (bus, calls)
    }
}

impl StorageBus for BlockingBus {
    fn mount(&mut self, _rate_hz: u32, cancel: &CancelToken) -> Result<(), BusError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.hold);
        if self.honour_cancel && cancel.is_cancelled() {
            return Err(BusError::Cancelled);
        }
        Ok(())
    }
}

impl Volume for BlockingBus {
    fn read_to_string(&mut self, _path: &str) -> Result<Option<String>, VolumeError> {
        Err(VolumeError::NotMounted)
    }

    fn file_len(&mut self, _path: &str) -> Result<Option<u64>, VolumeError> {
        Err(VolumeError::NotMounted)
    }

    fn remove(&mut self, _path: &str) -> Result<(), VolumeError> {
        Err(VolumeError::NotMounted)
    }

    fn append_line(&mut self, _path: &str, _line: &str) -> Result<(), VolumeError> {
        Err(VolumeError::NotMounted)
    }
}

fn acquirer(card: impl SdCard + 'static, cfg: &BootConfig) -> TimedResourceAcquirer {
    let card: Arc<Mutex<dyn SdCard>> = Arc::new(Mutex::new(card));
    TimedResourceAcquirer::new(card, cfg)
}

#[test]
#[serial]
fn primary_phase_respects_every_budget() {
    init_logger();
    let cfg = cfg();
    for budget_ms in [50u64, 100, 500] {
        let budget = Duration::from_millis(budget_ms);
        let card = SimCard::new(MemVolume::default())
            .latency(Duration::from_millis(20))
            .latency_at(cfg.primary_bus_hz, Duration::from_secs(2));
        let mut internal = SimInternalFlash::new(true);
        let report = acquirer(card, &cfg).mount(budget, &mut internal);

        assert_eq!(
            report.outcome,
            ResourceAcquisitionOutcome::Mounted(MountMode::Fallback)
        );
        // Poll slice, one 5 ms bus slice, and scheduler slack.
        let primary_bound = budget + cfg.mount_poll() + Duration::from_millis(5 + 15);
        assert!(
            report.primary_elapsed <= primary_bound,
            "budget {budget:?}: primary took {:?}",
            report.primary_elapsed
        );
        assert!(
            report.elapsed <= budget + Duration::from_millis(50 + 20),
            "budget {budget:?}: mount took {:?}",
            report.elapsed
        );
    }
}

#[test]
#[serial]
fn stuck_driver_is_abandoned_after_grace() {
    init_logger();
    let cfg = cfg();
    let (bus, calls) = BlockingBus::new(Duration::from_secs(3), true);
    let mut internal = SimInternalFlash::new(true);

    let start = Instant::now();
    let report = acquirer(bus, &cfg).mount(Duration::from_millis(500), &mut internal);
    let elapsed = start.elapsed();

    let bound = cfg.mount_budget() + cfg.mount_poll() + cfg.mount_grace() + Duration::from_millis(40);
    assert!(elapsed <= bound, "mount took {elapsed:?}");
    assert_eq!(report.outcome, ResourceAcquisitionOutcome::Unmounted);
    assert!(report.timed_out);
    assert!(report.worker_detached);
    assert!(report.internal_mounted);
    // The bus is still owned by the detached worker, so no fallback attempt.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
#[serial]
fn primary_finishing_inside_grace_is_kept() {
    init_logger();
    let cfg = cfg();
    let (bus, calls) = BlockingBus::new(Duration::from_millis(115), false);
    let mut internal = SimInternalFlash::new(true);

    let report = acquirer(bus, &cfg).mount(Duration::from_millis(100), &mut internal);

    assert_eq!(
        report.outcome,
        ResourceAcquisitionOutcome::Mounted(MountMode::Primary)
    );
    assert!(report.timed_out);
    assert!(!report.worker_detached);
    assert!(!report.internal_mounted);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
