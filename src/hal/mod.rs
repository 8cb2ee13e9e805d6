// CLASSIFICATION: COMMUNITY
// Filename: mod.rs · HAL facade v0.3
// Date Modified: 2026-10-16
// Author: Lukas Bower
//
// ─────────────────────────────────────────────────────────────
// Cohesix · Boot Hardware‑Abstraction Layer
//
// Every device the boot supervisor touches is a trait here so the
// supervisor itself stays free of board specifics. A concrete board
// hands a [`Board`] bundle to [`crate::boot::BootSupervisor`].
//
// ## Back‑ends
// * `sim`     – deterministic simulated board used by tests and the CLI.
// * `hostfs`  – a [`Volume`] rooted in a host directory.
//
// Drivers block; none of these traits are async.
// ─────────────────────────────────────────────────────────────

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{BusError, ClockError, FlashError, LockError, RollbackError, VolumeError};

/// Directory‑backed volume.
pub mod hostfs;
/// Simulated board.
pub mod sim;

/// Single digital input, read once.
pub trait DigitalInput {
    /// `true` when the pin is pulled low.
    fn is_low(&mut self) -> bool;
}

/// On‑die temperature sensor.
pub trait TemperatureSensor {
    /// Current die temperature, `None` when the sensor cannot be read.
    fn read_celsius(&mut self) -> Option<f32>;
}

/// Single analog channel.
pub trait AnalogInput {
    /// Raw 12‑bit conversion result.
    fn read_raw(&mut self) -> u16;
}

/// CPU frequency control.
pub trait CpuClock {
    /// Request a new core frequency.
    fn set_frequency_mhz(&mut self, mhz: u32) -> Result<(), ClockError>;
    /// Frequency currently in effect.
    fn frequency_mhz(&self) -> u32;
}

/// Lock preventing the power manager from scaling the clock down.
pub trait PerfLock {
    /// Acquire the lock. Once held it stays held until power‑off.
    fn acquire(&mut self) -> Result<(), LockError>;
}

/// Hardware watchdog timer.
pub trait Watchdog {
    /// Start the watchdog with the given timeout.
    fn arm(&mut self, timeout: Duration);
    /// Acknowledge the watchdog. Harmless before [`Watchdog::arm`].
    fn feed(&mut self);
}

/// How a deep sleep may end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WakeSource {
    /// No wake source; only an external reset ends the sleep.
    None,
    /// Wake after the given delay.
    Timer(Duration),
}

/// Low‑power state control.
pub trait PowerControl {
    /// Enter deep sleep. Real hardware never returns from this call.
    fn deep_sleep(&mut self, wake: WakeSource);
}

/// Minimal file surface the supervisor needs from a mounted volume.
pub trait Volume {
    /// Whole file contents, `None` when the file does not exist.
    fn read_to_string(&mut self, path: &str) -> Result<Option<String>, VolumeError>;
    /// File size in bytes, `None` when the file does not exist.
    fn file_len(&mut self, path: &str) -> Result<Option<u64>, VolumeError>;
    /// Delete a file; deleting a missing file is not an error.
    fn remove(&mut self, path: &str) -> Result<(), VolumeError>;
    /// Append `line` plus a newline, creating the file if needed.
    fn append_line(&mut self, path: &str, line: &str) -> Result<(), VolumeError>;
}

/// Cooperative cancellation flag shared between the mount worker and
/// the supervisor.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, un‑cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Removable storage bus bring‑up.
///
/// Implementors must check `cancel` between bus operations and return
/// [`BusError::Cancelled`] only after the bus is back in a quiescent
/// state, so the next user of the bus sees no half‑finished transaction.
pub trait StorageBus: Send {
    /// Initialise the bus at `rate_hz` and mount the filesystem.
    fn mount(&mut self, rate_hz: u32, cancel: &CancelToken) -> Result<(), BusError>;
}

/// Removable card: a bus plus the volume it exposes once mounted.
pub trait SdCard: StorageBus + Volume {}

impl<T: StorageBus + Volume> SdCard for T {}

/// Always‑present internal storage used as a diagnostics fallback.
pub trait InternalFlash: Volume {
    /// Mount, formatting first if the filesystem is unreadable.
    fn mount(&mut self) -> Result<(), VolumeError>;
}

/// Immutable view over the partition holding the running firmware.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FirmwarePartitionDescriptor {
    /// Absolute flash offset of the partition.
    pub base_offset: u64,
    /// Partition size in bytes.
    pub size: u64,
    /// Length of the image inside the partition, when declared.
    pub image_len: Option<u64>,
}

/// Raw read access to firmware partitions.
pub trait FlashReader {
    /// Fill `buf` from `offset` bytes into `partition`.
    fn read(
        &mut self,
        partition: &FirmwarePartitionDescriptor,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<(), FlashError>;
}

/// Dual‑slot update manager.
pub trait UpdateManager {
    /// Descriptor of the slot the CPU is executing from.
    fn running_slot(&self) -> Option<FirmwarePartitionDescriptor>;
    /// Whether an alternate slot exists to roll back to.
    fn supports_rollback(&self) -> bool;
    /// Mark the running slot invalid and reboot into the alternate slot.
    fn mark_invalid_and_reboot(&mut self) -> Result<(), RollbackError>;
}

/// Milliseconds since power‑on.
pub trait Uptime {
    /// Current uptime.
    fn uptime_ms(&self) -> u64;
}

/// [`Uptime`] measured from construction with the host monotonic clock.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicUptime(Instant);

impl MonotonicUptime {
    /// Start counting now.
    pub fn new() -> Self {
        Self(Instant::now())
    }
}

impl Default for MonotonicUptime {
    fn default() -> Self {
        Self::new()
    }
}

impl Uptime for MonotonicUptime {
    fn uptime_ms(&self) -> u64 {
        self.0.elapsed().as_millis() as u64
    }
}

/// Every device the boot supervisor drives.
pub struct Board {
    /// Safe‑mode selector (active‑low).
    pub safe_mode_pin: Box<dyn DigitalInput>,
    /// Die temperature.
    pub temperature: Box<dyn TemperatureSensor>,
    /// Battery divider channel.
    pub battery: Box<dyn AnalogInput>,
    /// Core clock.
    pub cpu: Box<dyn CpuClock>,
    /// Max‑frequency lock.
    pub perf_lock: Box<dyn PerfLock>,
    /// Watchdog timer.
    pub watchdog: Box<dyn Watchdog>,
    /// Sleep control.
    pub power: Box<dyn PowerControl>,
    /// Removable card, shared with the mount worker.
    pub card: Arc<Mutex<dyn SdCard>>,
    /// Internal fallback volume.
    pub internal: Box<dyn InternalFlash>,
    /// Firmware partition reads.
    pub flash: Box<dyn FlashReader>,
    /// Slot management.
    pub updater: Box<dyn UpdateManager>,
    /// Uptime source.
    pub uptime: Box<dyn Uptime>,
}
