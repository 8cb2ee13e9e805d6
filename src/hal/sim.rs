// CLASSIFICATION: COMMUNITY
// Filename: sim.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Simulated boot board.
//!
//! Every device is a cheap `Clone` handle over shared state, so a test can
//! keep a [`SimBoard`], hand [`SimBoard::board`] to the supervisor and then
//! inspect what happened (clock history, watchdog feeds, sleeps, rollbacks).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::{BusError, ClockError, FlashError, LockError, RollbackError, VolumeError};
use crate::hal::{
    AnalogInput, Board, CancelToken, CpuClock, DigitalInput, FirmwarePartitionDescriptor,
    FlashReader, InternalFlash, MonotonicUptime, PerfLock, PowerControl, StorageBus,
    TemperatureSensor, UpdateManager, Volume, WakeSource, Watchdog,
};

const BUS_SLICE: Duration = Duration::from_millis(5);

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Simulated devices never panic while holding a lock; recover anyway.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Safe‑mode pin.
#[derive(Clone, Debug, Default)]
pub struct SimPin(Arc<AtomicBool>);

impl SimPin {
    pub fn set_low(&self, low: bool) {
        self.0.store(low, Ordering::SeqCst);
    }
}

impl DigitalInput for SimPin {
    fn is_low(&mut self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Die temperature sensor; `None` simulates a missing sensor.
#[derive(Clone, Debug, Default)]
pub struct SimThermometer {
    celsius: Arc<Mutex<Option<f32>>>,
    reads: Arc<AtomicU32>,
}

impl SimThermometer {
    pub fn set(&self, celsius: Option<f32>) {
        *lock(&self.celsius) = celsius;
    }

    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl TemperatureSensor for SimThermometer {
    fn read_celsius(&mut self) -> Option<f32> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        *lock(&self.celsius)
    }
}

/// Battery ADC channel.
#[derive(Clone, Debug, Default)]
pub struct SimAdc {
    raw: Arc<AtomicU16>,
    reads: Arc<AtomicU32>,
}

impl SimAdc {
    pub fn set(&self, raw: u16) {
        self.raw.store(raw, Ordering::SeqCst);
    }

    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl AnalogInput for SimAdc {
    fn read_raw(&mut self) -> u16 {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.raw.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct CpuState {
    current: u32,
    max_supported: u32,
    history: Vec<u32>,
}

/// Core clock that records every requested frequency.
#[derive(Clone, Debug)]
pub struct SimCpu(Arc<Mutex<CpuState>>);

impl SimCpu {
    pub fn new(boot_mhz: u32, max_supported: u32) -> Self {
        Self(Arc::new(Mutex::new(CpuState {
            current: boot_mhz,
            max_supported,
            history: Vec::new(),
        })))
    }

    /// Frequencies applied, in order.
    pub fn history(&self) -> Vec<u32> {
        lock(&self.0).history.clone()
    }
}

impl CpuClock for SimCpu {
    fn set_frequency_mhz(&mut self, mhz: u32) -> Result<(), ClockError> {
        let mut st = lock(&self.0);
        if mhz == 0 || mhz > st.max_supported {
            return Err(ClockError(mhz));
        }
        st.current = mhz;
        st.history.push(mhz);
        Ok(())
    }

    fn frequency_mhz(&self) -> u32 {
        lock(&self.0).current
    }
}

/// Performance lock that can be made unavailable.
#[derive(Clone, Debug)]
pub struct SimPerfLock {
    available: bool,
    held: Arc<AtomicBool>,
}

impl SimPerfLock {
    pub fn new(available: bool) -> Self {
        Self {
            available,
            held: Arc::default(),
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

impl PerfLock for SimPerfLock {
    fn acquire(&mut self) -> Result<(), LockError> {
        if !self.available {
            return Err(LockError("power management disabled".into()));
        }
        self.held.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct WatchdogState {
    timeout: Option<Duration>,
    feeds: u64,
    last_feed: Option<Instant>,
    starved: bool,
}

/// Watchdog that notices when it would have fired.
#[derive(Clone, Debug, Default)]
pub struct SimWatchdog(Arc<Mutex<WatchdogState>>);

impl SimWatchdog {
    pub fn armed_timeout(&self) -> Option<Duration> {
        lock(&self.0).timeout
    }

    pub fn feeds(&self) -> u64 {
        lock(&self.0).feeds
    }

    /// `true` if a feed ever arrived later than the armed timeout.
    pub fn starved(&self) -> bool {
        lock(&self.0).starved
    }
}

impl Watchdog for SimWatchdog {
    fn arm(&mut self, timeout: Duration) {
        let mut st = lock(&self.0);
        st.timeout = Some(timeout);
        st.last_feed = Some(Instant::now());
    }

    fn feed(&mut self) {
        let mut st = lock(&self.0);
        let now = Instant::now();
        if let (Some(timeout), Some(last)) = (st.timeout, st.last_feed) {
            if now.duration_since(last) > timeout {
                st.starved = true;
            }
        }
        st.feeds += 1;
        st.last_feed = Some(now);
    }
}

/// Records deep‑sleep requests instead of sleeping.
#[derive(Clone, Debug, Default)]
pub struct SimPower(Arc<Mutex<Vec<WakeSource>>>);

impl SimPower {
    pub fn sleeps(&self) -> Vec<WakeSource> {
        lock(&self.0).clone()
    }
}

impl PowerControl for SimPower {
    fn deep_sleep(&mut self, wake: WakeSource) {
        lock(&self.0).push(wake);
    }
}

/// In‑memory volume.
#[derive(Clone, Debug, Default)]
pub struct MemVolume(Arc<Mutex<HashMap<String, String>>>);

impl MemVolume {
    pub fn with_file(self, path: &str, contents: &str) -> Self {
        lock(&self.0).insert(path.to_string(), contents.to_string());
        self
    }

    pub fn contents(&self, path: &str) -> Option<String> {
        lock(&self.0).get(path).cloned()
    }
}

impl Volume for MemVolume {
    fn read_to_string(&mut self, path: &str) -> Result<Option<String>, VolumeError> {
        Ok(lock(&self.0).get(path).cloned())
    }

    fn file_len(&mut self, path: &str) -> Result<Option<u64>, VolumeError> {
        Ok(lock(&self.0).get(path).map(|s| s.len() as u64))
    }

    fn remove(&mut self, path: &str) -> Result<(), VolumeError> {
        lock(&self.0).remove(path);
        Ok(())
    }

    fn append_line(&mut self, path: &str, line: &str) -> Result<(), VolumeError> {
        let mut files = lock(&self.0);
        let file = files.entry(path.to_string()).or_default();
        file.push_str(line);
        file.push('\n');
        Ok(())
    }
}

/// One call into [`SimCard`]'s bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountAttempt {
    pub rate_hz: u32,
    pub result: Result<(), BusError>,
}

struct CardState {
    present: bool,
    latency: Duration,
    latency_at: HashMap<u32, Duration>,
    failing_rates: Vec<u32>,
    mounted: bool,
    attempts: Vec<MountAttempt>,
    volume: Box<dyn Volume + Send>,
}

/// Removable card with configurable presence, latency and failures.
///
/// A mount sleeps in short slices and honours cancellation between them,
/// which is the quiescent‑point contract of [`StorageBus`].
#[derive(Clone)]
pub struct SimCard(Arc<Mutex<CardState>>);

impl SimCard {
    pub fn new(volume: impl Volume + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(CardState {
            present: true,
            latency: Duration::from_millis(20),
            latency_at: HashMap::new(),
            failing_rates: Vec::new(),
            mounted: false,
            attempts: Vec::new(),
            volume: Box::new(volume),
        })))
    }

    pub fn present(self, present: bool) -> Self {
        lock(&self.0).present = present;
        self
    }

    /// Default mount latency for every rate.
    pub fn latency(self, latency: Duration) -> Self {
        lock(&self.0).latency = latency;
        self
    }

    /// Mount latency at one specific bus rate.
    pub fn latency_at(self, rate_hz: u32, latency: Duration) -> Self {
        lock(&self.0).latency_at.insert(rate_hz, latency);
        self
    }

    /// Make mounts at `rate_hz` fail with a transfer error.
    pub fn fail_at(self, rate_hz: u32) -> Self {
        lock(&self.0).failing_rates.push(rate_hz);
        self
    }

    pub fn attempts(&self) -> Vec<MountAttempt> {
        lock(&self.0).attempts.clone()
    }

    pub fn is_mounted(&self) -> bool {
        lock(&self.0).mounted
    }

    fn record(&self, rate_hz: u32, result: Result<(), BusError>) -> Result<(), BusError> {
        let mut st = lock(&self.0);
        st.mounted = result.is_ok();
        st.attempts.push(MountAttempt {
            rate_hz,
            result: result.clone(),
        });
        result
    }

    fn mounted_volume(&self) -> Result<MutexGuard<'_, CardState>, VolumeError> {
        let st = lock(&self.0);
        if st.mounted {
            Ok(st)
        } else {
            Err(VolumeError::NotMounted)
        }
    }
}

impl StorageBus for SimCard {
    fn mount(&mut self, rate_hz: u32, cancel: &CancelToken) -> Result<(), BusError> {
        let (latency, present, fails) = {
            let mut st = lock(&self.0);
            st.mounted = false;
            (
                st.latency_at.get(&rate_hz).copied().unwrap_or(st.latency),
                st.present,
                st.failing_rates.contains(&rate_hz),
            )
        };
        let start = Instant::now();
        while start.elapsed() < latency {
            if cancel.is_cancelled() {
                return self.record(rate_hz, Err(BusError::Cancelled));
            }
            thread::sleep(BUS_SLICE.min(latency.saturating_sub(start.elapsed())));
        }
        let result = if !present {
            Err(BusError::NoCard)
        } else if fails {
            Err(BusError::Transfer { rate_hz })
        } else {
            Ok(())
        };
        self.record(rate_hz, result)
    }
}

impl Volume for SimCard {
    fn read_to_string(&mut self, path: &str) -> Result<Option<String>, VolumeError> {
        self.mounted_volume()?.volume.read_to_string(path)
    }

    fn file_len(&mut self, path: &str) -> Result<Option<u64>, VolumeError> {
        self.mounted_volume()?.volume.file_len(path)
    }

    fn remove(&mut self, path: &str) -> Result<(), VolumeError> {
        self.mounted_volume()?.volume.remove(path)
    }

    fn append_line(&mut self, path: &str, line: &str) -> Result<(), VolumeError> {
        self.mounted_volume()?.volume.append_line(path, line)
    }
}

/// Internal flash volume.
#[derive(Clone, Debug)]
pub struct SimInternalFlash {
    volume: MemVolume,
    mountable: bool,
    mounted: Arc<AtomicBool>,
}

impl SimInternalFlash {
    pub fn new(mountable: bool) -> Self {
        Self {
            volume: MemVolume::default(),
            mountable,
            mounted: Arc::default(),
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    pub fn volume(&self) -> &MemVolume {
        &self.volume
    }

    fn check(&self) -> Result<(), VolumeError> {
        if self.is_mounted() {
            Ok(())
        } else {
            Err(VolumeError::NotMounted)
        }
    }
}

impl Volume for SimInternalFlash {
    fn read_to_string(&mut self, path: &str) -> Result<Option<String>, VolumeError> {
        self.check()?;
        self.volume.read_to_string(path)
    }

    fn file_len(&mut self, path: &str) -> Result<Option<u64>, VolumeError> {
        self.check()?;
        self.volume.file_len(path)
    }

    fn remove(&mut self, path: &str) -> Result<(), VolumeError> {
        self.check()?;
        self.volume.remove(path)
    }

    fn append_line(&mut self, path: &str, line: &str) -> Result<(), VolumeError> {
        self.check()?;
        self.volume.append_line(path, line)
    }
}

impl InternalFlash for SimInternalFlash {
    fn mount(&mut self) -> Result<(), VolumeError> {
        if !self.mountable {
            return Err(VolumeError::Io(std::io::Error::other(
                "internal flash format failed",
            )));
        }
        self.mounted.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Running firmware slot: partition contents plus the update manager.
///
/// Bytes past the image are read back as erased flash (`0xFF`).
#[derive(Clone, Debug)]
pub struct SimFirmware {
    image: Arc<Vec<u8>>,
    descriptor: Option<FirmwarePartitionDescriptor>,
    rollback_supported: bool,
    rollback_fails: bool,
    rollbacks: Arc<AtomicU32>,
    reads: Arc<AtomicU32>,
}

impl SimFirmware {
    /// Image placed in a partition of `partition_size` bytes at 0x10000.
    pub fn new(image: Vec<u8>, partition_size: u64) -> Self {
        let descriptor = FirmwarePartitionDescriptor {
            base_offset: 0x10000,
            size: partition_size.max(image.len() as u64),
            image_len: Some(image.len() as u64),
        };
        Self {
            image: Arc::new(image),
            descriptor: Some(descriptor),
            rollback_supported: true,
            rollback_fails: false,
            rollbacks: Arc::default(),
            reads: Arc::default(),
        }
    }

    /// Platform with no partition table entry for the running code.
    pub fn without_descriptor(mut self) -> Self {
        self.descriptor = None;
        self
    }

    pub fn single_slot(mut self) -> Self {
        self.rollback_supported = false;
        self
    }

    pub fn failing_rollback(mut self) -> Self {
        self.rollback_fails = true;
        self
    }

    pub fn rollbacks(&self) -> u32 {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Number of flash reads served.
    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl FlashReader for SimFirmware {
    fn read(
        &mut self,
        partition: &FirmwarePartitionDescriptor,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<(), FlashError> {
        let end = offset + buf.len() as u64;
        if end > partition.size {
            return Err(FlashError::OutOfBounds {
                offset,
                len: buf.len(),
            });
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        for (i, byte) in buf.iter_mut().enumerate() {
            let pos = offset as usize + i;
            *byte = self.image.get(pos).copied().unwrap_or(0xFF);
        }
        Ok(())
    }
}

impl UpdateManager for SimFirmware {
    fn running_slot(&self) -> Option<FirmwarePartitionDescriptor> {
        self.descriptor
    }

    fn supports_rollback(&self) -> bool {
        self.rollback_supported
    }

    fn mark_invalid_and_reboot(&mut self) -> Result<(), RollbackError> {
        if !self.rollback_supported {
            return Err(RollbackError::Unsupported);
        }
        if self.rollback_fails {
            return Err(RollbackError::Failed("otadata write failed".into()));
        }
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// JSON description of a simulated board, used by the CLI.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SimProfile {
    pub safe_mode: bool,
    pub temperature_c: Option<f32>,
    pub battery_raw: u16,
    pub card_present: bool,
    pub card_latency_ms: u64,
    pub card_fallback_latency_ms: Option<u64>,
    pub firmware_image: Option<PathBuf>,
    pub partition_size: u64,
    pub rollback_supported: bool,
    pub perf_lock_available: bool,
    pub boot_mhz: u32,
    pub max_cpu_mhz: u32,
    pub internal_flash: bool,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            safe_mode: false,
            temperature_c: Some(42.0),
            battery_raw: 2600,
            card_present: true,
            card_latency_ms: 50,
            card_fallback_latency_ms: None,
            firmware_image: None,
            partition_size: 64 * 1024,
            rollback_supported: true,
            perf_lock_available: true,
            boot_mhz: 160,
            max_cpu_mhz: 240,
            internal_flash: true,
        }
    }
}

/// Handles to every simulated device.
#[derive(Clone)]
pub struct SimBoard {
    pub pin: SimPin,
    pub thermometer: SimThermometer,
    pub adc: SimAdc,
    pub cpu: SimCpu,
    pub perf_lock: SimPerfLock,
    pub watchdog: SimWatchdog,
    pub power: SimPower,
    pub card: SimCard,
    pub internal: SimInternalFlash,
    pub firmware: SimFirmware,
}

impl SimBoard {
    /// Healthy board around the given card and firmware: cool, charged,
    /// dual-slot, booting at 160 MHz.
    pub fn new(card: SimCard, firmware: SimFirmware) -> Self {
        let thermometer = SimThermometer::default();
        thermometer.set(Some(42.0));
        let adc = SimAdc::default();
        adc.set(2600);
        Self {
            pin: SimPin::default(),
            thermometer,
            adc,
            cpu: SimCpu::new(160, 240),
            perf_lock: SimPerfLock::new(true),
            watchdog: SimWatchdog::default(),
            power: SimPower::default(),
            card,
            internal: SimInternalFlash::new(true),
            firmware,
        }
    }

    /// Build from a profile; `card_volume` backs the removable card and
    /// `primary_bus_hz` is the rate that sees `card_latency_ms`.
    pub fn from_profile(
        profile: &SimProfile,
        card_volume: impl Volume + Send + 'static,
        image: Vec<u8>,
        primary_bus_hz: u32,
    ) -> Self {
        let mut card = SimCard::new(card_volume)
            .present(profile.card_present)
            .latency(Duration::from_millis(profile.card_latency_ms));
        if let Some(ms) = profile.card_fallback_latency_ms {
            // Any rate other than the primary falls under the default latency.
            card = card
                .latency(Duration::from_millis(ms))
                .latency_at(primary_bus_hz, Duration::from_millis(profile.card_latency_ms));
        }
        let mut firmware = SimFirmware::new(image, profile.partition_size);
        if !profile.rollback_supported {
            firmware = firmware.single_slot();
        }
        let mut board = Self::new(card, firmware);
        board.pin.set_low(profile.safe_mode);
        board.thermometer.set(profile.temperature_c);
        board.adc.set(profile.battery_raw);
        board.cpu = SimCpu::new(profile.boot_mhz, profile.max_cpu_mhz);
        board.perf_lock = SimPerfLock::new(profile.perf_lock_available);
        board.internal = SimInternalFlash::new(profile.internal_flash);
        board
    }

    /// Boxed device bundle sharing state with these handles.
    pub fn board(&self) -> Board {
        Board {
            safe_mode_pin: Box::new(self.pin.clone()),
            temperature: Box::new(self.thermometer.clone()),
            battery: Box::new(self.adc.clone()),
            cpu: Box::new(self.cpu.clone()),
            perf_lock: Box::new(self.perf_lock.clone()),
            watchdog: Box::new(self.watchdog.clone()),
            power: Box::new(self.power.clone()),
            card: Arc::new(Mutex::new(self.card.clone())),
            internal: Box::new(self.internal.clone()),
            flash: Box::new(self.firmware.clone()),
            updater: Box::new(self.firmware.clone()),
            uptime: Box::new(MonotonicUptime::new()),
        }
    }
}
