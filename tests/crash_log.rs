// CLASSIFICATION: COMMUNITY
// Filename: crash_log.rs v0.1
// Date Modified: 2026-10-17
// Author: Lukas Bower

use std::fs;
use std::time::Duration;

use cohboot::boot::{BootOutcome, BootSupervisor};
use cohboot::config::BootConfig;
use cohboot::hal::hostfs::DirVolume;
use cohboot::hal::sim::{SimBoard, SimCard, SimFirmware};
use cohboot::hal::Volume;
use cohboot::storage::{CrashLog, CrashLogEntry};
use tempfile::tempdir;

#[test]
fn log_never_exceeds_cap() {
    let dir = tempdir().unwrap();
    let mut volume = DirVolume::new(dir.path()).unwrap();
    let log = CrashLog::new("crash.log", 256);
    let mut wipes = 0;
    let mut last_len = 0;
    for i in 0..500u64 {
        log.append(Some(&mut volume), &CrashLogEntry::new(i * 37, "Integrity Fail"))
            .unwrap();
        let len = volume.file_len("crash.log").unwrap().unwrap();
        assert!(len <= 256, "crash log grew to {len} bytes");
        if len < last_len {
            wipes += 1;
        }
        last_len = len;
    }
    assert!(wipes > 0);
    let text = fs::read_to_string(dir.path().join("crash.log")).unwrap();
    assert!(text.lines().all(|l| l.contains(" | Integrity Fail")));
}

#[test]
fn records_accumulate_across_boots() {
    let dir = tempdir().unwrap();
    let cfg = BootConfig {
        probe_delay_ms: 0,
        ..BootConfig::default()
    };
    for _ in 0..3 {
        let card = SimCard::new(DirVolume::new(dir.path()).unwrap()).latency(Duration::ZERO);
        let sim = SimBoard::new(card, SimFirmware::new(vec![1u8; 32], 4096));
        sim.adc.set(1200);
        let mut sup = BootSupervisor::new(sim.board(), cfg.clone());
        assert!(matches!(sup.run(), BootOutcome::EmergencySleep(_)));
    }
    let text = fs::read_to_string(dir.path().join("crash.log")).unwrap();
    assert_eq!(text.lines().count(), 3);
    assert!(text.lines().all(|l| l.ends_with(" | Battery Low")));
}
