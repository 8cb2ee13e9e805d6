// CLASSIFICATION: COMMUNITY
// Filename: verify.rs v1.1
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Firmware integrity verification at boot.
//!
//! The running partition is streamed in fixed blocks through a CRC‑32
//! accumulator and compared with the reference value provisioned on the
//! card as one line of hex text. The watchdog is fed after every block.

use crc32fast::Hasher;
use log::{debug, info};

use crate::config::{BootConfig, IntegrityScope};
use crate::error::{FlashError, VolumeError};
use crate::hal::{FirmwarePartitionDescriptor, FlashReader, Volume, Watchdog};

/// Reference and freshly computed checksum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntegrityRecord {
    pub expected: u32,
    pub computed: u32,
}

impl IntegrityRecord {
    pub fn matches(&self) -> bool {
        self.expected == self.computed
    }
}

/// Contents of the reference hash file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReferenceHash {
    /// No file; verification is skipped.
    Missing,
    Value(u32),
    /// Unparseable file; handled as a mismatch.
    Malformed(String),
}

/// Parse the first line of a reference file: optional `0x`, 1 to 8 hex
/// digits, surrounding whitespace ignored.
pub fn parse_reference(text: &str) -> Option<u32> {
    let line = text.lines().next()?.trim();
    let digits = line
        .strip_prefix("0x")
        .or_else(|| line.strip_prefix("0X"))
        .unwrap_or(line);
    if digits.is_empty() || digits.len() > 8 {
        return None;
    }
    let padded = format!("{digits:0>8}");
    let mut bytes = [0u8; 4];
    hex::decode_to_slice(padded, &mut bytes).ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Read the reference value from `path` on `volume`.
pub fn read_reference<V: Volume + ?Sized>(
    volume: &mut V,
    path: &str,
) -> Result<ReferenceHash, VolumeError> {
    let Some(text) = volume.read_to_string(path)? else {
        return Ok(ReferenceHash::Missing);
    };
    Ok(match parse_reference(&text) {
        Some(value) => ReferenceHash::Value(value),
        None => ReferenceHash::Malformed(text.lines().next().unwrap_or("").to_string()),
    })
}

/// Format a checksum the way the reference file stores it.
pub fn reference_line(crc: u32) -> String {
    format!("{crc:08X}")
}

/// Streams a firmware partition through CRC‑32.
#[derive(Clone, Debug)]
pub struct IntegrityVerifier {
    block_size: usize,
    scope: IntegrityScope,
}

impl IntegrityVerifier {
    pub fn new(block_size: usize, scope: IntegrityScope) -> Self {
        Self {
            block_size: block_size.max(1),
            scope,
        }
    }

    pub fn from_config(cfg: &BootConfig) -> Self {
        Self::new(cfg.integrity_block_size, cfg.integrity_scope)
    }

    /// Number of bytes the scan covers for `partition`.
    pub fn scan_len(&self, partition: &FirmwarePartitionDescriptor) -> u64 {
        match (self.scope, partition.image_len) {
            (IntegrityScope::DeclaredImage, Some(len)) => len.min(partition.size),
            _ => partition.size,
        }
    }

    /// CRC‑32 of the scanned region, feeding `watchdog` after each block.
    pub fn checksum(
        &self,
        flash: &mut dyn FlashReader,
        watchdog: &mut dyn Watchdog,
        partition: &FirmwarePartitionDescriptor,
    ) -> Result<u32, FlashError> {
        let total = self.scan_len(partition);
        let mut hasher = Hasher::new();
        let mut buf = vec![0u8; self.block_size];
        let mut offset = 0u64;
        while offset < total {
            let n = (total - offset).min(self.block_size as u64) as usize;
            flash.read(partition, offset, &mut buf[..n])?;
            hasher.update(&buf[..n]);
            offset += n as u64;
            watchdog.feed();
        }
        debug!("[integrity] scanned {total} bytes in {}-byte blocks", self.block_size);
        Ok(hasher.finalize())
    }

    /// Compute the partition checksum and pair it with `expected`.
    pub fn verify(
        &self,
        flash: &mut dyn FlashReader,
        watchdog: &mut dyn Watchdog,
        partition: &FirmwarePartitionDescriptor,
        expected: u32,
    ) -> Result<IntegrityRecord, FlashError> {
        let computed = self.checksum(flash, watchdog, partition)?;
        let record = IntegrityRecord { expected, computed };
        info!(
            "[integrity] calc {:08X} vs saved {:08X}",
            record.computed, record.expected
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{MemVolume, SimFirmware, SimWatchdog};
    use crate::hal::UpdateManager;

    #[test]
    fn parses_reference_variants() {
        assert_eq!(parse_reference("DEADBEEF\n"), Some(0xDEADBEEF));
        assert_eq!(parse_reference("  0xdeadbeef  \nignored"), Some(0xDEADBEEF));
        assert_eq!(parse_reference("1234"), Some(0x1234));
        assert_eq!(parse_reference(""), None);
        assert_eq!(parse_reference("0x"), None);
        assert_eq!(parse_reference("DEADBEEF0"), None);
        assert_eq!(parse_reference("not-hex!"), None);
    }

    #[test]
    fn reference_file_states() {
        let mut vol = MemVolume::default().with_file("bad.txt", "zzzz\n");
        assert_eq!(read_reference(&mut vol, "hash.txt").unwrap(), ReferenceHash::Missing);
        assert_eq!(
            read_reference(&mut vol, "bad.txt").unwrap(),
            ReferenceHash::Malformed("zzzz".into())
        );
    }

    #[test]
    fn checksum_matches_whole_buffer_crc() {
        let image: Vec<u8> = (0..10_000u32).map(|i| (i * 7) as u8).collect();
        let mut fw = SimFirmware::new(image.clone(), image.len() as u64);
        let desc = fw.running_slot().unwrap();
        let mut wd = SimWatchdog::default();
        let crc = IntegrityVerifier::new(4096, IntegrityScope::FullPartition)
            .checksum(&mut fw, &mut wd, &desc)
            .unwrap();
        assert_eq!(crc, crc32fast::hash(&image));
        // 10_000 bytes in 4 KiB blocks.
        assert_eq!(wd.feeds(), 3);
    }

    #[test]
    fn scope_controls_erased_tail() {
        let image = vec![0xA5u8; 1000];
        let mut fw = SimFirmware::new(image.clone(), 8192);
        let desc = fw.running_slot().unwrap();
        let mut wd = SimWatchdog::default();
        let full = IntegrityVerifier::new(4096, IntegrityScope::FullPartition)
            .checksum(&mut fw, &mut wd, &desc)
            .unwrap();
        let declared = IntegrityVerifier::new(4096, IntegrityScope::DeclaredImage)
            .checksum(&mut fw, &mut wd, &desc)
            .unwrap();
        assert_eq!(declared, crc32fast::hash(&image));
        assert_ne!(full, declared);
    }

    #[test]
    fn verify_is_deterministic() {
        let mut fw = SimFirmware::new(b"cohesix firmware".to_vec(), 4096);
        let desc = fw.running_slot().unwrap();
        let mut wd = SimWatchdog::default();
        let v = IntegrityVerifier::new(512, IntegrityScope::FullPartition);
        let a = v.verify(&mut fw, &mut wd, &desc, 0xDEADBEEF).unwrap();
        let b = v.verify(&mut fw, &mut wd, &desc, 0xDEADBEEF).unwrap();
        assert_eq!(a, b);
        assert!(!a.matches());
    }

    #[test]
    fn single_bit_flip_changes_checksum() {
        let image = vec![0u8; 4096];
        let mut flipped = image.clone();
        flipped[2048] ^= 0x01;
        let v = IntegrityVerifier::new(4096, IntegrityScope::FullPartition);
        let mut wd = SimWatchdog::default();
        let mut a = SimFirmware::new(image, 4096);
        let mut b = SimFirmware::new(flipped, 4096);
        let desc = a.running_slot().unwrap();
        assert_ne!(
            v.checksum(&mut a, &mut wd, &desc).unwrap(),
            v.checksum(&mut b, &mut wd, &desc).unwrap()
        );
    }

    #[test]
    fn reference_line_round_trips() {
        assert_eq!(reference_line(0xBEEF), "0000BEEF");
        assert_eq!(parse_reference(&reference_line(0xBEEF)), Some(0xBEEF));
    }
}
