// CLASSIFICATION: COMMUNITY
// Filename: main.rs v2.0
// Date Modified: 2026-10-17
// Author: Lukas Bower

//! `cohboot` host runner: boots a simulated board or computes the reference
//! digest for a firmware image.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;

use cohboot::boot::{BootOutcome, BootSupervisor, IntegrityVerifier};
use cohboot::boot::verify::reference_line;
use cohboot::config::{BootConfig, IntegrityScope};
use cohboot::hal::hostfs::DirVolume;
use cohboot::hal::sim::{SimBoard, SimFirmware, SimProfile, SimWatchdog};
use cohboot::hal::UpdateManager;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the boot sequence on a simulated board.
    Boot {
        /// JSON board profile; defaults describe a healthy board.
        #[arg(long)]
        board: Option<PathBuf>,
        /// Directory standing in for the removable card.
        #[arg(long)]
        volume: PathBuf,
        /// JSON config overriding the built-in defaults.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Application ticks to run after a normal boot.
        #[arg(long, default_value_t = 0)]
        ticks: u32,
    },
    /// Print the reference line for a firmware image.
    Digest {
        image: PathBuf,
        /// Pad with erased flash (0xFF) up to this partition size.
        #[arg(long)]
        partition_size: Option<u64>,
        #[arg(long, default_value_t = 4096)]
        block_size: usize,
    },
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<BootConfig> {
    let mut cfg = match path {
        Some(p) => BootConfig::load(&p).with_context(|| format!("loading {}", p.display()))?,
        None => BootConfig::default(),
    };
    cfg.apply_env()?;
    cfg.validate()?;
    Ok(cfg)
}

fn boot(
    board: Option<PathBuf>,
    volume: PathBuf,
    config: Option<PathBuf>,
    ticks: u32,
) -> anyhow::Result<()> {
    let cfg = load_config(config)?;
    let profile: SimProfile = match board {
        Some(p) => serde_json::from_str(
            &fs::read_to_string(&p).with_context(|| format!("reading {}", p.display()))?,
        )?,
        None => SimProfile::default(),
    };
    let image = match &profile.firmware_image {
        Some(p) => fs::read(p).with_context(|| format!("reading image {}", p.display()))?,
        None => Vec::new(),
    };
    let card = DirVolume::new(&volume)?;
    info!("card volume rooted at {}", card.root().display());
    let sim = SimBoard::from_profile(&profile, card, image, cfg.primary_bus_hz);

    let mut supervisor = BootSupervisor::new(sim.board(), cfg);
    let outcome = supervisor.run();
    let report = supervisor.report();
    let phases: Vec<String> = supervisor.history().iter().map(|p| p.to_string()).collect();
    println!("phases: {}", phases.join(" -> "));
    println!("integrity: {:?}", report.integrity);
    println!("diagnostics: {:?}", report.diagnostics);
    println!("outcome: {outcome:?}");

    match outcome {
        BootOutcome::HangInSafeLoop => supervisor.safe_loop(),
        BootOutcome::Continue => {
            for _ in 0..ticks {
                supervisor.tick();
            }
            info!("ran {ticks} ticks, watchdog feeds {}", sim.watchdog.feeds());
        }
        BootOutcome::Rebooted | BootOutcome::EmergencySleep(_) => {}
    }
    Ok(())
}

fn digest(image: PathBuf, partition_size: Option<u64>, block_size: usize) -> anyhow::Result<()> {
    let bytes = fs::read(&image).with_context(|| format!("reading {}", image.display()))?;
    let size = partition_size.unwrap_or(bytes.len() as u64);
    let mut firmware = SimFirmware::new(bytes, size);
    let slot = firmware
        .running_slot()
        .context("image has no partition descriptor")?;
    let crc = IntegrityVerifier::new(block_size, IntegrityScope::FullPartition).checksum(
        &mut firmware,
        &mut SimWatchdog::default(),
        &slot,
    )?;
    println!("{}", reference_line(crc));
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    match Cli::parse().command {
        Command::Boot {
            board,
            volume,
            config,
            ticks,
        } => boot(board, volume, config, ticks),
        Command::Digest {
            image,
            partition_size,
            block_size,
        } => digest(image, partition_size, block_size),
    }
}
