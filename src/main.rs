//! Sanchaya daemon
//!
//! Runs the ingest node against the built-in block map, fed by the synthetic
//! rig. Artifacts are logged.
//!
//! # Usage
//!
//! ```bash
//! sanchaya                          # sanchaya.toml if present, else defaults
//! sanchaya --config rig.toml        # explicit config
//! sanchaya --duration 20            # stop after 20 seconds
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;

use sanchaya::config::SanchayaConfig;
use sanchaya::mapping::BlockMap;
use sanchaya::node::Node;
use sanchaya::publish::LogSink;
use sanchaya::sim::{RigConfig, SyntheticRig};

const DEFAULT_CONFIG: &str = "sanchaya.toml";

#[derive(Parser, Debug)]
#[command(name = "sanchaya", version, about = "Multi-rate sensor ingestion for 3D mapping")]
struct Args {
    /// Configuration file (default: sanchaya.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run time in seconds, 0 runs until Ctrl-C
    #[arg(short, long, default_value_t = 0.0, value_parser = parse_seconds)]
    duration: f32,

    /// Synthetic rig tick rate (Hz)
    #[arg(long, default_value_t = 15.0, value_parser = parse_rate)]
    sim_rate: f32,
}

/// Finite, non-negative number of seconds.
fn parse_seconds(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|e| format!("{}", e))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("expected a finite number >= 0, got {}", s));
    }
    Ok(value)
}

/// Finite, positive rate.
fn parse_rate(s: &str) -> Result<f32, String> {
    let value = parse_seconds(s)?;
    if value == 0.0 {
        return Err("rate must be > 0".into());
    }
    Ok(value)
}

fn load_config(args: &Args) -> sanchaya::Result<SanchayaConfig> {
    match &args.config {
        Some(path) => SanchayaConfig::load(path),
        None if Path::new(DEFAULT_CONFIG).exists() => SanchayaConfig::load(DEFAULT_CONFIG),
        None => Ok(SanchayaConfig::default()),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .format(|buf, record| {
        writeln!(
            buf,
            "[{}] {} - {}",
            record.level(),
            record.target(),
            record.args()
        )
    })
    .init();

    log::info!("sanchaya starting");

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    }) {
        log::warn!("Could not install Ctrl-C handler: {}", e);
    }

    match run(config, &args, running) {
        Ok(()) => {
            log::info!("sanchaya shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: SanchayaConfig, args: &Args, running: Arc<AtomicBool>) -> sanchaya::Result<()> {
    let engine = BlockMap::new(&config.map);
    let rig_streams = config
        .streams
        .iter()
        .enumerate()
        .map(|(i, s)| (sanchaya::StreamId(i as u16), s.kind))
        .collect();

    let node = Node::start(config, engine, Arc::new(LogSink))?;

    let rig = SyntheticRig::new(
        RigConfig {
            rate_hz: args.sim_rate,
            ..RigConfig::default()
        },
        rig_streams,
    );
    let sim = rig.spawn(node.delivery_handle(), Arc::clone(&running))?;

    let deadline = (args.duration > 0.0)
        .then(|| Instant::now() + Duration::from_secs_f32(args.duration));
    while running.load(Ordering::Relaxed) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            log::info!("Run time elapsed");
            running.store(false, Ordering::Relaxed);
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }

    if sim.join().is_err() {
        log::error!("Synthetic rig thread panicked");
    }

    let map = node.map();
    let stats = node.shutdown();
    map.with_map(|m| {
        log::info!(
            "  Map: {} blocks, {} voxels, {} geometry frames, {} color frames",
            m.block_count(),
            m.voxel_count(),
            m.frames_integrated(),
            m.color_frames()
        );
    });
    for s in &stats.streams {
        log::info!(
            "  {} ({}): received {}, throttled {}, evicted {}, unpaired {}, rejected {}, \
             integrated {}, unavailable {}, failed {}, still queued {}",
            s.name,
            s.kind,
            s.received,
            s.throttled,
            s.evicted,
            s.unpaired,
            s.rejected,
            s.integrated,
            s.unavailable,
            s.failed,
            s.queued
        );
    }
    log::info!(
        "  Jobs dispatched {}, ticks skipped {}, intake dropped {}",
        stats.jobs_dispatched,
        stats.ticks_skipped,
        stats.intake_dropped
    );
    Ok(())
}
