mod audio;
mod settings;

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use nestor_core::audio::sample_bridge;
use nestor_core::logging::{LogCategory, LogConfig, LogLevel};
use nestor_nes::{rom_hash, Cartridge, Console, Session, SessionPaths, StartKind};

use crate::audio::AudioDevice;
use crate::settings::Settings;

/// Host refresh the paced loop aims for.
const HOST_TICK: Duration = Duration::from_micros(16_667);

/// A wall-clock gap longer than this is treated as a stall, not emulated.
const MAX_STEP_SECONDS: f64 = 1.0;

#[derive(Parser)]
#[command(name = "nestor", about = "Headless NES runner with save states and audio")]
struct Args {
    /// iNES ROM to run
    rom: PathBuf,

    /// Wall-clock seconds to run in real time
    #[arg(long, default_value_t = 30.0, conflicts_with = "frames")]
    seconds: f64,

    /// Run this many frames as fast as possible instead of in real time
    #[arg(long)]
    frames: Option<u64>,

    /// Do not open an audio device
    #[arg(long, default_value_t = false)]
    no_audio: bool,

    /// Ignore the save state and cold boot
    #[arg(long, default_value_t = false)]
    fresh: bool,

    /// Save-state and battery RAM directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Print the first pixels and machine state when the run ends
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Level for every log category: off, error, warn, info, debug, trace
    #[arg(long)]
    log_level: Option<String>,

    /// Per-category level, e.g. `--log ppu=trace` (repeatable)
    #[arg(long = "log", value_name = "CATEGORY=LEVEL")]
    log: Vec<String>,

    /// Settings file; defaults to config.json beside the binary
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Route core log categories through the `log` facade into env_logger.
fn init_logging(args: &Args, settings: &Settings) -> Result<()> {
    let config = LogConfig::global();
    let global = args.log_level.as_deref().unwrap_or(&settings.log_level);
    let global = LogLevel::from_str(global)
        .with_context(|| format!("unknown log level {:?}", global))?;
    config.set_global_level(global);

    let mut overrides: Vec<(&str, &str)> = settings
        .log
        .iter()
        .map(|(category, level)| (category.as_str(), level.as_str()))
        .collect();
    for pair in &args.log {
        let split = pair
            .split_once('=')
            .with_context(|| format!("expected CATEGORY=LEVEL, got {:?}", pair))?;
        overrides.push(split);
    }
    let mut most_verbose = global;
    for (category, level) in overrides {
        let cat = LogCategory::from_str(category)
            .with_context(|| format!("unknown log category {:?}", category))?;
        let lvl = LogLevel::from_str(level)
            .with_context(|| format!("unknown log level {:?}", level))?;
        config.set_level(cat, lvl);
        most_verbose = most_verbose.max(lvl);
    }

    let filter = match most_verbose {
        LogLevel::Off => log::LevelFilter::Off,
        LogLevel::Error => log::LevelFilter::Error,
        LogLevel::Warn => log::LevelFilter::Warn,
        LogLevel::Info => log::LevelFilter::Info,
        LogLevel::Debug => log::LevelFilter::Debug,
        LogLevel::Trace => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(filter.max(log::LevelFilter::Warn))
        .parse_default_env()
        .init();
    Ok(())
}

/// Real-time loop: step by the measured wall-clock delta.
fn run_paced(console: &mut Console, seconds: f64) {
    let start = Instant::now();
    let mut last = start;
    while start.elapsed().as_secs_f64() < seconds {
        thread::sleep(HOST_TICK);
        let now = Instant::now();
        let mut dt = now.duration_since(last).as_secs_f64();
        last = now;
        if dt > MAX_STEP_SECONDS {
            log::warn!("host stalled for {:.2}s, skipping", dt);
            dt = 0.0;
        }
        console.step_seconds(dt);
    }
}

fn print_debug(console: &Console) -> Result<()> {
    let frame = console.current_frame_buffer();
    let dump_len = std::cmp::min(16, frame.pixels.len());
    let pixels: Vec<String> = frame.pixels[..dump_len]
        .iter()
        .map(|p| format!("{:08X}", p))
        .collect();
    println!(
        "Frame {} ({}x{}): {}",
        console.frame_count(),
        frame.width,
        frame.height,
        pixels.join(" ")
    );
    println!("{}", serde_json::to_string_pretty(&console.debug_state())?);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(Settings::config_path);
    let mut settings = Settings::load(&config_path);
    init_logging(&args, &settings)?;

    let rom = fs::read(&args.rom).with_context(|| format!("reading {}", args.rom.display()))?;
    let hash = rom_hash(&rom);
    let cartridge = Cartridge::from_bytes(&rom)?;
    let mut console = Console::new(cartridge)?;
    log::info!(
        "{}: mapper {} ({}), hash {}",
        args.rom.display(),
        console.mapper().id(),
        console.mapper().name(),
        &hash[..12]
    );

    let _device = if settings.audio.enabled && !args.no_audio {
        match AudioDevice::open() {
            Ok(device) => {
                let rate = device.sample_rate();
                let (sink, source) = sample_bridge(settings.audio.queue_capacity(rate));
                if !console.attach_audio(sink, rate) {
                    log::warn!("audio disabled: sample rate {} rejected", rate);
                    None
                } else if let Err(e) = device.play(source) {
                    log::warn!("audio disabled: {:#}", e);
                    console.detach_audio();
                    None
                } else {
                    Some(device)
                }
            }
            Err(e) => {
                log::warn!("audio disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let paths = args
        .data_dir
        .clone()
        .or_else(|| settings.data_dir.clone())
        .map(SessionPaths::new)
        .unwrap_or_else(SessionPaths::beside_executable);
    let mut session = Session::start(console, hash, paths, !args.fresh);
    if session.start_kind() == StartKind::Resumed {
        log::info!("resumed from {}", session.paths().state_path(session.hash()).display());
    }

    let console = session.console_mut();
    for player in 0..2 {
        console.set_controller_buttons(player, settings.held_buttons(player));
    }

    match args.frames {
        Some(frames) => {
            for _ in 0..frames {
                console.step_frame();
            }
        }
        None => run_paced(console, args.seconds),
    }

    if args.debug {
        print_debug(session.console())?;
    }

    let console = session.end().context("saving session")?;
    log::info!("stopped after {} frames", console.frame_count());

    settings.last_rom_path = Some(args.rom.display().to_string());
    if let Err(e) = settings.save(&config_path) {
        log::warn!("could not write {}: {:#}", config_path.display(), e);
    }
    Ok(())
}
