//! MRZ Preview - Real-time machine readable zone camera preview
//!
//! Feeds camera frames to an MRZ engine one at a time, dropping whatever
//! arrives while the engine is busy, and draws the latest detection over the
//! preview.

mod app;
mod capture;
mod config;
mod engine;
mod errors;
mod mrz;
mod overlay;
mod pipeline;
mod shared;
mod storage;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::{AppReport, MrzApp};
use crate::config::AppConfig;
use crate::engine::bench::{self, BenchConfig};
use crate::engine::replay::{ReplayEngine, DEMO_RESPONSES};
use crate::engine::result::{parse_zones, Zone};
use crate::mrz::MrzDocument;

/// MRZ Preview - real-time MRZ detection pipeline
#[derive(Parser, Debug)]
#[command(name = "mrz-preview")]
#[command(about = "Camera preview pipeline for machine readable zone detection")]
struct Args {
    /// Settings file (defaults to config.toml in the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the capture pipeline against a replay engine
    Live(LiveArgs),
    /// Extract the fields of an MRZ stored one line per row in a text file
    Parse {
        file: PathBuf,
    },
    /// Print the effective settings and the engine init document
    Config,
    /// Measure engine throughput on synthetic frames
    Bench(BenchArgs),
}

#[derive(clap::Args, Debug)]
struct LiveArgs {
    /// Result documents to replay (JSON array or one document per line)
    #[arg(long)]
    responses: Option<PathBuf>,

    /// Stop after this many camera frames
    #[arg(long, default_value = "300")]
    frames: u64,

    /// Override the capture frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Simulated engine latency per frame
    #[arg(long, default_value = "120")]
    latency_ms: u64,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Sensor rotation in degrees (0, 90, 180 or 270)
    #[arg(long)]
    rotation: Option<u32>,

    /// Fail every n-th engine call
    #[arg(long)]
    fail_every: Option<u64>,

    /// Pause the pipeline once this many frames have been seen
    #[arg(long)]
    pause_after: Option<u64>,

    /// How long to stay paused
    #[arg(long, default_value = "500")]
    pause_ms: u64,
}

#[derive(clap::Args, Debug)]
struct BenchArgs {
    /// Result documents to replay; the first one with zones answers positive frames
    #[arg(long)]
    responses: Option<PathBuf>,

    /// Number of engine calls
    #[arg(long, default_value = "100")]
    loops: usize,

    /// Share of frames carrying an MRZ, within [0.0, 1.0]
    #[arg(long, default_value = "0.2")]
    rate: f64,

    /// Simulated engine latency per call
    #[arg(long, default_value = "0")]
    latency_ms: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_or_create_config(args.config.as_deref());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.engine.debug_level.as_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match args.command {
        Command::Live(live) => run_live(&mut config, live),
        Command::Parse { file } => run_parse(&file),
        Command::Config => print_config(&config),
        Command::Bench(bench) => run_bench(&config, bench),
    }
}

/// Load configuration from file, writing the defaults to the user config
/// directory on first run
fn load_or_create_config(explicit: Option<&Path>) -> AppConfig {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match storage::default_config_path() {
            Ok(path) => path,
            Err(e) => {
                eprintln!("No config directory, using defaults: {:#}", e);
                return AppConfig::default();
            }
        },
    };

    if explicit.is_none() && !path.exists() {
        let config = AppConfig::default();
        match config::save_config(&config, &path) {
            Ok(()) => eprintln!("Wrote default configuration to {}", path.display()),
            Err(e) => eprintln!("Could not write {}: {:#}", path.display(), e),
        }
        return config;
    }

    match config::load_config(&path) {
        Ok(config) => {
            eprintln!("Loaded configuration from {}", path.display());
            config
        }
        Err(e) => {
            eprintln!("Ignoring {}: {:#}", path.display(), e);
            AppConfig::default()
        }
    }
}

fn run_live(config: &mut AppConfig, live: LiveArgs) -> Result<()> {
    if let Some(fps) = live.fps {
        config.capture.fps = fps;
    }
    if let Some(width) = live.width {
        config.capture.width = width;
    }
    if let Some(height) = live.height {
        config.capture.height = height;
    }
    if let Some(rotation) = live.rotation {
        config.capture.rotation_degrees = rotation;
    }

    let mut engine = match &live.responses {
        Some(path) => ReplayEngine::from_file(path)?,
        None => ReplayEngine::demo(),
    };
    engine = engine.with_latency(Duration::from_millis(live.latency_ms));
    if let Some(n) = live.fail_every {
        engine = engine.with_failure_every(n);
    }

    info!(frames = live.frames, "Starting live preview");
    let mut app = MrzApp::new(config.clone(), Box::new(engine), Some(live.frames))?;
    app.start()?;

    let fps = u64::from(config.capture.fps.max(1));
    let mut budget = Duration::from_millis(live.frames * 1000 / fps) + Duration::from_secs(5);
    if let Some(after) = live.pause_after {
        let pause = Duration::from_millis(live.pause_ms);
        pause_once(&app, after, pause, budget)?;
        budget += pause;
    }
    if !app.wait_for_camera(budget) {
        warn!("Camera did not finish within {:?}, stopping", budget);
    }

    let report = app.shutdown();
    print_report(&report);
    Ok(())
}

/// Pause once `after` frames have been seen, then resume after `pause`
fn pause_once(app: &MrzApp, after: u64, pause: Duration, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while app.stats().seen < after {
        if Instant::now() >= deadline {
            warn!(after, "Frame count not reached, skipping pause");
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    app.pause();
    let paused_at = app.stats();
    std::thread::sleep(pause);
    let dropped = app
        .stats()
        .dropped_paused
        .saturating_sub(paused_at.dropped_paused);
    app.resume()?;
    info!(
        dropped,
        state = ?app.pipeline_state(),
        "Resumed after {:?}",
        pause
    );
    Ok(())
}

fn print_report(report: &AppReport) {
    let stats = &report.stats;
    println!("Frames delivered:   {}", report.frames_delivered);
    println!("Frames admitted:    {}", stats.admitted);
    println!(
        "Frames dropped:     {} (busy {}, paused {}, stopped {})",
        stats.dropped(),
        stats.dropped_busy,
        stats.dropped_paused,
        stats.dropped_stopped
    );
    println!("Engine calls:       {} ({} failed)", stats.processed, stats.failed);
    println!(
        "Buffers:            {} recycled, {} exhausted",
        report.pool.recycled, report.pool.exhausted
    );
    println!(
        "Overlay refreshes:  {} ({} with a result, {} results drawn, {} zones)",
        report.display.refreshes,
        report.display.ready_refreshes,
        report.display.results_drawn,
        report.display.zones_drawn
    );

    let Some(result) = &report.last_result else {
        println!("No result was published");
        return;
    };
    if !result.has_zones() {
        println!(
            "Last result:        frame {} in {} ms, no MRZ",
            result.frame_id, result.duration_millis
        );
        return;
    }
    println!(
        "Last result:        frame {} in {} ms, {} zone(s)",
        result.frame_id,
        result.duration_millis,
        result.zones.len()
    );
    print_zones(&result.zones);
}

fn print_zones(zones: &[Zone]) {
    for (index, zone) in zones.iter().enumerate() {
        match mrz::parse_zone(zone) {
            Ok(document) => {
                println!("  zone {index}: {}", document.doc_type);
                print_document(&document, "    ");
            }
            Err(e) => println!("  zone {index}: {e}"),
        }
    }
}

/// Fields, holder name and check digit verdicts of one MRZ
fn print_document(document: &MrzDocument, indent: &str) {
    for (name, value) in &document.fields {
        println!("{indent}{name:<22} {value}");
    }
    if let Some(surname) = document.surname() {
        println!(
            "{indent}{:<22} {} {}",
            "holder",
            document.given_names().join(" "),
            surname
        );
    }
    for check in document.check_digits() {
        let verdict = if check.is_ok() { "OK" } else { "NOK" };
        println!(
            "{indent}{:<22} {verdict} (expected {}, found {})",
            format!("check {}", check.name),
            check.expected,
            check.found
        );
    }
    let overall = if document.is_valid() { "OK" } else { "NOK" };
    println!("{indent}{:<22} {overall}", "check digits");
}

fn run_parse(file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let document = mrz::parse_lines(&lines)?;
    println!("Document type: {}", document.doc_type);
    print_document(&document, "");
    Ok(())
}

fn run_bench(config: &AppConfig, args: BenchArgs) -> Result<()> {
    let positive = match &args.responses {
        Some(path) => first_positive(path)?,
        None => DEMO_RESPONSES[1].to_string(),
    };
    let bench_config = BenchConfig {
        loops: args.loops,
        rate: args.rate,
        format: config.capture.pixel_format,
        width: config.capture.width,
        height: config.capture.height,
        rotation: config.capture.rotation()?,
        latency: Duration::from_millis(args.latency_ms),
    };

    let report = bench::run_bench(&positive, &config.engine, &bench_config)?;
    println!(
        "Elapsed time:       {:.3} ms over {} calls ({} positive)",
        report.elapsed.as_secs_f64() * 1000.0,
        report.loops,
        report.positives
    );
    println!("Engine calls:       {}", report.engine_calls);
    println!("Zones decoded:      {}", report.zones_found);
    println!(
        "Estimated rate:     {:.1} fps ({:.3} ms per call)",
        report.estimated_fps(),
        report.millis_per_call()
    );
    if !report.last_positive.is_empty() {
        println!("Last positive result:");
        print_zones(&report.last_positive);
    }
    Ok(())
}

/// First replayable document in `path` that decodes to at least one zone
fn first_positive(path: &Path) -> Result<String> {
    let engine = ReplayEngine::from_file(path)?;
    engine
        .responses()
        .iter()
        .find(|doc| parse_zones(doc).is_ok_and(|zones| !zones.is_empty()))
        .cloned()
        .with_context(|| format!("{} has no document with zones", path.display()))
}

fn print_config(config: &AppConfig) -> Result<()> {
    config.validate()?;
    println!("{}", toml::to_string_pretty(config)?);
    println!("# engine init document");
    println!("{}", config.engine.to_json()?);
    Ok(())
}
