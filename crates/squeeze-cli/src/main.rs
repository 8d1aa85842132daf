//! memsqueeze CLI: apply controlled, observable memory pressure to this machine.
//!
//! ```bash
//! memsqueeze status
//! memsqueeze run --yes --block-size 10M --rate 500 --floor 256M
//! memsqueeze settings > squeeze.yaml && memsqueeze run --yes --settings squeeze.yaml
//! ```

mod signals;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use nix::sys::signal::Signal;
use squeeze_core::config::{
    parse_size, FillPattern, Settings, SqueezeConfig, DEFAULT_PARALLEL_WORKERS,
};
use squeeze_core::event::{EngineEvent, RunSummary, Termination};
use squeeze_core::telemetry::MemoryTelemetry;
use squeeze_exec::sink::RecvTimeoutError;
use squeeze_exec::{Engine, EventChannel};
use squeeze_mem::ProcMeminfo;
use tracing_subscriber::EnvFilter;

const MIB: u64 = 1024 * 1024;

/// Below this much available memory the run still starts, but loudly.
const LOW_MEMORY_WARNING_BYTES: u64 = 2 * 1024 * MIB;

const POLL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(
    name = "memsqueeze",
    about = "Controlled memory pressure with a safety floor and emergency release",
    version
)]
struct Cli {
    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Allocate memory until the ceiling, the safety floor, or a signal stops the run
    Run(RunArgs),

    /// Print total and available memory
    Status,

    /// Print the default settings document as YAML
    Settings,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// YAML settings file (see `memsqueeze settings`)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Block size, e.g. "10M"
    #[arg(long, value_parser = size_arg)]
    block_size: Option<u64>,

    /// Allocations per second
    #[arg(long)]
    rate: Option<u32>,

    /// Percent of available memory to leave untouched
    #[arg(long)]
    reserve: Option<f64>,

    /// Stop when available memory drops below this, e.g. "256M"
    #[arg(long, value_parser = size_arg)]
    floor: Option<u64>,

    /// Run N parallel workers (0 = single worker)
    #[arg(long, num_args = 0..=1, default_missing_value = "4")]
    workers: Option<u32>,

    /// Block contents: zero or random
    #[arg(long)]
    fill: Option<FillPattern>,

    /// Hard cap on bytes held by the run, e.g. "1G"
    #[arg(long, value_parser = size_arg)]
    max_bytes: Option<u64>,

    /// Keep the memory after the run completes until interrupted (single-worker runs)
    #[arg(long)]
    hold: bool,

    /// Confirm that this machine may be pushed close to out-of-memory
    #[arg(short, long)]
    yes: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

fn size_arg(s: &str) -> Result<u64, String> {
    parse_size(s).map_err(|e| e.to_string())
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run(args) => run_squeeze(&args),
        Commands::Status => print_status(),
        Commands::Settings => print_settings(),
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    // RUST_LOG wins over -v.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Defaults, then environment, then the settings file, then flags.
fn build_config(args: &RunArgs) -> Result<SqueezeConfig, Box<dyn std::error::Error>> {
    let mut cfg = SqueezeConfig::from_env();
    if let Some(path) = &args.settings {
        let doc = fs::read_to_string(path)
            .map_err(|e| format!("reading settings file {}: {e}", path.display()))?;
        cfg = Settings::from_yaml(&doc)?.apply(cfg);
    }
    apply_flags(&mut cfg, args);
    cfg.validate()?;
    Ok(cfg)
}

fn apply_flags(cfg: &mut SqueezeConfig, args: &RunArgs) {
    if let Some(v) = args.block_size {
        cfg.block_size_bytes = v;
    }
    if let Some(v) = args.rate {
        cfg.rate_per_second = v;
    }
    if let Some(v) = args.reserve {
        cfg.reserve_percent = v;
    }
    if let Some(v) = args.floor {
        cfg.safety_floor_bytes = v;
    }
    if let Some(v) = args.workers {
        cfg.parallel_workers = (v > 0).then_some(v);
    }
    if let Some(v) = args.fill {
        cfg.fill = v;
    }
    if let Some(v) = args.max_bytes {
        cfg.max_store_bytes = Some(v);
    }
}

fn run_squeeze(args: &RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    if !args.yes {
        return Err("refusing to start without --yes: this run deliberately pushes the \
                    machine towards memory exhaustion"
            .into());
    }
    let config = build_config(args)?;

    let meminfo = ProcMeminfo::probe()?;
    let info = meminfo.info()?;
    if info.available_bytes < LOW_MEMORY_WARNING_BYTES {
        tracing::warn!(available_mb = info.available_mb(), "low available memory before start");
        eprintln!(
            "warning: only {} MB available; the system may become unresponsive",
            info.available_mb()
        );
    }

    signals::install()?;
    let telemetry: Arc<dyn MemoryTelemetry> = Arc::new(meminfo);
    let (sink, events) = EventChannel::with_default_backlog();
    let engine = Engine::new(sink.clone(), telemetry);
    engine.start(config)?;

    if let Some(ceiling) = engine.target_ceiling_bytes() {
        eprintln!(
            "squeezing up to {} MB (available {} MB); Ctrl-C stops, Ctrl-C again releases",
            ceiling / MIB,
            info.available_mb()
        );
    }

    let mut interrupts = 0u32;
    let summary = loop {
        handle_signal(&engine, &mut interrupts);
        match events.recv_timeout(POLL) {
            Ok(EngineEvent::Progress(p)) => {
                if !args.json {
                    println!(
                        "{:>3}%  allocated {} MB  available {} MB",
                        p.percent,
                        p.allocated_bytes / MIB,
                        p.available_bytes / MIB
                    );
                }
            }
            Ok(EngineEvent::Alert(alert)) => eprintln!("alert: {alert}"),
            Ok(EngineEvent::Completed(summary)) => break summary,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err("event channel closed before the run completed".into())
            }
        }
    };

    // Waits for the driver; the summary is already known.
    let _ = engine.join();
    tracing::debug!(dropped = sink.dropped_progress(), "progress samples dropped");

    if args.hold
        && summary.termination != Termination::EmergencyStop
        && engine.allocated_bytes() > 0
    {
        eprintln!(
            "holding {} MB; Ctrl-C to release",
            engine.allocated_bytes() / MIB
        );
        while signals::poll().is_none() {
            std::thread::sleep(POLL);
        }
        engine.emergency_stop();
    }

    report(&summary, args.json)?;
    match summary.termination {
        Termination::Failed => Err("run failed".into()),
        _ => Ok(()),
    }
}

/// First SIGINT stops gracefully; a second SIGINT or any SIGTERM releases everything.
fn handle_signal(engine: &Engine, interrupts: &mut u32) {
    match signals::poll() {
        Some(Signal::SIGINT) if *interrupts == 0 => {
            *interrupts += 1;
            eprintln!("stopping; press Ctrl-C again to release memory immediately");
            engine.graceful_stop();
        }
        Some(Signal::SIGINT) | Some(Signal::SIGTERM) => {
            *interrupts += 1;
            eprintln!("emergency stop: releasing memory");
            engine.emergency_stop();
        }
        _ => {}
    }
}

fn report(summary: &RunSummary, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    println!();
    println!("Run {}", summary.run_id);
    println!("  Termination:  {:?}", summary.termination);
    println!(
        "  Allocated:    {} MB of {} MB target",
        summary.allocated_bytes / MIB,
        summary.target_ceiling_bytes / MIB
    );
    println!("  Blocks:       {}", summary.blocks);
    println!("  Peak:         {} MB", summary.peak_bytes / MIB);
    println!("  Elapsed:      {:.2} s", summary.elapsed_ms as f64 / 1000.0);
    Ok(())
}

fn print_status() -> Result<(), Box<dyn std::error::Error>> {
    let info = ProcMeminfo::probe()?.info()?;
    let cfg = SqueezeConfig::from_env();

    println!("Memory");
    println!("  Total:        {} MB", info.total_mb());
    println!("  Available:    {} MB", info.available_mb());
    println!(
        "  Used:         {} MB ({:.1}%)",
        info.used_bytes() / MIB,
        info.utilisation() * 100.0
    );
    println!();
    println!("With current settings");
    println!(
        "  Ceiling:      {} MB",
        cfg.target_ceiling(info.available_bytes) / MIB
    );
    println!("  Safety floor: {} MB", cfg.safety_floor_bytes / MIB);
    if info.available_bytes < LOW_MEMORY_WARNING_BYTES {
        println!("  WARNING: less than 2 GB available");
    }
    Ok(())
}

fn print_settings() -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", Settings::shipped().to_yaml()?);
    Ok(())
}
