use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use system_stress::report::HostMemory;
use system_stress::system_stress::DISPLAY_TICK;
use system_stress::{clock, Preset, StressConfig, SystemStress};
use tracing::{error, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Saturate every CPU core and a slice of RAM for a fixed duration.
#[derive(Debug, Parser)]
#[command(name = "stress-test", version)]
struct Args {
    /// Starting point for every other option
    #[arg(long, value_enum, default_value_t = Preset::Standard)]
    preset: Preset,

    /// Run time in seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Memory ceiling in GiB
    #[arg(short, long)]
    multiplier: Option<usize>,

    /// Grow and shrink the hashing pool with measured throughput
    #[arg(long)]
    elastic: bool,

    /// Skip the memory bandwidth sampler
    #[arg(long)]
    no_bandwidth: bool,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,

    /// Log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn config(&self) -> StressConfig {
        let mut config = StressConfig::preset(self.preset);
        if let Some(secs) = self.duration {
            config.duration = Duration::from_secs(secs);
        }
        if let Some(multiplier) = self.multiplier {
            config.memory.multiplier = multiplier;
        }
        if self.elastic && config.cpu.elastic.is_none() {
            config.cpu.elastic = Some(Default::default());
        }
        if self.no_bandwidth {
            config.bandwidth = None;
        }
        config
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();

    let config = args.config();
    println!("=== System Stress Test Starting ===");
    println!(
        "Warning: this program will stress your system for {} seconds.",
        config.duration.as_secs()
    );

    let abort = Arc::new(AtomicBool::new(false));
    let handler_abort = Arc::clone(&abort);
    if let Err(err) = ctrlc::set_handler(move || handler_abort.store(true, Ordering::SeqCst)) {
        warn!(%err, "could not install Ctrl+C handler");
    }

    let mut stress = match SystemStress::new(config, clock::global()) {
        Ok(stress) => stress,
        Err(err) => {
            error!(%err, "cannot start stress test");
            return ExitCode::FAILURE;
        }
    };

    let result = stress.run(DISPLAY_TICK, &abort, |metrics| {
        print!("\r{}", metrics);
        let _ = io::stdout().flush();
    });
    println!();

    let code = match result {
        Ok(summary) => {
            let summary = summary.with_host(HostMemory::probe());
            if args.json {
                match serde_json::to_string_pretty(&summary) {
                    Ok(json) => println!("{}", json),
                    Err(err) => error!(%err, "could not encode report"),
                }
            } else {
                println!("\n{}", summary);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "stress test failed");
            ExitCode::FAILURE
        }
    };

    drop(stress);
    clock::cleanup();
    code
}
