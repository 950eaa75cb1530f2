//! gpu-telemetry - GPU utilization, memory, temperature and power from whichever
//! vendor SDK is installed, falling back to OS performance counters.
//!
//! Each invocation runs one session: init, one query, shutdown.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;

use gpu_telemetry::backends::vendor_candidates;
use gpu_telemetry::config::TelemetryConfig;
use gpu_telemetry::{logging, wire, GpuVendor, SessionState, StatusCode, Telemetry};

/// GPU telemetry across NVIDIA, AMD and Intel
#[derive(Parser)]
#[command(name = "gpu-telemetry")]
#[command(version)]
#[command(about = "Report GPU utilization, memory, temperature and power")]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the JSON payload for every device (default)
    Snapshot {
        /// Indent the JSON
        #[arg(long, default_value_t = false)]
        pretty: bool,
    },

    /// Print device 0 utilization percent (-1 when unavailable)
    Usage,

    /// Print the number of devices (-1 when unavailable)
    Count,

    /// Show which backend is active and what it reports
    Detect,

    /// Show configuration and library search paths
    Config {
        /// Write the default configuration if no file exists yet
        #[arg(long, default_value_t = false)]
        init: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => TelemetryConfig::config_path()?,
    };
    let config = TelemetryConfig::load_from(&config_path)?;
    logging::init(&config.logging);

    match cli.command.unwrap_or(Commands::Snapshot { pretty: false }) {
        Commands::Snapshot { pretty } => {
            let mut telemetry = start(config);
            let snapshot = telemetry.snapshot();
            let json = if pretty {
                wire::to_json_pretty(&snapshot)?
            } else {
                wire::to_json(&snapshot)?
            };
            println!("{}", json);
        }
        Commands::Usage => {
            let mut telemetry = start(config);
            let usage = telemetry.usage().map_or(-1, i32::from);
            println!("{}", usage);
        }
        Commands::Count => {
            let mut telemetry = start(config);
            let count = telemetry.device_count().map_or(-1, i64::from);
            println!("{}", count);
        }
        Commands::Detect => {
            run_detect(config)?;
        }
        Commands::Config { init } => {
            show_config_info(&config_path, &config, init)?;
        }
    }

    Ok(())
}

fn start(config: TelemetryConfig) -> Telemetry {
    let mut telemetry = Telemetry::new(config);
    telemetry.init();
    telemetry
}

fn run_detect(config: TelemetryConfig) -> Result<()> {
    println!("{}", "GPU Telemetry\n".bright_cyan().bold());

    let mut telemetry = Telemetry::new(config);
    let status = telemetry.init();

    match telemetry.state() {
        SessionState::VendorActive(vendor) => {
            println!(
                "{} {}",
                "Backend:".bright_yellow(),
                format!("{} SDK", vendor).bright_green()
            );
        }
        SessionState::FallbackActive => {
            println!(
                "{} {}",
                "Backend:".bright_yellow(),
                "OS performance counters (no vendor SDK found)".bright_yellow()
            );
        }
        SessionState::Unavailable | SessionState::Uninitialized => {
            let reason = match status {
                StatusCode::SdkInitFailed => "a vendor SDK was found but failed to initialize",
                _ => "no vendor SDK or performance counters found",
            };
            println!(
                "{} {}",
                "Backend:".bright_yellow(),
                format!("unavailable ({})", reason).bright_red()
            );
            bail!("No GPU telemetry available (status {})", status.code());
        }
    }

    let snapshot = telemetry.snapshot();
    if snapshot.is_empty() {
        println!("{}", "No devices reported.".bright_yellow());
        return Ok(());
    }

    for device in &snapshot.devices {
        println!(
            "\n{} {}",
            format!("GPU {}:", device.index).bright_white().bold(),
            device.name.bright_white()
        );
        println!(
            "  {} {}%",
            "Utilization:".bright_cyan(),
            device.gpu_utilization_percent
        );
        println!(
            "  {} {} / {} MB ({}%)",
            "Memory:".bright_cyan(),
            device.memory_used_bytes / (1024 * 1024),
            device.memory_total_bytes / (1024 * 1024),
            device.memory_utilization_percent
        );
        match device.temperature_celsius {
            Some(celsius) => println!("  {} {:.0} C", "Temperature:".bright_cyan(), celsius),
            None => println!("  {} {}", "Temperature:".bright_cyan(), "n/a".bright_black()),
        }
        match device.power_watts {
            Some(watts) => println!("  {} {:.1} W", "Power:".bright_cyan(), watts),
            None => println!("  {} {}", "Power:".bright_cyan(), "n/a".bright_black()),
        }
    }

    Ok(())
}

fn show_config_info(path: &std::path::Path, config: &TelemetryConfig, init: bool) -> Result<()> {
    println!("{}", "GPU Telemetry Configuration\n".bright_cyan().bold());

    println!(
        "{} {}",
        "Config file:".bright_yellow(),
        path.display().to_string().bright_white()
    );
    if path.exists() {
        println!("  {} {}", "Status:".bright_cyan(), "Exists".bright_green());
    } else if init {
        config
            .save_to(path)
            .with_context(|| format!("Could not create {}", path.display()))?;
        println!("  {} {}", "Status:".bright_cyan(), "Created with defaults".bright_green());
    } else {
        println!(
            "  {} {}",
            "Status:".bright_cyan(),
            "Not created yet (using defaults)".bright_yellow()
        );
    }

    let order: Vec<String> = config
        .backends
        .order
        .iter()
        .map(|vendor| vendor.to_string())
        .collect();
    println!("\n{}", "Backends:".bright_white().bold());
    println!("  {} {}", "Order:".bright_cyan(), order.join(" -> ").bright_white());
    println!(
        "  {} {}",
        "Fallback:".bright_cyan(),
        if config.fallback.enabled {
            format!("enabled (warm-up {} ms)", config.fallback.warmup_ms).bright_green()
        } else {
            "disabled".bright_yellow()
        }
    );
    println!(
        "  {} {}",
        "Log level:".bright_cyan(),
        config.logging.level.bright_white()
    );

    println!("\n{}", "Library search paths:".bright_white().bold());
    for vendor in GpuVendor::ALL {
        println!("  {}", vendor.to_string().bright_cyan());
        let candidates = vendor_candidates(vendor, &config.backends);
        if candidates.is_empty() {
            println!("    {}", "(none on this platform)".bright_black());
        }
        for candidate in candidates {
            println!("    {}", candidate.display());
        }
    }

    Ok(())
}
