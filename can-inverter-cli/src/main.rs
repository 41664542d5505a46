//! CAN Inverter Monitor CLI Application
//!
//! Command-line front end for the can-inverter-core library:
//! - Live monitoring from the simulator, a candump stream on stdin or a replayed trace
//! - Trace replay with adjustable speed and looping
//! - Offline decoding of traces to JSON lines or CSV
//! - Recording simulated traffic as a candump trace

use anyhow::Result;
use can_inverter_core::TransportKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod csv_log;
mod status;

use config::{AppConfig, Overrides};

/// CAN Inverter Monitor - Watch, replay and record dual-inverter CAN traffic
#[derive(Parser, Debug)]
#[command(name = "can-inverter")]
#[command(about = "Monitor, replay and record dual-inverter CAN traffic", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode live traffic and report both inverters
    Monitor {
        /// Use the built-in simulator (default)
        #[arg(long, conflicts_with_all = ["stdin", "trace"])]
        simulate: bool,

        /// Read a candump stream from standard input
        #[arg(long, conflicts_with = "trace")]
        stdin: bool,

        /// Replay a candump trace into the monitor
        #[arg(long, value_name = "FILE")]
        trace: Option<PathBuf>,

        /// CAN channel index
        #[arg(long, value_name = "N")]
        channel: Option<u8>,

        /// Samples kept per inverter
        #[arg(long, value_name = "N")]
        buffer_size: Option<usize>,

        /// Log one row per snapshot to this CSV file
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(long, value_name = "SECONDS")]
        duration: Option<f64>,

        /// Replay speed factor (with --trace)
        #[arg(long, value_name = "FACTOR")]
        speed: Option<f64>,

        /// Restart the trace when it ends (with --trace)
        #[arg(long = "loop")]
        loop_playback: bool,
    },

    /// Replay a candump trace with its original timing
    Replay {
        /// Trace file to replay
        #[arg(value_name = "FILE")]
        trace: PathBuf,

        /// CAN channel index written into the output
        #[arg(long, value_name = "N")]
        channel: Option<u8>,

        /// Speed factor (2.0 = twice as fast)
        #[arg(long, value_name = "FACTOR")]
        speed: Option<f64>,

        /// Restart from the first frame after the last one
        #[arg(long = "loop")]
        loop_playback: bool,

        /// Output file for replayed frames (default: stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Decode a trace without timing
    Decode {
        /// Trace file to decode
        #[arg(value_name = "FILE")]
        trace: PathBuf,

        /// Write carry-forward samples to CSV instead of JSON lines on stdout
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,
    },

    /// Record simulated traffic as a candump trace
    Simulate {
        /// Length of the recording in seconds
        #[arg(long, value_name = "SECONDS")]
        duration: f64,

        /// Output trace file
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// CAN channel index written into the trace
        #[arg(long, value_name = "N")]
        channel: Option<u8>,
    },
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("CAN Inverter Monitor v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using core library v{}", can_inverter_core::VERSION);

    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    match args.command {
        Command::Monitor {
            simulate,
            stdin,
            trace,
            channel,
            buffer_size,
            csv,
            duration,
            speed,
            loop_playback,
        } => {
            if simulate {
                config.monitor.transport = TransportKind::Simulated;
            } else if stdin {
                config.monitor.transport = TransportKind::Stdin;
            } else if trace.is_some() {
                config.monitor.transport = TransportKind::Trace;
            }
            config.apply(&Overrides {
                channel,
                buffer_size,
                csv,
                speed,
                loop_playback,
            });
            config.validate()?;
            commands::monitor(&config, trace.as_deref(), duration)
        }
        Command::Replay {
            trace,
            channel,
            speed,
            loop_playback,
            output,
        } => {
            config.apply(&Overrides {
                channel,
                speed,
                loop_playback,
                ..Overrides::default()
            });
            config.validate()?;
            commands::replay(&config, &trace, output.as_ref())
        }
        Command::Decode { trace, csv } => {
            config.apply(&Overrides {
                csv,
                ..Overrides::default()
            });
            config.validate()?;
            commands::decode(&config, &trace)
        }
        Command::Simulate {
            duration,
            output,
            channel,
        } => {
            config.apply(&Overrides {
                channel,
                ..Overrides::default()
            });
            config.validate()?;
            commands::simulate(&config, duration, &output)
        }
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
