//! CLI Entry Point for fishfinder
//!
//! Provides command-line interface for:
//! - Decoding a single sonar frame given as hex
//! - Creating, inspecting, dumping and resizing ring-log files
//! - Running a logging session against the simulated or serial sensor
//!
//! # Usage
//!
//! ```bash
//! fishfinder decode "53 46 00 00 00 09 0a 32 80 02 1e 31 46 00 00 00 00 7e"
//! fishfinder log create --capacity 5000
//! fishfinder log dump --csv > track.csv
//! fishfinder simulate --seconds 30
//! FISHFINDER_STORAGE__CAPACITY_SAMPLES=500 fishfinder config
//! ```

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use fishfinder::config::{FishfinderConfig, DEFAULT_CONFIG_PATH};
use fishfinder::controller::{ConnectionController, ConnectionState, ControllerEvent};
use fishfinder::export::ExporterRegistry;
use fishfinder::protocol::{decode_with_diagnostics, FRAME_LEN};
use fishfinder::storage::{CircularSampleLog, RingLog};
use fishfinder::transport::{DeviceId, SimulatedTransport, Transport};
use fishfinder::{telemetry, Location, SAMPLE_BYTES};

#[derive(Parser)]
#[command(name = "fishfinder")]
#[command(about = "Sonar fish-finder link and durable sample log", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode one 18-byte frame given as hex
    Decode {
        /// Hex bytes; spaces, commas and a 0x prefix are ignored
        hex: String,
    },

    /// Manage ring-log files
    Log {
        /// Log file (defaults to storage.log_path)
        #[arg(long)]
        path: Option<PathBuf>,

        #[command(subcommand)]
        action: LogAction,
    },

    /// Log from the simulated sensor
    Simulate {
        /// Run time in seconds
        #[arg(long, default_value = "10")]
        seconds: u64,

        #[arg(long, default_value = "47.6062")]
        latitude: f64,

        #[arg(long, default_value = "-122.3321")]
        longitude: f64,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Log from the configured transport until Ctrl+C
    Run {
        /// Device to connect to (defaults to connection.device_id)
        #[arg(long)]
        device: Option<String>,
    },
}

#[derive(Subcommand)]
enum LogAction {
    /// Create a new, empty log
    Create {
        /// Capacity in samples (defaults to storage.capacity_samples)
        #[arg(long)]
        capacity: Option<u32>,
    },
    /// Show header and usage
    Info,
    /// Print the stored samples, oldest first
    Dump {
        /// Only the newest N samples
        #[arg(long)]
        limit: Option<usize>,

        /// Emit CSV instead of one line per sample
        #[arg(long)]
        csv: bool,
    },
    /// Change the capacity, keeping the newest samples
    Resize {
        #[arg(long)]
        capacity: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = FishfinderConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate()?;
    telemetry::init_from_config(&config)?;

    match cli.command {
        Commands::Decode { hex } => decode_frame(&hex),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Log { path, action } => {
            let path = path.unwrap_or_else(|| config.storage.log_path.clone());
            log_command(&path, action, &config)
        }
        Commands::Simulate {
            seconds,
            latitude,
            longitude,
        } => {
            let transport = Arc::new(SimulatedTransport::new(config.connection.simulated_rate_hz));
            let device = DeviceId::new("simulated");
            let start = Location::new(latitude, longitude);
            run_session(transport, device, &config, start, Some(seconds)).await
        }
        Commands::Run { device } => {
            let device = device
                .or_else(|| config.connection.device_id.clone())
                .ok_or_else(|| anyhow!("no device given and connection.device_id is unset"))?;
            let transport = configured_transport(&config)?;
            run_session(
                transport,
                DeviceId::new(device),
                &config,
                Location::default(),
                None,
            )
            .await
        }
    }
}

fn configured_transport(config: &FishfinderConfig) -> Result<Arc<dyn Transport>> {
    match config.connection.transport.as_str() {
        "simulated" => Ok(Arc::new(SimulatedTransport::new(
            config.connection.simulated_rate_hz,
        ))),
        #[cfg(feature = "tokio_serial")]
        "serial" => Ok(Arc::new(fishfinder::transport::serial::SerialTransport::new(
            config.connection.baud_rate,
        ))),
        #[cfg(not(feature = "tokio_serial"))]
        "serial" => bail!("serial transport requires building with --features tokio_serial"),
        other => bail!("unknown transport '{other}'"),
    }
}

fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let digits: String = input
        .replace("0x", "")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    if !digits.is_ascii() {
        bail!("input is not hex");
    }
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte '{}'", &digits[i..i + 2]))
        })
        .collect()
}

fn decode_frame(hex: &str) -> Result<()> {
    let bytes = parse_hex(hex)?;
    if bytes.len() != FRAME_LEN {
        warn!(len = bytes.len(), "Frame is not {FRAME_LEN} bytes");
    }
    let decoded = decode_with_diagnostics(&bytes)?;
    let reading = decoded.reading;

    if reading.is_dry {
        println!("depth:           dry (out of water)");
    } else {
        println!("depth:           {:.3} m", reading.depth_m);
    }
    println!("bottom strength: {}%", reading.bottom_strength_pct);
    println!("fish depth:      {:.3} m", reading.fish_depth_m);
    println!("fish strength:   {}%", reading.fish_strength_pct);
    println!("battery:         {}%", reading.battery_pct);
    println!("temperature:     {:.2} °C", reading.temperature_c);
    if decoded.reserved_nonzero {
        println!("note:            reserved bytes are non-zero");
    }
    Ok(())
}

fn log_command(path: &Path, action: LogAction, config: &FishfinderConfig) -> Result<()> {
    match action {
        LogAction::Create { capacity } => {
            let capacity = capacity.unwrap_or(config.storage.capacity_samples);
            CircularSampleLog::create(path, capacity)?.close()?;
            println!(
                "✅ Created {} for {} samples ({} bytes)",
                path.display(),
                capacity,
                capacity as usize * SAMPLE_BYTES
            );
        }
        LogAction::Info => {
            let ring = RingLog::open(path)?;
            println!("📁 {}", path.display());
            println!("   capacity: {} bytes", ring.capacity_bytes());
            println!("   used:     {} bytes", ring.used_bytes());
            println!("   read at:  {}", ring.read_offset());
            println!("   write at: {}", ring.write_offset());
            let log = CircularSampleLog::from_ring_log(ring)?;
            println!(
                "   samples:  {} / {}",
                log.len(),
                log.capacity_samples()
            );
        }
        LogAction::Dump { limit, csv } => {
            let log = CircularSampleLog::open(path)?;
            let samples = match limit {
                Some(n) => log.snapshot_samples(n)?,
                None => log.snapshot_all()?,
            };
            if csv {
                let exporter = ExporterRegistry::new().create("csv")?;
                std::io::stdout().write_all(&exporter.export(&samples)?)?;
            } else {
                for sample in &samples {
                    println!(
                        "{} {:.6},{:.6} depth={:.2}m bottom={}%",
                        sample.timestamp_ms,
                        sample.latitude,
                        sample.longitude,
                        sample.depth_m,
                        sample.bottom_strength_pct
                    );
                }
            }
        }
        LogAction::Resize { capacity } => {
            let log = CircularSampleLog::open(path)?;
            let before = log.len();
            log.set_capacity_samples(capacity)?;
            println!(
                "✅ Resized {} to {} samples ({} of {} kept)",
                path.display(),
                capacity,
                log.len(),
                before
            );
            log.close()?;
        }
    }
    Ok(())
}

async fn run_session(
    transport: Arc<dyn Transport>,
    device: DeviceId,
    config: &FishfinderConfig,
    start: Location,
    seconds: Option<u64>,
) -> Result<()> {
    let log = Arc::new(CircularSampleLog::open_or_create(
        &config.storage.log_path,
        config.storage.capacity_samples,
    )?);
    log.set_sync_writes(config.storage.sync_writes);

    let handle = ConnectionController::spawn(
        transport,
        Arc::clone(&log),
        config.to_settings(),
        config.operation_timeout(),
    );
    let mut events = handle.subscribe();
    handle.update_location(start).await?;
    handle.connect(device.clone()).await?;
    info!(device = %device, log = %config.storage.log_path.display(), "Session started");

    let deadline = async {
        match seconds {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    };
    tokio::pin!(deadline);

    // The simulated boat drifts north-east so the position filter has work.
    let mut drift = tokio::time::interval(Duration::from_secs(1));
    let mut location = start;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = drift.tick(), if seconds.is_some() => {
                location = Location::new(location.latitude + 0.00002, location.longitude + 0.00002);
                handle.update_location(location).await?;
            }
            event = events.recv() => match event {
                Ok(ControllerEvent::Sample(sample)) => println!(
                    "🐟 depth={:.2}m bottom={}% temp={:.1}°C battery={}%",
                    sample.depth_m,
                    sample.bottom_strength_pct,
                    sample.temperature_c,
                    sample.battery_pct
                ),
                Ok(ControllerEvent::StateChanged(state)) => println!("🔌 {state}"),
                Ok(ControllerEvent::ConnectFailed(reason)) => println!("❌ connect failed: {reason}"),
                Err(RecvError::Lagged(missed)) => warn!(missed, "Event subscriber lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    if handle.state() != ConnectionState::Disconnected {
        if let Err(e) = handle.disconnect().await {
            warn!(error = %e, "Disconnect on exit failed");
        }
        let _ = tokio::time::timeout(
            Duration::from_secs(2),
            handle.wait_for_state(ConnectionState::Disconnected),
        )
        .await;
    }
    let stats = handle.stats().await?;
    handle.shutdown().await?;

    println!();
    println!(
        "📊 decoded={} accepted={} rejected={} dropped={} rate={:.1} Hz",
        stats.decoded, stats.accepted, stats.rejected, stats.dropped_frames, stats.rate_hz
    );
    println!("   {} samples stored in {}", log.len(), config.storage.log_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("53 46 0a").unwrap(), vec![0x53, 0x46, 0x0a]);
        assert_eq!(parse_hex("0x53,0x46").unwrap(), vec![0x53, 0x46]);
        assert!(parse_hex("534").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["fishfinder", "log", "dump", "--csv"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Log {
                action: LogAction::Dump { csv: true, .. },
                ..
            }
        ));
    }
}
