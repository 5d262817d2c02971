use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};

use c3hid_core::bootloader::{BootloaderSession, DeviceError, FirmwareImage};
use c3hid_core::checksum::{byte_sum8, fletcher16, fletcher32};
use c3hid_core::config::SessionConfig;
use c3hid_core::events::{ObservableBus, TracingObserver};
use c3hid_core::framer::TransportFramer;
use c3hid_core::report::decode_report_with;
use c3hid_core::transport::{SimConfig, SimulatedDevice};

#[derive(Parser, Debug)]
#[command(author, version, about = "HID-over-I2C touch controller tool", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML session configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Checksum a file
    Checksum {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = ChecksumKind::All)]
        kind: ChecksumKind,
    },
    /// Decode an input report given as hex bytes
    Decode {
        /// e.g. "0700 06 01 05 fb 00"
        hex: Vec<String>,
    },
    /// Print descriptor, system info and bootloader status of a simulated device
    Info {
        #[arg(long, default_value_t = 9)]
        protocol_version: u8,
    },
    /// Program an image into a simulated device
    Simulate {
        /// Image file; a generated 1040-byte image is used if omitted
        #[arg(long)]
        image: Option<PathBuf>,
        /// Target flash address
        #[arg(long, value_parser = parse_u32, default_value = "0x0002D420")]
        address: u32,
        #[arg(long, default_value_t = 9)]
        protocol_version: u8,
        /// Make the device reject the Nth write chunk (1-based)
        #[arg(long)]
        fail_chunk: Option<usize>,
    },
    /// Write the default configuration
    Config {
        #[arg(long, default_value = "c3hid.toml")]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ChecksumKind {
    All,
    Sum8,
    Fletcher16,
    Fletcher32,
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{s}': {e}"))
}

fn parse_hex(parts: &[String]) -> Result<Vec<u8>> {
    let digits: String = parts
        .iter()
        .flat_map(|p| p.chars())
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    if !digits.is_ascii() {
        bail!("non-ASCII input");
    }
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| anyhow!("bad hex byte '{}': {}", &digits[i..i + 2], e))
        })
        .collect()
}

fn load_config(path: Option<&PathBuf>) -> Result<SessionConfig> {
    match path {
        Some(p) => SessionConfig::load_from_file(p)
            .with_context(|| format!("loading config {}", p.display())),
        None => Ok(SessionConfig::default()),
    }
}

fn sim_device(config: &SessionConfig, protocol_version: u8) -> SimulatedDevice {
    SimulatedDevice::new(SimConfig {
        address: config.device_address,
        protocol_version,
        ..SimConfig::default()
    })
}

fn demo_image() -> Vec<u8> {
    let mut data: Vec<u8> = (0..1040u32).map(|i| (i % 251) as u8).collect();
    data[0..4].copy_from_slice(&0x0000_2000u32.to_le_bytes());
    data
}

fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_ref())?;

    match args.command {
        Commands::Checksum { file, kind } => {
            let data = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            info!(path = %file.display(), len = data.len(), "Checksumming");
            if matches!(kind, ChecksumKind::All | ChecksumKind::Sum8) {
                println!("sum8       0x{:02X}", byte_sum8(&data));
            }
            if matches!(kind, ChecksumKind::All | ChecksumKind::Fletcher16) {
                println!("fletcher16 0x{:04X}", fletcher16(&data));
            }
            if matches!(kind, ChecksumKind::All | ChecksumKind::Fletcher32) {
                println!("fletcher32 0x{:08X}", fletcher32(&data));
            }
        }
        Commands::Decode { hex } => {
            let packet = parse_hex(&hex)?;
            let report = decode_report_with(&packet, config.absolute_layout);
            println!("{report:#?}");
            if report.is_unknown() {
                warn!(id = report.report_id, len = report.length, "Unrecognized report");
            }
        }
        Commands::Info { protocol_version } => {
            let device = sim_device(&config, protocol_version);
            let mut framer = TransportFramer::new(device, config.device_address)
                .with_max_report_len(config.max_report_len)
                .with_absolute_layout(config.absolute_layout);
            let desc = framer.hid_descriptor()?;
            println!(
                "HID descriptor: VID {:04X} PID {:04X} version {:04X}",
                desc.vendor_id, desc.product_id, desc.version_id
            );
            let sys = framer.read_system_info()?;
            println!("System info: {sys:?}");
            println!("Byte order: {:?}", framer.endianness()?);

            let mut session = BootloaderSession::new(framer, config.bootloader);
            let status = session.get_status()?;
            println!(
                "Bootloader: mode {} version {} flags 0x{:02X} last error {}",
                status.mode, status.version, status.flags, status.last_error
            );
        }
        Commands::Simulate {
            image,
            address,
            protocol_version,
            fail_chunk,
        } => {
            let data = match &image {
                Some(p) => std::fs::read(p).with_context(|| format!("reading {}", p.display()))?,
                None => demo_image(),
            };
            let image = FirmwareImage::with_entry_offset(data, address, config.bootloader.entry_point_offset)?;
            info!(
                len = image.len(),
                entry = %format!("0x{:08X}", image.entry_point()),
                "Loaded image"
            );

            let device = sim_device(&config, protocol_version);
            if let Some(n) = fail_chunk {
                device.fail_write_chunk(n, DeviceError::ChecksumMismatch);
            }
            let observer = Arc::new(TracingObserver);
            let bus = ObservableBus::new(device, observer.clone());
            let framer = TransportFramer::new(bus, config.device_address);
            let mut session = BootloaderSession::with_observer(framer, config.bootloader, observer);

            match session.program(&image) {
                Ok(report) => {
                    info!(chunks = report.chunks, bytes = report.bytes, "Programmed");
                    println!("Steps: {:?}", report.steps);
                }
                Err(e) => {
                    println!("Steps: {:?}", e.steps);
                    if e.reformatted {
                        warn!("Image was re-formatted after the failure");
                    }
                    return Err(e.into());
                }
            }
        }
        Commands::Config { output } => {
            config.save_to_file(&output)?;
            info!(path = %output.display(), "Wrote configuration");
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
    }

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
