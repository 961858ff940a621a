//! # Etiqueta CLI
//!
//! Command-line interface for NIIMBOT B1 label printing.
//!
//! ## Usage
//!
//! ```bash
//! # Print a label image (tries BLE, then USB serial, then Bluetooth SPP)
//! etiqueta print label.png
//!
//! # Three copies at maximum density over USB only
//! etiqueta print --copies 3 --density 5 --transports usb label.png
//!
//! # Look for reachable printers without printing
//! etiqueta scan
//!
//! # Run the HTTP print service
//! etiqueta serve --listen 0.0.0.0:8080
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use etiqueta::{
    error::EtiquetaError,
    job::{Orchestrator, PrintJob},
    printer::{PrinterConfig, ProtocolOptions, RasterPolarity},
    protocol::commands::LabelType,
    raster::RasterImage,
    server::{serve, ServerConfig},
    transport::{BleTransport, RfcommTransport, Transport, UsbSerialTransport},
};

/// Vendor token matched against USB serial port descriptors
const USB_VENDOR_TOKEN: &str = "niimbot";

/// Etiqueta - NIIMBOT B1 label printer utility
#[derive(Parser, Debug)]
#[command(name = "etiqueta")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print an image file as a label
    Print {
        /// Path to the image (PNG, JPEG, BMP, ...)
        image: PathBuf,

        /// Number of copies
        #[arg(long, default_value = "1")]
        copies: u16,

        /// Print density, 1-5
        #[arg(long, default_value = "3")]
        density: u8,

        /// Label stock type: gap, black_mark, or continuous
        #[arg(long, default_value = "gap")]
        label_type: String,

        /// Raster polarity: invert (dark pixels print) or direct (light pixels print)
        #[arg(long, default_value = "invert")]
        polarity: String,

        /// Comma-separated transport priority: ble, usb, rfcomm
        #[arg(long, default_value = "ble,usb,rfcomm")]
        transports: String,

        /// Overall job timeout in seconds
        #[arg(long, default_value = "120")]
        timeout: u64,
    },

    /// Scan each transport and report discovered printers
    Scan {
        /// Comma-separated transport priority: ble, usb, rfcomm
        #[arg(long, default_value = "ble,usb,rfcomm")]
        transports: String,

        /// Scan window per transport in seconds
        #[arg(long, default_value = "5")]
        timeout: u64,
    },

    /// Run the HTTP print service
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: String,

        /// Raster polarity: invert (dark pixels print) or direct (light pixels print)
        #[arg(long, default_value = "invert")]
        polarity: String,

        /// Comma-separated transport priority: ble, usb, rfcomm
        #[arg(long, default_value = "ble,usb,rfcomm")]
        transports: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), EtiquetaError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Print {
            image,
            copies,
            density,
            label_type,
            polarity,
            transports,
            timeout,
        } => {
            let polarity = parse_polarity(&polarity)?;
            let job = load_job(&image, copies, density, &label_type, polarity)?;
            let orchestrator = Orchestrator::new(parse_transports(&transports)?)
                .with_options(ProtocolOptions {
                    polarity,
                    ..Default::default()
                })
                .with_timeouts(
                    Duration::from_secs(5),
                    Duration::from_secs(30),
                    Duration::from_secs(timeout),
                );

            let outcome = orchestrator.print(&job).await;
            println!("{}", outcome.summary());
            if !outcome.is_success() {
                std::process::exit(2);
            }
        }

        Commands::Scan {
            transports,
            timeout,
        } => {
            let timeout = Duration::from_secs(timeout);
            for transport in parse_transports(&transports)? {
                println!("Scanning via {}...", transport.kind());
                match transport.discover(timeout).await {
                    Ok(endpoints) if endpoints.is_empty() => println!("  (nothing found)"),
                    Ok(endpoints) => {
                        for endpoint in endpoints {
                            println!("  {}", endpoint);
                        }
                    }
                    Err(e) => println!("  scan failed: {}", e),
                }
            }
        }

        Commands::Serve {
            listen,
            polarity,
            transports,
        } => {
            let polarity = parse_polarity(&polarity)?;
            let orchestrator =
                Orchestrator::new(parse_transports(&transports)?).with_options(ProtocolOptions {
                    polarity,
                    ..Default::default()
                });
            let config = ServerConfig {
                listen_addr: listen,
            };
            serve(config, orchestrator).await?;
        }
    }

    Ok(())
}

/// Decode the image file and assemble a print job.
fn load_job(
    path: &PathBuf,
    copies: u16,
    density: u8,
    label_type: &str,
    polarity: RasterPolarity,
) -> Result<PrintJob, EtiquetaError> {
    if !(1..=5).contains(&density) {
        return Err(EtiquetaError::Encoding(format!(
            "density must be 1-5, got {}",
            density
        )));
    }
    let label_type = parse_label_type(label_type)?;

    let decoded = image::open(path)
        .map_err(|e| EtiquetaError::Image(format!("could not open {}: {}", path.display(), e)))?;
    let raster = RasterImage::from_gray(&decoded.to_luma8(), polarity)?;

    Ok(PrintJob::new(raster, copies)
        .with_density(density)
        .with_label_type(label_type))
}

fn parse_label_type(s: &str) -> Result<LabelType, EtiquetaError> {
    match s.to_lowercase().as_str() {
        "gap" => Ok(LabelType::Gap),
        "black_mark" | "black-mark" => Ok(LabelType::BlackMark),
        "continuous" => Ok(LabelType::Continuous),
        other => Err(EtiquetaError::Encoding(format!(
            "label_type must be gap, black_mark, or continuous, got {:?}",
            other
        ))),
    }
}

fn parse_polarity(s: &str) -> Result<RasterPolarity, EtiquetaError> {
    match s.to_lowercase().as_str() {
        "invert" => Ok(RasterPolarity::InvertThenThreshold),
        "direct" => Ok(RasterPolarity::DirectThreshold),
        other => Err(EtiquetaError::Encoding(format!(
            "polarity must be invert or direct, got {:?}",
            other
        ))),
    }
}

/// Parse a comma-separated transport priority list.
fn parse_transports(list: &str) -> Result<Vec<Box<dyn Transport>>, EtiquetaError> {
    let mut transports: Vec<Box<dyn Transport>> = Vec::new();
    for token in list.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.to_lowercase().as_str() {
            "ble" => transports.push(Box::new(BleTransport::new(PrinterConfig::B1.name_token))),
            "usb" | "serial" => {
                transports.push(Box::new(UsbSerialTransport::new(USB_VENDOR_TOKEN)))
            }
            "rfcomm" | "spp" => transports.push(Box::new(RfcommTransport::new())),
            other => {
                return Err(EtiquetaError::Discovery(format!(
                    "unknown transport {:?}; expected ble, usb, or rfcomm",
                    other
                )))
            }
        }
    }
    if transports.is_empty() {
        return Err(EtiquetaError::Discovery(
            "transport list is empty".to_string(),
        ));
    }
    Ok(transports)
}
