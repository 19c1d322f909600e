mod progress;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use ota_core::session::{OtaSession, SessionConfig};
use ota_core::transport::BtleplugCentral;
use ota_core::{FirmwareImage, OtaError};
use tracing::{error, info, warn};

use progress::ConsoleObserver;

#[derive(Parser, Debug)]
#[command(author, version, about = "BLE OTA Firmware Upgrade Tool", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to a TOML session configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transfer a firmware image to a device
    Upgrade(UpgradeArgs),
    /// Print the OTA service layout of a device
    Inspect {
        /// Advertised device name (prompted if omitted)
        #[arg(long)]
        name: Option<String>,
    },
    /// Write the default configuration to a file
    Config {
        #[arg(long, default_value = "ota.toml")]
        output: PathBuf,
    },
}

#[derive(ClapArgs, Debug)]
struct UpgradeArgs {
    /// Advertised device name (prompted if omitted)
    #[arg(long)]
    name: Option<String>,

    /// Path to the firmware image (application.gbl)
    #[arg(long)]
    image: Option<String>,

    /// Restart application firmware into the OTA loader first
    #[arg(long)]
    reboot_first: bool,

    /// Attempts per write before giving up (0 = forever)
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Pause after each chunk in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Seconds to wait for the device to advertise
    #[arg(long)]
    discovery_timeout: Option<u64>,
}

impl UpgradeArgs {
    fn apply(&self, config: &mut SessionConfig) {
        if let Some(name) = &self.name {
            config.device_name = Some(name.clone());
        }
        if let Some(image) = &self.image {
            config.image_path = Some(image.clone());
        }
        if self.reboot_first {
            config.reboot_first = true;
        }
        if let Some(attempts) = self.max_attempts {
            config.max_write_attempts = attempts;
        }
        if let Some(delay) = self.delay_ms {
            config.inter_chunk_delay_ms = delay;
        }
        if let Some(secs) = self.discovery_timeout {
            config.discovery_timeout_secs = secs;
        }
    }
}

fn prompt_device_name() -> Result<String> {
    print!("Enter device name to connect: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let name = line.trim().to_string();
    if name.is_empty() {
        bail!("No device name given");
    }
    Ok(name)
}

fn load_config(path: Option<&PathBuf>) -> Result<SessionConfig> {
    match path {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(SessionConfig::default()),
    }
}

fn new_session(config: SessionConfig) -> OtaSession<ConsoleObserver> {
    let session = OtaSession::with_observer(config, Arc::new(ConsoleObserver::new()));
    let token = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting upgrade");
            token.cancel();
        }
    });
    session
}

async fn run(args: Args) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Upgrade(upgrade) => {
            upgrade.apply(&mut config);
            config.validate()?;

            let image_path = config
                .image_path
                .clone()
                .context("No firmware image given (use --image or image_path in config)")?;
            let image = FirmwareImage::load(&image_path).map_err(OtaError::from)?;
            info!(path = %image_path, len = image.len(), "Loaded firmware image");

            let name = match config.device_name.clone() {
                Some(name) => name,
                None => prompt_device_name()?,
            };

            let central = BtleplugCentral::open().await.map_err(OtaError::from)?;
            let session = new_session(config);
            let result = session.run(&central, &name, &image).await?;

            println!(
                "Transfer finished: {} bytes in {} chunks to {} ({:.1}s)",
                result.bytes_sent,
                result.chunks,
                result.peer,
                result.elapsed.as_secs_f64()
            );
        }
        Command::Inspect { name } => {
            let name = match name.or_else(|| config.device_name.clone()) {
                Some(name) => name,
                None => prompt_device_name()?,
            };

            let central = BtleplugCentral::open().await.map_err(OtaError::from)?;
            let session = new_session(config);
            let reports = session.inspect(&central, &name).await?;

            if reports.is_empty() {
                println!("{name}: OTA service not exposed");
            }
            for report in reports {
                println!("Service: {}", report.service.uuid);
                for characteristic in report.characteristics {
                    println!(
                        "  Characteristic: {} [{}]",
                        characteristic.uuid, characteristic.properties
                    );
                }
            }
        }
        Command::Config { output } => {
            config.save_to_file(&output)?;
            println!("Wrote {}", output.display());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
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

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args).await {
        error!("Error: {:#}", e);
        let code = e.downcast_ref::<OtaError>().map_or(1, OtaError::exit_code);
        std::process::exit(code);
    }
}
