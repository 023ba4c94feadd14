use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kvmfw_core::{
    CancelToken, EepromDevice, FileEeprom, HidEeprom, ImageResolver, ReqwestFetcher,
    TracingObserver, UpdateConfig, UpdateEvent, UpdateObserver, UpdateSession, WriteStrategy,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "KVM bridge firmware updater", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the firmware base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the latest published firmware
    Check,
    /// Download the latest firmware and write it to the bridge EEPROM
    Flash {
        /// Write into this image file instead of a connected device
        #[arg(long)]
        output: Option<PathBuf>,

        /// Chunking strategy
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,

        /// Read the EEPROM back after writing
        #[arg(long)]
        verify: bool,
    },
    /// Write the default configuration to a file
    InitConfig {
        /// Destination path
        path: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Chunked,
    Delegated,
}

impl From<StrategyArg> for WriteStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Chunked => WriteStrategy::Chunked,
            StrategyArg::Delegated => WriteStrategy::Delegated,
        }
    }
}

/// Logs through tracing and keeps a one-line percentage on stderr.
struct ConsoleObserver;

impl UpdateObserver for ConsoleObserver {
    fn on_event(&self, event: &UpdateEvent) {
        match event {
            UpdateEvent::Progress { percent, .. } => {
                let filled = *percent as usize / 5;
                eprint!("\r[{:<20}] {:>3}%", "#".repeat(filled), percent);
                let _ = std::io::stderr().flush();
            }
            UpdateEvent::Completed { .. } => {
                eprintln!();
                TracingObserver.on_event(event);
            }
            _ => TracingObserver.on_event(event),
        }
    }
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

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<UpdateConfig> {
    let mut config = match &args.config {
        Some(path) => UpdateConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => UpdateConfig::default(),
    };
    if let Some(url) = &args.base_url {
        config.base_url = url.clone();
    }
    Ok(config)
}

fn run(args: Args) -> Result<()> {
    let mut config = load_config(&args)?;

    match args.command {
        Command::Check => {
            config.validate()?;
            let fetcher = ReqwestFetcher::new(config.fetch_timeout())?;
            let resolver = ImageResolver::new(fetcher, config.base_url()?, config.descriptor_name);
            let descriptor = resolver.latest_descriptor(&CancelToken::new())?;
            println!("build:    {}", descriptor.build_id);
            println!("file:     {}", descriptor.filename);
            println!("url:      {}", resolver.image_url(&descriptor)?);
        }
        Command::Flash {
            output,
            strategy,
            verify,
        } => {
            if let Some(strategy) = strategy {
                config.strategy = strategy.into();
            }
            config.verify |= verify;

            match output {
                Some(path) => flash(config, Arc::new(FileEeprom::open(path)?))?,
                None => flash(config, Arc::new(HidEeprom::open()?))?,
            }
        }
        Command::InitConfig { path } => {
            UpdateConfig::default().save_to_file(&path)?;
            info!(path = %path.display(), "Wrote default configuration");
        }
    }

    Ok(())
}

fn flash<D: EepromDevice + 'static>(config: UpdateConfig, device: Arc<D>) -> Result<()> {
    info!(
        base = %config.base_url,
        start = %format!("0x{:04X}", config.start_address),
        chunk = config.chunk_size,
        "Starting firmware update"
    );
    let fetcher = ReqwestFetcher::new(config.fetch_timeout())?;
    let session = UpdateSession::with_observer(config, fetcher, device, ConsoleObserver)?;
    session.run()?;
    Ok(())
}
