use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use awusb_core::{
    CancelToken, CommandCode, CommandHeader, DeviceRegistry, EngineConfig, NusbTransport,
    ParamBlock, Session,
};
use clap::{Parser, Subcommand};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "AW USB firmware download tool (Pure Rust)", long_about = None)]
struct Args {
    /// Engine configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream a file to the device over bulk-out
    Write {
        /// Image to send
        file: PathBuf,
    },
    /// Read from the device over bulk-in
    Read {
        /// Maximum number of bytes to read
        len: usize,
        /// Write the data here instead of printing it as hex
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Send one command buffer in a single transfer
    Send {
        /// Buffer contents
        file: PathBuf,
        /// Command value
        #[arg(long, default_value_t = 0)]
        value: i32,
    },
    /// Receive one command buffer in a single transfer
    Recv {
        /// Number of bytes to request
        len: i32,
        /// Command value
        #[arg(long, default_value_t = 0)]
        value: i32,
        /// Write the data here instead of printing it as hex
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Get or set the session parameter block
    Params {
        #[command(subcommand)]
        action: ParamsAction,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Save to this file instead of printing
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ParamsAction {
    Get,
    Set {
        test_num: u32,
        p1: u32,
        p2: u32,
        p3: u32,
    },
}

fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn emit(data: &[u8], output: Option<PathBuf>) -> Result<()> {
    match output {
        Some(path) => std::fs::write(&path, data)
            .with_context(|| format!("writing {}", path.display())),
        None => {
            println!("{}", hex(data));
            Ok(())
        }
    }
}

fn connect(registry: &DeviceRegistry) -> Result<Session> {
    let transport = NusbTransport::open().context("opening AW USB device")?;
    let id = transport.id().clone();
    registry.attach(id.clone(), Arc::new(transport))?;
    Ok(registry.open(&id)?)
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };

    if let Commands::Config { output } = &args.command {
        match output {
            Some(path) => config.save_to_file(path)?,
            None => print!("{}", toml::to_string_pretty(&config)?),
        }
        return Ok(());
    }

    let registry = DeviceRegistry::new(config);
    let session = connect(&registry)?;
    let cancel = CancelToken::new();

    match args.command {
        Commands::Write { file } => {
            let image =
                std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            info!(path = %file.display(), len = image.len(), "Writing image");
            let written = session.write(&image, &cancel)?;
            if written < image.len() {
                bail!("short write: {written} of {} bytes", image.len());
            }
            info!(written, "Write complete");
        }
        Commands::Read { len, output } => {
            let mut data = vec![0u8; len];
            let n = session.read(&mut data, &cancel)?;
            data.truncate(n);
            info!(read = n, "Read complete");
            emit(&data, output)?;
        }
        Commands::Send { file, value } => {
            let mut buffer =
                std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let length = i32::try_from(buffer.len()).context("command buffer too large")?;
            let mut arg = CommandHeader::new(value, length).to_bytes();
            let sent = session.ioctl(CommandCode::Send.request(), &mut arg, &mut buffer)?;
            info!(sent, "Command sent");
        }
        Commands::Recv { len, value, output } => {
            let mut buffer = vec![0u8; usize::try_from(len).unwrap_or(0)];
            let mut arg = CommandHeader::new(value, len).to_bytes();
            let received = session.ioctl(CommandCode::Receive.request(), &mut arg, &mut buffer)?;
            info!(received, "Command received");
            emit(&buffer, output)?;
        }
        Commands::Params { action } => {
            let mut none = Vec::new();
            match action {
                ParamsAction::Get => {
                    let mut arg = vec![0u8; ParamBlock::SIZE];
                    session.ioctl(CommandCode::GetParameters.request(), &mut arg, &mut none)?;
                    let block = ParamBlock::from_bytes(&arg)?;
                    println!(
                        "test_num={} p1={} p2={} p3={}",
                        block.test_num, block.p1, block.p2, block.p3
                    );
                }
                ParamsAction::Set {
                    test_num,
                    p1,
                    p2,
                    p3,
                } => {
                    let mut arg = ParamBlock::new(test_num, p1, p2, p3).to_bytes();
                    session.ioctl(CommandCode::SetParameters.request(), &mut arg, &mut none)?;
                }
            }
        }
        Commands::Config { .. } => {}
    }

    session.close();
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

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
