use anyhow::Result;
use awusb_core::EngineConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Development tasks for awusb", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workspace
    Build,
    /// Run the core crate's unit tests
    Test,
    /// Run the CLI, forwarding the remaining arguments
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Write a default engine configuration file
    InitConfig {
        #[arg(default_value = "awusb.toml")]
        path: PathBuf,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{what} failed");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building workspace...");
            cargo(&["build", "--workspace"], "Build")?;
        }
        Commands::Test => {
            println!("Testing awusb-core...");
            cargo(&["test", "-p", "awusb-core"], "Tests")?;
        }
        Commands::Run { args } => {
            let mut full = vec!["run", "-p", "awusb-cli", "--"];
            full.extend(args.iter().map(String::as_str));
            cargo(&full, "Run")?;
        }
        Commands::InitConfig { path } => {
            EngineConfig::default().save_to_file(path)?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}
