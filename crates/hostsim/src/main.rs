//! gpumc Host Simulator CLI
//!
//! Drives the command ring transport from the host side over in-memory
//! registers: starts the controller half with a sample thermal subsystem,
//! runs a scripted session and reports what came back.

mod session;
mod thermal;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gpumc_cmdq::TransportConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gpumc-hostsim")]
#[command(about = "Host-side simulator for the GPU microcontroller command queue", long_about = None)]
struct Cli {
    /// Path to a TOML transport configuration
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scripted host session and print the responses
    Run {
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,

        /// How many status polling rounds to run
        #[arg(short, long, default_value = "1")]
        rounds: u32,
    },

    /// Print the default configuration as TOML
    DefaultConfig,
}

fn load_config(path: Option<PathBuf>) -> Result<TransportConfig> {
    match path {
        Some(path) => TransportConfig::load(&path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(TransportConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::DefaultConfig => {
            let toml = TransportConfig::default().to_toml_string()?;
            print!("{}", toml);
        }

        Commands::Run { json, rounds } => {
            env_logger::Builder::from_default_env()
                .filter_level(log::LevelFilter::Info)
                .parse_default_env()
                .init();

            let config = load_config(cli.config)?;
            log::info!(
                "Command ring 0x{:x}+0x{:x}, response ring 0x{:x}+0x{:x}",
                config.command_queue.offset,
                config.command_queue.size,
                config.response_queue.offset,
                config.response_queue.size
            );

            let report = session::run(config, rounds)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report.print_text();
            }
        }
    }

    Ok(())
}
