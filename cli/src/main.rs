//! Censor CLI
//!
//! Drives the flow classification engine offline.
//!
//! # Usage
//!
//! ```bash
//! censor replay --config censor.toml --trace capture.jsonl --decision-log decisions.jsonl
//! censor check-config --config censor.toml
//! censor classify --payload 16030100 --dst-port 8388
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod output;
mod trace;

#[derive(Parser)]
#[command(name = "censor")]
#[command(version)]
#[command(about = "Flow classification engine", long_about = None)]
struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "text")]
    format: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a recorded packet trace through the engine
    Replay {
        /// Engine configuration (TOML)
        #[arg(long, short, env = "CENSOR_CONFIG")]
        config: PathBuf,
        /// Packet trace, one JSON record per line
        #[arg(long, short)]
        trace: PathBuf,
        /// Write one JSON decision per packet here
        #[arg(long)]
        decision_log: Option<PathBuf>,
    },
    /// Load and validate a configuration
    CheckConfig {
        /// Engine configuration (TOML)
        #[arg(long, short, env = "CENSOR_CONFIG")]
        config: PathBuf,
    },
    /// Run the heuristic detector on one payload
    Classify {
        /// Payload bytes as hex
        #[arg(long)]
        payload: String,
        /// Source port
        #[arg(long, default_value_t = 40000)]
        src_port: u16,
        /// Destination port
        #[arg(long, default_value_t = 8388)]
        dst_port: u16,
        /// Take band and exempt ports from this configuration
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Replay {
            config,
            trace,
            decision_log,
        } => commands::replay::handle(&config, &trace, decision_log.as_deref(), cli.format),
        Commands::CheckConfig { config } => commands::check::handle(&config, cli.format),
        Commands::Classify {
            payload,
            src_port,
            dst_port,
            config,
        } => commands::classify::handle(&payload, src_port, dst_port, config.as_deref(), cli.format),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
