//! wtmux CLI
//!
//! - `demo`: run a session over an in-memory loopback connection
//! - `config`: inspect and edit the multiplexing configuration

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wtmux_cli::commands::{self, DemoOptions};
use wtmux_cli::output::{format_report, print_info, print_success, print_warning};
use wtmux_core::config;

#[derive(Parser)]
#[command(name = "wtmux")]
#[command(author, version, about = "WebTransport session multiplexing toolkit")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a loopback session and echo data over its streams
    Demo {
        /// Bidirectional streams to open (as many uni streams are opened too)
        #[arg(short, long, default_value_t = 3)]
        streams: usize,
        /// Bytes written on each stream
        #[arg(short, long, default_value_t = 1024)]
        payload_size: usize,
        /// Hold the session request back this long after opening streams
        #[arg(short, long, default_value_t = 0)]
        delay_ms: u64,
        /// Error code to close the session with
        #[arg(long, default_value_t = 0)]
        code: u32,
        /// Message to close the session with
        #[arg(short, long, default_value = "demo finished")]
        message: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Get specific config value
    Get { key: String },
    /// Set config value
    Set { key: String, value: String },
    /// Write a configuration file with the defaults
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Demo {
            streams,
            payload_size,
            delay_ms,
            code,
            message,
        } => {
            let config = commands::load_effective(cli.config.as_ref())?;
            let options = DemoOptions {
                streams,
                payload_size,
                announce_delay: Duration::from_millis(delay_ms),
                close_code: code,
                close_message: message,
            };

            if options.announce_delay >= config.stream_reordering_timeout {
                print_warning(&format!(
                    "Delay of {:?} exceeds the reordering timeout of {:?}, streams get rejected",
                    options.announce_delay, config.stream_reordering_timeout
                ));
            }
            print_info(&format!(
                "Opening {} bidirectional and {} unidirectional streams",
                streams, streams
            ));

            let report = commands::run_demo(config, options).await?;
            println!("{}", format_report(&report));
            if report.delivered() == report.streams.len() {
                print_success("All streams delivered");
            } else {
                print_warning(&format!(
                    "{} of {} streams were not delivered",
                    report.streams.len() - report.delivered(),
                    report.streams.len()
                ));
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                commands::config_show(cli.config.as_ref())?;
            }
            ConfigAction::Get { key } => {
                commands::config_get(cli.config.as_ref(), &key)?;
            }
            ConfigAction::Set { key, value } => {
                commands::config_set(cli.config.as_ref(), &key, &value)?;
            }
            ConfigAction::Init { force } => {
                commands::config_init(cli.config.as_ref(), force)?;
            }
            ConfigAction::Path => {
                let path = cli.config.unwrap_or_else(config::default_config_path);
                println!("{}", path.display());
            }
        },
    }

    Ok(())
}
