//! `Mailsift` - SMTP content filter
//!
//! Sits between two MTA stages, tags spam with a naive Bayes classifier and
//! relays every message to the next hop.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod commands;
mod framed;
mod listener;
mod reload;
mod session;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mailsift_core::Config;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Configuration file read when `--config` is not given.
const DEFAULT_CONFIG_PATH: &str = "/etc/mailsift/mailsift.toml";

/// Crates whose log level follows the configuration.
const LOG_TARGETS: [&str; 4] = ["mailsift", "mailsift_core", "mailsift_smtp", "mailsift_mime"];

/// SMTP content filter that tags spam and relays mail to the next hop
#[derive(Parser, Debug)]
#[command(name = "mailsift")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Inbound address (`host:port` or unix socket path)
    #[arg(long)]
    listen: Option<String>,

    /// Next-hop address (`host[:port]` or unix socket path)
    #[arg(long)]
    next_hop: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the content filter (default)
    Serve,
    /// Train the classifier from stored messages and save it
    Learn {
        /// Messages to learn as spam
        #[arg(long, num_args = 1..)]
        spam: Vec<PathBuf>,

        /// Messages to learn as ham
        #[arg(long, num_args = 1..)]
        ham: Vec<PathBuf>,
    },
    /// Print the predicted label of a stored message
    Classify {
        /// Message file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, defaulted) = load_config(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if let Some(next_hop) = cli.next_hop {
        config.server.next_hop = next_hop;
    }
    config.validate().context("invalid configuration")?;

    init_logging(&config.log.level);
    if defaulted {
        info!(path = %cli.config.display(), "no configuration file, using defaults");
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => commands::serve(config).await,
        Commands::Learn { spam, ham } => commands::learn(config, spam, ham).await,
        Commands::Classify { file } => commands::classify(config, &file).await,
    }
}

/// Loads the configuration. A missing file at the default path yields the
/// defaults; the flag tells whether that happened.
fn load_config(path: &Path) -> Result<(Config, bool)> {
    match Config::load(path) {
        Ok(config) => Ok((config, false)),
        Err(mailsift_core::Error::Io(err))
            if err.kind() == io::ErrorKind::NotFound && path == Path::new(DEFAULT_CONFIG_PATH) =>
        {
            Ok((Config::default(), true))
        }
        Err(err) => Err(err).with_context(|| format!("failed to load {}", path.display())),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        LOG_TARGETS
            .iter()
            .map(|target| format!("{target}={level}"))
            .collect::<Vec<_>>()
            .join(",")
            .into()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}
