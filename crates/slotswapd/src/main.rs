//! slotswapd — blue-green redeploy daemon for a game server behind a proxy.
//!
//! Resolves the latest server build, caches it, brings up one of two
//! slots, then redeploys onto the standby slot whenever shared plugin
//! jars change.
//!
//! # Usage
//!
//! ```text
//! MC_VERSION=1.20.4 slotswapd run --config /etc/slotswap.toml
//! slotswapd resolve --mc-version 1.20.4
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

use slotswap_core::SwapConfig;

mod daemon;
mod shutdown;

#[derive(Parser)]
#[command(name = "slotswapd", about = "Blue-green game server redeploy daemon", version)]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(clap::Args)]
struct ConfigArgs {
    /// Path to slotswap.toml. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target game version; overrides [server].version.
    #[arg(long, env = "MC_VERSION")]
    mc_version: Option<String>,
}

impl ConfigArgs {
    fn load(self) -> anyhow::Result<SwapConfig> {
        let config = match &self.config {
            Some(path) => SwapConfig::from_file(path)?,
            None => SwapConfig::default(),
        };
        Ok(config.with_version_override(self.mc_version))
    }
}

#[derive(Subcommand)]
enum Command {
    /// Deploy the latest build and redeploy on plugin changes until signalled.
    Run {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Print the latest registry builds without deploying anything.
    Resolve {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Print the effective configuration.
    Config {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,slotswap=debug"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run { config } => daemon::run(config.load()?).await,
        Command::Resolve { config } => {
            let config = config.load()?;
            let builds = daemon::resolve(&config).await?;
            for build in std::iter::once(&builds.server).chain(builds.proxy.as_ref()) {
                println!(
                    "{}\t{}\t#{}\t{}\t{}",
                    build.project,
                    build.version,
                    build.build_number,
                    build.published_at.to_rfc3339(),
                    build.artifact_file_name
                );
            }
            Ok(())
        }
        Command::Config { config } => {
            let config = config.load()?;
            print!("{}", config.to_toml_string().context("rendering config")?);
            Ok(())
        }
    }
}
