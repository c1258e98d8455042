use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use parseguard::config::{self, Config};
use parseguard::guard::OcrEngine;
use parseguard::hooks::GuardLayer;
use parseguard::logging::{console_subscriber, init_logging};
use parseguard::monitor::{LineFields, format_line};
use parseguard::system::accelerator::NoAccelerator;
use parseguard::system::collector::Collector;
use parseguard::system::reader::{ProbeOptions, SnapshotReader};
use parseguard::system::threads::ThreadCaps;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(
    name = "parseguard",
    about = "Memory guard and resource monitor for visual-parsing inference"
)]
struct Cli {
    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the application and monitor logs
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Take one resource snapshot.
    Snapshot {
        /// Print as JSON instead of a monitor line.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show the guard decision for the current resource state.
    Decide {
        /// Requested OCR engine: paddle, easyocr
        #[arg(long, default_value = "paddle")]
        engine: String,
    },
    /// Run the background monitor in the foreground.
    Monitor {
        /// Stop after this many seconds instead of waiting for Ctrl-C.
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Print the effective configuration.
    Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    // Config warnings must be visible before the file logger exists.
    let config = if matches!(cli.command, Command::Monitor { .. }) {
        let console = console_subscriber("warn", io::stderr)?;
        let config = tracing::subscriber::with_default(console, || load_config_for_cli(&cli));
        init_logging(&config.logging)?;
        config
    } else {
        console_subscriber("warn", io::stderr)?.try_init()?;
        load_config_for_cli(&cli)
    };

    match cli.command {
        Command::Snapshot { json } => {
            // CPU figures need two samples at least this far apart.
            let collector = Collector::new(ProbeOptions::default())?;
            tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
            let snapshot = collector.refresh()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("{}", format_line(&snapshot, LineFields { gpu: true, net: true }));
            }
        }
        Command::Decide { engine } => {
            let requested = OcrEngine::from_str_config(&engine)
                .ok_or_else(|| eyre!("unknown OCR engine {engine:?}; expected paddle or easyocr"))?;
            let reader = SnapshotReader::new(ProbeOptions::request_path())?;
            let snapshot = reader.read()?;
            let decision = parseguard::guard::decide(&config.guard, &config.pipeline, requested, &snapshot);
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Command::Monitor { seconds } => run_monitor(config, seconds).await?,
        Command::Config => print!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}

async fn run_monitor(mut config: Config, seconds: Option<u64>) -> Result<()> {
    config.monitor.enabled = true;

    let mut layer = GuardLayer::on_boot(
        &config,
        ThreadCaps::new(config.threads.cap),
        Arc::new(NoAccelerator),
    )?;

    match seconds {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c().await?,
    }

    layer.on_shutdown().await?;
    Ok(())
}

fn load_config_for_cli(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => config::load_config_from_path(path)
            .with_env_overrides(|key| std::env::var(key).ok())
            .sanitized(),
        None => config::load_config(),
    };

    if let Some(dir) = &cli.log_dir {
        config.logging.dir = dir.clone();
    }

    config
}
