use anyhow::{anyhow, Result};
use bisync_core::{Config, LogNotifier, Mapping, SyncEngine, SyncManager, SyncReport, Verb};
use bisync_remote_sftp::SftpConnector;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bisync", version, about = "bisync – mirror local directories to SFTP servers")]
struct Cli {
    /// Path to config file (YAML, or JSON by extension)
    #[arg(short, long, global = true, default_value = "bisync.yaml")]
    config: PathBuf,

    /// More log output (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Make each remote tree match its local tree
    Push(Target),
    /// Make each local tree match its remote tree
    Pull(Target),
    /// Upload local changes as they happen until Ctrl+C
    Watch {
        #[command(flatten)]
        target: Target,
        /// Run a full push once the watcher is armed
        #[arg(long)]
        push_first: bool,
    },
}

#[derive(Args)]
struct Target {
    /// Mapping name; every mapping when omitted
    mapping: Option<String>,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn build_engines(mappings: Vec<Mapping>) -> Result<Vec<SyncEngine>> {
    mappings
        .into_iter()
        .map(|m| -> Result<SyncEngine> {
            let connector = SftpConnector::new(&m.endpoint).map_err(|e| anyhow!("mapping {}: {e}", m.name))?;
            Ok(SyncEngine::new(m, Arc::new(connector))?)
        })
        .collect()
}

/// Log every result; error when any mapping failed.
fn report(verb: &str, results: Vec<(String, bisync_core::Result<SyncReport>)>) -> Result<()> {
    let mut failed = Vec::new();
    for (name, outcome) in results {
        match outcome {
            Ok(r) => info!("{verb} {name}: {r}"),
            Err(e) => {
                error!("{verb} {name} failed: {e}");
                failed.push(name);
            }
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("{verb} failed for {}", failed.join(", ")))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(&cli.config)?;
    let manager = SyncManager::new(Arc::new(LogNotifier));

    match cli.command {
        Command::Push(target) => {
            let engines = build_engines(config.select(target.mapping.as_deref())?)?;
            report("push", manager.run_all(Verb::Push, engines).await)
        }
        Command::Pull(target) => {
            let engines = build_engines(config.select(target.mapping.as_deref())?)?;
            report("pull", manager.run_all(Verb::Pull, engines).await)
        }
        Command::Watch { target, push_first } => {
            let mut manager = manager;
            for engine in build_engines(config.select(target.mapping.as_deref())?)? {
                manager.start_watch(engine, push_first);
            }
            info!("watching... press Ctrl+C to stop");
            tokio::signal::ctrl_c().await?;
            info!("stopping");
            manager.stop_all();
            report("watch", manager.join_all().await)
        }
    }
}
