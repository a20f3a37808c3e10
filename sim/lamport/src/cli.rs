//! Parses the command line arguments and runs the chosen command.
//!
//! Basic usage, running one machine that talks to two others:
//!
//! ```text
//! lamport machine --id 1 --port 5001 --peers "localhost:5002,localhost:5003" --log logs/machine_1.log --duration 60
//! ```
//!
//! Three fully connected machines in one process, then a report on their logs:
//!
//! ```text
//! lamport cluster --machines 3 --base-port 5001 --logs-dir logs --duration 60
//! lamport analyze logs/machine_1.log logs/machine_2.log logs/machine_3.log
//! ```

use crate::{
    analysis::analyze_files,
    cluster::{Cluster, ClusterConfig},
};
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use lamport_core::{parse_peer_list, Machine, MachineConfig, PeerAddress, Shutdown};
use std::{
    fs::{create_dir_all, OpenOptions},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing_subscriber::FmtSubscriber;

/// Stores the different command line arguments.
#[derive(Parser)]
#[command(version, about = "Simulates machines with Lamport clocks exchanging messages")]
struct Cli {
    /// Write JSON diagnostics into this directory instead of printing them.
    #[arg(short, long, global = true)]
    diagnostics: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single machine.
    Machine(MachineArgs),
    /// Run several fully connected machines in this process.
    Cluster(ClusterArgs),
    /// Summarize event logs from a finished run.
    Analyze(AnalyzeArgs),
}

#[derive(Args)]
struct MachineArgs {
    /// Unique id of this machine.
    #[arg(long)]
    id: u64,
    /// TCP port to listen on.
    #[arg(long)]
    port: u16,
    /// Comma-separated list of peer host:port pairs.
    #[arg(long, default_value = "", value_parser = parse_peers)]
    peers: ::std::vec::Vec<PeerAddress>,
    /// Path of the event log.
    #[arg(long, default_value = "machine.log")]
    log: PathBuf,
    /// Seconds to run before stopping.
    #[arg(long, default_value_t = 60)]
    duration: u64,
    /// Seed for the clock rate and tick actions.
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args)]
struct ClusterArgs {
    /// Number of machines.
    #[arg(long, default_value_t = 3)]
    machines: u16,
    /// Port of the first machine; the others follow consecutively.
    #[arg(long, default_value_t = 5001)]
    base_port: u16,
    /// Host the machines use to reach each other.
    #[arg(long, default_value = "localhost")]
    host: String,
    /// Directory for the machine_<id>.log files.
    #[arg(long, default_value = "logs")]
    logs_dir: PathBuf,
    /// Seconds to run before stopping.
    #[arg(long, default_value_t = 60)]
    duration: u64,
    /// Base seed; each machine adds its id.
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Event logs to summarize.
    #[arg(required = true)]
    logs: Vec<PathBuf>,
    /// Where to write the report. Defaults to analysis_summary.md next to the
    /// first log.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

// `peers` is spelled `::std::vec::Vec` so clap takes the whole list as one
// value instead of a repeatable argument.
fn parse_peers(list: &str) -> Result<Vec<PeerAddress>, String> {
    parse_peer_list(list).map_err(|e| e.to_string())
}

/// Parses command line arguments and runs the requested command.
pub async fn run_from_arguments() -> anyhow::Result<()> {
    let cli = Cli::parse();
    initialize_logging(cli.diagnostics.as_deref())?;
    match cli.command {
        Command::Machine(args) => run_machine(args).await,
        Command::Cluster(args) => run_cluster(args).await,
        Command::Analyze(args) => run_analysis(args),
    }
}

async fn run_machine(args: MachineArgs) -> anyhow::Result<()> {
    let shutdown = Shutdown::new();
    let mut config = MachineConfig::new(args.id)
        .port(args.port)
        .peers(args.peers)
        .log_path(args.log)
        .duration(Duration::from_secs(args.duration))
        .shutdown(shutdown.clone());
    if let Some(seed) = args.seed {
        config = config.seed(seed);
    }

    let machine = Machine::bind(config).await?;
    stop_on_ctrl_c(shutdown);
    let summary = machine.run().await?;
    println!(
        "Machine {} ran {} ticks at rate {}, final clock {}",
        summary.machine_id, summary.ticks, summary.clock_rate, summary.final_clock
    );
    Ok(())
}

async fn run_cluster(args: ClusterArgs) -> anyhow::Result<()> {
    if args.machines == 0 {
        bail!("a cluster needs at least one machine");
    }
    let mut config = ClusterConfig::new(args.machines, args.base_port)?
        .host(args.host)
        .logs_dir(args.logs_dir)
        .duration(Duration::from_secs(args.duration));
    if let Some(seed) = args.seed {
        config = config.seed(seed);
    }

    let cluster = Cluster::from_config(&config).await?;
    stop_on_ctrl_c(cluster.get_shutdown());
    for summary in cluster.run().await? {
        println!(
            "Machine {} ran {} ticks at rate {}, final clock {} ({})",
            summary.machine_id,
            summary.ticks,
            summary.clock_rate,
            summary.final_clock,
            config.log_path(summary.machine_id).display()
        );
    }
    Ok(())
}

fn run_analysis(args: AnalyzeArgs) -> anyhow::Result<()> {
    let analysis = analyze_files(&args.logs[..])?;
    let output = match args.output {
        Some(output) => output,
        None => default_report_path(&args.logs[0]),
    };
    std::fs::write(&output, analysis.to_markdown())
        .with_context(|| format!("writing {}", output.display()))?;
    println!("Final drift: {}", analysis.drift);
    println!("Analysis complete. See '{}' for details.", output.display());
    Ok(())
}

fn default_report_path(first_log: &Path) -> PathBuf {
    first_log
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join("analysis_summary.md")
}

fn stop_on_ctrl_c(shutdown: Shutdown) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            shutdown.shut_down();
        }
    });
}

/// Installs the diagnostics subscriber. Only should be called once.
///
/// Without a directory, diagnostics are printed to stderr. With one, they are
/// written as JSON into a timestamped file inside it.
fn initialize_logging(diagnostics: Option<&Path>) -> anyhow::Result<()> {
    match diagnostics {
        Some(dir) => {
            create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
            let file_path = dir.join(format!(
                "debug-{}.log",
                chrono::offset::Local::now().format("%y-%m-%d_%H-%M-%S")
            ));
            let file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(&file_path)
                .with_context(|| format!("opening {}", file_path.display()))?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(tracing::Level::DEBUG)
                .with_writer(Arc::new(file))
                .json()
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(tracing::Level::INFO)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}
