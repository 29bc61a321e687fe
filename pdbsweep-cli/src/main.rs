//! pdbsweep CLI: launch GVP/HGVP training sweeps one run at a time.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// pdbsweep: sequential launcher for protein–ligand affinity training sweeps
#[derive(Parser, Debug)]
#[command(name = "pdbsweep", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (trainer working directory, holds .pdbsweep/)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Extra config file, layered over .pdbsweep/config.toml
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options that change which runs a sweep contains.
#[derive(clap::Args, Debug, Clone, Default)]
struct SweepArgs {
    /// Sweep file to use instead of the built-in nine-run sweep
    #[arg(long)]
    sweep: Option<PathBuf>,

    /// GPUs per run (built-in sweep)
    #[arg(long)]
    devices: Option<u32>,

    /// PDBBind data directory (built-in sweep)
    #[arg(long)]
    pdbbind_data: Option<PathBuf>,

    /// Trainer script, relative to the workspace
    #[arg(long)]
    trainer_script: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the sweep, one trainer invocation after another
    Run {
        #[command(flatten)]
        sweep: SweepArgs,

        /// Run only these 1-based run numbers (repeatable)
        #[arg(long = "only", value_name = "N")]
        only: Vec<usize>,

        /// Print the command lines without launching anything
        #[arg(long)]
        dry_run: bool,

        /// Stop at the first run that does not succeed
        #[arg(long)]
        fail_fast: bool,

        /// Kill a run after this many seconds
        #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,

        /// Launch even if preflight checks report errors
        #[arg(long)]
        force: bool,
    },
    /// List the runs of the sweep with their command lines
    List {
        #[command(flatten)]
        sweep: SweepArgs,
    },
    /// Show one run's full configuration
    Show {
        /// 1-based run number
        index: usize,

        #[command(flatten)]
        sweep: SweepArgs,
    },
    /// Check every run for flag combinations the trainer rejects
    Check {
        #[command(flatten)]
        sweep: SweepArgs,
    },
    /// Show runs recorded in the ledger
    History {
        /// Number of most recent runs to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Only runs of this configuration (fingerprint or a prefix of it)
        #[arg(long, value_name = "HEX")]
        fingerprint: Option<String>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default .pdbsweep/config.toml into the workspace
    Init,
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON run log next to the user's other pdbsweep data
    let log_dir = directories::ProjectDirs::from("dev", "pdbsweep", "pdbsweep")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "pdbsweep.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let config = cli.config.map(|path| {
        if path.is_relative() {
            workspace.join(path)
        } else {
            path
        }
    });

    commands::handle_command(cli.command, &workspace, config.as_deref()).await
}
