mod cmd_analyze;
mod cmd_run;
mod cmd_status;
mod logging;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "ratchet",
    version,
    about = "Retry, checkpoint and roll back coding-agent attempts"
)]
struct Cli {
    /// Log progress from ratchet crates (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a task from a YAML file
    Run {
        /// Path to task.yaml
        task_file: String,
        /// Override working directory
        #[arg(long)]
        cwd: Option<String>,
        /// Print the resolved configuration without running
        #[arg(long)]
        dry_run: bool,
        /// Checkpoint the workspace before the first attempt
        #[arg(long)]
        baseline: bool,
    },
    /// Show saved run reports
    Status {
        /// Task name (default: all)
        name: Option<String>,
        /// Workspace root (default: current directory)
        #[arg(long)]
        cwd: Option<String>,
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Classify the attempts of a saved run
    Analyze {
        /// Task name
        name: String,
        /// Workspace root (default: current directory)
        #[arg(long)]
        cwd: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let current = std::env::current_dir()?;
    let root = |cwd: Option<String>| cwd.map(PathBuf::from).unwrap_or_else(|| current.clone());

    match cli.cmd {
        Command::Run {
            task_file,
            cwd,
            dry_run,
            baseline,
        } => cmd_run::run(
            Path::new(&task_file),
            cwd.as_deref().map(Path::new),
            dry_run,
            baseline,
        ),
        Command::Status { name, cwd, json } => cmd_status::status(&root(cwd), name.as_deref(), json),
        Command::Analyze { name, cwd } => cmd_analyze::analyze(&root(cwd), &name),
    }
}
