mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gt_telemetry::logging::LogFormat;

/// groundtruth-eval CLI -- score extracted document text against ground truth.
#[derive(Parser)]
#[command(name = "gt", version, about)]
struct Cli {
    /// Config file (defaults to ~/.gt-eval/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every sample of a ground-truth table and save the results.
    Run(commands::run::RunArgs),

    /// Print the weighted token similarity of an output file against a
    /// ground-truth file.
    Score {
        /// File holding the ground-truth text.
        ground_truth: PathBuf,
        /// File holding the output to score.
        output: PathBuf,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = commands::load_config(cli.config.as_deref())?;
    gt_telemetry::logging::init(
        "gt",
        &cfg.general.log_level,
        LogFormat::from_json_flag(cli.json_logs || cfg.general.json_logs),
    );

    match cli.command {
        Commands::Run(args) => commands::run::run(cfg, args).await?,
        Commands::Score {
            ground_truth,
            output,
        } => commands::score::run(&ground_truth, &output)?,
        Commands::Config => commands::config::run(&cfg)?,
    }

    Ok(())
}
