//! `hlsim` CLI - Simulate HLS players against a live origin

mod cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use hlsim::ReportFormat;

#[derive(Parser)]
#[command(name = "hlsim")]
#[command(about = "Simulate HLS playback clients and measure rebuffering")]
#[command(version)]
struct Cli {
    /// Debug-level diagnostics (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run simulated players against a master manifest (or playlist)
    Run {
        /// URL of master manifest (or playlist)
        #[arg(long)]
        url: Option<String>,

        /// Duration of each streaming session, seconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// Number of HLS players to simulate
        #[arg(short = 'n', long = "num-players")]
        num_players: Option<usize>,

        /// Rate of new HLS players per second
        #[arg(short, long)]
        rate: Option<f64>,

        /// Path where the experiment directory is created
        #[arg(long)]
        dst: Option<PathBuf>,

        /// TOML config file (default: ~/.config/hlsim/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Skip the summary printed after the run
        #[arg(long)]
        no_report: bool,
    },

    /// Summarize the session logs of an experiment directory
    Report {
        /// Experiment directory containing session CSV logs
        dir: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: FormatArg,

        /// Bin width, seconds
        #[arg(short, long, default_value = "10")]
        bin: f64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

impl From<FormatArg> for ReportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Text => ReportFormat::Text,
            FormatArg::Json => ReportFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match cli.command {
        Commands::Run {
            url,
            duration,
            num_players,
            rate,
            dst,
            config,
            no_report,
        } => {
            let overrides = cmd::run::Overrides {
                url,
                duration,
                num_players,
                rate,
                dst,
            };
            cmd::run::cmd_run(config.as_deref(), overrides, !no_report).await?;
        }
        Commands::Report { dir, format, bin } => {
            cmd::report::cmd_report(&dir, format.into(), bin)?;
        }
    }

    Ok(())
}
