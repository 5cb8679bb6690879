use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::info;

use hlsim::report::BIN_SIZE_SECS;
use hlsim::{
    cancel_on_interrupt, create_experiment_dir, summarize, Coordinator, HttpFetcher,
    ReportFormat, SessionEnd, SimulationConfig,
};

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub url: Option<String>,
    pub duration: Option<u64>,
    pub num_players: Option<usize>,
    pub rate: Option<f64>,
    pub dst: Option<PathBuf>,
}

impl Overrides {
    fn apply(self, config: &mut SimulationConfig) {
        if let Some(url) = self.url {
            config.url = url;
        }
        if let Some(duration) = self.duration {
            config.duration_secs = duration;
        }
        if let Some(n) = self.num_players {
            config.sessions = n;
        }
        if let Some(rate) = self.rate {
            config.rate = rate;
        }
        if let Some(dst) = self.dst {
            config.output_dir = dst;
        }
    }
}

pub async fn cmd_run(config_path: Option<&Path>, overrides: Overrides, report: bool) -> Result<()> {
    let mut config = SimulationConfig::load(config_path)?;
    overrides.apply(&mut config);
    config.validate()?;

    let log_dir = create_experiment_dir(&config.output_dir)?;
    eprintln!("🎬 {} player(s) → {}", config.sessions, config.url);
    eprintln!("📁 Logs: {}", log_dir.display());

    let coordinator = Coordinator::new(config, Arc::new(HttpFetcher::new()?));
    cancel_on_interrupt(coordinator.cancel_token());

    let start = Instant::now();
    let reports = coordinator.run(&log_dir).await?;
    let elapsed = start.elapsed();

    let failed = reports
        .iter()
        .filter(|r| r.end == SessionEnd::BootstrapFailed)
        .count();
    let bytes: u64 = reports.iter().map(|r| r.bytes).sum();
    info!(
        finished = reports.len(),
        failed,
        bytes,
        elapsed_secs = elapsed.as_secs_f64(),
        "All players finished"
    );

    if report {
        let summary = summarize(&log_dir, BIN_SIZE_SECS)?;
        println!("{}", summary.render(ReportFormat::Text)?);
    }
    println!("{}", log_dir.display());

    Ok(())
}
