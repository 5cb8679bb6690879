//! Simulation configuration.
//!
//! Values come from (lowest to highest precedence) built-in defaults, an
//! optional TOML file (`~/.config/hlsim/config.toml` or `--config`), and
//! command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Fetch attempts per resource before giving up.
pub const NUM_DOWNLOAD_RETRIES: u32 = 5;
/// Per-attempt timeout for manifests and fragments, seconds.
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 6;
/// Buffer level above which a player stops requesting, seconds.
pub const BUFFER_FILL_LEVEL: f64 = 25.0;

/// Per-session player tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerOptions {
    /// Fetch attempts per manifest or fragment.
    pub retries: u32,
    /// Timeout for a single fetch attempt, seconds.
    pub timeout_secs: u64,
    /// Backpressure threshold, seconds of buffered media.
    pub buffer_fill_level: f64,
    /// How many fragments behind the live edge a live session starts.
    pub live_edge_offset: i64,
    /// Granularity of cancellation-aware sleeps, milliseconds.
    pub tick_ms: u64,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            retries: NUM_DOWNLOAD_RETRIES,
            timeout_secs: DOWNLOAD_TIMEOUT_SECS,
            buffer_fill_level: BUFFER_FILL_LEVEL,
            live_edge_offset: 2,
            tick_ms: 1000,
        }
    }
}

impl PlayerOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Everything needed to run one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Master manifest (or single media playlist) URL.
    pub url: String,
    /// Target playback duration per session, seconds.
    pub duration_secs: u64,
    /// Number of sessions to spawn.
    pub sessions: usize,
    /// New sessions per second.
    pub rate: f64,
    /// Directory under which the experiment directory is created.
    pub output_dir: PathBuf,
    pub player: PlayerOptions,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            duration_secs: 60,
            sessions: 1,
            rate: 1.0,
            output_dir: PathBuf::from("./"),
            player: PlayerOptions::default(),
        }
    }
}

impl SimulationConfig {
    /// Parse a TOML config document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid simulation config")
    }

    /// Load a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("invalid TOML in {}", path.display()))
    }

    /// Load `path` if given, else the default config file if it exists,
    /// else built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = config_path();
                if default.exists() {
                    Self::from_file(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    /// Delay between two successive session spawns.
    pub fn spawn_interval(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(1.0 / self.rate)
            .with_context(|| format!("Rate of clients out of range: {}", self.rate))
    }

    /// Reject configurations the coordinator can't run.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            bail!("Empty url");
        }
        url::Url::parse(&self.url).with_context(|| format!("Invalid url: {}", self.url))?;
        if self.sessions == 0 {
            bail!("Number of players must be positive");
        }
        if !(self.rate.is_finite() && self.rate > 0.0) {
            bail!("Rate of clients must be positive");
        }
        self.spawn_interval()?;
        if !self.output_dir.is_dir() {
            bail!(
                "Destination path {} does not exist, create it first",
                self.output_dir.display()
            );
        }
        Ok(())
    }
}

/// Return the path to the default config file.
fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hlsim")
        .join("config.toml")
}
