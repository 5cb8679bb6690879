//! `hlsim` - HLS playback client simulator
//!
//! Runs many simulated HLS viewers against a real origin or CDN and records
//! what each of them would have experienced, without decoding any media.
//!
//! # Features
//!
//! - **Manifest model**: master and media playlists, live refresh with
//!   media-sequence tracking and gap detection
//! - **Player simulation**: buffer fill/drain timeline, rebuffer counting,
//!   backpressure once comfortably buffered
//! - **Load generation**: N sessions at a fixed arrival rate, cooperative
//!   cancellation on Ctrl-C
//! - **Reporting**: per-session CSV timelines and a binned experiment summary
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hlsim::{Coordinator, HttpFetcher, SimulationConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SimulationConfig {
//!         url: "http://localhost:8080/master.m3u8".into(),
//!         sessions: 10,
//!         ..SimulationConfig::default()
//!     };
//!     let coordinator = Coordinator::new(config, Arc::new(HttpFetcher::new()?));
//!     let reports = coordinator.run(std::path::Path::new("./")).await?;
//!     println!("{} sessions finished", reports.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod experiment;
pub mod fetcher;
pub mod hls;
pub mod player;
pub mod report;

pub use config::{PlayerOptions, SimulationConfig};
pub use coordinator::{cancel_on_interrupt, Coordinator};
pub use experiment::create_experiment_dir;
pub use fetcher::{Fetch, FetchError, Fetched, HttpFetcher};
pub use hls::{HlsError, MasterPlaylist, MediaFragment, MediaPlaylist};
pub use player::{BufferModel, Player, SessionEnd, SessionLog, SessionReport};
pub use report::{summarize, ReportFormat, Summary};

/// Version of hlsim
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
