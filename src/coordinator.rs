//! Session coordinator
//!
//! Spawns `n` players at a fixed arrival rate and waits for all of them.
//! Interrupts cancel the shared token; players wind down on their own at
//! their next checkpoint.

use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

use crate::config::SimulationConfig;
use crate::fetcher::Fetch;
use crate::player::{Player, SessionLog, SessionReport};

pub struct Coordinator {
    config: SimulationConfig,
    fetcher: Arc<dyn Fetch>,
    cancel: CancellationToken,
}

impl Coordinator {
    pub fn new(config: SimulationConfig, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            config,
            fetcher,
            cancel: CancellationToken::new(),
        }
    }

    /// Token shared with every session. Cancelling it is the only way to
    /// stop sessions early.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every session, writing their logs into `log_dir`.
    ///
    /// Returns the reports of the sessions that finished cleanly; sessions
    /// whose log failed or whose task panicked are reported via `tracing`
    /// and left out.
    pub async fn run(&self, log_dir: &Path) -> Result<Vec<SessionReport>> {
        let url = Url::parse(&self.config.url)
            .with_context(|| format!("Invalid url: {}", self.config.url))?;
        let interval = self.config.spawn_interval()?;
        let mut sessions = JoinSet::new();

        info!(
            sessions = self.config.sessions,
            rate = self.config.rate,
            url = %url,
            "Starting HLS player(s)"
        );

        for i in 0..self.config.sessions {
            if self.cancel.is_cancelled() {
                warn!(spawned = i, "Interrupted before all players were started");
                break;
            }

            match SessionLog::create(log_dir) {
                Ok(log) => {
                    let player = Player::new(
                        url.clone(),
                        self.config.duration(),
                        self.config.player.clone(),
                        Arc::clone(&self.fetcher),
                        self.cancel.clone(),
                        log,
                    );
                    info!(session = player.session_id(), "Player started");
                    sessions.spawn(player.run());
                }
                Err(e) => error!(player = i, "Player not started: {e:#}"),
            }

            if i + 1 < self.config.sessions {
                self.stagger(interval).await;
            }
        }

        info!("Started all player(s)");
        Ok(join_all(&mut sessions).await)
    }

    /// Wait `interval` unless cancelled first.
    async fn stagger(&self, interval: Duration) {
        tokio::select! {
            () = self.cancel.cancelled() => {}
            () = tokio::time::sleep(interval) => {}
        }
    }
}

async fn join_all(sessions: &mut JoinSet<Result<SessionReport>>) -> Vec<SessionReport> {
    let mut reports = Vec::with_capacity(sessions.len());
    while let Some(joined) = sessions.join_next().await {
        match joined {
            Ok(Ok(report)) => reports.push(report),
            Ok(Err(e)) => error!("Session failed: {e:#}"),
            Err(e) => error!("Session task died: {e}"),
        }
    }
    reports
}

/// Cancel `token` on Ctrl-C (and SIGTERM on Unix).
///
/// The listener lives until the signal arrives; a second signal is not
/// handled specially. If no handler can be installed the token is left
/// alone.
pub fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(cancel_when(token, wait_for_interrupt()));
}

async fn cancel_when(token: CancellationToken, interrupt: impl Future<Output = ()>) {
    interrupt.await;
    warn!("Interrupted, exiting....");
    token.cancel();
}

/// Resolve when `signal` fires; never resolve if it could not be installed.
async fn signal_or_pending(signal: impl Future<Output = io::Result<()>>, name: &str) {
    if let Err(e) = signal.await {
        warn!("Cannot listen for {name}: {e}");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn wait_for_interrupt() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = signal_or_pending(tokio::signal::ctrl_c(), "Ctrl-C");
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                () = ctrl_c => {}
                Some(()) = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {e}");
            ctrl_c.await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_interrupt() {
    signal_or_pending(tokio::signal::ctrl_c(), "Ctrl-C").await;
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::time::Instant;

    use crate::fetcher::{FetchError, Fetched};
    use crate::player::SessionEnd;

    /// Single-fragment VOD for every playlist URL, 1 KiB per fragment.
    /// Records when each playlist request came in.
    struct TinyVod {
        latency: Duration,
        playlist_requests: Mutex<Vec<Instant>>,
    }

    impl TinyVod {
        fn new(latency: Duration) -> Self {
            Self {
                latency,
                playlist_requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Fetch for TinyVod {
        async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<Fetched, FetchError> {
            let body = if url.path().ends_with(".m3u8") {
                self.playlist_requests.lock().unwrap().push(Instant::now());
                "#EXTM3U\n#EXTINF:4.0,\nseg.ts\n#EXT-X-ENDLIST\n".to_string()
            } else {
                "x".repeat(1024)
            };
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            Ok(Fetched {
                content_length: body.len() as u64,
                body: Bytes::from(body),
            })
        }
    }

    fn config(dir: &Path, sessions: usize) -> SimulationConfig {
        SimulationConfig {
            url: "http://x/index.m3u8".into(),
            duration_secs: 30,
            sessions,
            rate: 1.0,
            output_dir: dir.to_path_buf(),
            ..SimulationConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_every_session() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator =
            Coordinator::new(config(dir.path(), 3), Arc::new(TinyVod::new(Duration::ZERO)));
        let reports = coordinator.run(dir.path()).await.unwrap();

        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.end == SessionEnd::Exhausted));

        let logs = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(logs, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_start_one_interval_apart() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(TinyVod::new(Duration::ZERO));
        let config = SimulationConfig {
            rate: 2.0,
            ..config(dir.path(), 3)
        };
        let coordinator = Coordinator::new(config, fetcher.clone());
        coordinator.run(dir.path()).await.unwrap();

        // Master and media playlist requests of one session share an instant
        let mut starts = fetcher.playlist_requests.lock().unwrap().clone();
        starts.dedup();
        assert_eq!(starts.len(), 3);
        for pair in starts.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_log_leaves_running_sessions_alone() {
        let dir = tempfile::tempdir().unwrap();
        let exp = dir.path().join("exp");
        std::fs::create_dir(&exp).unwrap();

        let coordinator = Coordinator::new(
            config(&exp, 2),
            Arc::new(TinyVod::new(Duration::from_secs(2))),
        );

        // Gone before the second player's log is created at 1s
        let doomed = exp.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            std::fs::remove_dir_all(doomed).unwrap();
        });

        let reports = coordinator.run(&exp).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].end, SessionEnd::Exhausted);
        assert_eq!(reports[0].fragments, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_start_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator =
            Coordinator::new(config(dir.path(), 5), Arc::new(TinyVod::new(Duration::ZERO)));
        coordinator.cancel_token().cancel();

        let reports = coordinator.run(dir.path()).await.unwrap();
        assert!(reports.is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_cancels_token() {
        let token = CancellationToken::new();
        cancel_when(token.clone(), signal_or_pending(async { Ok(()) }, "test")).await;
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_signal_handler_never_cancels() {
        let token = CancellationToken::new();
        let failed = signal_or_pending(
            async { Err(io::Error::other("signal driver unavailable")) },
            "test",
        );
        tokio::spawn(cancel_when(token.clone(), failed));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!token.is_cancelled());
    }
}
