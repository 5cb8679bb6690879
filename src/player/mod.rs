//! Simulated HLS player
//!
//! One [`Player`] is one viewing session. It walks a media playlist by
//! sequence number, downloads every fragment, and feeds the arrivals into a
//! [`BufferModel`] to derive rebuffering. Live playlists are refreshed no
//! faster than the server's fragment cadence, and the player backs off once
//! comfortably buffered.
//!
//! Cancellation is cooperative: the token is observed at every sleep, never
//! in the middle of a fetch.

pub mod buffer;
pub mod log;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local};
use rand::seq::SliceRandom;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::PlayerOptions;
use crate::fetcher::{Fetch, FetchError, Fetched};
use crate::hls::{MasterPlaylist, MediaPlaylist};

pub use buffer::BufferModel;
pub use log::{LogRow, RowKind, SessionLog, CSV_HEADER};

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Played for the configured duration.
    Completed,
    /// VOD content ran out before the duration elapsed.
    Exhausted,
    /// The shared cancellation token fired.
    Cancelled,
    /// Master or media playlist unreachable after all retries.
    BootstrapFailed,
}

/// Final metrics of one session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: u64,
    pub end: SessionEnd,
    pub fragments: u32,
    /// Declared bytes of every fragment that arrived.
    pub bytes: u64,
    pub buffer: f64,
    pub rebuffer_count: u32,
    pub rebuffer_duration: f64,
    pub rebuffer_ratio: f64,
    pub download_errors: u32,
}

/// Result of a retried download.
#[derive(Debug)]
struct Download {
    started: DateTime<Local>,
    elapsed: Duration,
    finished: Instant,
    /// Declared length of the accepted attempt, `None` if every attempt failed.
    content_length: Option<u64>,
    failures: u32,
    bad_url: bool,
}

/// Tracks how long the current playlist copy has been held.
///
/// The anchor moves only when a refresh brought the wanted fragment, so a
/// stale copy from the server doesn't restart the wait.
#[derive(Debug, Clone, Copy)]
pub struct PlaylistAge {
    fetched_at: Instant,
}

impl PlaylistAge {
    pub fn new(fetched_at: Instant) -> Self {
        Self { fetched_at }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.fetched_at)
    }

    /// Record a refresh finished at `at`. Returns whether the anchor moved.
    pub fn refreshed(&mut self, at: Instant, last_sequence: i64, wanted: i64) -> bool {
        if last_sequence >= wanted {
            self.fetched_at = at;
            true
        } else {
            false
        }
    }
}

/// One simulated viewer.
pub struct Player {
    url: Url,
    duration: Duration,
    options: PlayerOptions,
    fetcher: Arc<dyn Fetch>,
    cancel: CancellationToken,
    log: SessionLog,
    buffer: BufferModel,
    download_errors: u32,
    fragments: u32,
    bytes: u64,
}

impl Player {
    pub fn new(
        url: Url,
        duration: Duration,
        options: PlayerOptions,
        fetcher: Arc<dyn Fetch>,
        cancel: CancellationToken,
        log: SessionLog,
    ) -> Self {
        Self {
            url,
            duration,
            options,
            fetcher,
            cancel,
            log,
            buffer: BufferModel::new(Instant::now()),
            download_errors: 0,
            fragments: 0,
            bytes: 0,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.log.session_id()
    }

    /// Play until the duration elapses, VOD content runs out, or the
    /// session is cancelled. Only log I/O errors are returned as `Err`.
    pub async fn run(mut self) -> Result<SessionReport> {
        let id = self.session_id();
        let end = self.play().await;
        match end {
            Ok(SessionEnd::BootstrapFailed) => {
                warn!(session = id, "Session aborted during bootstrap");
            }
            Ok(end) => info!(
                session = id,
                ?end,
                fragments = self.fragments,
                bytes = self.bytes,
                rebuffer_count = self.buffer.rebuffer_count(),
                rebuffer_ratio = self.buffer.rebuffer_ratio(),
                "Session finished"
            ),
            Err(ref e) => error!(session = id, "Session log failed: {e:#}"),
        }
        let end = end?;

        let report = self.report(end);
        self.log.close()?;
        Ok(report)
    }

    fn report(&self, end: SessionEnd) -> SessionReport {
        SessionReport {
            session_id: self.session_id(),
            end,
            fragments: self.fragments,
            bytes: self.bytes,
            buffer: self.buffer.level(),
            rebuffer_count: self.buffer.rebuffer_count(),
            rebuffer_duration: self.buffer.rebuffer_duration(),
            rebuffer_ratio: self.buffer.rebuffer_ratio(),
            download_errors: self.download_errors,
        }
    }

    async fn play(&mut self) -> Result<SessionEnd> {
        let Some(mut playlist) = self.bootstrap().await? else {
            return Ok(SessionEnd::BootstrapFailed);
        };
        let mut age = PlaylistAge::new(Instant::now());

        let mut wanted = if playlist.endlist() {
            playlist.first_sequence()
        } else {
            (playlist.last_sequence() - self.options.live_edge_offset)
                .max(playlist.first_sequence())
        };
        debug!(
            session = self.session_id(),
            live = playlist.is_live(),
            start = wanted,
            "Starting playback"
        );

        let mut elapsed = 0.0;
        let target = self.duration.as_secs_f64();

        while elapsed < target {
            if self.cancel.is_cancelled() {
                return Ok(SessionEnd::Cancelled);
            }

            if wanted <= playlist.last_sequence() {
                self.play_fragment(&mut playlist, wanted).await?;
                wanted += 1;
            }

            if playlist.is_live() && wanted > playlist.last_sequence() {
                if !self.wait_for_refresh(&playlist, &age).await {
                    return Ok(SessionEnd::Cancelled);
                }
                let url = playlist.url().clone();
                let download = self.download_media_playlist(&mut playlist).await;
                if age.refreshed(download.finished, playlist.last_sequence(), wanted) {
                    debug!(session = self.session_id(), wanted, "Playlist advanced");
                }
                self.buffer.tick(download.finished, None);
                self.log_download(RowKind::Manifest, &url, &download)?;
            }

            if playlist.endlist() && wanted > playlist.last_sequence() {
                return Ok(SessionEnd::Exhausted);
            }

            while self.buffer.level() > self.options.buffer_fill_level {
                if !self.pause().await {
                    return Ok(SessionEnd::Cancelled);
                }
                self.buffer.tick(Instant::now(), None);
            }

            elapsed = self.buffer.elapsed(Instant::now());
        }

        if self.cancel.is_cancelled() {
            Ok(SessionEnd::Cancelled)
        } else {
            Ok(SessionEnd::Completed)
        }
    }

    /// Fetch the master manifest, pick a rendition, fetch its playlist.
    async fn bootstrap(&mut self) -> Result<Option<MediaPlaylist>> {
        let mut master = MasterPlaylist::new("master", self.url.clone());
        let download = self.download_master(&mut master).await;
        if download.content_length.is_none() {
            master.bad_url = download.bad_url;
            error!(
                session = self.session_id(),
                url = %self.url,
                bad_url = master.bad_url,
                "Bad manifest, exiting"
            );
            return Ok(None);
        }

        let mut playlist = if master.variants.is_empty() {
            // No variants: the URL is a single-bitrate media playlist
            MediaPlaylist::new("media", self.url.clone())
        } else {
            let variant = master
                .variants
                .choose(&mut rand::thread_rng())
                .cloned()
                .unwrap_or_else(|| MediaPlaylist::new("media", self.url.clone()));
            info!(
                session = self.session_id(),
                variant = %variant.url(),
                bandwidth = variant.attributes.bandwidth(),
                "Selected variant"
            );
            variant
        };

        let url = playlist.url().clone();
        let download = self.download_media_playlist(&mut playlist).await;
        if download.content_length.is_none() {
            error!(session = self.session_id(), url = %url, "Bad media playlist, exiting");
            return Ok(None);
        }
        self.log_download(RowKind::Manifest, &url, &download)?;

        Ok(Some(playlist))
    }

    async fn play_fragment(&mut self, playlist: &mut MediaPlaylist, seq: i64) -> Result<()> {
        let url = match playlist.fragment(seq) {
            Ok(fragment) => fragment.url.clone(),
            Err(e) => {
                debug!(session = self.session_id(), "{e}");
                return Ok(());
            }
        };

        let download = self.download_fragment(&url).await;
        let Ok(fragment) = playlist.record_download(seq, download.content_length) else {
            return Ok(());
        };
        let arrived = fragment.content_length.map(|_| fragment.duration);
        if let Some(len) = fragment.content_length {
            self.fragments += 1;
            self.bytes += len;
        } else {
            warn!(
                session = self.session_id(),
                seq,
                playlist = %fragment.playlist_url(),
                "Segment download failed"
            );
        }

        self.buffer.tick(download.finished, arrived);
        self.log_download(RowKind::Segment, &fragment.url, &download)
    }

    /// Sleep until the held playlist is at least one fragment duration old.
    /// Returns `false` if cancelled while waiting.
    async fn wait_for_refresh(&self, playlist: &MediaPlaylist, age: &PlaylistAge) -> bool {
        let cadence = playlist
            .fragments()
            .last()
            .map(|f| f.duration)
            .or_else(|| playlist.attributes.target_duration())
            .unwrap_or_else(|| self.options.tick().as_secs_f64());
        let cadence = Duration::from_secs_f64(cadence.max(0.0));

        while age.age(Instant::now()) < cadence {
            if !self.pause().await {
                return false;
            }
        }
        !self.cancel.is_cancelled()
    }

    /// One cancellation-aware tick. Returns `false` if cancelled.
    async fn pause(&self) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(self.options.tick()) => true,
        }
    }

    async fn download_master(&mut self, master: &mut MasterPlaylist) -> Download {
        let url = master.url.clone();
        self.download(&url, |fetched| {
            master.parse(&fetched.text())?;
            Ok(())
        })
        .await
    }

    async fn download_media_playlist(&mut self, playlist: &mut MediaPlaylist) -> Download {
        let url = playlist.url().clone();
        self.download(&url, |fetched| {
            playlist.parse(&fetched.text())?;
            Ok(())
        })
        .await
    }

    async fn download_fragment(&mut self, url: &Url) -> Download {
        self.download(url, |_| Ok(())).await
    }

    /// Fetch `url` up to `retries` times, handing each payload to `accept`.
    /// A rejected payload counts as a failed attempt.
    async fn download<F>(&mut self, url: &Url, mut accept: F) -> Download
    where
        F: FnMut(&Fetched) -> Result<(), FetchError>,
    {
        let started = Local::now();
        let start = Instant::now();
        let mut failures = 0;
        let mut bad_url = false;
        let mut content_length = None;

        for attempt in 1..=self.options.retries.max(1) {
            let outcome = match self.fetcher.fetch(url, self.options.timeout()).await {
                Ok(fetched) => accept(&fetched).map(|()| fetched.content_length),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(len) => {
                    content_length = Some(len);
                    break;
                }
                Err(e) => {
                    failures += 1;
                    bad_url |= e.is_bad_url();
                    debug!(
                        session = self.session_id(),
                        %url,
                        attempt,
                        "Download attempt failed: {e}"
                    );
                }
            }
        }

        self.download_errors += failures;
        let finished = Instant::now();
        Download {
            started,
            elapsed: finished.saturating_duration_since(start),
            finished,
            content_length,
            failures,
            bad_url,
        }
    }

    fn log_download(&mut self, kind: RowKind, url: &Url, download: &Download) -> Result<()> {
        if download.failures > 0 {
            debug!(
                session = self.session_id(),
                %url,
                failures = download.failures,
                "Download needed retries"
            );
        }
        self.log.write_row(&LogRow {
            started: download.started,
            kind,
            content_length: download.content_length.unwrap_or(0),
            download_time: download.elapsed,
            buffer: self.buffer.level(),
            rebuffer_count: self.buffer.rebuffer_count(),
            rebuffer_duration: self.buffer.rebuffer_duration(),
            rebuffer_ratio: self.buffer.rebuffer_ratio(),
            error_count: self.download_errors,
            url,
        })
    }
}
