//! Simulated playback buffer.
//!
//! Wall-clock time drains the buffer, arriving fragments fill it. When the
//! drain outruns the buffer the player is stalled (rebuffering) until the
//! next fragment lands.

use tokio::time::Instant;

/// Below this many buffered seconds the player already counts as stalled.
const EMPTY_BUFFER_EPSILON: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct BufferModel {
    level: f64,
    playing: bool,
    rebuffer_count: u32,
    rebuffer_duration: f64,
    rebuffer_ratio: f64,
    last_update: Instant,
    start: Instant,
}

impl BufferModel {
    pub fn new(now: Instant) -> Self {
        Self {
            level: 0.0,
            playing: false,
            rebuffer_count: 0,
            rebuffer_duration: 0.0,
            rebuffer_ratio: 0.0,
            last_update: now,
            start: now,
        }
    }

    /// Advance the model to `now`, optionally with a fragment of
    /// `fragment` seconds that just finished downloading.
    ///
    /// The first fragment starts playback and anchors the clock; it is the
    /// fragment being played, so the buffer stays empty. Every later
    /// fragment adds its duration.
    pub fn tick(&mut self, now: Instant, fragment: Option<f64>) {
        if !self.playing {
            if fragment.is_none() {
                return;
            }
            self.playing = true;
            self.last_update = now;
            self.start = now;
            return;
        }

        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        if elapsed > self.level {
            if self.level > EMPTY_BUFFER_EPSILON {
                self.rebuffer_count += 1;
            }
            self.rebuffer_duration += elapsed - self.level;
            self.level = 0.0;
        } else {
            self.level -= elapsed;
        }

        if let Some(duration) = fragment {
            self.level += duration.max(0.0);
        }

        if self.rebuffer_duration > 0.0 {
            let played = now.saturating_duration_since(self.start).as_secs_f64();
            if played > 0.0 {
                self.rebuffer_ratio = self.rebuffer_duration / played;
            }
        }

        self.last_update = now;
    }

    /// Buffered media, seconds.
    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn playing(&self) -> bool {
        self.playing
    }

    /// Distinct stall events.
    pub fn rebuffer_count(&self) -> u32 {
        self.rebuffer_count
    }

    /// Cumulative stalled time, seconds.
    pub fn rebuffer_duration(&self) -> f64 {
        self.rebuffer_duration
    }

    /// Stalled time over played time, `0.0..=1.0`.
    pub fn rebuffer_ratio(&self) -> f64 {
        self.rebuffer_ratio
    }

    /// Playback start, or model creation if playback hasn't started.
    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn last_update(&self) -> Instant {
        self.last_update
    }

    /// Seconds since playback start.
    pub fn elapsed(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.start).as_secs_f64()
    }
}
