//! Experiment summary
//!
//! Reads the per-session CSV logs of an experiment directory and reduces
//! them into fixed-width time bins: active players, average bitrate, request
//! count, and median / 95th percentile rebuffering ratio.

use std::fmt::Write as FmtWrite;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, warn};

use crate::player::log::TIMESTAMP_FORMAT;

/// Default bin width, seconds.
pub const BIN_SIZE_SECS: f64 = 10.0;

/// Report output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    /// Aligned text table (default)
    #[default]
    Text,
    /// JSON (machine-readable)
    Json,
}

/// One parsed log row.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub time: NaiveDateTime,
    pub manifest: bool,
    pub content_length: u64,
    /// Milliseconds.
    pub download_time: f64,
    pub buffer: f64,
    pub rebuffer_count: u32,
    pub rebuffer_duration: f64,
    /// Percent.
    pub rebuffer_ratio: f64,
    pub error_count: u32,
    pub url: String,
}

/// Everything one session log contains.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub path: PathBuf,
    pub samples: Vec<Sample>,
    /// Kbps, from a `b=` query parameter on the first logged URL.
    pub bitrate: Option<u64>,
}

impl SessionStats {
    /// Parse one session log. Lines that don't match the header are skipped.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Self::parse(path.to_path_buf(), &content))
    }

    pub fn parse(path: PathBuf, content: &str) -> Self {
        let mut lines = content.lines();
        let header: Vec<&str> = lines
            .next()
            .map(|h| h.trim().split(',').collect())
            .unwrap_or_default();

        let mut samples = Vec::new();
        for (n, line) in lines.enumerate() {
            match parse_line(line.trim(), &header) {
                Some(sample) => samples.push(sample),
                None => debug!(file = %path.display(), line = n + 2, "Skipping bad line"),
            }
        }

        let bitrate = samples.first().and_then(|s| bitrate_from_url(&s.url));
        Self {
            path,
            samples,
            bitrate,
        }
    }

    pub fn start(&self) -> Option<NaiveDateTime> {
        self.samples.first().map(|s| s.time)
    }

    pub fn end(&self) -> Option<NaiveDateTime> {
        self.samples.last().map(|s| s.time)
    }
}

fn parse_line(line: &str, header: &[&str]) -> Option<Sample> {
    let parts: Vec<&str> = line.split(',').collect();
    if header.is_empty() || parts.len() != header.len() {
        return None;
    }
    let field = |name: &str| {
        header
            .iter()
            .position(|h| *h == name)
            .map(|i| parts[i])
    };

    Some(Sample {
        time: NaiveDateTime::parse_from_str(field("time")?, TIMESTAMP_FORMAT).ok()?,
        manifest: match field("type")? {
            "manifest" => true,
            "seg" => false,
            _ => return None,
        },
        content_length: field("content_length")?.parse().ok()?,
        download_time: field("download_time")?.parse().ok()?,
        buffer: field("buffer")?.parse().ok()?,
        rebuffer_count: field("rebuf_count")?.parse().ok()?,
        rebuffer_duration: field("rebuf_dur")?.parse().ok()?,
        rebuffer_ratio: field("rebuf_ratio")?.parse().ok()?,
        error_count: field("error_count")?.parse().ok()?,
        url: field("url")?.to_string(),
    })
}

/// `b=` query parameter, if it is an integer.
fn bitrate_from_url(raw: &str) -> Option<u64> {
    let url = url::Url::parse(raw).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == "b")
        .and_then(|(_, v)| v.parse().ok())
}

/// Aggregates for one time bin.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Bin {
    /// Bin start relative to the first logged row, seconds.
    pub start: f64,
    /// Sessions whose logs span the whole bin.
    pub active_players: usize,
    /// Mean bitrate of the active players that advertise one, Kbps.
    pub avg_bitrate: f64,
    pub requests: usize,
    /// Percent.
    pub median_rebuffer_ratio: f64,
    /// Percent.
    pub p95_rebuffer_ratio: f64,
}

/// Whole-experiment summary.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub sessions: usize,
    pub requests: usize,
    pub download_errors: u64,
    pub bin_size: f64,
    pub bins: Vec<Bin>,
}

/// Summarize every `*.csv` log in `dir`.
pub fn summarize(dir: &Path, bin_size: f64) -> Result<Summary> {
    let mut sessions = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "csv") {
            match SessionStats::from_path(&path) {
                Ok(stats) => sessions.push(stats),
                Err(e) => warn!("{e:#}"),
            }
        }
    }
    Ok(summarize_sessions(&sessions, bin_size))
}

/// Bin already parsed sessions.
pub fn summarize_sessions(sessions: &[SessionStats], bin_size: f64) -> Summary {
    let bin_size = if bin_size > 0.0 { bin_size } else { BIN_SIZE_SECS };
    let requests = sessions.iter().map(|s| s.samples.len()).sum();
    let download_errors = sessions
        .iter()
        .filter_map(|s| s.samples.last())
        .map(|s| u64::from(s.error_count))
        .sum();

    let start = sessions.iter().filter_map(SessionStats::start).min();
    let end = sessions.iter().filter_map(SessionStats::end).max();
    let (Some(start), Some(end)) = (start, end) else {
        return Summary {
            sessions: sessions.len(),
            requests,
            download_errors,
            bin_size,
            bins: Vec::new(),
        };
    };

    let offset = |t: NaiveDateTime| (t - start).num_microseconds().unwrap_or(0) as f64 / 1e6;
    let bucket_count = 1 + (offset(end) / bin_size) as usize;

    let mut active = vec![0usize; bucket_count];
    let mut bitrate_sum = vec![0u64; bucket_count];
    let mut bitrate_players = vec![0usize; bucket_count];
    let mut request_count = vec![0usize; bucket_count];
    let mut ratios: Vec<Vec<f64>> = vec![Vec::new(); bucket_count];

    for session in sessions {
        let (Some(first), Some(last)) = (session.start(), session.end()) else {
            continue;
        };
        let (first, last) = (offset(first), offset(last));

        for i in 0..bucket_count {
            let lo = i as f64 * bin_size;
            if first < lo && last > lo + bin_size {
                active[i] += 1;
                if let Some(b) = session.bitrate {
                    bitrate_sum[i] += b;
                    bitrate_players[i] += 1;
                }
            }
        }

        for sample in &session.samples {
            let i = ((offset(sample.time) / bin_size) as usize).min(bucket_count - 1);
            request_count[i] += 1;
            ratios[i].push(sample.rebuffer_ratio);
        }
    }

    let bins = (0..bucket_count)
        .map(|i| {
            let mut r = std::mem::take(&mut ratios[i]);
            r.sort_by(f64::total_cmp);
            Bin {
                start: i as f64 * bin_size,
                active_players: active[i],
                avg_bitrate: bitrate_sum[i] as f64 / bitrate_players[i].max(1) as f64,
                requests: request_count[i],
                median_rebuffer_ratio: percentile(&r, 0.5),
                p95_rebuffer_ratio: percentile(&r, 0.95),
            }
        })
        .collect();

    Summary {
        sessions: sessions.len(),
        requests,
        download_errors,
        bin_size,
        bins,
    }
}

/// Nearest-rank percentile of sorted values, `0.0` when empty.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((p * sorted.len() as f64) as usize).min(sorted.len() - 1);
    sorted[idx]
}

impl Summary {
    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            ReportFormat::Text => self.to_text(),
        }
    }

    fn to_text(&self) -> Result<String> {
        let mut out = String::new();
        writeln!(
            out,
            "📊 {} sessions, {} requests, {} download errors",
            self.sessions, self.requests, self.download_errors
        )?;
        if self.bins.is_empty() {
            writeln!(out, "   (no samples)")?;
            return Ok(out);
        }

        writeln!(
            out,
            "\n{:>8} {:>8} {:>10} {:>9} {:>12} {:>12}",
            "time(s)", "players", "kbps", "requests", "rebuf p50%", "rebuf p95%"
        )?;
        for bin in &self.bins {
            writeln!(
                out,
                "{:>8.0} {:>8} {:>10.0} {:>9} {:>12.2} {:>12.2}",
                bin.start + self.bin_size / 2.0,
                bin.active_players,
                bin.avg_bitrate,
                bin.requests,
                bin.median_rebuffer_ratio,
                bin.p95_rebuffer_ratio
            )?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::CSV_HEADER;

    fn row(secs: u32, kind: &str, ratio: f64, url: &str) -> String {
        format!(
            "2015-03-03 16:{:02}:{:02}.000000,{kind},1000,12.5,4.0,0,0.0,{ratio:.6},0,1,{url}",
            secs / 60,
            secs % 60
        )
    }

    fn log(rows: &[String]) -> String {
        let mut s = format!("{CSV_HEADER}\n");
        for r in rows {
            s.push_str(r);
            s.push('\n');
        }
        s
    }

    #[test]
    fn test_parse_session_log() {
        let content = log(&[
            row(0, "manifest", 0.0, "http://x/a.m3u8?b=800"),
            "garbage,line".to_string(),
            row(2, "seg", 1.5, "http://x/seg1.ts"),
        ]);
        let stats = SessionStats::parse(PathBuf::from("1.csv"), &content);

        assert_eq!(stats.samples.len(), 2);
        assert!(stats.samples[0].manifest);
        assert!(!stats.samples[1].manifest);
        assert!((stats.samples[1].rebuffer_ratio - 1.5).abs() < 1e-9);
        assert_eq!(stats.bitrate, Some(800));
    }

    #[test]
    fn test_bitrate_from_url() {
        assert_eq!(bitrate_from_url("http://x/a.m3u8?b=1200&c=2"), Some(1200));
        assert_eq!(bitrate_from_url("http://x/a.m3u8?b=high"), None);
        assert_eq!(bitrate_from_url("http://x/a.m3u8"), None);
    }

    #[test]
    fn test_summarize_bins() {
        let long = SessionStats::parse(
            PathBuf::from("1.csv"),
            &log(&[
                row(0, "manifest", 0.0, "http://x/a.m3u8?b=1000"),
                row(5, "seg", 0.0, "http://x/1.ts"),
                row(15, "seg", 2.0, "http://x/2.ts"),
                row(25, "seg", 4.0, "http://x/3.ts"),
            ]),
        );
        let short = SessionStats::parse(
            PathBuf::from("2.csv"),
            &log(&[
                row(3, "manifest", 0.0, "http://x/b.m3u8?b=500"),
                row(12, "seg", 10.0, "http://x/1.ts"),
            ]),
        );

        let summary = summarize_sessions(&[long, short], 10.0);
        assert_eq!(summary.sessions, 2);
        assert_eq!(summary.requests, 6);
        assert_eq!(summary.bins.len(), 3);

        // Only the long session spans [10, 20)
        assert_eq!(summary.bins[1].active_players, 1);
        assert!((summary.bins[1].avg_bitrate - 1000.0).abs() < 1e-9);
        assert_eq!(summary.bins[1].requests, 2);
        assert!((summary.bins[1].p95_rebuffer_ratio - 10.0).abs() < 1e-9);

        assert_eq!(summary.bins[0].active_players, 0);
        assert_eq!(summary.bins[0].requests, 3);
        assert!(summary.bins[0].median_rebuffer_ratio.abs() < 1e-9);
    }

    #[test]
    fn test_empty_summary_renders() {
        let summary = summarize_sessions(&[], 10.0);
        assert!(summary.bins.is_empty());
        assert!(summary.render(ReportFormat::Text).unwrap().contains("no samples"));
        let json = summary.render(ReportFormat::Json).unwrap();
        assert!(json.contains("\"sessions\": 0"));
    }
}
