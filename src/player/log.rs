//! Per-session CSV timeline.
//!
//! One file per session, named `<session id>.csv`, one row per manifest or
//! fragment download. The column set is the contract with `report`.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use url::Url;

pub const CSV_HEADER: &str =
    "time,type,content_length,download_time,buffer,rebuf_count,rebuf_dur,rebuf_ratio,error_count,player_id,url";

/// `2015-03-03 16:02:51.347423`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// What a log row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Manifest,
    Segment,
}

impl RowKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manifest => "manifest",
            Self::Segment => "seg",
        }
    }
}

/// One timeline row.
#[derive(Debug, Clone)]
pub struct LogRow<'a> {
    pub started: DateTime<Local>,
    pub kind: RowKind,
    pub content_length: u64,
    pub download_time: Duration,
    pub buffer: f64,
    pub rebuffer_count: u32,
    pub rebuffer_duration: f64,
    /// Fraction, written as a percentage.
    pub rebuffer_ratio: f64,
    pub error_count: u32,
    pub url: &'a Url,
}

/// Exclusive writer for one session's log file.
#[derive(Debug)]
pub struct SessionLog {
    session_id: u64,
    path: PathBuf,
    writer: BufWriter<File>,
}

impl SessionLog {
    /// Create a fresh log in `dir`, seeding the session id from the current
    /// time in microseconds and bumping it until the file name is unused.
    pub fn create(dir: &Path) -> Result<Self> {
        let seed = u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or_default();
        Self::create_with_id(dir, seed)
    }

    /// Like [`Self::create`] with an explicit starting id.
    pub fn create_with_id(dir: &Path, mut session_id: u64) -> Result<Self> {
        loop {
            let path = dir.join(format!("{session_id}.csv"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    let mut writer = BufWriter::new(file);
                    writeln!(writer, "{CSV_HEADER}")
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    return Ok(Self {
                        session_id,
                        path,
                        writer,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => session_id += 1,
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to create {}", path.display()))
                }
            }
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_row(&mut self, row: &LogRow<'_>) -> Result<()> {
        writeln!(
            self.writer,
            "{},{},{},{:.6},{:.6},{},{:.6},{:.6},{},{},{}",
            row.started.format(TIMESTAMP_FORMAT),
            row.kind.as_str(),
            row.content_length,
            row.download_time.as_secs_f64() * 1000.0,
            row.buffer,
            row.rebuffer_count,
            row.rebuffer_duration,
            row.rebuffer_ratio * 100.0,
            row.error_count,
            self.session_id,
            row.url,
        )
        .with_context(|| format!("failed to write {}", self.path.display()))
    }

    /// Flush buffered rows; the file is closed on drop.
    pub fn close(mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_and_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = SessionLog::create_with_id(dir.path(), 7).unwrap();
        let url = Url::parse("http://x/seg1.ts").unwrap();

        log.write_row(&LogRow {
            started: Local::now(),
            kind: RowKind::Segment,
            content_length: 1024,
            download_time: Duration::from_millis(250),
            buffer: 12.5,
            rebuffer_count: 1,
            rebuffer_duration: 0.5,
            rebuffer_ratio: 0.025,
            error_count: 2,
            url: &url,
        })
        .unwrap();
        let path = log.path().to_path_buf();
        log.close().unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        let fields: Vec<&str> = lines.next().unwrap().split(',').collect();
        assert_eq!(fields.len(), 11);
        assert_eq!(fields[1], "seg");
        assert_eq!(fields[2], "1024");
        assert_eq!(fields[3], "250.000000");
        assert_eq!(fields[7], "2.500000");
        assert_eq!(fields[8], "2");
        assert_eq!(fields[9], "7");
        assert_eq!(fields[10], "http://x/seg1.ts");
    }

    #[test]
    fn test_session_id_collision_bumps() {
        let dir = tempfile::tempdir().unwrap();
        let first = SessionLog::create_with_id(dir.path(), 100).unwrap();
        let second = SessionLog::create_with_id(dir.path(), 100).unwrap();

        assert_eq!(first.session_id(), 100);
        assert_eq!(second.session_id(), 101);
        assert!(dir.path().join("101.csv").exists());
    }
}
