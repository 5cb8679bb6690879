//! End-to-end sessions against a local HLS origin.
//!
//! Spins up an axum server that plays the part of the origin and drives
//! real `HttpFetcher`-backed sessions through it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use url::Url;

use hlsim::player::CSV_HEADER;
use hlsim::{Coordinator, Fetch, FetchError, HttpFetcher, SessionEnd, SimulationConfig};

const MASTER: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-STREAM-INF:PROGRAM-ID=1,BANDWIDTH=500000
low.m3u8?b=500
#EXT-X-STREAM-INF:PROGRAM-ID=1,BANDWIDTH=1000000
high.m3u8?b=1000
";

const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:2
#EXT-X-MEDIA-SEQUENCE:0
#EXTINF:2.0,
seg0.ts
#EXTINF:2.0,
seg1.ts
#EXTINF:2.0,
seg2.ts
#EXT-X-ENDLIST
";

struct Origin {
    base_url: String,
    request_counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl Origin {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://127.0.0.1:{}", addr.port());

        let request_counts = Arc::new(Mutex::new(HashMap::new()));
        let counts = Arc::clone(&request_counts);

        let app = Router::new()
            .route("/master.m3u8", get(|| async { MASTER }))
            .route("/low.m3u8", get(|| async { MEDIA }))
            .route("/high.m3u8", get(|| async { MEDIA }))
            .route("/seg0.ts", get(|| async { vec![0u8; 4096] }))
            .route("/seg1.ts", get(|| async { vec![1u8; 4096] }))
            .route("/seg2.ts", get(|| async { vec![2u8; 4096] }))
            .route("/empty.ts", get(|| async { Vec::<u8>::new() }))
            .route("/gone.m3u8", get(|| async { StatusCode::NOT_FOUND }))
            .layer(axum::middleware::from_fn(
                move |req: axum::extract::Request, next: axum::middleware::Next| {
                    let counts = Arc::clone(&counts);
                    async move {
                        let path = req.uri().path().to_string();
                        if let Ok(mut counts) = counts.lock() {
                            *counts.entry(path).or_insert(0) += 1;
                        }
                        next.run(req).await
                    }
                },
            ));

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            request_counts,
        }
    }

    fn url(&self, path: &str) -> Url {
        format!("{}{}", self.base_url, path).parse().unwrap()
    }

    fn hits(&self, path: &str) -> usize {
        self.request_counts
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

fn config(url: &Url, dir: &Path, sessions: usize) -> SimulationConfig {
    SimulationConfig {
        url: url.to_string(),
        duration_secs: 10,
        sessions,
        rate: 1.0,
        output_dir: dir.to_path_buf(),
        ..SimulationConfig::default()
    }
}

fn csv_logs(dir: &Path) -> Vec<String> {
    let mut logs: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
        .map(|p| std::fs::read_to_string(p).unwrap())
        .collect();
    logs.sort();
    logs
}

// ─── Sessions ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_vod_sessions_play_to_the_end() {
    let origin = Origin::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = config(&origin.url("/master.m3u8"), dir.path(), 3);
    let budget = config.duration() + Duration::from_secs(25);

    let coordinator = Coordinator::new(config, Arc::new(HttpFetcher::new().unwrap()));
    let reports = tokio::time::timeout(budget, coordinator.run(dir.path()))
        .await
        .expect("sessions should finish in time")
        .unwrap();

    assert_eq!(reports.len(), 3);
    for report in &reports {
        assert_eq!(report.end, SessionEnd::Exhausted);
        assert_eq!(report.fragments, 3);
        assert_eq!(report.download_errors, 0);
    }
    assert_eq!(origin.hits("/master.m3u8"), 3);
    assert_eq!(origin.hits("/low.m3u8") + origin.hits("/high.m3u8"), 3);
    assert_eq!(origin.hits("/seg1.ts"), 3);

    let logs = csv_logs(dir.path());
    assert_eq!(logs.len(), 3);
    for log in &logs {
        let mut lines = log.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));

        let rows: Vec<Vec<&str>> = lines.map(|l| l.split(',').collect()).collect();
        // media playlist + three fragments
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0][1], "manifest");
        assert!(rows[0][10].contains("b="));
        assert!(rows[1..].iter().all(|r| r[1] == "seg" && r[2] == "4096"));

        let ratio: f64 = rows.last().unwrap()[7].parse().unwrap();
        assert!((0.0..=100.0).contains(&ratio));
    }
}

#[tokio::test]
async fn test_missing_master_fails_bootstrap() {
    let origin = Origin::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = config(&origin.url("/gone.m3u8"), dir.path(), 1);
    let retries = config.player.retries;

    let coordinator = Coordinator::new(config, Arc::new(HttpFetcher::new().unwrap()));
    let reports = tokio::time::timeout(Duration::from_secs(30), coordinator.run(dir.path()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].end, SessionEnd::BootstrapFailed);
    assert_eq!(reports[0].download_errors, retries);
    assert_eq!(origin.hits("/gone.m3u8"), retries as usize);

    // Header only
    let logs = csv_logs(dir.path());
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].lines().count(), 1);
}

// ─── Fetcher ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_reports_declared_length() {
    let origin = Origin::start().await;
    let fetcher = HttpFetcher::new().unwrap();

    let fetched = fetcher
        .fetch(&origin.url("/seg0.ts"), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(fetched.content_length, 4096);
    assert_eq!(fetched.body.len(), 4096);
}

#[tokio::test]
async fn test_fetch_status_and_empty_body() {
    let origin = Origin::start().await;
    let fetcher = HttpFetcher::new().unwrap();

    let err = fetcher
        .fetch(&origin.url("/gone.m3u8"), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status(s) if s == StatusCode::NOT_FOUND));
    assert!(err.is_bad_url());

    let err = fetcher
        .fetch(&origin.url("/empty.ts"), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::EmptyBody));
    assert!(!err.is_bad_url());
}
