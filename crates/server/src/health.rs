//! Health check surface.
//!
//! The rendezvous service answers `GET /health` on its signaling port with a
//! small JSON document. Connections are sniffed before the WebSocket upgrade:
//! anything that does not start with the health request line is handed to the
//! signaling handler untouched.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Request line prefix that selects the health endpoint.
pub const HEALTH_REQUEST_PREFIX: &[u8] = b"GET /health";

/// Path of the health endpoint.
pub const HEALTH_PATH: &str = "/health";

const SNIFF_ATTEMPTS: usize = 20;
const SNIFF_DELAY: Duration = Duration::from_millis(5);
const MAX_HEADER_LINES: usize = 100;

/// Service status reported by the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: String,
    pub peers: usize,
    pub rooms: usize,
    pub uptime_secs: u64,
}

impl HealthReport {
    /// Creates a report for a running service.
    pub fn ok(peers: usize, rooms: usize, uptime: Duration) -> Self {
        Self {
            status: "ok".to_string(),
            peers,
            rooms,
            uptime_secs: uptime.as_secs(),
        }
    }
}

/// Peeks at the start of a connection and reports whether it is a health query.
///
/// Does not consume any bytes.
pub async fn is_health_request(stream: &TcpStream) -> std::io::Result<bool> {
    let mut buf = [0u8; HEALTH_REQUEST_PREFIX.len()];

    for _ in 0..SNIFF_ATTEMPTS {
        let n = stream.peek(&mut buf).await?;
        if n == 0 || !HEALTH_REQUEST_PREFIX.starts_with(&buf[..n]) {
            return Ok(false);
        }
        if n == HEALTH_REQUEST_PREFIX.len() {
            return Ok(true);
        }
        // Partial request line, wait for the rest.
        tokio::time::sleep(SNIFF_DELAY).await;
    }

    Ok(false)
}

/// Reads the request head and writes the report as an HTTP response.
pub async fn respond(stream: TcpStream, report: &HealthReport) -> Result<()> {
    let mut reader = BufReader::new(stream);

    let mut line = String::new();
    for _ in 0..MAX_HEADER_LINES {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .await
            .context("Failed to read health request")?;
        if n == 0 || line == "\r\n" || line == "\n" {
            break;
        }
    }

    let body = serde_json::to_string(report).context("Failed to encode health report")?;
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );

    let mut stream = reader.into_inner();
    stream
        .write_all(response.as_bytes())
        .await
        .context("Failed to write health response")?;
    stream.shutdown().await.ok();
    Ok(())
}

/// Queries a running service's health endpoint.
///
/// `base_url` may use `ws`/`wss` or `http`/`https`; the scheme is mapped to
/// HTTP.
pub async fn fetch(base_url: &str, timeout: Duration) -> Result<HealthReport> {
    let url = health_url(base_url);
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Health request to {} failed", url))?
        .error_for_status()
        .with_context(|| format!("Health endpoint {} returned an error", url))?;

    response
        .json::<HealthReport>()
        .await
        .context("Failed to decode health report")
}

/// Builds the health endpoint URL from a service base URL.
pub fn health_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else if let Some(rest) = base.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else {
        base.to_string()
    };

    if base.ends_with(HEALTH_PATH) {
        base
    } else {
        format!("{}{}", base, HEALTH_PATH)
    }
}
