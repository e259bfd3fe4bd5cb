use anyhow::Result;
use reqwest::Client;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Bulk-download endpoints tried in order; the first one that answers is used.
pub const DEFAULT_SPEED_URLS: &[&str] = &[
    "https://speed.cloudflare.com/__down?bytes=25000000",
    "http://speedtest.tele2.net/10MB.zip",
    "https://proof.ovh.net/files/10Mb.dat",
];

#[derive(Debug, Clone)]
pub struct ThroughputOptions {
    pub urls: Vec<String>,
    /// Stop reading after this many bytes.
    pub max_bytes: u64,
    /// Stop reading after this long, measured from the request.
    pub time_budget: Duration,
    /// Samples shorter than this are discarded as noise.
    pub min_sample: Duration,
    /// Samples slower than this are discarded. Separate from the
    /// qualification floor applied by the scan thresholds.
    pub min_mbps: f64,
    pub user_agent: String,
}

impl Default for ThroughputOptions {
    fn default() -> Self {
        ThroughputOptions {
            urls: DEFAULT_SPEED_URLS.iter().map(|s| s.to_string()).collect(),
            max_bytes: 15 * 1024 * 1024,
            time_budget: Duration::from_secs(12),
            min_sample: Duration::from_millis(800),
            min_mbps: 0.5,
            user_agent: format!("sweep/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Bytes read over a wall-clock interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl Sample {
    /// Megabits per second, rounded to one decimal.
    pub fn mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        let raw = (self.bytes as f64 * 8.0) / (secs * 1_000_000.0);
        (raw * 10.0).round() / 10.0
    }

    /// The throughput to report, or `None` if the sample is too short or too slow.
    pub fn evaluate(&self, opts: &ThroughputOptions) -> Option<f64> {
        if self.elapsed < opts.min_sample {
            debug!(elapsed_ms = self.elapsed.as_millis() as u64, "throughput sample too short");
            return None;
        }
        let mbps = self.mbps();
        if mbps < opts.min_mbps {
            debug!(mbps, floor = opts.min_mbps, "throughput below floor");
            return None;
        }
        Some(mbps)
    }
}

pub struct ThroughputProbe {
    client: Client,
    opts: ThroughputOptions,
}

impl ThroughputProbe {
    pub fn new(opts: ThroughputOptions) -> Result<Self> {
        // compression off so the byte count is what crossed the wire
        let client = Client::builder()
            .connect_timeout(opts.time_budget)
            .user_agent(opts.user_agent.clone())
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .build()?;
        Ok(ThroughputProbe { client, opts })
    }

    /// Try servers in order until one yields an acceptable sample.
    pub async fn measure(&self) -> Option<f64> {
        for url in &self.opts.urls {
            match self.sample(url).await {
                Ok(sample) => {
                    if let Some(mbps) = sample.evaluate(&self.opts) {
                        return Some(mbps);
                    }
                }
                Err(e) => debug!(%url, error = %e, "speed server unavailable"),
            }
        }
        warn!("no usable throughput sample from any speed server");
        None
    }

    async fn sample(&self, url: &str) -> Result<Sample> {
        let start = Instant::now();
        let deadline = start + self.opts.time_budget;
        let mut resp = timeout_at(deadline, self.client.get(url).send()).await??.error_for_status()?;

        let mut bytes = 0u64;
        loop {
            match timeout_at(deadline, resp.chunk()).await {
                Err(_) => break,
                Ok(Ok(Some(chunk))) => {
                    bytes += chunk.len() as u64;
                    if bytes >= self.opts.max_bytes {
                        break;
                    }
                }
                Ok(Ok(None)) => break,
                Ok(Err(e)) if bytes == 0 => return Err(e.into()),
                Ok(Err(_)) => break,
            }
        }
        Ok(Sample { bytes, elapsed: start.elapsed() })
    }
}
