//! TCP connect latency probe with timeouts and retries, plus an optional
//! download throughput sample.

mod throughput;

pub use throughput::{Sample, ThroughputOptions, ThroughputProbe, DEFAULT_SPEED_URLS};

use async_trait::async_trait;
use rand::{thread_rng, Rng};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use sweep_core::{Endpoint, ProbeFailure, ProbeOutcome, Prober};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Budget for resolution plus connect, per attempt.
    pub timeout: Duration,
    /// Extra attempts after a timeout or connection error.
    pub retries: u32,
    /// Base delay for exponential backoff between attempts.
    pub retry_delay: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        ProbeOptions { timeout: DEFAULT_TIMEOUT, retries: 0, retry_delay: Duration::from_millis(50) }
    }
}

/// Probes endpoints with a plain TCP handshake. No bytes are exchanged.
pub struct TcpProber {
    opts: ProbeOptions,
    throughput: Option<ThroughputProbe>,
}

impl TcpProber {
    pub fn new(opts: ProbeOptions) -> Self {
        TcpProber { opts, throughput: None }
    }

    pub fn with_throughput(mut self, probe: ThroughputProbe) -> Self {
        self.throughput = Some(probe);
        self
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, endpoint: &Endpoint) -> ProbeOutcome {
        let mut attempts = 0u32;
        loop {
            match connect_latency(endpoint.host(), endpoint.port(), self.opts.timeout).await {
                Ok(ms) => {
                    debug!(host = endpoint.host(), port = endpoint.port(), latency_ms = ms, "reachable");
                    return ProbeOutcome::reachable(endpoint.clone(), ms);
                }
                Err(reason @ ProbeFailure::Resolve(_)) => {
                    debug!(host = endpoint.host(), %reason, "unreachable");
                    return ProbeOutcome::unreachable(endpoint.clone(), reason);
                }
                Err(reason) if attempts >= self.opts.retries => {
                    debug!(host = endpoint.host(), port = endpoint.port(), %reason, attempts, "unreachable");
                    return ProbeOutcome::unreachable(endpoint.clone(), reason);
                }
                Err(_) => {
                    attempts += 1;
                    tokio::time::sleep(backoff(self.opts.retry_delay, attempts)).await;
                }
            }
        }
    }

    async fn measure_throughput(&self, endpoint: &Endpoint) -> Option<f64> {
        let probe = self.throughput.as_ref()?;
        let mbps = probe.measure().await;
        debug!(host = endpoint.host(), ?mbps, "throughput sample");
        mbps
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    let base = base.as_millis() as u64;
    let exp = base.saturating_mul(1u64 << attempt.min(6));
    let jitter = thread_rng().gen_range(0..=exp / 4);
    Duration::from_millis(exp + jitter)
}

/// Resolve `host` and time a TCP connect to it. The whole operation shares
/// one `limit`; the latency clock starts after resolution, right before the
/// first connect attempt. The connection is dropped as soon as it opens.
pub async fn connect_latency(host: &str, port: u16, limit: Duration) -> Result<u64, ProbeFailure> {
    let deadline = Instant::now() + limit;
    let addrs: Vec<SocketAddr> = match timeout_at(deadline, lookup_host((host, port))).await {
        Err(_) => return Err(ProbeFailure::Timeout),
        Ok(Err(e)) => return Err(ProbeFailure::Resolve(e.to_string())),
        Ok(Ok(it)) => it.collect(),
    };
    if addrs.is_empty() {
        return Err(ProbeFailure::Resolve(format!("no addresses for {host}")));
    }

    let started = Instant::now();
    let mut last_err = None;
    for addr in addrs {
        match timeout_at(deadline, TcpStream::connect(addr)).await {
            Err(_) => return Err(ProbeFailure::Timeout),
            Ok(Ok(stream)) => {
                drop(stream);
                return Ok(started.elapsed().as_millis() as u64);
            }
            Ok(Err(e)) => last_err = Some(e),
        }
    }
    Err(classify(last_err))
}

fn classify(err: Option<io::Error>) -> ProbeFailure {
    match err {
        Some(e) if e.kind() == io::ErrorKind::ConnectionRefused => ProbeFailure::Refused,
        Some(e) if e.kind() == io::ErrorKind::TimedOut => ProbeFailure::Timeout,
        Some(e) => ProbeFailure::Connect(e.to_string()),
        None => ProbeFailure::Connect("no address attempted".into()),
    }
}
