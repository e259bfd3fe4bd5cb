//! Scan coordinator: decodes a batch of descriptor tokens, probes the
//! resulting endpoints with bounded concurrency and collects the outcomes
//! that meet the thresholds.
//!
//! Dispatch follows the usual semaphore-plus-channel shape: a dispatcher
//! task takes a permit per endpoint and spawns a worker, workers send their
//! outcome to a single collector which owns the run record. Cancellation
//! stops dispatch; probes already in flight finish and are still collected.

mod run;

pub use run::{RunState, ScanRun};

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sweep_core::ratelimiter::RateLimiter;
use sweep_core::{ConfigError, Endpoint, ProbeOutcome, Prober, ProgressSink, Thresholds};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_CONCURRENCY: usize = 100;
pub const MAX_CONCURRENCY: usize = 4096;

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Upper bound on probes in flight.
    pub concurrency: usize,
    pub thresholds: Thresholds,
    /// Optional cap on dispatches per second.
    pub qps: Option<u32>,
    /// Cancel the run automatically after this long.
    pub deadline: Option<Duration>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig { concurrency: DEFAULT_CONCURRENCY, thresholds: Thresholds::default(), qps: None, deadline: None }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::InvalidConcurrency { got: self.concurrency, max: MAX_CONCURRENCY });
        }
        if self.deadline == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidTimeout);
        }
        self.thresholds.validate()
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("a scan is already running")]
    AlreadyRunning,
    #[error("scan task aborted: {0}")]
    Aborted(String),
}

/// Live counters readable while a run is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub succeeded: usize,
    pub total: usize,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicUsize,
    succeeded: AtomicUsize,
}

/// Raises the cancel signal for one run. Cheap to clone and hand to a
/// signal handler.
#[derive(Clone, Debug)]
pub struct Canceller(Arc<watch::Sender<bool>>);

impl Canceller {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

#[derive(Debug)]
pub struct ScanHandle {
    run_id: Uuid,
    total: usize,
    counters: Arc<Counters>,
    cancel: Canceller,
    task: JoinHandle<ScanRun>,
}

impl ScanHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Stop dispatching new probes. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn canceller(&self) -> Canceller {
        self.cancel.clone()
    }

    pub fn progress(&self) -> Progress {
        Progress {
            completed: self.counters.completed.load(Ordering::SeqCst),
            succeeded: self.counters.succeeded.load(Ordering::SeqCst),
            total: self.total,
        }
    }

    pub async fn await_completion(self) -> Result<ScanRun, ScanError> {
        self.task.await.map_err(|e| ScanError::Aborted(e.to_string()))
    }
}

/// Runs one scan at a time against a shared prober.
pub struct Scanner {
    prober: Arc<dyn Prober>,
    state: Arc<AtomicU8>,
}

impl Scanner {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Scanner { prober, state: Arc::new(AtomicU8::new(RunState::Idle.as_u8())) }
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Validate, decode and start probing `tokens`. Returns as soon as the run
    /// is dispatched. Must be called from within a Tokio runtime.
    pub fn start_scan(
        &self,
        tokens: Vec<String>,
        config: ScanConfig,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<ScanHandle, ScanError> {
        config.validate()?;
        if tokens.iter().all(|t| t.trim().is_empty()) {
            return Err(ConfigError::EmptyInput.into());
        }
        let guard = StateGuard::acquire(&self.state)?;

        let mut seen = HashSet::new();
        let tokens: Vec<String> = tokens.into_iter().filter(|t| seen.insert(t.clone())).collect();
        let (endpoints, failures) = descriptor::parse_all(&tokens);
        for (token, err) in &failures {
            debug!(%token, error = %err, "dropping undecodable descriptor");
        }

        let run = ScanRun::new(tokens, endpoints.len(), failures.len(), config.thresholds);
        info!(
            run_id = %run.run_id,
            endpoints = endpoints.len(),
            decode_failures = failures.len(),
            concurrency = config.concurrency,
            "scan started"
        );

        let (cancel_tx, _) = watch::channel(false);
        let cancel = Canceller(Arc::new(cancel_tx));
        let counters = Arc::new(Counters::default());
        let run_id = run.run_id;
        let total = endpoints.len();

        let task = tokio::spawn(drive(
            Arc::clone(&self.prober),
            endpoints,
            config,
            sink,
            Arc::clone(&counters),
            cancel.clone(),
            run,
            guard,
        ));
        Ok(ScanHandle { run_id, total, counters, cancel, task })
    }

    /// Extract descriptors from free text, then [`Scanner::start_scan`].
    pub fn start_from_text(
        &self,
        text: &str,
        config: ScanConfig,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<ScanHandle, ScanError> {
        self.start_scan(link_extract::extract(text), config, sink)
    }

    /// Start a scan and wait for it to finish.
    pub async fn run(
        &self,
        tokens: Vec<String>,
        config: ScanConfig,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<ScanRun, ScanError> {
        self.start_scan(tokens, config, sink)?.await_completion().await
    }
}

/// Holds the scanner in `Running`; on drop it moves to the recorded final
/// state, or `Cancelled` if the run task died before finishing.
struct StateGuard {
    state: Arc<AtomicU8>,
    fin: RunState,
}

impl StateGuard {
    fn acquire(state: &Arc<AtomicU8>) -> Result<Self, ScanError> {
        let running = RunState::Running.as_u8();
        let mut current = state.load(Ordering::SeqCst);
        loop {
            if current == running {
                return Err(ScanError::AlreadyRunning);
            }
            match state.compare_exchange(current, running, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return Ok(StateGuard { state: Arc::clone(state), fin: RunState::Cancelled }),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Drop for StateGuard {
    fn drop(&mut self) {
        self.state.store(self.fin.as_u8(), Ordering::SeqCst);
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive(
    prober: Arc<dyn Prober>,
    endpoints: Vec<Endpoint>,
    config: ScanConfig,
    sink: Arc<dyn ProgressSink>,
    counters: Arc<Counters>,
    cancel: Canceller,
    mut run: ScanRun,
    mut guard: StateGuard,
) -> ScanRun {
    let total = endpoints.len();
    let thresholds = config.thresholds;
    let (tx, mut rx) = mpsc::channel::<ProbeOutcome>(config.concurrency);

    let deadline = config.deadline.map(|after| {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            debug!("scan deadline reached");
            cancel.cancel();
        })
    });
    let dispatcher = tokio::spawn(dispatch(prober, endpoints, config, tx, cancel.0.subscribe()));

    while let Some(outcome) = rx.recv().await {
        let completed = counters.completed.fetch_add(1, Ordering::SeqCst) + 1;
        sink.on_result(&outcome);
        if thresholds.qualifies(&outcome) {
            counters.succeeded.fetch_add(1, Ordering::SeqCst);
            run.record(outcome);
        }
        sink.on_progress(completed, total);
    }

    if let Some(task) = deadline {
        task.abort();
    }
    run.dispatched = match dispatcher.await {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "dispatcher failed");
            counters.completed.load(Ordering::SeqCst)
        }
    };
    run.completed = counters.completed.load(Ordering::SeqCst);
    if run.dispatched < total {
        debug!(dispatched = run.dispatched, total, "dispatch stopped early");
    }

    let state = if *cancel.0.borrow() { RunState::Cancelled } else { RunState::Completed };
    run.finish(state);
    guard.fin = state;
    info!(
        run_id = %run.run_id,
        state = ?state,
        completed = run.completed,
        succeeded = run.succeeded,
        "scan finished"
    );
    run
}

/// Hand endpoints to workers until the list runs out or the run is
/// cancelled. Returns how many were dispatched.
async fn dispatch(
    prober: Arc<dyn Prober>,
    endpoints: Vec<Endpoint>,
    config: ScanConfig,
    tx: mpsc::Sender<ProbeOutcome>,
    mut cancel: watch::Receiver<bool>,
) -> usize {
    let sem = Arc::new(Semaphore::new(config.concurrency));
    let pacer = config.qps.map(RateLimiter::new);
    let thresholds = config.thresholds;
    let mut dispatched = 0usize;

    for endpoint in endpoints {
        if *cancel.borrow() {
            break;
        }
        let permit = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break,
            permit = Arc::clone(&sem).acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };
        if let Some(pacer) = &pacer {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => break,
                _ = pacer.acquire() => {}
            }
        }

        let prober = Arc::clone(&prober);
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut outcome = prober.probe(&endpoint).await;
            if thresholds.throughput_mode() && thresholds.latency_ok(&outcome) {
                let mbps = prober.measure_throughput(&endpoint).await;
                outcome = outcome.with_throughput(mbps);
            }
            let _ = tx.send(outcome).await;
            drop(permit);
        });
        dispatched += 1;
    }
    dispatched
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use sweep_core::{ProbeFailure, ProtocolFamily, SilentSink};

    /// Answers from a host table after a fixed delay; unknown hosts time out.
    #[derive(Default)]
    struct FakeProber {
        latency: HashMap<String, u64>,
        throughput: Option<f64>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, endpoint: &Endpoint) -> ProbeOutcome {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match self.latency.get(endpoint.host()) {
                Some(ms) => ProbeOutcome::reachable(endpoint.clone(), *ms),
                None => ProbeOutcome::unreachable(endpoint.clone(), ProbeFailure::Timeout),
            }
        }

        async fn measure_throughput(&self, _endpoint: &Endpoint) -> Option<f64> {
            self.throughput
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        progress: Mutex<Vec<(usize, usize)>>,
        results: AtomicUsize,
    }

    impl ProgressSink for RecordingSink {
        fn on_progress(&self, completed: usize, total: usize) {
            self.progress.lock().unwrap().push((completed, total));
        }

        fn on_result(&self, _outcome: &ProbeOutcome) {
            self.results.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn trojan(host: &str) -> String {
        format!("trojan://pw@{host}:443#{host}")
    }

    fn fast_hosts(n: usize, ms: u64) -> (Vec<String>, HashMap<String, u64>) {
        let mut tokens = Vec::new();
        let mut table = HashMap::new();
        for i in 0..n {
            let host = format!("h{i}.example");
            tokens.push(trojan(&host));
            table.insert(host, ms);
        }
        (tokens, table)
    }

    fn silent() -> Arc<dyn ProgressSink> {
        Arc::new(SilentSink)
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let scanner = Scanner::new(Arc::new(FakeProber::default()));
        let err = scanner.run(vec![], ScanConfig::default(), silent()).await.unwrap_err();
        assert!(matches!(err, ScanError::Config(ConfigError::EmptyInput)));
        assert_eq!(scanner.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn concurrency_out_of_range_is_rejected() {
        let scanner = Scanner::new(Arc::new(FakeProber::default()));
        for bad in [0, MAX_CONCURRENCY + 1] {
            let cfg = ScanConfig { concurrency: bad, ..Default::default() };
            let err = scanner.run(vec![trojan("a")], cfg, silent()).await.unwrap_err();
            assert!(matches!(err, ScanError::Config(ConfigError::InvalidConcurrency { .. })));
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_completes_empty() {
        let scanner = Scanner::new(Arc::new(FakeProber::default()));
        let run = scanner.run(vec![trojan("down.example")], ScanConfig::default(), silent()).await.unwrap();
        assert_eq!(run.state, RunState::Completed);
        assert_eq!(run.completed, 1);
        assert_eq!(run.succeeded, 0);
        assert!(run.outcomes.is_empty());
        assert!(run.finished_at.is_some());
        assert_eq!(scanner.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn undecodable_tokens_are_counted_not_probed() {
        let (mut tokens, table) = fast_hosts(50, 50);
        for i in 0..50 {
            tokens.push(format!("vmess://not-base64-{i}!!"));
        }
        let prober = FakeProber { latency: table, ..Default::default() };
        let scanner = Scanner::new(Arc::new(prober));
        let run = scanner.run(tokens, ScanConfig::default(), silent()).await.unwrap();
        assert_eq!(run.tokens.len(), 100);
        assert_eq!(run.total, 50);
        assert_eq!(run.decode_failures, 50);
        assert_eq!(run.completed, 50);
        assert_eq!(run.succeeded, 50);
        assert_eq!(run.outcomes[&ProtocolFamily::Trojan].len(), 50);
    }

    #[tokio::test]
    async fn latency_ceiling_is_inclusive() {
        let mut table = HashMap::new();
        table.insert("edge".to_string(), 800);
        table.insert("over".to_string(), 801);
        let scanner = Scanner::new(Arc::new(FakeProber { latency: table, ..Default::default() }));
        let run = scanner.run(vec![trojan("edge"), trojan("over")], ScanConfig::default(), silent()).await.unwrap();
        let kept: Vec<_> = run.qualifying().map(|o| o.endpoint.host().to_string()).collect();
        assert_eq!(kept, vec!["edge"]);
    }

    #[tokio::test]
    async fn duplicates_are_probed_once() {
        let (tokens, table) = fast_hosts(3, 10);
        let mut doubled = tokens.clone();
        doubled.extend(tokens);
        let sink = Arc::new(RecordingSink::default());
        let scanner = Scanner::new(Arc::new(FakeProber { latency: table, ..Default::default() }));
        let run = scanner.run(doubled, ScanConfig::default(), sink.clone()).await.unwrap();
        assert_eq!(run.tokens.len(), 3);
        assert_eq!(sink.results.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn concurrency_bound_is_respected() {
        let (tokens, table) = fast_hosts(20, 10);
        let prober = Arc::new(FakeProber { latency: table, delay: Duration::from_millis(20), ..Default::default() });
        let scanner = Scanner::new(prober.clone());
        let cfg = ScanConfig { concurrency: 3, ..Default::default() };
        let run = scanner.run(tokens, cfg, silent()).await.unwrap();
        assert_eq!(run.completed, 20);
        let peak = prober.peak.load(Ordering::SeqCst);
        assert!(peak <= 3 && peak >= 1, "peak {peak}");
    }

    #[tokio::test]
    async fn progress_is_reported_per_result() {
        let (tokens, table) = fast_hosts(5, 10);
        let sink = Arc::new(RecordingSink::default());
        let scanner = Scanner::new(Arc::new(FakeProber { latency: table, ..Default::default() }));
        scanner.run(tokens, ScanConfig::default(), sink.clone()).await.unwrap();
        let seen = sink.progress.lock().unwrap().clone();
        assert_eq!(seen, (1..=5).map(|n| (n, 5)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn second_scan_while_running_is_rejected() {
        let (tokens, table) = fast_hosts(4, 10);
        let prober = FakeProber { latency: table, delay: Duration::from_millis(100), ..Default::default() };
        let scanner = Scanner::new(Arc::new(prober));
        let handle = scanner.start_scan(tokens.clone(), ScanConfig::default(), silent()).unwrap();
        assert_eq!(scanner.state(), RunState::Running);
        assert!(format!("{handle:?}").starts_with("ScanHandle"));
        let err = scanner.start_scan(tokens.clone(), ScanConfig::default(), silent()).unwrap_err();
        assert!(matches!(err, ScanError::AlreadyRunning));
        handle.await_completion().await.unwrap();
        // finished runs release the scanner
        let again = scanner.run(tokens, ScanConfig::default(), silent()).await.unwrap();
        assert_eq!(again.state, RunState::Completed);
    }

    #[tokio::test]
    async fn cancel_stops_dispatch_and_keeps_in_flight_results() {
        let (tokens, table) = fast_hosts(50, 10);
        let prober = FakeProber { latency: table, delay: Duration::from_millis(50), ..Default::default() };
        let scanner = Scanner::new(Arc::new(prober));
        let cfg = ScanConfig { concurrency: 2, ..Default::default() };
        let handle = scanner.start_scan(tokens, cfg, silent()).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.cancel();
        handle.cancel();
        let run = handle.await_completion().await.unwrap();
        assert_eq!(run.state, RunState::Cancelled);
        assert!(run.is_cancelled());
        assert!(run.dispatched < 50);
        assert_eq!(run.completed, run.dispatched);
        assert_eq!(run.succeeded, run.completed);
        assert_eq!(scanner.state(), RunState::Cancelled);
    }

    #[tokio::test]
    async fn deadline_cancels_the_run() {
        let (tokens, table) = fast_hosts(40, 10);
        let prober = FakeProber { latency: table, delay: Duration::from_millis(50), ..Default::default() };
        let scanner = Scanner::new(Arc::new(prober));
        let cfg = ScanConfig { concurrency: 1, deadline: Some(Duration::from_millis(80)), ..Default::default() };
        let run = scanner.run(tokens, cfg, silent()).await.unwrap();
        assert_eq!(run.state, RunState::Cancelled);
        assert!(run.completed < 40);
    }

    #[tokio::test]
    async fn throughput_mode_requires_a_measurement() {
        let (tokens, table) = fast_hosts(2, 10);
        let cfg = ScanConfig { thresholds: Thresholds::default().with_throughput(1.0), ..Default::default() };

        let metered = FakeProber { latency: table.clone(), throughput: Some(5.0), ..Default::default() };
        let run = Scanner::new(Arc::new(metered)).run(tokens.clone(), cfg.clone(), silent()).await.unwrap();
        assert_eq!(run.succeeded, 2);
        assert!(run.qualifying().all(|o| o.throughput_mbps == Some(5.0)));

        let unmetered = FakeProber { latency: table, throughput: None, ..Default::default() };
        let run = Scanner::new(Arc::new(unmetered)).run(tokens, cfg, silent()).await.unwrap();
        assert_eq!(run.completed, 2);
        assert_eq!(run.succeeded, 0);
    }

    #[tokio::test]
    async fn handle_reports_progress() {
        let (tokens, table) = fast_hosts(3, 10);
        let scanner = Scanner::new(Arc::new(FakeProber { latency: table, ..Default::default() }));
        let handle = scanner.start_scan(tokens, ScanConfig::default(), silent()).unwrap();
        assert_eq!(handle.progress().total, 3);
        let id = handle.run_id();
        let run = handle.await_completion().await.unwrap();
        assert_eq!(run.run_id, id);
    }

    #[tokio::test]
    async fn scans_text_with_a_real_prober() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = {
            let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let text = format!(
            "notes\ntrojan://pw@127.0.0.1:{open}#open\nvless://id@127.0.0.1:{closed}#closed\n"
        );
        let prober = probe::TcpProber::new(probe::ProbeOptions::default());
        let scanner = Scanner::new(Arc::new(prober));
        let run = scanner.start_from_text(&text, ScanConfig::default(), silent()).unwrap().await_completion().await.unwrap();
        assert_eq!(run.completed, 2);
        let kept: Vec<_> = run.qualifying().map(|o| o.endpoint.label().to_string()).collect();
        assert_eq!(kept, vec!["open"]);
    }
}
