use serde::Serialize;
use std::collections::BTreeMap;
use sweep_core::{ProbeOutcome, ProtocolFamily, Thresholds};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}

/// Lifecycle of a scanner: `Idle -> Running -> {Completed, Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

impl RunState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            RunState::Idle => 0,
            RunState::Running => 1,
            RunState::Completed => 2,
            RunState::Cancelled => 3,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => RunState::Running,
            2 => RunState::Completed,
            3 => RunState::Cancelled,
            _ => RunState::Idle,
        }
    }
}

/// Everything one scan produced. Handed to the caller once the run is over.
///
/// Outcomes are grouped by family in completion order, which depends on
/// network timing and differs between runs; rank them for a stable order.
#[derive(Debug, Clone, Serialize)]
pub struct ScanRun {
    pub run_id: Uuid,
    pub state: RunState,
    /// Unique input tokens in first-seen order.
    pub tokens: Vec<String>,
    /// Endpoints that decoded and were eligible for probing.
    pub total: usize,
    pub dispatched: usize,
    pub completed: usize,
    /// Probes that met the thresholds.
    pub succeeded: usize,
    pub decode_failures: usize,
    pub thresholds: Thresholds,
    pub outcomes: BTreeMap<ProtocolFamily, Vec<ProbeOutcome>>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

impl ScanRun {
    pub(crate) fn new(tokens: Vec<String>, total: usize, decode_failures: usize, thresholds: Thresholds) -> Self {
        ScanRun {
            run_id: Uuid::now_v7(),
            state: RunState::Running,
            tokens,
            total,
            dispatched: 0,
            completed: 0,
            succeeded: 0,
            decode_failures,
            thresholds,
            outcomes: BTreeMap::new(),
            started_at: now_rfc3339(),
            finished_at: None,
        }
    }

    pub(crate) fn record(&mut self, outcome: ProbeOutcome) {
        self.succeeded += 1;
        self.outcomes.entry(outcome.endpoint.family()).or_default().push(outcome);
    }

    pub(crate) fn finish(&mut self, state: RunState) {
        self.state = state;
        self.finished_at = Some(now_rfc3339());
    }

    /// All kept outcomes, family by family.
    pub fn qualifying(&self) -> impl Iterator<Item = &ProbeOutcome> {
        self.outcomes.values().flatten()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == RunState::Cancelled
    }
}
