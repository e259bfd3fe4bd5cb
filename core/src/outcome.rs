use serde::Serialize;
use thiserror::Error;

use crate::endpoint::Endpoint;
use crate::error::ConfigError;

/// Network-level reason a probe did not reach its endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProbeFailure {
    #[error("timed out")]
    Timeout,
    #[error("connection refused")]
    Refused,
    #[error("resolution failed: {0}")]
    Resolve(String),
    #[error("connection failed: {0}")]
    Connect(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProbeStatus {
    Reachable { latency_ms: u64 },
    Unreachable { reason: ProbeFailure },
}

/// Result of probing one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeOutcome {
    pub endpoint: Endpoint,
    pub status: ProbeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput_mbps: Option<f64>,
}

impl ProbeOutcome {
    pub fn reachable(endpoint: Endpoint, latency_ms: u64) -> Self {
        ProbeOutcome { endpoint, status: ProbeStatus::Reachable { latency_ms }, throughput_mbps: None }
    }

    pub fn unreachable(endpoint: Endpoint, reason: ProbeFailure) -> Self {
        ProbeOutcome { endpoint, status: ProbeStatus::Unreachable { reason }, throughput_mbps: None }
    }

    pub fn with_throughput(mut self, mbps: Option<f64>) -> Self {
        self.throughput_mbps = mbps.filter(|v| v.is_finite() && *v >= 0.0);
        self
    }

    pub fn is_reachable(&self) -> bool {
        matches!(self.status, ProbeStatus::Reachable { .. })
    }

    pub fn latency_ms(&self) -> Option<u64> {
        match self.status {
            ProbeStatus::Reachable { latency_ms } => Some(latency_ms),
            ProbeStatus::Unreachable { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&ProbeFailure> {
        match &self.status {
            ProbeStatus::Reachable { .. } => None,
            ProbeStatus::Unreachable { reason } => Some(reason),
        }
    }
}

/// Acceptance rule applied to outcomes before they are kept and ranked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    /// Inclusive latency ceiling.
    pub max_latency_ms: u64,
    /// When set, throughput is mandatory and must be at least this many Mbps.
    pub min_throughput_mbps: Option<f64>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds { max_latency_ms: 800, min_throughput_mbps: None }
    }
}

impl Thresholds {
    pub const DEFAULT_MIN_MBPS: f64 = 1.0;

    pub fn with_throughput(mut self, min_mbps: f64) -> Self {
        self.min_throughput_mbps = Some(min_mbps);
        self
    }

    pub fn throughput_mode(&self) -> bool {
        self.min_throughput_mbps.is_some()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_latency_ms == 0 {
            return Err(ConfigError::InvalidThreshold { name: "max_latency_ms", value: 0.0 });
        }
        if let Some(floor) = self.min_throughput_mbps {
            if !floor.is_finite() || floor <= 0.0 {
                return Err(ConfigError::InvalidThreshold { name: "min_throughput_mbps", value: floor });
            }
        }
        Ok(())
    }

    /// Whether the latency part of the rule holds; used to decide if a
    /// throughput measurement is worth taking.
    pub fn latency_ok(&self, outcome: &ProbeOutcome) -> bool {
        matches!(outcome.latency_ms(), Some(ms) if ms <= self.max_latency_ms)
    }

    pub fn qualifies(&self, outcome: &ProbeOutcome) -> bool {
        if !self.latency_ok(outcome) {
            return false;
        }
        match self.min_throughput_mbps {
            None => true,
            Some(floor) => matches!(outcome.throughput_mbps, Some(mbps) if mbps >= floor),
        }
    }
}
