use async_trait::async_trait;

use crate::endpoint::Endpoint;
use crate::outcome::ProbeOutcome;

/// Measures one endpoint. Implementations must be stateless with respect to
/// individual probes so a single instance can be shared by every worker.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Reachability and connect latency.
    async fn probe(&self, endpoint: &Endpoint) -> ProbeOutcome;

    /// Download throughput in Mbps, or `None` when no usable sample was taken.
    async fn measure_throughput(&self, _endpoint: &Endpoint) -> Option<f64> {
        None
    }
}
