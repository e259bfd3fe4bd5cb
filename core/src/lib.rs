//! Core types shared by the sweep engine: endpoints, probe outcomes, error
//! taxonomy and the seams (prober, progress sink) the coordinator is built on.

pub mod endpoint;
pub mod error;
pub mod outcome;
pub mod probe;
pub mod progress;
pub mod ratelimiter;

pub use endpoint::{sanitize_label, Endpoint, ProtocolFamily, LABEL_MAX_CHARS, LABEL_PLACEHOLDER};
pub use error::{ConfigError, DecodeFailure};
pub use outcome::{ProbeFailure, ProbeOutcome, ProbeStatus, Thresholds};
pub use probe::Prober;
pub use progress::{ProgressSink, SilentSink};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
