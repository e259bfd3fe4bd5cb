use crate::outcome::ProbeOutcome;

/// Receives scan progress. Called from the coordinator's collector task, not
/// from the thread that started the scan, so implementations marshal to
/// their own event loop if they need to.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, _completed: usize, _total: usize) {}
    fn on_result(&self, _outcome: &ProbeOutcome) {}
}

/// No-op sink.
pub struct SilentSink;

impl ProgressSink for SilentSink {}
