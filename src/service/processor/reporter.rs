/// Receives `{current, total}` progress snapshots from a running analysis.
pub trait ProgressSink: Send + Sync {
    fn report(&self, current: i64, total: i64);
}

/// Discards progress; used when a run has no observer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _current: i64, _total: i64) {}
}
