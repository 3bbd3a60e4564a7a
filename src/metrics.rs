use std::time::Duration;

/// The three emission points called out in §6: a batch-size distribution
/// per recipe run, a timer per per-file visit outcome, and a timer per
/// parse attempt. Metrics are best-effort (§6): a no-op sink is acceptable,
/// and the scheduler never lets a metrics call affect control flow.
pub trait MetricsSink: Send + Sync {
    fn record_batch_size(&self, recipe: &str, size: usize);
    fn record_visit(&self, recipe: &str, outcome: VisitOutcomeKind, elapsed: Duration);
    fn record_parse(&self, file_type: &str, success: bool, elapsed: Duration);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitOutcomeKind {
    Changed,
    Unchanged,
    Deleted,
    Skipped,
    Timeout,
    Error,
}

impl VisitOutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Changed => "changed",
            Self::Unchanged => "unchanged",
            Self::Deleted => "deleted",
            Self::Skipped => "skipped",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

/// The library default: discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record_batch_size(&self, _recipe: &str, _size: usize) {}
    fn record_visit(&self, _recipe: &str, _outcome: VisitOutcomeKind, _elapsed: Duration) {}
    fn record_parse(&self, _file_type: &str, _success: bool, _elapsed: Duration) {}
}

/// Re-emits every metric as a `tracing` event, so a consumer that has
/// already wired up `tracing-subscriber` gets telemetry without standing
/// up a separate pipeline — the same posture the surrounding engine takes
/// by instrumenting nearly every function and treating its span tree as
/// the primary observability surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record_batch_size(&self, recipe: &str, size: usize) {
        tracing::debug!(target: "recipe_core::metrics", metric = "recipe.run", recipe, size, "batch size");
    }

    fn record_visit(&self, recipe: &str, outcome: VisitOutcomeKind, elapsed: Duration) {
        tracing::debug!(
            target: "recipe_core::metrics",
            metric = "recipe.visit",
            recipe,
            outcome = outcome.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            "recipe visit"
        );
    }

    fn record_parse(&self, file_type: &str, success: bool, elapsed: Duration) {
        tracing::debug!(
            target: "recipe_core::metrics",
            metric = "parse",
            file_type,
            success,
            elapsed_ms = elapsed.as_millis() as u64,
            "parse"
        );
    }
}
