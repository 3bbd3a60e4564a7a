use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use dashmap::DashMap;

use crate::{
    error::EngineError,
    metrics::{MetricsSink, NoopMetricsSink},
};

/// Per-run scratchpad (§3). Recipes communicate across cycles through
/// `messages`; the scheduler consults `run_timeout`/`panic` on every
/// per-file apply, and reports failures through `on_error`/`on_timeout`.
///
/// `messages` is a `DashMap<String, serde_json::Value>` rather than a
/// generic `Any` bag: recipes in this engine are expected to pass along
/// JSON-shaped data (counters, accumulated lists, flags), and
/// `serde_json::Value` is already the lingua franca the rest of the
/// surrounding ecosystem uses for "arbitrary structured value" — no
/// downcasting required on the read side.
pub struct ExecutionContext {
    messages: DashMap<String, serde_json::Value>,
    dirty: AtomicBool,
    panic: AtomicBool,
    on_error: Box<dyn Fn(EngineError) + Send + Sync>,
    on_timeout: Box<dyn Fn(&EngineError) + Send + Sync>,
    run_timeout: Box<dyn Fn(usize) -> Duration + Send + Sync>,
    metrics: std::sync::Arc<dyn MetricsSink>,
}

/// Well-known message key for the cooperative panic flag mentioned in §6
/// ("`message(PANIC)`"). The engine also exposes a dedicated
/// `is_panicking`/`set_panic` fast path (backed by its own `AtomicBool`)
/// since every `per_file_apply` call reads it; `PANIC_MESSAGE_KEY` exists
/// so a recipe that prefers to go through the generic message map can
/// still observe the same state.
pub const PANIC_MESSAGE_KEY: &str = "panic";

impl ExecutionContext {
    pub fn builder() -> ExecutionContextBuilder {
        ExecutionContextBuilder::default()
    }

    pub fn message(&self, key: &str) -> Option<serde_json::Value> {
        self.messages.get(key).map(|entry| entry.value().clone())
    }

    pub fn set_message(&self, key: impl Into<String>, value: serde_json::Value) {
        self.messages.insert(key.into(), value);
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_panicking(&self) -> bool {
        self.panic.load(Ordering::SeqCst)
    }

    pub fn set_panic(&self) {
        self.panic.store(true, Ordering::SeqCst);
        self.set_message(PANIC_MESSAGE_KEY, serde_json::Value::Bool(true));
    }

    pub fn on_error(&self, error: EngineError) {
        (self.on_error)(error)
    }

    pub fn on_timeout(&self, error: &EngineError) {
        (self.on_timeout)(error)
    }

    pub fn run_timeout(&self, n_files: usize) -> Duration {
        (self.run_timeout)(n_files)
    }

    pub fn metrics(&self) -> &std::sync::Arc<dyn MetricsSink> {
        &self.metrics
    }

    fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }
}

/// Wraps an `ExecutionContext` and records whether any message write
/// occurred since the last reset (§3 "Watch-wrapped context"). The cycle
/// loop uses this, alongside file-list reference equality, to decide
/// whether a recipe "requested another pass."
pub struct Watch<'a> {
    ctx: &'a ExecutionContext,
}

impl<'a> Watch<'a> {
    pub fn new(ctx: &'a ExecutionContext) -> Self {
        ctx.dirty.store(false, Ordering::SeqCst);
        Self { ctx }
    }

    pub fn ctx(&self) -> &'a ExecutionContext {
        self.ctx
    }

    /// True iff a message was written since the last `reset`.
    pub fn has_new_messages(&self) -> bool {
        self.ctx.dirty.load(Ordering::SeqCst)
    }

    /// Clears the dirty flag, starting a fresh observation window for the
    /// next cycle.
    pub fn reset(&self) {
        self.ctx.take_dirty();
    }
}

pub struct ExecutionContextBuilder {
    on_error: Option<Box<dyn Fn(EngineError) + Send + Sync>>,
    on_timeout: Option<Box<dyn Fn(&EngineError) + Send + Sync>>,
    run_timeout: Option<Box<dyn Fn(usize) -> Duration + Send + Sync>>,
    metrics: Option<std::sync::Arc<dyn MetricsSink>>,
}

impl Default for ExecutionContextBuilder {
    fn default() -> Self {
        Self {
            on_error: None,
            on_timeout: None,
            run_timeout: None,
            metrics: None,
        }
    }
}

impl ExecutionContextBuilder {
    pub fn on_error(mut self, f: impl Fn(EngineError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_timeout(mut self, f: impl Fn(&EngineError) + Send + Sync + 'static) -> Self {
        self.on_timeout = Some(Box::new(f));
        self
    }

    pub fn run_timeout(mut self, f: impl Fn(usize) -> Duration + Send + Sync + 'static) -> Self {
        self.run_timeout = Some(Box::new(f));
        self
    }

    pub fn metrics(mut self, metrics: std::sync::Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> ExecutionContext {
        ExecutionContext {
            messages: DashMap::new(),
            dirty: AtomicBool::new(false),
            panic: AtomicBool::new(false),
            on_error: self.on_error.unwrap_or_else(|| Box::new(|_| {})),
            on_timeout: self.on_timeout.unwrap_or_else(|| Box::new(|_| {})),
            run_timeout: self
                .run_timeout
                .unwrap_or_else(|| Box::new(|_| Duration::from_secs(60))),
            metrics: self.metrics.unwrap_or_else(|| std::sync::Arc::new(NoopMetricsSink)),
        }
    }
}
