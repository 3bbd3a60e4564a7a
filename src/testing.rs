//! A minimal reference `Tree`/parser pair, analogous to the reference
//! engine's `rule_tester` module: a zero-grammar way to build `SourceFile`s
//! and assert on their printed output, for this crate's own test suite and
//! for downstream crates unit-testing recipes without a real language
//! parser.
//!
//! This is *not* one of the "concrete parsers (one per source language)"
//! that §1 puts out of scope — it carries no grammar, understands no
//! syntax, and exists purely to exercise the scheduler, result builder, and
//! attribution logic end to end.

use std::{path::Path, sync::Arc, time::Instant};

use crate::{
    context::ExecutionContext,
    error::EngineError,
    metrics::MetricsSink,
    tree::{SourceFile, Tree},
};

/// A tree that is just its own source text, printed losslessly by
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextTree(pub String);

impl TextTree {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn text(&self) -> &str {
        &self.0
    }
}

impl Tree for TextTree {
    fn print(&self, out: &mut String) {
        out.push_str(&self.0);
    }
}

/// Builds a `SourceFile` directly from a path and text, without going
/// through `Parser::parse_inputs` — the common case in unit tests that
/// only care about what a recipe does to an already-parsed file.
pub fn file(path: impl Into<std::path::PathBuf>, text: impl Into<String>) -> SourceFile {
    SourceFile::new(path, Arc::new(TextTree::new(text)))
}

/// The Parser interface (§6): `accept(path) -> bool`,
/// `parse_inputs(sources, relative_to, ctx) -> [SourceFile]`. Parse errors
/// are reported via `ctx.on_error` and the offending input is omitted
/// (§6: "On error, parsers must invoke `ctx.on_error` and omit the failing
/// file").
pub trait Parser: Send + Sync {
    fn accept(&self, path: &Path) -> bool;

    fn parse_inputs(
        &self,
        sources: Vec<(std::path::PathBuf, String)>,
        relative_to: &Path,
        ctx: &ExecutionContext,
    ) -> Vec<SourceFile>;
}

/// The reference implementation: accepts every path, never fails to parse
/// (there's no grammar to fail against), and builds a fresh-id
/// `SourceFile` per input, wrapping its text in a `TextTree`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextParser;

impl Parser for PlainTextParser {
    fn accept(&self, _path: &Path) -> bool {
        true
    }

    fn parse_inputs(
        &self,
        sources: Vec<(std::path::PathBuf, String)>,
        relative_to: &Path,
        ctx: &ExecutionContext,
    ) -> Vec<SourceFile> {
        let start = Instant::now();
        let files = sources
            .into_iter()
            .map(|(path, text)| {
                let logical_path = path.strip_prefix(relative_to).unwrap_or(&path).to_path_buf();
                file(logical_path, text)
            })
            .collect::<Vec<_>>();
        ctx.metrics().record_parse("text", true, start.elapsed());
        files
    }
}

/// An `on_error` sink used by tests that want to assert on what errors were
/// reported without wiring up a real logger.
#[derive(Default)]
pub struct RecordingErrorSink(std::sync::Mutex<Vec<String>>);

impl RecordingErrorSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn errors(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn record(&self, error: EngineError) {
        self.0.lock().unwrap().push(error.to_string());
    }
}

/// A no-op `MetricsSink` that also records every call, for tests that want
/// to assert specific metrics fired (e.g. exactly one timeout).
#[derive(Default)]
pub struct RecordingMetricsSink {
    pub visits: std::sync::Mutex<Vec<(String, crate::metrics::VisitOutcomeKind)>>,
}

impl RecordingMetricsSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl MetricsSink for RecordingMetricsSink {
    fn record_batch_size(&self, _recipe: &str, _size: usize) {}

    fn record_visit(&self, recipe: &str, outcome: crate::metrics::VisitOutcomeKind, _elapsed: std::time::Duration) {
        self.visits.lock().unwrap().push((recipe.to_string(), outcome));
    }

    fn record_parse(&self, _file_type: &str, _success: bool, _elapsed: std::time::Duration) {}
}
