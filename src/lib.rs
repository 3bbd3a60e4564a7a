//! `recipe-core`: the recipe-tree execution engine underneath a
//! multi-language refactoring tool.
//!
//! A [`Recipe`](recipe::Recipe) tree is applied to a batch of
//! [`SourceFile`](tree::SourceFile)s to a fixed point by the
//! [`Scheduler`](scheduler::Scheduler), and every resulting change is
//! attributed back to the recipe(s) responsible for it via markers
//! (`markers`) and surfaced as a [`RecipeResult`](result::RecipeResult).
//!
//! This crate does not parse any particular language, define the shape of
//! any particular lossless syntax tree, or provide a CLI — see the
//! `Tree`/`Parser` traits for the seams a concrete language integration
//! fills in, and `testing` for a zero-grammar reference implementation of
//! both.

pub mod context;
pub mod error;
pub mod markers;
pub mod metrics;
pub mod recipe;
pub mod result;
pub mod scheduler;
pub mod testing;
pub mod tree;
pub mod visit;

#[cfg(test)]
mod tests;

pub use context::ExecutionContext;
pub use error::EngineError;
pub use markers::{MarkerKind, MarkerValue, Markers};
pub use recipe::{Recipe, RecipeRef, RecipeStack, Validated};
pub use result::RecipeResult;
pub use scheduler::Scheduler;
pub use testing::Parser;
pub use tree::{FileId, SourceFile, Tree};
pub use visit::Visitor;

use std::sync::Arc;

/// The default cycle bounds used by [`run`]: `min_cycles` matches the
/// scheduler's requirement that at least one full pass always happens
/// before a fixed point is allowed to stop the run, and `max_cycles`
/// mirrors the fixing loop's own bound in the surrounding ecosystem's
/// incremental-fix engine.
pub const DEFAULT_MAX_CYCLES: usize = 10;
pub const DEFAULT_MIN_CYCLES: usize = 1;

/// Convenience entry point: run `root` over `files` using the default cycle
/// bounds. Equivalent to calling [`Scheduler::run`] directly when a caller
/// wants a different `max_cycles`/`min_cycles`.
pub fn run(
    root: Arc<dyn Recipe>,
    files: Vec<SourceFile>,
    ctx: &ExecutionContext,
) -> Result<Vec<RecipeResult>, EngineError> {
    Scheduler::run(root, files, ctx, DEFAULT_MAX_CYCLES, DEFAULT_MIN_CYCLES)
}
