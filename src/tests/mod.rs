mod scenarios;

use std::sync::Arc;

use crate::{
    context::ExecutionContext,
    metrics::NoopMetricsSink,
    recipe::{Recipe, Validated},
    testing::{file, RecordingErrorSink},
    tree::SourceFile,
    visit::{FnVisitor, Visitor},
};

/// Installs a `tracing` subscriber the first time it's called so that
/// `cargo test -- --nocapture` shows the span tree for the scheduler's
/// `#[instrument]`ed functions; harmless (and a no-op) on later calls.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub(crate) fn test_ctx() -> (ExecutionContext, Arc<RecordingErrorSink>) {
    let errors = RecordingErrorSink::new();
    let errors_for_closure = errors.clone();
    let ctx = ExecutionContext::builder()
        .on_error(move |error| errors_for_closure.record(error))
        .metrics(Arc::new(NoopMetricsSink))
        .build();
    (ctx, errors)
}

/// A recipe whose per-file visitor and whole-batch step are both supplied
/// as closures, for tests that don't want to declare a named type per case.
pub(crate) struct ClosureRecipe<V, W> {
    pub name: &'static str,
    pub visitor: Arc<V>,
    pub whole_batch: W,
    pub children: Vec<Arc<dyn Recipe>>,
}

impl<V, W> ClosureRecipe<V, W>
where
    V: Visitor + 'static,
    W: Fn(Vec<SourceFile>, &ExecutionContext) -> Vec<SourceFile> + Send + Sync,
{
    pub fn identity(name: &'static str, visitor: V) -> ClosureRecipe<V, fn(Vec<SourceFile>, &ExecutionContext) -> Vec<SourceFile>> {
        ClosureRecipe {
            name,
            visitor: Arc::new(visitor),
            whole_batch: |files, _ctx| files,
            children: Vec::new(),
        }
    }
}

impl<V, W> Recipe for ClosureRecipe<V, W>
where
    V: Visitor + 'static,
    W: Fn(Vec<SourceFile>, &ExecutionContext) -> Vec<SourceFile> + Send + Sync,
{
    fn display_name(&self) -> &str {
        self.name
    }

    fn visitor(&self) -> Arc<dyn Visitor> {
        self.visitor.clone()
    }

    fn visit(&self, files: Vec<SourceFile>, ctx: &ExecutionContext) -> Vec<SourceFile> {
        (self.whole_batch)(files, ctx)
    }

    fn children(&self) -> Vec<Arc<dyn Recipe>> {
        self.children.clone()
    }
}

pub(crate) fn no_op_recipe(name: &'static str) -> Arc<dyn Recipe> {
    Arc::new(ClosureRecipe::identity(name, FnVisitor(|f: &SourceFile, _ctx: &ExecutionContext| Some(f.clone()))))
}

pub(crate) fn panicking_recipe(name: &'static str) -> Arc<dyn Recipe> {
    Arc::new(ClosureRecipe::identity(
        name,
        FnVisitor(|_f: &SourceFile, _ctx: &ExecutionContext| panic!("boom")),
    ))
}

pub(crate) fn invalid_recipe(name: &'static str) -> Arc<dyn Recipe> {
    struct Invalid(&'static str);
    impl Recipe for Invalid {
        fn display_name(&self) -> &str {
            self.0
        }
        fn validate(&self, _ctx: &ExecutionContext) -> Validated {
            Validated::invalid("always invalid")
        }
        fn visitor(&self) -> Arc<dyn Visitor> {
            Arc::new(FnVisitor(|_: &SourceFile, _: &ExecutionContext| {
                panic!("should never be called on an invalid recipe")
            }))
        }
    }
    Arc::new(Invalid(name))
}

pub(crate) fn one_file() -> Vec<SourceFile> {
    vec![file("a.txt", "hello")]
}
