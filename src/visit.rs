use std::sync::Arc;

use crate::{context::ExecutionContext, tree::SourceFile};

/// A traversal over a `SourceFile` that may or may not produce a new value.
///
/// The three possible outcomes collapse OpenRewrite's "identity vs. new
/// value vs. null" three-way split (§4.3) into a single `Option`:
///
/// - `None` — the file is deleted.
/// - `Some(x)` where `SourceFile::same_instance(&x, input)` — unchanged.
/// - `Some(x)` otherwise — replaced by `x`.
///
/// This identity contract is load-bearing (§4.1): it is the *only* signal
/// the scheduler and the applicability predicates use to decide whether a
/// visit changed anything.
pub trait Visitor: Send + Sync {
    fn visit(&self, file: &SourceFile, ctx: &ExecutionContext) -> Option<SourceFile>;
}

/// A visitor that always returns its input unchanged. Useful as a recipe's
/// `visitor()` when all the work happens in `Recipe::visit` (the
/// whole-batch step) instead, and as the base case in tests.
pub struct IdentityVisitor;

impl Visitor for IdentityVisitor {
    fn visit(&self, file: &SourceFile, _ctx: &ExecutionContext) -> Option<SourceFile> {
        Some(file.clone())
    }
}

/// Wraps a plain closure as a `Visitor`, for recipes whose edit doesn't
/// warrant a whole named type.
pub struct FnVisitor<F>(pub F)
where
    F: Fn(&SourceFile, &ExecutionContext) -> Option<SourceFile> + Send + Sync;

impl<F> Visitor for FnVisitor<F>
where
    F: Fn(&SourceFile, &ExecutionContext) -> Option<SourceFile> + Send + Sync,
{
    fn visit(&self, file: &SourceFile, ctx: &ExecutionContext) -> Option<SourceFile> {
        (self.0)(file, ctx)
    }
}

/// Applies `visitor` to `file` and reports, by identity, whether it would
/// change the file — without needing the visit's own interpretation of
/// "changed" or "deleted" (a predicate that returns `None` for "this
/// matches" is still a "changed" signal, since the scheduler only cares
/// about reference equality here, never about null propagating further).
///
/// Used for both `Recipe::applicable_test` (§4.3 step 1, over the whole
/// batch) and `Recipe::single_source_applicable_test` (§4.3's
/// `per_file_apply`, per file).
pub fn visitor_would_change(visitor: &dyn Visitor, file: &SourceFile, ctx: &ExecutionContext) -> bool {
    match visitor.visit(file, ctx) {
        Some(result) => !SourceFile::same_instance(&result, file),
        None => true,
    }
}

/// One level below the file: a helper for `Tree` implementors that want the
/// same structural-sharing discipline the file-level `Visitor` contract
/// requires (§4.1: "unchanged subtrees are returned by identity").
///
/// Given a node's children and a per-child rewrite closure, returns the
/// original `Arc` slice unchanged (same allocation, no new `Vec`) if every
/// child's rewrite returned its own input by pointer; only allocates a new
/// `Vec` once at least one child actually changed.
///
/// This is opt-in: the scheduler itself only ever inspects the file-level
/// contract, never node-level sharing, since the core does not define what
/// a node looks like (§1 Non-goals).
pub fn rewrite_children<T, F>(children: &Arc<[Arc<T>]>, mut rewrite: F) -> Arc<[Arc<T>]>
where
    T: ?Sized,
    F: FnMut(&Arc<T>) -> Arc<T>,
{
    let mut rewritten: Option<Vec<Arc<T>>> = None;
    for (index, child) in children.iter().enumerate() {
        let new_child = rewrite(child);
        let changed = !Arc::ptr_eq(&new_child, child);
        match (&mut rewritten, changed) {
            (None, false) => {}
            (None, true) => {
                let mut prefix: Vec<Arc<T>> = children[..index].to_vec();
                prefix.push(new_child);
                rewritten = Some(prefix);
            }
            (Some(acc), _) => acc.push(new_child),
        }
    }
    match rewritten {
        Some(vec) => Arc::from(vec),
        None => children.clone(),
    }
}
