use std::{
    sync::{atomic::{AtomicUsize, Ordering}, Arc},
    time::Duration,
};

use pretty_assertions::assert_eq;

use crate::{
    context::ExecutionContext,
    error::EngineError,
    metrics::NoopMetricsSink,
    recipe::Recipe,
    scheduler::Scheduler,
    testing::file,
    tree::SourceFile,
    visit::FnVisitor,
};

use super::{init_tracing, invalid_recipe, one_file, test_ctx};

/// Scenario 1 (§8): a no-op recipe over a non-trivial batch produces no
/// results at all.
#[test]
fn scenario_no_op_recipe() {
    let (ctx, _errors) = test_ctx();
    let files = vec![file("a.txt", "a"), file("b.txt", "b"), file("c.txt", "c")];
    let recipe: Arc<dyn Recipe> = Arc::new(super::ClosureRecipe::identity(
        "no-op",
        FnVisitor(|f: &SourceFile, _ctx: &ExecutionContext| Some(f.clone())),
    ));
    let results = Scheduler::run(recipe, files, &ctx, 3, 1).unwrap();
    assert!(results.is_empty());
}

/// Scenario 2: renaming a file's logical path is a reported change even
/// though the tree itself never changes.
#[test]
fn scenario_rename_path() {
    struct Renamer;
    impl Recipe for Renamer {
        fn display_name(&self) -> &str {
            "renamer"
        }
        fn visitor(&self) -> Arc<dyn crate::visit::Visitor> {
            Arc::new(FnVisitor(|f: &SourceFile, _ctx: &ExecutionContext| {
                Some(f.with_source_path("renamed.txt"))
            }))
        }
    }

    let (ctx, _errors) = test_ctx();
    let results = Scheduler::run(Arc::new(Renamer), one_file(), &ctx, 2, 1).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].after.as_ref().unwrap().source_path().to_str().unwrap(), "renamed.txt");
}

/// Scenario 3: a marker-only change that isn't `RecipesThatMadeChanges` and
/// doesn't touch the printed text is invisible to the result builder
/// (nothing in the canonicalizer's hash input moved) -- unless the recipe
/// is the one adding a tracked marker kind, which *is* observable (covered
/// in invariants::opaque_marker_change_is_observable). Here the marker a
/// recipe adds is itself `RecipesThatMadeChanges`, which the canonicalizer
/// explicitly excludes, so attributing a change must never by itself
/// manufacture one.
#[test]
fn scenario_attribution_marker_alone_is_not_a_change() {
    use crate::markers::RecipesThatMadeChanges;
    use crate::recipe::RecipeStack;

    let f = file("a.txt", "hello");
    let stack = RecipeStack::root(super::no_op_recipe("whatever"));
    let marked = f.with_marker(Arc::new(RecipesThatMadeChanges::single(stack)));

    assert_eq!(
        f.markers().canonical_hashes_excluding_attribution(),
        marked.markers().canonical_hashes_excluding_attribution()
    );
}

/// Scenario 4: a whole-batch `visit` that adds a file gets it attributed as
/// generated, recorded in the deletion/generation map.
#[test]
fn scenario_generation_by_widening_visit() {
    struct Generator;
    impl Recipe for Generator {
        fn display_name(&self) -> &str {
            "generator"
        }
        fn visitor(&self) -> Arc<dyn crate::visit::Visitor> {
            Arc::new(FnVisitor(|f: &SourceFile, _ctx: &ExecutionContext| Some(f.clone())))
        }
        fn visit(&self, mut files: Vec<SourceFile>, _ctx: &ExecutionContext) -> Vec<SourceFile> {
            files.push(file("generated.txt", "new content"));
            files
        }
    }

    let (ctx, _errors) = test_ctx();
    let results = Scheduler::run(Arc::new(Generator), one_file(), &ctx, 2, 1).unwrap();
    let additions: Vec<_> = results.iter().filter(|r| r.is_addition()).collect();
    assert_eq!(additions.len(), 1);
    assert_eq!(additions[0].after.as_ref().unwrap().source_path().to_str().unwrap(), "generated.txt");
    assert!(!additions[0].recipes_that_made_changes.is_empty());
}

/// Scenario 5: deletion.
#[test]
fn scenario_deletion() {
    struct Deleter;
    impl Recipe for Deleter {
        fn display_name(&self) -> &str {
            "deleter"
        }
        fn visitor(&self) -> Arc<dyn crate::visit::Visitor> {
            Arc::new(FnVisitor(|_f: &SourceFile, _ctx: &ExecutionContext| None))
        }
    }

    let (ctx, _errors) = test_ctx();
    let results = Scheduler::run(Arc::new(Deleter), one_file(), &ctx, 2, 1).unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_deletion());
}

/// Scenario 6: a recipe whose per-file visitor runs past the run's timeout
/// budget is reported exactly once via `on_timeout`/`on_error`, and the
/// file passes through unchanged.
///
/// Forced onto a single-worker rayon pool so this is deterministic
/// regardless of how many cores the host has: with one worker, the first
/// file alone pays the 50ms sleep, and every file queued behind it starts
/// `per_file_apply` well past the 1ms deadline and returns without being
/// visited at all (only the first timeout-observer reports, via the
/// scheduler's CAS-once guard). On a host with enough idle rayon threads
/// to run all files concurrently, none would ever observe the deadline
/// having passed, so the test would spuriously pass as "no timeout" --
/// pinning the pool to one thread rules that out.
#[test]
fn scenario_timeout_reported_once() {
    init_tracing();

    struct SlowVisitor;
    impl crate::visit::Visitor for SlowVisitor {
        fn visit(&self, file: &SourceFile, _ctx: &ExecutionContext) -> Option<SourceFile> {
            std::thread::sleep(Duration::from_millis(50));
            Some(file.clone())
        }
    }

    struct Slow;
    impl Recipe for Slow {
        fn display_name(&self) -> &str {
            "slow"
        }
        fn visitor(&self) -> Arc<dyn crate::visit::Visitor> {
            Arc::new(SlowVisitor)
        }
    }

    let timeout_calls = Arc::new(AtomicUsize::new(0));
    let timeout_calls_for_closure = timeout_calls.clone();
    let ctx = ExecutionContext::builder()
        .metrics(Arc::new(NoopMetricsSink))
        .run_timeout(|_n_files| Duration::from_millis(1))
        .on_timeout(move |_err| {
            timeout_calls_for_closure.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let files: Vec<SourceFile> = (0..4).map(|i| file(format!("{i}.txt"), "x")).collect();
    let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
    let results = pool
        .install(|| Scheduler::run(Arc::new(Slow), files, &ctx, 1, 1))
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(timeout_calls.load(Ordering::SeqCst), 1);
}

/// Scenario 7: a recipe composition where the first child sets the
/// cooperative `ctx.panic` flag. The scheduler's children loop checks that
/// flag before visiting each sibling (§5), so the second child must never
/// run — its edit must be absent from the results, while the first
/// child's own edit still stands.
#[test]
fn scenario_panic_mid_composition_does_not_abort_siblings() {
    init_tracing();

    struct Parent {
        children: Vec<Arc<dyn Recipe>>,
    }
    impl Recipe for Parent {
        fn display_name(&self) -> &str {
            "parent"
        }
        fn visitor(&self) -> Arc<dyn crate::visit::Visitor> {
            Arc::new(FnVisitor(|f: &SourceFile, _ctx: &ExecutionContext| Some(f.clone())))
        }
        fn children(&self) -> Vec<Arc<dyn Recipe>> {
            self.children.clone()
        }
    }

    struct SetsPanicFlag;
    impl Recipe for SetsPanicFlag {
        fn display_name(&self) -> &str {
            "sets-panic-flag"
        }
        fn visitor(&self) -> Arc<dyn crate::visit::Visitor> {
            Arc::new(FnVisitor(|f: &SourceFile, ctx: &ExecutionContext| {
                ctx.set_panic();
                let text = format!("{}+marked", f.print_to_string());
                Some(f.with_tree(Arc::new(crate::testing::TextTree::new(text))))
            }))
        }
    }

    struct AppendsBang;
    impl Recipe for AppendsBang {
        fn display_name(&self) -> &str {
            "appends-bang"
        }
        fn visitor(&self) -> Arc<dyn crate::visit::Visitor> {
            Arc::new(FnVisitor(|f: &SourceFile, _ctx: &ExecutionContext| {
                let text = format!("{}!", f.print_to_string());
                Some(f.with_tree(Arc::new(crate::testing::TextTree::new(text))))
            }))
        }
    }

    let root = Arc::new(Parent {
        children: vec![Arc::new(SetsPanicFlag), Arc::new(AppendsBang)],
    });

    let (ctx, _errors) = test_ctx();
    let results = Scheduler::run(root, vec![file("foo.txt", "hi")], &ctx, 1, 1).unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].after.as_ref().unwrap().print_to_string(),
        "hi+marked",
        "only the first child's edit should land; the second child must never run"
    );
}

/// Scenario 8: a recipe that signals it needs another cycle (via
/// `causes_another_cycle`) keeps converging monotonically and stops once a
/// true fixed point is reached, never running past `min_cycles` only.
#[test]
fn scenario_cycle_convergence() {
    struct ConvergesAfterThree {
        calls: AtomicUsize,
    }
    impl Recipe for ConvergesAfterThree {
        fn display_name(&self) -> &str {
            "converges-after-three"
        }
        fn visitor(&self) -> Arc<dyn crate::visit::Visitor> {
            Arc::new(FnVisitor(|f: &SourceFile, _ctx: &ExecutionContext| Some(f.clone())))
        }
        fn visit(&self, files: Vec<SourceFile>, _ctx: &ExecutionContext) -> Vec<SourceFile> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                files
                    .into_iter()
                    .map(|f| {
                        let text = format!("{}.", f.print_to_string());
                        f.with_tree(Arc::new(crate::testing::TextTree::new(text)))
                    })
                    .collect()
            } else {
                files
            }
        }
        fn causes_another_cycle(&self) -> bool {
            true
        }
    }

    let (ctx, _errors) = test_ctx();
    let recipe = Arc::new(ConvergesAfterThree { calls: AtomicUsize::new(0) });
    let results = Scheduler::run(recipe, vec![file("a.txt", "x")], &ctx, 10, 1).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].after.as_ref().unwrap().print_to_string(), "x..");
}

/// An invalid recipe (failed `validate`) skips its own per-file visit for
/// the run but does not stop the run itself.
#[test]
fn invalid_recipe_skips_visit_without_failing_run() {
    let (ctx, _errors) = test_ctx();
    let results = Scheduler::run(invalid_recipe("bad"), one_file(), &ctx, 2, 1).unwrap();
    assert!(results.is_empty());
}

/// A file reported as changed but missing its attribution marker is a
/// programmer error in the recipe, surfaced as an `InvariantViolation`
/// rather than silently dropped or attributed to nothing.
#[test]
fn missing_attribution_marker_on_a_changed_file_is_an_invariant_violation() {
    use crate::result::ResultBuilder;
    use dashmap::DashMap;

    let before = file("a.txt", "hello");
    let after = before.with_tree(Arc::new(crate::testing::TextTree::new("world")));
    let deletion_map = DashMap::new();

    let result = ResultBuilder::build(&[before], &[after], &deletion_map);
    assert!(matches!(result, Err(EngineError::InvariantViolation(_))));
}
