use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use dashmap::DashMap;
use rayon::prelude::*;
use tracing::{debug, instrument, trace};

use crate::{
    context::{ExecutionContext, Watch},
    error::{panic_to_anyhow, EngineError},
    markers::RecipesThatMadeChanges,
    metrics::VisitOutcomeKind,
    recipe::{Recipe, RecipeStack},
    result::{RecipeResult, ResultBuilder},
    tree::{lists_same_instances, FileId, SourceFile},
    visit::{visitor_would_change, Visitor},
};

/// Maps a file id to the recipe stack responsible for its last deletion, or
/// (doubling as a generation-attribution map, per §4.4 step 2) to the stack
/// responsible for generating it when that id did not exist in the
/// before-set. A single map shared across the whole run, not partitioned
/// per cycle: later writes — whether from a deletion or a re-generation —
/// overwrite earlier ones (§9, "deletion-map key reuse", resolved).
pub type DeletionMap = DashMap<FileId, RecipeStack>;

/// Drives cycles over a recipe tree and a batch of files (§4.3).
pub struct Scheduler;

impl Scheduler {
    /// Runs `root` (and its descendants) over `files_before` for at most
    /// `max_cycles`, stopping early once a fixed point is reached (but
    /// never before `min_cycles`), then builds the before/after diff.
    #[instrument(level = "debug", skip_all, fields(max_cycles, min_cycles, n_files = files_before.len()))]
    pub fn run(
        root: Arc<dyn Recipe>,
        files_before: Vec<SourceFile>,
        ctx: &ExecutionContext,
        max_cycles: usize,
        min_cycles: usize,
    ) -> Result<Vec<RecipeResult>, EngineError> {
        detect_recipe_cycle(&root)?;

        let max_cycles = max_cycles.max(1);
        let deletion_map: DeletionMap = DashMap::new();
        let watch = Watch::new(ctx);
        let mut acc = files_before.clone();

        for cycle in 0..max_cycles {
            let stack = RecipeStack::root(root.clone());
            let after = Self::visit(&stack, acc.clone(), watch.ctx(), &deletion_map);

            let reached_min_cycles = cycle + 1 >= min_cycles;
            let fixed_point = lists_same_instances(&after, &acc) && !watch.has_new_messages();
            let should_stop = reached_min_cycles && (fixed_point || !root.causes_another_cycle());

            debug!(cycle, fixed_point, should_stop, "completed cycle");

            acc = after;
            if should_stop {
                break;
            }
            watch.reset();
        }

        ResultBuilder::build(&files_before, &acc, &deletion_map)
    }

    /// Applies one recipe (and, recursively, its children) to `files`
    /// (§4.3, "Per-recipe visit").
    #[instrument(level = "trace", skip_all, fields(recipe = stack.top().display_name(), n_files = files.len()))]
    fn visit(
        stack: &RecipeStack,
        files: Vec<SourceFile>,
        ctx: &ExecutionContext,
        deletion_map: &DeletionMap,
    ) -> Vec<SourceFile> {
        let recipe = stack.top().0.clone();
        let visit_start = Instant::now();

        if let Some(test) = recipe.applicable_test() {
            let applies = files.iter().any(|file| visitor_would_change(&*test, file, ctx));
            if !applies {
                trace!(recipe = recipe.display_name(), "applicable_test failed, skipping recipe and children");
                ctx.metrics()
                    .record_visit(recipe.display_name(), VisitOutcomeKind::Skipped, visit_start.elapsed());
                return files;
            }
        }

        ctx.metrics().record_batch_size(recipe.display_name(), files.len());

        let validated = recipe.validate(ctx);
        let after = if validated.is_valid {
            Self::map_async(files, stack, ctx, deletion_map, visit_start)
        } else {
            debug!(recipe = recipe.display_name(), errors = ?validated.errors, "recipe failed validation, skipping per-file step");
            files
        };

        let widened_raw = recipe.visit(after.clone(), ctx);
        let widened = if lists_same_instances(&widened_raw, &after) {
            widened_raw
        } else {
            attribute_widening(&after, &widened_raw, stack, deletion_map)
        };

        let mut current = widened;
        for child in recipe.children() {
            if ctx.is_panicking() {
                debug!(recipe = recipe.display_name(), "panic flag set, not visiting remaining children");
                break;
            }
            let child_stack = stack.push(child.clone());
            current = Self::visit(&child_stack, current, ctx, deletion_map);
        }
        current
    }

    /// Order-preserving parallel map over a file batch (§4.3
    /// "Map-async"). `rayon`'s collect over a parallel iterator assembles
    /// results in their original positions regardless of completion order,
    /// so no extra bookkeeping is needed to satisfy "positional assembly."
    fn map_async(
        files: Vec<SourceFile>,
        stack: &RecipeStack,
        ctx: &ExecutionContext,
        deletion_map: &DeletionMap,
        visit_start: Instant,
    ) -> Vec<SourceFile> {
        let recipe = stack.top().0.clone();
        let visitor = recipe.visitor();
        let single_source_test = recipe.single_source_applicable_test();
        let timeout_reported = AtomicBool::new(false);
        let n_files = files.len();

        files
            .into_par_iter()
            .filter_map(|file| {
                per_file_apply(
                    &file,
                    stack,
                    ctx,
                    deletion_map,
                    &*visitor,
                    single_source_test.as_deref(),
                    &timeout_reported,
                    visit_start,
                    n_files,
                )
            })
            .collect()
    }
}

/// §4.3's `per_file_apply`, executed concurrently across the files in one
/// recipe visit.
#[allow(clippy::too_many_arguments)]
fn per_file_apply(
    file: &SourceFile,
    stack: &RecipeStack,
    ctx: &ExecutionContext,
    deletion_map: &DeletionMap,
    visitor: &dyn Visitor,
    single_source_test: Option<&dyn Visitor>,
    timeout_reported: &AtomicBool,
    visit_start: Instant,
    n_files: usize,
) -> Option<SourceFile> {
    let recipe_name = stack.top().display_name();
    let per_file_start = Instant::now();

    if let Some(test) = single_source_test {
        if !visitor_would_change(test, file, ctx) {
            ctx.metrics()
                .record_visit(recipe_name, VisitOutcomeKind::Skipped, per_file_start.elapsed());
            return Some(file.clone());
        }
    }

    let elapsed_since_visit_start = visit_start.elapsed();
    let deadline = ctx.run_timeout(n_files);
    if elapsed_since_visit_start > deadline {
        if timeout_reported
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let error = EngineError::Timeout {
                recipe: recipe_name.to_string(),
                elapsed: elapsed_since_visit_start,
                n_files,
            };
            ctx.on_timeout(&error);
            ctx.on_error(error);
        }
        ctx.metrics()
            .record_visit(recipe_name, VisitOutcomeKind::Timeout, per_file_start.elapsed());
        return Some(file.clone());
    }

    if ctx.is_panicking() {
        return Some(file.clone());
    }

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| visitor.visit(file, ctx)));

    match outcome {
        Ok(Some(after)) if SourceFile::same_instance(&after, file) => {
            ctx.metrics()
                .record_visit(recipe_name, VisitOutcomeKind::Unchanged, per_file_start.elapsed());
            Some(file.clone())
        }
        Ok(Some(after)) => {
            ctx.metrics()
                .record_visit(recipe_name, VisitOutcomeKind::Changed, per_file_start.elapsed());
            Some(after.with_marker(Arc::new(RecipesThatMadeChanges::single(stack.clone()))))
        }
        Ok(None) => {
            deletion_map.insert(file.id(), stack.clone());
            ctx.metrics()
                .record_visit(recipe_name, VisitOutcomeKind::Deleted, per_file_start.elapsed());
            None
        }
        Err(payload) => {
            let error = EngineError::Visitor {
                recipe: recipe_name.to_string(),
                path: file.source_path().to_path_buf(),
                source: panic_to_anyhow(payload),
            };
            ctx.on_error(error);
            ctx.metrics()
                .record_visit(recipe_name, VisitOutcomeKind::Error, per_file_start.elapsed());
            Some(file.clone())
        }
    }
}

/// §4.3 step 3: attributes whatever the whole-batch `Recipe::visit` did —
/// new files get a fresh `RecipesThatMadeChanges` marker and a
/// generation-attribution entry in `deletion_map`; files replaced in place
/// get the marker; files missing from `widened` are recorded as deleted.
fn attribute_widening(
    before_widen: &[SourceFile],
    widened: &[SourceFile],
    stack: &RecipeStack,
    deletion_map: &DeletionMap,
) -> Vec<SourceFile> {
    let before_by_id: HashMap<FileId, &SourceFile> =
        before_widen.iter().map(|file| (file.id(), file)).collect();
    let after_ids: HashSet<FileId> = widened.iter().map(SourceFile::id).collect();

    let result = widened
        .iter()
        .map(|file| match before_by_id.get(&file.id()) {
            None => {
                deletion_map.insert(file.id(), stack.clone());
                file.with_marker(Arc::new(RecipesThatMadeChanges::single(stack.clone())))
            }
            Some(original) if SourceFile::same_instance(original, file) => file.clone(),
            Some(_) => file.with_marker(Arc::new(RecipesThatMadeChanges::single(stack.clone()))),
        })
        .collect();

    for file in before_widen {
        if !after_ids.contains(&file.id()) {
            deletion_map.insert(file.id(), stack.clone());
        }
    }

    result
}

/// §9 design note: recipes form a tree, not a DAG. Detects a recipe
/// appearing as its own ancestor and reports it as an invariant violation
/// rather than letting `Scheduler::visit` recurse forever.
fn detect_recipe_cycle(root: &Arc<dyn Recipe>) -> Result<(), EngineError> {
    fn identity(recipe: &Arc<dyn Recipe>) -> usize {
        Arc::as_ptr(recipe) as *const () as usize
    }

    fn walk(recipe: &Arc<dyn Recipe>, ancestors: &mut Vec<usize>) -> Result<(), EngineError> {
        let id = identity(recipe);
        if ancestors.contains(&id) {
            return Err(EngineError::InvariantViolation(format!(
                "recipe {:?} is its own ancestor in the composition tree",
                recipe.display_name()
            )));
        }
        ancestors.push(id);
        for child in recipe.children() {
            walk(&child, ancestors)?;
        }
        ancestors.pop();
        Ok(())
    }

    walk(root, &mut Vec::new())
}
