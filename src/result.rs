use std::collections::{BTreeSet, HashMap};

use tracing::instrument;

use crate::{
    error::EngineError,
    recipe::RecipeStack,
    scheduler::DeletionMap,
    tree::{lists_same_instances, FileId, SourceFile},
};

/// A single before/after diff entry (§6 "Persisted state": "A `Result` is a
/// transient in-memory record"). Exactly one of `before`/`after` is `None`
/// for additions and deletions; both are `Some` for in-place changes.
#[derive(Debug, Clone)]
pub struct RecipeResult {
    pub before: Option<SourceFile>,
    pub after: Option<SourceFile>,
    pub recipes_that_made_changes: BTreeSet<RecipeStack>,
}

impl RecipeResult {
    pub fn is_addition(&self) -> bool {
        self.before.is_none()
    }

    pub fn is_deletion(&self) -> bool {
        self.after.is_none()
    }
}

/// Diffs the before-set against the after-set by stable file identity and
/// attaches attribution (§4.4).
pub struct ResultBuilder;

impl ResultBuilder {
    #[instrument(level = "debug", skip_all, fields(n_before = before.len(), n_after = after.len()))]
    pub fn build(
        before: &[SourceFile],
        after: &[SourceFile],
        deletion_map: &DeletionMap,
    ) -> Result<Vec<RecipeResult>, EngineError> {
        if lists_same_instances(before, after) {
            return Ok(Vec::new());
        }

        let before_by_id: HashMap<FileId, &SourceFile> =
            before.iter().map(|file| (file.id(), file)).collect();
        let after_ids: std::collections::HashSet<FileId> =
            after.iter().map(SourceFile::id).collect();

        let mut results = Vec::new();

        for file in after {
            match before_by_id.get(&file.id()) {
                None => {
                    // Generated: no before-value with this id exists. The
                    // deletion map doubles as the generation-attribution
                    // map (§4.4 step 2).
                    let stacks = deletion_map
                        .get(&file.id())
                        .map(|entry| {
                            let mut set = BTreeSet::new();
                            set.insert(entry.value().clone());
                            set
                        })
                        .unwrap_or_default();
                    results.push(RecipeResult {
                        before: None,
                        after: Some(file.clone()),
                        recipes_that_made_changes: stacks,
                    });
                }
                Some(orig) => {
                    if orig.markers().is_generated() {
                        continue;
                    }
                    if !files_differ(orig, file) {
                        continue;
                    }
                    let recipes_marker = file.markers().recipes_that_made_changes();
                    let stacks = match recipes_marker {
                        Some(marker) if !marker.is_empty() => marker.stacks().clone(),
                        _ => {
                            return Err(EngineError::InvariantViolation(format!(
                                "{} was reported as changed but carries no RecipesThatMadeChanges marker",
                                file.source_path().display()
                            )));
                        }
                    };
                    results.push(RecipeResult {
                        before: Some(orig.clone()),
                        after: Some(file.clone()),
                        recipes_that_made_changes: stacks,
                    });
                }
            }
        }

        for file in before {
            if after_ids.contains(&file.id()) || file.markers().is_generated() {
                continue;
            }
            let stacks = deletion_map
                .get(&file.id())
                .map(|entry| {
                    let mut set = BTreeSet::new();
                    set.insert(entry.value().clone());
                    set
                })
                .unwrap_or_default();
            results.push(RecipeResult {
                before: Some(file.clone()),
                after: None,
                recipes_that_made_changes: stacks,
            });
        }

        Ok(results)
    }
}

/// True iff `orig` and `a` (same file id) are observably different: either
/// the logical path moved, or the marker-aware canonical printed form
/// differs (§4.4 step 2).
fn files_differ(orig: &SourceFile, a: &SourceFile) -> bool {
    if orig.source_path() != a.source_path() {
        return true;
    }
    canonical_string(orig) != canonical_string(a)
}

/// The marker-aware canonicalizer (§4.4): prints `markers[h1,h2,…]→` ahead
/// of the file's own printed text, where the hashes are over every marker
/// *except* `RecipesThatMadeChanges` — attribution must not itself cause a
/// "change." Because the core models markers at file granularity (§3), this
/// is "at the file's own marker set" rather than "at every node"; see
/// SPEC_FULL.md §3 for why that's the right scope for this engine.
fn canonical_string(file: &SourceFile) -> String {
    let hashes = file.markers().canonical_hashes_excluding_attribution();
    let mut out = format!("markers{hashes:?}\u{2192}");
    out.push_str(&file.print_to_string());
    out
}
