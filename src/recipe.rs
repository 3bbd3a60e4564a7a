use std::{cmp::Ordering, fmt, hash::Hash, hash::Hasher, sync::Arc};

use crate::{context::ExecutionContext, tree::SourceFile, visit::Visitor};

/// The outcome of `Recipe::validate`: either valid, or invalid with a list
/// of reasons. Invalid recipes are non-fatal (§4.5): their per-file visit
/// is skipped for the run, but their children still run.
#[derive(Debug, Clone, Default)]
pub struct Validated {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl Validated {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            errors: vec![message.into()],
        }
    }

    /// Composes two validation outcomes: valid only if both are, with
    /// errors concatenated (§4.5: "composed by `and`").
    #[must_use]
    pub fn and(mut self, other: Validated) -> Self {
        self.is_valid = self.is_valid && other.is_valid;
        self.errors.extend(other.errors);
        self
    }
}

/// A unit of transformation. A minimal implementation needs only
/// `display_name` and `visitor`; every other method has the "default
/// identity" behavior called out in §4.2.
pub trait Recipe: Send + Sync {
    fn display_name(&self) -> &str;

    fn validate(&self, _ctx: &ExecutionContext) -> Validated {
        Validated::valid()
    }

    /// Whole-batch applicability predicate: if present, the recipe (and its
    /// per-file visit) only runs this visit if at least one file is
    /// mutated by this visitor (identity check, not the value returned).
    fn applicable_test(&self) -> Option<Arc<dyn Visitor>> {
        None
    }

    /// Per-file applicability gate: if present and returns the file
    /// unchanged (same instance), that file is skipped for this recipe.
    fn single_source_applicable_test(&self) -> Option<Arc<dyn Visitor>> {
        None
    }

    /// The per-file edit.
    fn visitor(&self) -> Arc<dyn Visitor>;

    /// The whole-batch step: may add, replace, or remove files. Defaults to
    /// the identity (§4.2: "default: identity").
    fn visit(&self, files: Vec<SourceFile>, _ctx: &ExecutionContext) -> Vec<SourceFile> {
        files
    }

    fn children(&self) -> Vec<Arc<dyn Recipe>> {
        Vec::new()
    }

    fn causes_another_cycle(&self) -> bool {
        false
    }
}

/// An `Arc<dyn Recipe>` compared, hashed, and ordered by pointer identity
/// rather than content — "pointwise recipe identity" (§3) without
/// requiring `Recipe` implementors to derive `PartialEq`.
#[derive(Clone)]
pub struct RecipeRef(pub Arc<dyn Recipe>);

impl RecipeRef {
    pub fn new(recipe: Arc<dyn Recipe>) -> Self {
        Self(recipe)
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn display_name(&self) -> &str {
        self.0.display_name()
    }
}

impl fmt::Debug for RecipeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecipeRef({:?})", self.0.display_name())
    }
}

impl PartialEq for RecipeRef {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for RecipeRef {}

impl Hash for RecipeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl PartialOrd for RecipeRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RecipeRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

/// An ordered path of recipes from the root down to whichever recipe is
/// currently being applied. The unit of change attribution: two stacks are
/// equal iff they name the same recipes, pointwise, in the same order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecipeStack(pub Vec<RecipeRef>);

impl RecipeStack {
    pub fn root(root: Arc<dyn Recipe>) -> Self {
        Self(vec![RecipeRef::new(root)])
    }

    #[must_use]
    pub fn push(&self, recipe: Arc<dyn Recipe>) -> Self {
        let mut stack = self.0.clone();
        stack.push(RecipeRef::new(recipe));
        Self(stack)
    }

    pub fn top(&self) -> &RecipeRef {
        self.0.last().expect("RecipeStack is never empty")
    }

    pub fn root_recipe(&self) -> &RecipeRef {
        self.0.first().expect("RecipeStack is never empty")
    }

    pub fn starts_with_root(&self, root: &RecipeRef) -> bool {
        self.root_recipe() == root
    }

    pub fn display_path(&self) -> String {
        self.0
            .iter()
            .map(RecipeRef::display_name)
            .collect::<Vec<_>>()
            .join(" > ")
    }
}
