use std::{
    any::Any,
    collections::{hash_map::DefaultHasher, BTreeMap, BTreeSet},
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::recipe::RecipeStack;

/// Identifies a marker's kind. A handful of kinds are meaningful to the
/// core (`GENERATED`, `RECIPES_THAT_MADE_CHANGES`); anything else is
/// "implementation-defined" and opaque to the scheduler and result builder.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MarkerKind(pub(crate) &'static str);

impl MarkerKind {
    pub const GENERATED: MarkerKind = MarkerKind("generated");
    pub const RECIPES_THAT_MADE_CHANGES: MarkerKind = MarkerKind("recipes_that_made_changes");

    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A single marker value. Implementations are registered at the *kind*
/// level: `merge` is how two colliding values of the same kind are
/// reconciled, and `content_hash` is what the marker-aware canonicalizer
/// (§4.4) hashes into the printed form of a file.
pub trait MarkerValue: fmt::Debug + Send + Sync {
    fn kind(&self) -> MarkerKind;

    /// Merge `self` with another value of the *same* kind. Implementations
    /// may assume `other` is actually the same concrete type; mismatches are
    /// a programmer error (wrong kind registered under the wrong value) and
    /// are allowed to panic.
    fn merge(&self, other: &dyn MarkerValue) -> Arc<dyn MarkerValue>;

    /// A hash of this marker's content, used by the canonicalizer to decide
    /// whether a marker change is observable. Two markers that print
    /// identically for canonicalization purposes must hash equally.
    fn content_hash(&self) -> u64;

    fn as_any(&self) -> &dyn Any;
}

/// Marks a file as machine-generated. Generated files are excluded from
/// change reporting entirely (§3 invariants, §4.4 step 2).
#[derive(Debug, Clone, Copy, Default)]
pub struct Generated;

impl MarkerValue for Generated {
    fn kind(&self) -> MarkerKind {
        MarkerKind::GENERATED
    }

    fn merge(&self, _other: &dyn MarkerValue) -> Arc<dyn MarkerValue> {
        Arc::new(Generated)
    }

    fn content_hash(&self) -> u64 {
        0xA11A5
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The set of recipe stacks that have contributed a change to a file.
/// Merges by set-union on element-wise `RecipeStack` equality. Excluded
/// from the canonicalizer's hash input by construction (§4.4): the result
/// builder filters this kind out before hashing, so it is never the
/// reason two canonical strings differ.
#[derive(Debug, Clone, Default)]
pub struct RecipesThatMadeChanges(pub BTreeSet<RecipeStack>);

impl RecipesThatMadeChanges {
    pub fn single(stack: RecipeStack) -> Self {
        let mut set = BTreeSet::new();
        set.insert(stack);
        Self(set)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn stacks(&self) -> &BTreeSet<RecipeStack> {
        &self.0
    }
}

impl MarkerValue for RecipesThatMadeChanges {
    fn kind(&self) -> MarkerKind {
        MarkerKind::RECIPES_THAT_MADE_CHANGES
    }

    fn merge(&self, other: &dyn MarkerValue) -> Arc<dyn MarkerValue> {
        let other = other
            .as_any()
            .downcast_ref::<RecipesThatMadeChanges>()
            .expect("RecipesThatMadeChanges marker merged with a value of a different kind");
        let mut union = self.0.clone();
        union.extend(other.0.iter().cloned());
        Arc::new(RecipesThatMadeChanges(union))
    }

    fn content_hash(&self) -> u64 {
        // Never actually consulted: the result builder filters this kind
        // out of the canonicalizer's input before hashing anything.
        0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A generic marker kind for recipe-defined metadata that the core does not
/// otherwise understand. Merge semantics default to "last writer wins"
/// unless the recipe author supplies its own `MarkerValue` impl instead.
#[derive(Debug, Clone)]
pub struct OpaqueMarker {
    kind: MarkerKind,
    debug_repr: String,
}

impl OpaqueMarker {
    pub fn new(kind: MarkerKind, debug_repr: impl Into<String>) -> Self {
        Self {
            kind,
            debug_repr: debug_repr.into(),
        }
    }
}

impl MarkerValue for OpaqueMarker {
    fn kind(&self) -> MarkerKind {
        self.kind.clone()
    }

    fn merge(&self, other: &dyn MarkerValue) -> Arc<dyn MarkerValue> {
        let other = other
            .as_any()
            .downcast_ref::<OpaqueMarker>()
            .expect("OpaqueMarker merged with a value of a different kind");
        Arc::new(other.clone())
    }

    fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.debug_repr.hash(&mut hasher);
        hasher.finish()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A file's marker bag: at most one value per `MarkerKind`, merged via that
/// kind's `MarkerValue::merge` on collision.
#[derive(Debug, Clone, Default)]
pub struct Markers(BTreeMap<MarkerKind, Arc<dyn MarkerValue>>);

impl Markers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: &MarkerKind) -> Option<&Arc<dyn MarkerValue>> {
        self.0.get(kind)
    }

    pub fn is_generated(&self) -> bool {
        self.0.contains_key(&MarkerKind::GENERATED)
    }

    pub fn recipes_that_made_changes(&self) -> Option<&RecipesThatMadeChanges> {
        self.0
            .get(&MarkerKind::RECIPES_THAT_MADE_CHANGES)
            .and_then(|value| value.as_any().downcast_ref::<RecipesThatMadeChanges>())
    }

    /// Merges `value` into the bag under its own kind, using the kind's
    /// registered merge function if a value is already present.
    #[must_use]
    pub fn with(&self, value: Arc<dyn MarkerValue>) -> Self {
        let mut map = self.0.clone();
        let kind = value.kind();
        let merged = match map.get(&kind) {
            Some(existing) => existing.merge(&*value),
            None => value,
        };
        map.insert(kind, merged);
        Self(map)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MarkerKind, &Arc<dyn MarkerValue>)> {
        self.0.iter()
    }

    /// A deterministic, sorted digest of every marker except
    /// `RecipesThatMadeChanges` — the input to the result builder's
    /// marker-aware canonicalizer (§4.4).
    pub fn canonical_hashes_excluding_attribution(&self) -> Vec<u64> {
        let mut hashes: Vec<u64> = self
            .0
            .iter()
            .filter(|(kind, _)| **kind != MarkerKind::RECIPES_THAT_MADE_CHANGES)
            .map(|(_, value)| value.content_hash())
            .collect();
        hashes.sort_unstable();
        hashes
    }
}
