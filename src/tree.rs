use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use uuid::Uuid;

use crate::markers::{MarkerValue, Markers};

/// Stable identity of a `SourceFile` across transformations. A visit that
/// produces a new file value must carry the original id forward (§3
/// invariants: "File `id` is stable").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub Uuid);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A lossless syntax tree node. The core takes no position on what a tree
/// actually looks like (§1 Non-goals: "does not define the shape of any
/// particular LST") — this is the entire interface it needs from one: the
/// ability to render itself back to source text (the Printer interface,
/// §6), losslessly for unmodified input.
pub trait Tree: fmt::Debug + Send + Sync {
    fn print(&self, out: &mut String);

    fn print_to_string(&self) -> String {
        let mut out = String::new();
        self.print(&mut out);
        out
    }
}

/// A parsed, immutable source file. Cheap to clone (an `Arc` handle);
/// "reference equality" anywhere in this crate's documentation means
/// `SourceFile::same_instance`, i.e. two handles pointing at the same
/// allocation, not two files that happen to carry equal content.
#[derive(Clone)]
pub struct SourceFile(Arc<SourceFileData>);

struct SourceFileData {
    id: FileId,
    source_path: PathBuf,
    tree: Arc<dyn Tree>,
    markers: Markers,
}

impl fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFile")
            .field("id", &self.0.id)
            .field("source_path", &self.0.source_path)
            .field("markers", &self.0.markers)
            .finish()
    }
}

impl SourceFile {
    pub fn new(source_path: impl Into<PathBuf>, tree: Arc<dyn Tree>) -> Self {
        Self(Arc::new(SourceFileData {
            id: FileId::new(),
            source_path: source_path.into(),
            tree,
            markers: Markers::new(),
        }))
    }

    pub fn with_id(id: FileId, source_path: impl Into<PathBuf>, tree: Arc<dyn Tree>) -> Self {
        Self(Arc::new(SourceFileData {
            id,
            source_path: source_path.into(),
            tree,
            markers: Markers::new(),
        }))
    }

    pub fn id(&self) -> FileId {
        self.0.id
    }

    pub fn source_path(&self) -> &Path {
        &self.0.source_path
    }

    pub fn tree(&self) -> &Arc<dyn Tree> {
        &self.0.tree
    }

    pub fn markers(&self) -> &Markers {
        &self.0.markers
    }

    /// Two handles are the "same instance" iff they point at the same
    /// allocation — the Rust substitute for object identity (§9).
    pub fn same_instance(a: &SourceFile, b: &SourceFile) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Produces a new file value with a different tree, same id. Used by
    /// visitors that edit content.
    #[must_use]
    pub fn with_tree(&self, tree: Arc<dyn Tree>) -> Self {
        Self(Arc::new(SourceFileData {
            id: self.0.id,
            source_path: self.0.source_path.clone(),
            tree,
            markers: self.0.markers.clone(),
        }))
    }

    /// Produces a new file value with a different logical path, same id and
    /// tree. Scenario 2 in §8 ("Rename path").
    #[must_use]
    pub fn with_source_path(&self, source_path: impl Into<PathBuf>) -> Self {
        Self(Arc::new(SourceFileData {
            id: self.0.id,
            source_path: source_path.into(),
            tree: self.0.tree.clone(),
            markers: self.0.markers.clone(),
        }))
    }

    /// Produces a new file value with `value` merged into the marker bag.
    #[must_use]
    pub fn with_marker(&self, value: Arc<dyn MarkerValue>) -> Self {
        Self(Arc::new(SourceFileData {
            id: self.0.id,
            source_path: self.0.source_path.clone(),
            tree: self.0.tree.clone(),
            markers: self.0.markers.with(value),
        }))
    }

    pub fn print_to_string(&self) -> String {
        self.0.tree.print_to_string()
    }
}

/// Compares two file lists by "reference equality" in the OpenRewrite
/// sense: same length, and every element at the same position is the same
/// instance. Used by the cycle loop (§4.3 step 2) and the result builder's
/// final "after == before" short circuit (§4.4 step 4).
pub fn lists_same_instances(a: &[SourceFile], b: &[SourceFile]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| SourceFile::same_instance(x, y))
}
