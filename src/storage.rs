//! Persistence of compiled policy trees.
//!
//! The forest is compiled once at deploy time (compile mode) and written to a
//! namespaced blob store; serving processes load it verbatim (serve mode)
//! without running the compiler.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::authz::errors::PolicyError;
use crate::authz::types::{DeclaredPolicyFact, Forest, OperationIdx, ResourceIdx};
use crate::authz::PolicyTree;
use crate::errors::WardenError;

/// Bumped whenever the serialized forest layout changes.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    #[error("Cache I/O error: {0}")]
    #[diagnostic(code(warden::storage::io))]
    Io(#[from] std::io::Error),

    #[error("Corrupt policy snapshot: {0}")]
    #[diagnostic(
        code(warden::storage::corrupt),
        help("Recompile the policy tree with `warden compile`")
    )]
    Serde(#[from] serde_json::Error),

    #[error("Policy snapshot version {found} is not supported (expected {expected})")]
    #[diagnostic(
        code(warden::storage::version),
        help("Recompile the policy tree with `warden compile`")
    )]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Inconsistent policy snapshot: {0}")]
    #[diagnostic(
        code(warden::storage::inconsistent),
        help("Recompile the policy tree with `warden compile`")
    )]
    InvalidSnapshot(String),

    #[error("Invalid cache namespace `{0}`")]
    #[diagnostic(
        code(warden::storage::namespace),
        help("Namespaces may contain letters, digits, `-`, `_` and `.`")
    )]
    InvalidNamespace(String),
}

/// Namespaced blob store holding cache snapshots.
pub trait CacheStore: Send + Sync {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn save(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError>;
}

/// One `<name>.json` file per namespace inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StorageError::InvalidNamespace(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }
}

impl CacheStore for FileStore {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(name)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        std::fs::create_dir_all(&self.dir)?;
        // Write-then-rename so readers never see a partial snapshot
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// In-process store, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(blobs.get(name).cloned())
    }

    fn save(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let mut blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        blobs.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }
}

impl<S: CacheStore + ?Sized> CacheStore for std::sync::Arc<S> {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).load(name)
    }

    fn save(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).save(name, bytes)
    }
}

/// Whether the process recompiles the forest or serves a stored snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    Compile,
    #[default]
    Serve,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    forest: &'a Forest,
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    forest: Forest,
}

pub struct PolicyCache<S> {
    store: S,
    namespace: String,
    mode: CacheMode,
}

impl<S: CacheStore> PolicyCache<S> {
    pub fn new(store: S, namespace: impl Into<String>, mode: CacheMode) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            mode,
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Stored forest, if a snapshot exists.
    pub fn load(&self) -> Result<Option<Forest>, StorageError> {
        let Some(bytes) = self.store.load(&self.namespace)? else {
            return Ok(None);
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StorageError::UnsupportedVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        check_forest(&snapshot.forest)?;
        Ok(Some(snapshot.forest))
    }

    pub fn save(&self, forest: &Forest) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&SnapshotRef {
            version: SNAPSHOT_VERSION,
            forest,
        })?;
        self.store.save(&self.namespace, &bytes)
    }

    /// Produce the tree for this process. Compile mode runs `facts`, compiles
    /// and saves; serve mode loads the snapshot and never calls `facts`.
    pub fn initialize<F>(&self, facts: F) -> Result<PolicyTree, WardenError>
    where
        F: FnOnce() -> Result<Vec<DeclaredPolicyFact>, PolicyError>,
    {
        match self.mode {
            CacheMode::Compile => {
                let tree = PolicyTree::compile(facts()?)?;
                self.save(tree.forest())?;
                tracing::info!(
                    namespace = %self.namespace,
                    nodes = tree.forest().node_count(),
                    "Compiled and cached policy tree"
                );
                Ok(tree)
            }
            CacheMode::Serve => match self.load()? {
                Some(forest) => {
                    tracing::info!(
                        namespace = %self.namespace,
                        nodes = forest.node_count(),
                        "Loaded cached policy tree"
                    );
                    Ok(PolicyTree::from_forest(forest))
                }
                None => {
                    tracing::warn!(
                        namespace = %self.namespace,
                        "No cached policy tree, serving an empty one"
                    );
                    Ok(PolicyTree::default())
                }
            },
        }
    }
}

/// Structural check of a deserialized forest before anything indexes into
/// it: every link in range and mirrored on both ends, parents acyclic, ids
/// unique.
fn check_forest(forest: &Forest) -> Result<(), StorageError> {
    let invalid = |msg: String| Err(StorageError::InvalidSnapshot(msg));
    let resources = forest.resources.len();
    let operations = forest.operations.len();

    for &ResourceIdx(root) in &forest.roots {
        if root >= resources {
            return invalid(format!("root {root} out of range"));
        }
        if forest.resources[root].parent.is_some() {
            return invalid(format!("root {root} has a parent"));
        }
    }

    for (i, node) in forest.resources.iter().enumerate() {
        for &OperationIdx(op) in &node.operations {
            if op >= operations {
                return invalid(format!("resource {i} lists operation {op} out of range"));
            }
            if forest.operations[op].resource != ResourceIdx(i) {
                return invalid(format!("operation {op} is not owned by resource {i}"));
            }
        }
        for &ResourceIdx(child) in &node.children {
            if child >= resources {
                return invalid(format!("resource {i} lists child {child} out of range"));
            }
            if forest.resources[child].parent != Some(ResourceIdx(i)) {
                return invalid(format!("child {child} does not point back to resource {i}"));
            }
        }
        match node.parent {
            Some(ResourceIdx(parent)) => {
                if parent >= resources {
                    return invalid(format!("resource {i} has parent {parent} out of range"));
                }
                if !forest.resources[parent].children.contains(&ResourceIdx(i)) {
                    return invalid(format!("resource {i} is missing from its parent's children"));
                }
            }
            None => {
                if !forest.roots.contains(&ResourceIdx(i)) {
                    return invalid(format!("parentless resource {i} is not a root"));
                }
            }
        }
    }

    for (i, op) in forest.operations.iter().enumerate() {
        let ResourceIdx(owner) = op.resource;
        if owner >= resources || !forest.resources[owner].operations.contains(&OperationIdx(i)) {
            return invalid(format!("operation {i} is not listed by its resource"));
        }
    }

    // A parent chain longer than the forest can only be a cycle
    for i in 0..resources {
        let mut steps = 0;
        let mut current = forest.resources[i].parent;
        while let Some(ResourceIdx(parent)) = current {
            steps += 1;
            if steps > resources {
                return invalid(format!("resource {i} has cyclic parents"));
            }
            current = forest.resources[parent].parent;
        }
    }

    let mut ids = HashSet::new();
    let all_ids = forest
        .resources
        .iter()
        .map(|r| &r.id)
        .chain(forest.operations.iter().map(|o| &o.id));
    for id in all_ids {
        if !ids.insert(id) {
            return invalid(format!("duplicate node id `{id}`"));
        }
    }

    Ok(())
}
