pub mod engine;
pub mod errors;
pub mod hooks;
pub mod index;
pub mod link;
pub mod loader;
pub mod policy;
pub mod signal;
pub mod types;
pub mod web;

use errors::PolicyError;
use index::PolicyIndex;
use types::{DeclaredPolicyFact, Forest};

/// Compiled policy forest together with its lookup tables.
/// Immutable after construction; metadata changes require a recompile.
#[derive(Debug, Default)]
pub struct PolicyTree {
    forest: Forest,
    index: PolicyIndex,
}

impl PolicyTree {
    /// Compile declared facts into a tree (compile mode).
    pub fn compile(facts: Vec<DeclaredPolicyFact>) -> Result<Self, PolicyError> {
        let forest = loader::compile_forest(facts)?;
        Ok(Self::from_forest(forest))
    }

    /// Wrap an already compiled forest, e.g. one loaded from the cache.
    pub fn from_forest(forest: Forest) -> Self {
        let index = PolicyIndex::build(&forest);
        Self { forest, index }
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub fn index(&self) -> &PolicyIndex {
        &self.index
    }
}
