use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::authz::errors::PolicyError;
use crate::authz::policy::parse_kdl_document;
use crate::authz::types::*;
use crate::authz::PolicyTree;

/// Load all `.kdl` metadata files from the given directory and compile them
/// into a single immutable `PolicyTree`.
pub fn load_policies(dir: &Path) -> Result<PolicyTree, PolicyError> {
    let facts = load_facts(dir)?;
    let tree = PolicyTree::compile(facts)?;

    tracing::info!(
        resources = tree.forest().resources.len(),
        operations = tree.forest().operations.len(),
        roots = tree.forest().roots.len(),
        "Compiled policy tree"
    );

    Ok(tree)
}

/// Read every `.kdl` file of `dir` (sorted by path) into one fact batch.
pub fn load_facts(dir: &Path) -> Result<Vec<DeclaredPolicyFact>, PolicyError> {
    if !dir.is_dir() {
        return Err(PolicyError::InvalidPolicy(format!(
            "policies directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "kdl")
                .unwrap_or(false)
        })
        .collect();
    entries.sort_by_key(|e| e.path());

    let mut facts = Vec::new();
    for entry in &entries {
        let path = entry.path();
        let contents =
            std::fs::read_to_string(&path).map_err(|source| PolicyError::PolicyLoadError {
                path: path.display().to_string(),
                source,
            })?;
        facts.extend(parse_kdl_document(&contents)?);
    }

    tracing::debug!(files = entries.len(), facts = facts.len(), "Read policy metadata");
    Ok(facts)
}

/// Running set of assigned ids, remembering who claimed each one so a
/// collision can name both sides.
#[derive(Default)]
struct IdRegistry {
    owners: HashMap<String, String>,
}

impl IdRegistry {
    fn claim(&mut self, id: &str, owner: String) -> Result<(), PolicyError> {
        if let Some(first) = self.owners.get(id) {
            return Err(PolicyError::DuplicateId {
                id: id.to_string(),
                first: first.clone(),
                second: owner,
            });
        }
        self.owners.insert(id.to_string(), owner);
        Ok(())
    }
}

/// Compile a batch of declared facts into a forest.
///
/// Pass 1 builds one resource per resource fact together with the operations
/// declared on the same class, checking ids as they are assigned. Pass 2
/// resolves declared parents by class name.
pub fn compile_forest(facts: Vec<DeclaredPolicyFact>) -> Result<Forest, PolicyError> {
    let mut resource_facts = Vec::new();
    let mut operation_facts: HashMap<String, Vec<DeclaredPolicyFact>> = HashMap::new();
    for fact in facts {
        match fact.kind {
            FactKind::Resource => resource_facts.push(fact),
            FactKind::Operation => operation_facts
                .entry(fact.declaring_class.clone())
                .or_default()
                .push(fact),
        }
    }

    let mut forest = Forest::default();
    let mut ids = IdRegistry::default();
    // class -> (resource, declared parent class)
    let mut classes: HashMap<String, (ResourceIdx, Option<String>)> = HashMap::new();

    // Pass 1
    for fact in resource_facts {
        let idx = ResourceIdx(forest.resources.len());
        let resource = build_resource(&fact, &mut ids)?;
        if classes.contains_key(&resource.class_name) {
            return Err(PolicyError::DuplicateClass {
                class: resource.class_name,
            });
        }
        classes.insert(resource.class_name.clone(), (idx, fact.parent_class.clone()));
        forest.resources.push(resource);

        let declared = operation_facts
            .remove(&fact.declaring_class)
            .unwrap_or_default();
        for op_fact in declared {
            let Some(operation) = build_operation(&op_fact, idx, &mut ids)? else {
                continue;
            };
            let op_idx = OperationIdx(forest.operations.len());
            forest.operations.push(operation);
            forest.resources[idx.0].operations.push(op_idx);
        }
    }

    for class in operation_facts.keys() {
        tracing::debug!(class = %class, "ignoring operations of a class without a resource declaration");
    }

    // Pass 2
    check_parent_cycles(&classes)?;

    let mut links = Vec::new();
    for resource in &forest.resources {
        let (idx, parent) = &classes[&resource.class_name];
        match parent.as_deref().filter(|p| !p.is_empty()) {
            None => forest.roots.push(*idx),
            Some(parent_class) => {
                let (parent_idx, _) = classes.get(parent_class).ok_or_else(|| {
                    PolicyError::UndefinedParent {
                        class: resource.class_name.clone(),
                        parent: parent_class.to_string(),
                    }
                })?;
                links.push((*idx, *parent_idx));
            }
        }
    }
    for (child, parent) in links {
        forest.resources[parent.0].children.push(child);
        forest.resources[child.0].parent = Some(parent);
    }

    Ok(forest)
}

fn build_resource(
    fact: &DeclaredPolicyFact,
    ids: &mut IdRegistry,
) -> Result<ResourceNode, PolicyError> {
    let class_name = fact.declaring_class.clone();

    let name = match fact.name.as_deref().filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => short_class_name(&class_name).to_string(),
    };
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(PolicyError::InvalidName {
            class: class_name,
            name,
        });
    }

    let id = match fact.declared_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => fingerprint(&class_name),
    };
    ids.claim(&id, format!("resource `{class_name}`"))?;

    Ok(ResourceNode {
        id,
        class_name,
        name,
        description: fact.description.clone(),
        message: denial_message(fact),
        options: fact.options.clone(),
        operations: Vec::new(),
        children: Vec::new(),
        parent: None,
    })
}

/// Returns `Ok(None)` for methods that carry none of the protected prefixes.
fn build_operation(
    fact: &DeclaredPolicyFact,
    resource: ResourceIdx,
    ids: &mut IdRegistry,
) -> Result<Option<OperationNode>, PolicyError> {
    let class = &fact.declaring_class;
    let method_name = fact
        .method_name
        .clone()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| PolicyError::MissingMethodName {
            class: class.clone(),
        })?;

    let Some((kind, method_suffix)) = OperationKind::classify(&method_name) else {
        tracing::warn!(
            class = %class,
            method = %method_name,
            "ignoring operation on a method without a handle/render/action/createComponent prefix"
        );
        return Ok(None);
    };

    let qualified = format!("{class}::{method_name}");
    let id = match fact.declared_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => fingerprint(&qualified),
    };
    ids.claim(&id, format!("operation `{qualified}`"))?;

    Ok(Some(OperationNode {
        id,
        name: fact
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| method_suffix.clone()),
        description: fact.description.clone(),
        message: denial_message(fact),
        options: fact.options.clone(),
        kind,
        method_suffix,
        method_name,
        resource,
    }))
}

fn denial_message(fact: &DeclaredPolicyFact) -> String {
    fact.message
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_DENIAL_MESSAGE.to_string())
}

/// Check for cycles in declared parents using DFS.
fn check_parent_cycles(
    classes: &HashMap<String, (ResourceIdx, Option<String>)>,
) -> Result<(), PolicyError> {
    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();

    for name in classes.keys() {
        if !visited.contains(name.as_str()) {
            dfs_cycle_check(name, classes, &mut visited, &mut in_stack)?;
        }
    }
    Ok(())
}

fn dfs_cycle_check<'a>(
    name: &'a str,
    classes: &'a HashMap<String, (ResourceIdx, Option<String>)>,
    visited: &mut HashSet<&'a str>,
    in_stack: &mut HashSet<&'a str>,
) -> Result<(), PolicyError> {
    visited.insert(name);
    in_stack.insert(name);

    if let Some((_, Some(parent))) = classes.get(name) {
        if in_stack.contains(parent.as_str()) {
            return Err(PolicyError::CyclicParent(format!("{name} -> {parent}")));
        }
        if !visited.contains(parent.as_str()) && classes.contains_key(parent) {
            dfs_cycle_check(parent, classes, visited, in_stack)?;
        }
    }

    in_stack.remove(name);
    Ok(())
}
