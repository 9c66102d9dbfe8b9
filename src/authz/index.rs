use std::collections::HashMap;

use crate::authz::types::{Forest, NodeRef, OperationIdx, ResourceIdx};

/// Flat lookup tables over a forest, built once per load so request-time
/// lookups never walk the tree.
#[derive(Debug, Clone, Default)]
pub struct PolicyIndex {
    /// node id -> node (resources and operations share one namespace)
    by_id: HashMap<String, NodeRef>,
    /// class name -> resource
    by_class: HashMap<String, ResourceIdx>,
    /// "<class>::<method>" -> operation
    by_class_method: HashMap<String, OperationIdx>,
}

impl PolicyIndex {
    pub fn build(forest: &Forest) -> Self {
        let mut index = Self::default();
        let mut stack: Vec<ResourceIdx> = forest.roots.iter().rev().copied().collect();

        while let Some(idx) = stack.pop() {
            let resource = forest.resource(idx);
            index.by_id.insert(resource.id.clone(), NodeRef::Resource(idx));
            index.by_class.insert(resource.class_name.clone(), idx);

            for &op_idx in &resource.operations {
                let op = forest.operation(op_idx);
                index.by_id.insert(op.id.clone(), NodeRef::Operation(op_idx));
                index
                    .by_class_method
                    .insert(class_method_key(&resource.class_name, &op.method_name), op_idx);
            }

            stack.extend(resource.children.iter().rev().copied());
        }

        tracing::debug!(
            resources = index.by_class.len(),
            operations = index.by_class_method.len(),
            "Built policy index"
        );

        index
    }

    pub fn find_by_id(&self, id: &str) -> Option<NodeRef> {
        self.by_id.get(id).copied()
    }

    /// Resource declared on `class`, or else the operation registered under
    /// a `"<class>::<method>"` key.
    pub fn find_by_class(&self, class: &str) -> Option<NodeRef> {
        self.by_class
            .get(class)
            .map(|&idx| NodeRef::Resource(idx))
            .or_else(|| {
                self.by_class_method
                    .get(class)
                    .map(|&idx| NodeRef::Operation(idx))
            })
    }

    pub fn resource_by_class(&self, class: &str) -> Option<ResourceIdx> {
        self.by_class.get(class).copied()
    }

    pub fn resource_by_id(&self, id: &str) -> Option<ResourceIdx> {
        match self.find_by_id(id)? {
            NodeRef::Resource(idx) => Some(idx),
            NodeRef::Operation(_) => None,
        }
    }

    /// Operation by its `"<class>::<method>"` key.
    pub fn operation_by_class(&self, key: &str) -> Option<OperationIdx> {
        self.by_class_method.get(key).copied()
    }

    pub fn operation_by_class_method(&self, class: &str, method: &str) -> Option<OperationIdx> {
        self.operation_by_class(&class_method_key(class, method))
    }

    pub fn operation_by_id(&self, id: &str) -> Option<OperationIdx> {
        match self.find_by_id(id)? {
            NodeRef::Operation(idx) => Some(idx),
            NodeRef::Resource(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

pub fn class_method_key(class: &str, method: &str) -> String {
    format!("{class}::{method}")
}
