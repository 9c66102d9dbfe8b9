use std::sync::Arc;

use crate::authz::engine::Request;
use crate::authz::types::{NodeRef, Options};
use crate::authz::PolicyTree;

/// Concrete handler instance a signal was raised for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub class_name: String,
    /// Dash-delimited component path from the root handler ("" for the root)
    pub path: String,
}

/// Request-scoped binding of a call to its matched policy node, chained to
/// the signal of the enclosing call.
///
/// Verify hooks decide by calling [`Signal::set_allowed`]; the engine only
/// transports and propagates that decision.
#[derive(Debug, Clone)]
pub struct Signal {
    tree: Arc<PolicyTree>,
    node: NodeRef,
    binding: Option<Binding>,
    request: Option<Arc<Request>>,
    parent: Option<Arc<Signal>>,
    allowed: Option<bool>,
    message: Option<String>,
}

impl Signal {
    pub fn new(tree: Arc<PolicyTree>, node: NodeRef) -> Self {
        Self {
            tree,
            node,
            binding: None,
            request: None,
            parent: None,
            allowed: None,
            message: None,
        }
    }

    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.binding = Some(binding);
        self
    }

    pub fn with_request(mut self, request: Arc<Request>) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_parent(mut self, parent: Option<Arc<Signal>>) -> Self {
        self.parent = parent;
        self
    }

    pub fn node(&self) -> NodeRef {
        self.node
    }

    pub fn tree(&self) -> &Arc<PolicyTree> {
        &self.tree
    }

    pub fn node_id(&self) -> &str {
        self.tree.forest().node_id(self.node)
    }

    pub fn node_name(&self) -> &str {
        self.tree.forest().node_name(self.node)
    }

    pub fn options(&self) -> &Options {
        let forest = self.tree.forest();
        match self.node {
            NodeRef::Resource(idx) => &forest.resource(idx).options,
            NodeRef::Operation(idx) => &forest.operation(idx).options,
        }
    }

    pub fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_deref()
    }

    pub fn parent(&self) -> Option<&Arc<Signal>> {
        self.parent.as_ref()
    }

    /// Number of signals above this one.
    pub fn depth(&self) -> usize {
        std::iter::successors(self.parent.as_deref(), |s| s.parent.as_deref()).count()
    }

    /// Own decision, or the whole chain's when `include_parents` is set.
    /// Undecided signals count as not allowed.
    pub fn is_allowed(&self, include_parents: bool) -> bool {
        let own = self.allowed.unwrap_or(false);
        if !include_parents || !own {
            return own;
        }
        match &self.parent {
            Some(parent) => parent.is_allowed(true),
            None => own,
        }
    }

    /// True once a verify hook explicitly denied this signal.
    pub fn is_denied(&self) -> bool {
        self.allowed == Some(false)
    }

    pub fn is_decided(&self) -> bool {
        self.allowed.is_some()
    }

    /// Record a verify decision. A denial is final for this evaluation.
    pub fn set_allowed(&mut self, allowed: bool) -> &mut Self {
        if self.is_denied() && allowed {
            tracing::debug!(node = self.node_id(), "ignoring allow after denial");
            return self;
        }
        self.allowed = Some(allowed);
        self
    }

    pub fn set_message(&mut self, message: impl Into<String>) -> &mut Self {
        self.message = Some(message.into());
        self
    }

    /// Convenience for hooks: deny with a specific message.
    pub fn deny(&mut self, message: impl Into<String>) -> &mut Self {
        self.set_allowed(false).set_message(message)
    }

    /// Message set by a hook, otherwise the node's declared denial message.
    pub fn message(&self) -> &str {
        self.message
            .as_deref()
            .unwrap_or_else(|| self.tree.forest().node_message(self.node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::DeclaredPolicyFact;

    fn tree() -> Arc<PolicyTree> {
        let facts = vec![
            DeclaredPolicyFact::resource("App.Admin"),
            DeclaredPolicyFact::resource("App.Grid").with_parent("App.Admin"),
            DeclaredPolicyFact::resource("App.Paginator").with_parent("App.Grid"),
            DeclaredPolicyFact::operation("App.Paginator", "handlePage")
                .with_message("No paging for you"),
        ];
        Arc::new(PolicyTree::compile(facts).unwrap())
    }

    /// Builds root -> grid -> paginator -> handlePage with the given flags.
    fn chain(tree: &Arc<PolicyTree>, flags: [bool; 4]) -> Signal {
        let index = tree.index();
        let nodes = [
            NodeRef::Resource(index.resource_by_class("App.Admin").unwrap()),
            NodeRef::Resource(index.resource_by_class("App.Grid").unwrap()),
            NodeRef::Resource(index.resource_by_class("App.Paginator").unwrap()),
            NodeRef::Operation(
                index
                    .operation_by_class("App.Paginator::handlePage")
                    .unwrap(),
            ),
        ];
        let mut parent: Option<Arc<Signal>> = None;
        for (node, allowed) in nodes.iter().zip(flags).take(3) {
            let mut s = Signal::new(tree.clone(), *node).with_parent(parent);
            s.set_allowed(allowed);
            parent = Some(Arc::new(s));
        }
        let mut leaf = Signal::new(tree.clone(), nodes[3]).with_parent(parent);
        leaf.set_allowed(flags[3]);
        leaf
    }

    #[test]
    fn test_is_allowed_requires_every_ancestor() {
        let tree = tree();
        let leaf = chain(&tree, [true, true, true, true]);
        assert!(leaf.is_allowed(false));
        assert!(leaf.is_allowed(true));
        assert_eq!(leaf.depth(), 3);

        for flipped in 0..3 {
            let mut flags = [true; 4];
            flags[flipped] = false;
            let leaf = chain(&tree, flags);
            assert!(leaf.is_allowed(false), "leaf itself stays allowed");
            assert!(!leaf.is_allowed(true), "ancestor {flipped} denied");
        }
    }

    #[test]
    fn test_denied_leaf_is_never_allowed() {
        let tree = tree();
        let leaf = chain(&tree, [true, true, true, false]);
        assert!(!leaf.is_allowed(false));
        assert!(!leaf.is_allowed(true));
        assert!(leaf.is_denied());
    }

    #[test]
    fn test_undecided_signal_is_not_allowed_nor_denied() {
        let tree = tree();
        let node = NodeRef::Resource(tree.index().resource_by_class("App.Admin").unwrap());
        let signal = Signal::new(tree.clone(), node);
        assert!(!signal.is_allowed(true));
        assert!(!signal.is_denied());
        assert!(!signal.is_decided());
    }

    #[test]
    fn test_denial_is_final() {
        let tree = tree();
        let node = NodeRef::Resource(tree.index().resource_by_class("App.Admin").unwrap());
        let mut signal = Signal::new(tree.clone(), node);
        signal.set_allowed(false);
        signal.set_allowed(true);
        assert!(signal.is_denied());
    }

    #[test]
    fn test_message_falls_back_to_node_message() {
        let tree = tree();
        let mut leaf = chain(&tree, [true, true, true, false]);
        assert_eq!(leaf.message(), "No paging for you");
        leaf.set_message("Paging is disabled");
        assert_eq!(leaf.message(), "Paging is disabled");
        assert_eq!(leaf.node_name(), "page");
    }
}
