use std::collections::HashMap;
use std::sync::Arc;

use crate::authz::errors::{AccessDenied, LinkError};
use crate::authz::hooks::Hooks;
use crate::authz::link::{ClassResolver, Destination, IdentityResolver};
use crate::authz::signal::{Binding, Signal};
use crate::authz::types::{lcfirst, NodeRef, OperationKind, ResourceIdx};
use crate::authz::PolicyTree;

/// Request parameter carrying the action name.
pub const ACTION_KEY: &str = "action";
/// Request parameter carrying the (possibly nested) signal name.
pub const SIGNAL_KEY: &str = "do";

/// A handler instance of the host: a presenter or one of its nested
/// components.
pub trait Component {
    /// Fully qualified class name, as used by the policy metadata.
    fn class_name(&self) -> &str;

    /// Direct child component registered under `name`, if it exists yet.
    fn child(&self, name: &str) -> Option<&dyn Component>;
}

/// Inbound request descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub presenter: String,
    pub params: HashMap<String, String>,
}

impl Request {
    pub fn new(presenter: impl Into<String>) -> Self {
        Self {
            presenter: presenter.into(),
            params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_action(self, action: impl Into<String>) -> Self {
        self.with_param(ACTION_KEY, action)
    }

    pub fn with_signal(self, signal: impl Into<String>) -> Self {
        self.with_param(SIGNAL_KEY, signal)
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn action(&self) -> Option<&str> {
        self.parameter(ACTION_KEY).filter(|a| !a.is_empty())
    }

    pub fn signal(&self) -> Option<&str> {
        self.parameter(SIGNAL_KEY).filter(|s| !s.is_empty())
    }
}

/// Outcome of evaluating a call path.
#[derive(Debug, Clone)]
pub enum Decision {
    Allowed,
    Denied(AccessDenied),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    pub fn denial(&self) -> Option<&AccessDenied> {
        match self {
            Decision::Allowed => None,
            Decision::Denied(denial) => Some(denial),
        }
    }
}

/// Every signal raised while handling one request, keyed by node id.
/// Owned by the request and dropped with it.
#[derive(Debug, Default)]
pub struct Evaluation {
    request: Option<Arc<Request>>,
    signals: HashMap<String, Arc<Signal>>,
}

impl Evaluation {
    pub fn new(request: Arc<Request>) -> Self {
        Self {
            request: Some(request),
            signals: HashMap::new(),
        }
    }

    /// Evaluation not tied to an inbound request, e.g. for rendering links
    /// outside of dispatch.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn request(&self) -> Option<&Arc<Request>> {
        self.request.as_ref()
    }

    pub fn signal(&self, node_id: &str) -> Option<&Arc<Signal>> {
        self.signals.get(node_id)
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    fn record(&mut self, signal: &Arc<Signal>) {
        self.signals
            .insert(signal.node_id().to_string(), Arc::clone(signal));
    }
}

#[derive(Debug)]
enum Pending {
    Deny(AccessDenied),
    Walk {
        signal_name: String,
        parent: Option<Arc<Signal>>,
    },
}

/// Result of the root-level check. Nested components may not exist before
/// the host's startup phase, so their walk (and any denial) is deferred to
/// [`Inbound::startup`].
#[derive(Debug)]
pub struct Inbound {
    evaluation: Evaluation,
    pending: Option<Pending>,
}

impl Inbound {
    /// Whether work remains for the startup phase.
    pub fn is_deferred(&self) -> bool {
        self.pending.is_some()
    }

    /// Denial captured at root level, before it is reported.
    pub fn pending_denial(&self) -> Option<&AccessDenied> {
        match &self.pending {
            Some(Pending::Deny(denial)) => Some(denial),
            _ => None,
        }
    }

    /// Finish resolution once the root's components are materialized.
    /// Reports a captured denial, or walks the nested signal path.
    pub fn startup(&mut self, engine: &Engine, root: &dyn Component) -> Decision {
        match self.pending.take() {
            None => Decision::Allowed,
            Some(Pending::Deny(denial)) => {
                engine.deny(&denial);
                Decision::Denied(denial)
            }
            Some(Pending::Walk {
                signal_name,
                parent,
            }) => engine.resolve_component(root, &signal_name, parent, &mut self.evaluation),
        }
    }

    pub fn evaluation(&self) -> &Evaluation {
        &self.evaluation
    }

    pub fn evaluation_mut(&mut self) -> &mut Evaluation {
        &mut self.evaluation
    }
}

/// Request-time resolution over a compiled policy tree.
///
/// Shared read-only across requests; each request carries its own
/// [`Evaluation`].
#[derive(Clone)]
pub struct Engine {
    tree: Arc<PolicyTree>,
    hooks: Hooks,
    resolver: Arc<dyn ClassResolver>,
}

impl Engine {
    pub fn new(tree: Arc<PolicyTree>, hooks: Hooks) -> Self {
        Self {
            tree,
            hooks,
            resolver: Arc::new(IdentityResolver),
        }
    }

    pub fn with_resolver(mut self, resolver: impl ClassResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn tree(&self) -> &Arc<PolicyTree> {
        &self.tree
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Root-level check of an inbound request against the handler it was
    /// dispatched to.
    pub fn resolve_inbound(&self, root: &dyn Component, request: Request) -> Inbound {
        let request = Arc::new(request);
        let mut evaluation = Evaluation::new(Arc::clone(&request));
        let mut denied: Option<AccessDenied> = None;
        let mut root_signal: Option<Arc<Signal>> = None;

        if let Some(resource) = self.tree.index().resource_by_class(root.class_name()) {
            let binding = Binding {
                class_name: root.class_name().to_string(),
                path: String::new(),
            };
            let signal = Signal::new(Arc::clone(&self.tree), NodeRef::Resource(resource))
                .with_binding(binding.clone())
                .with_request(Arc::clone(&request));

            let signal = match self.verify(signal, &mut evaluation) {
                Ok(signal) => signal,
                Err(denial) => {
                    let signal = Arc::clone(denial.signal());
                    denied = Some(denial);
                    signal
                }
            };

            let slots = [
                (OperationKind::Action, request.action()),
                (OperationKind::Handle, request.signal()),
                (OperationKind::Render, request.action()),
            ];
            for (kind, suffix) in slots {
                let Some(operation) =
                    suffix.and_then(|s| self.operation(resource, kind, &lcfirst(s)))
                else {
                    continue;
                };
                let op_signal = Signal::new(Arc::clone(&self.tree), operation)
                    .with_binding(binding.clone())
                    .with_request(Arc::clone(&request))
                    .with_parent(Some(Arc::clone(&signal)));

                if let Err(denial) = self.verify(op_signal, &mut evaluation) {
                    denied = Some(denial);
                    break;
                }
            }

            root_signal = Some(signal);
        } else {
            tracing::trace!(class = root.class_name(), "no policy for root handler");
        }

        let pending = match denied {
            Some(denial) => Some(Pending::Deny(denial)),
            None => request.signal().map(|name| Pending::Walk {
                signal_name: name.to_string(),
                parent: root_signal,
            }),
        };

        Inbound {
            evaluation,
            pending,
        }
    }

    /// Walk a dash-delimited component path below `root`, verifying every
    /// component that has a policy. Stops at the first missing component or
    /// the first denial, which is reported to the denial handlers.
    pub fn resolve_component(
        &self,
        root: &dyn Component,
        signal_name: &str,
        parent: Option<Arc<Signal>>,
        evaluation: &mut Evaluation,
    ) -> Decision {
        // Upper-case names are component lookups, not signal calls.
        if starts_uppercase(signal_name) {
            return Decision::Allowed;
        }

        let mut control = root;
        let mut parent = parent;
        let mut path: Vec<&str> = Vec::new();

        for segment in signal_name.split('-') {
            let Some(component) = control.child(segment) else {
                break;
            };
            control = component;
            path.push(segment);

            let Some(resource) = self.tree.index().resource_by_class(component.class_name())
            else {
                continue;
            };

            let mut signal = Signal::new(Arc::clone(&self.tree), NodeRef::Resource(resource))
                .with_binding(Binding {
                    class_name: component.class_name().to_string(),
                    path: path.join("-"),
                })
                .with_parent(parent.take());
            if let Some(request) = evaluation.request() {
                signal = signal.with_request(Arc::clone(request));
            }

            match self.verify(signal, evaluation) {
                Ok(signal) => parent = Some(signal),
                Err(denial) => {
                    self.deny(&denial);
                    return Decision::Denied(denial);
                }
            }
        }

        Decision::Allowed
    }

    // ---------- Lookup API for templates and links ----------

    /// Node a link destination points at: the matching action, render or
    /// (for `!` destinations) signal operation, else the resource itself.
    /// `None` when the destination class carries no policy.
    pub fn node_for_destination(&self, dest: &str) -> Result<Option<NodeRef>, LinkError> {
        let dest = Destination::parse(dest)?;
        let class = self
            .resolver
            .resolve_class(&dest.presenter)
            .ok_or_else(|| LinkError::UnknownPresenter(dest.presenter.clone()))?;

        let index = self.tree.index();
        let Some(resource) = index.resource_by_class(&class) else {
            return Ok(None);
        };

        let forest = self.tree.forest();
        let mut kinds = vec![OperationKind::Action, OperationKind::Render];
        if dest.signal {
            kinds.push(OperationKind::Handle);
        }
        let operation = kinds.into_iter().find_map(|kind| {
            forest.find_operation_by_method(resource, &kind.method_for(&dest.target))
        });

        Ok(Some(match operation {
            Some(op) => NodeRef::Operation(op),
            None => NodeRef::Resource(resource),
        }))
    }

    /// Whether a link may be shown. Destinations without a policy are
    /// always accessible.
    pub fn is_link_accessed(
        &self,
        evaluation: &mut Evaluation,
        dest: &str,
    ) -> Result<bool, LinkError> {
        Ok(match self.node_for_destination(dest)? {
            Some(node) => self.is_node_accessed(evaluation, node),
            None => true,
        })
    }

    /// Whether the class (or `"<class>::<method>"` operation key) is
    /// accessible. Unknown classes are not.
    pub fn is_class_accessed(&self, evaluation: &mut Evaluation, class: &str) -> bool {
        match self.tree.index().find_by_class(class) {
            Some(node) => self.is_node_accessed(evaluation, node),
            None => false,
        }
    }

    /// Whether the operation of `class` with the given method suffix is
    /// accessible. Unknown classes and operations are not.
    pub fn is_action_accessed(
        &self,
        evaluation: &mut Evaluation,
        class: &str,
        action: &str,
    ) -> bool {
        let Some(resource) = self.tree.index().resource_by_class(class) else {
            return false;
        };
        let forest = self.tree.forest();
        let operation = forest
            .resource(resource)
            .operations
            .iter()
            .copied()
            .find(|&op| forest.operation(op).method_suffix == action);
        match operation {
            Some(op) => self.is_node_accessed(evaluation, NodeRef::Operation(op)),
            None => false,
        }
    }

    /// Chain-wide decision for a node, reusing the signal raised during
    /// resolution when there is one.
    pub fn is_node_accessed(&self, evaluation: &mut Evaluation, node: NodeRef) -> bool {
        self.signal_for(evaluation, node).is_allowed(true)
    }

    /// Recorded signal of `node`, or a fresh one verified along the node's
    /// policy ancestry. Denial handlers are not involved: lookups only ask.
    fn signal_for(&self, evaluation: &mut Evaluation, node: NodeRef) -> Arc<Signal> {
        let forest = self.tree.forest();
        if let Some(signal) = evaluation.signal(forest.node_id(node)) {
            return Arc::clone(signal);
        }

        let parent = forest
            .parent_of(node)
            .map(|parent| self.signal_for(evaluation, parent));
        let mut signal = Signal::new(Arc::clone(&self.tree), node).with_parent(parent);
        if let Some(request) = evaluation.request() {
            signal = signal.with_request(Arc::clone(request));
        }

        self.hooks.verify(&mut signal);
        let signal = Arc::new(signal);
        evaluation.record(&signal);
        signal
    }

    // ---------- internals ----------

    fn operation(&self, resource: ResourceIdx, kind: OperationKind, suffix: &str) -> Option<NodeRef> {
        self.tree
            .forest()
            .find_operation(resource, kind, suffix)
            .map(NodeRef::Operation)
    }

    /// Run the verify hooks and record the signal.
    fn verify(
        &self,
        mut signal: Signal,
        evaluation: &mut Evaluation,
    ) -> Result<Arc<Signal>, AccessDenied> {
        self.hooks.verify(&mut signal);

        let signal = Arc::new(signal);
        evaluation.record(&signal);
        tracing::debug!(
            node = signal.node_id(),
            name = signal.node_name(),
            depth = signal.depth(),
            allowed = signal.is_allowed(false),
            "Verified signal"
        );

        if signal.is_denied() {
            let message = signal.message().to_string();
            return Err(AccessDenied::new(signal, message));
        }
        Ok(signal)
    }

    fn deny(&self, denial: &AccessDenied) {
        tracing::info!(
            node = denial.signal().node_id(),
            message = denial.message(),
            "Access denied"
        );
        self.hooks.denied(denial);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("nodes", &self.tree.forest().node_count())
            .field("hooks", &self.hooks)
            .finish()
    }
}

fn starts_uppercase(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::DeclaredPolicyFact;

    struct Presenter {
        class: &'static str,
    }

    impl Component for Presenter {
        fn class_name(&self) -> &str {
            self.class
        }

        fn child(&self, _name: &str) -> Option<&dyn Component> {
            None
        }
    }

    fn engine(hooks: Hooks) -> Engine {
        let tree = PolicyTree::compile(vec![
            DeclaredPolicyFact::resource("Admin"),
            DeclaredPolicyFact::operation("Admin", "actionEdit"),
            DeclaredPolicyFact::operation("Admin", "renderEdit"),
        ])
        .unwrap();
        Engine::new(Arc::new(tree), hooks)
    }

    #[test]
    fn test_request_parameters() {
        let request = Request::new("Admin").with_action("edit").with_signal("");
        assert_eq!(request.action(), Some("edit"));
        assert_eq!(request.signal(), None);
        assert_eq!(request.parameter(SIGNAL_KEY), Some(""));
    }

    #[test]
    fn test_unprotected_root_is_not_deferred() {
        let engine = engine(Hooks::new());
        let mut inbound = engine.resolve_inbound(
            &Presenter { class: "Front" },
            Request::new("Front").with_action("default"),
        );
        assert!(!inbound.is_deferred());
        assert!(inbound.evaluation().is_empty());
        assert!(inbound
            .startup(&engine, &Presenter { class: "Front" })
            .is_allowed());
    }

    #[test]
    fn test_action_and_render_slots_are_both_checked() {
        let engine = engine(Hooks::new().on_verify(|s: &mut Signal| {
            s.set_allowed(true);
        }));
        let inbound = engine.resolve_inbound(
            &Presenter { class: "Admin" },
            Request::new("Admin").with_action("Edit"),
        );
        assert!(!inbound.is_deferred());
        // resource + actionEdit + renderEdit
        assert_eq!(inbound.evaluation().len(), 3);
    }

    #[test]
    fn test_starts_uppercase() {
        assert!(starts_uppercase("Grid-page"));
        assert!(!starts_uppercase("grid-page"));
        assert!(!starts_uppercase(""));
    }
}
