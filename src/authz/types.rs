use serde::{Deserialize, Serialize};

/// Default denial text for nodes that do not declare their own message.
pub const DEFAULT_DENIAL_MESSAGE: &str =
    "You are not sufficiently entitled to access this resource.";

/// Options attached to a node, passed through to the verify hooks untouched.
pub type Options = serde_json::Map<String, serde_json::Value>;

// ---------- Declared metadata (compiler input) ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactKind {
    Resource,
    Operation,
}

/// One normalized piece of declared policy metadata, as produced by a
/// metadata source (annotations, build-time codegen, KDL files, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredPolicyFact {
    /// Fully qualified class the fact was declared on, e.g. "App.AdminPresenter"
    pub declaring_class: String,
    /// Fully qualified class of the parent resource (resource facts only)
    #[serde(default)]
    pub parent_class: Option<String>,
    pub kind: FactKind,
    /// Method the operation fact was declared on, e.g. "handleRemoveUser"
    #[serde(default)]
    pub method_name: Option<String>,
    #[serde(default)]
    pub declared_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub options: Options,
}

impl DeclaredPolicyFact {
    pub fn resource(class: impl Into<String>) -> Self {
        Self {
            declaring_class: class.into(),
            parent_class: None,
            kind: FactKind::Resource,
            method_name: None,
            declared_id: None,
            name: None,
            description: None,
            message: None,
            options: Options::new(),
        }
    }

    pub fn operation(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            method_name: Some(method.into()),
            kind: FactKind::Operation,
            ..Self::resource(class)
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_class = Some(parent.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.declared_id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

// ---------- Compiled nodes ----------

/// Kind of a protected method, derived from its name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Handle,
    Render,
    Action,
    CreateComponent,
}

impl OperationKind {
    /// Prefixes in matching priority order.
    pub const ALL: [OperationKind; 4] = [
        OperationKind::Handle,
        OperationKind::Render,
        OperationKind::Action,
        OperationKind::CreateComponent,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            OperationKind::Handle => "handle",
            OperationKind::Render => "render",
            OperationKind::Action => "action",
            OperationKind::CreateComponent => "createComponent",
        }
    }

    /// Split a method name into its kind and decapitalized suffix.
    /// Returns `None` when no known prefix matches.
    pub fn classify(method_name: &str) -> Option<(OperationKind, String)> {
        Self::ALL.into_iter().find_map(|kind| {
            method_name
                .strip_prefix(kind.prefix())
                .map(|rest| (kind, lcfirst(rest)))
        })
    }

    /// Method name this kind would use for the given suffix, e.g.
    /// `Handle` + "removeUser" -> "handleRemoveUser".
    pub fn method_for(self, suffix: &str) -> String {
        format!("{}{}", self.prefix(), ucfirst(suffix))
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceIdx(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationIdx(pub usize);

/// Reference to any node of a forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "index", rename_all = "lowercase")]
pub enum NodeRef {
    Resource(ResourceIdx),
    Operation(OperationIdx),
}

/// One protected handler class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: String,
    pub class_name: String,
    pub name: String,
    pub description: Option<String>,
    pub message: String,
    pub options: Options,
    /// Declaration order
    pub operations: Vec<OperationIdx>,
    pub children: Vec<ResourceIdx>,
    /// Lookup-only back reference; the forest owns every node.
    pub parent: Option<ResourceIdx>,
}

/// One protected method of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationNode {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub message: String,
    pub options: Options,
    pub kind: OperationKind,
    /// Method name without the kind prefix, first letter lowercased
    pub method_suffix: String,
    pub method_name: String,
    /// Owning resource
    pub resource: ResourceIdx,
}

/// Arena holding every compiled node. Links between nodes are indices into
/// `resources` / `operations`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Forest {
    pub resources: Vec<ResourceNode>,
    pub operations: Vec<OperationNode>,
    /// Resources without a declared parent, in declaration order
    pub roots: Vec<ResourceIdx>,
}

impl Forest {
    pub fn resource(&self, idx: ResourceIdx) -> &ResourceNode {
        &self.resources[idx.0]
    }

    pub fn operation(&self, idx: OperationIdx) -> &OperationNode {
        &self.operations[idx.0]
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.resources.len() + self.operations.len()
    }

    pub fn node_id(&self, node: NodeRef) -> &str {
        match node {
            NodeRef::Resource(idx) => &self.resource(idx).id,
            NodeRef::Operation(idx) => &self.operation(idx).id,
        }
    }

    pub fn node_name(&self, node: NodeRef) -> &str {
        match node {
            NodeRef::Resource(idx) => &self.resource(idx).name,
            NodeRef::Operation(idx) => &self.operation(idx).name,
        }
    }

    pub fn node_message(&self, node: NodeRef) -> &str {
        match node {
            NodeRef::Resource(idx) => &self.resource(idx).message,
            NodeRef::Operation(idx) => &self.operation(idx).message,
        }
    }

    /// Policy parent of a node: the owning resource for operations, the
    /// declared parent for resources.
    pub fn parent_of(&self, node: NodeRef) -> Option<NodeRef> {
        match node {
            NodeRef::Resource(idx) => self.resource(idx).parent.map(NodeRef::Resource),
            NodeRef::Operation(idx) => Some(NodeRef::Resource(self.operation(idx).resource)),
        }
    }

    /// Operation of `resource` with the given kind and decapitalized suffix.
    pub fn find_operation(
        &self,
        resource: ResourceIdx,
        kind: OperationKind,
        suffix: &str,
    ) -> Option<OperationIdx> {
        self.resource(resource)
            .operations
            .iter()
            .copied()
            .find(|&op| {
                let op = self.operation(op);
                op.kind == kind && op.method_suffix == suffix
            })
    }

    /// Operation of `resource` declared on the given method.
    pub fn find_operation_by_method(
        &self,
        resource: ResourceIdx,
        method_name: &str,
    ) -> Option<OperationIdx> {
        self.resource(resource)
            .operations
            .iter()
            .copied()
            .find(|&op| self.operation(op).method_name == method_name)
    }
}

// ---------- Naming helpers ----------

/// Stable 32-bit fingerprint (CRC-32) of a fully qualified name, as 8 hex
/// characters.
pub fn fingerprint(qualified_name: &str) -> String {
    format!("{:08x}", crc32fast::hash(qualified_name.as_bytes()))
}

/// Last segment of a class name, for any of the `\`, `.` and `::` separators.
pub fn short_class_name(class_name: &str) -> &str {
    let tail = class_name.rsplit("::").next().unwrap_or(class_name);
    tail.rsplit(&['\\', '.'][..]).next().unwrap_or(tail)
}

pub fn lcfirst(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn ucfirst(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_prefix_priority() {
        assert_eq!(
            OperationKind::classify("handleRemoveUser"),
            Some((OperationKind::Handle, "removeUser".to_string()))
        );
        assert_eq!(
            OperationKind::classify("createComponentGrid"),
            Some((OperationKind::CreateComponent, "grid".to_string()))
        );
        assert_eq!(
            OperationKind::classify("renderDefault"),
            Some((OperationKind::Render, "default".to_string()))
        );
        assert_eq!(OperationKind::classify("startup"), None);
    }

    #[test]
    fn test_method_for_roundtrips_suffix() {
        assert_eq!(OperationKind::Action.method_for("edit"), "actionEdit");
        assert_eq!(OperationKind::Handle.method_for("removeUser"), "handleRemoveUser");
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint("App.Presenters.AdminPresenter");
        let b = fingerprint("App.Presenters.AdminPresenter");
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, fingerprint("App.Presenters.UserPresenter"));
        // CRC-32 check value
        assert_eq!(fingerprint("123456789"), "cbf43926");
        assert_eq!(fingerprint(""), "00000000");
    }

    #[test]
    fn test_short_class_name() {
        assert_eq!(short_class_name("App\\Presenters\\Admin"), "Admin");
        assert_eq!(short_class_name("app.presenters.Admin"), "Admin");
        assert_eq!(short_class_name("app::presenters::Admin"), "Admin");
        assert_eq!(short_class_name("Admin"), "Admin");
    }

    #[test]
    fn test_case_helpers() {
        assert_eq!(lcfirst("RemoveUser"), "removeUser");
        assert_eq!(ucfirst("removeUser"), "RemoveUser");
        assert_eq!(lcfirst(""), "");
    }

    #[test]
    fn test_fact_deserializes_with_defaults() {
        let fact: DeclaredPolicyFact = serde_json::from_str(
            r#"{"declaring_class": "Admin", "kind": "resource"}"#,
        )
        .unwrap();
        assert_eq!(fact, DeclaredPolicyFact::resource("Admin"));
    }
}
