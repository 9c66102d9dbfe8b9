use crate::authz::errors::PolicyError;
use crate::authz::types::*;
use kdl::{KdlDocument, KdlNode, KdlValue};

/// Parse a KDL document string into declared policy facts.
///
/// ```kdl
/// resource "App.Presenters.AdminPresenter" name="Admin" message="Admins only" {
///     description "Administration area"
///     option "level" 3
///     operation "handleRemoveUser" id="admin-remove-user"
/// }
/// resource "App.Components.Grid" parent="App.Presenters.AdminPresenter"
/// ```
pub fn parse_kdl_document(source: &str) -> Result<Vec<DeclaredPolicyFact>, PolicyError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| PolicyError::KdlParse(e.to_string()))?;

    let mut facts = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "resource" => {
                let class = first_string_arg(node).ok_or_else(|| {
                    PolicyError::InvalidPolicy(
                        "resource node requires a class argument (e.g. resource \"App.AdminPresenter\")"
                            .into(),
                    )
                })?;

                let mut resource = DeclaredPolicyFact::resource(class.clone());
                resource.parent_class = string_prop(node, "parent");
                apply_common_props(node, &mut resource);

                let mut operations = Vec::new();
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        match child.name().value() {
                            "operation" => {
                                let method = first_string_arg(child).ok_or_else(|| {
                                    PolicyError::InvalidPolicy(format!(
                                        "operation in resource `{class}` requires a method argument (e.g. operation \"handleRemoveUser\")"
                                    ))
                                })?;
                                let mut operation = DeclaredPolicyFact::operation(class.clone(), method);
                                apply_common_props(child, &mut operation);
                                if let Some(grandchildren) = child.children() {
                                    for detail in grandchildren.nodes() {
                                        apply_detail(detail, &mut operation, &class)?;
                                    }
                                }
                                operations.push(operation);
                            }
                            _ => apply_detail(child, &mut resource, &class)?,
                        }
                    }
                }

                facts.push(resource);
                facts.extend(operations);
            }
            other => {
                // Ignore comments and unknown top-level nodes with a warning
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(facts)
}

/// `id`, `name` and `message` properties shared by resources and operations.
fn apply_common_props(node: &KdlNode, fact: &mut DeclaredPolicyFact) {
    fact.declared_id = string_prop(node, "id");
    fact.name = string_prop(node, "name");
    fact.message = string_prop(node, "message");
}

/// `description` and `option` children shared by resources and operations.
fn apply_detail(
    node: &KdlNode,
    fact: &mut DeclaredPolicyFact,
    class: &str,
) -> Result<(), PolicyError> {
    match node.name().value() {
        "description" => {
            fact.description = first_string_arg(node);
            Ok(())
        }
        "option" => {
            let mut args = node.entries().iter().filter(|e| e.name().is_none());
            let key = args
                .next()
                .and_then(|e| e.value().as_string())
                .ok_or_else(|| {
                    PolicyError::InvalidPolicy(format!(
                        "option in `{class}` requires a key (e.g. option \"level\" 3)"
                    ))
                })?
                .to_string();
            let value = args
                .next()
                .map(|e| kdl_to_json(e.value()))
                .unwrap_or(serde_json::Value::Bool(true));
            fact.options.insert(key, value);
            Ok(())
        }
        other => Err(PolicyError::InvalidPolicy(format!(
            "unexpected child `{other}` in `{class}` (expected `operation`, `description` or `option`)"
        ))),
    }
}

fn kdl_to_json(value: &KdlValue) -> serde_json::Value {
    if let Some(s) = value.as_string() {
        serde_json::Value::String(s.to_string())
    } else if let Some(b) = value.as_bool() {
        serde_json::Value::Bool(b)
    } else if let Some(i) = value.as_integer() {
        i64::try_from(i)
            .map(serde_json::Value::from)
            .unwrap_or_else(|_| serde_json::Value::String(i.to_string()))
    } else if let Some(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    } else {
        serde_json::Value::Null
    }
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn string_prop(node: &KdlNode, key: &str) -> Option<String> {
    node.get(key)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}
