use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use crate::authz::types::{
    Forest, NodeRef, OperationIdx, OperationKind, Options, ResourceIdx,
};
use crate::authz::PolicyTree;

/// Read-only introspection of the compiled tree.
pub fn router(state: Arc<PolicyTree>) -> Router {
    Router::new()
        .route("/v1/tree", get(handle_tree))
        .route("/v1/nodes/{id}", get(handle_node))
        .route("/v1/classes/{class}", get(handle_class))
        .route("/healthz", get(health))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ResourceView {
    pub id: String,
    pub class_name: String,
    pub name: String,
    pub description: Option<String>,
    pub message: String,
    pub options: Options,
    pub parent: Option<String>,
    pub operations: Vec<OperationView>,
    pub children: Vec<ResourceView>,
}

#[derive(Debug, Serialize)]
pub struct OperationView {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub message: String,
    pub options: Options,
    pub kind: OperationKind,
    pub method_name: String,
    pub method_suffix: String,
    /// Id of the owning resource
    pub resource: String,
}

impl ResourceView {
    /// Nested view; `depth` limits how many child levels are expanded.
    pub fn build(forest: &Forest, idx: ResourceIdx, depth: Option<usize>) -> Self {
        let node = forest.resource(idx);
        let children = match depth {
            Some(0) => Vec::new(),
            _ => node
                .children
                .iter()
                .map(|&child| Self::build(forest, child, depth.map(|d| d - 1)))
                .collect(),
        };
        Self {
            id: node.id.clone(),
            class_name: node.class_name.clone(),
            name: node.name.clone(),
            description: node.description.clone(),
            message: node.message.clone(),
            options: node.options.clone(),
            parent: node.parent.map(|p| forest.resource(p).id.clone()),
            operations: node
                .operations
                .iter()
                .map(|&op| OperationView::build(forest, op))
                .collect(),
            children,
        }
    }
}

impl OperationView {
    pub fn build(forest: &Forest, idx: OperationIdx) -> Self {
        let node = forest.operation(idx);
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            description: node.description.clone(),
            message: node.message.clone(),
            options: node.options.clone(),
            kind: node.kind,
            method_name: node.method_name.clone(),
            method_suffix: node.method_suffix.clone(),
            resource: forest.resource(node.resource).id.clone(),
        }
    }
}

fn node_response(forest: &Forest, node: NodeRef) -> Response {
    match node {
        NodeRef::Resource(idx) => Json(ResourceView::build(forest, idx, Some(0))).into_response(),
        NodeRef::Operation(idx) => Json(OperationView::build(forest, idx)).into_response(),
    }
}

fn not_found(what: &str, key: &str) -> Response {
    let body = json!({ "error": format!("no policy node for {what} `{key}`") });
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

async fn handle_tree(State(state): State<Arc<PolicyTree>>) -> impl IntoResponse {
    let forest = state.forest();
    let roots: Vec<ResourceView> = forest
        .roots
        .iter()
        .map(|&root| ResourceView::build(forest, root, None))
        .collect();
    Json(roots)
}

async fn handle_node(
    State(state): State<Arc<PolicyTree>>,
    Path(id): Path<String>,
) -> Response {
    match state.index().find_by_id(&id) {
        Some(node) => node_response(state.forest(), node),
        None => not_found("id", &id),
    }
}

async fn handle_class(
    State(state): State<Arc<PolicyTree>>,
    Path(class): Path<String>,
) -> Response {
    match state.index().find_by_class(&class) {
        Some(node) => node_response(state.forest(), node),
        None => not_found("class", &class),
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::DeclaredPolicyFact;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> Arc<PolicyTree> {
        Arc::new(
            PolicyTree::compile(vec![
                DeclaredPolicyFact::resource("App.Admin").with_id("admin"),
                DeclaredPolicyFact::operation("App.Admin", "handleRemoveUser").with_id("remove"),
                DeclaredPolicyFact::resource("App.Grid").with_parent("App.Admin"),
            ])
            .unwrap(),
        )
    }

    async fn get_json(uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(state())
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_tree_is_nested() {
        let (status, body) = get_json("/v1/tree").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], "admin");
        assert_eq!(body[0]["operations"][0]["kind"], "handle");
        assert_eq!(body[0]["operations"][0]["method_suffix"], "removeUser");
        assert_eq!(body[0]["children"][0]["class_name"], "App.Grid");
        assert_eq!(body[0]["children"][0]["parent"], "admin");
    }

    #[tokio::test]
    async fn test_node_by_id() {
        let (status, body) = get_json("/v1/nodes/remove").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["method_name"], "handleRemoveUser");
        assert_eq!(body["resource"], "admin");

        let (status, body) = get_json("/v1/nodes/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_node_by_class() {
        let (status, body) = get_json("/v1/classes/App.Admin").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Admin");
        assert_eq!(body["children"], serde_json::json!([]));
    }
}
