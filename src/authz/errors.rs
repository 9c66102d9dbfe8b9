use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

use crate::authz::signal::Signal;

/// Compile-time failures. Any of these aborts startup; there is no partial
/// forest to fall back to.
#[derive(Debug, Error, Diagnostic)]
pub enum PolicyError {
    #[error("Resource `{class}` declares undefined parent `{parent}`")]
    #[diagnostic(
        code(warden::policy::undefined_parent),
        help("Declare a resource for `{parent}` in the same batch, or remove the parent reference")
    )]
    UndefinedParent { class: String, parent: String },

    #[error("Duplicate policy id `{id}` shared by {first} and {second}; assign an explicit id to one of them")]
    #[diagnostic(
        code(warden::policy::duplicate_id),
        help("Declare e.g. id=\"unique-name\" on one of the two")
    )]
    DuplicateId {
        id: String,
        first: String,
        second: String,
    },

    #[error("Invalid resource name `{name}` on `{class}`")]
    #[diagnostic(
        code(warden::policy::invalid_name),
        help("Resource names may only contain letters (A-Z, a-z)")
    )]
    InvalidName { class: String, name: String },

    #[error("Class `{class}` is declared as a resource more than once")]
    #[diagnostic(
        code(warden::policy::duplicate_class),
        help("Each class may carry a single resource declaration")
    )]
    DuplicateClass { class: String },

    #[error("Operation declared on `{class}` has no method name")]
    #[diagnostic(
        code(warden::policy::missing_method),
        help("Operation facts must name the method they protect, e.g. \"handleRemoveUser\"")
    )]
    MissingMethodName { class: String },

    #[error("Cyclic resource parents detected: {0}")]
    #[diagnostic(
        code(warden::policy::cyclic_parent),
        help("Check the `parent` declarations of your resources for circular references")
    )]
    CyclicParent(String),

    #[error("Invalid policy: {0}")]
    #[diagnostic(
        code(warden::policy::invalid_policy),
        help("Each policy file must contain `resource` nodes with `operation` children")
    )]
    InvalidPolicy(String),

    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(warden::policy::policy_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(warden::policy::kdl_parse),
        help("Check your KDL file syntax (see https://kdl.dev)")
    )]
    KdlParse(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(warden::policy::io))]
    Io(#[from] std::io::Error),
}

/// Raised by lookup callers passing a destination that does not follow
/// `"<presenter>:<action>[!]"`.
#[derive(Debug, Error, Diagnostic)]
pub enum LinkError {
    #[error("Invalid link destination `{0}`")]
    #[diagnostic(
        code(warden::link::invalid_destination),
        help("Destinations look like \"Admin:User:edit\" or \"Admin:removeUser!\" for signals")
    )]
    InvalidLinkDestination(String),

    #[error("Cannot resolve presenter `{0}` to a class")]
    #[diagnostic(
        code(warden::link::unknown_presenter),
        help("Add the presenter to the [links.presenters] table of the configuration")
    )]
    UnknownPresenter(String),
}

/// A verify hook refused a signal. This is an expected outcome, handed to the
/// denial handlers, never a defect.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AccessDenied {
    signal: Arc<Signal>,
    message: String,
    code: u16,
}

impl AccessDenied {
    pub const DEFAULT_CODE: u16 = 401;

    pub fn new(signal: Arc<Signal>, message: impl Into<String>) -> Self {
        Self {
            signal,
            message: message.into(),
            code: Self::DEFAULT_CODE,
        }
    }

    /// The signal that was denied.
    pub fn signal(&self) -> &Arc<Signal> {
        &self.signal
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> u16 {
        self.code
    }
}

impl IntoResponse for LinkError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.to_string() });
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

impl IntoResponse for AccessDenied {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::FORBIDDEN);
        let body = json!({
            "error": self.message,
            "node": self.signal.node_id(),
        });
        (status, Json(body)).into_response()
    }
}
