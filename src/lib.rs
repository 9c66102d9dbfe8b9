//! Warden - hierarchical authorization policy engine
//!
//! Compiles declared policy metadata into a tree of protected resources and
//! operations, caches it, and resolves at request time which policy nodes an
//! incoming call chain touches, delegating every allow/deny decision to
//! host-provided verify hooks.

pub mod authz;
pub mod errors;
pub mod settings;
pub mod storage;
