//! Error types for the hyperstore model store
//!
//! Every failure is raised synchronously and aborts the enclosing session;
//! validation diagnostics are reported separately and do not abort.

use crate::value_objects::ElementId;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, HyperstoreError>;

/// Errors raised by store, schema, graph and session operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum HyperstoreError {
    /// A required parameter was missing or malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Schema lookup failed in throwing mode
    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    /// A simple schema name resolves to more than one schema
    #[error("Ambiguous schema name: {0}")]
    AmbiguousSchema(String),

    /// A schema with the same id is already registered
    #[error("Duplicate schema: {0}")]
    DuplicateSchema(String),

    /// A graph element with the same id is already live
    #[error("Duplicate element: {0}")]
    DuplicateElement(ElementId),

    /// The operation references a non-existent or wrong-domain element
    #[error("Invalid element: {0}")]
    InvalidElement(String),

    /// A property or reference was used against a value of the wrong shape
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// The element or domain has been disposed
    #[error("Can not use a disposed element: {0}")]
    DisposedElement(ElementId),

    /// A check constraint failed at property set or session commit
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// A JSON document did not match the expected envelope or object form
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}
