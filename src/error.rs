//! Error types for the OCCI bridge
//!
//! A single taxonomy covers every externally visible failure. Platform client
//! adapters are the only place vendor-specific errors are translated into this
//! taxonomy; layers above them propagate untouched.

use thiserror::Error;

/// Unified error type for the bridge
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Argument / Input Errors
    // =========================================================================
    #[error("Missing mandatory argument: {0}")]
    Argument(String),

    #[error("Argument type mismatch: {argument} expected {expected}")]
    ArgumentTypeMismatch { argument: String, expected: String },

    #[error("Malformed identifier: {0}")]
    IdentifierNotValid(String),

    // =========================================================================
    // Resource Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{id}")]
    ResourceNotFound { kind: String, id: String },

    #[error("Identifier conflict: {kind}/{id} already exists")]
    IdentifierConflict { kind: String, id: String },

    #[error("Resource not valid: {0}")]
    ResourceNotValid(String),

    #[error("Operation invalid in state {state}: {reason}")]
    ResourceState { state: String, reason: String },

    #[error("Platform rejected action {action}: {reason}")]
    ResourceAction { action: String, reason: String },

    #[error("Resource retrieval failed: {0}")]
    ResourceRetrieval(String),

    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    // =========================================================================
    // Contract Errors
    // =========================================================================
    #[error("Action not implemented: {0}")]
    ActionNotImplemented(String),

    #[error("Method not implemented: {backend} does not support {operation}")]
    MethodNotImplemented { backend: String, operation: String },

    // =========================================================================
    // Platform / Transport Errors
    // =========================================================================
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Parse / IO Errors (fixtures, templates)
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a not-found error
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Error::ResourceNotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Shorthand for a duplicate-identifier error
    pub fn conflict(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Error::IdentifierConflict {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// True for failures caused by the caller's input, as opposed to the
    /// platform or the bridge itself. The HTTP layer maps these to 4xx.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            Error::Argument(_)
                | Error::ArgumentTypeMismatch { .. }
                | Error::IdentifierNotValid(_)
                | Error::ResourceNotFound { .. }
                | Error::IdentifierConflict { .. }
                | Error::ResourceNotValid(_)
                | Error::ResourceState { .. }
                | Error::ActionNotImplemented(_)
                | Error::Authentication(_)
                | Error::Authorization(_)
        )
    }

    /// True for failures that a later identical call could succeed on
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::ResourceRetrieval(_))
    }
}

/// Result type alias for the bridge
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_fault_classification() {
        assert!(Error::Argument("id".into()).is_client_fault());
        assert!(Error::not_found("compute", "42").is_client_fault());
        assert!(Error::ResourceNotValid("no os_tpl mixin".into()).is_client_fault());
        assert!(!Error::Connection("timed out".into()).is_client_fault());
        assert!(!Error::Internal("skeleton missing".into()).is_client_fault());
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Connection("reset".into()).is_transient());
        assert!(!Error::conflict("network", "5").is_transient());
    }

    #[test]
    fn test_display_carries_context() {
        let err = Error::not_found("storage", "vol-0b15340c");
        assert_eq!(err.to_string(), "Resource not found: storage/vol-0b15340c");

        let err = Error::ResourceState {
            state: "suspended".into(),
            reason: "stop not available".into(),
        };
        assert!(err.to_string().contains("suspended"));
    }
}
