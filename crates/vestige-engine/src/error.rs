//! Engine error types
//!
//! One crate-wide error enum keeps the policy in §ERROR HANDLING visible in
//! a single place: validation never mutates, transient driver errors are
//! retried inside the storage layer and surface as permanent only after
//! exhaustion, lookups report absence as a value rather than an error, and
//! invariant violations are fatal.

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A required item, edge, intention, or chain does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input rejected before any mutation
    #[error("Validation failed for {field}: {reason}")]
    ValidationFailed {
        /// Offending field name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// The connection was closed; all further operations fail with this
    #[error("Connection closed")]
    ConnectionClosed,

    /// Retryable driver failure (network blip, lock contention, cancellation)
    #[error("Transient driver error: {0}")]
    TransientDriver(String),

    /// Driver failure that retrying cannot fix, or retries were exhausted
    #[error("Driver error: {0}")]
    PermanentDriver(String),

    /// Stored schema does not match what the engine expects
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The authenticated tenant may not touch the requested rows
    #[error("Tenant not authorized: {0}")]
    TenantUnauthorized(String),

    /// Internal invariant broken (impossible scheduler state, chain
    /// containment failure). Fatal: propagates to the caller unchanged.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl EngineError {
    /// Shorthand for validation failures.
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        EngineError::ValidationFailed {
            field,
            reason: reason.into(),
        }
    }

    /// True for errors the storage layer is allowed to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientDriver(_))
    }
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::TransientDriver("timeout".into()).is_transient());
        assert!(!EngineError::PermanentDriver("syntax".into()).is_transient());
        assert!(!EngineError::ConnectionClosed.is_transient());
    }

    #[test]
    fn test_display_includes_field() {
        let err = EngineError::validation("limit", "must be positive");
        assert!(err.to_string().contains("limit"));
    }
}
