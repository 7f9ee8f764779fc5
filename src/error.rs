//! Error types for the data-access layer

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the data-access layer
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Registry Errors
    // =========================================================================
    /// No repository or metrics registered for the entity type
    #[error("No repository registered for entity type: {entity_type}")]
    NotRegistered { entity_type: String },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// Opaque failure reported by a persistence backend
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// PostgreSQL driver error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Record required by the operation does not exist
    #[error("{entity_type} {id} not found")]
    RecordNotFound { entity_type: String, id: String },

    /// Optimistic version check failed
    #[error("Version conflict for {entity_type} {id}: expected {expected}, found {actual}")]
    VersionConflict {
        entity_type: String,
        id: String,
        expected: i64,
        actual: i64,
    },

    /// Filter or ordering cannot be expressed safely
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    // =========================================================================
    // Cache Errors
    // =========================================================================
    /// Internal cache malfunction (never surfaced past the caching layer)
    #[error("Cache fault: {0}")]
    CacheFault(String),

    // =========================================================================
    // Setup Errors
    // =========================================================================
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration file: {0}")]
    ConfigFile(#[from] serde_yaml::Error),

    // =========================================================================
    // Authorization Errors
    // =========================================================================
    /// Access control refused the operation
    #[error("Access denied: user {user_id} may not {action} {resource}")]
    AccessDenied {
        user_id: String,
        action: String,
        resource: String,
    },

    // =========================================================================
    // Misc
    // =========================================================================
    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a `NotRegistered` error for an entity type key.
    pub fn not_registered(entity_type: impl std::fmt::Display) -> Self {
        Error::NotRegistered {
            entity_type: entity_type.to_string(),
        }
    }

    /// True for errors originating in the persistence collaborator.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            Error::Persistence(_)
                | Error::Database(_)
                | Error::RecordNotFound { .. }
                | Error::VersionConflict { .. }
        )
    }

    /// True when a factory lookup failed.
    pub fn is_not_registered(&self) -> bool {
        matches!(self, Error::NotRegistered { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_registered_display() {
        let err = Error::not_registered("document");
        assert!(err.is_not_registered());
        assert_eq!(
            err.to_string(),
            "No repository registered for entity type: document"
        );
    }

    #[test]
    fn test_persistence_classification() {
        assert!(Error::Persistence("boom".into()).is_persistence());
        assert!(Error::RecordNotFound {
            entity_type: "document".into(),
            id: "x".into()
        }
        .is_persistence());
        assert!(!Error::CacheFault("bad bytes".into()).is_persistence());
        assert!(!Error::Configuration("ttl".into()).is_persistence());
    }
}
