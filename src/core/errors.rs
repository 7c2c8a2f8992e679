use thiserror::Error;

/// Unified error type for the batch job controller
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The referenced execution is not (or no longer) registered
    #[error("execution with id: {execution_id:?} not found")]
    ExecutionNotFound { execution_id: String },

    /// The execution exists but the node was never added to it
    #[error("pod for node: {node:?} is not registered in execution {execution_id:?}")]
    NodeNotRegistered { execution_id: String, node: String },

    /// A node was submitted twice for the same execution
    #[error("node {node:?} was already added to execution {execution_id:?}")]
    DuplicateNode { execution_id: String, node: String },

    /// The execution's queue is already closed
    #[error("execution {execution_id:?} is already sealed, no more pods can be added")]
    AlreadySealed { execution_id: String },

    /// Configuration errors, fatal at startup
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Invalid inbound report data
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Filesystem errors
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ControllerError {
    pub fn execution_not_found<S: Into<String>>(execution_id: S) -> Self {
        Self::ExecutionNotFound {
            execution_id: execution_id.into(),
        }
    }

    pub fn node_not_registered<S: Into<String>, N: Into<String>>(execution_id: S, node: N) -> Self {
        Self::NodeNotRegistered {
            execution_id: execution_id.into(),
            node: node.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error pointing at a config field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error with field
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for the lookup failures that stale lifecycle signals produce after
    /// an execution has been pruned. Callers log these and carry on.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ExecutionNotFound { .. } | Self::NodeNotRegistered { .. }
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::ExecutionNotFound { .. } | Self::NodeNotRegistered { .. } => "not_found",
            Self::DuplicateNode { .. } | Self::AlreadySealed { .. } => "caller",
            Self::Configuration { .. } => "configuration",
            Self::Validation { .. } => "validation",
            Self::Io { .. } => "io",
            Self::Metrics(_) => "metrics",
            Self::Yaml(_) | Self::Json(_) => "serialization",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ControllerError>;

impl From<std::io::Error> for ControllerError {
    fn from(err: std::io::Error) -> Self {
        Self::io("io_operation", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(ControllerError::execution_not_found("202401011200").is_not_found());
        assert!(ControllerError::node_not_registered("202401011200", "node-a").is_not_found());
        assert!(!ControllerError::configuration("bad").is_not_found());
        assert!(!ControllerError::AlreadySealed {
            execution_id: "x".into()
        }
        .is_not_found());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            ControllerError::execution_not_found("x").category(),
            "not_found"
        );
        assert_eq!(ControllerError::validation("x").category(), "validation");
        assert_eq!(
            ControllerError::configuration_field("x", "podPoolSize").category(),
            "configuration"
        );
    }

    #[test]
    fn test_error_messages() {
        let err = ControllerError::execution_not_found("202401011200");
        assert_eq!(
            err.to_string(),
            "execution with id: \"202401011200\" not found"
        );

        let err = ControllerError::io(
            "create report directory",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "IO operation failed: create report directory");
    }
}
