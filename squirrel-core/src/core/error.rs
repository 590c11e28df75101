//! Unified error handling for the asset pipeline.
//!
//! This module provides the centralized error type covering every failure
//! that can surface from the pipeline: configuration mistakes, source I/O,
//! processing failures and interrupted asynchronous jobs.

use std::fmt;
use std::sync::Arc;

/// Main error type for the asset pipeline.
#[derive(Debug)]
pub enum SquirrelError {
    /// Configuration-related errors (bad property values, malformed
    /// declarations, unusable component combinations).
    Config {
        /// Error message
        message: String,
    },

    /// A configuration entry references a component ID that does not exist.
    UnresolvedReference {
        /// Component kind ("source", "stage", "heap", "template", ...)
        kind: &'static str,
        /// The unresolved ID
        id: String,
    },

    /// A sink was asked to persist a nut but does not support saving.
    SaveNotSupported {
        /// ID of the offending source
        id: String,
    },

    /// I/O errors from file or network operations.
    Io(std::io::Error),

    /// A source could not deliver the bytes or metadata of a path.
    Stream {
        /// The logical path being read
        path: String,
        /// Error message
        message: String,
    },

    /// A transformation or cache computation failed.
    Processing {
        /// Error message
        message: String,
    },

    /// An asynchronous job was torn down before it could settle. Unlike the
    /// other variants this one is recoverable: the computation can simply be
    /// retried.
    Interrupted {
        /// Description of the interrupted operation
        operation: String,
    },

    /// A failure captured inside an asynchronous job, re-raised to a caller
    /// awaiting the shared result.
    Async(Arc<SquirrelError>),

    /// The requested workflow is not part of the built context.
    WorkflowNotFound {
        /// The workflow ID
        id: String,
    },
}

impl fmt::Display for SquirrelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SquirrelError::Config { message } => {
                write!(f, "Configuration error: {message}")
            },
            SquirrelError::UnresolvedReference { kind, id } => {
                write!(
                    f,
                    "Unresolved {kind} reference '{id}'. \
                     Solution: register it on the context builder before referencing it"
                )
            },
            SquirrelError::SaveNotSupported { id } => {
                write!(
                    f,
                    "Source '{id}' does not support save. \
                     Solution: only sources with save support can be used as workflow sinks"
                )
            },
            SquirrelError::Io(err) => write!(f, "I/O error: {err}"),
            SquirrelError::Stream { path, message } => {
                write!(f, "Stream error reading '{path}': {message}")
            },
            SquirrelError::Processing { message } => {
                write!(f, "Processing error: {message}")
            },
            SquirrelError::Interrupted { operation } => {
                write!(f, "Interrupted while waiting for {operation}")
            },
            SquirrelError::Async(inner) => write!(f, "{inner}"),
            SquirrelError::WorkflowNotFound { id } => {
                write!(f, "Workflow not found: '{id}'")
            },
        }
    }
}

impl std::error::Error for SquirrelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SquirrelError::Io(err) => Some(err),
            SquirrelError::Async(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SquirrelError {
    fn from(err: std::io::Error) -> Self {
        SquirrelError::Io(err)
    }
}

impl From<regex::Error> for SquirrelError {
    fn from(err: regex::Error) -> Self {
        SquirrelError::Config {
            message: format!("invalid regular expression: {err}"),
        }
    }
}

impl SquirrelError {
    /// Get the error category for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            SquirrelError::Config { .. } => "config",
            SquirrelError::UnresolvedReference { .. } => "config",
            SquirrelError::SaveNotSupported { .. } => "config",
            SquirrelError::Io(_) => "io",
            SquirrelError::Stream { .. } => "stream",
            SquirrelError::Processing { .. } => "processing",
            SquirrelError::Interrupted { .. } => "interrupted",
            SquirrelError::Async(inner) => inner.category(),
            SquirrelError::WorkflowNotFound { .. } => "not_found",
        }
    }

    /// Whether retrying the failed operation can reasonably succeed.
    ///
    /// Only interruptions qualify: configuration and I/O failures need
    /// an external fix first.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SquirrelError::Interrupted { .. } => true,
            SquirrelError::Async(inner) => inner.is_recoverable(),
            _ => false,
        }
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, SquirrelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_solution_hint() {
        let err = SquirrelError::UnresolvedReference {
            kind: "stage",
            id: "minify".to_string(),
        };
        let text = format!("{err}");
        assert!(text.contains("'minify'"));
        assert!(text.contains("Solution"));
    }

    #[test]
    fn test_async_error_forwards_inner() {
        let inner = Arc::new(SquirrelError::Interrupted {
            operation: "cache fill".to_string(),
        });
        let err = SquirrelError::Async(inner);
        assert_eq!(err.category(), "interrupted");
        assert!(err.is_recoverable());
        assert!(format!("{err}").contains("cache fill"));
    }

    #[test]
    fn test_io_conversion() {
        let err: SquirrelError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.category(), "io");
        assert!(!err.is_recoverable());
    }
}
