//! Error types and handling for the delta relay
//!
//! Every error that crosses a collaborator boundary keeps its structured
//! context (document ids, delta timestamps, offending schema paths) so a
//! failure can be diagnosed from the log line alone.

use crate::core::types::{DeltaType, DocId, UnixTs, Value};
use std::fmt;
use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the delta relay
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Envelope did not conform to the message schema
    #[error("{message}")]
    Validation {
        /// Error reported by the schema
        message: String,
        /// Offending paths and values
        context: ValidationContext,
    },

    /// No channel or connection available
    #[error("{0}")]
    Transport(String),

    /// The broker refused the message
    #[error("{message}")]
    Publish {
        /// Failure description
        message: String,
        /// Delta being published when the failure occurred
        context: PublishContext,
    },

    /// Processing state could not be persisted
    #[error("Persistence error for document {doc_id}: {message}")]
    Persistence {
        /// Document whose state update was rejected
        doc_id: DocId,
        /// Failure description
        message: String,
    },

    /// Binary encoding failed after validation
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Malformed schema definition
    #[error("Schema error: {0}")]
    Schema(String),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Prometheus metrics errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Context attached to schema validation failures
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationContext {
    /// Dotted paths into the envelope that failed validation
    pub invalid_paths: Vec<String>,
    /// Values found at those paths
    pub invalid_data: Vec<Value>,
}

/// Context attached to publish failures
#[derive(Debug, Clone, PartialEq)]
pub struct PublishContext {
    /// Document the delta belongs to
    pub doc_id: DocId,
    /// Quote identifier as known to downstream consumers
    pub quote_id: DocId,
    /// Stream the delta came from
    pub delta_type: DeltaType,
    /// Timestamp of the delta
    pub delta_ts: UnixTs,
}

impl fmt::Display for PublishContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "doc_id={} quote_id={} delta_type={} delta_ts={}",
            self.doc_id, self.quote_id, self.delta_type, self.delta_ts
        )
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(doc_id: DocId, msg: impl Into<String>) -> Self {
        Self::Persistence {
            doc_id,
            message: msg.into(),
        }
    }

    /// Create an encoding error
    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    /// Create a schema definition error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Publish context, if this is a publish failure
    pub fn publish_context(&self) -> Option<&PublishContext> {
        match self {
            Error::Publish { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Validation context, if this is a schema validation failure
    pub fn validation_context(&self) -> Option<&ValidationContext> {
        match self {
            Error::Validation { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Check if a later pass could plausibly succeed without intervention
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Publish { .. } | Error::Persistence { .. } | Error::Io(_)
        )
    }

    /// Structured key/value pairs describing this error, for log fields
    pub fn context_fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Error::Publish { context, .. } => vec![
                ("doc_id", context.doc_id.to_string()),
                ("quote_id", context.quote_id.to_string()),
                ("delta_type", context.delta_type.to_string()),
                ("delta_ts", context.delta_ts.to_string()),
            ],
            Error::Validation { context, .. } => vec![
                ("invalid_paths", context.invalid_paths.join(",")),
                ("invalid_count", context.invalid_data.len().to_string()),
            ],
            Error::Persistence { doc_id, .. } => vec![("doc_id", doc_id.to_string())],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_context_fields() {
        let err = Error::Publish {
            message: "Delta publish failed".to_string(),
            context: PublishContext {
                doc_id: 7,
                quote_id: 7,
                delta_type: DeltaType::Ratedata,
                delta_ts: 1200,
            },
        };

        assert_eq!(err.to_string(), "Delta publish failed");
        assert!(err.is_retryable());
        assert_eq!(err.context_fields()[3], ("delta_ts", "1200".to_string()));
        assert_eq!(err.publish_context().map(|c| c.doc_id), Some(7));
    }

    #[test]
    fn test_validation_is_not_retryable() {
        let err = Error::Validation {
            message: "Invalid message".to_string(),
            context: ValidationContext {
                invalid_paths: vec!["data.a".to_string(), "delta.b".to_string()],
                invalid_data: vec![Value::Bool(true), Value::Null],
            },
        };

        assert!(!err.is_retryable());
        assert_eq!(
            err.context_fields(),
            vec![
                ("invalid_paths", "data.a,delta.b".to_string()),
                ("invalid_count", "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_plain_errors_have_no_context() {
        assert!(Error::config("bad").context_fields().is_empty());
        assert_eq!(Error::config("bad").to_string(), "Configuration error: bad");
    }
}
