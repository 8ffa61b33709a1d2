//! Error Types
//!
//! Every failure the naming layer can surface to a caller. None of these are
//! retried inside the crate; retry policy belongs to whoever issued the call.
//!
//! Classification (see [`crate::circuitbreaker`]) never produces an error: an
//! unrecognized error degrades to a non-circuit-break verdict instead.

use thiserror::Error;

use crate::routing::chain::RoutePath;

/// Failure reported by an external collaborator (discovery backend, picker,
/// result reporter)
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The collaborator could not be reached
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The collaborator answered with an error code
    #[error("backend rejected request (code {code}): {message}")]
    Rejected {
        /// Collaborator specific code
        code: i32,
        /// Human readable reason
        message: String,
    },

    /// The collaborator returned data the caller could not use
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

/// Errors surfaced by routing, selection and reporting
#[derive(Debug, Error)]
pub enum NamingError {
    /// Required identity fields were missing from the request
    #[error("invalid request: {0}")]
    Config(String),

    /// Fetching the published routing rule failed
    #[error("get source service ns: {namespace}, service: {service} route rule err: {source}")]
    RuleFetch {
        /// Source namespace the rule was requested for
        namespace: String,
        /// Source service the rule was requested for
        service: String,
        /// Underlying collaborator error
        source: BackendError,
    },

    /// The filter stage chain failed to execute
    #[error("filter instances on {path} path err: {source}")]
    FilterExecution {
        /// Path that was being executed
        path: RoutePath,
        /// Underlying collaborator error
        source: BackendError,
    },

    /// The stage chain ran but nothing survived
    #[error("env {env} has no instances, key: {key}")]
    NoInstancesAvailable {
        /// Environment that produced the empty result
        env: String,
        /// Environment selector key in use (may be empty)
        key: String,
    },

    /// A node lacked the attachment the operation needs
    #[error("invalid instance metadata: {0}")]
    InvalidInstanceMetadata(&'static str),

    /// The router was handed an empty node list
    #[error("no node available")]
    NoNodeAvailable,

    /// The picking collaborator failed
    #[error("get one instance err: {0}")]
    Pick(#[source] BackendError),

    /// The picking collaborator answered with no instance
    #[error("get one instance return empty")]
    EmptyPick,

    /// The result reporter failed
    #[error("report err: {0}")]
    Report(#[source] BackendError),
}

impl NamingError {
    /// Whether this error means "nothing to route to" rather than a failure
    /// of the machinery itself
    #[must_use]
    pub fn is_empty_result(&self) -> bool {
        matches!(
            self,
            Self::NoInstancesAvailable { .. } | Self::NoNodeAvailable | Self::EmptyPick
        )
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, NamingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_instances_message_names_env_and_key() {
        let err = NamingError::NoInstancesAvailable {
            env: "test".to_string(),
            key: "k1".to_string(),
        };
        assert_eq!(err.to_string(), "env test has no instances, key: k1");
        assert!(err.is_empty_result());
    }

    #[test]
    fn test_rule_fetch_wraps_backend_error() {
        let err = NamingError::RuleFetch {
            namespace: "Production".to_string(),
            service: "caller".to_string(),
            source: BackendError::Unavailable("connection refused".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("ns: Production"));
        assert!(msg.contains("service: caller"));
        assert!(msg.contains("connection refused"));
        assert!(!err.is_empty_result());
        assert!(std::error::Error::source(&err).is_some());
    }
}
