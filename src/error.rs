//! Gateway-wide error types.
//!
//! Request-path outcomes (no match, rejection, dispatch failures) are not
//! errors at this level; they are turned into client responses by the
//! response pipeline. Only publish-time and process-level failures live here.

use thiserror::Error;

use crate::config::loader::ConfigError;

/// A route table could not be published. The previous version stays active.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Two routes in one table share an id.
    #[error("duplicate route id `{0}`")]
    DuplicateRouteId(String),

    /// A route predicate could not be compiled.
    #[error("route `{route}` has a malformed predicate: {reason}")]
    MalformedPredicate { route: String, reason: String },

    /// A route points at an upstream that is not defined.
    #[error("route `{route}` references unknown upstream `{upstream}`")]
    UnknownUpstream { route: String, upstream: String },

    /// An upstream definition is unusable.
    #[error("upstream `{name}` is invalid: {reason}")]
    InvalidUpstream { name: String, reason: String },

    /// A policy knob is out of range.
    #[error("route `{route}` has an invalid policy: {reason}")]
    InvalidPolicy { route: String, reason: String },
}

/// Process-level failures of the gateway binary.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("config watcher failed: {0}")]
    Watch(#[from] notify::Error),
}
