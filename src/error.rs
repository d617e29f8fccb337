//! Error taxonomy shared by every layer.
//!
//! Each layer has its own `thiserror` enum; all of them collapse into an
//! [`ErrorKind`] when they surface to the control loop as an observation.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::ElementDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AmbiguousMatch,
    ActionTimeout,
    NavigationError,
    OracleError,
    UserAbort,
    IterationLimitExceeded,
    LoopDetected,
    NotInteractable,
    InvalidRequest,
    DriverError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AmbiguousMatch => "ambiguous_match",
            ErrorKind::ActionTimeout => "action_timeout",
            ErrorKind::NavigationError => "navigation_error",
            ErrorKind::OracleError => "oracle_error",
            ErrorKind::UserAbort => "user_abort",
            ErrorKind::IterationLimitExceeded => "iteration_limit_exceeded",
            ErrorKind::LoopDetected => "loop_detected",
            ErrorKind::NotInteractable => "not_interactable",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::DriverError => "driver_error",
        }
    }

    /// Kinds that end the instruction no matter what the oracle wants next.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::UserAbort | ErrorKind::IterationLimitExceeded | ErrorKind::LoopDetected
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures reported by the browser driver capability.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DriverError {
    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("input dispatch failed: {0}")]
    Input(String),

    #[error("driver timed out: {0}")]
    Timeout(String),

    #[error("unexpected script result: {0}")]
    Decode(String),
}

impl DriverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriverError::Navigation(_) => ErrorKind::NavigationError,
            DriverError::Timeout(_) => ErrorKind::ActionTimeout,
            _ => ErrorKind::DriverError,
        }
    }
}

/// Resolver outcome when no single element can be chosen.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolveError {
    #[error("no element matches {target}")]
    NotFound { target: String },

    #[error("{} elements match {target}", .candidates.len())]
    Ambiguous {
        target: String,
        candidates: Vec<ElementDescriptor>,
    },
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::NotFound { .. } => ErrorKind::NotFound,
            ResolveError::Ambiguous { .. } => ErrorKind::AmbiguousMatch,
        }
    }

    /// Detail for the oracle, listing candidates so it can re-prompt by ID.
    pub fn detail(&self) -> String {
        match self {
            ResolveError::NotFound { .. } => self.to_string(),
            ResolveError::Ambiguous { candidates, .. } => {
                let lines = candidates
                    .iter()
                    .map(ElementDescriptor::map_line)
                    .collect::<Vec<_>>()
                    .join("; ");
                format!("{}: {}. Retry with one element id.", self, lines)
            }
        }
    }
}

/// Failures of the interaction simulator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InteractError {
    /// Present but not yet usable (covered, disabled, zero-sized).
    #[error("element {id} is not interactable: {reason}")]
    NotInteractable { id: u32, reason: String },

    /// The locator no longer matches a live node.
    #[error("element {id} is no longer attached to the page")]
    Detached { id: u32 },

    #[error("{0}")]
    Invalid(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl InteractError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InteractError::NotInteractable { .. } => ErrorKind::NotInteractable,
            InteractError::Detached { .. } => ErrorKind::NotFound,
            InteractError::Invalid(_) => ErrorKind::InvalidRequest,
            InteractError::Navigation(_) => ErrorKind::NavigationError,
            InteractError::Driver(err) => err.kind(),
        }
    }

    /// Transient failures worth a backoff retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, InteractError::NotInteractable { .. })
    }
}

/// Failures talking to the LLM oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("oracle API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("unparsable oracle output: {0}")]
    Parse(String),

    #[error("oracle did not answer within {0} seconds")]
    Timeout(u64),
}

/// Failures of the user-interaction channel.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum UserError {
    #[error("user aborted the task")]
    Aborted,

    #[error("user channel closed")]
    Closed,

    #[error("no answer within {0} seconds")]
    Timeout(u64),

    #[error("user channel failed: {0}")]
    Io(String),
}

impl UserError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UserError::Timeout(_) => ErrorKind::ActionTimeout,
            _ => ErrorKind::UserAbort,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}
