// error.rs: Error types for target control.
//
// Two families of failure reach a caller:
// - Precondition failures, raised by the guard before any backend is touched.
// - Protocol failures, raised by an attached backend and passed through as-is.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::ProtocolKind;
use crate::state::TargetState;

/// Errors that can occur when driving a target.
#[derive(Debug, Error)]
pub enum TargetError {
    /// A guarded action was refused before reaching a backend.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// An attached protocol reported a failure. Never retried.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A protocol of this kind is already attached to the target.
    #[error("{protocol} protocol already attached to target '{target}'")]
    AlreadyAttached {
        target: String,
        protocol: ProtocolKind,
    },

    /// A waiter was released because the target exited instead of stopping.
    #[error("target '{target}' exited while waiting for it to stop")]
    Exited { target: String },

    /// `wait_timeout` elapsed before the target stopped.
    #[error("target '{target}' did not stop within {timeout:?}")]
    WaitTimedOut { target: String, timeout: Duration },

    /// The variant-specific initializer failed.
    #[error("initialization of target '{target}' failed: {reason}")]
    Init { target: String, reason: String },

    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse a target config file.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Failed to serialize an event.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A guarded action was invoked without its protocol or in the wrong state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{action}() requested but {failure}")]
pub struct PreconditionError {
    /// Name of the refused action, e.g. `"step"`.
    pub action: &'static str,
    pub failure: PreconditionFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconditionFailure {
    /// The required protocol slot is empty (capability unavailable).
    ProtocolUnavailable { protocol: ProtocolKind },
    /// The target is not in the state the action requires (wrong state).
    WrongState {
        expected: TargetState,
        actual: TargetState,
    },
}

impl std::fmt::Display for PreconditionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreconditionFailure::ProtocolUnavailable { protocol } => {
                write!(f, "capability unavailable: no {} protocol attached", protocol)
            }
            PreconditionFailure::WrongState { expected, actual } => {
                write!(f, "wrong state: expected {}, target is {}", expected, actual)
            }
        }
    }
}

impl PreconditionError {
    /// `action` needs a `protocol` that is not attached.
    pub fn unavailable(action: &'static str, protocol: ProtocolKind) -> Self {
        Self {
            action,
            failure: PreconditionFailure::ProtocolUnavailable { protocol },
        }
    }

    /// `action` needs `expected` but the target is `actual`.
    pub fn wrong_state(action: &'static str, expected: TargetState, actual: TargetState) -> Self {
        Self {
            action,
            failure: PreconditionFailure::WrongState { expected, actual },
        }
    }

    /// True when the failure was a missing protocol.
    pub fn is_unavailable(&self) -> bool {
        matches!(self.failure, PreconditionFailure::ProtocolUnavailable { .. })
    }
}

impl TargetError {
    /// The precondition failure behind this error, if it is one.
    pub fn precondition(&self) -> Option<&PreconditionError> {
        match self {
            TargetError::Precondition(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors returned by protocol implementations.
///
/// Backends map their transport and emulator failures onto these variants;
/// the target hands them back to the caller untouched.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol timeout")]
    Timeout,

    #[error("request rejected by backend: {0}")]
    Rejected(String),

    #[error("protocol error: {0}")]
    Other(String),
}
