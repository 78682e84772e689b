//! Error types for engine operations

use crate::value::Value;
use thiserror::Error;

/// Result type for engine calls
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine operation errors
///
/// `Thrown` carries a script-level value (the engine's analogue of an
/// uncaught exception) and is the only variant an embedding layer should
/// surface as a script error; every other variant is a native-level fault
/// described by its message.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A value thrown by script-level execution
    #[error("uncaught script exception")]
    Thrown(Value),

    /// Execution was interrupted via the cross-thread interrupt flag
    #[error("execution interrupted")]
    Interrupted,

    /// The configured call depth budget was exhausted
    #[error("call depth limit of {0} exceeded")]
    CallDepthExceeded(u32),

    /// Microtask queue operations on a runtime configured without one
    #[error("the microtask queue is disabled for this runtime")]
    MicrotasksDisabled,

    /// `drain_microtasks` called from within a running microtask
    #[error("reentrant microtask drain")]
    ReentrantDrain,

    /// Scope released while not the innermost scope
    #[error("scope released out of order")]
    ScopeOrder,

    /// A handle of the wrong kind was passed to an engine operation
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected cell kind
        expected: &'static str,
        /// Actual cell kind
        got: &'static str,
    },

    /// Any other native-level fault
    #[error("{0}")]
    Fault(String),
}

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Fault(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Fault(s.to_string())
    }
}
