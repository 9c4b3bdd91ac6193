//! This module contains errors pertaining to the symbolic execution of the
//! program.

use thiserror::Error;

/// Errors that occur while the evaluator steps an execution state.
///
/// Two of these deserve special mention. [`Error::Unimplemented`] marks a
/// feature the evaluator cannot handle soundly (for example, control flow
/// that depends on a tainted value); under a permissive configuration the
/// affected path is abandoned with a warning instead of failing the run.
/// [`Error::Bug`] marks a violated internal invariant and is always fatal.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("The reference {reference:?} has no value in the symbolic environment")]
    UnknownReference { reference: String },

    #[error("The expression {expression} cannot be used as a state reference")]
    NotAStateReference { expression: String },

    #[error("No declaration named {name:?} exists in the program")]
    UnknownDeclaration { name: String },

    #[error("No extern implementation is registered for {receiver}.{method}")]
    UnknownExtern { receiver: String, method: String },

    #[error("The extern {method} was invoked with {actual} arguments but declares {expected}")]
    ArityMismatch {
        method: String,
        expected: usize,
        actual: usize,
    },

    #[error("The state property {key:?} is absent or has an unexpected type")]
    BadProperty { key: String },

    #[error("Tried to step an execution state whose continuation is empty")]
    EmptyContinuation,

    #[error("Unimplemented feature: {message}")]
    Unimplemented { message: String },

    #[error("Implementation bug: {message}")]
    Bug { message: String },
}

impl Error {
    /// Creates an [`Error::Unimplemented`] from the provided message.
    #[must_use]
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::Unimplemented {
            message: message.into(),
        }
    }

    /// Creates an [`Error::Bug`] from the provided message.
    #[must_use]
    pub fn bug(message: impl Into<String>) -> Self {
        Self::Bug {
            message: message.into(),
        }
    }

    /// Checks whether the error marks an unimplemented feature that a
    /// permissive run may skip.
    #[must_use]
    pub fn is_unimplemented(&self) -> bool {
        matches!(self, Self::Unimplemented { .. })
    }
}

/// The result type for methods that may have execution errors.
pub type Result<T> = std::result::Result<T, Error>;
