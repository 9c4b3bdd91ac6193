//! This module contains the structured trace events recorded along each
//! path, used to explain the tests produced from its terminal state.

use std::fmt::{Display, Formatter};

use crate::{env::StateRef, ir::expr::ExprRef};

/// A single event in a state's trace log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TraceEvent {
    /// A field was populated from the packet.
    Extract { reference: StateRef, value: ExprRef },

    /// A field was appended to the emit buffer.
    Emit { reference: StateRef, value: ExprRef },

    /// A free-form note.
    Generic(String),

    /// A labelled expression of interest, such as a guard being taken.
    Expression { label: String, expr: ExprRef },
}

impl TraceEvent {
    /// Creates a free-form note from the provided message.
    #[must_use]
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic(message.into())
    }

    /// Creates a labelled expression event.
    #[must_use]
    pub fn expression(label: impl Into<String>, expr: ExprRef) -> Self {
        Self::Expression {
            label: label.into(),
            expr,
        }
    }
}

impl Display for TraceEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extract { reference, value } => write!(f, "Extract: {reference} = {value}"),
            Self::Emit { reference, value } => write!(f, "Emit: {reference} = {value}"),
            Self::Generic(message) => write!(f, "{message}"),
            Self::Expression { label, expr } => write!(f, "{label}: {expr}"),
        }
    }
}
