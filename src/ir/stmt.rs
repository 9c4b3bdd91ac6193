//! The statement portion of the IR model.

use std::{
    fmt::{Display, Formatter},
    rc::Rc,
};

use crate::ir::expr::ExprRef;

/// A reference-counted statement term.
pub type StmtRef = Rc<Statement>;

/// A statement of the IR.
///
/// The frontend normalizes the program so that every statement is one of
/// these kinds; declarations with initializers arrive as assignments.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Statement {
    /// Assignment of the right expression to the state reference denoted by
    /// the left expression.
    Assignment { left: ExprRef, right: ExprRef },

    /// Evaluation of a method call for its effects; any produced value is
    /// discarded.
    MethodCall(ExprRef),

    /// A two-armed conditional.
    If {
        cond: ExprRef,
        then_stmt: StmtRef,
        else_stmt: Option<StmtRef>,
    },

    /// A sequence of statements executed in order.
    Block(Vec<StmtRef>),

    /// Immediate termination of the enclosing pipeline block.
    Exit,
}

impl Statement {
    /// Creates an assignment of `right` to `left`.
    #[must_use]
    pub fn assign(left: ExprRef, right: ExprRef) -> StmtRef {
        Rc::new(Self::Assignment { left, right })
    }

    /// Creates a statement evaluating `call` for its effects.
    #[must_use]
    pub fn method_call(call: ExprRef) -> StmtRef {
        Rc::new(Self::MethodCall(call))
    }

    /// Creates a conditional on `cond` with the provided arms.
    #[must_use]
    pub fn if_stmt(cond: ExprRef, then_stmt: StmtRef, else_stmt: Option<StmtRef>) -> StmtRef {
        Rc::new(Self::If {
            cond,
            then_stmt,
            else_stmt,
        })
    }

    /// Creates a block of `statements` executed in order.
    #[must_use]
    pub fn block(statements: Vec<StmtRef>) -> StmtRef {
        Rc::new(Self::Block(statements))
    }

    /// Creates an exit statement.
    #[must_use]
    pub fn exit() -> StmtRef {
        Rc::new(Self::Exit)
    }

    /// Rebuilds the statement with every hole matching `id` in its directly
    /// held expressions replaced by `value`.
    ///
    /// Holes never occur on the left side of assignments or inside nested
    /// statements, so those are shared with the original.
    #[must_use]
    pub fn substitute(self: &Rc<Self>, id: u64, value: &ExprRef) -> StmtRef {
        match self.as_ref() {
            Self::Assignment { left, right } => {
                Self::assign(left.clone(), right.substitute(id, value))
            }
            Self::MethodCall(call) => Self::method_call(call.substitute(id, value)),
            Self::If {
                cond,
                then_stmt,
                else_stmt,
            } => Self::if_stmt(
                cond.substitute(id, value),
                then_stmt.clone(),
                else_stmt.clone(),
            ),
            Self::Block(_) | Self::Exit => self.clone(),
        }
    }
}

/// Pretty-prints the statement in a compact single-line form for traces and
/// diagnostics.
impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Assignment { left, right } => write!(f, "{left} = {right}"),
            Self::MethodCall(call) => write!(f, "{call}"),
            Self::If {
                cond,
                then_stmt,
                else_stmt,
            } => {
                write!(f, "if ({cond}) {{ {then_stmt} }}")?;
                if let Some(else_stmt) = else_stmt {
                    write!(f, " else {{ {else_stmt} }}")?;
                }
                Ok(())
            }
            Self::Block(statements) => {
                write!(f, "{{ ")?;
                for statement in statements {
                    write!(f, "{statement}; ")?;
                }
                write!(f, "}}")
            }
            Self::Exit => write!(f, "exit"),
        }
    }
}
