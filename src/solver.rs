//! This module contains the interface to the SMT decision procedure used to
//! prune infeasible paths.
//!
//! # Best-Effort Decisions
//!
//! The core never solves constraints itself; it only needs a yes/no/timeout
//! decision for a conjunction of boolean formulas. Model extraction is left
//! to the consumers of terminal states, which typically hold their own
//! handle to the same solver instance.

use std::{cell::RefCell, fmt::Debug, rc::Rc};

use crate::ir::expr::ExprRef;

/// A dynamically dispatched [`Solver`] instance.
///
/// The interior mutability accommodates solvers that maintain incremental
/// assertion stacks across queries.
pub type DynSolver = Rc<RefCell<dyn Solver>>;

/// The interface to a decision procedure for path constraints.
///
/// The interface is deliberately small: implementations are free to
/// translate the constraint set into whatever theory encoding they support,
/// as long as the decision respects the semantics of the IR operators.
pub trait Solver
where
    Self: Debug,
{
    /// Decides the satisfiability of the conjunction of `constraints`.
    ///
    /// Returns `Some(true)` when satisfiable, `Some(false)` when
    /// unsatisfiable, and [`None`] when the decision timed out. Callers
    /// treat a timeout as unsatisfiable but log a warning.
    #[must_use]
    fn check_sat(&mut self, constraints: &[ExprRef]) -> Option<bool>;
}

/// An implementation of the [`Solver`] trait that reports every constraint
/// set as satisfiable.
///
/// This keeps every enumerated path alive and is useful for tests and for
/// exploring programs whose constraints are known to be consistent by
/// construction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UncheckedSolver;

impl UncheckedSolver {
    /// Wraps `self` into a [`DynSolver`].
    #[must_use]
    pub fn in_rc(self) -> DynSolver {
        Rc::new(RefCell::new(self))
    }
}

impl Solver for UncheckedSolver {
    fn check_sat(&mut self, _constraints: &[ExprRef]) -> Option<bool> {
        Some(true)
    }
}
