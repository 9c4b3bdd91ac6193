//! This module contains the exploration strategies that drive the small-step
//! evaluator over a work list of branches, prune infeasible paths through
//! the solver, and hand terminal states to the test callback.

pub mod linear;

use std::rc::Rc;

use log::warn;

use crate::{
    config::Config,
    error::execution::Result,
    ir::expr::ExprRef,
    program::ProgramInfo,
    solver::DynSolver,
    state::ExecutionState,
    step::{Branch, SmallStepEvaluator},
};

/// The callback invoked for each feasible terminal state.
///
/// The callback extracts a model for the state's path constraint and
/// serializes a test from it. Returning `true` signals that enough tests
/// have been produced and the strategy should stop.
pub type TestCallback<'a> = dyn FnMut(&ExecutionState) -> bool + 'a;

/// The machinery shared by all exploration strategies: the evaluator, the
/// solver handle, and the seeded branch selector.
#[derive(Clone, Debug)]
pub struct ExplorationStrategy {
    evaluator: SmallStepEvaluator,
    solver: DynSolver,
    rng: SplitMix64,
}

impl ExplorationStrategy {
    /// Creates the shared strategy machinery for `program_info`.
    #[must_use]
    pub fn new(program_info: Rc<ProgramInfo>, solver: DynSolver, config: Config) -> Self {
        let rng = SplitMix64::new(config.seed.unwrap_or_default());
        let evaluator = SmallStepEvaluator::new(program_info, config);
        Self {
            evaluator,
            solver,
            rng,
        }
    }

    /// Gets the evaluator.
    #[must_use]
    pub fn evaluator(&self) -> &SmallStepEvaluator {
        &self.evaluator
    }

    /// Performs one step of `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if stepping fails; see [`SmallStepEvaluator::step`].
    pub fn step(&self, state: &ExecutionState) -> Result<Vec<Branch>> {
        self.evaluator.step(state)
    }

    /// Decides the consistency of `constraints`, treating a solver timeout
    /// as unsatisfiable with a warning.
    #[must_use]
    pub fn check_sat(&self, constraints: &[ExprRef]) -> bool {
        match self.solver.borrow_mut().check_sat(constraints) {
            Some(verdict) => verdict,
            None => {
                warn!("Solver timed out; treating the path as unfeasible");
                false
            }
        }
    }

    /// Selects an index into a branch pool of `len` entries.
    pub fn select_index(&mut self, len: usize) -> usize {
        debug_assert!(len > 0, "Cannot select from an empty branch pool");
        usize::try_from(self.rng.next_u64() % len as u64).expect("the index fits by construction")
    }
}

/// A small deterministic pseudo-random generator for branch selection.
///
/// Reproducibility under a fixed seed is part of the exploration contract,
/// so the generator is fully specified here rather than borrowed from an
/// environment-dependent source.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    /// Creates a generator from `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Produces the next value of the sequence.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

#[cfg(test)]
mod test {
    use crate::strategy::SplitMix64;

    #[test]
    fn generator_is_deterministic_per_seed() {
        let mut a = SplitMix64::new(7);
        let mut b = SplitMix64::new(7);
        let seq_a: Vec<u64> = (0..8).map(|_| a.next_u64()).collect();
        let seq_b: Vec<u64> = (0..8).map(|_| b.next_u64()).collect();
        assert_eq!(seq_a, seq_b);

        let mut c = SplitMix64::new(8);
        let seq_c: Vec<u64> = (0..8).map(|_| c.next_u64()).collect();
        assert_ne!(seq_a, seq_c);
    }
}
