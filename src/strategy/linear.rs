//! This module contains the linear enumeration strategy: the reference
//! exploration that first collects a bounded pool of feasible terminal
//! branches and then produces tests from it in seeded random order.

use std::rc::Rc;

use log::warn;

use crate::{
    config::Config,
    error::execution::{Error, Result},
    program::ProgramInfo,
    solver::DynSolver,
    step::Branch,
    strategy::{ExplorationStrategy, TestCallback},
};

/// The linear enumeration strategy.
///
/// Construction explores the program exhaustively (up to the configured
/// bound) and keeps every feasible terminal branch; [`Self::run`] then
/// repeatedly selects a branch with the seeded generator and hands its
/// terminal state to the callback.
#[derive(Clone, Debug)]
pub struct LinearEnumeration {
    strategy: ExplorationStrategy,
    max_bound: usize,
    max_tests: usize,
    permissive: bool,
    branches: Vec<Branch>,
}

impl LinearEnumeration {
    /// Creates the strategy and populates its branch pool by recursively
    /// mapping the successors of the initial state.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the initial state cannot be constructed, or if
    /// stepping fails on a feature the configuration does not permit
    /// skipping.
    pub fn new(program_info: Rc<ProgramInfo>, solver: DynSolver, config: Config) -> Result<Self> {
        let max_bound = config.max_bound;
        let max_tests = config.max_tests;
        let permissive = config.permissive;
        let initial_state = program_info.initial_state()?;
        let strategy = ExplorationStrategy::new(program_info, solver, config);

        let mut enumeration = Self {
            strategy,
            max_bound,
            max_tests,
            permissive,
            branches: Vec::new(),
        };
        let successors = enumeration.strategy.step(&initial_state)?;
        for branch in successors {
            enumeration.map_branch(branch)?;
        }
        Ok(enumeration)
    }

    /// Gets the pool of feasible terminal branches.
    #[must_use]
    pub fn explored_branches(&self) -> &[Branch] {
        &self.branches
    }

    /// Produces tests until the pool is exhausted, the configured maximum is
    /// reached, or the callback signals completion.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if an internal error occurs while selecting a branch.
    pub fn run(&mut self, callback: &mut TestCallback) -> Result<()> {
        let mut produced = 0;
        while !self.branches.is_empty() && produced < self.max_tests {
            let index = self.strategy.select_index(self.branches.len());
            let branch = self.branches.remove(index);

            // Check the consistency of the constraints asserted so far.
            if !self.strategy.check_sat(branch.state.path_constraint()) {
                continue;
            }
            produced += 1;
            if callback(&branch.state) {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Maps one branch: infeasible branches are pruned, terminal branches
    /// join the pool, and everything else is stepped recursively.
    fn map_branch(&mut self, branch: Branch) -> Result<()> {
        if self.branches.len() >= self.max_bound {
            return Ok(());
        }

        // Do not bother invoking the solver for a trivially false guard.
        if branch.guard.as_bool() == Some(false) {
            return Ok(());
        }
        if !self.strategy.check_sat(branch.state.path_constraint()) {
            return Ok(());
        }

        if branch.state.is_terminal() {
            self.branches.push(branch);
            return Ok(());
        }

        let successors = match self.strategy.step(&branch.state) {
            Ok(successors) => successors,
            Err(error @ Error::Unimplemented { .. }) if self.permissive => {
                warn!("Path encountered an unimplemented feature: {error}");
                return Ok(());
            }
            Err(error) => return Err(error),
        };
        for successor in successors {
            self.map_branch(successor)?;
        }
        Ok(())
    }
}
