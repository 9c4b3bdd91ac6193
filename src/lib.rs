//! This library implements the core of a symbolic-execution test generator
//! for programs written in a pipeline-oriented packet-processing language.
//! Given a normalized program IR and a target description, it enumerates the
//! feasible execution paths of the program, collects their path constraints,
//! prunes them through a pluggable SMT decision procedure, and hands each
//! feasible terminal state to a callback that serializes concrete tests.
//!
//! # How it Works
//!
//! From a very high level, a test generation run proceeds as follows:
//!
//! 1. The caller provides an [`ir::Program`] together with a
//!    [`program::ArchSpec`] naming the target's pipeline blocks; both are
//!    wrapped into a [`program::ProgramInfo`], which produces the initial
//!    [`state::ExecutionState`].
//! 2. A [`step::SmallStepEvaluator`] repeatedly transforms an execution
//!    state into a set of successor [`step::Branch`]es, each guarded by a
//!    path constraint. Extern calls, including the packet intrinsics and
//!    the target's externs, are dispatched through a registry of
//!    implementations; table applications enumerate synthesized
//!    control-plane entries.
//! 3. An exploration strategy such as
//!    [`strategy::linear::LinearEnumeration`] drives the evaluator over a
//!    work list of branches, pruning those whose constraints a
//!    [`solver::Solver`] reports unsatisfiable.
//! 4. Each feasible terminal state carries everything a test needs: the
//!    final packet and emit buffers, the metadata, the synthesized
//!    control-plane objects, and the trace explaining the path.
//!
//! # Basic Usage
//!
//! Construct a [`strategy::linear::LinearEnumeration`] from the program
//! info, a solver handle, and a [`config::Config`], then call `run` with a
//! callback that consumes terminal states.

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod config;
pub mod constant;
pub mod env;
pub mod error;
pub mod ir;
pub mod program;
pub mod solver;
pub mod state;
pub mod step;
pub mod strategy;

// Re-exports to provide the library interface.
pub use config::{Config, TestBackend};
pub use error::{Error, Result};
pub use solver::{DynSolver, Solver, UncheckedSolver};
pub use state::ExecutionState;
