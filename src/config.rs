//! This module contains the configuration for a test generation run.

use crate::constant::{DEFAULT_MAX_BOUND, DEFAULT_MAX_TESTS, DEFAULT_PERMISSIVE};

/// The test backend the produced terminal states are destined for.
///
/// The backend affects a small number of enumeration decisions, such as
/// whether range table entries can be synthesized.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TestBackend {
    /// A simple textual format without support for range entries or action
    /// profiles.
    Stf,

    /// A packet test framework driving the target through its control-plane
    /// API.
    #[default]
    Ptf,
}

/// The configuration for the evaluator and the exploration strategy.
///
/// The configuration is read-only after initialization; it is passed by
/// reference wherever it is needed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The maximum number of tests to produce before the run returns.
    ///
    /// Defaults to [`DEFAULT_MAX_TESTS`].
    pub max_tests: usize,

    /// The maximum number of terminal branches collected before test
    /// production begins.
    ///
    /// Defaults to [`DEFAULT_MAX_BOUND`].
    pub max_bound: usize,

    /// Whether a path that hits an unimplemented feature is abandoned with a
    /// warning (`true`) or fails the whole run (`false`).
    ///
    /// Defaults to [`DEFAULT_PERMISSIVE`].
    pub permissive: bool,

    /// The seed for branch selection. Runs with the same seed and inputs
    /// produce the same ordered sequence of tests.
    pub seed: Option<u64>,

    /// The test backend the produced terminal states are destined for.
    pub test_backend: TestBackend,
}

impl Config {
    /// Sets the `max_tests` config parameter to `value`.
    #[must_use]
    pub fn with_max_tests(mut self, value: usize) -> Self {
        self.max_tests = value;
        self
    }

    /// Sets the `max_bound` config parameter to `value`.
    #[must_use]
    pub fn with_max_bound(mut self, value: usize) -> Self {
        self.max_bound = value;
        self
    }

    /// Sets the `permissive` config parameter to `value`.
    #[must_use]
    pub fn with_permissive(mut self, value: bool) -> Self {
        self.permissive = value;
        self
    }

    /// Sets the `seed` config parameter to `value`.
    #[must_use]
    pub fn with_seed(mut self, value: u64) -> Self {
        self.seed = Some(value);
        self
    }

    /// Sets the `test_backend` config parameter to `value`.
    #[must_use]
    pub fn with_test_backend(mut self, value: TestBackend) -> Self {
        self.test_backend = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        let max_tests = DEFAULT_MAX_TESTS;
        let max_bound = DEFAULT_MAX_BOUND;
        let permissive = DEFAULT_PERMISSIVE;
        let seed = None;
        let test_backend = TestBackend::default();
        Self {
            max_tests,
            max_bound,
            permissive,
            seed,
            test_backend,
        }
    }
}
