//! This module contains the registry that dispatches extern method calls to
//! their implementations.
//!
//! The registry is keyed by a receiver pattern and a method name. The
//! pattern `*` matches free-standing functions; otherwise it names the
//! extern type of the receiver instance (e.g. `register`) or one of the
//! packet intrinsics (`packet_in`, `packet_out`). Within one key, overloads
//! are distinguished by arity. Declared parameter names exist purely for
//! error reporting: an arity or name mismatch is an implementation bug, not
//! a user error.

use std::collections::BTreeMap;

use crate::{
    error::execution::{Error, Result},
    ir::{expr::ExprRef, types::TypeRef},
    state::ExecutionState,
    step::{Branch, SmallStepEvaluator},
};

/// The resolved pieces of an extern method call, handed to implementations.
#[derive(Clone, Debug)]
pub struct ExternCall {
    /// The whole method-call expression, used when an argument needs to be
    /// stepped and the call rebuilt around the produced value.
    pub call: ExprRef,

    /// The receiver expression, or [`None`] for free-standing functions.
    pub receiver: Option<ExprRef>,

    /// The control-plane name of the receiver instance, when the receiver
    /// is a declared extern object.
    pub instance: Option<String>,

    /// The method name.
    pub name: String,

    /// The call's type arguments.
    pub type_args: Vec<TypeRef>,

    /// The call's value arguments.
    pub args: Vec<ExprRef>,
}

/// The signature shared by all extern implementations.
///
/// An implementation inspects the call and the originating state and appends
/// its successor branches to `result`.
pub type MethodImpl = fn(
    evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()>;

/// One registered overload: the declared parameter names and the
/// implementation.
#[derive(Clone)]
struct Overload {
    param_names: Vec<&'static str>,
    body: MethodImpl,
}

/// A name-and-arity-keyed dispatch table of extern implementations.
#[derive(Clone, Default)]
pub struct ExternMethodImpls {
    impls: BTreeMap<(String, String), Vec<Overload>>,
}

impl ExternMethodImpls {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `body` for calls to `name` on receivers matching
    /// `receiver_pattern`, declaring `param_names` for diagnostics.
    pub fn register(
        &mut self,
        receiver_pattern: &str,
        name: &str,
        param_names: Vec<&'static str>,
        body: MethodImpl,
    ) {
        self.impls
            .entry((receiver_pattern.to_string(), name.to_string()))
            .or_default()
            .push(Overload { param_names, body });
    }

    /// Checks whether any overload is registered for the pattern and name.
    #[must_use]
    pub fn has(&self, receiver_pattern: &str, name: &str) -> bool {
        self.impls
            .contains_key(&(receiver_pattern.to_string(), name.to_string()))
    }

    /// Dispatches `call` against the registry, appending successors to
    /// `result`.
    ///
    /// Returns `Ok(false)` when no overload is registered under the
    /// receiver pattern and name at all, so the caller can consult a
    /// fallback registry.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if overloads exist but none matches the call's
    /// arity, or if the matched implementation fails.
    pub fn dispatch(
        &self,
        receiver_pattern: &str,
        evaluator: &SmallStepEvaluator,
        call: &ExternCall,
        state: &ExecutionState,
        result: &mut Vec<Branch>,
    ) -> Result<bool> {
        let key = (receiver_pattern.to_string(), call.name.clone());
        let Some(overloads) = self.impls.get(&key) else {
            return Ok(false);
        };

        for overload in overloads {
            if overload.param_names.len() == call.args.len() {
                (overload.body)(evaluator, call, state, result)?;
                return Ok(true);
            }
        }

        let expected = overloads
            .iter()
            .map(|overload| overload.param_names.join(", "))
            .collect::<Vec<_>>()
            .join(" | ");
        Err(Error::ArityMismatch {
            method: format!("{receiver_pattern}.{} ({expected})", call.name),
            expected: overloads[0].param_names.len(),
            actual: call.args.len(),
        })
    }
}

impl std::fmt::Debug for ExternMethodImpls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternMethodImpls")
            .field("methods", &self.impls.keys().collect::<Vec<_>>())
            .finish()
    }
}
