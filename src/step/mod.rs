//! This module contains the small-step symbolic evaluator: a step function
//! that transforms an execution state into the set of successor states, each
//! guarded by a path constraint.
//!
//! Within one step, successors are appended in a deterministic order: the
//! accept branch before the reject branch and the true branch before the
//! false branch. The exploration strategy is free to reorder them.

pub mod expr;
pub mod extern_core;
pub mod extern_target;
pub mod externs;
pub mod stmt;
pub mod table;

use std::rc::Rc;

use crate::{
    config::Config,
    error::execution::{Error, Result},
    ir::expr::{ExprRef, Expression},
    program::ProgramInfo,
    state::{
        continuation::{Command, PlugTarget},
        ExecutionState,
    },
    step::externs::{ExternCall, ExternMethodImpls},
};

/// A successor state produced by the evaluator, guarded by the condition
/// under which it is reached.
#[derive(Clone, Debug)]
pub struct Branch {
    /// The condition guarding the branch. Unconditional successors carry the
    /// literal `true`.
    pub guard: ExprRef,

    /// The successor state. Its path constraint already includes the guard.
    pub state: ExecutionState,
}

impl Branch {
    /// Creates an unconditional branch to `state`.
    #[must_use]
    pub fn new(state: ExecutionState) -> Self {
        Self {
            guard: Expression::bool_literal(true),
            state,
        }
    }
}

/// Appends a branch to `result`, extending the state's path constraint with
/// the guard when one is provided.
pub(crate) fn push_branch(result: &mut Vec<Branch>, guard: Option<ExprRef>, mut state: ExecutionState) {
    match guard {
        Some(guard) => {
            state.add_path_constraint(guard.clone());
            result.push(Branch { guard, state });
        }
        None => result.push(Branch::new(state)),
    }
}

/// The small-step evaluator.
///
/// The evaluator owns no mutable state of its own: stepping consumes an
/// execution state by reference and produces fresh successor states, so one
/// evaluator instance drives the whole exploration.
#[derive(Clone, Debug)]
pub struct SmallStepEvaluator {
    /// The architecture-specific program metadata.
    program_info: Rc<ProgramInfo>,

    /// The run configuration.
    config: Config,

    /// Implementations of the target-specific externs, consulted first.
    target_externs: ExternMethodImpls,

    /// Implementations of the core packet externs, consulted second.
    core_externs: ExternMethodImpls,

    /// Implementations of the interpreter-internal externs, consulted last.
    internal_externs: ExternMethodImpls,
}

impl SmallStepEvaluator {
    /// Creates an evaluator for the program described by `program_info`.
    #[must_use]
    pub fn new(program_info: Rc<ProgramInfo>, config: Config) -> Self {
        let mut target_externs = ExternMethodImpls::new();
        extern_target::register(&mut target_externs);
        let mut core_externs = ExternMethodImpls::new();
        extern_core::register_core(&mut core_externs);
        let mut internal_externs = ExternMethodImpls::new();
        extern_core::register_internal(&mut internal_externs);
        Self {
            program_info,
            config,
            target_externs,
            core_externs,
            internal_externs,
        }
    }

    /// Gets the program metadata the evaluator operates over.
    #[must_use]
    pub fn program_info(&self) -> &ProgramInfo {
        &self.program_info
    }

    /// Gets the run configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Performs one small step of `state`, producing its successor branches.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the state is terminal, if an invariant is
    /// violated, or if an unimplemented feature is encountered.
    pub fn step(&self, state: &ExecutionState) -> Result<Vec<Branch>> {
        let command = state.peek_command().ok_or(Error::EmptyContinuation)?.clone();

        match command {
            Command::Statement(statement) => stmt::step_statement(self, state, &statement),
            Command::ParserState {
                parser,
                state: parse_state,
            } => self.step_parser_state(state, &parser, &parse_state),
            Command::Transition { parser, transition } => {
                stmt::step_transition(self, state, &parser, &transition)
            }
            Command::Return(value) => {
                if value.is_symbolic_value() {
                    self.consume_value(state, &value)
                } else {
                    expr::step_return(self, state, &value)
                }
            }
            Command::Guarded { body, handlers } => {
                let mut next = state.clone();
                next.pop_body()?;
                next.push_frame(body, handlers);
                Ok(vec![Branch::new(next)])
            }
            Command::Exception(exception) => {
                let mut next = state.clone();
                next.pop_body()?;
                next.unwind(exception);
                Ok(vec![Branch::new(next)])
            }
            Command::SetProperty { key, value } => {
                let mut next = state.clone();
                next.pop_body()?;
                next.set_property(key, value);
                Ok(vec![Branch::new(next)])
            }
            Command::Plug { .. } => Err(Error::bug(
                "A continuation plug appeared without a preceding value",
            )),
        }
    }

    /// Hands a fully reduced value to whatever awaits it: a plug rebuilds
    /// its target around the value, anything else discards it.
    fn consume_value(&self, state: &ExecutionState, value: &ExprRef) -> Result<Vec<Branch>> {
        let mut next = state.clone();
        next.pop_body()?;

        let awaiting_plug = matches!(next.peek_command(), Some(Command::Plug { .. }));
        if awaiting_plug {
            let Command::Plug { param, target } = next.pop_body()? else {
                unreachable!("the peeked command was a plug");
            };
            let rebuilt = match target {
                PlugTarget::Expression(shape) => Command::Return(shape.substitute(param, value)),
                PlugTarget::Statement(shape) => {
                    Command::Statement(shape.substitute(param, value))
                }
                PlugTarget::Transition { parser, transition } => Command::Transition {
                    parser,
                    transition: stmt::substitute_transition(&transition, param, value),
                },
            };
            next.push_commands(vec![rebuilt]);
        }

        Ok(vec![Branch::new(next)])
    }

    /// Enters the named parser state: its statements run, then its
    /// transition is taken.
    fn step_parser_state(
        &self,
        state: &ExecutionState,
        parser: &str,
        parse_state: &str,
    ) -> Result<Vec<Branch>> {
        let decl = self
            .program_info
            .program()
            .parser(parser)
            .ok_or_else(|| Error::UnknownDeclaration {
                name: parser.to_string(),
            })?;
        let parse_state =
            decl.states
                .get(parse_state)
                .ok_or_else(|| Error::UnknownDeclaration {
                    name: format!("{parser}.{parse_state}"),
                })?;

        let mut commands: Vec<Command> = parse_state
            .statements
            .iter()
            .map(|statement| Command::Statement(statement.clone()))
            .collect();
        commands.push(Command::Transition {
            parser: parser.to_string(),
            transition: parse_state.transition.clone(),
        });

        let mut next = state.clone();
        next.replace_top_body(commands)?;
        Ok(vec![Branch::new(next)])
    }

    /// Dispatches an extern call through the registries: target first, then
    /// core, then the interpreter-internal set.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no registry implements the call; this is an
    /// implementation bug rather than a user error.
    pub fn dispatch_extern(
        &self,
        receiver_pattern: &str,
        call: &ExternCall,
        state: &ExecutionState,
        result: &mut Vec<Branch>,
    ) -> Result<()> {
        if self
            .target_externs
            .dispatch(receiver_pattern, self, call, state, result)?
        {
            return Ok(());
        }
        if self
            .core_externs
            .dispatch(receiver_pattern, self, call, state, result)?
        {
            return Ok(());
        }
        if self
            .internal_externs
            .dispatch(receiver_pattern, self, call, state, result)?
        {
            return Ok(());
        }
        Err(Error::UnknownExtern {
            receiver: receiver_pattern.to_string(),
            method: call.name.clone(),
        })
    }

    /// Steps the first argument in `indices` order that is not yet a
    /// symbolic value, rebuilding the call around the produced value.
    ///
    /// Returns `Ok(Some(_))` with the stepping branch when an argument
    /// needed attention, and `Ok(None)` when all inspected arguments are
    /// already symbolic values.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the continuation cannot be rewritten.
    pub fn step_args(
        &self,
        state: &ExecutionState,
        call: &ExternCall,
        indices: std::ops::Range<usize>,
    ) -> Result<Option<Vec<Branch>>> {
        for idx in indices {
            let arg = &call.args[idx];
            if arg.is_symbolic_value() {
                continue;
            }

            let mut next = state.clone();
            let param = next.fresh_parameter_id();
            let hole = Expression::parameter(arg.ty(), param);

            let Expression::MethodCall {
                ty,
                method,
                type_args,
                args,
            } = call.call.as_ref()
            else {
                return Err(Error::bug("An extern call context holds a non-call term"));
            };
            let mut new_args = args.clone();
            new_args[idx] = hole;
            let rebuilt = Expression::method_call(
                ty.clone(),
                method.clone(),
                type_args.clone(),
                new_args,
            );

            next.replace_top_body(vec![
                Command::Return(arg.clone()),
                Command::Plug {
                    param,
                    target: PlugTarget::Expression(rebuilt),
                },
            ])?;
            return Ok(Some(vec![Branch::new(next)]));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use crate::{
        config::Config,
        env::StateRef,
        ir::{
            expr::{BinOp, Expression},
            stmt::Statement,
            types::Type,
            Program,
        },
        program::{ArchSpec, ProgramInfo},
        state::{continuation::Command, ExecutionState},
        step::SmallStepEvaluator,
    };

    /// Constructs an evaluator over an empty program, which suffices for
    /// stepping self-contained expressions and statements.
    fn bare_evaluator() -> SmallStepEvaluator {
        let info = ProgramInfo::new(Rc::new(Program::new()), ArchSpec::new(vec![]));
        SmallStepEvaluator::new(Rc::new(info), Config::default())
    }

    /// Steps `state` until it is terminal, asserting a single successor at
    /// every step.
    fn run_to_terminal(
        evaluator: &SmallStepEvaluator,
        mut state: ExecutionState,
    ) -> anyhow::Result<ExecutionState> {
        while !state.is_terminal() {
            let mut successors = evaluator.step(&state)?;
            assert_eq!(successors.len(), 1, "expected a single successor");
            state = successors.remove(0).state;
        }
        Ok(state)
    }

    #[test]
    fn assignments_resolve_their_right_side() -> anyhow::Result<()> {
        let evaluator = bare_evaluator();
        let ty = Type::bits(8);
        let source = StateRef::base("a", ty.clone());
        let target = StateRef::base("b", ty.clone());

        let mut state = ExecutionState::new(vec![Command::Statement(Statement::assign(
            target.to_expr(),
            Expression::binary(
                BinOp::Add,
                source.to_expr(),
                Expression::constant(ty.clone(), 1),
            ),
        ))]);
        state.set(source, Expression::constant(ty, 41));

        let terminal = run_to_terminal(&evaluator, state)?;
        assert_eq!(terminal.get(&target)?.as_u64(), Some(42));
        Ok(())
    }

    #[test]
    fn short_circuit_conjunction_forks_on_its_left_operand() -> anyhow::Result<()> {
        let evaluator = bare_evaluator();
        let cond = Expression::binary(
            BinOp::LAnd,
            Expression::symbolic_var(Type::boolean(), "a"),
            StateRef::base("b", Type::boolean()).to_expr(),
        );
        let state = ExecutionState::new(vec![Command::Return(cond)]);

        let successors = evaluator.step(&state)?;
        assert_eq!(successors.len(), 2);

        // The true branch continues into the right operand; the false branch
        // short-circuits to the literal.
        assert!(matches!(
            successors[0].state.peek_command(),
            Some(Command::Return(value)) if !value.is_symbolic_value()
        ));
        assert!(matches!(
            successors[1].state.peek_command(),
            Some(Command::Return(value)) if value.as_bool() == Some(false)
        ));

        // Each branch extended its path constraint with its guard.
        assert_eq!(successors[0].state.path_constraint().len(), 1);
        assert_eq!(
            successors[1].state.path_constraint()[0],
            Expression::not(Expression::symbolic_var(Type::boolean(), "a"))
        );
        Ok(())
    }

    #[test]
    fn ternary_choices_fork_on_their_condition() -> anyhow::Result<()> {
        let evaluator = bare_evaluator();
        let ty = Type::bits(8);
        let mux = Expression::mux(
            ty.clone(),
            Expression::symbolic_var(Type::boolean(), "c"),
            Expression::constant(ty.clone(), 1),
            Expression::constant(ty, 2),
        );
        let state = ExecutionState::new(vec![Command::Return(mux)]);

        let successors = evaluator.step(&state)?;
        assert_eq!(successors.len(), 2);
        assert!(matches!(
            successors[0].state.peek_command(),
            Some(Command::Return(value)) if value.as_u64() == Some(1)
        ));
        assert!(matches!(
            successors[1].state.peek_command(),
            Some(Command::Return(value)) if value.as_u64() == Some(2)
        ));
        Ok(())
    }

    #[test]
    fn tainted_conditionals_taint_both_arms() -> anyhow::Result<()> {
        let evaluator = bare_evaluator();
        let ty = Type::bits(8);
        let target = StateRef::base("out", ty.clone());

        let statement = Statement::if_stmt(
            Expression::taint(Type::boolean()),
            Statement::assign(target.to_expr(), Expression::constant(ty.clone(), 1)),
            Some(Statement::assign(
                target.to_expr(),
                Expression::constant(ty, 2),
            )),
        );
        let state = ExecutionState::new(vec![Command::Statement(statement)]);

        let successors = evaluator.step(&state)?;
        assert_eq!(successors.len(), 2);
        for branch in successors {
            // No constraint can be learned from an undefined condition.
            assert!(branch.state.path_constraint().is_empty());
            let terminal = run_to_terminal(&evaluator, branch.state)?;
            assert!(terminal.get(&target)?.has_taint());
        }
        Ok(())
    }

    #[test]
    fn exceptions_unwind_to_their_handler() -> anyhow::Result<()> {
        use crate::state::continuation::Exception;

        let evaluator = bare_evaluator();
        let ty = Type::bits(8);
        let target = StateRef::base("out", ty.clone());

        let handler = vec![Command::Statement(Statement::assign(
            target.to_expr(),
            Expression::constant(ty, 7),
        ))];
        let state = ExecutionState::new(vec![Command::Guarded {
            body: vec![
                Command::Exception(Exception::Reject),
                // Unreachable once the exception fires.
                Command::Statement(Statement::exit()),
            ],
            handlers: vec![(Exception::Reject, handler)],
        }]);

        let terminal = run_to_terminal(&evaluator, state)?;
        assert_eq!(terminal.get(&target)?.as_u64(), Some(7));
        Ok(())
    }
}
