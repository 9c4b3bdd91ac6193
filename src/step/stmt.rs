//! This module contains the statement and parser-transition portion of the
//! small-step evaluator.

use crate::{
    constant::{PARSER_ERROR_NO_MATCH, PARSER_ERROR_WIDTH_BITS},
    env::StateRef,
    error::execution::{Error, Result},
    ir::{
        decl::Transition,
        expr::{ExprRef, Expression},
        stmt::{Statement, StmtRef},
        types::Type,
    },
    state::{
        continuation::{Command, Exception, PlugTarget},
        flat_fields,
        properties::PropertyValue,
        ExecutionState, PROP_IN_UNDEFINED_STATE,
    },
    step::{push_branch, Branch, SmallStepEvaluator},
};

/// Steps the statement at the top of the continuation.
pub fn step_statement(
    evaluator: &SmallStepEvaluator,
    state: &ExecutionState,
    statement: &StmtRef,
) -> Result<Vec<Branch>> {
    match statement.as_ref() {
        Statement::Assignment { left, right } => step_assignment(evaluator, state, left, right),

        Statement::MethodCall(call) => {
            let mut next = state.clone();
            next.replace_top_body(vec![Command::Return(call.clone())])?;
            Ok(vec![Branch::new(next)])
        }

        Statement::If {
            cond,
            then_stmt,
            else_stmt,
        } => step_if(state, cond, then_stmt, else_stmt.as_ref()),

        Statement::Block(statements) => {
            let mut next = state.clone();
            let commands = statements
                .iter()
                .map(|statement| Command::Statement(statement.clone()))
                .collect();
            next.replace_top_body(commands)?;
            Ok(vec![Branch::new(next)])
        }

        Statement::Exit => {
            let mut next = state.clone();
            next.replace_top_body(vec![Command::Exception(Exception::Exit)])?;
            Ok(vec![Branch::new(next)])
        }
    }
}

/// Steps an assignment: the right side is reduced to a symbolic value, then
/// committed to the environment in a single successor.
fn step_assignment(
    _evaluator: &SmallStepEvaluator,
    state: &ExecutionState,
    left: &ExprRef,
    right: &ExprRef,
) -> Result<Vec<Branch>> {
    let reference = StateRef::from_expr(left)?;

    // A struct-to-struct copy is flattened into leaf assignments, validity
    // bits included.
    if reference.ty().is_struct_like() {
        if let Ok(source) = StateRef::from_expr(right) {
            let ty = reference.ty();
            let (target_fields, target_valids) = flat_fields(&reference, &ty);
            let (source_fields, source_valids) = flat_fields(&source, &ty);

            let mut next = state.clone();
            for (target, source) in target_valids.iter().zip(&source_valids) {
                let value = next.get(source)?;
                next.set(target.clone(), value);
            }
            for (target, source) in target_fields.iter().zip(&source_fields) {
                let value = next.get(source)?;
                next.set(target.clone(), value);
            }
            next.pop_body()?;
            return Ok(vec![Branch::new(next)]);
        }
    }

    if !right.is_symbolic_value() {
        let mut next = state.clone();
        let param = next.fresh_parameter_id();
        let hole = Expression::parameter(right.ty(), param);
        let shape = Statement::assign(left.clone(), hole);
        next.replace_top_body(vec![
            Command::Return(right.clone()),
            Command::Plug {
                param,
                target: PlugTarget::Statement(shape),
            },
        ])?;
        return Ok(vec![Branch::new(next)]);
    }

    let mut next = state.clone();
    match right.as_ref() {
        // Struct-valued right sides commit field by field.
        Expression::Struct { components, .. } => {
            for (name, value) in components {
                let field = reference.field(name.clone(), value.ty());
                next.set(field, value.clone());
            }
        }
        _ => next.set(reference, right.clone()),
    }
    next.pop_body()?;
    Ok(vec![Branch::new(next)])
}

/// Steps a conditional.
///
/// A condition that carries taint cannot constrain the path; both arms are
/// explored inside a region whose assignments degrade to taint.
fn step_if(
    state: &ExecutionState,
    cond: &ExprRef,
    then_stmt: &StmtRef,
    else_stmt: Option<&StmtRef>,
) -> Result<Vec<Branch>> {
    if !cond.is_symbolic_value() {
        let mut next = state.clone();
        let param = next.fresh_parameter_id();
        let hole = Expression::parameter(Type::boolean(), param);
        let shape = Statement::if_stmt(hole, then_stmt.clone(), else_stmt.cloned());
        next.replace_top_body(vec![
            Command::Return(cond.clone()),
            Command::Plug {
                param,
                target: PlugTarget::Statement(shape),
            },
        ])?;
        return Ok(vec![Branch::new(next)]);
    }

    if cond.has_taint() {
        let previous = state
            .properties()
            .get_bool_or_false(PROP_IN_UNDEFINED_STATE);
        let mut result = Vec::new();

        let arm_commands = |statement: Option<&StmtRef>| -> Vec<Command> {
            let mut commands = vec![Command::SetProperty {
                key: PROP_IN_UNDEFINED_STATE.to_string(),
                value: PropertyValue::Bool(true),
            }];
            if let Some(statement) = statement {
                commands.push(Command::Statement(statement.clone()));
            }
            commands.push(Command::SetProperty {
                key: PROP_IN_UNDEFINED_STATE.to_string(),
                value: PropertyValue::Bool(previous),
            });
            commands
        };

        let mut then_state = state.clone();
        then_state.replace_top_body(arm_commands(Some(then_stmt)))?;
        push_branch(&mut result, None, then_state);

        let mut else_state = state.clone();
        else_state.replace_top_body(arm_commands(else_stmt))?;
        push_branch(&mut result, None, else_state);
        return Ok(result);
    }

    let mut result = Vec::new();
    let mut then_state = state.clone();
    then_state.replace_top_body(vec![Command::Statement(then_stmt.clone())])?;
    push_branch(&mut result, Some(cond.clone()), then_state);

    let mut else_state = state.clone();
    match else_stmt {
        Some(statement) => {
            else_state.replace_top_body(vec![Command::Statement(statement.clone())])?;
        }
        None => {
            else_state.pop_body()?;
        }
    }
    push_branch(&mut result, Some(Expression::not(cond.clone())), else_state);
    Ok(result)
}

/// Steps a parser transition.
pub fn step_transition(
    evaluator: &SmallStepEvaluator,
    state: &ExecutionState,
    parser: &str,
    transition: &Transition,
) -> Result<Vec<Branch>> {
    match transition {
        Transition::Accept => {
            let mut next = state.clone();
            next.pop_body()?;
            Ok(vec![Branch::new(next)])
        }
        Transition::Reject => {
            let mut next = state.clone();
            next.replace_top_body(vec![Command::Exception(Exception::Reject)])?;
            Ok(vec![Branch::new(next)])
        }
        Transition::Direct(next_state) => {
            let mut next = state.clone();
            next.replace_top_body(vec![Command::ParserState {
                parser: parser.to_string(),
                state: next_state.clone(),
            }])?;
            Ok(vec![Branch::new(next)])
        }
        Transition::Select { selector, cases } => {
            step_select(evaluator, state, parser, selector, cases)
        }
    }
}

/// Steps a select transition: one guarded branch per case in declaration
/// order, earlier cases negated in later guards, plus a no-match rejection
/// when no default case exists.
fn step_select(
    evaluator: &SmallStepEvaluator,
    state: &ExecutionState,
    parser: &str,
    selector: &ExprRef,
    cases: &[crate::ir::decl::SelectCase],
) -> Result<Vec<Branch>> {
    if !selector.is_symbolic_value() {
        let mut next = state.clone();
        let param = next.fresh_parameter_id();
        let hole = Expression::parameter(selector.ty(), param);
        let shape = Transition::Select {
            selector: hole,
            cases: cases.to_vec(),
        };
        next.replace_top_body(vec![
            Command::Return(selector.clone()),
            Command::Plug {
                param,
                target: PlugTarget::Transition {
                    parser: parser.to_string(),
                    transition: shape,
                },
            },
        ])?;
        return Ok(vec![Branch::new(next)]);
    }

    if selector.has_taint() {
        return Err(Error::unimplemented(format!(
            "The selector of a select transition in {parser} is tainted; the taken case cannot \
             be predicted",
        )));
    }

    let mut result = Vec::new();
    let mut negated_so_far: Option<ExprRef> = None;

    for case in cases {
        let guard = match &case.keyset {
            Some(keyset) => {
                let matches = Expression::equals(selector.clone(), keyset.clone());
                let guard = match &negated_so_far {
                    Some(previous) => Expression::and(previous.clone(), matches.clone()),
                    None => matches.clone(),
                };
                let negation = Expression::not(matches);
                negated_so_far = Some(match negated_so_far.take() {
                    Some(previous) => Expression::and(previous, negation),
                    None => negation,
                });
                Some(guard)
            }
            // The default case absorbs everything not yet matched.
            None => negated_so_far.take(),
        };

        let mut case_state = state.clone();
        case_state.replace_top_body(next_state_commands(parser, &case.next))?;
        push_branch(&mut result, guard.filter(|g| g.as_bool() != Some(true)), case_state);

        if case.keyset.is_none() {
            // Cases after a default are unreachable.
            return Ok(result);
        }
    }

    // No default case: a fall-through rejects with the no-match error code.
    let mut reject_state = state.clone();
    reject_state.set(
        evaluator.program_info().current_parser_error_ref(state),
        Expression::constant(Type::bits(PARSER_ERROR_WIDTH_BITS), PARSER_ERROR_NO_MATCH),
    );
    reject_state.replace_top_body(vec![Command::Exception(Exception::Reject)])?;
    push_branch(&mut result, negated_so_far, reject_state);
    Ok(result)
}

/// Produces the commands entering `next_state`, honoring the distinguished
/// `accept` and `reject` state names.
fn next_state_commands(parser: &str, next_state: &str) -> Vec<Command> {
    match next_state {
        "accept" => vec![],
        "reject" => vec![Command::Exception(Exception::Reject)],
        _ => vec![Command::ParserState {
            parser: parser.to_string(),
            state: next_state.to_string(),
        }],
    }
}

/// Rebuilds a transition with every hole matching `id` in its selector
/// replaced by `value`.
#[must_use]
pub fn substitute_transition(transition: &Transition, id: u64, value: &ExprRef) -> Transition {
    match transition {
        Transition::Select { selector, cases } => Transition::Select {
            selector: selector.substitute(id, value),
            cases: cases.clone(),
        },
        other => other.clone(),
    }
}
