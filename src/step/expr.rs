//! This module contains the expression portion of the small-step evaluator.
//!
//! Leaves are converted into values and popped. Composite expressions step
//! one sub-expression at a time, strictly left to right: the unfinished
//! sub-expression is hoisted into its own command and a parameter hole marks
//! where its value is plugged back in. Short-circuit booleans and ternary
//! choices fork the state instead.

use crate::{
    env::StateRef,
    error::execution::{Error, Result},
    ir::{
        decl::ActionDecl,
        expr::{BinOp, ExprRef, Expression},
    },
    state::{
        continuation::{Command, PlugTarget},
        ExecutionState,
    },
    step::{externs::ExternCall, push_branch, table, Branch, SmallStepEvaluator},
};

/// Steps the not-yet-symbolic expression at the top of the continuation.
pub fn step_return(
    evaluator: &SmallStepEvaluator,
    state: &ExecutionState,
    expr: &ExprRef,
) -> Result<Vec<Branch>> {
    match expr.as_ref() {
        Expression::PathExpression { .. } | Expression::Member { .. } => {
            let reference = StateRef::from_expr(expr)?;
            let value = state.get(&reference)?;
            let mut next = state.clone();
            next.replace_top_body(vec![Command::Return(value)])?;
            Ok(vec![Branch::new(next)])
        }

        Expression::MethodCall { .. } => step_call(evaluator, state, expr),

        Expression::Unary { op, expr: child, .. } => {
            let op = *op;
            step_to_subexpr(state, child, move |hole| Expression::unary(op, hole))
        }

        Expression::Cast { ty, expr: child } => {
            let ty = ty.clone();
            step_to_subexpr(state, child, move |hole| Expression::cast(ty, hole))
        }

        Expression::Slice {
            expr: child, hi, lo, ..
        } => {
            let (hi, lo) = (*hi, *lo);
            step_to_subexpr(state, child, move |hole| Expression::slice(hole, hi, lo))
        }

        Expression::Binary {
            op, left, right, ..
        } => step_binary(state, *op, left, right),

        Expression::Mux {
            ty,
            cond,
            then_expr,
            else_expr,
        } => {
            if !cond.is_symbolic_value() {
                let (t, e, ty) = (then_expr.clone(), else_expr.clone(), ty.clone());
                return step_to_subexpr(state, cond, move |hole| {
                    Expression::mux(ty, hole, t, e)
                });
            }
            if cond.has_taint() {
                let mut next = state.clone();
                next.replace_top_body(vec![Command::Return(Expression::taint(ty.clone()))])?;
                return Ok(vec![Branch::new(next)]);
            }
            let mut result = Vec::new();
            let mut then_state = state.clone();
            then_state.replace_top_body(vec![Command::Return(then_expr.clone())])?;
            push_branch(&mut result, Some(cond.clone()), then_state);

            let mut else_state = state.clone();
            else_state.replace_top_body(vec![Command::Return(else_expr.clone())])?;
            push_branch(&mut result, Some(Expression::not(cond.clone())), else_state);
            Ok(result)
        }

        Expression::Concat { left, right, .. } => {
            if !left.is_symbolic_value() {
                let right = right.clone();
                step_to_subexpr(state, left, move |hole| Expression::concat(hole, right))
            } else {
                let left = left.clone();
                step_to_subexpr(state, right, move |hole| Expression::concat(left, hole))
            }
        }

        Expression::Struct { ty, components } => {
            let position = components
                .iter()
                .position(|(_, value)| !value.is_symbolic_value())
                .ok_or_else(|| Error::bug("A symbolic struct expression was stepped"))?;
            let (ty, components) = (ty.clone(), components.clone());
            let child = components[position].1.clone();
            step_to_subexpr(state, &child, move |hole| {
                let mut components = components;
                components[position].1 = hole;
                Expression::structure(ty, components)
            })
        }

        Expression::Parameter { .. } => Err(Error::bug(
            "An unfilled continuation parameter reached the evaluator",
        )),

        _ => Err(Error::bug(format!(
            "Tried to step the symbolic value {expr}"
        ))),
    }
}

/// Hoists `child` into its own command, leaving a parameter hole in the
/// shape produced by `rebuild`.
pub fn step_to_subexpr(
    state: &ExecutionState,
    child: &ExprRef,
    rebuild: impl FnOnce(ExprRef) -> ExprRef,
) -> Result<Vec<Branch>> {
    let mut next = state.clone();
    let param = next.fresh_parameter_id();
    let hole = Expression::parameter(child.ty(), param);
    let shape = rebuild(hole);
    next.replace_top_body(vec![
        Command::Return(child.clone()),
        Command::Plug {
            param,
            target: PlugTarget::Expression(shape),
        },
    ])?;
    Ok(vec![Branch::new(next)])
}

/// Steps a binary operation whose operands are not yet all symbolic.
///
/// Short-circuit booleans fork once their left operand is a value; all other
/// operators reduce their operands strictly left to right.
fn step_binary(
    state: &ExecutionState,
    op: BinOp,
    left: &ExprRef,
    right: &ExprRef,
) -> Result<Vec<Branch>> {
    if !left.is_symbolic_value() {
        let right = right.clone();
        return step_to_subexpr(state, left, move |hole| {
            Expression::binary(op, hole, right)
        });
    }

    match op {
        BinOp::LAnd | BinOp::LOr if left.has_taint() => {
            // A tainted condition poisons the whole formula; there is no
            // point stepping the other operand.
            let mut next = state.clone();
            next.replace_top_body(vec![Command::Return(Expression::taint(
                crate::ir::types::Type::boolean(),
            ))])?;
            Ok(vec![Branch::new(next)])
        }
        BinOp::LAnd => {
            let mut result = Vec::new();
            let mut continue_state = state.clone();
            continue_state.replace_top_body(vec![Command::Return(right.clone())])?;
            push_branch(&mut result, Some(left.clone()), continue_state);

            let mut false_state = state.clone();
            false_state
                .replace_top_body(vec![Command::Return(Expression::bool_literal(false))])?;
            push_branch(&mut result, Some(Expression::not(left.clone())), false_state);
            Ok(result)
        }
        BinOp::LOr => {
            let mut result = Vec::new();
            let mut true_state = state.clone();
            true_state.replace_top_body(vec![Command::Return(Expression::bool_literal(true))])?;
            push_branch(&mut result, Some(left.clone()), true_state);

            let mut continue_state = state.clone();
            continue_state.replace_top_body(vec![Command::Return(right.clone())])?;
            push_branch(
                &mut result,
                Some(Expression::not(left.clone())),
                continue_state,
            );
            Ok(result)
        }
        _ => {
            let left = left.clone();
            step_to_subexpr(state, right, move |hole| {
                Expression::binary(op, left, hole)
            })
        }
    }
}

/// Steps a method-call expression: a table application, an action
/// invocation, or an extern dispatched through the registries.
fn step_call(
    evaluator: &SmallStepEvaluator,
    state: &ExecutionState,
    expr: &ExprRef,
) -> Result<Vec<Branch>> {
    let Expression::MethodCall {
        method,
        type_args,
        args,
        ..
    } = expr.as_ref()
    else {
        return Err(Error::bug("step_call invoked on a non-call expression"));
    };
    let program = evaluator.program_info().program();

    match method.as_ref() {
        Expression::Member {
            expr: receiver,
            member: name,
            ..
        } => {
            // Header intrinsics dispatch on the receiver's type rather than
            // on a named instance.
            if receiver.ty().is_header() {
                let call = ExternCall {
                    call: expr.clone(),
                    receiver: Some(receiver.clone()),
                    instance: None,
                    name: name.clone(),
                    type_args: type_args.clone(),
                    args: args.clone(),
                };
                let mut result = Vec::new();
                evaluator.dispatch_extern("header", &call, state, &mut result)?;
                return Ok(result);
            }

            let Expression::PathExpression { name: root, .. } = receiver.as_ref() else {
                return Err(Error::unimplemented(format!(
                    "Method receiver {receiver} is not a plain instance reference"
                )));
            };

            if name == "apply" {
                if let Some(decl) = program.table(root) {
                    let table = decl.clone();
                    return table::eval_table(evaluator, state, &table);
                }
            }

            let pattern = match program.extern_instance(root) {
                Some(instance) => instance.extern_type.clone(),
                None => root.clone(),
            };
            let call = ExternCall {
                call: expr.clone(),
                receiver: Some(receiver.clone()),
                instance: Some(root.clone()),
                name: name.clone(),
                type_args: type_args.clone(),
                args: args.clone(),
            };
            let mut result = Vec::new();
            evaluator.dispatch_extern(&pattern, &call, state, &mut result)?;
            Ok(result)
        }

        Expression::PathExpression { name, .. } => {
            if let Some(decl) = program.action(name) {
                let action = decl.clone();
                return step_action_call(evaluator, state, expr, &action);
            }
            let call = ExternCall {
                call: expr.clone(),
                receiver: None,
                instance: None,
                name: name.clone(),
                type_args: type_args.clone(),
                args: args.clone(),
            };
            let mut result = Vec::new();
            evaluator.dispatch_extern("*", &call, state, &mut result)?;
            Ok(result)
        }

        _ => Err(Error::unimplemented(format!(
            "Cannot dispatch the call target {method}"
        ))),
    }
}

/// Invokes an action: its parameters are bound to the (fully stepped)
/// arguments and its body replaces the call.
fn step_action_call(
    evaluator: &SmallStepEvaluator,
    state: &ExecutionState,
    expr: &ExprRef,
    action: &ActionDecl,
) -> Result<Vec<Branch>> {
    let Expression::MethodCall {
        type_args, args, ..
    } = expr.as_ref()
    else {
        return Err(Error::bug("Action call context holds a non-call term"));
    };

    let call = ExternCall {
        call: expr.clone(),
        receiver: None,
        instance: None,
        name: action.name.clone(),
        type_args: type_args.clone(),
        args: args.clone(),
    };
    if let Some(branches) = evaluator.step_args(state, &call, 0..call.args.len())? {
        return Ok(branches);
    }

    if args.len() != action.params.len() {
        return Err(Error::ArityMismatch {
            method: action.name.clone(),
            expected: action.params.len(),
            actual: args.len(),
        });
    }

    let mut next = state.clone();
    for (param, arg) in action.params.iter().zip(args) {
        next.set(StateRef::base(param.name.clone(), param.ty.clone()), arg.clone());
    }
    let body = action
        .body
        .iter()
        .map(|statement| Command::Statement(statement.clone()))
        .collect();
    next.replace_top_body(body)?;
    Ok(vec![Branch::new(next)])
}
