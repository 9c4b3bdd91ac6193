//! This module contains the table stepper: it enumerates the feasible
//! action-entry combinations of an applied table and produces one guarded
//! branch per combination, plus the miss branch running the default action.

use std::{collections::BTreeMap, rc::Rc};

use log::warn;

use crate::{
    config::TestBackend,
    constant::{ENTRY_TTL_SECONDS, LOW_PRIORITY},
    env::StateRef,
    error::execution::{Error, Result},
    ir::{
        decl::{ActionCall, MatchKind, TableDecl, TableKey},
        expr::{BinOp, ExprRef, Expression},
        stmt::Statement,
        types::Type,
    },
    state::{
        continuation::Command,
        test_object::{
            ActionProfile, FieldMatch, TableConfig, TableRule, CATEGORY_ACTION_PROFILES,
            CATEGORY_TABLES,
        },
        trace::TraceEvent,
        ExecutionState,
    },
    step::{push_branch, Branch, SmallStepEvaluator},
};

/// Gets the bookkeeping reference recording whether `table` hit an entry.
#[must_use]
pub fn table_hit_ref(table: &str) -> StateRef {
    StateRef::base(format!("*{table}_hit"), Type::boolean())
}

/// Gets the bookkeeping reference recording whether `table` was applied at
/// all along the path.
#[must_use]
pub fn table_reached_ref(table: &str) -> StateRef {
    StateRef::base(format!("*{table}_reached"), Type::boolean())
}

/// One table key with its evaluated value.
#[derive(Clone, Debug)]
struct ResolvedKey {
    key: TableKey,
    value: ExprRef,
    tainted: bool,
}

/// Evaluates the application of `table` against `state`.
pub fn eval_table(
    evaluator: &SmallStepEvaluator,
    state: &ExecutionState,
    table: &TableDecl,
) -> Result<Vec<Branch>> {
    let mut result = Vec::new();
    let mut hit_conditions = Vec::new();

    let mut resolved = Vec::new();
    let mut table_tainted = false;
    for key in &table.keys {
        let value = state.evaluate(&key.expr)?;
        let tainted = value.has_taint();
        // A tainted exact key admits no recovery: any synthesized entry
        // might or might not match, so the table must fall back to its
        // default.
        if tainted && key.match_kind == MatchKind::Exact {
            warn!("Key {} of table {} is tainted", key.name, table.name);
            table_tainted = true;
        }
        resolved.push(ResolvedKey {
            key: key.clone(),
            value,
            tainted,
        });
    }
    if !resolved.is_empty() && resolved.iter().all(|key| key.tainted) {
        table_tainted = true;
    }

    if !table_tainted && !resolved.is_empty() {
        if let Some(entries) = &table.entries {
            eval_const_entries(
                evaluator,
                state,
                table,
                &resolved,
                entries,
                &mut hit_conditions,
                &mut result,
            )?;
        } else if let Some(implementation) = &table.implementation {
            let instance = match implementation {
                crate::ir::decl::TableImplementation::ActionProfile(instance) => instance.clone(),
                crate::ir::decl::TableImplementation::ActionSelector(instance) => {
                    // TODO: Implement true selector semantics; for now a
                    // selector behaves like the profile backing it.
                    instance.clone()
                }
            };
            eval_action_profile(
                evaluator,
                state,
                table,
                &resolved,
                &instance,
                &mut hit_conditions,
                &mut result,
            )?;
        } else {
            eval_control_plane_entries(
                evaluator,
                state,
                table,
                &resolved,
                &mut hit_conditions,
                &mut result,
            )?;
        }
    } else if table_tainted {
        warn!(
            "Table {} is tainted; only its default action is explored",
            table.name
        );
    }

    add_default_action(state, table, &hit_conditions, &mut result)?;
    Ok(result)
}

/// Computes the match condition contributed by one key, recording the
/// synthesized control-plane match.
fn compute_match(
    table: &TableDecl,
    resolved: &ResolvedKey,
    backend: TestBackend,
    matches: &mut BTreeMap<String, FieldMatch>,
) -> Option<ExprRef> {
    let key_name = &resolved.key.name;
    let key_expr = &resolved.value;
    let ty = key_expr.ty();

    match resolved.key.match_kind {
        // Optional keys are treated as a no-op.
        MatchKind::Optional => None,
        // Selector keys feed the action selector, not the match.
        MatchKind::Selector => None,
        MatchKind::Exact => {
            let value = Expression::symbolic_var(ty, format!("{}_key_{key_name}", table.name));
            matches.insert(
                key_name.clone(),
                FieldMatch::Exact {
                    value: value.clone(),
                },
            );
            Some(Expression::equals(key_expr.clone(), value))
        }
        MatchKind::Ternary => {
            let value =
                Expression::symbolic_var(ty.clone(), format!("{}_{key_name}_value", table.name));
            let mask = Expression::symbolic_var(ty, format!("{}_{key_name}_mask", table.name));
            matches.insert(
                key_name.clone(),
                FieldMatch::Ternary {
                    value: value.clone(),
                    mask: mask.clone(),
                },
            );
            if resolved.tainted {
                // A zero mask matches anything, so taint is recoverable.
                return None;
            }
            Some(Expression::equals(
                Expression::binary(BinOp::BitAnd, key_expr.clone(), mask),
                value,
            ))
        }
        MatchKind::Lpm => {
            let width = ty.width_bits();
            let value =
                Expression::symbolic_var(ty.clone(), format!("{}_{key_name}_value", table.name));
            let prefix = Expression::symbolic_var(
                ty.clone(),
                format!("{}_{key_name}_prefix", table.name),
            );
            matches.insert(
                key_name.clone(),
                FieldMatch::Lpm {
                    value: value.clone(),
                    prefix_length: prefix.clone(),
                },
            );
            if resolved.tainted {
                // A zero-length prefix matches anything.
                return None;
            }
            // The mask covers the topmost `prefix` bits of the key.
            let all_ones = Expression::constant_big(
                ty.clone(),
                crate::ir::expr::max_value_for(&ty),
            );
            let shift = Expression::binary(
                BinOp::Sub,
                Expression::constant(ty.clone(), u64::from(width)),
                prefix.clone(),
            );
            let mask = Expression::binary(BinOp::Shl, all_ones, shift);
            let bounded = Expression::binary(
                BinOp::Leq,
                prefix,
                Expression::constant(ty, u64::from(width)),
            );
            let masked = Expression::equals(
                Expression::binary(BinOp::BitAnd, key_expr.clone(), mask.clone()),
                Expression::binary(BinOp::BitAnd, value, mask),
            );
            Some(Expression::and(bounded, masked))
        }
        MatchKind::Range => {
            if backend == TestBackend::Stf {
                warn!(
                    "Range entries cannot be synthesized for this backend; key {key_name} of \
                     table {} is left unconstrained",
                    table.name
                );
                return None;
            }
            let low = Expression::symbolic_var(
                ty.clone(),
                format!("{}_range_min_{key_name}", table.name),
            );
            let high =
                Expression::symbolic_var(ty, format!("{}_range_max_{key_name}", table.name));
            matches.insert(
                key_name.clone(),
                FieldMatch::Range {
                    low: low.clone(),
                    high: high.clone(),
                },
            );
            if resolved.tainted {
                // The whole domain is a valid range, so taint is
                // recoverable.
                return None;
            }
            let ordered = Expression::binary(BinOp::Lt, low.clone(), high.clone());
            let above = Expression::binary(BinOp::Leq, low, key_expr.clone());
            let below = Expression::binary(BinOp::Leq, key_expr.clone(), high);
            Some(Expression::and(ordered, Expression::and(above, below)))
        }
    }
}

/// Synthesizes the control-plane argument for one action parameter.
fn synthesize_action_arg(
    table: &TableDecl,
    action: &str,
    index: usize,
    ty: &crate::ir::types::TypeRef,
) -> ExprRef {
    Expression::symbolic_var(ty.clone(), format!("{}_param_{action}{index}", table.name))
}

/// Enumerates one branch per action reachable through a synthesized
/// control-plane entry.
fn eval_control_plane_entries(
    evaluator: &SmallStepEvaluator,
    state: &ExecutionState,
    table: &TableDecl,
    resolved: &[ResolvedKey],
    hit_conditions: &mut Vec<ExprRef>,
    result: &mut Vec<Branch>,
) -> Result<()> {
    for action_name in &table.actions {
        let action = evaluator
            .program_info()
            .program()
            .action(action_name)
            .ok_or_else(|| Error::UnknownDeclaration {
                name: action_name.clone(),
            })?
            .clone();

        let mut next = state.clone();
        let mut matches = BTreeMap::new();
        let mut hit: Option<ExprRef> = None;
        for key in resolved {
            if let Some(cond) =
                compute_match(table, key, evaluator.config().test_backend, &mut matches)
            {
                hit = Some(match hit.take() {
                    Some(previous) => Expression::and(previous, cond),
                    None => cond,
                });
            }
        }
        let hit = hit.unwrap_or_else(|| Expression::bool_literal(true));

        let args: Vec<ExprRef> = action
            .params
            .iter()
            .enumerate()
            .map(|(idx, param)| synthesize_action_arg(table, action_name, idx, &param.ty))
            .collect();

        let rule = TableRule {
            matches,
            priority: LOW_PRIORITY,
            call: ActionCall {
                action: action_name.clone(),
                args: args.clone(),
            },
            ttl: ENTRY_TTL_SECONDS,
        };
        next.add_test_object(
            CATEGORY_TABLES,
            table.name.clone(),
            Rc::new(TableConfig::new(vec![rule])),
        );

        emit_action_branch(table, action_name, args, hit.clone(), next, result)?;
        hit_conditions.push(hit);
    }
    Ok(())
}

/// Enumerates the constant entries of an immutable table in declaration
/// order; earlier entries shadow later ones.
fn eval_const_entries(
    evaluator: &SmallStepEvaluator,
    state: &ExecutionState,
    table: &TableDecl,
    resolved: &[ResolvedKey],
    entries: &[crate::ir::decl::TableEntry],
    hit_conditions: &mut Vec<ExprRef>,
    result: &mut Vec<Branch>,
) -> Result<()> {
    for entry in entries {
        if entry.keys.len() != resolved.len() {
            return Err(Error::bug(format!(
                "Entry of table {} matches {} keys but the table declares {}",
                table.name,
                entry.keys.len(),
                resolved.len()
            )));
        }
        evaluator
            .program_info()
            .program()
            .action(&entry.call.action)
            .ok_or_else(|| Error::UnknownDeclaration {
                name: entry.call.action.clone(),
            })?;

        // Entries carry their declared match literals verbatim.
        let mut hit: Option<ExprRef> = None;
        for (key, literal) in resolved.iter().zip(&entry.keys) {
            if key.key.match_kind == MatchKind::Optional {
                continue;
            }
            let cond = Expression::equals(key.value.clone(), literal.clone());
            hit = Some(match hit.take() {
                Some(previous) => Expression::and(previous, cond),
                None => cond,
            });
        }
        let hit = hit.unwrap_or_else(|| Expression::bool_literal(true));

        // First match wins: negate every earlier entry's condition.
        let mut guard = hit.clone();
        for earlier in hit_conditions.iter() {
            guard = Expression::and(Expression::not(earlier.clone()), guard);
        }

        let next = state.clone();
        emit_action_branch(
            table,
            &entry.call.action,
            entry.call.args.clone(),
            guard,
            next,
            result,
        )?;
        hit_conditions.push(hit);
    }
    Ok(())
}

/// Enumerates one branch per action through the profile backing the table,
/// recording members by index rather than by name.
fn eval_action_profile(
    evaluator: &SmallStepEvaluator,
    state: &ExecutionState,
    table: &TableDecl,
    resolved: &[ResolvedKey],
    instance: &str,
    hit_conditions: &mut Vec<ExprRef>,
    result: &mut Vec<Branch>,
) -> Result<()> {
    if evaluator.config().test_backend != TestBackend::Ptf {
        warn!(
            "Action profile entries cannot be synthesized for this backend; table {} uses its \
             default action",
            table.name
        );
        return Ok(());
    }

    for action_name in &table.actions {
        let action = evaluator
            .program_info()
            .program()
            .action(action_name)
            .ok_or_else(|| Error::UnknownDeclaration {
                name: action_name.clone(),
            })?
            .clone();

        let mut next = state.clone();
        let mut profile = match state.test_object(CATEGORY_ACTION_PROFILES, instance) {
            Some(object) => object
                .downcast_ref::<ActionProfile>()
                .ok_or_else(|| Error::bug("A non-profile object is stored under action_profile"))?
                .clone(),
            None => ActionProfile::new(),
        };

        let args: Vec<ExprRef> = action
            .params
            .iter()
            .enumerate()
            .map(|(idx, param)| synthesize_action_arg(table, action_name, idx, &param.ty))
            .collect();
        let named_args = action
            .params
            .iter()
            .zip(&args)
            .map(|(param, arg)| (param.name.clone(), arg.clone()))
            .collect();
        let member_index = profile.add_member(action_name.clone(), named_args);
        next.add_test_object(
            CATEGORY_ACTION_PROFILES,
            instance.to_string(),
            Rc::new(profile),
        );

        let mut matches = BTreeMap::new();
        let mut hit: Option<ExprRef> = None;
        for key in resolved {
            if let Some(cond) =
                compute_match(table, key, evaluator.config().test_backend, &mut matches)
            {
                hit = Some(match hit.take() {
                    Some(previous) => Expression::and(previous, cond),
                    None => cond,
                });
            }
        }
        let hit = hit.unwrap_or_else(|| Expression::bool_literal(true));

        // The entry references the profile member by index.
        let rule = TableRule {
            matches,
            priority: LOW_PRIORITY,
            call: ActionCall {
                action: member_index.to_string(),
                args: vec![],
            },
            ttl: ENTRY_TTL_SECONDS,
        };
        let mut config = TableConfig::new(vec![rule]);
        config.set_profile(instance);
        next.add_test_object(CATEGORY_TABLES, table.name.clone(), Rc::new(config));

        emit_action_branch(table, action_name, args, hit.clone(), next, result)?;
        hit_conditions.push(hit);
    }
    Ok(())
}

/// Finishes one hit branch: the action call replaces the table application
/// and the bookkeeping flags are raised.
fn emit_action_branch(
    table: &TableDecl,
    action_name: &str,
    args: Vec<ExprRef>,
    guard: ExprRef,
    mut next: ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    let call = Expression::method_call(
        Rc::new(Type::Void),
        Expression::path(Rc::new(Type::Void), action_name),
        vec![],
        args,
    );
    next.set(table_hit_ref(&table.name), Expression::bool_literal(true));
    next.set(
        table_reached_ref(&table.name),
        Expression::bool_literal(true),
    );
    next.add_trace(TraceEvent::generic(format!(
        "Table branch: {} chosen action: {action_name}",
        table.name
    )));
    next.replace_top_body(vec![Command::Statement(Statement::method_call(call))])?;
    push_branch(result, Some(guard), next);
    Ok(())
}

/// Adds the miss branch running the table's default action, guarded by the
/// negation of every synthesized hit condition.
fn add_default_action(
    state: &ExecutionState,
    table: &TableDecl,
    hit_conditions: &[ExprRef],
    result: &mut Vec<Branch>,
) -> Result<()> {
    let mut guard: Option<ExprRef> = None;
    for hit in hit_conditions {
        let negated = Expression::not(hit.clone());
        guard = Some(match guard.take() {
            Some(previous) => Expression::and(previous, negated),
            None => negated,
        });
    }

    let mut next = state.clone();
    let call = Expression::method_call(
        Rc::new(Type::Void),
        Expression::path(Rc::new(Type::Void), table.default_action.action.clone()),
        vec![],
        table.default_action.args.clone(),
    );
    next.set(table_hit_ref(&table.name), Expression::bool_literal(false));
    next.set(
        table_reached_ref(&table.name),
        Expression::bool_literal(true),
    );
    next.add_trace(TraceEvent::generic(format!(
        "Table branch: {} miss; default action: {}",
        table.name, table.default_action.action
    )));
    next.replace_top_body(vec![Command::Statement(Statement::method_call(call))])?;
    push_branch(result, guard.filter(|g| g.as_bool() != Some(true)), next);
    Ok(())
}
