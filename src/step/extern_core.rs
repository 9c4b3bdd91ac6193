//! This module contains the implementations of the core packet externs and
//! of the interpreter-internal externs that model architecture plumbing.

use itertools::zip_eq;
use log::warn;

use crate::{
    constant::{MAX_PACKET_LENGTH_BITS, PARSER_ERROR_HEADER_TOO_SHORT, PARSER_ERROR_WIDTH_BITS},
    env::StateRef,
    error::execution::{Error, Result},
    ir::{
        expr::{BinOp, ExprRef, Expression},
        types::{Type, TypeRef},
    },
    state::{
        continuation::{Command, Exception},
        flat_fields,
        properties::PropertyValue,
        trace::TraceEvent,
        ExecutionState, PROP_IN_UNDEFINED_STATE,
    },
    step::{
        externs::{ExternCall, ExternMethodImpls},
        push_branch, Branch, SmallStepEvaluator,
    },
};

/// The byte-alignment candidate assigned to a runtime-valued advance or
/// variable-size extract.
///
/// Without model extraction in the core, the evaluator commits each such
/// path to one concrete byte-aligned size and lets the solver prune the
/// commitment when the program's constraints exclude it.
const RUNTIME_ADVANCE_CANDIDATE_BITS: u32 = 8;

/// Registers the implementations of the core packet externs.
pub fn register_core(impls: &mut ExternMethodImpls) {
    impls.register("packet_in", "extract", vec!["hdr"], extract);
    impls.register("packet_in", "extract", vec!["hdr", "sizeInBits"], extract_varbit);
    impls.register("packet_in", "advance", vec!["sizeInBits"], advance);
    impls.register("packet_in", "lookahead", vec![], lookahead);
    impls.register("packet_out", "emit", vec!["hdr"], emit);
    impls.register("header", "isValid", vec![], header_is_valid);
    impls.register("header", "setValid", vec![], header_set_valid);
    impls.register("header", "setInvalid", vec![], header_set_invalid);
    impls.register("*", "verify", vec!["bool", "error"], verify);
}

/// Registers the implementations of the interpreter-internal externs.
pub fn register_internal(impls: &mut ExternMethodImpls) {
    impls.register(
        "*",
        "*copy_in",
        vec!["srcRef", "targetParam", "direction", "forceUninitialized"],
        copy_in,
    );
    impls.register(
        "*",
        "*copy_out",
        vec!["targetParam", "srcRef", "direction"],
        copy_out,
    );
    impls.register("*", "*prepend_to_prog_header", vec!["hdr"], prepend_to_prog_header);
    impls.register("*", "*append_to_prog_header", vec!["hdr"], append_to_prog_header);
    impls.register("*", "*prepend_emit_buffer", vec![], prepend_emit_buffer);
    impls.register("*", "*drop_and_exit", vec![], drop_and_exit);
}

/// The branch conditions and concrete sizes of a parser cursor advance.
#[derive(Clone, Debug)]
pub struct AdvanceInfo {
    /// The number of bits consumed on the accept branch.
    pub advance_size: u32,

    /// The condition under which the advance succeeds.
    pub advance_cond: ExprRef,

    /// The condition under which the packet is too short.
    pub advance_fail_cond: ExprRef,
}

/// Computes the conditions for advancing the parser cursor by the constant
/// `advance_bits`.
///
/// The packet must hold at least the current cursor plus the advance, minus
/// whatever is already buffered.
#[must_use]
pub fn calculate_successful_parser_advance(
    state: &ExecutionState,
    advance_bits: u32,
) -> AdvanceInfo {
    let needed =
        (state.input_packet_cursor() + advance_bits).saturating_sub(state.packet_buffer_size());
    let cond = Expression::binary(
        BinOp::Geq,
        ExecutionState::input_packet_size_var(),
        Expression::constant(ExecutionState::packet_size_type(), u64::from(needed)),
    );
    AdvanceInfo {
        advance_size: advance_bits,
        advance_cond: cond.clone(),
        advance_fail_cond: Expression::not(cond),
    }
}

/// Computes the conditions for advancing the parser cursor by the runtime
/// expression `advance_expr`, committing the path to the concrete
/// `candidate` size.
#[must_use]
pub fn calculate_advance_expression(
    state: &ExecutionState,
    advance_expr: &ExprRef,
    restrictions: ExprRef,
    candidate: u32,
) -> AdvanceInfo {
    let size_ty = ExecutionState::packet_size_type();
    let cursor = Expression::constant(size_ty.clone(), u64::from(state.input_packet_cursor()));
    let buffered = Expression::constant(size_ty.clone(), u64::from(state.packet_buffer_size()));
    let advance = Expression::cast(size_ty.clone(), advance_expr.clone());
    let needed = Expression::binary(
        BinOp::Sub,
        Expression::binary(BinOp::Add, cursor, advance),
        buffered,
    );
    let cond = Expression::binary(
        BinOp::Geq,
        ExecutionState::input_packet_size_var(),
        needed,
    );
    let committed = Expression::equals(
        advance_expr.clone(),
        Expression::constant(advance_expr.ty(), u64::from(candidate)),
    );
    let committed_restrictions = Expression::and(restrictions, committed);
    AdvanceInfo {
        advance_size: candidate,
        advance_cond: Expression::and(cond.clone(), committed_restrictions.clone()),
        advance_fail_cond: Expression::and(Expression::not(cond), committed_restrictions),
    }
}

/// Sets the validity bit of the header denoted by `header_expr`.
///
/// Invalidating a header also taints its fields, so any later read of an
/// invalid header observes an undefined value.
pub fn set_header_validity(
    state: &mut ExecutionState,
    header_expr: &ExprRef,
    valid: bool,
) -> Result<()> {
    let reference = StateRef::from_expr(header_expr)?;
    state.set(reference.validity(), Expression::bool_literal(valid));
    if !valid {
        let ty = header_expr.ty();
        let (fields, _) = flat_fields(&reference, &ty);
        for field in fields {
            let taint = Expression::taint(field.ty());
            state.set(field, taint);
        }
    }
    Ok(())
}

/// Populates `fields` (in declaration order) by slicing the packet buffer,
/// assigning variable-width fields the concrete `varbit_bits`.
pub fn set_fields(
    state: &mut ExecutionState,
    fields: &[StateRef],
    varbit_bits: u32,
) -> Result<()> {
    for field in fields {
        let ty = field.ty();
        let width = match ty.as_ref() {
            Type::Varbit { .. } => varbit_bits,
            _ => ty.width_bits(),
        };
        if width == 0 {
            continue;
        }
        let mut value = state.slice_packet_buffer(width)?;
        // The slice lives in the unsigned concatenation domain; bring it
        // back into the field's own type.
        match ty.as_ref() {
            Type::Bits { signed: true, .. } | Type::Bool => {
                value = Expression::cast(ty.clone(), value);
            }
            _ => {}
        }
        state.add_trace(TraceEvent::Extract {
            reference: field.clone(),
            value: value.clone(),
        });
        state.set(field.clone(), value);
    }
    Ok(())
}

/// `packet_in.extract(hdr)`: assign the next bits of the packet to the
/// header's fields and mark it valid, or reject the packet as too short.
fn extract(
    _evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    let output = &call.args[0];
    let ty = call.type_args.first().cloned().unwrap_or_else(|| output.ty());
    if ty.as_struct_like().is_none() {
        return Err(Error::unimplemented(format!(
            "Extract output {output} of type {ty} is not a header or struct"
        )));
    }

    let size = ty.width_bits();
    let info = calculate_successful_parser_advance(state, size);

    // The accept case: the packet is long enough.
    {
        let mut next = state.clone();
        if ty.is_header() {
            set_header_validity(&mut next, output, true)?;
        }
        let reference = StateRef::from_expr(output)?;
        let (fields, _) = flat_fields(&reference, &ty);
        set_fields(&mut next, &fields, 0)?;
        next.add_trace(TraceEvent::expression(
            format!("Extract condition (size {size})"),
            info.advance_cond.clone(),
        ));
        next.pop_body()?;
        push_branch(result, Some(info.advance_cond), next);
    }

    // The reject case: the packet ends first.
    {
        let mut reject = state.clone();
        reject.add_trace(TraceEvent::generic("Extract: packet too short"));
        reject.replace_top_body(vec![Command::Exception(Exception::PacketTooShort)])?;
        push_branch(result, Some(info.advance_fail_cond), reject);
    }
    Ok(())
}

/// `packet_in.extract(hdr, sizeInBits)`: extract a header with a
/// variable-width field whose size is chosen at runtime.
fn extract_varbit(
    evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    if let Some(branches) = evaluator.step_args(state, call, 1..2)? {
        result.extend(branches);
        return Ok(());
    }

    let output = &call.args[0];
    let size_expr = &call.args[1];
    let ty = call.type_args.first().cloned().unwrap_or_else(|| output.ty());
    let Some(shape) = ty.as_struct_like() else {
        return Err(Error::unimplemented(format!(
            "Extract output {output} of type {ty} is not a header or struct"
        )));
    };
    let base_size = ty.width_bits();

    let varbit_max = shape
        .fields
        .iter()
        .find_map(|field| match field.ty.as_ref() {
            Type::Varbit { max_width } => Some(*max_width),
            _ => None,
        })
        .ok_or_else(|| {
            Error::bug(format!("No variable-width field present in {ty}"))
        })?;

    let (varbit_bits, info) = if let Some(constant) = size_expr.as_u64() {
        let varbit_bits = u32::try_from(constant)
            .map_err(|_| Error::unimplemented("Variable extract size exceeds packet bounds"))?;
        (
            varbit_bits,
            calculate_successful_parser_advance(state, base_size + varbit_bits),
        )
    } else {
        if size_expr.has_taint() {
            return Err(Error::unimplemented(format!(
                "The variable size of {} is tainted; the parser cursor advance cannot be \
                 predicted",
                call.call
            )));
        }
        let max_allowed = varbit_max.min(MAX_PACKET_LENGTH_BITS);
        let size_restriction = Expression::binary(
            BinOp::Leq,
            size_expr.clone(),
            Expression::constant(size_expr.ty(), u64::from(max_allowed)),
        );
        let byte_restriction = Expression::equals(
            Expression::binary(
                BinOp::Mod,
                size_expr.clone(),
                Expression::constant(size_expr.ty(), 8),
            ),
            Expression::constant(size_expr.ty(), 0),
        );
        let restrictions = Expression::and(size_restriction, byte_restriction);
        let candidate = RUNTIME_ADVANCE_CANDIDATE_BITS.min(max_allowed);
        // The cursor moves by the fixed part of the header plus the chosen
        // variable width.
        let total_expr = Expression::binary(
            BinOp::Add,
            size_expr.clone(),
            Expression::constant(size_expr.ty(), u64::from(base_size)),
        );
        let info = calculate_advance_expression(
            state,
            &total_expr,
            restrictions,
            candidate + base_size,
        );
        (candidate, info)
    };

    // Along the accept branch of the length check, an extraction beyond the
    // declared maximum is a parse error of its own.
    if varbit_bits > varbit_max {
        let mut next = state.clone();
        next.set(
            evaluator.program_info().current_parser_error_ref(state),
            Expression::constant(
                Type::bits(PARSER_ERROR_WIDTH_BITS),
                PARSER_ERROR_HEADER_TOO_SHORT,
            ),
        );
        next.replace_top_body(vec![Command::Exception(Exception::Reject)])?;
        push_branch(result, Some(info.advance_cond), next);
        return Ok(());
    }

    {
        let mut next = state.clone();
        if ty.is_header() {
            set_header_validity(&mut next, output, true)?;
        }
        let reference = StateRef::from_expr(output)?;
        let (fields, _) = flat_fields(&reference, &ty);
        set_fields(&mut next, &fields, varbit_bits)?;
        next.add_trace(TraceEvent::expression(
            format!("Extract condition (size {})", base_size + varbit_bits),
            info.advance_cond.clone(),
        ));
        next.pop_body()?;
        push_branch(result, Some(info.advance_cond), next);
    }

    {
        let mut reject = state.clone();
        reject.add_trace(TraceEvent::generic("Extract: packet too short"));
        reject.replace_top_body(vec![Command::Exception(Exception::PacketTooShort)])?;
        push_branch(result, Some(info.advance_fail_cond), reject);
    }
    Ok(())
}

/// `packet_in.advance(sizeInBits)`: consume bits without writing fields.
fn advance(
    evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    if let Some(branches) = evaluator.step_args(state, call, 0..1)? {
        result.extend(branches);
        return Ok(());
    }
    let advance_expr = &call.args[0];

    let info = if let Some(constant) = advance_expr.as_u64() {
        let bits = u32::try_from(constant)
            .map_err(|_| Error::unimplemented("Advance size exceeds packet bounds"))?;
        calculate_successful_parser_advance(state, bits)
    } else {
        if advance_expr.has_taint() {
            return Err(Error::unimplemented(format!(
                "The advance expression of {} is tainted; the parser cursor advance cannot be \
                 predicted",
                call.call
            )));
        }
        let size_restriction = Expression::binary(
            BinOp::Leq,
            advance_expr.clone(),
            Expression::constant(advance_expr.ty(), u64::from(MAX_PACKET_LENGTH_BITS)),
        );
        let byte_restriction = Expression::equals(
            Expression::binary(
                BinOp::Mod,
                advance_expr.clone(),
                Expression::constant(advance_expr.ty(), 8),
            ),
            Expression::constant(advance_expr.ty(), 0),
        );
        let restrictions = Expression::and(size_restriction, byte_restriction);
        calculate_advance_expression(
            state,
            advance_expr,
            restrictions,
            RUNTIME_ADVANCE_CANDIDATE_BITS,
        )
    };

    if info.advance_size == 0 {
        // Advancing by zero is a no-op.
        let mut next = state.clone();
        next.add_trace(TraceEvent::generic("Advance: 0 bits"));
        next.pop_body()?;
        push_branch(result, Some(info.advance_cond), next);
    } else {
        let mut next = state.clone();
        next.slice_packet_buffer(info.advance_size)?;
        next.add_trace(TraceEvent::expression(
            format!("Advance condition (size {})", info.advance_size),
            info.advance_cond.clone(),
        ));
        next.pop_body()?;
        push_branch(result, Some(info.advance_cond), next);
    }

    {
        let mut reject = state.clone();
        reject.add_trace(TraceEvent::generic("Advance: packet too short"));
        reject.replace_top_body(vec![Command::Exception(Exception::PacketTooShort)])?;
        push_branch(result, Some(info.advance_fail_cond), reject);
    }
    Ok(())
}

/// `packet_in.lookahead<T>()`: read bits from the packet without advancing
/// the cursor.
fn lookahead(
    _evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    let ty: TypeRef = call
        .type_args
        .first()
        .cloned()
        .ok_or_else(|| Error::bug("lookahead requires exactly one type argument"))?;
    let size = ty.width_bits();
    if size == 0 {
        return Err(Error::unimplemented(format!(
            "Lookahead type {ty} is not supported"
        )));
    }
    let info = calculate_successful_parser_advance(state, size);

    {
        let mut next = state.clone();
        let value = next.peek_packet_buffer(size)?;
        next.add_trace(TraceEvent::expression("Lookahead result", value.clone()));
        next.replace_top_body(vec![Command::Return(value)])?;
        push_branch(result, Some(info.advance_cond), next);
    }

    {
        let mut reject = state.clone();
        reject.add_trace(TraceEvent::generic("Lookahead: packet too short"));
        reject.replace_top_body(vec![Command::Exception(Exception::PacketTooShort)])?;
        push_branch(result, Some(info.advance_fail_cond), reject);
    }
    Ok(())
}

/// `packet_out.emit(hdr)`: append the header's fields to the emit buffer
/// when it is valid; an invalid header emits nothing.
fn emit(
    _evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    let output = &call.args[0];
    let ty = output.ty();
    let Some(shape) = ty.as_struct_like() else {
        return Err(Error::unimplemented(format!(
            "Emit input {output} of type {ty} is not a header"
        )));
    };
    if !ty.is_header() {
        return Err(Error::unimplemented(format!(
            "Emit of the non-header structure {output}; emit calls are expected to be expanded \
             to header granularity"
        )));
    }

    let reference = StateRef::from_expr(output)?;
    let validity = state.get(&reference.validity())?;
    if validity.has_taint() {
        return Err(Error::unimplemented(format!(
            "The validity bit of {output} is tainted; whether the header is emitted cannot be \
             predicted"
        )));
    }

    // The valid case appends every field in the concatenation domain.
    {
        let mut next = state.clone();
        for field in &shape.fields {
            let field_ref = reference.field(field.name.clone(), field.ty.clone());
            let mut value = next.get(&field_ref)?;
            let mut width = field.ty.width_bits();
            if let Type::Varbit { .. } = field.ty.as_ref() {
                width = value.ty().width_bits();
            }
            if width == 0 {
                continue;
            }
            next.add_trace(TraceEvent::Emit {
                reference: field_ref.clone(),
                value: value.clone(),
            });
            match value.ty().as_ref() {
                Type::Bool => {
                    value = Expression::cast(Type::bits(1), value);
                }
                Type::Bits { signed: true, .. } => {
                    value = Expression::cast(Type::bits(width), value);
                }
                _ => {}
            }
            next.append_to_emit_buffer(value);
        }
        next.pop_body()?;
        push_branch(result, Some(validity.clone()), next);
    }

    // The invalid case is a no-op beyond the trace.
    {
        let mut skipped = state.clone();
        skipped.add_trace(TraceEvent::expression(
            "Invalid emit",
            reference.validity().to_expr(),
        ));
        skipped.pop_body()?;
        push_branch(result, Some(Expression::not(validity)), skipped);
    }
    Ok(())
}

/// `hdr.isValid()`: return the header's validity bit.
fn header_is_valid(
    _evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    let receiver = call
        .receiver
        .as_ref()
        .ok_or_else(|| Error::bug("isValid requires a receiver"))?;
    let reference = StateRef::from_expr(receiver)?;
    let value = state.get(&reference.validity())?;
    let mut next = state.clone();
    next.replace_top_body(vec![Command::Return(value)])?;
    result.push(Branch::new(next));
    Ok(())
}

/// `hdr.setValid()`: mark the header valid. Its fields keep whatever value
/// they already hold.
fn header_set_valid(
    _evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    let receiver = call
        .receiver
        .as_ref()
        .ok_or_else(|| Error::bug("setValid requires a receiver"))?;
    let mut next = state.clone();
    let reference = StateRef::from_expr(receiver)?;
    next.set(reference.validity(), Expression::bool_literal(true));
    next.pop_body()?;
    result.push(Branch::new(next));
    Ok(())
}

/// `hdr.setInvalid()`: mark the header invalid and taint its fields, so any
/// later read observes an undefined value.
fn header_set_invalid(
    _evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    let receiver = call
        .receiver
        .as_ref()
        .ok_or_else(|| Error::bug("setInvalid requires a receiver"))?;
    let mut next = state.clone();
    set_header_validity(&mut next, receiver, false)?;
    next.pop_body()?;
    result.push(Branch::new(next));
    Ok(())
}

/// `verify(cond, err)`: continue when the condition holds; otherwise set the
/// parser error and reject.
fn verify(
    evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    if let Some(branches) = evaluator.step_args(state, call, 0..1)? {
        result.extend(branches);
        return Ok(());
    }
    let cond = &call.args[0];
    let error = call.args[1]
        .as_constant()
        .cloned()
        .ok_or_else(|| Error::bug("The error argument of verify must be a constant"))?;
    let error_ref = evaluator.program_info().current_parser_error_ref(state);

    if cond.has_taint() {
        let mut tainted = state.clone();
        tainted.add_trace(TraceEvent::expression("Tainted verify", cond.clone()));
        let taint = Expression::taint(error_ref.ty());
        tainted.set(error_ref, taint);
        tainted.pop_body()?;
        result.push(Branch::new(tainted));
        return Ok(());
    }

    {
        let mut next = state.clone();
        next.pop_body()?;
        push_branch(result, Some(cond.clone()), next);
    }

    {
        let mut rejected = state.clone();
        rejected.set(
            error_ref,
            Expression::constant_big(Type::bits(PARSER_ERROR_WIDTH_BITS), error),
        );
        rejected.replace_top_body(vec![Command::Exception(Exception::Reject)])?;
        push_branch(result, Some(Expression::not(cond.clone())), rejected);
    }
    Ok(())
}

/// `*copy_in(srcRef, targetParam, direction, forceUninitialized)`: bind a
/// block parameter from its architecture global under copy-in semantics.
///
/// Parameters of direction `out` are set target-uninitialized instead of
/// copied, with their validity bits cleared.
fn copy_in(
    evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    let source = StateRef::from_expr(&call.args[0])?;
    let target = StateRef::from_expr(&call.args[1])?;
    let Expression::StringLiteral(direction) = call.args[2].as_ref() else {
        return Err(Error::bug("The direction argument of copy_in must be a string"));
    };
    let force_taint = call.args[3]
        .as_bool()
        .ok_or_else(|| Error::bug("The force argument of copy_in must be a boolean"))?;

    let mut next = state.clone();
    // Disable undefined-region tainting around the internal copy; restored
    // below before the handler returns, so no exceptional path can observe
    // the temporary value.
    let saved = next
        .properties()
        .get_bool_or_false(PROP_IN_UNDEFINED_STATE);
    next.set_property(PROP_IN_UNDEFINED_STATE, PropertyValue::Bool(false));

    let ty = source.ty();
    if ty.is_struct_like() {
        let (source_fields, source_valids) = flat_fields(&source, &ty);
        let (target_fields, target_valids) = flat_fields(&target, &ty);
        for (source_valid, target_valid) in zip_eq(&source_valids, &target_valids) {
            if !next.exists(source_valid) {
                next.set(source_valid.clone(), Expression::bool_literal(false));
            }
            if direction == "out" {
                next.set(target_valid.clone(), Expression::bool_literal(false));
            } else {
                let value = next.get(source_valid)?;
                next.set(target_valid.clone(), value);
            }
        }
        for (source_field, target_field) in zip_eq(&source_fields, &target_fields) {
            copy_in_leaf(evaluator, &mut next, target_field, source_field, direction, force_taint)?;
        }
    } else {
        copy_in_leaf(evaluator, &mut next, &target, &source, direction, force_taint)?;
    }

    next.set_property(PROP_IN_UNDEFINED_STATE, PropertyValue::Bool(saved));
    next.pop_body()?;
    result.push(Branch::new(next));
    Ok(())
}

/// Performs the copy-in of one leaf reference.
fn copy_in_leaf(
    evaluator: &SmallStepEvaluator,
    state: &mut ExecutionState,
    target: &StateRef,
    source: &StateRef,
    direction: &str,
    force_taint: bool,
) -> Result<()> {
    if direction == "out" {
        let value = evaluator
            .program_info()
            .create_target_uninitialized(&target.ty(), force_taint);
        state.set(target.clone(), value);
    } else {
        let value = state.get(source)?;
        state.set(target.clone(), value);
    }
    Ok(())
}

/// `*copy_out(targetParam, srcRef, direction)`: write a block parameter back
/// to its architecture global for `inout` and `out` directions.
fn copy_out(
    _evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    let global = StateRef::from_expr(&call.args[0])?;
    let param = StateRef::from_expr(&call.args[1])?;
    let Expression::StringLiteral(direction) = call.args[2].as_ref() else {
        return Err(Error::bug("The direction argument of copy_out must be a string"));
    };

    let mut next = state.clone();
    let saved = next
        .properties()
        .get_bool_or_false(PROP_IN_UNDEFINED_STATE);
    next.set_property(PROP_IN_UNDEFINED_STATE, PropertyValue::Bool(false));

    if direction == "inout" || direction == "out" {
        let ty = global.ty();
        if ty.is_struct_like() {
            let (global_fields, global_valids) = flat_fields(&global, &ty);
            let (param_fields, param_valids) = flat_fields(&param, &ty);
            for (global_valid, param_valid) in zip_eq(&global_valids, &param_valids) {
                let value = next.get(param_valid)?;
                next.set(global_valid.clone(), value);
            }
            for (global_field, param_field) in zip_eq(&global_fields, &param_fields) {
                let value = next.get(param_field)?;
                next.set(global_field.clone(), value);
            }
        } else {
            let value = next.get(&param)?;
            next.set(global, value);
        }
    }

    next.set_property(PROP_IN_UNDEFINED_STATE, PropertyValue::Bool(saved));
    next.pop_body()?;
    result.push(Branch::new(next));
    Ok(())
}

/// `*prepend_to_prog_header(hdr)`: prepend the argument to the packet
/// buffer, emulating targets that prefix packets with metadata.
fn prepend_to_prog_header(
    _evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    let data = &call.args[0];
    let mut next = state.clone();
    let ty = data.ty();
    if ty.is_struct_like() {
        let reference = StateRef::from_expr(data)?;
        let (fields, _) = flat_fields(&reference, &ty);
        // Prepending happens in reverse so the first field ends up first.
        for field in fields.iter().rev() {
            let value = next.get(field)?;
            next.prepend_to_packet_buffer(value);
        }
    } else {
        let value = resolve_data_argument(&next, data)?;
        next.prepend_to_packet_buffer(value);
    }
    next.pop_body()?;
    result.push(Branch::new(next));
    Ok(())
}

/// `*append_to_prog_header(hdr)`: append the argument to the packet buffer.
fn append_to_prog_header(
    _evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    let data = &call.args[0];
    let mut next = state.clone();
    let ty = data.ty();
    if ty.is_struct_like() {
        let reference = StateRef::from_expr(data)?;
        let (fields, _) = flat_fields(&reference, &ty);
        for field in &fields {
            let value = next.get(field)?;
            next.append_to_packet_buffer(value);
        }
    } else {
        let value = resolve_data_argument(&next, data)?;
        next.append_to_packet_buffer(value);
    }
    next.pop_body()?;
    result.push(Branch::new(next));
    Ok(())
}

/// Resolves a scalar data argument that may be a reference or already a
/// value.
fn resolve_data_argument(state: &ExecutionState, data: &ExprRef) -> Result<ExprRef> {
    if data.is_symbolic_value() {
        Ok(data.clone())
    } else {
        let reference = StateRef::from_expr(data)?;
        state.get(&reference)
    }
}

/// `*prepend_emit_buffer()`: prepend the assembled emit buffer to the live
/// packet buffer, forming the output packet.
fn prepend_emit_buffer(
    _evaluator: &SmallStepEvaluator,
    _call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    let mut next = state.clone();
    if let Some(emitted) = next.emit_buffer() {
        next.prepend_to_packet_buffer(emitted);
        next.add_trace(TraceEvent::generic(
            "Prepending the emit buffer to the program packet",
        ));
    }
    next.pop_body()?;
    result.push(Branch::new(next));
    Ok(())
}

/// `*drop_and_exit()`: drop the packet and abandon the remaining pipeline.
fn drop_and_exit(
    evaluator: &SmallStepEvaluator,
    _call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    let mut next = state.clone();
    if evaluator.program_info().drop_is_active(state).has_taint() {
        // An unreadable drop decision leaves the output port undefined.
        let port_ref = evaluator.program_info().output_port_ref();
        let taint = Expression::taint(port_ref.ty());
        next.set(port_ref, taint);
        warn!("The drop decision is tainted; the output port is undefined");
    }
    next.add_trace(TraceEvent::generic("Packet marked dropped"));
    next.set_property("drop", PropertyValue::Bool(true));
    next.replace_top_body(vec![Command::Exception(Exception::Drop)])?;
    result.push(Branch::new(next));
    Ok(())
}
