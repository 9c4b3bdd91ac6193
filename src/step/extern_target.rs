//! This module contains the implementations of the target-specific externs:
//! drop marking, randomness, assertions, hashing, registers, the
//! counter/meter family, cloning, resubmission, recirculation, and
//! checksums.

use std::rc::Rc;

use log::warn;

use crate::{
    constant::{
        DROP_PORT, INSTANCE_TYPE_WIDTH_BITS, MAX_RECIRCULATION_COUNT,
        PKT_INSTANCE_TYPE_EGRESS_CLONE, PKT_INSTANCE_TYPE_INGRESS_CLONE, PKT_INSTANCE_TYPE_RECIRC,
        PKT_INSTANCE_TYPE_RESUBMIT, PORT_NUMBER_WIDTH_BITS,
    },
    env::StateRef,
    error::execution::{Error, Result},
    ir::{
        expr::{ExprRef, Expression},
        stmt::Statement,
        types::{Type, TypeRef},
    },
    program::internal_call,
    state::{
        continuation::Command,
        flat_fields,
        properties::PropertyValue,
        test_object::{CloneInfo, RegisterValue, CATEGORY_CLONE_INFOS, CATEGORY_REGISTERS},
        trace::TraceEvent,
        ExecutionState,
    },
    step::{
        externs::{ExternCall, ExternMethodImpls},
        push_branch, Branch, SmallStepEvaluator,
    },
};

/// The property counting recirculation passes. Monotonic per branch.
pub const PROP_RECIRCULATE_COUNT: &str = "recirculate_count";

/// The property marking that the deparser tail must re-enter the pipeline.
pub const PROP_RECIRCULATE_ACTIVE: &str = "recirculate_active";

/// The property marking that the pending recirculation is a clone.
pub const PROP_CLONE_ACTIVE: &str = "clone_active";

/// The property holding the preservation field-list index.
pub const PROP_RECIRCULATE_INDEX: &str = "recirculate_index";

/// The property marking that the packet buffer resets to the original input.
pub const PROP_RECIRCULATE_RESET_PKT: &str = "recirculate_reset_pkt";

/// The property holding the instance type the re-entered packet carries.
pub const PROP_RECIRCULATE_INSTANCE_TYPE: &str = "recirculate_instance_type";

/// The property holding the clone session identifier.
pub const PROP_CLONE_SESSION_ID: &str = "clone_session_id";

/// The clone-type constant selecting an ingress-to-egress clone.
pub const CLONE_TYPE_I2E: u64 = 0;

/// The clone-type constant selecting an egress-to-egress clone.
pub const CLONE_TYPE_E2E: u64 = 1;

/// Registers the implementations of the target externs.
pub fn register(impls: &mut ExternMethodImpls) {
    impls.register("*", "mark_to_drop", vec!["standard_metadata"], mark_to_drop);
    impls.register("*", "random", vec!["result", "lo", "hi"], random);
    impls.register("*", "assert", vec!["check"], assert_assume);
    impls.register("*", "assume", vec!["check"], assert_assume);
    impls.register("*", "log_msg", vec!["msg"], log_msg);
    impls.register("*", "log_msg", vec!["msg", "args"], log_msg_format);
    impls.register(
        "*",
        "hash",
        vec!["result", "algo", "base", "data", "max"],
        hash,
    );
    impls.register("register", "read", vec!["result", "index"], register_read);
    impls.register("register", "write", vec!["index", "value"], register_write);
    impls.register("counter", "count", vec!["index"], effect_free_extern);
    impls.register("direct_counter", "count", vec![], effect_free_extern);
    impls.register(
        "meter",
        "execute_meter",
        vec!["index", "result"],
        effect_free_extern,
    );
    impls.register("direct_meter", "read", vec!["result"], effect_free_extern);
    impls.register("*", "digest", vec!["receiver", "data"], effect_free_extern);
    impls.register("*", "clone", vec!["type", "session"], clone_extern);
    impls.register(
        "*",
        "clone_preserving_field_list",
        vec!["type", "session", "data"],
        clone_extern,
    );
    impls.register(
        "*",
        "resubmit_preserving_field_list",
        vec!["data"],
        resubmit_preserving_field_list,
    );
    impls.register(
        "*",
        "recirculate_preserving_field_list",
        vec!["index"],
        recirculate_preserving_field_list,
    );
    impls.register(
        "*",
        "verify_checksum",
        vec!["condition", "data", "checksum", "algo"],
        verify_checksum,
    );
    impls.register(
        "*",
        "verify_checksum_with_payload",
        vec!["condition", "data", "checksum", "algo"],
        verify_checksum,
    );
    impls.register(
        "*",
        "update_checksum",
        vec!["condition", "data", "checksum", "algo"],
        update_checksum,
    );
    impls.register(
        "*",
        "update_checksum_with_payload",
        vec!["condition", "data", "checksum", "algo"],
        update_checksum,
    );
    impls.register("*", "*check_recirculate", vec![], check_recirculate);
}

/// `mark_to_drop(standard_metadata)`: route the packet to the drop port.
fn mark_to_drop(
    _evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    let metadata = &call.args[0];
    let metadata_ref = StateRef::from_expr(metadata)?;
    let port_ref = metadata_ref.field("egress_spec", Type::bits(PORT_NUMBER_WIDTH_BITS));

    let mut next = state.clone();
    next.set(
        port_ref,
        Expression::constant(Type::bits(PORT_NUMBER_WIDTH_BITS), DROP_PORT),
    );
    next.add_trace(TraceEvent::generic("mark_to_drop executed"));
    next.pop_body()?;
    result.push(Branch::new(next));
    Ok(())
}

/// `random(result, lo, hi)`: a degenerate range yields its single value; a
/// real range yields taint, as the device's generator is not modeled.
fn random(
    _evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    let lo = call.args[1]
        .as_constant()
        .ok_or_else(|| Error::bug("The lo bound of random must be a constant"))?;
    let hi = call.args[2]
        .as_constant()
        .ok_or_else(|| Error::bug("The hi bound of random must be a constant"))?;
    if lo > hi {
        return Err(Error::bug(format!(
            "The low bound {lo} of random exceeds the high bound {hi}"
        )));
    }

    let output = StateRef::from_expr(&call.args[0])?;
    let mut next = state.clone();
    if lo == hi {
        next.set(output, call.args[2].clone());
    } else {
        let taint = Expression::taint(output.ty());
        next.set(output, taint);
    }
    next.pop_body()?;
    result.push(Branch::new(next));
    Ok(())
}

/// `assert(check)` / `assume(check)`: fork on the condition. The failing
/// branch aborts under strict handling and is pruned under permissive
/// handling.
fn assert_assume(
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
    if cond.has_taint() {
        return Err(Error::unimplemented(format!(
            "{} cannot be evaluated under a tainted condition",
            call.name
        )));
    }

    {
        let mut next = state.clone();
        next.add_trace(TraceEvent::expression(
            format!("{}: true condition", call.name),
            cond.clone(),
        ));
        next.pop_body()?;
        push_branch(result, Some(cond.clone()), next);
    }

    if evaluator.config().permissive {
        return Ok(());
    }
    {
        let mut failed = state.clone();
        failed.add_trace(TraceEvent::expression(
            format!("{}: false condition", call.name),
            cond.clone(),
        ));
        failed.replace_top_body(vec![Command::Exception(
            crate::state::continuation::Exception::Abort,
        )])?;
        push_branch(result, Some(Expression::not(cond.clone())), failed);
    }
    Ok(())
}

/// `log_msg(msg)`: record the message in the trace.
fn log_msg(
    _evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    let Expression::StringLiteral(message) = call.args[0].as_ref() else {
        return Err(Error::bug("The message of log_msg must be a string literal"));
    };
    let mut next = state.clone();
    next.add_trace(TraceEvent::generic(message.clone()));
    next.pop_body()?;
    result.push(Branch::new(next));
    Ok(())
}

/// `log_msg(msg, args)`: format `{}` holes with the rendered arguments and
/// record the result in the trace.
fn log_msg_format(
    _evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    let Expression::StringLiteral(message) = call.args[0].as_ref() else {
        return Err(Error::bug("The message of log_msg must be a string literal"));
    };

    let mut rendered = String::new();
    if let Expression::Struct { components, .. } = call.args[1].as_ref() {
        let mut values = components.iter().map(|(_, value)| value);
        let mut rest = message.as_str();
        while let Some(position) = rest.find("{}") {
            rendered.push_str(&rest[..position]);
            match values.next() {
                Some(value) => rendered.push_str(&value.to_string()),
                None => rendered.push_str("{}"),
            }
            rest = &rest[position + 2..];
        }
        rendered.push_str(rest);
    } else {
        rendered = message.replacen("{}", &call.args[1].to_string(), 1);
    }

    let mut next = state.clone();
    next.add_trace(TraceEvent::generic(rendered));
    next.pop_body()?;
    result.push(Branch::new(next));
    Ok(())
}

/// `hash(result, algo, base, data, max)`: the output becomes a concolic
/// placeholder computed from the algorithm and data once a model is known.
fn hash(
    evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    if let Some(branches) = evaluator.step_args(state, call, 1..5)? {
        result.extend(branches);
        return Ok(());
    }
    let tainted = call.args[1..].iter().any(|arg| arg.has_taint());
    let output = StateRef::from_expr(&call.args[0])?;

    let mut next = state.clone();
    if tainted {
        let value = evaluator
            .program_info()
            .create_target_uninitialized(&output.ty(), false);
        next.set(output, value);
    } else {
        let concolic = Expression::concolic(
            output.ty(),
            "*method_hash",
            vec![call.args[1].clone(), call.args[3].clone()],
        );
        next.set(output, concolic);
    }
    next.pop_body()?;
    result.push(Branch::new(next));
    Ok(())
}

/// `register.read(result, index)`: the read value is a chain of ternary
/// choices over the writes recorded for the instance.
fn register_read(
    evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    if let Some(branches) = evaluator.step_args(state, call, 1..2)? {
        result.extend(branches);
        return Ok(());
    }
    let instance = call
        .instance
        .clone()
        .ok_or_else(|| Error::bug("register.read requires a receiver instance"))?;
    let output = &call.args[0];
    let index = &call.args[1];

    let mut next = state.clone();
    let register = match state.test_object(CATEGORY_REGISTERS, &instance) {
        Some(object) => object
            .downcast_ref::<RegisterValue>()
            .ok_or_else(|| Error::bug("A non-register object is stored under registervalues"))?
            .clone(),
        None => {
            let initial = evaluator
                .program_info()
                .create_target_uninitialized(&output.ty(), false);
            let register = RegisterValue::new(initial);
            next.add_test_object(CATEGORY_REGISTERS, instance.clone(), Rc::new(register.clone()));
            register
        }
    };
    let value = register.current_value(index);

    next.add_trace(TraceEvent::generic(format!(
        "RegisterRead: {instance}[{index}] into {output}"
    )));
    // The produced ternary chain must branch immediately, which the
    // assignment stepper does on our behalf.
    next.replace_top_body(vec![Command::Statement(Statement::assign(
        output.clone(),
        value,
    ))])?;
    result.push(Branch::new(next));
    Ok(())
}

/// `register.write(index, value)`: append a write condition to the
/// instance's recorded state.
fn register_write(
    evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    if let Some(branches) = evaluator.step_args(state, call, 0..2)? {
        result.extend(branches);
        return Ok(());
    }
    let instance = call
        .instance
        .clone()
        .ok_or_else(|| Error::bug("register.write requires a receiver instance"))?;
    let index = call.args[0].clone();
    let value = call.args[1].clone();

    let mut next = state.clone();
    next.add_trace(TraceEvent::generic(format!(
        "RegisterWrite: {instance}[{index}] = {value}"
    )));
    let mut register = match state.test_object(CATEGORY_REGISTERS, &instance) {
        Some(object) => object
            .downcast_ref::<RegisterValue>()
            .ok_or_else(|| Error::bug("A non-register object is stored under registervalues"))?
            .clone(),
        None => {
            let initial = evaluator
                .program_info()
                .create_target_uninitialized(&value.ty(), false);
            RegisterValue::new(initial)
        }
    };
    register.add_condition(index, value);
    next.add_test_object(CATEGORY_REGISTERS, instance, Rc::new(register));
    next.pop_body()?;
    result.push(Branch::new(next));
    Ok(())
}

/// Counters, meters, and digests have no effect in the symbolic
/// interpreter beyond a trace event.
fn effect_free_extern(
    _evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    warn!("{} is not fully implemented", call.name);
    let mut next = state.clone();
    next.add_trace(TraceEvent::generic(format!("{} executed", call.name)));
    next.pop_body()?;
    result.push(Branch::new(next));
    Ok(())
}

/// Gets the recirculation pass count of `state`.
fn recirculate_count(state: &ExecutionState) -> u64 {
    if state.has_property(PROP_RECIRCULATE_COUNT) {
        state
            .properties()
            .get_u64(PROP_RECIRCULATE_COUNT)
            .unwrap_or(0)
    } else {
        0
    }
}

/// Produces the drop branch taken when the recirculation budget is
/// exhausted, returning `true` when it was.
fn recirculation_exhausted(
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<bool> {
    if recirculate_count(state) < MAX_RECIRCULATION_COUNT {
        return Ok(false);
    }
    warn!("Only bounded recirculation is supported; dropping the packet");
    let mut next = state.clone();
    next.replace_top_body(vec![Command::Statement(Statement::method_call(
        internal_call("*drop_and_exit", vec![]),
    ))])?;
    result.push(Branch::new(next));
    Ok(true)
}

/// The free variable standing for the port the control plane assigns to a
/// clone session.
fn clone_session_port() -> ExprRef {
    Expression::symbolic_var(Type::bits(PORT_NUMBER_WIDTH_BITS), "*clone_session_port")
}

/// `clone(type, session)` and `clone_preserving_field_list(type, session,
/// data)`: fork into the original packet continuing unchanged and a clone
/// re-entering processing.
fn clone_extern(
    evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    if recirculation_exhausted(state, result)? {
        return Ok(());
    }
    if let Some(branches) = evaluator.step_args(state, call, 0..call.args.len())? {
        result.extend(branches);
        return Ok(());
    }
    if call.args.iter().any(|arg| arg.has_taint()) {
        warn!("clone arguments are tainted and not predictable; skipping clone execution");
        let mut next = state.clone();
        next.pop_body()?;
        result.push(Branch::new(next));
        return Ok(());
    }

    let clone_type = call.args[0]
        .as_u64()
        .ok_or_else(|| Error::bug("The clone type must be a constant"))?;
    let session = call.args[1].clone();
    let preserve_index = call.args.get(2).and_then(|arg| arg.as_u64());

    match clone_type {
        CLONE_TYPE_I2E => {
            let arch = evaluator.program_info().arch().clone();
            let ingress_index = arch.ingress_index.ok_or_else(|| {
                Error::unimplemented("Cloning requires the target to name its ingress block")
            })?;
            let block = arch
                .blocks
                .get(ingress_index)
                .ok_or_else(|| Error::bug("The ingress block index is out of bounds"))?
                .clone();
            let params = evaluator.program_info().block_params(&block)?;

            // The original packet continues as is.
            {
                let mut original = state.clone();
                let info = CloneInfo {
                    session: session.clone(),
                    port: clone_session_port(),
                    is_clone: false,
                };
                original.add_test_object(
                    CATEGORY_CLONE_INFOS,
                    session.to_string(),
                    Rc::new(info),
                );
                original.pop_body()?;
                result.push(Branch::new(original));
            }

            // The clone restarts the ingress over freshly copied-in state.
            let mut cloned = state.clone();
            let mut commands = Vec::new();
            for (param, source) in params.iter().zip(&block.param_sources) {
                let preserved_metadata =
                    preserve_index.is_some() && Some(source) == arch.user_metadata.as_ref();
                if preserved_metadata {
                    reset_preserving_field_list(
                        evaluator,
                        &mut cloned,
                        &StateRef::base(param.name.clone(), param.ty.clone()),
                        preserve_index.unwrap_or_default(),
                    );
                    continue;
                }
                commands.push(Command::Statement(Statement::method_call(
                    evaluator.program_info().copy_in_call(param, source, false),
                )));
            }
            commands.push(Command::Statement(Statement::exit()));

            let info = CloneInfo {
                session: session.clone(),
                port: clone_session_port(),
                is_clone: true,
            };
            cloned.add_test_object(CATEGORY_CLONE_INFOS, session.to_string(), Rc::new(info));
            cloned.reset_packet_buffer();
            cloned.set(
                evaluator.program_info().instance_type_ref(),
                Expression::constant(
                    Type::bits(INSTANCE_TYPE_WIDTH_BITS),
                    PKT_INSTANCE_TYPE_INGRESS_CLONE,
                ),
            );
            cloned.replace_top_body(commands)?;
            result.push(Branch::new(cloned));
            Ok(())
        }
        CLONE_TYPE_E2E => {
            let mut next = state.clone();
            next.set_property(
                PROP_RECIRCULATE_COUNT,
                PropertyValue::U64(recirculate_count(state) + 1),
            );
            next.set_property(PROP_RECIRCULATE_ACTIVE, PropertyValue::Bool(true));
            next.set_property(PROP_CLONE_ACTIVE, PropertyValue::Bool(true));
            next.set_property(PROP_CLONE_SESSION_ID, PropertyValue::Expression(session));
            if let Some(index) = preserve_index {
                next.set_property(PROP_RECIRCULATE_INDEX, PropertyValue::U64(index));
            }
            next.set_property(
                PROP_RECIRCULATE_INSTANCE_TYPE,
                PropertyValue::U64(PKT_INSTANCE_TYPE_EGRESS_CLONE),
            );
            next.pop_body()?;
            result.push(Branch::new(next));
            Ok(())
        }
        _ => Err(Error::unimplemented(format!(
            "Unsupported clone type {clone_type}"
        ))),
    }
}

/// `resubmit_preserving_field_list(data)`: re-enter the pipeline with the
/// original input packet.
fn resubmit_preserving_field_list(
    _evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    if recirculation_exhausted(state, result)? {
        return Ok(());
    }
    let index = call.args[0]
        .as_u64()
        .ok_or_else(|| Error::bug("The field-list index must be a constant"))?;

    let mut next = state.clone();
    next.set_property(
        PROP_RECIRCULATE_COUNT,
        PropertyValue::U64(recirculate_count(state) + 1),
    );
    next.set_property(PROP_RECIRCULATE_ACTIVE, PropertyValue::Bool(true));
    next.set_property(PROP_RECIRCULATE_INDEX, PropertyValue::U64(index));
    // Resubmission restarts from the original input packet, not from the
    // deparsed output.
    next.set_property(PROP_RECIRCULATE_RESET_PKT, PropertyValue::Bool(true));
    next.set_property(
        PROP_RECIRCULATE_INSTANCE_TYPE,
        PropertyValue::U64(PKT_INSTANCE_TYPE_RESUBMIT),
    );
    next.pop_body()?;
    result.push(Branch::new(next));
    Ok(())
}

/// `recirculate_preserving_field_list(index)`: re-enter the pipeline with
/// the deparsed output packet.
fn recirculate_preserving_field_list(
    _evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    if recirculation_exhausted(state, result)? {
        return Ok(());
    }
    let index = call.args[0]
        .as_u64()
        .ok_or_else(|| Error::bug("The field-list index must be a constant"))?;

    let mut next = state.clone();
    next.set_property(
        PROP_RECIRCULATE_COUNT,
        PropertyValue::U64(recirculate_count(state) + 1),
    );
    next.set_property(PROP_RECIRCULATE_ACTIVE, PropertyValue::Bool(true));
    next.set_property(PROP_RECIRCULATE_INDEX, PropertyValue::U64(index));
    next.set_property(
        PROP_RECIRCULATE_INSTANCE_TYPE,
        PropertyValue::U64(PKT_INSTANCE_TYPE_RECIRC),
    );
    next.pop_body()?;
    result.push(Branch::new(next));
    Ok(())
}

/// Resets the fields of the struct-typed `base`, skipping those tagged with
/// the preservation list `index`.
fn reset_preserving_field_list(
    evaluator: &SmallStepEvaluator,
    state: &mut ExecutionState,
    base: &StateRef,
    index: u64,
) {
    let ty = base.ty();
    let Some(shape) = ty.as_struct_like() else {
        return;
    };
    for field in &shape.fields {
        if field.field_lists.contains(&index) {
            continue;
        }
        let field_ref = base.field(field.name.clone(), field.ty.clone());
        let (leaves, _) = flat_fields(&field_ref, &field.ty);
        for leaf in leaves {
            let value = evaluator
                .program_info()
                .create_target_uninitialized(&leaf.ty(), false);
            state.set(leaf, value);
        }
    }
}

/// `*check_recirculate()`: the deparser-tail hook that re-enters the
/// pipeline when a recirculation, resubmission, or egress clone is pending.
fn check_recirculate(
    evaluator: &SmallStepEvaluator,
    _call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    if !state.properties().get_bool_or_false(PROP_RECIRCULATE_ACTIVE) {
        let mut next = state.clone();
        next.pop_body()?;
        result.push(Branch::new(next));
        return Ok(());
    }

    let info = evaluator.program_info();
    let mut recirculated = state.clone();

    if state
        .properties()
        .get_bool_or_false(PROP_RECIRCULATE_RESET_PKT)
    {
        recirculated.reset_packet_buffer();
        if let Some(original) = recirculated.input_packet() {
            recirculated.append_to_packet_buffer(original);
        }
    }

    // The packet length the re-entered parser observes is the size of the
    // assembled packet, in bytes.
    let length = recirculated.packet_buffer_size() / 8;
    recirculated.set(
        info.packet_length_ref(),
        Expression::constant(ExecutionState::packet_size_type(), u64::from(length)),
    );

    if recirculated.has_property(PROP_RECIRCULATE_INDEX) {
        let index = recirculated.properties().get_u64(PROP_RECIRCULATE_INDEX)?;
        if let Some(metadata) = info.arch().user_metadata.clone() {
            if let Some(ty) = info.user_metadata_type() {
                let base = StateRef::base(metadata, ty);
                reset_preserving_field_list(evaluator, &mut recirculated, &base, index);
            }
        }
    }

    let instance_type = state
        .properties()
        .get_u64(PROP_RECIRCULATE_INSTANCE_TYPE)?;
    recirculated.set(
        info.instance_type_ref(),
        Expression::constant(Type::bits(INSTANCE_TYPE_WIDTH_BITS), instance_type),
    );
    recirculated.set_property(PROP_RECIRCULATE_ACTIVE, PropertyValue::Bool(false));

    if state.properties().get_bool_or_false(PROP_CLONE_ACTIVE) {
        let session = state.properties().get_expression(PROP_CLONE_SESSION_ID)?;

        // The default state continues to the end of the pipeline as is.
        {
            let mut original = state.clone();
            original.set_property(PROP_CLONE_ACTIVE, PropertyValue::Bool(false));
            let clone_info = CloneInfo {
                session: session.clone(),
                port: clone_session_port(),
                is_clone: false,
            };
            original.add_test_object(
                CATEGORY_CLONE_INFOS,
                session.to_string(),
                Rc::new(clone_info),
            );
            original.pop_body()?;
            result.push(Branch::new(original));
        }

        // The clone re-enters processing at the egress.
        let egress_index = info.arch().egress_index.ok_or_else(|| {
            Error::unimplemented("Egress cloning requires the target to name its egress block")
        })?;
        let clone_info = CloneInfo {
            session: session.clone(),
            port: clone_session_port(),
            is_clone: true,
        };
        recirculated.add_test_object(
            CATEGORY_CLONE_INFOS,
            session.to_string(),
            Rc::new(clone_info),
        );
        recirculated.set_property(PROP_CLONE_ACTIVE, PropertyValue::Bool(false));
        recirculated.reset_packet_buffer();
        recirculated.replace_top_body(info.pipeline_sequence_from(egress_index)?)?;
        result.push(Branch::new(recirculated));
        return Ok(());
    }

    // Re-enter the whole pipeline; no new conditions are added.
    recirculated.replace_top_body(info.pipeline_sequence()?)?;
    result.push(Branch::new(recirculated));
    Ok(())
}

/// The type and inputs shared by the checksum placeholders.
fn checksum_concolic(name: &str, checksum_ty: TypeRef, algo: &ExprRef, data: &ExprRef) -> ExprRef {
    Expression::concolic(checksum_ty, name, vec![algo.clone(), data.clone()])
}

/// `verify_checksum(condition, data, checksum, algo)` and its payload
/// variant: equate a concolic checksum with the supplied value; a mismatch
/// raises the checksum error flag.
fn verify_checksum(
    evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    if let Some(branches) = evaluator.step_args(state, call, 0..4)? {
        result.extend(branches);
        return Ok(());
    }
    let cond = &call.args[0];
    let data = &call.args[1];
    let checksum = &call.args[2];
    let algo = &call.args[3];
    let error_ref = evaluator.program_info().checksum_error_ref();

    if call.args.iter().any(|arg| arg.has_taint()) {
        let mut tainted = state.clone();
        let taint = Expression::taint(error_ref.ty());
        tainted.set(error_ref, taint);
        tainted.pop_body()?;
        result.push(Branch::new(tainted));
        return Ok(());
    }

    let concolic_name = if call.name.ends_with("_with_payload") {
        "*method_checksum_with_payload"
    } else {
        "*method_checksum"
    };

    // The condition holds and the checksum matches.
    {
        let concolic = checksum_concolic(concolic_name, checksum.ty(), algo, data);
        let matches = Expression::equals(concolic, checksum.clone());
        let mut next = state.clone();
        next.pop_body()?;
        push_branch(result, Some(Expression::and(matches, cond.clone())), next);
    }

    // The condition holds and the checksum does not match.
    {
        let concolic = checksum_concolic(concolic_name, checksum.ty(), algo, data);
        let differs = Expression::not(Expression::equals(concolic, checksum.clone()));
        let mut next = state.clone();
        next.replace_top_body(vec![Command::Statement(Statement::assign(
            error_ref.to_expr(),
            Expression::constant(Type::bits(1), 1),
        ))])?;
        push_branch(result, Some(Expression::and(cond.clone(), differs)), next);
    }

    // The condition does not hold: verification always succeeds.
    {
        let mut next = state.clone();
        next.pop_body()?;
        push_branch(result, Some(Expression::not(cond.clone())), next);
    }
    Ok(())
}

/// `update_checksum(condition, data, checksum, algo)` and its payload
/// variant: write a concolic checksum into the output when the condition
/// holds.
fn update_checksum(
    evaluator: &SmallStepEvaluator,
    call: &ExternCall,
    state: &ExecutionState,
    result: &mut Vec<Branch>,
) -> Result<()> {
    if let Some(branches) = evaluator.step_args(state, call, 0..2)? {
        result.extend(branches);
        return Ok(());
    }
    let cond = &call.args[0];
    let data = &call.args[1];
    let checksum_ref = StateRef::from_expr(&call.args[2])?;
    let algo = &call.args[3];

    if cond.has_taint() || data.has_taint() {
        let mut tainted = state.clone();
        let taint = Expression::taint(checksum_ref.ty());
        tainted.set(checksum_ref, taint);
        tainted.pop_body()?;
        result.push(Branch::new(tainted));
        return Ok(());
    }

    let concolic_name = if call.name.ends_with("_with_payload") {
        "*method_checksum_with_payload"
    } else {
        "*method_checksum"
    };

    {
        let concolic = checksum_concolic(concolic_name, checksum_ref.ty(), algo, data);
        let mut next = state.clone();
        next.set(checksum_ref.clone(), concolic);
        next.pop_body()?;
        push_branch(result, Some(cond.clone()), next);
    }

    {
        let mut unchanged = state.clone();
        unchanged.pop_body()?;
        push_branch(result, Some(Expression::not(cond.clone())), unchanged);
    }
    Ok(())
}
