//! Tests of the parser semantics: extraction, runtime advances, verify, and
//! the extract/emit round trip.

mod common;

use pipeline_testgen::{
    constant::{MAX_PACKET_LENGTH_BITS, PARSER_ERROR_PACKET_TOO_SHORT},
    env::StateRef,
    ir::{
        decl::{Direction, Transition},
        expr::{BinOp, Expression},
        types::Type,
    },
    program::{ArchSpec, STANDARD_METADATA},
    state::ExecutionState,
    strategy::linear::LinearEnumeration,
};

/// Gets the reference to the parser error variable in the standard
/// metadata.
fn parser_error_ref() -> StateRef {
    StateRef::base(STANDARD_METADATA, common::standard_metadata_type())
        .field("parser_error", Type::bits(32))
}

/// Gets the parser error recorded in `state` as a small integer.
fn parser_error_of(state: &ExecutionState) -> u64 {
    state
        .get(&parser_error_ref())
        .expect("the parser error is always initialized")
        .as_u64()
        .expect("the parser error is a constant")
}

#[test]
fn simple_parse_produces_accept_and_reject_paths() -> anyhow::Result<()> {
    let headers = common::single_field_headers(8);
    let parser = common::single_state_parser(
        "p",
        common::hdr_meta_params(&headers, Direction::Out),
        vec![common::packet_in_call(
            "extract",
            vec![common::header_expr(&headers, "hdr").ty()],
            vec![common::header_expr(&headers, "hdr")],
        )],
        Transition::Accept,
    );
    let arch = ArchSpec::new(vec![common::hdr_meta_block("Parser", "p")]);
    let info = common::program_info(vec![parser], arch);

    let enumeration =
        LinearEnumeration::new(info, common::unchecked_solver(), common::test_config())?;
    let branches = enumeration.explored_branches();
    assert_eq!(branches.len(), 2);

    let accept = branches
        .iter()
        .find(|branch| parser_error_of(&branch.state) == 0)
        .expect("an accepting path exists");
    let reject = branches
        .iter()
        .find(|branch| parser_error_of(&branch.state) == PARSER_ERROR_PACKET_TOO_SHORT)
        .expect("a rejecting path exists");

    // The accepting path assigned the first eight bits of the packet to the
    // extracted field.
    let field_ref = StateRef::base(common::HDR_GLOBAL, headers.clone())
        .field("h", headers.as_struct_like().unwrap().fields[0].ty.clone())
        .field("f", Type::bits(8));
    let expected = Expression::slice(
        ExecutionState::input_packet_var(),
        MAX_PACKET_LENGTH_BITS - 1,
        MAX_PACKET_LENGTH_BITS - 8,
    );
    assert_eq!(accept.state.get(&field_ref)?, expected);

    // Its guard requires the packet to hold at least those eight bits.
    let length_guard = Expression::binary(
        BinOp::Geq,
        ExecutionState::input_packet_size_var(),
        Expression::constant(ExecutionState::packet_size_type(), 8),
    );
    assert!(accept.state.path_constraint().contains(&length_guard));

    // The rejecting path never consumed from the packet.
    assert_eq!(reject.state.input_packet_cursor(), 0);

    Ok(())
}

#[test]
fn runtime_advance_commits_to_a_byte_aligned_size() -> anyhow::Result<()> {
    let headers = common::single_field_headers(8);
    let parser = common::single_state_parser(
        "p",
        common::hdr_meta_params(&headers, Direction::Out),
        vec![
            common::packet_in_call(
                "extract",
                vec![common::header_expr(&headers, "hdr").ty()],
                vec![common::header_expr(&headers, "hdr")],
            ),
            common::packet_in_call(
                "advance",
                vec![],
                vec![common::header_field_expr(&headers, "hdr")],
            ),
        ],
        Transition::Accept,
    );
    let arch = ArchSpec::new(vec![common::hdr_meta_block("Parser", "p")]);
    let info = common::program_info(vec![parser], arch);

    let enumeration =
        LinearEnumeration::new(info, common::unchecked_solver(), common::test_config())?;
    let branches = enumeration.explored_branches();
    assert_eq!(branches.len(), 3);

    // The successful advance consumed the extracted byte plus the committed
    // advance size.
    let advanced = branches
        .iter()
        .find(|branch| branch.state.input_packet_cursor() == 16)
        .expect("an advanced path exists");
    assert_eq!(parser_error_of(&advanced.state), 0);
    // The committed size shows up in the path constraint, alongside the
    // byte-alignment restriction on the advance expression.
    let rendered: Vec<String> = advanced
        .state
        .path_constraint()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert!(rendered.iter().any(|constraint| constraint.contains('%')));

    // The failed advance left the cursor after the extract and rejected.
    let rejected = branches
        .iter()
        .find(|branch| branch.state.input_packet_cursor() == 8)
        .expect("a rejected advance exists");
    assert_eq!(
        parser_error_of(&rejected.state),
        PARSER_ERROR_PACKET_TOO_SHORT
    );

    // The failed extract never moved the cursor at all.
    assert!(branches
        .iter()
        .any(|branch| branch.state.input_packet_cursor() == 0));

    Ok(())
}

#[test]
fn constant_false_verify_leaves_one_rejecting_path() -> anyhow::Result<()> {
    let headers = common::single_field_headers(8);
    let parser = common::single_state_parser(
        "p",
        common::hdr_meta_params(&headers, Direction::Out),
        vec![common::function_call(
            "verify",
            vec![
                Expression::bool_literal(false),
                Expression::constant(Type::bits(32), 7),
            ],
        )],
        Transition::Accept,
    );
    let arch = ArchSpec::new(vec![common::hdr_meta_block("Parser", "p")]);
    let info = common::program_info(vec![parser], arch);

    let enumeration =
        LinearEnumeration::new(info, common::unchecked_solver(), common::test_config())?;
    let branches = enumeration.explored_branches();

    // The continuing branch is guarded by the literal false and pruned.
    assert_eq!(branches.len(), 1);
    assert_eq!(parser_error_of(&branches[0].state), 7);

    Ok(())
}

#[test]
fn extracted_bits_round_trip_through_emit() -> anyhow::Result<()> {
    let headers = common::single_field_headers(16);
    let parser = common::single_state_parser(
        "p",
        common::hdr_meta_params(&headers, Direction::Out),
        vec![common::packet_in_call(
            "extract",
            vec![common::header_expr(&headers, "hdr").ty()],
            vec![common::header_expr(&headers, "hdr")],
        )],
        Transition::Accept,
    );
    let deparser = common::control(
        "dep",
        common::hdr_meta_params(&headers, Direction::In),
        vec![common::packet_out_call(
            "emit",
            vec![common::header_expr(&headers, "hdr")],
        )],
    );
    let arch = ArchSpec::new(vec![
        common::hdr_meta_block("Parser", "p"),
        common::hdr_meta_block("Deparser", "dep"),
    ]);
    let info = common::program_info(vec![parser, deparser], arch);

    let enumeration =
        LinearEnumeration::new(info, common::unchecked_solver(), common::test_config())?;
    let branches = enumeration.explored_branches();
    assert_eq!(branches.len(), 2);

    let accept = branches
        .iter()
        .find(|branch| parser_error_of(&branch.state) == 0)
        .expect("an accepting path exists");
    let expected = Expression::slice(
        ExecutionState::input_packet_var(),
        MAX_PACKET_LENGTH_BITS - 1,
        MAX_PACKET_LENGTH_BITS - 16,
    );
    // The emitted bits are exactly the extracted bits.
    assert_eq!(accept.state.emit_buffer(), Some(expected));

    // An invalid header emits nothing.
    let reject = branches
        .iter()
        .find(|branch| parser_error_of(&branch.state) == PARSER_ERROR_PACKET_TOO_SHORT)
        .expect("a rejecting path exists");
    assert_eq!(reject.state.emit_buffer(), None);

    Ok(())
}
