//! Tests of the recirculation machinery: one pass re-enters the pipeline
//! with the metadata reset around the preserved field list, and a second
//! attempt drops the packet.

mod common;

use pipeline_testgen::{
    constant::PKT_INSTANCE_TYPE_RECIRC,
    env::StateRef,
    ir::{
        decl::{Direction, Param, Transition},
        expr::Expression,
        stmt::Statement,
        types::{StructField, Type},
    },
    program::{ArchBlock, ArchSpec, STANDARD_METADATA},
    strategy::linear::LinearEnumeration,
};

#[test]
fn recirculation_is_bounded_and_preserves_listed_fields() -> anyhow::Result<()> {
    let headers = common::single_field_headers(8);
    let meta = Type::structure(
        "meta_t",
        vec![
            StructField::new("x", Type::bits(8)),
            StructField::preserved("y", Type::bits(8), vec![0]),
        ],
    );
    let meta_field = |name: &str| {
        Expression::member(
            Type::bits(8),
            Expression::path(meta.clone(), "m"),
            name,
        )
    };

    let parser = common::single_state_parser(
        "p",
        common::hdr_meta_params(&headers, Direction::Out),
        vec![],
        Transition::Accept,
    );
    let egress = common::control(
        "eg",
        vec![
            Param::new("m", Direction::InOut, meta.clone()),
            Param::new(
                "standard_metadata",
                Direction::InOut,
                common::standard_metadata_type(),
            ),
        ],
        vec![
            Statement::assign(meta_field("x"), Expression::constant(Type::bits(8), 1)),
            Statement::assign(meta_field("y"), Expression::constant(Type::bits(8), 2)),
            common::function_call(
                "recirculate_preserving_field_list",
                vec![Expression::constant(Type::bits(32), 0)],
            ),
        ],
    );

    let arch = ArchSpec::new(vec![
        common::hdr_meta_block("Parser", "p"),
        ArchBlock::new(
            "Egress",
            "eg",
            vec![common::META_GLOBAL.to_string(), STANDARD_METADATA.to_string()],
        ),
    ])
    .with_egress_index(1)
    .with_user_metadata(common::META_GLOBAL);
    let info = common::program_info(vec![parser, egress], arch);

    let enumeration =
        LinearEnumeration::new(info, common::unchecked_solver(), common::test_config())?;
    let branches = enumeration.explored_branches();

    // The single path recirculates once and is dropped on the second
    // attempt.
    assert_eq!(branches.len(), 1);
    let state = &branches[0].state;
    assert!(state.properties().get_bool_or_false("drop"));
    assert_eq!(state.properties().get_u64("recirculate_count")?, 1);

    // The recirculated pass carried the recirculation instance type.
    let instance_type_ref = StateRef::base(STANDARD_METADATA, common::standard_metadata_type())
        .field("instance_type", Type::bits(32));
    assert_eq!(
        state.get(&instance_type_ref)?.as_u64(),
        Some(PKT_INSTANCE_TYPE_RECIRC)
    );

    // The unlisted field was reset at the recirculation boundary while the
    // listed field survived; the dropped second pass never copied its
    // reassignments back out.
    let x_ref = StateRef::base(common::META_GLOBAL, meta.clone()).field("x", Type::bits(8));
    let y_ref = StateRef::base(common::META_GLOBAL, meta).field("y", Type::bits(8));
    assert_eq!(state.get(&x_ref)?.as_u64(), Some(0));
    assert_eq!(state.get(&y_ref)?.as_u64(), Some(2));

    Ok(())
}
