//! Tests of the register extern: a read after a write at the same index
//! observes the written value.

mod common;

use pipeline_testgen::{
    ir::{
        decl::{Declaration, Direction, ExternInstanceDecl, Param},
        expr::Expression,
        types::{StructField, Type},
    },
    program::{ArchBlock, ArchSpec, STANDARD_METADATA},
    env::StateRef,
    strategy::linear::LinearEnumeration,
};

#[test]
fn read_after_write_observes_the_written_value() -> anyhow::Result<()> {
    let meta = Type::structure("meta_t", vec![StructField::new("val", Type::bits(8))]);
    let value_ref = Expression::member(
        Type::bits(8),
        Expression::path(meta.clone(), "m"),
        "val",
    );

    let ingress = common::control(
        "ig",
        vec![
            Param::new("m", Direction::InOut, meta.clone()),
            Param::new(
                "standard_metadata",
                Direction::InOut,
                common::standard_metadata_type(),
            ),
        ],
        vec![
            common::instance_call(
                "r",
                "write",
                vec![
                    Expression::constant(Type::bits(32), 1),
                    Expression::constant(Type::bits(8), 42),
                ],
            ),
            common::instance_call(
                "r",
                "read",
                vec![value_ref, Expression::constant(Type::bits(32), 1)],
            ),
        ],
    );
    let register = Declaration::ExternInstance(ExternInstanceDecl {
        name: "r".to_string(),
        extern_type: "register".to_string(),
        size: Some(1024),
    });

    let arch = ArchSpec::new(vec![ArchBlock::new(
        "Ingress",
        "ig",
        vec![common::META_GLOBAL.to_string(), STANDARD_METADATA.to_string()],
    )]);
    let info = common::program_info(vec![ingress, register], arch);

    let enumeration =
        LinearEnumeration::new(info, common::unchecked_solver(), common::test_config())?;
    let branches = enumeration.explored_branches();

    // The write-then-read at a constant index folds the lookup chain away,
    // so there is exactly one path.
    assert_eq!(branches.len(), 1);
    let final_value = branches[0].state.get(
        &StateRef::base(common::META_GLOBAL, meta).field("val", Type::bits(8)),
    )?;
    assert_eq!(final_value.as_u64(), Some(42));

    Ok(())
}
