//! Tests of the cloning extern: an ingress-to-egress clone forks into the
//! original packet and a clone whose state was reset to the ingress entry.

mod common;

use pipeline_testgen::{
    constant::{PKT_INSTANCE_TYPE_INGRESS_CLONE, PKT_INSTANCE_TYPE_NORMAL},
    env::StateRef,
    ir::{
        decl::{Direction, Param, Transition},
        expr::Expression,
        types::{StructField, Type},
    },
    program::{ArchBlock, ArchSpec, STANDARD_METADATA},
    state::test_object::{CloneInfo, CATEGORY_CLONE_INFOS},
    strategy::linear::LinearEnumeration,
};

#[test]
fn ingress_clone_forks_original_and_reset_clone() -> anyhow::Result<()> {
    let headers = common::single_field_headers(8);
    let meta = Type::structure("meta_t", vec![StructField::new("x", Type::bits(8))]);

    let parser = common::single_state_parser(
        "p",
        common::hdr_meta_params(&headers, Direction::Out),
        vec![],
        Transition::Accept,
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
        vec![common::function_call(
            "clone",
            vec![
                Expression::constant(Type::bits(32), 0),
                Expression::constant(Type::bits(32), 5),
            ],
        )],
    );

    let arch = ArchSpec::new(vec![
        common::hdr_meta_block("Parser", "p"),
        ArchBlock::new(
            "Ingress",
            "ig",
            vec![common::META_GLOBAL.to_string(), STANDARD_METADATA.to_string()],
        ),
    ])
    .with_ingress_index(1)
    .with_user_metadata(common::META_GLOBAL);
    let info = common::program_info(vec![parser, ingress], arch);

    let enumeration =
        LinearEnumeration::new(info, common::unchecked_solver(), common::test_config())?;
    let branches = enumeration.explored_branches();
    assert_eq!(branches.len(), 2);

    let instance_type_ref = StateRef::base(STANDARD_METADATA, common::standard_metadata_type())
        .field("instance_type", Type::bits(32));

    let original = branches
        .iter()
        .find(|branch| {
            branch
                .state
                .get(&instance_type_ref)
                .ok()
                .and_then(|v| v.as_u64())
                == Some(PKT_INSTANCE_TYPE_NORMAL)
        })
        .expect("the original packet continues");
    let clone = branches
        .iter()
        .find(|branch| {
            branch
                .state
                .get(&instance_type_ref)
                .ok()
                .and_then(|v| v.as_u64())
                == Some(PKT_INSTANCE_TYPE_INGRESS_CLONE)
        })
        .expect("the clone re-enters processing");

    // Both states recorded the session, distinguished by the clone flag.
    for (branch, is_clone) in [(original, false), (clone, true)] {
        let objects = branch.state.test_objects().category(CATEGORY_CLONE_INFOS);
        assert_eq!(objects.len(), 1);
        let clone_info = objects[0]
            .1
            .downcast_ref::<CloneInfo>()
            .expect("the stored object is clone information");
        assert_eq!(clone_info.is_clone, is_clone);
        assert_eq!(clone_info.session.as_u64(), Some(5));
    }

    // The clone's packet buffer was cleared.
    assert_eq!(clone.state.packet_buffer(), None);

    Ok(())
}
