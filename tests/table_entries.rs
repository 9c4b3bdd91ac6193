//! Tests of the table stepper: a table with one exact key and two actions
//! produces a hit branch per action plus the default miss branch, each
//! backed by synthesized control-plane state.

mod common;

use pipeline_testgen::{
    env::StateRef,
    ir::{
        decl::{
            ActionCall, ActionDecl, Declaration, Direction, MatchKind, Param, TableDecl, TableKey,
        },
        expr::Expression,
        stmt::Statement,
        types::{StructField, Type},
    },
    program::{ArchBlock, ArchSpec, STANDARD_METADATA},
    state::test_object::{FieldMatch, TableConfig, CATEGORY_TABLES},
    step::table::{table_hit_ref, table_reached_ref},
    strategy::linear::LinearEnumeration,
};

fn meta_type() -> pipeline_testgen::ir::TypeRef {
    Type::structure(
        "meta_t",
        vec![
            StructField::new("k", Type::bits(8)),
            StructField::new("out", Type::bits(8)),
        ],
    )
}

fn out_field_expr() -> pipeline_testgen::ir::ExprRef {
    Expression::member(Type::bits(8), Expression::path(meta_type(), "m"), "out")
}

fn table_program() -> Vec<Declaration> {
    let a1 = Declaration::Action(ActionDecl {
        name: "a1".to_string(),
        params: vec![Param::new("x", Direction::None, Type::bits(8))],
        body: vec![Statement::assign(
            out_field_expr(),
            Expression::path(Type::bits(8), "x"),
        )],
    });
    let a2 = Declaration::Action(ActionDecl {
        name: "a2".to_string(),
        params: vec![],
        body: vec![Statement::assign(
            out_field_expr(),
            Expression::constant(Type::bits(8), 7),
        )],
    });
    let no_action = Declaration::Action(ActionDecl {
        name: "NoAction".to_string(),
        params: vec![],
        body: vec![],
    });

    let table = Declaration::Table(TableDecl {
        name: "t".to_string(),
        keys: vec![TableKey {
            name: "k".to_string(),
            expr: Expression::member(Type::bits(8), Expression::path(meta_type(), "m"), "k"),
            match_kind: MatchKind::Exact,
        }],
        actions: vec!["a1".to_string(), "a2".to_string()],
        default_action: ActionCall {
            action: "NoAction".to_string(),
            args: vec![],
        },
        entries: None,
        implementation: None,
    });

    let ingress = common::control(
        "ig",
        vec![
            Param::new("m", Direction::InOut, meta_type()),
            Param::new(
                "standard_metadata",
                Direction::InOut,
                common::standard_metadata_type(),
            ),
        ],
        vec![common::instance_call("t", "apply", vec![])],
    );

    vec![a1, a2, no_action, table, ingress]
}

fn table_arch() -> ArchSpec {
    ArchSpec::new(vec![ArchBlock::new(
        "Ingress",
        "ig",
        vec![common::META_GLOBAL.to_string(), STANDARD_METADATA.to_string()],
    )])
}

#[test]
fn exact_table_enumerates_two_hits_and_a_miss() -> anyhow::Result<()> {
    let info = common::program_info(table_program(), table_arch());
    let enumeration =
        LinearEnumeration::new(info, common::unchecked_solver(), common::test_config())?;
    let branches = enumeration.explored_branches();
    assert_eq!(branches.len(), 3);

    let out_ref = StateRef::base(common::META_GLOBAL, meta_type()).field("out", Type::bits(8));

    let hits: Vec<_> = branches
        .iter()
        .filter(|branch| {
            branch
                .state
                .get(&table_hit_ref("t"))
                .map(|hit| hit.as_bool() == Some(true))
                .unwrap_or(false)
        })
        .collect();
    assert_eq!(hits.len(), 2);

    // Every branch marked the table as reached.
    for branch in branches {
        assert_eq!(
            branch.state.get(&table_reached_ref("t"))?.as_bool(),
            Some(true)
        );
    }

    // The first action writes its synthesized control-plane argument.
    let a1_branch = hits
        .iter()
        .find(|branch| {
            matches!(
                branch.state.get(&out_ref).as_deref(),
                Ok(Expression::SymbolicVar { .. })
            )
        })
        .expect("a branch executing a1 exists");
    let arg = a1_branch.state.get(&out_ref)?;
    assert!(matches!(
        arg.as_ref(),
        Expression::SymbolicVar { name, .. } if name == "t_param_a10"
    ));

    // The second action writes its constant.
    assert!(hits
        .iter()
        .any(|branch| branch.state.get(&out_ref).ok().and_then(|v| v.as_u64()) == Some(7)));

    // The miss branch ran the default action, leaving the initial value.
    let miss = branches
        .iter()
        .find(|branch| {
            branch
                .state
                .get(&table_hit_ref("t"))
                .map(|hit| hit.as_bool() == Some(false))
                .unwrap_or(false)
        })
        .expect("a miss branch exists");
    assert_eq!(miss.state.get(&out_ref)?.as_u64(), Some(0));

    Ok(())
}

#[test]
fn hit_branches_record_control_plane_rules() -> anyhow::Result<()> {
    let info = common::program_info(table_program(), table_arch());
    let enumeration =
        LinearEnumeration::new(info, common::unchecked_solver(), common::test_config())?;

    let mut recorded_actions = Vec::new();
    for branch in enumeration.explored_branches() {
        let Some(object) = branch.state.test_object(CATEGORY_TABLES, "t") else {
            continue;
        };
        let config = object
            .downcast_ref::<TableConfig>()
            .expect("the stored object is a table configuration");
        assert_eq!(config.rules().len(), 1);
        let rule = &config.rules()[0];
        assert!(matches!(
            rule.matches.get("k"),
            Some(FieldMatch::Exact { .. })
        ));
        recorded_actions.push(rule.call.action.clone());
    }

    recorded_actions.sort();
    assert_eq!(recorded_actions, vec!["a1".to_string(), "a2".to_string()]);
    Ok(())
}

#[test]
fn hit_guards_mention_the_synthesized_key() -> anyhow::Result<()> {
    let info = common::program_info(table_program(), table_arch());
    let enumeration =
        LinearEnumeration::new(info, common::unchecked_solver(), common::test_config())?;

    let hit = enumeration
        .explored_branches()
        .iter()
        .find(|branch| {
            branch
                .state
                .get(&table_hit_ref("t"))
                .map(|hit| hit.as_bool() == Some(true))
                .unwrap_or(false)
        })
        .expect("a hit branch exists")
        .clone();
    let rendered: Vec<String> = hit
        .state
        .path_constraint()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert!(rendered.iter().any(|c| c.contains("t_key_k")));
    Ok(())
}

#[test]
fn exploration_order_is_reproducible_under_a_seed() -> anyhow::Result<()> {
    let produce = || -> anyhow::Result<Vec<String>> {
        let info = common::program_info(table_program(), table_arch());
        let mut enumeration =
            LinearEnumeration::new(info, common::unchecked_solver(), common::test_config())?;
        let out_ref =
            StateRef::base(common::META_GLOBAL, meta_type()).field("out", Type::bits(8));
        let mut produced = Vec::new();
        enumeration.run(&mut |state| {
            let value = state
                .get(&out_ref)
                .map(|value| value.to_string())
                .unwrap_or_default();
            produced.push(value);
            false
        })?;
        Ok(produced)
    };

    let first = produce()?;
    let second = produce()?;
    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
    Ok(())
}
