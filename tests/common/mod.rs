//! This module contains common testing utilities for testing this library.
#![cfg(test)]
#![allow(unused)] // Not every helper is used by every test binary.

use std::rc::Rc;

use pipeline_testgen::{
    ir::{
        decl::{ControlDecl, Declaration, Direction, Param, ParserDecl, ParserState, Transition},
        expr::{ExprRef, Expression},
        stmt::{Statement, StmtRef},
        types::{StructField, Type, TypeRef},
    },
    program::{ArchBlock, ArchSpec, ProgramInfo, STANDARD_METADATA},
    Config, UncheckedSolver,
};

/// The global architecture variable holding the parsed headers.
pub const HDR_GLOBAL: &str = "*hdr";

/// The global architecture variable holding the user metadata.
pub const META_GLOBAL: &str = "*meta";

/// Constructs the standard metadata structure used by the test programs.
pub fn standard_metadata_type() -> TypeRef {
    Type::structure(
        "standard_metadata_t",
        vec![
            StructField::new("ingress_port", Type::bits(9)),
            StructField::new("egress_spec", Type::bits(9)),
            StructField::new("instance_type", Type::bits(32)),
            StructField::new("packet_length", Type::bits(32)),
            StructField::new("parser_error", Type::bits(32)),
            StructField::new("checksum_error", Type::bits(1)),
        ],
    )
}

/// Constructs a headers structure holding a single header `h` with one
/// field `f` of the provided `width`.
pub fn single_field_headers(width: u32) -> TypeRef {
    let header = Type::header("h_t", vec![StructField::new("f", Type::bits(width))]);
    Type::structure("headers_t", vec![StructField::new("h", header)])
}

/// Gets the expression referencing the header `h` inside a parser or
/// control parameter named `param` of type `headers`.
pub fn header_expr(headers: &TypeRef, param: &str) -> ExprRef {
    let shape = headers.as_struct_like().expect("headers is a struct");
    let header_ty = shape.fields[0].ty.clone();
    Expression::member(
        header_ty,
        Expression::path(headers.clone(), param),
        shape.fields[0].name.clone(),
    )
}

/// Gets the expression referencing the field `f` of the header `h` inside
/// the parameter named `param`.
pub fn header_field_expr(headers: &TypeRef, param: &str) -> ExprRef {
    let header = header_expr(headers, param);
    let header_ty = header.ty();
    let field = header_ty.as_struct_like().expect("header is a struct").fields[0].clone();
    Expression::member(field.ty, header, field.name)
}

/// Constructs a call statement to a method of the packet-input intrinsic.
pub fn packet_in_call(name: &str, type_args: Vec<TypeRef>, args: Vec<ExprRef>) -> StmtRef {
    intrinsic_call_stmt("packet_in", name, type_args, args)
}

/// Constructs a call statement to a method of the packet-output intrinsic.
pub fn packet_out_call(name: &str, args: Vec<ExprRef>) -> StmtRef {
    intrinsic_call_stmt("packet_out", name, vec![], args)
}

/// Constructs a call statement to a method of the named instance.
pub fn instance_call(instance: &str, name: &str, args: Vec<ExprRef>) -> StmtRef {
    intrinsic_call_stmt(instance, name, vec![], args)
}

/// Constructs a call statement to a free-standing function.
pub fn function_call(name: &str, args: Vec<ExprRef>) -> StmtRef {
    Statement::method_call(Expression::method_call(
        Rc::new(Type::Void),
        Expression::path(Rc::new(Type::Void), name),
        vec![],
        args,
    ))
}

fn intrinsic_call_stmt(
    receiver: &str,
    name: &str,
    type_args: Vec<TypeRef>,
    args: Vec<ExprRef>,
) -> StmtRef {
    Statement::method_call(Expression::method_call(
        Rc::new(Type::Void),
        Expression::member(
            Rc::new(Type::Void),
            Expression::path(Rc::new(Type::Void), receiver),
            name,
        ),
        type_args,
        args,
    ))
}

/// Constructs a parser declaration named `name` with a single `start` state
/// holding the provided statements and transition.
pub fn single_state_parser(
    name: &str,
    params: Vec<Param>,
    statements: Vec<StmtRef>,
    transition: Transition,
) -> Declaration {
    let start = ParserState {
        name: "start".to_string(),
        statements,
        transition,
    };
    Declaration::Parser(ParserDecl {
        name: name.to_string(),
        params,
        states: [("start".to_string(), start)].into_iter().collect(),
    })
}

/// Constructs a control declaration from its parameters and body.
pub fn control(name: &str, params: Vec<Param>, body: Vec<StmtRef>) -> Declaration {
    Declaration::Control(ControlDecl {
        name: name.to_string(),
        params,
        body,
    })
}

/// Constructs the parameters of a block over headers and standard metadata.
pub fn hdr_meta_params(headers: &TypeRef, headers_direction: Direction) -> Vec<Param> {
    vec![
        Param::new("hdr", headers_direction, headers.clone()),
        Param::new("standard_metadata", Direction::InOut, standard_metadata_type()),
    ]
}

/// Constructs the architecture block binding `decl` to the standard headers
/// and metadata globals.
pub fn hdr_meta_block(name: &str, decl: &str) -> ArchBlock {
    ArchBlock::new(
        name,
        decl,
        vec![HDR_GLOBAL.to_string(), STANDARD_METADATA.to_string()],
    )
}

/// Constructs program info over the provided declarations and blocks.
pub fn program_info(
    declarations: Vec<Declaration>,
    arch: ArchSpec,
) -> Rc<ProgramInfo> {
    let mut program = pipeline_testgen::ir::Program::new();
    for declaration in declarations {
        program.declare(declaration);
    }
    Rc::new(ProgramInfo::new(Rc::new(program), arch))
}

/// Constructs a default configuration with a fixed seed so tests are
/// reproducible.
pub fn test_config() -> Config {
    Config::default().with_seed(42)
}

/// Constructs a solver that keeps every enumerated path alive.
pub fn unchecked_solver() -> pipeline_testgen::DynSolver {
    UncheckedSolver.in_rc()
}
