//! This module contains the architecture-specific program metadata: the
//! ordered pipeline blocks, their parameter directions, and the target
//! conventions for uninitialized values and standard metadata.
//!
//! The pipeline contract is simple: each programmable block is driven by a
//! copy-in of its parameters from architecture-level globals, the block's
//! body guarded by an exit handler, and a copy-out back to the globals.

use std::{collections::BTreeSet, rc::Rc};

use crate::{
    constant::{
        DROP_PORT, INSTANCE_TYPE_WIDTH_BITS, PARSER_ERROR_PACKET_TOO_SHORT,
        PARSER_ERROR_WIDTH_BITS, PKT_INSTANCE_TYPE_NORMAL, PORT_NUMBER_WIDTH_BITS,
    },
    env::StateRef,
    error::execution::{Error, Result},
    ir::{
        decl::{Declaration, Direction, Param, Program},
        expr::{BinOp, ExprRef, Expression},
        stmt::Statement,
        types::{Type, TypeRef},
    },
    state::{
        continuation::{Command, Exception},
        properties::PropertyValue,
        ExecutionState, PROP_PARSER_ERROR_LABEL,
    },
};

/// The root symbol of the architecture's standard metadata.
pub const STANDARD_METADATA: &str = "*standard_metadata";

/// One programmable block of the architecture, in pipeline position.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArchBlock {
    /// The architectural name of the block, e.g. `Ingress`.
    pub name: String,

    /// The name of the parser or control declaration implementing the
    /// block.
    pub decl: String,

    /// The architecture-level global bound to each of the block's
    /// parameters, in parameter order.
    pub param_sources: Vec<String>,
}

impl ArchBlock {
    /// Creates a block named `name` implemented by `decl` whose parameters
    /// bind to `param_sources`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        decl: impl Into<String>,
        param_sources: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            decl: decl.into(),
            param_sources,
        }
    }
}

/// The target descriptor: programmable blocks in pipeline order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ArchSpec {
    /// The blocks in pipeline order.
    pub blocks: Vec<ArchBlock>,

    /// The index of the ingress block, whose parameters a clone resets.
    pub ingress_index: Option<usize>,

    /// The index of the first egress-side block, used when a cloned packet
    /// re-enters the pipeline there.
    pub egress_index: Option<usize>,

    /// The architecture global holding the user metadata, whose fields are
    /// reset (modulo preservation lists) on recirculation.
    pub user_metadata: Option<String>,
}

impl ArchSpec {
    /// Creates a spec over the provided `blocks` with no gress markers.
    #[must_use]
    pub fn new(blocks: Vec<ArchBlock>) -> Self {
        Self {
            blocks,
            ingress_index: None,
            egress_index: None,
            user_metadata: None,
        }
    }

    /// Marks the block at `index` as the ingress block.
    #[must_use]
    pub fn with_ingress_index(mut self, index: usize) -> Self {
        self.ingress_index = Some(index);
        self
    }

    /// Marks the block at `index` as the first egress-side block.
    #[must_use]
    pub fn with_egress_index(mut self, index: usize) -> Self {
        self.egress_index = Some(index);
        self
    }

    /// Names the architecture global holding the user metadata.
    #[must_use]
    pub fn with_user_metadata(mut self, global: impl Into<String>) -> Self {
        self.user_metadata = Some(global.into());
        self
    }
}

/// Architecture-specific metadata tying a normalized program to its target.
///
/// The program and the spec are immutable; many execution states reference
/// the same info without coordination.
#[derive(Clone, Debug)]
pub struct ProgramInfo {
    program: Rc<Program>,
    arch: ArchSpec,
}

impl ProgramInfo {
    /// Creates program info for `program` on the target described by
    /// `arch`.
    #[must_use]
    pub fn new(program: Rc<Program>, arch: ArchSpec) -> Self {
        Self { program, arch }
    }

    /// Gets the normalized program.
    #[must_use]
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Gets the target descriptor.
    #[must_use]
    pub fn arch(&self) -> &ArchSpec {
        &self.arch
    }

    /// Produces the command sequence driving the entire pipeline, including
    /// the deparser tail that assembles the output packet and processes
    /// pending recirculation.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a block references an unknown declaration or its
    /// parameter count disagrees with the spec.
    pub fn pipeline_sequence(&self) -> Result<Vec<Command>> {
        self.pipeline_sequence_from(0)
    }

    /// Produces the pipeline command sequence starting at block `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a block references an unknown declaration or its
    /// parameter count disagrees with the spec.
    pub fn pipeline_sequence_from(&self, index: usize) -> Result<Vec<Command>> {
        let mut commands = Vec::new();
        for block in self.arch.blocks.iter().skip(index) {
            commands.extend(self.block_commands(block)?);
        }
        commands.push(Command::Statement(Statement::method_call(
            internal_call("*prepend_emit_buffer", vec![]),
        )));
        commands.push(Command::Statement(Statement::method_call(internal_call(
            "*check_recirculate",
            vec![],
        ))));
        Ok(commands)
    }

    /// Produces the copy-in / apply / copy-out command sequence for one
    /// block.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the block references an unknown declaration or its
    /// parameter count disagrees with the spec.
    pub fn block_commands(&self, block: &ArchBlock) -> Result<Vec<Command>> {
        let (params, apply) = match self.program.declaration(&block.decl) {
            Some(Declaration::Parser(parser)) => {
                // Parser errors are written through the parser's metadata
                // parameter, so the block's copy-out propagates them to the
                // architecture global.
                let error_label = parser
                    .params
                    .iter()
                    .zip(&block.param_sources)
                    .find(|(_, source)| source.as_str() == STANDARD_METADATA)
                    .map(|(param, _)| {
                        Expression::member(
                            Type::bits(PARSER_ERROR_WIDTH_BITS),
                            Expression::path(param.ty.clone(), param.name.clone()),
                            "parser_error",
                        )
                    })
                    .unwrap_or_else(|| self.parser_error_ref().to_expr());

                let body = vec![
                    Command::SetProperty {
                        key: PROP_PARSER_ERROR_LABEL.to_string(),
                        value: PropertyValue::Expression(error_label.clone()),
                    },
                    Command::ParserState {
                        parser: parser.name.clone(),
                        state: "start".to_string(),
                    },
                ];
                // A rejected parse continues at the next block with the
                // parser error left in the metadata; running out of packet
                // additionally records its dedicated error code.
                let too_short = vec![Command::Statement(Statement::assign(
                    error_label,
                    Expression::constant(
                        Type::bits(PARSER_ERROR_WIDTH_BITS),
                        PARSER_ERROR_PACKET_TOO_SHORT,
                    ),
                ))];
                let handlers = vec![
                    (Exception::Reject, vec![]),
                    (Exception::PacketTooShort, too_short),
                ];
                (
                    parser.params.clone(),
                    Command::Guarded { body, handlers },
                )
            }
            Some(Declaration::Control(control)) => {
                let body = control
                    .body
                    .iter()
                    .map(|statement| Command::Statement(statement.clone()))
                    .collect();
                let handlers = vec![(Exception::Exit, vec![])];
                (
                    control.params.clone(),
                    Command::Guarded { body, handlers },
                )
            }
            _ => {
                return Err(Error::UnknownDeclaration {
                    name: block.decl.clone(),
                })
            }
        };

        if params.len() != block.param_sources.len() {
            return Err(Error::bug(format!(
                "Block {} binds {} globals to {} parameters",
                block.name,
                block.param_sources.len(),
                params.len()
            )));
        }

        let mut commands = Vec::new();
        for (param, source) in params.iter().zip(&block.param_sources) {
            commands.push(Command::Statement(Statement::method_call(
                self.copy_in_call(param, source, false),
            )));
        }
        commands.push(apply);
        for (param, source) in params.iter().zip(&block.param_sources) {
            commands.push(Command::Statement(Statement::method_call(
                self.copy_out_call(param, source),
            )));
        }
        Ok(commands)
    }

    /// Produces the internal copy-in call binding `param` from the global
    /// `source`.
    #[must_use]
    pub fn copy_in_call(&self, param: &Param, source: &str, force_taint: bool) -> ExprRef {
        internal_call(
            "*copy_in",
            vec![
                Expression::path(param.ty.clone(), source),
                Expression::path(param.ty.clone(), param.name.clone()),
                Expression::string_literal(direction_name(param.direction)),
                Expression::bool_literal(force_taint),
            ],
        )
    }

    /// Produces the internal copy-out call writing `param` back to the
    /// global `source`.
    #[must_use]
    pub fn copy_out_call(&self, param: &Param, source: &str) -> ExprRef {
        internal_call(
            "*copy_out",
            vec![
                Expression::path(param.ty.clone(), source),
                Expression::path(param.ty.clone(), param.name.clone()),
                Expression::string_literal(direction_name(param.direction)),
            ],
        )
    }

    /// Creates the value a target-uninitialized variable of scalar type `ty`
    /// holds: taint when `force_taint` is set, and the target's all-zero
    /// default otherwise.
    #[must_use]
    pub fn create_target_uninitialized(&self, ty: &TypeRef, force_taint: bool) -> ExprRef {
        if force_taint {
            return Expression::taint(ty.clone());
        }
        match ty.as_ref() {
            Type::Bool => Expression::bool_literal(false),
            _ => Expression::constant(ty.clone(), 0),
        }
    }

    /// Gets the reference to the parser error variable.
    #[must_use]
    pub fn parser_error_ref(&self) -> StateRef {
        self.standard_metadata_field("parser_error", Type::bits(PARSER_ERROR_WIDTH_BITS))
    }

    /// Gets the reference the currently executing parser uses for its error
    /// variable, falling back to the architecture global outside a parser.
    #[must_use]
    pub fn current_parser_error_ref(&self, state: &ExecutionState) -> StateRef {
        if state.has_property(PROP_PARSER_ERROR_LABEL) {
            if let Ok(label) = state.properties().get_expression(PROP_PARSER_ERROR_LABEL) {
                if let Ok(reference) = StateRef::from_expr(&label) {
                    return reference;
                }
            }
        }
        self.parser_error_ref()
    }

    /// Gets the reference to the output port variable.
    #[must_use]
    pub fn output_port_ref(&self) -> StateRef {
        self.standard_metadata_field("egress_spec", Type::bits(PORT_NUMBER_WIDTH_BITS))
    }

    /// Gets the reference to the instance-type variable.
    #[must_use]
    pub fn instance_type_ref(&self) -> StateRef {
        self.standard_metadata_field("instance_type", Type::bits(INSTANCE_TYPE_WIDTH_BITS))
    }

    /// Gets the reference to the checksum error flag.
    #[must_use]
    pub fn checksum_error_ref(&self) -> StateRef {
        self.standard_metadata_field("checksum_error", Type::bits(1))
    }

    /// Gets the reference to the packet length field.
    #[must_use]
    pub fn packet_length_ref(&self) -> StateRef {
        self.standard_metadata_field("packet_length", ExecutionState::packet_size_type())
    }

    /// Computes the condition under which the packet is currently marked to
    /// be dropped.
    #[must_use]
    pub fn drop_is_active(&self, state: &ExecutionState) -> ExprRef {
        let port = state
            .get(&self.output_port_ref())
            .unwrap_or_else(|_| Expression::taint(Type::bits(PORT_NUMBER_WIDTH_BITS)));
        Expression::equals(
            port,
            Expression::constant(Type::bits(PORT_NUMBER_WIDTH_BITS), DROP_PORT),
        )
    }

    /// Creates the initial execution state: the pipeline sequence guarded by
    /// drop and abort handlers, with every architecture global initialized
    /// to its target default.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the pipeline sequence cannot be produced.
    pub fn initial_state(&self) -> Result<ExecutionState> {
        let body = self.pipeline_sequence()?;
        let mut state = ExecutionState::new(vec![Command::Guarded {
            body,
            handlers: vec![(Exception::Drop, vec![]), (Exception::Abort, vec![])],
        }]);
        // No test can ask for a packet longer than the target supports.
        state.add_path_constraint(Expression::binary(
            BinOp::Leq,
            ExecutionState::input_packet_size_var(),
            Expression::constant(
                ExecutionState::packet_size_type(),
                u64::from(crate::constant::MAX_PACKET_LENGTH_BITS),
            ),
        ));
        self.initialize_globals(&mut state)?;
        Ok(state)
    }

    /// Populates the architecture globals of `state` with target defaults
    /// and wires up the standard metadata specials.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a block references an unknown declaration.
    pub fn initialize_globals(&self, state: &mut ExecutionState) -> Result<()> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for block in &self.arch.blocks {
            let params = self.block_params(block)?;
            for (param, source) in params.iter().zip(&block.param_sources) {
                if !seen.insert(source.clone()) {
                    continue;
                }
                let base = StateRef::base(source.clone(), param.ty.clone());
                if param.ty.is_struct_like() {
                    let (fields, validities) = crate::state::flat_fields(&base, &param.ty);
                    for field in fields {
                        let value = self.create_target_uninitialized(&field.ty(), false);
                        state.set(field, value);
                    }
                    for validity in validities {
                        state.set(validity, Expression::bool_literal(false));
                    }
                } else {
                    let value = self.create_target_uninitialized(&param.ty, false);
                    state.set(base, value);
                }
            }
        }

        if seen.contains(STANDARD_METADATA) {
            state.set(
                self.standard_metadata_field("ingress_port", Type::bits(PORT_NUMBER_WIDTH_BITS)),
                ExecutionState::input_port_var(),
            );
            state.set(
                self.instance_type_ref(),
                Expression::constant(
                    Type::bits(INSTANCE_TYPE_WIDTH_BITS),
                    PKT_INSTANCE_TYPE_NORMAL,
                ),
            );
            state.set(
                self.packet_length_ref(),
                Expression::binary(
                    BinOp::Div,
                    ExecutionState::input_packet_size_var(),
                    Expression::constant(ExecutionState::packet_size_type(), 8),
                ),
            );
        }
        Ok(())
    }

    /// Gets the parameters of the declaration implementing `block`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the block references an unknown declaration.
    pub fn block_params(&self, block: &ArchBlock) -> Result<Vec<Param>> {
        match self.program.declaration(&block.decl) {
            Some(Declaration::Parser(parser)) => Ok(parser.params.clone()),
            Some(Declaration::Control(control)) => Ok(control.params.clone()),
            _ => Err(Error::UnknownDeclaration {
                name: block.decl.clone(),
            }),
        }
    }

    /// Gets the type of the user metadata global, when the spec names one
    /// and a block parameter binds to it.
    #[must_use]
    pub fn user_metadata_type(&self) -> Option<TypeRef> {
        let global = self.arch.user_metadata.as_ref()?;
        for block in &self.arch.blocks {
            let params = self.block_params(block).ok()?;
            for (param, source) in params.iter().zip(&block.param_sources) {
                if source == global {
                    return Some(param.ty.clone());
                }
            }
        }
        None
    }

    /// Gets the reference to the named standard metadata field.
    fn standard_metadata_field(&self, field: &str, ty: TypeRef) -> StateRef {
        StateRef::base(STANDARD_METADATA, ty.clone()).field(field, ty)
    }
}

/// Creates a call to the named interpreter-internal function.
///
/// Internal functions model architecture plumbing (copy-in/out, emit-buffer
/// assembly, recirculation checks); their names carry a leading `*` so they
/// can never collide with program-declared functions.
#[must_use]
pub fn internal_call(name: &str, args: Vec<ExprRef>) -> ExprRef {
    Expression::method_call(
        Rc::new(Type::Void),
        Expression::path(Rc::new(Type::Void), name),
        vec![],
        args,
    )
}

/// Gets the surface name of a parameter direction.
#[must_use]
pub fn direction_name(direction: Direction) -> &'static str {
    match direction {
        Direction::None => "none",
        Direction::In => "in",
        Direction::InOut => "inout",
        Direction::Out => "out",
    }
}
