//! This module contains the execution state: the symbolic environment plus
//! the packet and emit buffers, the path-constraint accumulator, the trace
//! log, the test-object store, the scoped property map, and the continuation
//! stack of pending commands.
//!
//! States are created at initialization and cloned per branch; cloning never
//! aliases a mutable sub-structure, so forked states evolve independently.

pub mod continuation;
pub mod properties;
pub mod test_object;
pub mod trace;

use crate::{
    constant::MAX_PACKET_LENGTH_BITS,
    env::{StateRef, SymbolicEnv},
    error::execution::{Error, Result},
    ir::{
        expr::{ExprRef, Expression},
        types::{Type, TypeRef},
    },
    state::{
        continuation::{Command, ContinuationStack, Exception},
        properties::{Properties, PropertyValue},
        test_object::{TestObjectRef, TestObjectStore},
        trace::TraceEvent,
    },
};

/// The name of the free variable standing for the input packet's contents.
pub const INPUT_PACKET_NAME: &str = "*packet";

/// The name of the free variable standing for the input packet's length in
/// bits.
pub const INPUT_PACKET_SIZE_NAME: &str = "*packet_size";

/// The name of the free variable standing for the ingress port.
pub const INPUT_PORT_NAME: &str = "*input_port";

/// The property marking regions whose assignments are forced to taint.
pub const PROP_IN_UNDEFINED_STATE: &str = "inUndefinedState";

/// The property holding the reference the currently executing parser uses
/// for its error variable.
///
/// Parser errors are written through the parser's own metadata parameter so
/// that the block's copy-out propagates them; this property is set when a
/// parser block is entered.
pub const PROP_PARSER_ERROR_LABEL: &str = "*parser_error_label";

/// The state of one symbolic execution path.
#[derive(Clone, Debug)]
pub struct ExecutionState {
    /// The symbolic environment mapping state references to values.
    env: SymbolicEnv,

    /// The stack of pending commands driving this state.
    continuation: ContinuationStack,

    /// The portion of the input (or prepended/appended data) currently
    /// visible to the parser or deparser.
    packet_buffer: Option<ExprRef>,

    /// The data assembled by deparser emit calls.
    emit_buffer: Option<ExprRef>,

    /// The wire content drawn so far, in extraction order.
    input_packet: Option<ExprRef>,

    /// The number of bits already consumed from the input packet.
    input_packet_cursor: u32,

    /// The boolean expressions whose conjunction is this state's
    /// reachability condition, in accumulation order.
    path_constraints: Vec<ExprRef>,

    /// The ordered log of events used to explain produced tests.
    trace: Vec<TraceEvent>,

    /// Scoped per-path flags and counters.
    properties: Properties,

    /// The control-plane objects a test must install.
    test_objects: TestObjectStore,

    /// The source of fresh continuation parameter identifiers.
    next_parameter_id: u64,
}

impl ExecutionState {
    /// Creates a state whose continuation holds the provided `body`.
    #[must_use]
    pub fn new(body: Vec<Command>) -> Self {
        Self {
            env: SymbolicEnv::new(),
            continuation: ContinuationStack::new(body),
            packet_buffer: None,
            emit_buffer: None,
            input_packet: None,
            input_packet_cursor: 0,
            path_constraints: Vec::new(),
            trace: Vec::new(),
            properties: Properties::new(),
            test_objects: TestObjectStore::new(),
            next_parameter_id: 0,
        }
    }

    /// Gets the free variable standing for the input packet's contents.
    #[must_use]
    pub fn input_packet_var() -> ExprRef {
        Expression::symbolic_var(Type::bits(MAX_PACKET_LENGTH_BITS), INPUT_PACKET_NAME)
    }

    /// Gets the free variable standing for the input packet's length in
    /// bits.
    #[must_use]
    pub fn input_packet_size_var() -> ExprRef {
        Expression::symbolic_var(Self::packet_size_type(), INPUT_PACKET_SIZE_NAME)
    }

    /// Gets the free variable standing for the ingress port.
    #[must_use]
    pub fn input_port_var() -> ExprRef {
        Expression::symbolic_var(
            Type::bits(crate::constant::PORT_NUMBER_WIDTH_BITS),
            INPUT_PORT_NAME,
        )
    }

    /// Gets the type of packet-size quantities.
    #[must_use]
    pub fn packet_size_type() -> TypeRef {
        Type::bits(32)
    }

    /// Checks whether the state is terminal: its continuation is empty, or
    /// the only pending command is a fully reduced value.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self.continuation.peek() {
            None => true,
            Some(Command::Return(value)) => {
                self.continuation.command_count() == 1 && value.is_symbolic_value()
            }
            Some(_) => false,
        }
    }

    // =========================================================================
    // Symbolic environment
    // =========================================================================

    /// Gets the value bound to `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the reference has no binding.
    pub fn get(&self, reference: &StateRef) -> Result<ExprRef> {
        self.env.get(reference)
    }

    /// Binds `value` to `reference`.
    ///
    /// Inside a region marked by [`PROP_IN_UNDEFINED_STATE`] the binding
    /// degrades to the taint sentinel of the reference's type.
    pub fn set(&mut self, reference: StateRef, value: ExprRef) {
        if self.properties.get_bool_or_false(PROP_IN_UNDEFINED_STATE) {
            let taint = Expression::taint(reference.ty());
            self.env.set(reference, taint);
        } else {
            self.env.set(reference, value);
        }
    }

    /// Checks whether `reference` has a binding.
    #[must_use]
    pub fn exists(&self, reference: &StateRef) -> bool {
        self.env.exists(reference)
    }

    /// Gets the symbolic environment for inspection.
    #[must_use]
    pub fn env(&self) -> &SymbolicEnv {
        &self.env
    }

    /// Fully evaluates `expr` against the environment, resolving references
    /// and folding constants.
    ///
    /// This is used where a value is needed eagerly, such as resolving table
    /// keys, and hence does not support forking constructs.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the expression contains an unresolvable reference,
    /// a method call, or a ternary choice.
    pub fn evaluate(&self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.as_ref() {
            Expression::Constant { .. }
            | Expression::BoolLiteral(_)
            | Expression::StringLiteral(_)
            | Expression::Taint { .. }
            | Expression::SymbolicVar { .. }
            | Expression::Concolic { .. } => Ok(expr.clone()),
            Expression::PathExpression { .. } | Expression::Member { .. } => {
                let reference = StateRef::from_expr(expr)?;
                self.get(&reference)
            }
            Expression::Unary { op, expr, .. } => {
                Ok(Expression::unary(*op, self.evaluate(expr)?))
            }
            Expression::Binary {
                op, left, right, ..
            } => Ok(Expression::binary(
                *op,
                self.evaluate(left)?,
                self.evaluate(right)?,
            )),
            Expression::Cast { ty, expr } => {
                Ok(Expression::cast(ty.clone(), self.evaluate(expr)?))
            }
            Expression::Slice { expr, hi, lo, .. } => {
                Ok(Expression::slice(self.evaluate(expr)?, *hi, *lo))
            }
            Expression::Concat { left, right, .. } => Ok(Expression::concat(
                self.evaluate(left)?,
                self.evaluate(right)?,
            )),
            Expression::Struct { ty, components } => {
                let components = components
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), self.evaluate(value)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expression::structure(ty.clone(), components))
            }
            Expression::Mux { .. } | Expression::MethodCall { .. } => Err(Error::unimplemented(
                format!("Cannot eagerly evaluate {expr}"),
            )),
            Expression::Parameter { .. } => Err(Error::bug(format!(
                "Unfilled continuation parameter in {expr}"
            ))),
        }
    }

    // =========================================================================
    // Packet and emit buffers
    // =========================================================================

    /// Gets the width of the packet buffer in bits.
    #[must_use]
    pub fn packet_buffer_size(&self) -> u32 {
        self.packet_buffer
            .as_ref()
            .map_or(0, |buffer| buffer.ty().width_bits())
    }

    /// Gets the number of bits already consumed from the input packet.
    #[must_use]
    pub fn input_packet_cursor(&self) -> u32 {
        self.input_packet_cursor
    }

    /// Gets the wire content drawn so far, or [`None`] before the first
    /// extraction.
    #[must_use]
    pub fn input_packet(&self) -> Option<ExprRef> {
        self.input_packet.clone()
    }

    /// Removes the first `width` bits from the packet buffer, drawing any
    /// missing bits from the input packet and advancing the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if satisfying the request would read past the maximum
    /// packet length.
    pub fn slice_packet_buffer(&mut self, width: u32) -> Result<ExprRef> {
        if width == 0 {
            return Err(Error::bug("Tried to slice zero bits from the packet"));
        }
        let buffered = self.packet_buffer_size();
        if buffered >= width {
            let buffer = self
                .packet_buffer
                .take()
                .expect("a non-zero width implies a buffer");
            let head = Expression::slice(buffer.clone(), buffered - 1, buffered - width);
            if buffered > width {
                self.packet_buffer =
                    Some(Expression::slice(buffer, buffered - width - 1, 0));
            }
            return Ok(head);
        }

        let missing = width - buffered;
        let wire = self.draw_from_wire(missing)?;
        let head = match self.packet_buffer.take() {
            Some(buffer) => Expression::concat(buffer, wire),
            None => wire,
        };
        Ok(head)
    }

    /// Gets the first `width` bits of the packet buffer without consuming
    /// them.
    ///
    /// Bits not yet buffered are drawn from the input packet into the buffer
    /// so that a later extraction observes the same content.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if satisfying the request would read past the maximum
    /// packet length.
    pub fn peek_packet_buffer(&mut self, width: u32) -> Result<ExprRef> {
        if width == 0 {
            return Err(Error::bug("Tried to peek zero bits from the packet"));
        }
        let buffered = self.packet_buffer_size();
        if buffered < width {
            let wire = self.draw_from_wire(width - buffered)?;
            self.append_to_packet_buffer(wire);
        }
        let buffer = self
            .packet_buffer
            .as_ref()
            .expect("bits were just ensured");
        let total = buffer.ty().width_bits();
        Ok(Expression::slice(buffer.clone(), total - 1, total - width))
    }

    /// Prepends `data` to the packet buffer.
    pub fn prepend_to_packet_buffer(&mut self, data: ExprRef) {
        self.packet_buffer = Some(match self.packet_buffer.take() {
            Some(buffer) => Expression::concat(data, buffer),
            None => data,
        });
    }

    /// Appends `data` to the packet buffer.
    pub fn append_to_packet_buffer(&mut self, data: ExprRef) {
        self.packet_buffer = Some(match self.packet_buffer.take() {
            Some(buffer) => Expression::concat(buffer, data),
            None => data,
        });
    }

    /// Clears the packet buffer.
    pub fn reset_packet_buffer(&mut self) {
        self.packet_buffer = None;
    }

    /// Gets the packet buffer, or [`None`] when it is empty.
    #[must_use]
    pub fn packet_buffer(&self) -> Option<ExprRef> {
        self.packet_buffer.clone()
    }

    /// Appends `data` to the emit buffer.
    pub fn append_to_emit_buffer(&mut self, data: ExprRef) {
        self.emit_buffer = Some(match self.emit_buffer.take() {
            Some(buffer) => Expression::concat(buffer, data),
            None => data,
        });
    }

    /// Gets the emit buffer, or [`None`] when nothing has been emitted.
    #[must_use]
    pub fn emit_buffer(&self) -> Option<ExprRef> {
        self.emit_buffer.clone()
    }

    /// Slices `width` bits from the input packet at the cursor, advancing
    /// the cursor and recording the content in extraction order.
    fn draw_from_wire(&mut self, width: u32) -> Result<ExprRef> {
        if self.input_packet_cursor + width > MAX_PACKET_LENGTH_BITS {
            return Err(Error::Unimplemented {
                message: format!(
                    "Reading {width} bits at cursor {} exceeds the maximum packet length",
                    self.input_packet_cursor
                ),
            });
        }
        let hi = MAX_PACKET_LENGTH_BITS - 1 - self.input_packet_cursor;
        let lo = MAX_PACKET_LENGTH_BITS - self.input_packet_cursor - width;
        let slice = Expression::slice(Self::input_packet_var(), hi, lo);
        self.input_packet_cursor += width;
        self.input_packet = Some(match self.input_packet.take() {
            Some(packet) => Expression::concat(packet, slice.clone()),
            None => slice.clone(),
        });
        Ok(slice)
    }

    // =========================================================================
    // Path constraints, trace, properties, and test objects
    // =========================================================================

    /// Appends `constraint` to the path constraint.
    pub fn add_path_constraint(&mut self, constraint: ExprRef) {
        self.path_constraints.push(constraint);
    }

    /// Gets the path constraint: the boolean expressions whose conjunction
    /// is this state's reachability condition.
    #[must_use]
    pub fn path_constraint(&self) -> &[ExprRef] {
        &self.path_constraints
    }

    /// Appends `event` to the trace log.
    pub fn add_trace(&mut self, event: TraceEvent) {
        self.trace.push(event);
    }

    /// Gets the trace log.
    #[must_use]
    pub fn trace(&self) -> &[TraceEvent] {
        &self.trace
    }

    /// Sets the property `key` to `value`.
    pub fn set_property(&mut self, key: impl Into<String>, value: PropertyValue) {
        self.properties.set(key, value);
    }

    /// Checks whether the property `key` is present.
    #[must_use]
    pub fn has_property(&self, key: &str) -> bool {
        self.properties.has(key)
    }

    /// Gets the scoped property map.
    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Gets the object stored under `category` and `name`.
    #[must_use]
    pub fn test_object(&self, category: &str, name: &str) -> Option<TestObjectRef> {
        self.test_objects.get(category, name)
    }

    /// Stores `object` under `category` and `name`, replacing any previous
    /// object wholesale.
    pub fn add_test_object(
        &mut self,
        category: impl Into<String>,
        name: impl Into<String>,
        object: TestObjectRef,
    ) {
        self.test_objects.set(category, name, object);
    }

    /// Gets the test-object store for inspection.
    #[must_use]
    pub fn test_objects(&self) -> &TestObjectStore {
        &self.test_objects
    }

    // =========================================================================
    // Continuation
    // =========================================================================

    /// Gets the next command to execute without removing it.
    #[must_use]
    pub fn peek_command(&self) -> Option<&Command> {
        self.continuation.peek()
    }

    /// Removes and returns the next command to execute.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the continuation is empty.
    pub fn pop_body(&mut self) -> Result<Command> {
        self.continuation.pop().ok_or(Error::EmptyContinuation)
    }

    /// Replaces the top command with the provided `commands`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the continuation is empty.
    pub fn replace_top_body(&mut self, commands: Vec<Command>) -> Result<()> {
        self.pop_body()?;
        self.continuation.push_all(commands);
        Ok(())
    }

    /// Pushes `commands` in front of the pending commands.
    pub fn push_commands(&mut self, commands: Vec<Command>) {
        self.continuation.push_all(commands);
    }

    /// Pushes a guarded frame with the provided `body` and `handlers`.
    pub fn push_frame(&mut self, body: Vec<Command>, handlers: Vec<(Exception, Vec<Command>)>) {
        self.continuation.push_frame(body, handlers);
    }

    /// Unwinds the continuation on `exception`. Returns `false` when no
    /// frame handles it, leaving the state terminal.
    pub fn unwind(&mut self, exception: Exception) -> bool {
        self.continuation.unwind(exception)
    }

    /// Produces a fresh continuation parameter identifier.
    pub fn fresh_parameter_id(&mut self) -> u64 {
        let id = self.next_parameter_id;
        self.next_parameter_id += 1;
        id
    }
}

/// Computes the flattened leaf field references of `base`, which has the
/// struct-like type `ty`, in declaration order, together with the validity
/// bit references of every header encountered.
#[must_use]
pub fn flat_fields(base: &StateRef, ty: &TypeRef) -> (Vec<StateRef>, Vec<StateRef>) {
    let mut fields = Vec::new();
    let mut validities = Vec::new();
    collect_flat_fields(base, ty, &mut fields, &mut validities);
    (fields, validities)
}

fn collect_flat_fields(
    base: &StateRef,
    ty: &TypeRef,
    fields: &mut Vec<StateRef>,
    validities: &mut Vec<StateRef>,
) {
    match ty.as_ref() {
        Type::Struct(shape) => {
            for field in &shape.fields {
                let reference = base.field(field.name.clone(), field.ty.clone());
                collect_flat_fields(&reference, &field.ty, fields, validities);
            }
        }
        Type::Header(shape) => {
            validities.push(base.validity());
            for field in &shape.fields {
                let reference = base.field(field.name.clone(), field.ty.clone());
                collect_flat_fields(&reference, &field.ty, fields, validities);
            }
        }
        _ => fields.push(base.clone()),
    }
}

#[cfg(test)]
mod test {
    use crate::{
        env::StateRef,
        ir::{
            expr::Expression,
            types::{StructField, Type},
        },
        state::{flat_fields, properties::PropertyValue, ExecutionState, PROP_IN_UNDEFINED_STATE},
    };

    #[test]
    fn slicing_advances_the_cursor_monotonically() -> anyhow::Result<()> {
        let mut state = ExecutionState::new(vec![]);
        assert_eq!(state.input_packet_cursor(), 0);

        let first = state.slice_packet_buffer(8)?;
        assert_eq!(first.ty().width_bits(), 8);
        assert_eq!(state.input_packet_cursor(), 8);

        let second = state.slice_packet_buffer(16)?;
        assert_eq!(second.ty().width_bits(), 16);
        assert_eq!(state.input_packet_cursor(), 24);

        Ok(())
    }

    #[test]
    fn buffered_data_is_consumed_before_the_wire() -> anyhow::Result<()> {
        let mut state = ExecutionState::new(vec![]);
        state.append_to_packet_buffer(Expression::constant(Type::bits(8), 0xab));

        let head = state.slice_packet_buffer(4)?;
        // The head comes from the buffer, so the cursor has not moved.
        assert_eq!(head.as_u64(), Some(0xa));
        assert_eq!(state.input_packet_cursor(), 0);
        assert_eq!(state.packet_buffer_size(), 4);

        // Taking more than remains buffered draws the difference from the
        // wire.
        let tail = state.slice_packet_buffer(12)?;
        assert_eq!(tail.ty().width_bits(), 12);
        assert_eq!(state.input_packet_cursor(), 8);
        assert_eq!(state.packet_buffer_size(), 0);

        Ok(())
    }

    #[test]
    fn peeking_does_not_consume() -> anyhow::Result<()> {
        let mut state = ExecutionState::new(vec![]);
        let peeked = state.peek_packet_buffer(8)?;
        assert_eq!(peeked.ty().width_bits(), 8);
        // The bits moved from the wire into the buffer but remain readable.
        assert_eq!(state.packet_buffer_size(), 8);

        let extracted = state.slice_packet_buffer(8)?;
        // The extraction observes exactly the peeked content.
        assert_eq!(peeked, extracted);

        Ok(())
    }

    #[test]
    fn undefined_regions_force_taint() -> anyhow::Result<()> {
        let mut state = ExecutionState::new(vec![]);
        let reference = StateRef::base("meta", Type::bits(8));

        state.set_property(PROP_IN_UNDEFINED_STATE, PropertyValue::Bool(true));
        state.set(reference.clone(), Expression::constant(Type::bits(8), 3));
        assert!(state.get(&reference)?.has_taint());

        state.set_property(PROP_IN_UNDEFINED_STATE, PropertyValue::Bool(false));
        state.set(reference.clone(), Expression::constant(Type::bits(8), 3));
        assert_eq!(state.get(&reference)?.as_u64(), Some(3));

        Ok(())
    }

    #[test]
    fn flattens_nested_structs_in_declaration_order() {
        let eth = Type::header(
            "ethernet_t",
            vec![
                StructField::new("dst", Type::bits(48)),
                StructField::new("src", Type::bits(48)),
                StructField::new("ether_type", Type::bits(16)),
            ],
        );
        let headers = Type::structure("headers_t", vec![StructField::new("eth", eth.clone())]);
        let base = StateRef::base("hdr", headers.clone());

        let (fields, validities) = flat_fields(&base, &headers);
        let names: Vec<String> = fields.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["hdr.eth.dst", "hdr.eth.src", "hdr.eth.ether_type"]);

        let validity_names: Vec<String> = validities.iter().map(ToString::to_string).collect();
        assert_eq!(validity_names, vec!["hdr.eth.*valid"]);
    }
}
