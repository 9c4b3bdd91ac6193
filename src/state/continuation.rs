//! This module contains the continuation stack that drives an execution
//! state: frames of yet-to-execute commands plus the synthetic markers the
//! evaluator uses to thread values and exceptional control flow.

use std::collections::BTreeMap;

use crate::{
    ir::{decl::Transition, expr::ExprRef, stmt::StmtRef},
    state::properties::PropertyValue,
};

/// The exceptional control-flow events of the program language.
///
/// These are modeled as continuation commands rather than host-level errors;
/// they unwind the continuation to a catch frame declared by the surrounding
/// block.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Exception {
    /// The parser transitioned to its reject state.
    Reject,

    /// An extract or advance ran past the end of the packet.
    PacketTooShort,

    /// The packet was marked to be dropped and processing abandoned.
    Drop,

    /// An assertion failed under strict handling.
    Abort,

    /// The enclosing pipeline block was exited.
    Exit,
}

/// The places a produced value can be plugged back into.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlugTarget {
    /// An expression containing the hole.
    Expression(ExprRef),

    /// A statement containing the hole.
    Statement(StmtRef),

    /// A select transition whose selector contains the hole.
    Transition { parser: String, transition: Transition },
}

/// A single command of the continuation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// Execute a statement.
    Statement(StmtRef),

    /// Enter the named state of the named parser.
    ParserState { parser: String, state: String },

    /// Take a parser transition.
    Transition { parser: String, transition: Transition },

    /// An expression being reduced, or the value it reduced to.
    Return(ExprRef),

    /// Consume the value produced by the preceding [`Command::Return`] by
    /// substituting it for the parameter hole `param` in the target.
    Plug { param: u64, target: PlugTarget },

    /// Push a new frame with the provided body and exception handlers.
    Guarded {
        body: Vec<Command>,
        handlers: Vec<(Exception, Vec<Command>)>,
    },

    /// Raise an exception, unwinding to the nearest handling frame.
    Exception(Exception),

    /// Restore a scoped state property to the provided value.
    SetProperty { key: String, value: PropertyValue },
}

/// A frame of the continuation stack: a body of pending commands and the
/// exception handlers the frame declares.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    body: Vec<Command>,
    handlers: BTreeMap<Exception, Vec<Command>>,
}

impl Frame {
    /// Creates a frame with the provided `body` and no handlers.
    #[must_use]
    pub fn new(body: Vec<Command>) -> Self {
        Self {
            body,
            handlers: BTreeMap::new(),
        }
    }

    /// Creates a frame with the provided `body` and `handlers`.
    #[must_use]
    pub fn with_handlers(body: Vec<Command>, handlers: Vec<(Exception, Vec<Command>)>) -> Self {
        Self {
            body,
            handlers: handlers.into_iter().collect(),
        }
    }
}

/// The continuation stack of an execution state.
///
/// The stack is never empty during stepping except at a terminal state;
/// empty frames are discarded eagerly so that [`ContinuationStack::peek`]
/// always observes the next command to execute.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ContinuationStack {
    frames: Vec<Frame>,
}

impl ContinuationStack {
    /// Creates a stack holding a single frame with the provided `body`.
    #[must_use]
    pub fn new(body: Vec<Command>) -> Self {
        let mut stack = Self { frames: Vec::new() };
        stack.frames.push(Frame::new(body));
        stack.normalize();
        stack
    }

    /// Pushes a frame with the provided `body` and `handlers`.
    pub fn push_frame(&mut self, body: Vec<Command>, handlers: Vec<(Exception, Vec<Command>)>) {
        self.frames.push(Frame::with_handlers(body, handlers));
        self.normalize();
    }

    /// Gets the next command to execute without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&Command> {
        self.frames.last().and_then(|frame| frame.body.first())
    }

    /// Removes and returns the next command to execute.
    pub fn pop(&mut self) -> Option<Command> {
        let command = match self.frames.last_mut() {
            Some(frame) if !frame.body.is_empty() => Some(frame.body.remove(0)),
            _ => None,
        };
        self.normalize();
        command
    }

    /// Pushes `command` in front of the pending commands of the top frame.
    ///
    /// A fresh frame is created when the stack is empty.
    pub fn push(&mut self, command: Command) {
        self.push_all(vec![command]);
    }

    /// Pushes `commands` in front of the pending commands of the top frame,
    /// preserving their order.
    pub fn push_all(&mut self, commands: Vec<Command>) {
        if self.frames.is_empty() {
            self.frames.push(Frame::new(Vec::new()));
        }
        let frame = self.frames.last_mut().expect("a frame was just ensured");
        frame.body.splice(0..0, commands);
        self.normalize();
    }

    /// Unwinds the stack on `exception`: frames are discarded until one
    /// declares a handler, whose body then replaces that frame's pending
    /// commands.
    ///
    /// Returns `false` when no frame handles the exception, in which case
    /// the stack is left empty.
    pub fn unwind(&mut self, exception: Exception) -> bool {
        while let Some(frame) = self.frames.last_mut() {
            if let Some(handler) = frame.handlers.get(&exception) {
                frame.body = handler.clone();
                self.normalize();
                return true;
            }
            self.frames.pop();
        }
        false
    }

    /// Checks whether no commands remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Counts the pending commands across all frames.
    #[must_use]
    pub fn command_count(&self) -> usize {
        self.frames.iter().map(|frame| frame.body.len()).sum()
    }

    /// Discards empty frames from the top of the stack.
    fn normalize(&mut self) {
        while matches!(self.frames.last(), Some(frame) if frame.body.is_empty()) {
            self.frames.pop();
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        ir::{expr::Expression, stmt::Statement, types::Type},
        state::continuation::{Command, ContinuationStack, Exception},
    };

    fn exit_command() -> Command {
        Command::Statement(Statement::exit())
    }

    #[test]
    fn pops_in_push_order() {
        let mut stack = ContinuationStack::new(vec![
            Command::Statement(Statement::exit()),
            Command::Exception(Exception::Drop),
        ]);

        assert!(matches!(stack.pop(), Some(Command::Statement(_))));
        assert!(matches!(stack.pop(), Some(Command::Exception(Exception::Drop))));
        assert!(stack.is_empty());
    }

    #[test]
    fn discards_empty_frames() {
        let mut stack = ContinuationStack::new(vec![exit_command()]);
        stack.push_frame(vec![], vec![]);
        // The empty frame is gone, so the original command is still next.
        assert!(matches!(stack.peek(), Some(Command::Statement(_))));
    }

    #[test]
    fn unwinds_to_the_nearest_handler() {
        let mut stack = ContinuationStack::new(vec![exit_command()]);
        let handler = vec![Command::Return(Expression::bool_literal(true))];
        stack.push_frame(vec![exit_command()], vec![(Exception::Reject, handler)]);
        stack.push_frame(vec![exit_command(), exit_command()], vec![]);

        assert!(stack.unwind(Exception::Reject));
        // The handler body replaced the guarded frame's commands.
        assert!(matches!(stack.peek(), Some(Command::Return(_))));
        // The outermost frame is still intact below the handler.
        assert_eq!(stack.command_count(), 2);
    }

    #[test]
    fn unwind_without_handler_empties_the_stack() {
        let mut stack = ContinuationStack::new(vec![exit_command()]);
        assert!(!stack.unwind(Exception::Abort));
        assert!(stack.is_empty());
    }

    #[test]
    fn pushed_commands_run_before_pending_ones() {
        let mut stack = ContinuationStack::new(vec![exit_command()]);
        let marker = Command::Return(Expression::constant(Type::bits(8), 1));
        stack.push(marker.clone());
        assert_eq!(stack.pop(), Some(marker));
        assert!(matches!(stack.pop(), Some(Command::Statement(_))));
    }
}
