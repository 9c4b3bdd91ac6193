//! The declaration portion of the IR model.
//!
//! Declarations are stored in a by-name side index rather than linked with
//! back-pointers, which keeps the term trees acyclic: a path expression that
//! names a table or action is resolved through [`Program::declaration`] at
//! the point of use.

use std::collections::BTreeMap;

use crate::ir::{expr::ExprRef, stmt::StmtRef, types::TypeRef};

/// The direction of a block or action parameter.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Direction {
    /// No direction; treated as read-only input.
    None,

    /// Read-only input.
    In,

    /// Read-write input and output.
    InOut,

    /// Write-only output; the callee sees an uninitialized value.
    Out,
}

/// A formal parameter of a pipeline block or action.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Param {
    /// The parameter's name.
    pub name: String,

    /// The parameter's direction.
    pub direction: Direction,

    /// The parameter's type.
    pub ty: TypeRef,
}

impl Param {
    /// Creates a parameter named `name` with the provided `direction` and
    /// type.
    #[must_use]
    pub fn new(name: impl Into<String>, direction: Direction, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            direction,
            ty,
        }
    }
}

/// An action declaration.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ActionDecl {
    /// The action's control-plane visible name.
    pub name: String,

    /// The action's formal parameters, bound to control-plane arguments when
    /// the action is invoked from a table.
    pub params: Vec<Param>,

    /// The statements making up the action body.
    pub body: Vec<StmtRef>,
}

/// The match kinds a table key can declare.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MatchKind {
    Exact,
    Ternary,
    Lpm,
    Range,
    Optional,
    Selector,
}

/// A single key of a table.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TableKey {
    /// The control-plane name of the key.
    pub name: String,

    /// The expression evaluated against installed entries.
    pub expr: ExprRef,

    /// How installed entries match against the evaluated key.
    pub match_kind: MatchKind,
}

/// An invocation of an action with concrete or synthesized arguments.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ActionCall {
    /// The name of the invoked action.
    pub action: String,

    /// The arguments bound to the action's parameters.
    pub args: Vec<ExprRef>,
}

/// A constant entry of an immutable table.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TableEntry {
    /// The literal match keys of the entry, one per table key.
    pub keys: Vec<ExprRef>,

    /// The action invoked when the entry matches.
    pub call: ActionCall,
}

/// The `implementation` property of a table.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum TableImplementation {
    /// An action profile instance, referenced by name.
    ActionProfile(String),

    /// An action selector instance, referenced by name.
    ActionSelector(String),
}

/// A table declaration.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TableDecl {
    /// The table's control-plane visible name.
    pub name: String,

    /// The table's keys in declaration order.
    pub keys: Vec<TableKey>,

    /// The names of the actions in the table's action list.
    pub actions: Vec<String>,

    /// The default action invoked when no entry matches.
    pub default_action: ActionCall,

    /// The constant entries of an immutable table, [`None`] when the control
    /// plane may install entries at runtime.
    pub entries: Option<Vec<TableEntry>>,

    /// The table's `implementation` property, if any.
    pub implementation: Option<TableImplementation>,
}

/// A single state of a parser.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ParserState {
    /// The state's name, unique within the parser.
    pub name: String,

    /// The statements executed upon entering the state.
    pub statements: Vec<StmtRef>,

    /// The transition taken after the statements complete.
    pub transition: Transition,
}

/// One case of a select transition.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SelectCase {
    /// The value the selector is compared against, or [`None`] for the
    /// default case.
    pub keyset: Option<ExprRef>,

    /// The name of the state transitioned to when the case matches.
    pub next: String,
}

/// The transition out of a parser state.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Transition {
    /// Unconditionally continue at the named state.
    Direct(String),

    /// Finish parsing successfully.
    Accept,

    /// Finish parsing with a rejection.
    Reject,

    /// Compare a selector expression against the cases in order, taking the
    /// first match.
    Select {
        selector: ExprRef,
        cases: Vec<SelectCase>,
    },
}

/// A parser declaration.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ParserDecl {
    /// The parser's name.
    pub name: String,

    /// The parser's apply parameters.
    pub params: Vec<Param>,

    /// The parser's states, indexed by name. Execution begins at `start`.
    pub states: BTreeMap<String, ParserState>,
}

/// A control declaration.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ControlDecl {
    /// The control's name.
    pub name: String,

    /// The control's apply parameters.
    pub params: Vec<Param>,

    /// The statements of the control's apply block.
    pub body: Vec<StmtRef>,
}

/// An instantiation of an extern object such as a register or an action
/// profile.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ExternInstanceDecl {
    /// The instance's control-plane visible name.
    pub name: String,

    /// The name of the extern type being instantiated.
    pub extern_type: String,

    /// The declared element count for array-like externs.
    pub size: Option<u64>,
}

/// A top-level declaration of the program.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Declaration {
    Action(ActionDecl),
    Table(TableDecl),
    Parser(ParserDecl),
    Control(ControlDecl),
    ExternInstance(ExternInstanceDecl),
}

impl Declaration {
    /// Gets the name under which the declaration is indexed.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Action(d) => &d.name,
            Self::Table(d) => &d.name,
            Self::Parser(d) => &d.name,
            Self::Control(d) => &d.name,
            Self::ExternInstance(d) => &d.name,
        }
    }
}

/// A normalized program: a collection of named top-level declarations.
///
/// The program is immutable once constructed; the evaluator shares it freely
/// between execution states.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Program {
    declarations: BTreeMap<String, Declaration>,
}

impl Program {
    /// Creates an empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `declaration` to the program, replacing any declaration of the
    /// same name.
    pub fn declare(&mut self, declaration: Declaration) {
        self.declarations
            .insert(declaration.name().to_string(), declaration);
    }

    /// Looks up the declaration stored under `name`.
    #[must_use]
    pub fn declaration(&self, name: &str) -> Option<&Declaration> {
        self.declarations.get(name)
    }

    /// Looks up the action declared under `name`.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&ActionDecl> {
        match self.declarations.get(name) {
            Some(Declaration::Action(decl)) => Some(decl),
            _ => None,
        }
    }

    /// Looks up the table declared under `name`.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableDecl> {
        match self.declarations.get(name) {
            Some(Declaration::Table(decl)) => Some(decl),
            _ => None,
        }
    }

    /// Looks up the parser declared under `name`.
    #[must_use]
    pub fn parser(&self, name: &str) -> Option<&ParserDecl> {
        match self.declarations.get(name) {
            Some(Declaration::Parser(decl)) => Some(decl),
            _ => None,
        }
    }

    /// Looks up the control declared under `name`.
    #[must_use]
    pub fn control(&self, name: &str) -> Option<&ControlDecl> {
        match self.declarations.get(name) {
            Some(Declaration::Control(decl)) => Some(decl),
            _ => None,
        }
    }

    /// Looks up the extern instance declared under `name`.
    #[must_use]
    pub fn extern_instance(&self, name: &str) -> Option<&ExternInstanceDecl> {
        match self.declarations.get(name) {
            Some(Declaration::ExternInstance(decl)) => Some(decl),
            _ => None,
        }
    }
}
