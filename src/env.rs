//! This module contains state references and the symbolic environment that
//! maps them to symbolic values.
//!
//! The environment is flat: scoping is expressed by the continuation and the
//! path constraints, never by nesting environments.

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
};

use crate::{
    error::execution::{Error, Result},
    ir::{
        expr::{ExprRef, Expression},
        types::{Type, TypeRef},
    },
};

/// The field name under which a header's validity bit is stored.
///
/// The leading `*` keeps the name disjoint from any field a program could
/// declare.
pub const VALIDITY_FIELD: &str = "*valid";

/// A path from a root symbol through field accesses into the program's
/// variable space.
///
/// Two references are equal iff their serialized paths are equal; the type
/// is carried for convenience and does not participate in comparisons.
#[derive(Clone, Debug)]
pub struct StateRef {
    root: String,
    path: Vec<String>,
    ty: TypeRef,
}

impl StateRef {
    /// Creates a reference to the root symbol `root` of type `ty`.
    #[must_use]
    pub fn base(root: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            root: root.into(),
            path: Vec::new(),
            ty,
        }
    }

    /// Creates the reference to the field `name` of type `ty` under `self`.
    #[must_use]
    pub fn field(&self, name: impl Into<String>, ty: TypeRef) -> Self {
        let mut path = self.path.clone();
        path.push(name.into());
        Self {
            root: self.root.clone(),
            path,
            ty,
        }
    }

    /// Creates the reference to the validity bit of the header denoted by
    /// `self`.
    #[must_use]
    pub fn validity(&self) -> Self {
        self.field(VALIDITY_FIELD, Type::boolean())
    }

    /// Gets the type carried by the reference.
    #[must_use]
    pub fn ty(&self) -> TypeRef {
        self.ty.clone()
    }

    /// Converts an expression consisting of a path expression followed by
    /// member accesses into a state reference.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the expression contains any other kind of node.
    pub fn from_expr(expr: &ExprRef) -> Result<Self> {
        match expr.as_ref() {
            Expression::PathExpression { ty, name } => Ok(Self::base(name.clone(), ty.clone())),
            Expression::Member {
                ty,
                expr: inner,
                member,
            } => Ok(Self::from_expr(inner)?.field(member.clone(), ty.clone())),
            _ => Err(Error::NotAStateReference {
                expression: expr.to_string(),
            }),
        }
    }

    /// Rebuilds the member-access expression denoted by the reference.
    ///
    /// The intermediate accesses are typed with the final type as their
    /// shapes are not recorded; only the leaf type is meaningful.
    #[must_use]
    pub fn to_expr(&self) -> ExprRef {
        let mut expr = Expression::path(self.ty.clone(), self.root.clone());
        for segment in &self.path {
            expr = Expression::member(self.ty.clone(), expr, segment.clone());
        }
        expr
    }
}

impl PartialEq for StateRef {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root && self.path == other.path
    }
}

impl Eq for StateRef {}

impl PartialOrd for StateRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StateRef {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.root, &self.path).cmp(&(&other.root, &other.path))
    }
}

impl Hash for StateRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.root.hash(state);
        self.path.hash(state);
    }
}

/// Displays the serialized path of the reference.
impl Display for StateRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.root)?;
        for segment in &self.path {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

/// The symbolic environment: a mapping from state references to symbolic
/// values.
///
/// The map is ordered so that iteration, and with it the whole exploration,
/// is deterministic.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SymbolicEnv {
    bindings: BTreeMap<StateRef, ExprRef>,
}

impl SymbolicEnv {
    /// Creates an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the value bound to `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the reference has no binding.
    pub fn get(&self, reference: &StateRef) -> Result<ExprRef> {
        self.bindings
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::UnknownReference {
                reference: reference.to_string(),
            })
    }

    /// Binds `value` to `reference`, replacing any previous binding.
    pub fn set(&mut self, reference: StateRef, value: ExprRef) {
        self.bindings.insert(reference, value);
    }

    /// Checks whether `reference` has a binding.
    #[must_use]
    pub fn exists(&self, reference: &StateRef) -> bool {
        self.bindings.contains_key(reference)
    }

    /// Iterates over the bindings in reference order.
    pub fn iter(&self) -> impl Iterator<Item = (&StateRef, &ExprRef)> {
        self.bindings.iter()
    }
}

#[cfg(test)]
mod test {
    use crate::{
        env::{StateRef, SymbolicEnv},
        ir::{expr::Expression, types::Type},
    };

    #[test]
    fn references_compare_by_serialized_path() {
        let a = StateRef::base("hdr", Type::bits(8)).field("eth", Type::bits(8));
        let b = StateRef::base("hdr", Type::bits(16)).field("eth", Type::bits(48));
        // The types differ but the serialized paths agree.
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "hdr.eth");
    }

    #[test]
    fn converts_member_chains_to_references() -> anyhow::Result<()> {
        let ty = Type::bits(8);
        let path = Expression::path(ty.clone(), "hdr");
        let member = Expression::member(ty.clone(), path, "h");
        let leaf = Expression::member(ty, member, "f");

        let reference = StateRef::from_expr(&leaf)?;
        assert_eq!(reference.to_string(), "hdr.h.f");

        Ok(())
    }

    #[test]
    fn rejects_non_reference_expressions() {
        let constant = Expression::constant(Type::bits(8), 1);
        assert!(StateRef::from_expr(&constant).is_err());
    }

    #[test]
    fn get_fails_on_unknown_references() {
        let env = SymbolicEnv::new();
        let reference = StateRef::base("missing", Type::bits(8));
        assert!(env.get(&reference).is_err());
    }

    #[test]
    fn set_then_get_round_trips() -> anyhow::Result<()> {
        let mut env = SymbolicEnv::new();
        let reference = StateRef::base("meta", Type::bits(8)).field("port", Type::bits(9));
        let value = Expression::constant(Type::bits(9), 5);

        assert!(!env.exists(&reference));
        env.set(reference.clone(), value.clone());
        assert!(env.exists(&reference));
        assert_eq!(env.get(&reference)?, value);

        Ok(())
    }
}
