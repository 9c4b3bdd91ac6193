//! The expression portion of the IR model.
//!
//! Expressions are persistent tagged trees shared through [`Rc`]. The
//! evaluator never mutates a shared term; rebuilding a node always produces
//! a fresh allocation whose children may be shared with the original.
//!
//! A term is a _symbolic value_ when it contains no un-stepped
//! sub-expression: no method calls, no unresolved references into the
//! program's variable space, and no continuation parameter holes. Only
//! symbolic values may enter the symbolic environment or a path constraint.

use std::{
    fmt::{Display, Formatter},
    rc::Rc,
};

use num_bigint::{BigInt, BigUint};
use num_traits::{One, ToPrimitive, Zero};

use crate::ir::types::{Type, TypeRef};

/// A reference-counted expression term.
pub type ExprRef = Rc<Expression>;

/// The unary operators of the expression language.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum UnOp {
    /// Arithmetic negation over bit vectors.
    Neg,

    /// Bitwise complement.
    Cmpl,

    /// Logical negation over booleans.
    LNot,
}

/// The binary operators of the expression language.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Neq,
    Lt,
    Leq,
    Gt,
    Geq,
    /// Logical conjunction. Short-circuit forking applies while the left
    /// operand is still being stepped; a conjunction of symbolic values is
    /// itself a symbolic value.
    LAnd,
    /// Logical disjunction, mirroring [`BinOp::LAnd`].
    LOr,
}

impl BinOp {
    /// Checks whether the operator produces a boolean result.
    #[must_use]
    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Neq | Self::Lt | Self::Leq | Self::Gt | Self::Geq
        )
    }
}

/// An expression term of the IR.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Expression {
    /// A bit-vector constant of a fixed-width type.
    ///
    /// The value is stored unsigned; signed types interpret it in two's
    /// complement at the declared width.
    Constant { ty: TypeRef, value: BigUint },

    /// A boolean literal.
    BoolLiteral(bool),

    /// A string literal, used for diagnostics and extern arguments.
    StringLiteral(String),

    /// A reference to a root symbol in the program's variable space.
    PathExpression { ty: TypeRef, name: String },

    /// A field access on a struct-like expression.
    Member {
        ty: TypeRef,
        expr: ExprRef,
        member: String,
    },

    /// A call to a method or free-standing extern.
    MethodCall {
        ty: TypeRef,
        method: ExprRef,
        type_args: Vec<TypeRef>,
        args: Vec<ExprRef>,
    },

    /// A unary operation.
    Unary {
        ty: TypeRef,
        op: UnOp,
        expr: ExprRef,
    },

    /// A binary operation.
    Binary {
        ty: TypeRef,
        op: BinOp,
        left: ExprRef,
        right: ExprRef,
    },

    /// A ternary choice. Never a symbolic value; the evaluator always forks
    /// on the condition.
    Mux {
        ty: TypeRef,
        cond: ExprRef,
        then_expr: ExprRef,
        else_expr: ExprRef,
    },

    /// A width- or kind-changing conversion.
    Cast { ty: TypeRef, expr: ExprRef },

    /// A bit slice `expr[hi:lo]`, inclusive on both ends.
    Slice {
        ty: TypeRef,
        expr: ExprRef,
        hi: u32,
        lo: u32,
    },

    /// Concatenation of two bit vectors, left operand in the high bits.
    Concat {
        ty: TypeRef,
        left: ExprRef,
        right: ExprRef,
    },

    /// A structure-valued expression with named components.
    Struct {
        ty: TypeRef,
        components: Vec<(String, ExprRef)>,
    },

    /// The sentinel standing for an observably undefined value.
    ///
    /// Any operation over a tainted operand is itself tainted.
    Taint { ty: TypeRef },

    /// An externally named free variable standing for an unknowable input
    /// such as a control-plane argument.
    ///
    /// The name is stable and derived from the origin of the variable, so
    /// re-entering the same code site yields the same symbol.
    SymbolicVar { ty: TypeRef, name: String },

    /// A placeholder whose concrete value is computed from its inputs after
    /// solving, used for checksums and hashes.
    Concolic {
        ty: TypeRef,
        name: String,
        inputs: Vec<ExprRef>,
    },

    /// A hole in a continuation command awaiting the value of an unfinished
    /// sub-expression.
    Parameter { ty: TypeRef, id: u64 },
}

impl Expression {
    /// Creates a constant of type `ty` from a small unsigned value.
    ///
    /// The value is truncated to the width of `ty`.
    #[must_use]
    pub fn constant(ty: TypeRef, value: u64) -> ExprRef {
        Self::constant_big(ty, BigUint::from(value))
    }

    /// Creates a constant of type `ty` from an arbitrary-width value,
    /// truncating to the width of `ty`.
    #[must_use]
    pub fn constant_big(ty: TypeRef, value: BigUint) -> ExprRef {
        let value = value & mask(ty.width_bits());
        Rc::new(Self::Constant { ty, value })
    }

    /// Creates a boolean literal.
    #[must_use]
    pub fn bool_literal(value: bool) -> ExprRef {
        Rc::new(Self::BoolLiteral(value))
    }

    /// Creates a string literal.
    #[must_use]
    pub fn string_literal(value: impl Into<String>) -> ExprRef {
        Rc::new(Self::StringLiteral(value.into()))
    }

    /// Creates a reference to the root symbol `name` of type `ty`.
    #[must_use]
    pub fn path(ty: TypeRef, name: impl Into<String>) -> ExprRef {
        Rc::new(Self::PathExpression {
            ty,
            name: name.into(),
        })
    }

    /// Creates a field access of type `ty` on `expr`.
    #[must_use]
    pub fn member(ty: TypeRef, expr: ExprRef, member: impl Into<String>) -> ExprRef {
        Rc::new(Self::Member {
            ty,
            expr,
            member: member.into(),
        })
    }

    /// Creates a unary operation, folding constant operands.
    #[must_use]
    pub fn unary(op: UnOp, expr: ExprRef) -> ExprRef {
        let ty = match op {
            UnOp::LNot => Type::boolean(),
            _ => expr.ty(),
        };
        if expr.has_taint() {
            return Self::taint(ty);
        }
        if let Some(folded) = fold_unary(op, &expr) {
            return folded;
        }
        Rc::new(Self::Unary { ty, op, expr })
    }

    /// Creates a binary operation, folding constant operands.
    ///
    /// Relational and logical operators produce booleans; the remaining
    /// operators take their type from the left operand.
    #[must_use]
    pub fn binary(op: BinOp, left: ExprRef, right: ExprRef) -> ExprRef {
        let ty = if op.is_relational() || matches!(op, BinOp::LAnd | BinOp::LOr) {
            Type::boolean()
        } else {
            left.ty()
        };
        if left.has_taint() || right.has_taint() {
            return Self::taint(ty);
        }
        if let Some(folded) = fold_binary(op, &left, &right) {
            return folded;
        }
        Rc::new(Self::Binary {
            ty,
            op,
            left,
            right,
        })
    }

    /// Creates the logical conjunction of `left` and `right`, folding
    /// literal operands.
    #[must_use]
    pub fn and(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinOp::LAnd, left, right)
    }

    /// Creates the logical negation of `expr`, folding literal operands.
    #[must_use]
    pub fn not(expr: ExprRef) -> ExprRef {
        Self::unary(UnOp::LNot, expr)
    }

    /// Creates the equality of `left` and `right`, folding constants.
    #[must_use]
    pub fn equals(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinOp::Eq, left, right)
    }

    /// Creates a ternary choice of type `ty`, folding a literal condition.
    #[must_use]
    pub fn mux(ty: TypeRef, cond: ExprRef, then_expr: ExprRef, else_expr: ExprRef) -> ExprRef {
        match cond.as_bool() {
            Some(true) => then_expr,
            Some(false) => else_expr,
            None => Rc::new(Self::Mux {
                ty,
                cond,
                then_expr,
                else_expr,
            }),
        }
    }

    /// Creates a cast of `expr` to `ty`, folding constant operands.
    ///
    /// Widening a signed bit type sign-extends; all other width changes
    /// zero-extend or truncate.
    #[must_use]
    pub fn cast(ty: TypeRef, expr: ExprRef) -> ExprRef {
        if *expr.ty() == *ty {
            return expr;
        }
        if expr.has_taint() {
            return Self::taint(ty);
        }
        if let Some(folded) = fold_cast(&ty, &expr) {
            return folded;
        }
        Rc::new(Self::Cast { ty, expr })
    }

    /// Creates the slice `expr[hi:lo]`, folding constant operands.
    ///
    /// # Panics
    ///
    /// Panics if `hi < lo`. This is a programmer bug.
    #[must_use]
    pub fn slice(expr: ExprRef, hi: u32, lo: u32) -> ExprRef {
        assert!(hi >= lo, "Invalid slice bounds [{hi}:{lo}]");
        if lo == 0 && hi + 1 == expr.ty().width_bits() && !expr.ty().is_signed() {
            return expr;
        }
        let ty = Type::bits(hi - lo + 1);
        if expr.has_taint() {
            return Self::taint(ty);
        }
        if let Expression::Constant { value, .. } = expr.as_ref() {
            let sliced = (value >> lo) & mask(hi - lo + 1);
            return Self::constant_big(ty, sliced);
        }
        Rc::new(Self::Slice { ty, expr, hi, lo })
    }

    /// Creates the concatenation of `left` and `right`, with `left` in the
    /// high bits. Constant operands are folded.
    #[must_use]
    pub fn concat(left: ExprRef, right: ExprRef) -> ExprRef {
        let ty = Type::bits(left.ty().width_bits() + right.ty().width_bits());
        if let (Expression::Constant { value: l, .. }, Expression::Constant { value: r, .. }) =
            (left.as_ref(), right.as_ref())
        {
            let rw = right.ty().width_bits();
            return Self::constant_big(ty, (l << rw) | r);
        }
        Rc::new(Self::Concat { ty, left, right })
    }

    /// Creates a structure-valued expression.
    #[must_use]
    pub fn structure(ty: TypeRef, components: Vec<(String, ExprRef)>) -> ExprRef {
        Rc::new(Self::Struct { ty, components })
    }

    /// Creates the taint sentinel of type `ty`.
    #[must_use]
    pub fn taint(ty: TypeRef) -> ExprRef {
        Rc::new(Self::Taint { ty })
    }

    /// Creates the named free variable `name` of type `ty`.
    #[must_use]
    pub fn symbolic_var(ty: TypeRef, name: impl Into<String>) -> ExprRef {
        Rc::new(Self::SymbolicVar {
            ty,
            name: name.into(),
        })
    }

    /// Creates a concolic placeholder named `name` whose concrete value is
    /// computed from `inputs` once a model is known.
    #[must_use]
    pub fn concolic(ty: TypeRef, name: impl Into<String>, inputs: Vec<ExprRef>) -> ExprRef {
        Rc::new(Self::Concolic {
            ty,
            name: name.into(),
            inputs,
        })
    }

    /// Creates the continuation parameter hole `id` of type `ty`.
    #[must_use]
    pub fn parameter(ty: TypeRef, id: u64) -> ExprRef {
        Rc::new(Self::Parameter { ty, id })
    }

    /// Creates a method-call expression.
    #[must_use]
    pub fn method_call(
        ty: TypeRef,
        method: ExprRef,
        type_args: Vec<TypeRef>,
        args: Vec<ExprRef>,
    ) -> ExprRef {
        Rc::new(Self::MethodCall {
            ty,
            method,
            type_args,
            args,
        })
    }

    /// Gets the type of the expression.
    #[must_use]
    pub fn ty(&self) -> TypeRef {
        match self {
            Self::Constant { ty, .. }
            | Self::PathExpression { ty, .. }
            | Self::Member { ty, .. }
            | Self::MethodCall { ty, .. }
            | Self::Unary { ty, .. }
            | Self::Binary { ty, .. }
            | Self::Mux { ty, .. }
            | Self::Cast { ty, .. }
            | Self::Slice { ty, .. }
            | Self::Concat { ty, .. }
            | Self::Struct { ty, .. }
            | Self::Taint { ty }
            | Self::SymbolicVar { ty, .. }
            | Self::Concolic { ty, .. }
            | Self::Parameter { ty, .. } => ty.clone(),
            Self::BoolLiteral(_) => Type::boolean(),
            Self::StringLiteral(_) => Rc::new(Type::String),
        }
    }

    /// Checks whether the expression is a symbolic value, i.e. contains no
    /// un-stepped sub-expression.
    #[must_use]
    pub fn is_symbolic_value(&self) -> bool {
        match self {
            Self::Constant { .. }
            | Self::BoolLiteral(_)
            | Self::StringLiteral(_)
            | Self::Taint { .. }
            | Self::SymbolicVar { .. }
            | Self::Concolic { .. } => true,
            Self::Unary { expr, .. } | Self::Cast { expr, .. } | Self::Slice { expr, .. } => {
                expr.is_symbolic_value()
            }
            Self::Binary { left, right, .. } | Self::Concat { left, right, .. } => {
                left.is_symbolic_value() && right.is_symbolic_value()
            }
            Self::Struct { components, .. } => {
                components.iter().all(|(_, c)| c.is_symbolic_value())
            }
            Self::PathExpression { .. }
            | Self::Member { .. }
            | Self::MethodCall { .. }
            | Self::Mux { .. }
            | Self::Parameter { .. } => false,
        }
    }

    /// Checks whether the expression contains the taint sentinel anywhere in
    /// its tree.
    #[must_use]
    pub fn has_taint(&self) -> bool {
        match self {
            Self::Taint { .. } => true,
            Self::Constant { .. }
            | Self::BoolLiteral(_)
            | Self::StringLiteral(_)
            | Self::PathExpression { .. }
            | Self::SymbolicVar { .. }
            | Self::Parameter { .. } => false,
            Self::Member { expr, .. }
            | Self::Unary { expr, .. }
            | Self::Cast { expr, .. }
            | Self::Slice { expr, .. } => expr.has_taint(),
            Self::Binary { left, right, .. } | Self::Concat { left, right, .. } => {
                left.has_taint() || right.has_taint()
            }
            Self::Mux {
                cond,
                then_expr,
                else_expr,
                ..
            } => cond.has_taint() || then_expr.has_taint() || else_expr.has_taint(),
            Self::MethodCall { method, args, .. } => {
                method.has_taint() || args.iter().any(|a| a.has_taint())
            }
            Self::Struct { components, .. } => components.iter().any(|(_, c)| c.has_taint()),
            Self::Concolic { inputs, .. } => inputs.iter().any(|i| i.has_taint()),
        }
    }

    /// Gets the constant value of the expression if it is a bit-vector
    /// constant.
    #[must_use]
    pub fn as_constant(&self) -> Option<&BigUint> {
        match self {
            Self::Constant { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Gets the constant value of the expression as a `u64`, if it is a
    /// bit-vector constant that fits.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        self.as_constant().and_then(BigUint::to_u64)
    }

    /// Gets the boolean value of the expression if it is a literal.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::BoolLiteral(value) => Some(*value),
            _ => None,
        }
    }

    /// Rebuilds the expression with every hole matching `id` replaced by
    /// `value`.
    ///
    /// Sub-trees that do not contain the hole are shared with the original.
    #[must_use]
    pub fn substitute(self: &Rc<Self>, id: u64, value: &ExprRef) -> ExprRef {
        match self.as_ref() {
            Self::Parameter { id: found, .. } if *found == id => value.clone(),
            Self::Member { ty, expr, member } => Rc::new(Self::Member {
                ty: ty.clone(),
                expr: expr.substitute(id, value),
                member: member.clone(),
            }),
            Self::MethodCall {
                ty,
                method,
                type_args,
                args,
            } => Rc::new(Self::MethodCall {
                ty: ty.clone(),
                method: method.clone(),
                type_args: type_args.clone(),
                args: args.iter().map(|a| a.substitute(id, value)).collect(),
            }),
            Self::Unary { op, expr, .. } => {
                Expression::unary(*op, expr.substitute(id, value))
            }
            Self::Binary {
                op, left, right, ..
            } => Expression::binary(*op, left.substitute(id, value), right.substitute(id, value)),
            Self::Mux {
                ty,
                cond,
                then_expr,
                else_expr,
            } => Expression::mux(
                ty.clone(),
                cond.substitute(id, value),
                then_expr.substitute(id, value),
                else_expr.substitute(id, value),
            ),
            Self::Cast { ty, expr } => Expression::cast(ty.clone(), expr.substitute(id, value)),
            Self::Slice { expr, hi, lo, .. } => {
                Expression::slice(expr.substitute(id, value), *hi, *lo)
            }
            Self::Concat { left, right, .. } => {
                Expression::concat(left.substitute(id, value), right.substitute(id, value))
            }
            Self::Struct { ty, components } => Rc::new(Self::Struct {
                ty: ty.clone(),
                components: components
                    .iter()
                    .map(|(n, c)| (n.clone(), c.substitute(id, value)))
                    .collect(),
            }),
            _ => self.clone(),
        }
    }
}

/// Computes the bit mask covering `width` bits.
#[must_use]
pub fn mask(width: u32) -> BigUint {
    (BigUint::one() << width) - BigUint::one()
}

/// Computes the maximum unsigned value representable by `ty`.
#[must_use]
pub fn max_value_for(ty: &TypeRef) -> BigUint {
    mask(ty.width_bits())
}

/// Interprets the `value` of a constant of type `ty` as a signed integer.
fn to_signed(ty: &TypeRef, value: &BigUint) -> BigInt {
    let width = ty.width_bits();
    if ty.is_signed() && width > 0 && value.bit(u64::from(width) - 1) {
        BigInt::from(value.clone()) - (BigInt::one() << width)
    } else {
        BigInt::from(value.clone())
    }
}

/// Folds a unary operation over a constant operand, returning [`None`] when
/// the operand is not constant.
fn fold_unary(op: UnOp, expr: &ExprRef) -> Option<ExprRef> {
    match (op, expr.as_ref()) {
        (UnOp::LNot, Expression::BoolLiteral(b)) => Some(Expression::bool_literal(!b)),
        (UnOp::Neg, Expression::Constant { ty, value }) => {
            let width = ty.width_bits();
            let modulus = BigUint::one() << width;
            let negated = (&modulus - value) % &modulus;
            Some(Expression::constant_big(ty.clone(), negated))
        }
        (UnOp::Cmpl, Expression::Constant { ty, value }) => {
            let complemented = mask(ty.width_bits()) ^ value;
            Some(Expression::constant_big(ty.clone(), complemented))
        }
        _ => None,
    }
}

/// Folds a binary operation over constant operands, returning [`None`] when
/// either operand is not constant.
#[allow(clippy::too_many_lines)] // One arm per operator.
fn fold_binary(op: BinOp, left: &ExprRef, right: &ExprRef) -> Option<ExprRef> {
    // Logical operators fold over boolean literals.
    match op {
        BinOp::LAnd => {
            return match (left.as_bool(), right.as_bool()) {
                (Some(l), Some(r)) => Some(Expression::bool_literal(l && r)),
                (Some(false), _) => Some(Expression::bool_literal(false)),
                (Some(true), _) => Some(right.clone()),
                (_, Some(true)) => Some(left.clone()),
                _ => None,
            };
        }
        BinOp::LOr => {
            return match (left.as_bool(), right.as_bool()) {
                (Some(l), Some(r)) => Some(Expression::bool_literal(l || r)),
                (Some(true), _) => Some(Expression::bool_literal(true)),
                (Some(false), _) => Some(right.clone()),
                (_, Some(false)) => Some(left.clone()),
                _ => None,
            };
        }
        BinOp::Eq => {
            if let (Some(l), Some(r)) = (left.as_bool(), right.as_bool()) {
                return Some(Expression::bool_literal(l == r));
            }
        }
        BinOp::Neq => {
            if let (Some(l), Some(r)) = (left.as_bool(), right.as_bool()) {
                return Some(Expression::bool_literal(l != r));
            }
        }
        _ => {}
    }

    let (Expression::Constant { ty, value: l }, Expression::Constant { value: r, .. }) =
        (left.as_ref(), right.as_ref())
    else {
        return None;
    };
    let width = ty.width_bits();
    let modulus = BigUint::one() << width;

    let arith = |value: BigUint| Some(Expression::constant_big(ty.clone(), value));
    let logical = |value: bool| Some(Expression::bool_literal(value));

    match op {
        BinOp::Add => arith((l + r) % &modulus),
        BinOp::Sub => arith((l + &modulus - r) % &modulus),
        BinOp::Mul => arith((l * r) % &modulus),
        BinOp::Div => {
            if r.is_zero() {
                None
            } else {
                arith(l / r)
            }
        }
        BinOp::Mod => {
            if r.is_zero() {
                None
            } else {
                arith(l % r)
            }
        }
        BinOp::BitAnd => arith(l & r),
        BinOp::BitOr => arith(l | r),
        BinOp::BitXor => arith(l ^ r),
        BinOp::Shl => {
            let shift = r.to_u32()?;
            arith((l << shift.min(width)) % &modulus)
        }
        BinOp::Shr => {
            let shift = r.to_u32()?;
            if ty.is_signed() {
                let signed = to_signed(ty, l) >> shift.min(width);
                let wrapped = ((signed % BigInt::from(modulus.clone()))
                    + BigInt::from(modulus.clone()))
                    % BigInt::from(modulus);
                arith(wrapped.to_biguint().expect("value is non-negative"))
            } else {
                arith(l >> shift.min(width))
            }
        }
        BinOp::Eq => logical(l == r),
        BinOp::Neq => logical(l != r),
        BinOp::Lt => logical(to_signed(ty, l) < to_signed(ty, r)),
        BinOp::Leq => logical(to_signed(ty, l) <= to_signed(ty, r)),
        BinOp::Gt => logical(to_signed(ty, l) > to_signed(ty, r)),
        BinOp::Geq => logical(to_signed(ty, l) >= to_signed(ty, r)),
        BinOp::LAnd | BinOp::LOr => None,
    }
}

/// Folds a cast over a constant operand, returning [`None`] when the operand
/// is not constant or the conversion is not between foldable kinds.
fn fold_cast(ty: &TypeRef, expr: &ExprRef) -> Option<ExprRef> {
    match (ty.as_ref(), expr.as_ref()) {
        (Type::Bits { .. }, Expression::BoolLiteral(b)) => {
            Some(Expression::constant(ty.clone(), u64::from(*b)))
        }
        (Type::Bool, Expression::Constant { value, .. }) => {
            Some(Expression::bool_literal(!value.is_zero()))
        }
        (Type::Bits { width, .. }, Expression::Constant { ty: from, value }) => {
            let from_width = from.width_bits();
            let extended = if from.is_signed() && *width > from_width {
                // Sign extension reinterprets the value at the wider width.
                let signed = to_signed(from, value);
                let modulus = BigInt::one() << *width;
                let wrapped = ((signed % &modulus) + &modulus) % &modulus;
                wrapped.to_biguint().expect("value is non-negative")
            } else {
                value.clone()
            };
            Some(Expression::constant_big(ty.clone(), extended))
        }
        _ => None,
    }
}

/// Pretty-prints the expression in a compact textual form for traces and
/// diagnostics.
impl Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constant { value, .. } => {
                let bytes = value.to_bytes_be();
                let str = hex::encode(&bytes);
                let str = str.trim_start_matches('0');
                let str = if str.is_empty() { "0" } else { str };
                write!(f, "0x{str}")
            }
            Self::BoolLiteral(b) => write!(f, "{b}"),
            Self::StringLiteral(s) => write!(f, "{s:?}"),
            Self::PathExpression { name, .. } => write!(f, "{name}"),
            Self::Member { expr, member, .. } => write!(f, "{expr}.{member}"),
            Self::MethodCall { method, args, .. } => {
                write!(f, "{method}(")?;
                for (idx, arg) in args.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Self::Unary { op, expr, .. } => {
                let sym = match op {
                    UnOp::Neg => "-",
                    UnOp::Cmpl => "~",
                    UnOp::LNot => "!",
                };
                write!(f, "{sym}({expr})")
            }
            Self::Binary {
                op, left, right, ..
            } => {
                let sym = match op {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::Div => "/",
                    BinOp::Mod => "%",
                    BinOp::BitAnd => "&",
                    BinOp::BitOr => "|",
                    BinOp::BitXor => "^",
                    BinOp::Shl => "<<",
                    BinOp::Shr => ">>",
                    BinOp::Eq => "==",
                    BinOp::Neq => "!=",
                    BinOp::Lt => "<",
                    BinOp::Leq => "<=",
                    BinOp::Gt => ">",
                    BinOp::Geq => ">=",
                    BinOp::LAnd => "&&",
                    BinOp::LOr => "||",
                };
                write!(f, "({left} {sym} {right})")
            }
            Self::Mux {
                cond,
                then_expr,
                else_expr,
                ..
            } => write!(f, "({cond} ? {then_expr} : {else_expr})"),
            Self::Cast { ty, expr } => write!(f, "(({ty}) {expr})"),
            Self::Slice { expr, hi, lo, .. } => write!(f, "{expr}[{hi}:{lo}]"),
            Self::Concat { left, right, .. } => write!(f, "({left} ++ {right})"),
            Self::Struct { components, .. } => {
                write!(f, "{{")?;
                for (idx, (name, value)) in components.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Taint { .. } => write!(f, "*taint"),
            Self::SymbolicVar { name, .. } => write!(f, "{name}"),
            Self::Concolic { name, .. } => write!(f, "{name}"),
            Self::Parameter { id, .. } => write!(f, "*param_{id}"),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::ir::{
        expr::{BinOp, Expression, UnOp},
        types::Type,
    };

    #[test]
    fn folds_wrapping_arithmetic() {
        let ty = Type::bits(8);
        let a = Expression::constant(ty.clone(), 200);
        let b = Expression::constant(ty.clone(), 100);
        let sum = Expression::binary(BinOp::Add, a, b);
        assert_eq!(sum.as_u64(), Some(44));
    }

    #[test]
    fn folds_signed_comparison() {
        let ty = Type::signed_bits(8);
        // 0xff is -1 as int<8>.
        let minus_one = Expression::constant(ty.clone(), 0xff);
        let one = Expression::constant(ty, 1);
        let cmp = Expression::binary(BinOp::Lt, minus_one, one);
        assert_eq!(cmp.as_bool(), Some(true));
    }

    #[test]
    fn folds_short_circuit_literals() {
        let t = Expression::bool_literal(true);
        let var = Expression::symbolic_var(Type::boolean(), "c");
        let folded = Expression::binary(BinOp::LAnd, t, var.clone());
        assert_eq!(folded, var);

        let f = Expression::bool_literal(false);
        let gone = Expression::binary(BinOp::LAnd, f, var);
        assert_eq!(gone.as_bool(), Some(false));
    }

    #[test]
    fn sign_extends_on_widening_cast() {
        let narrow = Type::signed_bits(8);
        let wide = Type::signed_bits(16);
        let minus_two = Expression::constant(narrow, 0xfe);
        let widened = Expression::cast(wide, minus_two);
        assert_eq!(widened.as_u64(), Some(0xfffe));
    }

    #[test]
    fn slices_and_concats_constants() {
        let ty = Type::bits(16);
        let value = Expression::constant(ty, 0xabcd);
        let high = Expression::slice(value.clone(), 15, 8);
        let low = Expression::slice(value, 7, 0);
        assert_eq!(high.as_u64(), Some(0xab));
        assert_eq!(low.as_u64(), Some(0xcd));

        let rejoined = Expression::concat(high, low);
        assert_eq!(rejoined.as_u64(), Some(0xabcd));
        assert_eq!(rejoined.ty().width_bits(), 16);
    }

    #[test]
    fn taint_is_closed_under_operators() {
        let ty = Type::bits(8);
        let taint = Expression::taint(ty.clone());
        let value = Expression::constant(ty.clone(), 1);

        let sum = Expression::binary(BinOp::Add, taint.clone(), value.clone());
        assert!(sum.has_taint());

        let cmp = Expression::binary(BinOp::Eq, value, taint.clone());
        assert!(cmp.has_taint());

        let negated = Expression::unary(UnOp::Cmpl, taint);
        assert!(negated.has_taint());
    }

    #[test]
    fn substitution_fills_parameter_holes() {
        let ty = Type::bits(8);
        let hole = Expression::parameter(ty.clone(), 7);
        let shape = Expression::binary(
            BinOp::Add,
            hole,
            Expression::constant(ty.clone(), 1),
        );
        let filled = shape.substitute(7, &Expression::constant(ty, 41));
        assert_eq!(filled.as_u64(), Some(42));
    }

    #[test]
    fn symbolic_values_are_closed_under_rebuilding() {
        let ty = Type::bits(8);
        let var = Expression::symbolic_var(ty.clone(), "k");
        let formula = Expression::binary(BinOp::Add, var, Expression::constant(ty.clone(), 1));
        assert!(formula.is_symbolic_value());

        let unresolved = Expression::path(ty.clone(), "local");
        let open = Expression::binary(BinOp::Add, unresolved, Expression::constant(ty, 1));
        assert!(!open.is_symbolic_value());
    }
}
