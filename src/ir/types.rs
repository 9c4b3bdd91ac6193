//! The type portion of the IR model.
//!
//! Widths and signedness of bit types are first-class so that the evaluator
//! can compute extraction sizes and fold casts without consulting any
//! external type map.

use std::{
    fmt::{Display, Formatter},
    rc::Rc,
};

/// A reference-counted type term.
///
/// Types are shared structurally; sharing is observable only through pointer
/// identity, never through semantics.
pub type TypeRef = Rc<Type>;

/// The types that program values can take during symbolic execution.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Type {
    /// A fixed-width bit vector, signed or unsigned.
    Bits { width: u32, signed: bool },

    /// A variable-width bit vector with a declared maximum width.
    ///
    /// The actual extracted width is only known per-path, once the
    /// extraction size expression has been constrained.
    Varbit { max_width: u32 },

    /// The boolean type, distinct from `bit<1>`.
    Bool,

    /// The string type, used only for diagnostics and extern arguments.
    String,

    /// The type of calls evaluated purely for their effects.
    Void,

    /// A structure composed of named fields.
    Struct(StructType),

    /// A header: a structure with an associated validity bit.
    Header(StructType),
}

/// The shared shape of structs and headers.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct StructType {
    /// The declared name of the structure type.
    pub name: String,

    /// The fields of the structure in declaration order.
    pub fields: Vec<StructField>,
}

/// A single field of a struct-like type.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct StructField {
    /// The field's name.
    pub name: String,

    /// The field's type.
    pub ty: TypeRef,

    /// The indices of the preservation field lists this field belongs to.
    ///
    /// Resubmit, recirculate, and clone operations can request that fields
    /// tagged with a given index survive the associated metadata reset.
    pub field_lists: Vec<u64>,
}

impl StructField {
    /// Creates a field named `name` of type `ty` that belongs to no
    /// preservation field list.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            field_lists: Vec::new(),
        }
    }

    /// Creates a field named `name` of type `ty` tagged with the
    /// preservation `field_lists`.
    #[must_use]
    pub fn preserved(name: impl Into<String>, ty: TypeRef, field_lists: Vec<u64>) -> Self {
        Self {
            name: name.into(),
            ty,
            field_lists,
        }
    }
}

impl Type {
    /// Creates an unsigned bit type of the provided `width`.
    #[must_use]
    pub fn bits(width: u32) -> TypeRef {
        Rc::new(Self::Bits {
            width,
            signed: false,
        })
    }

    /// Creates a signed bit type of the provided `width`.
    #[must_use]
    pub fn signed_bits(width: u32) -> TypeRef {
        Rc::new(Self::Bits {
            width,
            signed: true,
        })
    }

    /// Creates the boolean type.
    #[must_use]
    pub fn boolean() -> TypeRef {
        Rc::new(Self::Bool)
    }

    /// Creates a variable-width bit type bounded by `max_width`.
    #[must_use]
    pub fn varbit(max_width: u32) -> TypeRef {
        Rc::new(Self::Varbit { max_width })
    }

    /// Creates a struct type named `name` with the provided `fields`.
    #[must_use]
    pub fn structure(name: impl Into<String>, fields: Vec<StructField>) -> TypeRef {
        Rc::new(Self::Struct(StructType {
            name: name.into(),
            fields,
        }))
    }

    /// Creates a header type named `name` with the provided `fields`.
    #[must_use]
    pub fn header(name: impl Into<String>, fields: Vec<StructField>) -> TypeRef {
        Rc::new(Self::Header(StructType {
            name: name.into(),
            fields,
        }))
    }

    /// Computes the width of the type in bits.
    ///
    /// Variable-width bit types contribute their declared zero-width form;
    /// the extracted width is accounted for separately by the evaluator.
    /// Struct-like types sum the widths of their fields.
    #[must_use]
    pub fn width_bits(&self) -> u32 {
        match self {
            Self::Bits { width, .. } => *width,
            Self::Varbit { .. } => 0,
            Self::Bool => 1,
            Self::String | Self::Void => 0,
            Self::Struct(s) | Self::Header(s) => {
                s.fields.iter().map(|f| f.ty.width_bits()).sum()
            }
        }
    }

    /// Checks whether the type is a signed bit type.
    #[must_use]
    pub fn is_signed(&self) -> bool {
        matches!(self, Self::Bits { signed: true, .. })
    }

    /// Checks whether the type is a struct or a header.
    #[must_use]
    pub fn is_struct_like(&self) -> bool {
        matches!(self, Self::Struct(_) | Self::Header(_))
    }

    /// Checks whether the type is a header.
    #[must_use]
    pub fn is_header(&self) -> bool {
        matches!(self, Self::Header(_))
    }

    /// Gets the struct shape of the type, if it has one.
    #[must_use]
    pub fn as_struct_like(&self) -> Option<&StructType> {
        match self {
            Self::Struct(s) | Self::Header(s) => Some(s),
            _ => None,
        }
    }
}

/// Pretty-prints the type using the surface syntax of the language.
impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bits {
                width,
                signed: false,
            } => write!(f, "bit<{width}>"),
            Self::Bits {
                width,
                signed: true,
            } => write!(f, "int<{width}>"),
            Self::Varbit { max_width } => write!(f, "varbit<{max_width}>"),
            Self::Bool => write!(f, "bool"),
            Self::String => write!(f, "string"),
            Self::Void => write!(f, "void"),
            Self::Struct(s) => write!(f, "struct {}", s.name),
            Self::Header(s) => write!(f, "header {}", s.name),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::ir::types::{StructField, Type};

    #[test]
    fn computes_widths_for_base_types() {
        assert_eq!(Type::bits(8).width_bits(), 8);
        assert_eq!(Type::signed_bits(16).width_bits(), 16);
        assert_eq!(Type::boolean().width_bits(), 1);
        assert_eq!(Type::varbit(32).width_bits(), 0);
    }

    #[test]
    fn computes_widths_for_nested_structures() {
        let inner = Type::header(
            "h_t",
            vec![
                StructField::new("src", Type::bits(48)),
                StructField::new("dst", Type::bits(48)),
            ],
        );
        let outer = Type::structure(
            "headers_t",
            vec![
                StructField::new("eth", inner),
                StructField::new("tag", Type::bits(16)),
            ],
        );
        assert_eq!(outer.width_bits(), 112);
    }

    #[test]
    fn displays_in_surface_syntax() {
        assert_eq!(Type::bits(9).to_string(), "bit<9>");
        assert_eq!(Type::signed_bits(8).to_string(), "int<8>");
        assert_eq!(Type::boolean().to_string(), "bool");
    }
}
