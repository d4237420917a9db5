//! Query expression trees.
//!
//! A closed set of node kinds describing the shape of a query: constants,
//! parameters, lambdas, member and method access, operators and a handful of
//! control and construction nodes. Trees are produced by the query layer (or
//! decoded from JSON by the admin server) and consumed by [`canonical`].

pub mod canonical;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

pub use canonical::{Canonical, canonicalize};

/// Broad category of a type referenced in a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    /// Scalars and strings.
    Primitive,
    /// Reference types; the only kind that becomes a dependency tag.
    Class,
    Interface,
    Struct,
    Enum,
}

/// A (possibly generic) type reference, e.g. `IQueryable<Product>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeRef {
    pub name: String,
    pub kind: TypeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<TypeRef>,
}

impl TypeRef {
    pub fn new(kind: TypeKind, name: impl Into<String>) -> Self {
        Self { name: name.into(), kind, args: Vec::new() }
    }

    pub fn primitive(name: impl Into<String>) -> Self {
        Self::new(TypeKind::Primitive, name)
    }

    pub fn class(name: impl Into<String>) -> Self {
        Self::new(TypeKind::Class, name)
    }

    pub fn interface(name: impl Into<String>) -> Self {
        Self::new(TypeKind::Interface, name)
    }

    /// Attach generic arguments.
    pub fn of(mut self, args: impl IntoIterator<Item = TypeRef>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    pub fn is_class_shaped(&self) -> bool {
        self.kind == TypeKind::Class
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.args.is_empty() {
            f.write_str("<")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{arg}")?;
            }
            f.write_str(">")?;
        }
        Ok(())
    }
}

/// A constant value embedded in a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A non-primitive constant (query roots, captured objects, enum values).
    Object { ty: TypeRef, repr: String },
}

/// A lambda or free parameter.
///
/// References resolve on `id` when it is set and on `name` otherwise. Every
/// [`Param::anonymous`] gets a fresh id, so two anonymous parameters of one
/// lambda stay distinct; JSON trees number their anonymous parameters the
/// same way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub ty: TypeRef,
}

static NEXT_ANONYMOUS: AtomicU64 = AtomicU64::new(1);

/// What a parameter reference is matched against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Binding {
    Id(u64),
    Name(String),
}

impl Param {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self { name: Some(name.into()), id: None, ty }
    }

    pub fn anonymous(ty: TypeRef) -> Self {
        Self::with_id(NEXT_ANONYMOUS.fetch_add(1, Ordering::Relaxed), ty)
    }

    /// Anonymous parameter with a caller-chosen id.
    pub fn with_id(id: u64, ty: TypeRef) -> Self {
        Self { name: None, id: Some(id), ty }
    }

    /// Declared name, if it has a non-empty one.
    pub(crate) fn display_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.is_empty())
    }

    pub(crate) fn binding(&self) -> Binding {
        match self.id {
            Some(id) => Binding::Id(id),
            None => Binding::Name(self.display_name().unwrap_or_default().to_string()),
        }
    }
}

/// Receiver of a member access or method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Instance(Box<Expr>),
    /// Static access through the declaring type.
    Static(TypeRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Coalesce,
    OrElse,
    AndAlso,
    Or,
    ExclusiveOr,
    And,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LeftShift,
    RightShift,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Negate,
    Not,
    OnesComplement,
    ArrayLength,
    /// Wraps a lambda passed as an expression argument; renders transparently.
    Quote,
}

/// One node of a query expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Expr {
    Constant {
        value: Literal,
    },
    Parameter {
        #[serde(flatten)]
        param: Param,
    },
    Lambda {
        params: Vec<Param>,
        body: Box<Expr>,
    },
    Member {
        target: Target,
        member: String,
        ty: TypeRef,
    },
    Call {
        target: Target,
        method: String,
        #[serde(default)]
        type_args: Vec<TypeRef>,
        #[serde(default)]
        args: Vec<Expr>,
        ty: TypeRef,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    New {
        ty: TypeRef,
        #[serde(default)]
        args: Vec<Expr>,
    },
    Convert {
        ty: TypeRef,
        operand: Box<Expr>,
    },
    TypeIs {
        operand: Box<Expr>,
        ty: TypeRef,
    },
    TypeAs {
        operand: Box<Expr>,
        ty: TypeRef,
    },
    NewArray {
        element: TypeRef,
        #[serde(default)]
        items: Vec<Expr>,
    },
    Index {
        target: Box<Expr>,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn constant(value: Literal) -> Self {
        Expr::Constant { value }
    }

    pub fn int(value: i64) -> Self {
        Expr::constant(Literal::Int(value))
    }

    pub fn bool(value: bool) -> Self {
        Expr::constant(Literal::Bool(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::constant(Literal::Str(value.into()))
    }

    /// Root of a query over `entity`, rendered as `<Query<Entity>>("Entity")`.
    pub fn query_root(entity: TypeRef) -> Self {
        let repr = entity.to_string();
        Expr::constant(Literal::Object { ty: TypeRef::class("Query").of([entity]), repr })
    }

    pub fn param(param: &Param) -> Self {
        Expr::Parameter { param: param.clone() }
    }

    pub fn lambda(params: impl IntoIterator<Item = Param>, body: Expr) -> Self {
        Expr::Lambda { params: params.into_iter().collect(), body: Box::new(body) }
    }

    pub fn member(target: Expr, member: impl Into<String>, ty: TypeRef) -> Self {
        Expr::Member { target: Target::Instance(Box::new(target)), member: member.into(), ty }
    }

    pub fn static_member(owner: TypeRef, member: impl Into<String>, ty: TypeRef) -> Self {
        Expr::Member { target: Target::Static(owner), member: member.into(), ty }
    }

    pub fn call(
        target: Expr, method: impl Into<String>, type_args: Vec<TypeRef>, args: Vec<Expr>, ty: TypeRef,
    ) -> Self {
        Expr::Call { target: Target::Instance(Box::new(target)), method: method.into(), type_args, args, ty }
    }

    pub fn static_call(
        owner: TypeRef, method: impl Into<String>, type_args: Vec<TypeRef>, args: Vec<Expr>, ty: TypeRef,
    ) -> Self {
        Expr::Call { target: Target::Static(owner), method: method.into(), type_args, args, ty }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary { op, operand: Box::new(operand) }
    }

    pub fn conditional(test: Expr, if_true: Expr, if_false: Expr) -> Self {
        Expr::Conditional { test: Box::new(test), if_true: Box::new(if_true), if_false: Box::new(if_false) }
    }

    pub fn convert(ty: TypeRef, operand: Expr) -> Self {
        Expr::Convert { ty, operand: Box::new(operand) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_display() {
        let ty = TypeRef::interface("IDictionary").of([TypeRef::primitive("string"), TypeRef::class("Product")]);
        assert_eq!(ty.to_string(), "IDictionary<string, Product>");
        assert_eq!(TypeRef::class("Product").to_string(), "Product");
    }

    #[test]
    fn test_tree_json_shape() {
        let x = Param::new("x", TypeRef::class("Product"));
        let tree = Expr::lambda(
            [x.clone()],
            Expr::binary(
                BinaryOp::GreaterThan,
                Expr::member(Expr::param(&x), "Id", TypeRef::primitive("int")),
                Expr::int(0),
            ),
        );

        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["node"], "lambda");
        assert_eq!(json["body"]["op"], "greater_than");
        assert_eq!(json["body"]["left"]["target"]["instance"]["name"], "x");

        let back: Expr = serde_json::from_value(json).unwrap();
        assert_eq!(back, tree);
    }
}
