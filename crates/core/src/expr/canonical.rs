//! Deterministic rendering of expression trees.
//!
//! The rendering is a single line whose tokens are fully determined by each
//! node's operator and operands. Lambda parameters are renamed to `$var1`,
//! `$var2`, ... in first-encounter order so that local variable names never
//! leak into a cache key. Named free parameters render as `@name`, and names
//! or object representations that could be mistaken for syntax are quoted.
//! Every class-shaped type met along the way is collected; that set is the
//! candidate dependency set of the query.

use std::collections::{BTreeSet, HashMap};

use super::{BinaryOp, Binding, Expr, Literal, Param, Target, TypeRef, UnaryOp};

/// Output of [`canonicalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonical {
    pub rendering: String,
    pub types: BTreeSet<String>,
}

/// Render `expr` and collect the class-shaped types it references.
pub fn canonicalize(expr: &Expr) -> Canonical {
    let mut canonicalizer = Canonicalizer::default();
    canonicalizer.visit(expr);
    Canonical { rendering: canonicalizer.out, types: canonicalizer.types }
}

const CONDITIONAL: u8 = 0;
const RELATIONAL: u8 = 8;
const UNARY: u8 = 13;
const PRIMARY: u8 = 14;

impl BinaryOp {
    /// Static precedence table; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Coalesce => 1,
            BinaryOp::OrElse => 2,
            BinaryOp::AndAlso => 3,
            BinaryOp::Or => 4,
            BinaryOp::ExclusiveOr => 5,
            BinaryOp::And => 6,
            BinaryOp::Equal | BinaryOp::NotEqual => 7,
            BinaryOp::LessThan
            | BinaryOp::LessThanOrEqual
            | BinaryOp::GreaterThan
            | BinaryOp::GreaterThanOrEqual => RELATIONAL,
            BinaryOp::LeftShift | BinaryOp::RightShift => 9,
            BinaryOp::Add | BinaryOp::Subtract => 10,
            BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => 11,
            BinaryOp::Power => 12,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Coalesce => "??",
            BinaryOp::OrElse => "||",
            BinaryOp::AndAlso => "&&",
            BinaryOp::Or => "|",
            BinaryOp::ExclusiveOr => "^",
            BinaryOp::And => "&",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::LeftShift => "<<",
            BinaryOp::RightShift => ">>",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Power => "**",
        }
    }

    fn is_right_associative(self) -> bool {
        matches!(self, BinaryOp::Coalesce | BinaryOp::Power)
    }
}

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Binary { op, .. } => op.precedence(),
        Expr::Conditional { .. } | Expr::Lambda { .. } => CONDITIONAL,
        Expr::TypeIs { .. } | Expr::TypeAs { .. } => RELATIONAL,
        Expr::Unary { op: UnaryOp::Quote, operand } => precedence(operand),
        Expr::Unary { op: UnaryOp::ArrayLength, .. } => PRIMARY,
        Expr::Unary { .. } | Expr::Convert { .. } => UNARY,
        _ => PRIMARY,
    }
}

#[derive(Default)]
struct Canonicalizer {
    out: String,
    types: BTreeSet<String>,
    /// Lambda scopes, innermost last: (binding, synthetic name).
    scopes: Vec<Vec<(Binding, String)>>,
    /// Anonymous parameters referenced outside any binding lambda.
    free: HashMap<Binding, String>,
    next_var: u32,
}

impl Canonicalizer {
    fn visit(&mut self, expr: &Expr) {
        match expr {
            Expr::Constant { value } => self.literal(value),
            Expr::Parameter { param } => {
                self.note_type(&param.ty);
                let name = self.resolve(param);
                self.out.push_str(&name);
            }
            Expr::Lambda { params, body } => {
                let mut scope = Vec::with_capacity(params.len());
                self.out.push('(');
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.note_type(&param.ty);
                    let synthetic = self.fresh_var();
                    self.out.push_str(&format!("{} {synthetic}", param.ty));
                    scope.push((param.binding(), synthetic));
                }
                self.out.push_str(") => ");
                self.scopes.push(scope);
                self.visit(body);
                self.scopes.pop();
            }
            Expr::Member { target, member, ty } => {
                self.note_type(ty);
                self.target(target);
                self.out.push('.');
                self.out.push_str(&ident(member));
            }
            Expr::Call { target, method, type_args, args, ty } => {
                self.note_type(ty);
                self.target(target);
                self.out.push('.');
                self.out.push_str(&ident(method));
                if !type_args.is_empty() {
                    self.out.push('<');
                    for (i, arg) in type_args.iter().enumerate() {
                        if i > 0 {
                            self.out.push_str(", ");
                        }
                        self.note_type(arg);
                        self.out.push_str(&arg.to_string());
                    }
                    self.out.push('>');
                }
                self.out.push('(');
                self.list(args);
                self.out.push(')');
            }
            Expr::Binary { op, left, right } => {
                let own = op.precedence();
                let left_prec = precedence(left);
                let right_prec = precedence(right);
                let right_assoc = op.is_right_associative();
                self.operand(left, left_prec < own || (left_prec == own && right_assoc));
                self.out.push(' ');
                self.out.push_str(op.symbol());
                self.out.push(' ');
                self.operand(right, right_prec < own || (right_prec == own && !right_assoc));
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Quote => self.visit(operand),
                UnaryOp::ArrayLength => {
                    self.operand(operand, precedence(operand) < PRIMARY);
                    self.out.push_str(".Length");
                }
                UnaryOp::Negate | UnaryOp::Not | UnaryOp::OnesComplement => {
                    self.out.push_str(match op {
                        UnaryOp::Negate => "-",
                        UnaryOp::Not => "!",
                        _ => "~",
                    });
                    self.operand(operand, precedence(operand) < UNARY);
                }
            },
            Expr::Conditional { test, if_true, if_false } => {
                self.operand(test, precedence(test) <= CONDITIONAL);
                self.out.push_str(" ? ");
                self.operand(if_true, precedence(if_true) <= CONDITIONAL);
                self.out.push_str(" : ");
                self.operand(if_false, precedence(if_false) <= CONDITIONAL);
            }
            Expr::New { ty, args } => {
                self.note_type(ty);
                self.out.push_str(&format!("new {ty}("));
                self.list(args);
                self.out.push(')');
            }
            Expr::Convert { ty, operand } => {
                self.note_type(ty);
                self.out.push_str(&format!("({ty})"));
                self.operand(operand, precedence(operand) < UNARY);
            }
            Expr::TypeIs { operand, ty } => self.type_test(operand, "is", ty),
            Expr::TypeAs { operand, ty } => self.type_test(operand, "as", ty),
            Expr::NewArray { element, items } => {
                self.note_type(element);
                self.out.push_str(&format!("new {element}[] {{"));
                if !items.is_empty() {
                    self.out.push(' ');
                    self.list(items);
                    self.out.push(' ');
                }
                self.out.push('}');
            }
            Expr::Index { target, args } => {
                self.operand(target, precedence(target) < PRIMARY);
                self.out.push('[');
                self.list(args);
                self.out.push(']');
            }
        }
    }

    fn operand(&mut self, expr: &Expr, parenthesize: bool) {
        if parenthesize {
            self.out.push('(');
            self.visit(expr);
            self.out.push(')');
        } else {
            self.visit(expr);
        }
    }

    fn list(&mut self, items: &[Expr]) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.visit(item);
        }
    }

    fn target(&mut self, target: &Target) {
        match target {
            Target::Instance(receiver) => self.operand(receiver, precedence(receiver) < PRIMARY),
            Target::Static(owner) => {
                self.note_type(owner);
                self.out.push_str(&owner.to_string());
            }
        }
    }

    fn type_test(&mut self, operand: &Expr, keyword: &str, ty: &TypeRef) {
        self.note_type(ty);
        self.operand(operand, precedence(operand) <= RELATIONAL);
        self.out.push_str(&format!(" {keyword} {ty}"));
    }

    fn literal(&mut self, value: &Literal) {
        match value {
            Literal::Null => self.out.push_str("null"),
            Literal::Bool(b) => self.out.push_str(if *b { "true" } else { "false" }),
            Literal::Int(i) => self.out.push_str(&i.to_string()),
            // Debug keeps the fractional part, so 1.0 never renders like the integer 1.
            Literal::Float(f) => self.out.push_str(&format!("{f:?}")),
            Literal::Str(s) => self.out.push_str(&format!("{s:?}")),
            Literal::Object { ty, repr } => {
                self.note_type(ty);
                self.out.push_str(&format!("<{ty}>({repr:?})"));
            }
        }
    }

    fn resolve(&mut self, param: &Param) -> String {
        let binding = param.binding();
        for scope in self.scopes.iter().rev() {
            if let Some((_, synthetic)) = scope.iter().rev().find(|(declared, _)| *declared == binding) {
                return synthetic.clone();
            }
        }
        if let Some(name) = param.display_name() {
            return format!("@{}", ident(name));
        }
        if let Some(synthetic) = self.free.get(&binding) {
            return synthetic.clone();
        }
        let synthetic = self.fresh_var();
        self.free.insert(binding, synthetic.clone());
        synthetic
    }

    fn fresh_var(&mut self) -> String {
        self.next_var += 1;
        format!("$var{}", self.next_var)
    }

    fn note_type(&mut self, ty: &TypeRef) {
        if ty.is_class_shaped() {
            self.types.insert(ty.name.clone());
        }
        for arg in &ty.args {
            self.note_type(arg);
        }
    }
}

/// Member, method and free parameter names render bare only when they are
/// plain identifiers.
fn ident(name: &str) -> String {
    if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        name.to_string()
    } else {
        format!("{name:?}")
    }
}
