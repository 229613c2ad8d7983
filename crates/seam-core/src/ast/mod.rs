// Unified syntax tree for seam source units.
// Produced by the parser, catalogued by the registry pass and rewritten by the
// injector. Rewriter-only nodes (`Let`, `Guarded`) never come out of the parser.

pub mod source_gen;
pub use source_gen::ToSource;

#[cfg(test)]
mod source_gen_tests;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Line / column of a node in its source file (1-based).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Declared visibility of a member
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Protected,
    /// No modifier written
    #[default]
    Package,
    Private,
}

impl Visibility {
    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            Visibility::Public => Some("public"),
            Visibility::Protected => Some("protected"),
            Visibility::Package => None,
            Visibility::Private => Some("private"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_final: bool,
}

/// Static types as written in declarations.
///
/// Generic arguments are parsed and dropped: `List<String>` is `List`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Void,
    Int,
    Double,
    Boolean,
    Str,
    Object,
    List,
    Map,
    Class(String),
    Array(Box<TypeRef>),
}

impl TypeRef {
    pub fn class(name: &str) -> Self {
        TypeRef::Class(name.to_string())
    }

    pub fn array_of(elem: TypeRef) -> Self {
        TypeRef::Array(Box::new(elem))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeRef::Void)
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, TypeRef::Int | TypeRef::Double | TypeRef::Boolean)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Void => write!(f, "void"),
            TypeRef::Int => write!(f, "int"),
            TypeRef::Double => write!(f, "double"),
            TypeRef::Boolean => write!(f, "boolean"),
            TypeRef::Str => write!(f, "String"),
            TypeRef::Object => write!(f, "Object"),
            TypeRef::List => write!(f, "List"),
            TypeRef::Map => write!(f, "Map"),
            TypeRef::Class(name) => write!(f, "{name}"),
            TypeRef::Array(elem) => write!(f, "{elem}[]"),
        }
    }
}

/// Deterministic identifier of an injection site.
///
/// Embedded in `Guarded` nodes and used as the override table key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(String);

impl SiteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `name(T,..)` of the method a call site targets
    pub fn call_descriptor(&self) -> Option<&str> {
        let (_, target) = self.0.split_once("/call:")?;
        let (target, _) = target.rsplit_once('#')?;
        let open = target.find('(')?;
        let dot = target[..open].rfind('.')?;
        Some(&target[dot + 1..])
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SiteId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SiteId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One parsed source file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilationUnit {
    pub classes: Vec<ClassDecl>,
}

impl CompilationUnit {
    pub fn class(&self, name: &str) -> Option<&ClassDecl> {
        self.classes.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    pub annotations: Vec<String>,
    pub modifiers: Modifiers,
    pub superclass: Option<String>,
    pub members: Vec<Member>,
    pub span: Span,
}

impl ClassDecl {
    pub fn has_annotation(&self, name: &str) -> bool {
        self.annotations.iter().any(|a| a == name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodDecl> {
        self.members.iter().filter_map(|m| match m {
            Member::Method(method) => Some(method),
            _ => None,
        })
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDecl> {
        self.members.iter().filter_map(|m| match m {
            Member::Field(field) => Some(field),
            _ => None,
        })
    }

    pub fn constructors(&self) -> impl Iterator<Item = &ConstructorDecl> {
        self.members.iter().filter_map(|m| match m {
            Member::Constructor(ctor) => Some(ctor),
            _ => None,
        })
    }

    pub fn nested_classes(&self) -> impl Iterator<Item = &ClassDecl> {
        self.members.iter().filter_map(|m| match m {
            Member::Class(class) => Some(class),
            _ => None,
        })
    }

    /// True once the injector has placed at least one guard in this class
    /// (or one of its nested classes).
    pub fn contains_guards(&self) -> bool {
        self.members.iter().any(|member| match member {
            Member::Method(method) => method.body.iter().any(Stmt::contains_guards),
            Member::Constructor(ctor) => ctor.body.iter().any(Stmt::contains_guards),
            Member::Class(class) => class.contains_guards(),
            Member::Field(_) | Member::Malformed { .. } => false,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Member {
    Field(FieldDecl),
    Constructor(ConstructorDecl),
    Method(MethodDecl),
    Class(ClassDecl),
    /// A member the parser could not make sense of, kept verbatim so later
    /// passes can report and skip it.
    Malformed {
        span: Span,
        text: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeRef,
    pub modifiers: Modifiers,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDecl {
    pub name: String,
    pub modifiers: Modifiers,
    pub params: Vec<Param>,
    pub return_type: TypeRef,
    pub body: Vec<Stmt>,
    pub span: Span,
}

impl MethodDecl {
    /// `name(int,String)` form used in site identifiers
    pub fn descriptor(&self) -> String {
        descriptor(&self.name, &self.params)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructorDecl {
    pub modifiers: Modifiers,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

impl ConstructorDecl {
    pub fn descriptor(&self) -> String {
        descriptor("<init>", &self.params)
    }
}

fn descriptor(name: &str, params: &[Param]) -> String {
    let params = params
        .iter()
        .map(|p| p.ty.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("{name}({params})")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Local {
        name: String,
        ty: TypeRef,
        init: Option<Expr>,
        span: Span,
    },
    Expr(Expr),
    Return {
        value: Option<Expr>,
        span: Span,
    },
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
    },
    Block(Vec<Stmt>),
    Throw {
        value: Expr,
        span: Span,
    },
    Try {
        body: Vec<Stmt>,
        catch_type: String,
        catch_var: String,
        handler: Vec<Stmt>,
    },
}

impl Stmt {
    pub fn contains_guards(&self) -> bool {
        match self {
            Stmt::Local { init, .. } => init.as_ref().is_some_and(Expr::contains_guards),
            Stmt::Expr(expr) | Stmt::Throw { value: expr, .. } => expr.contains_guards(),
            Stmt::Return { value, .. } => value.as_ref().is_some_and(Expr::contains_guards),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.contains_guards()
                    || then_branch.contains_guards()
                    || else_branch.as_ref().is_some_and(|s| s.contains_guards())
            }
            Stmt::While { condition, body } => condition.contains_guards() || body.contains_guards(),
            Stmt::Block(stmts) => stmts.iter().any(Stmt::contains_guards),
            Stmt::Try { body, handler, .. } => {
                body.iter().any(Stmt::contains_guards) || handler.iter().any(Stmt::contains_guards)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Double(f64),
    Bool(bool),
    Str(String),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    /// Binding strength, higher binds tighter
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::Ne => 3,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 6,
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Left side of an assignment.
///
/// Kept apart from `Expr` so a write can never be mistaken for a read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LValue {
    Name {
        name: String,
        span: Span,
    },
    Field {
        target: Box<Expr>,
        name: String,
        span: Span,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
}

/// Whose instance identity a guard reports to the override table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardScope {
    /// The enclosing `this`
    Instance,
    /// No enclosing instance: only wildcard overrides apply
    Static,
}

/// An injection-aware replacement for one original expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guard {
    pub site: SiteId,
    pub scope: GuardScope,
    /// Argument values handed to the override lookup, already evaluated
    /// into temporaries (or literals)
    pub args: Vec<Expr>,
    /// Static type of the original expression
    pub result: TypeRef,
    /// The original expression, rebuilt over the same temporaries
    pub fallback: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    This,
    Name {
        name: String,
        span: Span,
    },
    Field {
        target: Box<Expr>,
        name: String,
        span: Span,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        receiver: Option<Box<Expr>>,
        method: String,
        args: Vec<Expr>,
        span: Span,
    },
    New {
        class: String,
        args: Vec<Expr>,
        span: Span,
    },
    NewArray {
        elem: TypeRef,
        elements: Vec<Expr>,
    },
    ListLiteral {
        elements: Vec<Expr>,
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
    Assign {
        target: LValue,
        value: Box<Expr>,
    },

    // Rewriter output
    Let {
        name: String,
        ty: Option<TypeRef>,
        init: Box<Expr>,
        body: Box<Expr>,
    },
    Guarded(Box<Guard>),
}

impl Expr {
    pub fn int(value: i64) -> Self {
        Expr::Literal(Literal::Int(value))
    }

    pub fn string(value: &str) -> Self {
        Expr::Literal(Literal::Str(value.to_string()))
    }

    pub fn name(name: &str) -> Self {
        Expr::Name {
            name: name.to_string(),
            span: Span::default(),
        }
    }

    /// Source position of the node, when it carries one
    pub fn span(&self) -> Option<Span> {
        match self {
            Expr::Name { span, .. }
            | Expr::Field { span, .. }
            | Expr::Call { span, .. }
            | Expr::New { span, .. } => Some(*span),
            _ => None,
        }
    }

    /// Evaluating this node twice is indistinguishable from evaluating it once
    pub fn is_repeatable(&self) -> bool {
        matches!(self, Expr::Literal(_) | Expr::This)
    }

    pub fn contains_guards(&self) -> bool {
        match self {
            Expr::Guarded(_) => true,
            Expr::Literal(_) | Expr::This | Expr::Name { .. } => false,
            Expr::Field { target, .. } => target.contains_guards(),
            Expr::Index { target, index } => target.contains_guards() || index.contains_guards(),
            Expr::Call { receiver, args, .. } => {
                receiver.as_ref().is_some_and(|r| r.contains_guards())
                    || args.iter().any(Expr::contains_guards)
            }
            Expr::New { args, .. } => args.iter().any(Expr::contains_guards),
            Expr::NewArray { elements, .. } | Expr::ListLiteral { elements } => {
                elements.iter().any(Expr::contains_guards)
            }
            Expr::Binary { left, right, .. } => left.contains_guards() || right.contains_guards(),
            Expr::Unary { operand, .. } => operand.contains_guards(),
            Expr::Assign { target, value } => {
                let target_guards = match target {
                    LValue::Name { .. } => false,
                    LValue::Field { target, .. } => target.contains_guards(),
                    LValue::Index { target, index } => {
                        target.contains_guards() || index.contains_guards()
                    }
                };
                target_guards || value.contains_guards()
            }
            Expr::Let { init, body, .. } => init.contains_guards() || body.contains_guards(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_source())
    }
}
