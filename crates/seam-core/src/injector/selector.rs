// Site selection: which expressions inside a class become injection sites,
// plus the static type inference the decision depends on.

use crate::ast::{BinaryOp, ClassDecl, Expr, Literal, Member, Stmt, TypeRef, UnaryOp};
use crate::registry::{FieldSignature, MethodRegistry, MethodSignature};

use super::resolve::{select_overload, Resolution, TypeResolver};
use super::site::SiteKind;

/// The method or constructor whose body is being examined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodContext {
    /// Class declaring the method (a nested class for nested methods)
    pub class: String,
    pub descriptor: String,
    /// No `this` in scope
    pub is_static: bool,
}

impl MethodContext {
    pub fn new(class: &str, descriptor: &str, is_static: bool) -> Self {
        Self {
            class: class.to_string(),
            descriptor: descriptor.to_string(),
            is_static,
        }
    }
}

/// Lexical scope of parameters, locals and rewriter temporaries
#[derive(Debug, Clone, Default)]
pub struct LocalScope {
    frames: Vec<Vec<(String, Option<TypeRef>)>>,
}

impl LocalScope {
    pub fn new() -> Self {
        Self {
            frames: vec![Vec::new()],
        }
    }

    pub fn push(&mut self) {
        self.frames.push(Vec::new());
    }

    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn declare(&mut self, name: &str, ty: Option<TypeRef>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.push((name.to_string(), ty));
        }
    }

    /// `Some(None)` when the name is bound but its type is unknown
    pub fn lookup(&self, name: &str) -> Option<Option<&TypeRef>> {
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .find(|(n, _)| n == name)
            .map(|(_, ty)| ty.as_ref())
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }
}

/// A rewrite candidate with its resolved target
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    Call(MethodSignature),
    Construct {
        class: String,
        /// `None` when the class declares no constructors
        constructor: Option<MethodSignature>,
    },
    StaticField(FieldSignature),
}

impl Candidate {
    pub fn kind(&self) -> SiteKind {
        match self {
            Candidate::Call(_) => SiteKind::Call,
            Candidate::Construct { .. } => SiteKind::Construct,
            Candidate::StaticField(_) => SiteKind::StaticFieldAccess,
        }
    }

    /// Target as written into the site identifier
    pub fn target(&self, arity: usize) -> String {
        match self {
            Candidate::Call(sig) => sig.target(),
            Candidate::Construct {
                constructor: Some(ctor),
                ..
            } => ctor.target(),
            Candidate::Construct { class, .. } => format!("{class}.<init>/{arity}"),
            Candidate::StaticField(field) => field.target(),
        }
    }

    /// Static type of the original expression
    pub fn result_type(&self) -> TypeRef {
        match self {
            Candidate::Call(sig) => sig.return_type.clone(),
            Candidate::Construct { class, .. } => type_from_name(class),
            Candidate::StaticField(field) => field.ty.clone(),
        }
    }
}

/// Candidate listing entry, for reporting without rewriting
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateInfo {
    pub context: MethodContext,
    pub candidate: Candidate,
    pub expr: Expr,
}

/// Map a class name from `new X(..)` back to a type
pub fn type_from_name(name: &str) -> TypeRef {
    match name {
        "String" => TypeRef::Str,
        "Object" => TypeRef::Object,
        "List" => TypeRef::List,
        "Map" => TypeRef::Map,
        other => TypeRef::class(other),
    }
}

/// Decides candidacy per expression against one class's registry
pub struct SiteSelector<'r> {
    registry: &'r MethodRegistry,
    resolver: &'r dyn TypeResolver,
}

impl<'r> SiteSelector<'r> {
    pub fn new(registry: &'r MethodRegistry, resolver: &'r dyn TypeResolver) -> Self {
        Self { registry, resolver }
    }

    /// Classify one expression. `None` means the expression stays as it is:
    /// not a call, construction or static read, or one whose target cannot
    /// be resolved unambiguously.
    pub fn classify(
        &self,
        expr: &Expr,
        ctx: &MethodContext,
        scope: &LocalScope,
    ) -> Option<Candidate> {
        match expr {
            Expr::Call {
                receiver,
                method,
                args,
                ..
            } => self.classify_call(receiver.as_deref(), method, args, ctx, scope),
            Expr::New { class, args, .. } => self.classify_new(class, args, ctx, scope),
            Expr::Name { name, .. } => {
                if scope.is_bound(name) {
                    return None;
                }
                self.own_static_field(&ctx.class, name)
                    .map(|f| Candidate::StaticField(f.clone()))
            }
            Expr::Field { target, name, .. } => {
                let class = self.class_reference(target, ctx, scope)?;
                if class != ctx.class {
                    return None;
                }
                self.own_static_field(&class, name)
                    .map(|f| Candidate::StaticField(f.clone()))
            }
            _ => None,
        }
    }

    fn own_static_field(&self, class: &str, name: &str) -> Option<&FieldSignature> {
        self.registry.field(class, name).filter(|f| f.is_static)
    }

    fn classify_call(
        &self,
        receiver: Option<&Expr>,
        method: &str,
        args: &[Expr],
        ctx: &MethodContext,
        scope: &LocalScope,
    ) -> Option<Candidate> {
        let arg_types: Vec<Option<TypeRef>> =
            args.iter().map(|a| self.infer(a, ctx, scope)).collect();

        match receiver {
            // Implicit receiver: only methods the enclosing class declares
            None => {
                let sig = self.resolve_own(&ctx.class, method, &arg_types)?;
                if ctx.is_static && !sig.is_static {
                    return None;
                }
                Some(Candidate::Call(sig))
            }
            Some(Expr::This) => {
                if ctx.is_static {
                    return None;
                }
                let sig = self.resolve_own(&ctx.class, method, &arg_types)?;
                Some(Candidate::Call(sig))
            }
            Some(receiver) => {
                if let Some(class) = self.class_reference(receiver, ctx, scope) {
                    let sig = if self.registry.declares_class(&class) {
                        self.resolve_own(&class, method, &arg_types)?
                    } else {
                        let candidates = self.resolver.methods(&class, method);
                        select_overload(self.resolver, &candidates, &arg_types).resolved()?
                    };
                    return sig.is_static.then_some(Candidate::Call(sig));
                }
                // Another instance of the enclosing class
                match self.infer(receiver, ctx, scope) {
                    Some(TypeRef::Class(class)) if class == ctx.class => {
                        let sig = self.resolve_own(&class, method, &arg_types)?;
                        Some(Candidate::Call(sig))
                    }
                    _ => None,
                }
            }
        }
    }

    fn resolve_own(
        &self,
        class: &str,
        method: &str,
        arg_types: &[Option<TypeRef>],
    ) -> Option<MethodSignature> {
        let candidates = self.registry.methods_named(class, method);
        match select_overload(self.resolver, candidates, arg_types) {
            Resolution::Resolved(sig) => Some(sig),
            Resolution::Unresolved | Resolution::Ambiguous => None,
        }
    }

    fn classify_new(
        &self,
        class: &str,
        args: &[Expr],
        ctx: &MethodContext,
        scope: &LocalScope,
    ) -> Option<Candidate> {
        if class != ctx.class && !self.resolver.is_opted_in(class) {
            return None;
        }
        let arg_types: Vec<Option<TypeRef>> =
            args.iter().map(|a| self.infer(a, ctx, scope)).collect();

        let declared: Vec<MethodSignature> = if self.registry.declares_class(class) {
            self.registry.constructors_of(class).cloned().collect()
        } else {
            self.resolver.constructors(class)
        };

        if declared.is_empty() {
            // Implicit no-argument constructor
            return args.is_empty().then(|| Candidate::Construct {
                class: class.to_string(),
                constructor: None,
            });
        }
        let ctor = select_overload(self.resolver, &declared, &arg_types).resolved()?;
        Some(Candidate::Construct {
            class: class.to_string(),
            constructor: Some(ctor),
        })
    }

    pub fn is_class_reference(&self, expr: &Expr, ctx: &MethodContext, scope: &LocalScope) -> bool {
        self.class_reference(expr, ctx, scope).is_some()
    }

    /// The class named by `expr` when it is a bare class name rather than a
    /// value (not shadowed by a local or a field)
    fn class_reference(&self, expr: &Expr, ctx: &MethodContext, scope: &LocalScope) -> Option<String> {
        let Expr::Name { name, .. } = expr else {
            return None;
        };
        if scope.is_bound(name) || self.field_type(&ctx.class, name).is_some() {
            return None;
        }
        if self.registry.declares_class(name) || self.resolver.is_class(name) {
            Some(name.clone())
        } else {
            None
        }
    }

    fn field_type(&self, class: &str, name: &str) -> Option<TypeRef> {
        self.registry
            .field(class, name)
            .map(|f| f.ty.clone())
            .or_else(|| self.resolver.field(class, name).map(|f| f.ty))
    }

    fn method_return(
        &self,
        class: &str,
        method: &str,
        arg_types: &[Option<TypeRef>],
    ) -> Option<TypeRef> {
        let sig = if self.registry.declares_class(class) {
            self.resolve_own(class, method, arg_types)?
        } else {
            let candidates = self.resolver.methods(class, method);
            select_overload(self.resolver, &candidates, arg_types).resolved()?
        };
        Some(sig.return_type)
    }

    /// Static type of an expression, when it can be worked out locally
    pub fn infer(&self, expr: &Expr, ctx: &MethodContext, scope: &LocalScope) -> Option<TypeRef> {
        match expr {
            Expr::Literal(literal) => match literal {
                Literal::Int(_) => Some(TypeRef::Int),
                Literal::Double(_) => Some(TypeRef::Double),
                Literal::Bool(_) => Some(TypeRef::Boolean),
                Literal::Str(_) => Some(TypeRef::Str),
                Literal::Null => None,
            },
            Expr::This => (!ctx.is_static).then(|| TypeRef::class(&ctx.class)),
            Expr::Name { name, .. } => match scope.lookup(name) {
                Some(ty) => ty.cloned(),
                None => self.field_type(&ctx.class, name),
            },
            Expr::Field { target, name, .. } => {
                if let Some(class) = self.class_reference(target, ctx, scope) {
                    return self.field_type(&class, name);
                }
                match self.infer(target, ctx, scope)? {
                    TypeRef::Array(_) if name == "length" => Some(TypeRef::Int),
                    TypeRef::Class(class) => self.field_type(&class, name),
                    _ => None,
                }
            }
            Expr::Index { target, .. } => match self.infer(target, ctx, scope)? {
                TypeRef::Array(elem) => Some(*elem),
                _ => None,
            },
            Expr::Call {
                receiver,
                method,
                args,
                ..
            } => {
                let arg_types: Vec<Option<TypeRef>> =
                    args.iter().map(|a| self.infer(a, ctx, scope)).collect();
                let class = match receiver.as_deref() {
                    None | Some(Expr::This) => ctx.class.clone(),
                    Some(receiver) => match self.class_reference(receiver, ctx, scope) {
                        Some(class) => class,
                        None => match self.infer(receiver, ctx, scope)? {
                            TypeRef::Class(class) => class,
                            other => return builtin_return(&other, method),
                        },
                    },
                };
                self.method_return(&class, method, &arg_types)
            }
            Expr::New { class, .. } => Some(type_from_name(class)),
            Expr::NewArray { elem, .. } => Some(TypeRef::array_of(elem.clone())),
            Expr::ListLiteral { .. } => Some(TypeRef::List),
            Expr::Binary { op, left, right } => {
                if op.is_comparison() || matches!(op, BinaryOp::And | BinaryOp::Or) {
                    return Some(TypeRef::Boolean);
                }
                let left = self.infer(left, ctx, scope);
                let right = self.infer(right, ctx, scope);
                match (op, left?, right?) {
                    (BinaryOp::Add, TypeRef::Str, _) | (BinaryOp::Add, _, TypeRef::Str) => {
                        Some(TypeRef::Str)
                    }
                    (_, TypeRef::Int, TypeRef::Int) => Some(TypeRef::Int),
                    (_, TypeRef::Double, TypeRef::Int | TypeRef::Double)
                    | (_, TypeRef::Int, TypeRef::Double) => Some(TypeRef::Double),
                    _ => None,
                }
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => Some(TypeRef::Boolean),
                UnaryOp::Neg => self.infer(operand, ctx, scope),
            },
            Expr::Assign { value, .. } => self.infer(value, ctx, scope),
            Expr::Let {
                name,
                ty,
                init,
                body,
            } => {
                let ty = ty.clone().or_else(|| self.infer(init, ctx, scope));
                let mut inner = scope.clone();
                inner.push();
                inner.declare(name, ty);
                self.infer(body, ctx, &inner)
            }
            Expr::Guarded(guard) => Some(guard.result.clone()),
        }
    }

    /// Every candidate in the class and its nested classes, innermost
    /// first within each expression, in lexical order otherwise. Nothing
    /// is rewritten.
    pub fn enumerate(&self, class: &ClassDecl) -> Vec<CandidateInfo> {
        let mut found = Vec::new();
        for member in &class.members {
            match member {
                Member::Method(method) => {
                    let ctx = MethodContext::new(
                        &class.name,
                        &method.descriptor(),
                        method.modifiers.is_static,
                    );
                    let mut scope = LocalScope::new();
                    for param in &method.params {
                        scope.declare(&param.name, Some(param.ty.clone()));
                    }
                    self.enumerate_stmts(&method.body, &ctx, &mut scope, &mut found);
                }
                Member::Constructor(ctor) => {
                    let ctx = MethodContext::new(&class.name, &ctor.descriptor(), false);
                    let mut scope = LocalScope::new();
                    for param in &ctor.params {
                        scope.declare(&param.name, Some(param.ty.clone()));
                    }
                    self.enumerate_stmts(&ctor.body, &ctx, &mut scope, &mut found);
                }
                Member::Class(nested) if self.registry.declares_class(&nested.name) => {
                    found.extend(self.enumerate(nested));
                }
                _ => {}
            }
        }
        found
    }

    fn enumerate_stmts(
        &self,
        stmts: &[Stmt],
        ctx: &MethodContext,
        scope: &mut LocalScope,
        found: &mut Vec<CandidateInfo>,
    ) {
        for stmt in stmts {
            self.enumerate_stmt(stmt, ctx, scope, found);
        }
    }

    fn enumerate_stmt(
        &self,
        stmt: &Stmt,
        ctx: &MethodContext,
        scope: &mut LocalScope,
        found: &mut Vec<CandidateInfo>,
    ) {
        match stmt {
            Stmt::Local { name, ty, init, .. } => {
                if let Some(init) = init {
                    self.enumerate_expr(init, ctx, scope, found);
                }
                scope.declare(name, Some(ty.clone()));
            }
            Stmt::Expr(expr) | Stmt::Throw { value: expr, .. } => {
                self.enumerate_expr(expr, ctx, scope, found)
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.enumerate_expr(value, ctx, scope, found);
                }
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.enumerate_expr(condition, ctx, scope, found);
                self.enumerate_nested(then_branch, ctx, scope, found);
                if let Some(else_branch) = else_branch {
                    self.enumerate_nested(else_branch, ctx, scope, found);
                }
            }
            Stmt::While { condition, body } => {
                self.enumerate_expr(condition, ctx, scope, found);
                self.enumerate_nested(body, ctx, scope, found);
            }
            Stmt::Block(stmts) => {
                scope.push();
                self.enumerate_stmts(stmts, ctx, scope, found);
                scope.pop();
            }
            Stmt::Try {
                body,
                catch_type,
                catch_var,
                handler,
            } => {
                scope.push();
                self.enumerate_stmts(body, ctx, scope, found);
                scope.pop();
                scope.push();
                scope.declare(catch_var, Some(TypeRef::class(catch_type)));
                self.enumerate_stmts(handler, ctx, scope, found);
                scope.pop();
            }
        }
    }

    fn enumerate_nested(
        &self,
        stmt: &Stmt,
        ctx: &MethodContext,
        scope: &mut LocalScope,
        found: &mut Vec<CandidateInfo>,
    ) {
        scope.push();
        self.enumerate_stmt(stmt, ctx, scope, found);
        scope.pop();
    }

    fn enumerate_expr(
        &self,
        expr: &Expr,
        ctx: &MethodContext,
        scope: &mut LocalScope,
        found: &mut Vec<CandidateInfo>,
    ) {
        for child in children(expr) {
            self.enumerate_expr(child, ctx, scope, found);
        }
        if let Some(candidate) = self.classify(expr, ctx, scope) {
            found.push(CandidateInfo {
                context: ctx.clone(),
                candidate,
                expr: expr.clone(),
            });
        }
    }
}

/// Read positions directly under `expr`, left to right. Assignment
/// targets contribute only the sub-expressions that are evaluated as reads.
fn children(expr: &Expr) -> Vec<&Expr> {
    use crate::ast::LValue;
    match expr {
        Expr::Literal(_) | Expr::This | Expr::Name { .. } => Vec::new(),
        Expr::Field { target, .. } => vec![target.as_ref()],
        Expr::Index { target, index } => vec![target.as_ref(), index.as_ref()],
        Expr::Call { receiver, args, .. } => {
            let mut out: Vec<&Expr> = receiver.iter().map(|r| r.as_ref()).collect();
            out.extend(args.iter());
            out
        }
        Expr::New { args, .. } => args.iter().collect(),
        Expr::NewArray { elements, .. } | Expr::ListLiteral { elements } => {
            elements.iter().collect()
        }
        Expr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
        Expr::Unary { operand, .. } => vec![operand.as_ref()],
        Expr::Assign { target, value } => {
            let mut out = match target {
                LValue::Name { .. } => Vec::new(),
                LValue::Field { target, .. } => vec![target.as_ref()],
                LValue::Index { target, index } => vec![target.as_ref(), index.as_ref()],
            };
            out.push(value.as_ref());
            out
        }
        Expr::Let { init, body, .. } => vec![init.as_ref(), body.as_ref()],
        Expr::Guarded(guard) => vec![guard.fallback.as_ref()],
    }
}

fn builtin_return(receiver: &TypeRef, method: &str) -> Option<TypeRef> {
    match (receiver, method) {
        (TypeRef::Str, "length") => Some(TypeRef::Int),
        (TypeRef::Str, "contains" | "startsWith" | "endsWith" | "isEmpty") => {
            Some(TypeRef::Boolean)
        }
        (TypeRef::Str, "toUpperCase" | "toLowerCase" | "trim") => Some(TypeRef::Str),
        (TypeRef::List | TypeRef::Map, "size") => Some(TypeRef::Int),
        (TypeRef::List, "isEmpty" | "contains" | "add") => Some(TypeRef::Boolean),
        (TypeRef::Map, "containsKey" | "isEmpty") => Some(TypeRef::Boolean),
        _ => None,
    }
}
