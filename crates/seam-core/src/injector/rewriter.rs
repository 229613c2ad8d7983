// Second pass: turn every selected expression into a guarded expression.
//
// Children are rewritten before their parent, so an outer site sees inner
// sites as opaque sub-expressions. Every receiver and argument that is not
// trivially repeatable is bound to a temporary first, which keeps single
// evaluation and the original left-to-right order.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::ast::{
    ClassDecl, ConstructorDecl, Expr, Guard, GuardScope, LValue, Member, MethodDecl, Param,
    SiteId, Span, Stmt, TypeRef,
};
use crate::registry::{MethodRegistry, SkippedNode};

use super::resolve::TypeResolver;
use super::selector::{Candidate, LocalScope, MethodContext, SiteSelector};
use super::site::{InjectionSite, ManifestOrigin, SiteIdAllocator, SiteManifest};
use super::{InjectError, TransformationContext};

/// Prefix of rewriter temporaries; source code cannot declare `$` names
pub const TEMP_PREFIX: &str = "$seam";

/// Per-method rewriting state
struct MethodState {
    ctx: MethodContext,
    ids: SiteIdAllocator,
    scope: LocalScope,
    temps: usize,
}

impl MethodState {
    fn new(class: &str, descriptor: &str, is_static: bool, params: &[Param]) -> Self {
        let mut scope = LocalScope::new();
        for param in params {
            scope.declare(&param.name, Some(param.ty.clone()));
        }
        Self {
            ctx: MethodContext::new(class, descriptor, is_static),
            ids: SiteIdAllocator::new(class, descriptor),
            scope,
            temps: 0,
        }
    }

    fn guard_scope(&self) -> GuardScope {
        if self.ctx.is_static {
            GuardScope::Static
        } else {
            GuardScope::Instance
        }
    }
}

/// Temporaries awaiting their `let` wrappers, outermost first
#[derive(Default)]
struct Bindings(Vec<(String, Option<TypeRef>, Expr)>);

impl Bindings {
    fn wrap(self, body: Expr) -> Expr {
        self.0
            .into_iter()
            .rev()
            .fold(body, |body, (name, ty, init)| Expr::Let {
                name,
                ty,
                init: Box::new(init),
                body: Box::new(body),
            })
    }
}

pub struct InjectionRewriter<'r> {
    selector: SiteSelector<'r>,
    registry: &'r MethodRegistry,
    manifest: SiteManifest,
    seen: HashSet<SiteId>,
    context: TransformationContext,
    too_deep: Vec<SkippedNode>,
}

impl<'r> InjectionRewriter<'r> {
    pub fn new(
        registry: &'r MethodRegistry,
        resolver: &'r dyn TypeResolver,
        context: TransformationContext,
        origin: ManifestOrigin,
    ) -> Self {
        Self {
            selector: SiteSelector::new(registry, resolver),
            registry,
            manifest: SiteManifest::new(registry.class_name(), origin),
            seen: HashSet::new(),
            context,
            too_deep: Vec::new(),
        }
    }

    /// The manifest, plus the code left unrewritten for nesting too deeply
    pub fn into_parts(self) -> (SiteManifest, Vec<SkippedNode>) {
        (self.manifest, self.too_deep)
    }

    pub fn rewrite_class(&mut self, class: &ClassDecl) -> Result<ClassDecl, InjectError> {
        let mut members = Vec::with_capacity(class.members.len());
        for member in &class.members {
            let rewritten = match member {
                Member::Method(method) => Member::Method(self.rewrite_method(&class.name, method)?),
                Member::Constructor(ctor) => {
                    Member::Constructor(self.rewrite_constructor(&class.name, ctor)?)
                }
                Member::Class(nested) if self.registry.declares_class(&nested.name) => {
                    Member::Class(self.rewrite_class(nested)?)
                }
                other => other.clone(),
            };
            members.push(rewritten);
        }
        Ok(ClassDecl {
            members,
            ..class.clone()
        })
    }

    fn rewrite_method(&mut self, class: &str, method: &MethodDecl) -> Result<MethodDecl, InjectError> {
        let mut state = MethodState::new(
            class,
            &method.descriptor(),
            method.modifiers.is_static,
            &method.params,
        );
        let cx = self.context.clone();
        let body = self.rewrite_stmts(&method.body, &mut state, &cx)?;
        Ok(MethodDecl {
            body,
            ..method.clone()
        })
    }

    fn rewrite_constructor(
        &mut self,
        class: &str,
        ctor: &ConstructorDecl,
    ) -> Result<ConstructorDecl, InjectError> {
        let mut state = MethodState::new(class, &ctor.descriptor(), false, &ctor.params);
        let cx = self.context.clone();
        let body = self.rewrite_stmts(&ctor.body, &mut state, &cx)?;
        Ok(ConstructorDecl {
            body,
            ..ctor.clone()
        })
    }

    fn rewrite_stmts(
        &mut self,
        stmts: &[Stmt],
        state: &mut MethodState,
        cx: &TransformationContext,
    ) -> Result<Vec<Stmt>, InjectError> {
        stmts
            .iter()
            .map(|stmt| self.rewrite_stmt(stmt, state, cx))
            .collect()
    }

    /// Rewrite a statement in its own lexical scope
    fn rewrite_scoped(
        &mut self,
        stmt: &Stmt,
        state: &mut MethodState,
        cx: &TransformationContext,
    ) -> Result<Box<Stmt>, InjectError> {
        state.scope.push();
        let result = self.rewrite_stmt(stmt, state, cx);
        state.scope.pop();
        result.map(Box::new)
    }

    fn rewrite_stmt(
        &mut self,
        stmt: &Stmt,
        state: &mut MethodState,
        cx: &TransformationContext,
    ) -> Result<Stmt, InjectError> {
        if self.too_deep(cx, stmt_span(stmt), state) {
            if let Stmt::Local { name, ty, .. } = stmt {
                state.scope.declare(name, Some(ty.clone()));
            }
            return Ok(stmt.clone());
        }
        let inner = cx.descend();
        Ok(match stmt {
            Stmt::Local {
                name,
                ty,
                init,
                span,
            } => {
                let init = match init {
                    Some(init) => Some(self.rewrite_expr(init, state, &inner)?),
                    None => None,
                };
                state.scope.declare(name, Some(ty.clone()));
                Stmt::Local {
                    name: name.clone(),
                    ty: ty.clone(),
                    init,
                    span: *span,
                }
            }
            Stmt::Expr(expr) => Stmt::Expr(self.rewrite_expr(expr, state, &inner)?),
            Stmt::Return { value, span } => Stmt::Return {
                value: match value {
                    Some(value) => Some(self.rewrite_expr(value, state, &inner)?),
                    None => None,
                },
                span: *span,
            },
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => Stmt::If {
                condition: self.rewrite_expr(condition, state, &inner)?,
                then_branch: self.rewrite_scoped(then_branch, state, &inner)?,
                else_branch: match else_branch {
                    Some(stmt) => Some(self.rewrite_scoped(stmt, state, &inner)?),
                    None => None,
                },
            },
            Stmt::While { condition, body } => Stmt::While {
                condition: self.rewrite_expr(condition, state, &inner)?,
                body: self.rewrite_scoped(body, state, &inner)?,
            },
            Stmt::Block(stmts) => {
                state.scope.push();
                let result = self.rewrite_stmts(stmts, state, &inner);
                state.scope.pop();
                Stmt::Block(result?)
            }
            Stmt::Throw { value, span } => Stmt::Throw {
                value: self.rewrite_expr(value, state, &inner)?,
                span: *span,
            },
            Stmt::Try {
                body,
                catch_type,
                catch_var,
                handler,
            } => {
                state.scope.push();
                let body = self.rewrite_stmts(body, state, &inner);
                state.scope.pop();
                state.scope.push();
                state
                    .scope
                    .declare(catch_var, Some(TypeRef::class(catch_type)));
                let handler = self.rewrite_stmts(handler, state, &inner);
                state.scope.pop();
                Stmt::Try {
                    body: body?,
                    catch_type: catch_type.clone(),
                    catch_var: catch_var.clone(),
                    handler: handler?,
                }
            }
        })
    }

    /// At the nesting limit the node is kept as written and reported
    fn too_deep(&mut self, cx: &TransformationContext, span: Span, state: &MethodState) -> bool {
        if !cx.at_max_depth() {
            return false;
        }
        let reason = format!(
            "nesting deeper than {} in {} left uninstrumented",
            cx.max_depth, state.ctx.descriptor
        );
        warn!(class = %state.ctx.class, at = %span, "{}", reason);
        self.too_deep.push(SkippedNode {
            class: state.ctx.class.clone(),
            span,
            reason,
        });
        true
    }

    fn rewrite_boxed(
        &mut self,
        expr: &Expr,
        state: &mut MethodState,
        cx: &TransformationContext,
    ) -> Result<Box<Expr>, InjectError> {
        self.rewrite_expr(expr, state, cx).map(Box::new)
    }

    fn rewrite_all(
        &mut self,
        exprs: &[Expr],
        state: &mut MethodState,
        cx: &TransformationContext,
    ) -> Result<Vec<Expr>, InjectError> {
        exprs
            .iter()
            .map(|e| self.rewrite_expr(e, state, cx))
            .collect()
    }

    fn rewrite_expr(
        &mut self,
        expr: &Expr,
        state: &mut MethodState,
        cx: &TransformationContext,
    ) -> Result<Expr, InjectError> {
        if self.too_deep(cx, expr.span().unwrap_or_default(), state) {
            return Ok(expr.clone());
        }
        // Decide on the original node, before its children change shape
        let candidate = self.selector.classify(expr, &state.ctx, &state.scope);
        let inner = cx.descend();

        match expr {
            Expr::Call {
                receiver,
                method,
                args,
                span,
            } => {
                let class_receiver = receiver
                    .as_deref()
                    .is_some_and(|r| self.selector.is_class_reference(r, &state.ctx, &state.scope));
                let receiver = match receiver {
                    Some(r) => Some(self.rewrite_expr(r, state, &inner)?),
                    None => None,
                };
                let args = self.rewrite_all(args, state, &inner)?;
                match candidate {
                    Some(candidate) => {
                        self.guard_call(candidate, receiver, class_receiver, method, args, *span, state)
                    }
                    None => Ok(Expr::Call {
                        receiver: receiver.map(Box::new),
                        method: method.clone(),
                        args,
                        span: *span,
                    }),
                }
            }
            Expr::New { class, args, span } => {
                let args = self.rewrite_all(args, state, &inner)?;
                match candidate {
                    Some(candidate) => self.guard_new(candidate, class, args, *span, state),
                    None => Ok(Expr::New {
                        class: class.clone(),
                        args,
                        span: *span,
                    }),
                }
            }
            Expr::Name { span, .. } => match candidate {
                Some(candidate) => self.guard_read(candidate, expr.clone(), *span, state),
                None => Ok(expr.clone()),
            },
            Expr::Field { target, name, span } => match candidate {
                // The target is a bare class name: nothing to rewrite under it
                Some(candidate) => self.guard_read(candidate, expr.clone(), *span, state),
                None => Ok(Expr::Field {
                    target: self.rewrite_boxed(target, state, &inner)?,
                    name: name.clone(),
                    span: *span,
                }),
            },
            Expr::Literal(_) | Expr::This => Ok(expr.clone()),
            Expr::Index { target, index } => Ok(Expr::Index {
                target: self.rewrite_boxed(target, state, &inner)?,
                index: self.rewrite_boxed(index, state, &inner)?,
            }),
            Expr::NewArray { elem, elements } => Ok(Expr::NewArray {
                elem: elem.clone(),
                elements: self.rewrite_all(elements, state, &inner)?,
            }),
            Expr::ListLiteral { elements } => Ok(Expr::ListLiteral {
                elements: self.rewrite_all(elements, state, &inner)?,
            }),
            Expr::Binary { op, left, right } => {
                // A left-associative chain like `a + b + c` is one level deep
                let left_cx = if matches!(**left, Expr::Binary { .. }) {
                    cx
                } else {
                    &inner
                };
                Ok(Expr::Binary {
                    op: *op,
                    left: self.rewrite_boxed(left, state, left_cx)?,
                    right: self.rewrite_boxed(right, state, &inner)?,
                })
            }
            Expr::Unary { op, operand } => Ok(Expr::Unary {
                op: *op,
                operand: self.rewrite_boxed(operand, state, &inner)?,
            }),
            Expr::Assign { target, value } => {
                // Writes are never sites; only reads inside the target are
                let target = match target {
                    LValue::Name { .. } => target.clone(),
                    LValue::Field {
                        target: object,
                        name,
                        span,
                    } => {
                        let object = if self.selector.is_class_reference(object, &state.ctx, &state.scope) {
                            object.clone()
                        } else {
                            self.rewrite_boxed(object, state, &inner)?
                        };
                        LValue::Field {
                            target: object,
                            name: name.clone(),
                            span: *span,
                        }
                    }
                    LValue::Index { target, index } => LValue::Index {
                        target: self.rewrite_boxed(target, state, &inner)?,
                        index: self.rewrite_boxed(index, state, &inner)?,
                    },
                };
                Ok(Expr::Assign {
                    target,
                    value: self.rewrite_boxed(value, state, &inner)?,
                })
            }
            // Already rewritten; left alone
            Expr::Let { .. } | Expr::Guarded(_) => Ok(expr.clone()),
        }
    }

    /// Bind `value` to a fresh temporary unless evaluating it again is harmless
    fn bind(&self, value: Expr, state: &mut MethodState, bindings: &mut Bindings) -> Expr {
        if value.is_repeatable() {
            return value;
        }
        let name = format!("{}{}", TEMP_PREFIX, state.temps);
        state.temps += 1;
        let ty = self.selector.infer(&value, &state.ctx, &state.scope);
        bindings.0.push((name.clone(), ty, value));
        Expr::Name {
            name,
            span: Span::default(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn guard_call(
        &mut self,
        candidate: Candidate,
        receiver: Option<Expr>,
        class_receiver: bool,
        method: &str,
        args: Vec<Expr>,
        span: Span,
        state: &mut MethodState,
    ) -> Result<Expr, InjectError> {
        let mut bindings = Bindings::default();
        let receiver = receiver.map(|r| {
            if class_receiver {
                r
            } else {
                self.bind(r, state, &mut bindings)
            }
        });
        let args: Vec<Expr> = args
            .into_iter()
            .map(|a| self.bind(a, state, &mut bindings))
            .collect();

        let site = self.record(&candidate, args.len(), span, state)?;
        let guard = Guard {
            site,
            scope: state.guard_scope(),
            args: args.clone(),
            result: candidate.result_type(),
            fallback: Box::new(Expr::Call {
                receiver: receiver.map(Box::new),
                method: method.to_string(),
                args,
                span,
            }),
        };
        Ok(bindings.wrap(Expr::Guarded(Box::new(guard))))
    }

    fn guard_new(
        &mut self,
        candidate: Candidate,
        class: &str,
        args: Vec<Expr>,
        span: Span,
        state: &mut MethodState,
    ) -> Result<Expr, InjectError> {
        let mut bindings = Bindings::default();
        let args: Vec<Expr> = args
            .into_iter()
            .map(|a| self.bind(a, state, &mut bindings))
            .collect();

        let site = self.record(&candidate, args.len(), span, state)?;
        let guard = Guard {
            site,
            scope: state.guard_scope(),
            args: args.clone(),
            result: candidate.result_type(),
            fallback: Box::new(Expr::New {
                class: class.to_string(),
                args,
                span,
            }),
        };
        Ok(bindings.wrap(Expr::Guarded(Box::new(guard))))
    }

    fn guard_read(
        &mut self,
        candidate: Candidate,
        original: Expr,
        span: Span,
        state: &mut MethodState,
    ) -> Result<Expr, InjectError> {
        let site = self.record(&candidate, 0, span, state)?;
        Ok(Expr::Guarded(Box::new(Guard {
            site,
            scope: state.guard_scope(),
            args: Vec::new(),
            result: candidate.result_type(),
            fallback: Box::new(original),
        })))
    }

    fn record(
        &mut self,
        candidate: &Candidate,
        arity: usize,
        span: Span,
        state: &mut MethodState,
    ) -> Result<SiteId, InjectError> {
        let target = candidate.target(arity);
        let id = state.ids.next(candidate.kind(), &target);
        if !self.seen.insert(id.clone()) {
            return Err(InjectError::DuplicateSite(id));
        }
        debug!(site = %id, at = %span, "injection site");
        self.manifest.push(InjectionSite {
            id: id.clone(),
            kind: candidate.kind(),
            class: state.ctx.class.clone(),
            enclosing_method: state.ctx.descriptor.clone(),
            span,
            target,
            result: candidate.result_type(),
            scope: state.guard_scope(),
        });
        Ok(id)
    }
}

fn stmt_span(stmt: &Stmt) -> Span {
    match stmt {
        Stmt::Local { span, .. } | Stmt::Return { span, .. } | Stmt::Throw { span, .. } => *span,
        _ => Span::default(),
    }
}
