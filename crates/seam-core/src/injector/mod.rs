/*!
# Injector - Seam Injection Engine

Two-pass rewrite of one top-level class:

1. [`RegistryBuilder`] catalogs the methods, constructors and fields the
   class (and its nested classes) declare.
2. [`InjectionRewriter`] walks every method and constructor body and replaces
   each selected call, construction and static field read with a guarded
   expression that consults the override table before falling back to the
   original.

The result is the rewritten class plus a [`SiteManifest`] listing every site.
No I/O happens here; the build driver and the load-time agent both call in.

## Example Usage

```rust,ignore
use seam_core::injector::{Injector, UnitIndex};

let index = UnitIndex::new(&unit);
let result = Injector::new(&index).instrument_class(unit.class("Shop").unwrap())?;
for site in &result.manifest {
    println!("{} -> {}", site.id, site.target);
}
```
*/

pub mod resolve;
pub mod rewriter;
pub mod selector;
pub mod site;

#[cfg(test)]
mod tests;

use thiserror::Error;
use tracing::info;

use crate::ast::{ClassDecl, Expr, LValue, Member, SiteId, Stmt};
use crate::registry::{RegistryBuilder, SkippedNode};

pub use resolve::{select_overload, Resolution, TypeResolver, UnitIndex};
pub use rewriter::InjectionRewriter;
pub use selector::{Candidate, CandidateInfo, LocalScope, MethodContext, SiteSelector};
pub use site::{InjectionSite, ManifestOrigin, SiteKind, SiteManifest};

/// Nesting limit for statements and expressions during a rewrite
pub const DEFAULT_MAX_DEPTH: usize = 100;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InjectError {
    #[error("duplicate injection site identifier {0}")]
    DuplicateSite(SiteId),

    #[error("{class}: manifest lists {manifest} sites but the rewritten tree holds {guards}")]
    GuardMismatch {
        class: String,
        manifest: usize,
        guards: usize,
    },
}

/// Nesting position of the rewrite pass
#[derive(Debug, Clone)]
pub struct TransformationContext {
    pub current_depth: usize,
    pub max_depth: usize,
}

impl Default for TransformationContext {
    fn default() -> Self {
        Self {
            current_depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl TransformationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn descend(&self) -> Self {
        Self {
            current_depth: self.current_depth + 1,
            max_depth: self.max_depth,
        }
    }

    pub fn at_max_depth(&self) -> bool {
        self.current_depth >= self.max_depth
    }
}

/// Rewritten class plus everything learned while rewriting it
#[derive(Debug, Clone)]
pub struct RewriteResult {
    pub class: ClassDecl,
    pub manifest: SiteManifest,
    /// Members the registry pass left out, and code nested too deeply to rewrite
    pub skipped: Vec<SkippedNode>,
}

impl RewriteResult {
    pub fn is_modified(&self) -> bool {
        !self.manifest.is_empty()
    }
}

/// Entry point of the engine for one class at a time
pub struct Injector<'r> {
    resolver: &'r dyn TypeResolver,
    max_depth: usize,
    origin: ManifestOrigin,
}

impl<'r> Injector<'r> {
    pub fn new(resolver: &'r dyn TypeResolver) -> Self {
        Self {
            resolver,
            max_depth: DEFAULT_MAX_DEPTH,
            origin: ManifestOrigin::BuildTime,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_origin(mut self, origin: ManifestOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Registry pass, then rewrite pass, then a consistency check between
    /// the manifest and the guards actually placed in the tree.
    pub fn instrument_class(&self, class: &ClassDecl) -> Result<RewriteResult, InjectError> {
        let registry = RegistryBuilder::new().build(class);

        let context = TransformationContext::new().with_max_depth(self.max_depth);

        let mut rewriter = InjectionRewriter::new(&registry, self.resolver, context, self.origin);
        let rewritten = rewriter.rewrite_class(class)?;
        let (manifest, too_deep) = rewriter.into_parts();
        let mut skipped = registry.skipped().to_vec();
        skipped.extend(too_deep);

        let guards = count_guards(&rewritten);
        if guards != manifest.len() {
            return Err(InjectError::GuardMismatch {
                class: class.name.clone(),
                manifest: manifest.len(),
                guards,
            });
        }

        info!(
            class = %class.name,
            sites = manifest.len(),
            skipped = skipped.len(),
            "instrumented class"
        );

        Ok(RewriteResult {
            class: rewritten,
            manifest,
            skipped,
        })
    }

    /// List candidates without rewriting anything
    pub fn candidates(&self, class: &ClassDecl) -> Vec<CandidateInfo> {
        let registry = RegistryBuilder::new().build(class);
        SiteSelector::new(&registry, self.resolver).enumerate(class)
    }
}

/// Number of `Guarded` nodes in a class and its nested classes
pub fn count_guards(class: &ClassDecl) -> usize {
    class
        .members
        .iter()
        .map(|member| match member {
            Member::Method(method) => method.body.iter().map(count_in_stmt).sum(),
            Member::Constructor(ctor) => ctor.body.iter().map(count_in_stmt).sum(),
            Member::Class(nested) => count_guards(nested),
            Member::Field(_) | Member::Malformed { .. } => 0,
        })
        .sum()
}

fn count_in_stmt(stmt: &Stmt) -> usize {
    match stmt {
        Stmt::Local { init, .. } => init.as_ref().map_or(0, count_in_expr),
        Stmt::Expr(expr) | Stmt::Throw { value: expr, .. } => count_in_expr(expr),
        Stmt::Return { value, .. } => value.as_ref().map_or(0, count_in_expr),
        Stmt::If {
            condition,
            then_branch,
            else_branch,
        } => {
            count_in_expr(condition)
                + count_in_stmt(then_branch)
                + else_branch.as_deref().map_or(0, count_in_stmt)
        }
        Stmt::While { condition, body } => count_in_expr(condition) + count_in_stmt(body),
        Stmt::Block(stmts) => stmts.iter().map(count_in_stmt).sum(),
        Stmt::Try { body, handler, .. } => body
            .iter()
            .chain(handler.iter())
            .map(count_in_stmt)
            .sum(),
    }
}

fn count_in_expr(expr: &Expr) -> usize {
    let sum = |exprs: &[Expr]| exprs.iter().map(count_in_expr).sum::<usize>();
    match expr {
        Expr::Literal(_) | Expr::This | Expr::Name { .. } => 0,
        Expr::Field { target, .. } => count_in_expr(target),
        Expr::Index { target, index } => count_in_expr(target) + count_in_expr(index),
        Expr::Call { receiver, args, .. } => {
            receiver.as_deref().map_or(0, count_in_expr) + sum(args)
        }
        Expr::New { args, .. } => sum(args),
        Expr::NewArray { elements, .. } | Expr::ListLiteral { elements } => sum(elements),
        Expr::Binary { left, right, .. } => count_in_expr(left) + count_in_expr(right),
        Expr::Unary { operand, .. } => count_in_expr(operand),
        Expr::Assign { target, value } => {
            let target = match target {
                LValue::Name { .. } => 0,
                LValue::Field { target, .. } => count_in_expr(target),
                LValue::Index { target, index } => count_in_expr(target) + count_in_expr(index),
            };
            target + count_in_expr(value)
        }
        Expr::Let { init, body, .. } => count_in_expr(init) + count_in_expr(body),
        Expr::Guarded(guard) => 1 + sum(&guard.args) + count_in_expr(&guard.fallback),
    }
}
