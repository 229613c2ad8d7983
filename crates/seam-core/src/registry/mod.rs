/*!
# Method Registry

First pass over a class tree. Catalogs every method, constructor and field
declared directly in the class and in its nested classes, whatever their
visibility. Inherited members are never recorded.

The registry is built fresh for each top-level class and dropped once that
class has been rewritten. It never mutates the tree.
*/

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ast::{
    ClassDecl, ConstructorDecl, FieldDecl, Member, MethodDecl, Param, Span, TypeRef, Visibility,
};


/// Name under which constructors are recorded
pub const CONSTRUCTOR_NAME: &str = "<init>";

/// Immutable description of one declared method or constructor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodSignature {
    pub declaring_type: String,
    pub name: String,
    pub params: Vec<TypeRef>,
    pub return_type: TypeRef,
    pub is_static: bool,
    pub visibility: Visibility,
}

impl MethodSignature {
    pub fn new(declaring_type: &str, name: &str, params: Vec<TypeRef>, return_type: TypeRef) -> Self {
        Self {
            declaring_type: declaring_type.to_string(),
            name: name.to_string(),
            params,
            return_type,
            is_static: false,
            visibility: Visibility::Public,
        }
    }

    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    fn from_method(declaring_type: &str, method: &MethodDecl) -> Self {
        Self {
            declaring_type: declaring_type.to_string(),
            name: method.name.clone(),
            params: param_types(&method.params),
            return_type: method.return_type.clone(),
            is_static: method.modifiers.is_static,
            visibility: method.modifiers.visibility,
        }
    }

    fn from_constructor(declaring_type: &str, ctor: &ConstructorDecl) -> Self {
        Self {
            declaring_type: declaring_type.to_string(),
            name: CONSTRUCTOR_NAME.to_string(),
            params: param_types(&ctor.params),
            return_type: TypeRef::class(declaring_type),
            is_static: false,
            visibility: ctor.modifiers.visibility,
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }

    /// `price(int,String)`
    pub fn descriptor(&self) -> String {
        let params = self
            .params
            .iter()
            .map(TypeRef::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!("{}({})", self.name, params)
    }

    /// `Widget.price(int,String)`, the target form used in site identifiers
    pub fn target(&self) -> String {
        format!("{}.{}", self.declaring_type, self.descriptor())
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_static {
            write!(f, "static ")?;
        }
        write!(f, "{} {}", self.return_type, self.target())
    }
}

fn param_types(params: &[Param]) -> Vec<TypeRef> {
    params.iter().map(|p| p.ty.clone()).collect()
}

/// A declared field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldSignature {
    pub declaring_type: String,
    pub name: String,
    pub ty: TypeRef,
    pub is_static: bool,
    pub visibility: Visibility,
}

impl FieldSignature {
    fn from_field(declaring_type: &str, field: &FieldDecl) -> Self {
        Self {
            declaring_type: declaring_type.to_string(),
            name: field.name.clone(),
            ty: field.ty.clone(),
            is_static: field.modifiers.is_static,
            visibility: field.modifiers.visibility,
        }
    }

    /// `Widget.counter`
    pub fn target(&self) -> String {
        format!("{}.{}", self.declaring_type, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodMetadata {
    pub span: Span,
    /// Position among the members of its declaring class
    pub ordinal: usize,
}

/// A member left out of the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedNode {
    pub class: String,
    pub span: Span,
    pub reason: String,
}

/// Every member declared by one top-level class and its nested classes
#[derive(Debug, Clone, Default)]
pub struct MethodRegistry {
    class_name: String,
    methods: IndexMap<MethodSignature, MethodMetadata>,
    fields: IndexMap<(String, String), FieldSignature>,
    classes: Vec<String>,
    skipped: Vec<SkippedNode>,
}

impl MethodRegistry {
    /// The top-level class this registry was built for
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MethodSignature, &MethodMetadata)> {
        self.methods.iter()
    }

    pub fn contains(&self, signature: &MethodSignature) -> bool {
        self.methods.contains_key(signature)
    }

    pub fn metadata(&self, signature: &MethodSignature) -> Option<&MethodMetadata> {
        self.methods.get(signature)
    }

    /// Methods (not constructors) named `name` declared on `owner`
    pub fn methods_named<'a>(
        &'a self,
        owner: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a MethodSignature> + 'a {
        self.methods
            .keys()
            .filter(move |sig| sig.declaring_type == owner && sig.name == name)
    }

    pub fn constructors_of<'a>(
        &'a self,
        owner: &'a str,
    ) -> impl Iterator<Item = &'a MethodSignature> + 'a {
        self.methods_named(owner, CONSTRUCTOR_NAME)
    }

    pub fn field(&self, owner: &str, name: &str) -> Option<&FieldSignature> {
        self.fields.get(&(owner.to_string(), name.to_string()))
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldSignature> {
        self.fields.values()
    }

    /// True for the top-level class and every nested class it declares
    pub fn declares_class(&self, name: &str) -> bool {
        self.classes.iter().any(|c| c == name)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Members that were malformed and left out
    pub fn skipped(&self) -> &[SkippedNode] {
        &self.skipped
    }
}

/// Builds a [`MethodRegistry`] in one pass over a class tree
#[derive(Debug, Default, Clone)]
pub struct RegistryBuilder {
    include_nested: bool,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            include_nested: true,
        }
    }

    /// Whether nested class declarations are catalogued too (the default)
    pub fn include_nested(mut self, include: bool) -> Self {
        self.include_nested = include;
        self
    }

    pub fn build(&self, class: &ClassDecl) -> MethodRegistry {
        let mut registry = MethodRegistry {
            class_name: class.name.clone(),
            ..Default::default()
        };
        self.visit_class(class, &mut registry);
        debug!(
            class = %class.name,
            methods = registry.methods.len(),
            fields = registry.fields.len(),
            skipped = registry.skipped.len(),
            "built method registry"
        );
        registry
    }

    fn visit_class(&self, class: &ClassDecl, registry: &mut MethodRegistry) {
        if registry.declares_class(&class.name) {
            skip(
                registry,
                &class.name,
                class.span,
                format!("duplicate nested class name '{}'", class.name),
            );
            return;
        }
        registry.classes.push(class.name.clone());

        for (ordinal, member) in class.members.iter().enumerate() {
            match member {
                Member::Method(method) => {
                    if let Some(reason) = malformed_params(&method.params) {
                        skip(registry, &class.name, method.span, reason);
                        continue;
                    }
                    let signature = MethodSignature::from_method(&class.name, method);
                    insert_method(registry, signature, method.span, ordinal);
                }
                Member::Constructor(ctor) => {
                    if let Some(reason) = malformed_params(&ctor.params) {
                        skip(registry, &class.name, ctor.span, reason);
                        continue;
                    }
                    let signature = MethodSignature::from_constructor(&class.name, ctor);
                    insert_method(registry, signature, ctor.span, ordinal);
                }
                Member::Field(field) => {
                    if field.ty.is_void() {
                        skip(
                            registry,
                            &class.name,
                            field.span,
                            format!("field '{}' declared void", field.name),
                        );
                        continue;
                    }
                    let key = (class.name.clone(), field.name.clone());
                    if registry.fields.contains_key(&key) {
                        skip(
                            registry,
                            &class.name,
                            field.span,
                            format!("duplicate field '{}'", field.name),
                        );
                        continue;
                    }
                    registry
                        .fields
                        .insert(key, FieldSignature::from_field(&class.name, field));
                }
                Member::Class(nested) => {
                    if self.include_nested {
                        self.visit_class(nested, registry);
                    }
                }
                Member::Malformed { span, reason, .. } => {
                    skip(registry, &class.name, *span, reason.clone());
                }
            }
        }
    }
}

fn insert_method(
    registry: &mut MethodRegistry,
    signature: MethodSignature,
    span: Span,
    ordinal: usize,
) {
    if registry.methods.contains_key(&signature) {
        let reason = format!("duplicate declaration of {}", signature.descriptor());
        skip(registry, &signature.declaring_type.clone(), span, reason);
        return;
    }
    registry
        .methods
        .insert(signature, MethodMetadata { span, ordinal });
}

fn malformed_params(params: &[Param]) -> Option<String> {
    if let Some(param) = params.iter().find(|p| p.ty.is_void()) {
        return Some(format!("parameter '{}' declared void", param.name));
    }
    for (i, param) in params.iter().enumerate() {
        if params[..i].iter().any(|p| p.name == param.name) {
            return Some(format!("duplicate parameter '{}'", param.name));
        }
    }
    None
}

fn skip(registry: &mut MethodRegistry, class: &str, span: Span, reason: String) {
    warn!(class = %class, at = %span, "skipping malformed member: {}", reason);
    registry.skipped.push(SkippedNode {
        class: class.to_string(),
        span,
        reason,
    });
}
