// Type information from outside the class being rewritten, and overload
// selection shared by the selector and the runtime.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::ast::{ClassDecl, CompilationUnit, Member, TypeRef};
use crate::registry::{FieldSignature, MethodSignature, RegistryBuilder};

/// Answers questions about classes other than the one being rewritten
pub trait TypeResolver: Send + Sync {
    /// Whether `name` denotes a class (user or library)
    fn is_class(&self, name: &str) -> bool;

    /// Whether constructions of `class` are rewrite candidates everywhere
    fn is_opted_in(&self, class: &str) -> bool;

    fn superclass(&self, class: &str) -> Option<String>;

    /// Declared methods of `class` named `name`, static or not
    fn methods(&self, class: &str, name: &str) -> Vec<MethodSignature>;

    fn constructors(&self, class: &str) -> Vec<MethodSignature>;

    fn field(&self, class: &str, name: &str) -> Option<FieldSignature>;
}

/// Library statics the engine knows the signatures of
fn library_statics() -> Vec<MethodSignature> {
    let int = || TypeRef::Int;
    let double = || TypeRef::Double;
    let stat = |class: &str, name: &str, params: Vec<TypeRef>, ret: TypeRef| {
        MethodSignature::new(class, name, params, ret).with_static(true)
    };
    vec![
        stat("Math", "max", vec![int(), int()], int()),
        stat("Math", "max", vec![double(), double()], double()),
        stat("Math", "min", vec![int(), int()], int()),
        stat("Math", "min", vec![double(), double()], double()),
        stat("Math", "abs", vec![int()], int()),
        stat("Math", "abs", vec![double()], double()),
        stat("String", "valueOf", vec![TypeRef::Object], TypeRef::Str),
        stat("Integer", "parseInt", vec![TypeRef::Str], int()),
    ]
}

const LIBRARY_CLASSES: &[&str] = &[
    "Math",
    "String",
    "Integer",
    "Object",
    "Exception",
    "RuntimeException",
    "ArithmeticException",
    "NullPointerException",
    "ClassCastException",
    "IllegalStateException",
    "IllegalArgumentException",
    "IndexOutOfBoundsException",
    "NumberFormatException",
];

#[derive(Debug, Clone, Default)]
struct ClassShape {
    superclass: Option<String>,
    methods: Vec<MethodSignature>,
    fields: Vec<FieldSignature>,
}

/// Resolver over every class declared in one compilation unit, nested
/// classes included, plus the known library statics.
#[derive(Debug, Clone, Default)]
pub struct UnitIndex {
    classes: IndexMap<String, ClassShape>,
    opted_in: HashSet<String>,
    library: Vec<MethodSignature>,
}

impl UnitIndex {
    pub fn new(unit: &CompilationUnit) -> Self {
        let mut index = Self {
            library: library_statics(),
            ..Default::default()
        };
        for class in &unit.classes {
            index.add_class(class);
        }
        index
    }

    /// Mark classes whose constructions are rewritten wherever they occur
    pub fn with_opted_in<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.opted_in.extend(classes.into_iter().map(Into::into));
        self
    }

    fn add_class(&mut self, class: &ClassDecl) {
        let registry = RegistryBuilder::new().include_nested(false).build(class);
        let shape = ClassShape {
            superclass: class.superclass.clone(),
            methods: registry.iter().map(|(sig, _)| sig.clone()).collect(),
            fields: registry.fields().cloned().collect(),
        };
        self.classes.entry(class.name.clone()).or_insert(shape);
        for member in &class.members {
            if let Member::Class(nested) = member {
                self.add_class(nested);
            }
        }
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}

impl TypeResolver for UnitIndex {
    fn is_class(&self, name: &str) -> bool {
        self.classes.contains_key(name) || LIBRARY_CLASSES.contains(&name)
    }

    fn is_opted_in(&self, class: &str) -> bool {
        self.opted_in.contains(class)
    }

    fn superclass(&self, class: &str) -> Option<String> {
        match self.classes.get(class) {
            Some(shape) => shape.superclass.clone(),
            None => builtin_superclass(class).map(str::to_string),
        }
    }

    fn methods(&self, class: &str, name: &str) -> Vec<MethodSignature> {
        match self.classes.get(class) {
            Some(shape) => shape
                .methods
                .iter()
                .filter(|m| m.name == name && !m.is_constructor())
                .cloned()
                .collect(),
            None => self
                .library
                .iter()
                .filter(|m| m.declaring_type == class && m.name == name)
                .cloned()
                .collect(),
        }
    }

    fn constructors(&self, class: &str) -> Vec<MethodSignature> {
        self.classes
            .get(class)
            .map(|shape| {
                shape
                    .methods
                    .iter()
                    .filter(|m| m.is_constructor())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn field(&self, class: &str, name: &str) -> Option<FieldSignature> {
        self.classes
            .get(class)
            .and_then(|shape| shape.fields.iter().find(|f| f.name == name).cloned())
    }
}

/// Parent of a built-in exception class
pub fn builtin_superclass(class: &str) -> Option<&'static str> {
    match class {
        "Exception" => None,
        "RuntimeException" => Some("Exception"),
        "ArithmeticException"
        | "NullPointerException"
        | "ClassCastException"
        | "IllegalStateException"
        | "IllegalArgumentException"
        | "IndexOutOfBoundsException" => Some("RuntimeException"),
        "NumberFormatException" => Some("IllegalArgumentException"),
        _ => None,
    }
}

/// Whether `class` is `ancestor` or inherits from it
pub fn is_subclass(resolver: &dyn TypeResolver, class: &str, ancestor: &str) -> bool {
    let mut current = Some(class.to_string());
    let mut steps = 0;
    while let Some(name) = current {
        if name == ancestor {
            return true;
        }
        steps += 1;
        if steps > 64 {
            return false;
        }
        current = resolver.superclass(&name);
    }
    false
}

/// Assignment compatibility of a statically inferred argument type
pub fn is_assignable(resolver: &dyn TypeResolver, arg: &TypeRef, param: &TypeRef) -> bool {
    match (arg, param) {
        (a, p) if a == p => true,
        (TypeRef::Void, _) => false,
        (_, TypeRef::Object) => true,
        (TypeRef::Int, TypeRef::Double) => true,
        (TypeRef::Class(a), TypeRef::Class(p)) => is_subclass(resolver, a, p),
        _ => false,
    }
}

/// Outcome of picking one overload for a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(MethodSignature),
    /// No declared overload fits
    Unresolved,
    /// More than one overload fits equally well
    Ambiguous,
}

impl Resolution {
    pub fn resolved(self) -> Option<MethodSignature> {
        match self {
            Resolution::Resolved(sig) => Some(sig),
            _ => None,
        }
    }
}

/// Pick the overload a call with these argument types binds to.
///
/// Filters by arity, then by assignability (an unknown argument type fits
/// anything). Among several survivors, the single candidate whose known
/// argument types all match exactly wins; otherwise the call is ambiguous.
pub fn select_overload<'a, I>(
    resolver: &dyn TypeResolver,
    candidates: I,
    args: &[Option<TypeRef>],
) -> Resolution
where
    I: IntoIterator<Item = &'a MethodSignature>,
{
    let applicable: Vec<&MethodSignature> = candidates
        .into_iter()
        .filter(|sig| sig.arity() == args.len())
        .filter(|sig| {
            sig.params.iter().zip(args).all(|(param, arg)| match arg {
                Some(arg) => is_assignable(resolver, arg, param),
                None => true,
            })
        })
        .collect();

    match applicable.len() {
        0 => Resolution::Unresolved,
        1 => Resolution::Resolved(applicable[0].clone()),
        _ => {
            let exact: Vec<&&MethodSignature> = applicable
                .iter()
                .filter(|sig| {
                    sig.params.iter().zip(args).all(|(param, arg)| match arg {
                        Some(arg) => arg == param,
                        None => false,
                    })
                })
                .collect();
            if exact.len() == 1 {
                Resolution::Resolved((*exact[0]).clone())
            } else {
                Resolution::Ambiguous
            }
        }
    }
}
