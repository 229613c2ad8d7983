// Runtime values

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::ast::TypeRef;

/// Identity of an object instance for the lifetime of a runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An object: identity, class lineage and mutable fields
#[derive(Debug)]
pub struct Instance {
    pub id: ObjectId,
    pub class: String,
    /// The class itself followed by its ancestors, nearest first
    pub lineage: Vec<String>,
    fields: RwLock<IndexMap<String, Value>>,
}

impl Instance {
    pub fn new(id: ObjectId, class: &str, lineage: Vec<String>) -> Self {
        Self {
            id,
            class: class.to_string(),
            lineage,
            fields: RwLock::new(IndexMap::new()),
        }
    }

    pub fn get_field(&self, name: &str) -> Option<Value> {
        self.fields.read().get(name).cloned()
    }

    pub fn set_field(&self, name: &str, value: Value) {
        self.fields.write().insert(name.to_string(), value);
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.read().contains_key(name)
    }

    pub fn is_instance_of(&self, class: &str) -> bool {
        self.lineage.iter().any(|c| c == class)
    }
}

pub type SharedVec<T> = Arc<RwLock<Vec<T>>>;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    /// Result of a `void` call
    Unit,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(SharedVec<Value>),
    Map(SharedVec<(Value, Value)>),
    Array {
        elem: TypeRef,
        items: SharedVec<Value>,
    },
    Object(Arc<Instance>),
}

impl Value {
    pub fn string(s: &str) -> Self {
        Value::String(s.to_string())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(RwLock::new(items)))
    }

    pub fn map(entries: Vec<(Value, Value)>) -> Self {
        Value::Map(Arc::new(RwLock::new(entries)))
    }

    pub fn array(elem: TypeRef, items: Vec<Value>) -> Self {
        Value::Array {
            elem,
            items: Arc::new(RwLock::new(items)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Value::Object(instance) => Some(instance.id),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Arc<Instance>> {
        match self {
            Value::Object(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Unit => "void".to_string(),
            Value::Boolean(_) => "boolean".to_string(),
            Value::Integer(_) => "int".to_string(),
            Value::Float(_) => "double".to_string(),
            Value::String(_) => "String".to_string(),
            Value::List(_) => "List".to_string(),
            Value::Map(_) => "Map".to_string(),
            Value::Array { elem, .. } => format!("{elem}[]"),
            Value::Object(instance) => instance.class.clone(),
        }
    }

    /// Exact runtime type; `None` for null
    pub fn runtime_type(&self) -> Option<TypeRef> {
        match self {
            Value::Null => None,
            Value::Unit => Some(TypeRef::Void),
            Value::Boolean(_) => Some(TypeRef::Boolean),
            Value::Integer(_) => Some(TypeRef::Int),
            Value::Float(_) => Some(TypeRef::Double),
            Value::String(_) => Some(TypeRef::Str),
            Value::List(_) => Some(TypeRef::List),
            Value::Map(_) => Some(TypeRef::Map),
            Value::Array { elem, .. } => Some(TypeRef::array_of(elem.clone())),
            Value::Object(instance) => Some(TypeRef::class(&instance.class)),
        }
    }

    /// `instanceof` semantics: null is never an instance of anything
    pub fn is_instance_of(&self, ty: &TypeRef) -> bool {
        match (self, ty) {
            (Value::Null | Value::Unit, _) => false,
            (_, TypeRef::Object) => true,
            (Value::Boolean(_), TypeRef::Boolean)
            | (Value::Integer(_), TypeRef::Int)
            | (Value::Float(_), TypeRef::Double)
            | (Value::String(_), TypeRef::Str)
            | (Value::List(_), TypeRef::List)
            | (Value::Map(_), TypeRef::Map) => true,
            (Value::Array { elem, .. }, TypeRef::Array(expected)) => elem == expected.as_ref(),
            (Value::Object(instance), TypeRef::Class(class)) => instance.is_instance_of(class),
            _ => false,
        }
    }

    /// Whether the value can be passed where `ty` is declared
    pub fn fits(&self, ty: &TypeRef) -> bool {
        match (self, ty) {
            (Value::Null, ty) => !ty.is_primitive() && !ty.is_void(),
            (Value::Integer(_), TypeRef::Double) => true,
            _ => self.is_instance_of(ty),
        }
    }

    /// Convert for a slot of type `ty`, widening `int` to `double`.
    /// `None` when the value does not fit.
    pub fn coerce_to(self, ty: &TypeRef) -> Option<Value> {
        match (self, ty) {
            (_, TypeRef::Void) => Some(Value::Unit),
            (Value::Integer(n), TypeRef::Double) => Some(Value::Float(n as f64)),
            (value, ty) if value.fits(ty) => Some(value),
            _ => None,
        }
    }

    /// Structural equality: primitives and strings by value, lists, maps and
    /// arrays element-wise, objects by identity
    pub fn structural_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) | (Value::Unit, Value::Unit) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Arc::ptr_eq(a, b) || elements_eq(&a.read(), &b.read())
            }
            (Value::Array { items: a, .. }, Value::Array { items: b, .. }) => {
                Arc::ptr_eq(a, b) || elements_eq(&a.read(), &b.read())
            }
            (Value::Map(a), Value::Map(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.read(), b.read());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter()
                            .any(|(k2, v2)| k.structural_eq(k2) && v.structural_eq(v2))
                    })
            }
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Reference equality: containers and objects by identity, primitives
    /// and strings by value
    pub fn ref_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            (Value::Array { items: a, .. }, Value::Array { items: b, .. }) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => self.structural_eq(other),
        }
    }

    /// Current elements of a list or array, values of a map
    pub fn elements(&self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) | Value::Array { items, .. } => Some(items.read().clone()),
            Value::Map(entries) => Some(entries.read().iter().map(|(_, v)| v.clone()).collect()),
            _ => None,
        }
    }
}

fn elements_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.structural_eq(y))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.structural_eq(other)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Float(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

fn join(items: &[Value]) -> String {
    items
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Unit => Ok(()),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(d) => {
                if d.fract() == 0.0 && d.is_finite() {
                    write!(f, "{d:.1}")
                } else {
                    write!(f, "{d}")
                }
            }
            Value::String(s) => write!(f, "{s}"),
            Value::List(items) | Value::Array { items, .. } => {
                write!(f, "[{}]", join(&items.read()))
            }
            Value::Map(entries) => {
                let body = entries
                    .read()
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{{{body}}}")
            }
            Value::Object(instance) => match instance.get_field("message") {
                Some(Value::String(message)) if instance.is_instance_of("Exception") => {
                    write!(f, "{}: {}", instance.class, message)
                }
                _ => write!(f, "{}{}", instance.class, instance.id),
            },
        }
    }
}
