//! Argument matchers for override registration.
//!
//! A matcher is a pure predicate over one argument value plus a description
//! for diagnostics. Container matchers read the container's current elements
//! at match time, so mutating a list after the matcher was built changes the
//! outcome.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::ast::TypeRef;
use crate::evaluator::Value;

type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct Matcher {
    description: String,
    predicate: Predicate,
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matcher({})", self.description)
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

impl Matcher {
    fn new(description: impl Into<String>, f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Self {
            description: description.into(),
            predicate: Arc::new(f),
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        (self.predicate)(value)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn and(self, other: Matcher) -> Matcher {
        let description = format!("({} and {})", self.description, other.description);
        Matcher::new(description, move |v| self.matches(v) && other.matches(v))
    }

    pub fn or(self, other: Matcher) -> Matcher {
        let description = format!("({} or {})", self.description, other.description);
        Matcher::new(description, move |v| self.matches(v) || other.matches(v))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Matcher {
        let description = format!("not {}", self.description);
        Matcher::new(description, move |v| !self.matches(v))
    }
}

/// Accepts anything, null included
pub fn any() -> Matcher {
    Matcher::new("any()", |_| true)
}

pub fn any_string() -> Matcher {
    Matcher::new("anyString()", |v| matches!(v, Value::String(_)))
}

/// Any `int` or `double`
pub fn any_number() -> Matcher {
    Matcher::new("anyNumber()", |v| {
        matches!(v, Value::Integer(_) | Value::Float(_))
    })
}

pub fn any_int() -> Matcher {
    Matcher::new("anyInt()", |v| matches!(v, Value::Integer(_)))
}

pub fn any_double() -> Matcher {
    Matcher::new("anyDouble()", |v| matches!(v, Value::Float(_)))
}

pub fn any_boolean() -> Matcher {
    Matcher::new("anyBoolean()", |v| matches!(v, Value::Boolean(_)))
}

pub fn any_array() -> Matcher {
    Matcher::new("anyArray()", |v| matches!(v, Value::Array { .. }))
}

/// An array whose declared component type is exactly `elem`
pub fn any_array_of(elem: TypeRef) -> Matcher {
    Matcher::new(format!("anyArrayOf({elem})"), move |v| match v {
        Value::Array { elem: actual, .. } => *actual == elem,
        _ => false,
    })
}

pub fn any_list() -> Matcher {
    Matcher::new("anyList()", |v| matches!(v, Value::List(_)))
}

/// A list whose current elements are all instances of `elem`
pub fn any_list_of(elem: TypeRef) -> Matcher {
    Matcher::new(format!("anyListOf({elem})"), move |v| match v {
        Value::List(items) => items.read().iter().all(|item| item.is_instance_of(&elem)),
        _ => false,
    })
}

pub fn any_map() -> Matcher {
    Matcher::new("anyMap()", |v| matches!(v, Value::Map(_)))
}

/// A map whose current keys are all `key` and values all `value`
pub fn any_map_of(key: TypeRef, value: TypeRef) -> Matcher {
    Matcher::new(format!("anyMapOf({key}, {value})"), move |v| match v {
        Value::Map(entries) => entries
            .read()
            .iter()
            .all(|(k, val)| k.is_instance_of(&key) && val.is_instance_of(&value)),
        _ => false,
    })
}

/// Lists, maps and arrays
pub fn any_collection() -> Matcher {
    Matcher::new("anyCollection()", |v| {
        matches!(v, Value::List(_) | Value::Map(_) | Value::Array { .. })
    })
}

/// A list or array whose current elements are all instances of `elem`
pub fn any_collection_of(elem: TypeRef) -> Matcher {
    Matcher::new(format!("anyCollectionOf({elem})"), move |v| match v {
        Value::List(items) | Value::Array { items, .. } => {
            items.read().iter().all(|item| item.is_instance_of(&elem))
        }
        _ => false,
    })
}

/// `instanceof` check, so subclasses match
pub fn instance_of(ty: TypeRef) -> Matcher {
    Matcher::new(format!("instanceOf({ty})"), move |v| v.is_instance_of(&ty))
}

/// Runtime type exactly one of `types`; subclasses do not match
pub fn any_of(types: Vec<TypeRef>) -> Matcher {
    let names = types.iter().map(|t| t.to_string()).collect::<Vec<_>>();
    Matcher::new(format!("anyOf({})", names.join(", ")), move |v| {
        v.runtime_type().is_some_and(|actual| types.contains(&actual))
    })
}

/// Null, or whatever `inner` accepts
pub fn nullable(inner: Matcher) -> Matcher {
    let description = format!("nullable({})", inner.description);
    Matcher::new(description, move |v| v.is_null() || inner.matches(v))
}

/// Structural equality
pub fn eq(expected: impl Into<Value>) -> Matcher {
    let expected = expected.into();
    Matcher::new(format!("eq({expected})"), move |v| v.structural_eq(&expected))
}

/// Identity for lists, maps, arrays and objects
pub fn ref_eq(expected: Value) -> Matcher {
    Matcher::new(format!("refEq({expected})"), move |v| v.ref_eq(&expected))
}

pub fn is_null() -> Matcher {
    Matcher::new("isNull()", Value::is_null)
}

pub fn not_null() -> Matcher {
    Matcher::new("notNull()", |v| !v.is_null())
}

pub fn contains(needle: &str) -> Matcher {
    let needle = needle.to_string();
    Matcher::new(format!("contains({needle:?})"), move |v| {
        v.as_str().is_some_and(|s| s.contains(needle.as_str()))
    })
}

pub fn starts_with(prefix: &str) -> Matcher {
    let prefix = prefix.to_string();
    Matcher::new(format!("startsWith({prefix:?})"), move |v| {
        v.as_str().is_some_and(|s| s.starts_with(prefix.as_str()))
    })
}

pub fn ends_with(suffix: &str) -> Matcher {
    let suffix = suffix.to_string();
    Matcher::new(format!("endsWith({suffix:?})"), move |v| {
        v.as_str().is_some_and(|s| s.ends_with(suffix.as_str()))
    })
}

/// Whole-string regular expression match
pub fn matches(pattern: &str) -> Result<Matcher, regex::Error> {
    let regex = Regex::new(&format!("^(?:{pattern})$"))?;
    Ok(Matcher::new(format!("matches({pattern:?})"), move |v| {
        v.as_str().is_some_and(|s| regex.is_match(s))
    }))
}

pub fn custom(
    description: &str,
    f: impl Fn(&Value) -> bool + Send + Sync + 'static,
) -> Matcher {
    Matcher::new(description, f)
}
