/*!
# Runtime

Tree-walking evaluator for seam units, plain or instrumented. Guarded
expressions left by the injector consult the shared [`OverrideTable`] and fall
back to the original expression when nothing matches, so an instrumented class
with an empty table behaves exactly like the unmodified one.

Classes that reach [`Runtime::load_unit`] without guards can still be
instrumented on the way in by the [`InstrumentationAgent`].
*/

#![allow(clippy::excessive_nesting)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::ast::{
    BinaryOp, ClassDecl, CompilationUnit, ConstructorDecl, Expr, FieldDecl, Guard, GuardScope,
    LValue, Literal, Member, MethodDecl, Param, Stmt, TypeRef, UnaryOp,
};
use crate::injector::resolve::builtin_superclass;
use crate::injector::SiteManifest;
use crate::overrides::{OverrideEntry, OverrideTable, Substitute};
use crate::SeamConfig;

pub mod agent;
pub mod errors;
pub mod value;


pub use agent::InstrumentationAgent;
pub use errors::EvaluatorError;
pub use value::{Instance, ObjectId, Value};

type EvalResult<T = Value> = Result<T, EvaluatorError>;

/// Lineage walks stop here even if a superclass chain loops
const MAX_LINEAGE: usize = 64;

/// Statement outcome
#[derive(Debug, Clone, PartialEq)]
enum Flow {
    Normal,
    Return(Value),
}

/// A class as the runtime sees it: nested classes are loaded separately
/// under their simple names.
#[derive(Debug)]
pub struct LoadedClass {
    pub name: String,
    pub superclass: Option<String>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<Arc<MethodDecl>>,
    pub constructors: Vec<Arc<ConstructorDecl>>,
    pub instrumented: bool,
}

impl LoadedClass {
    fn from_decl(decl: &ClassDecl) -> Self {
        let mut class = Self {
            name: decl.name.clone(),
            superclass: decl.superclass.clone(),
            fields: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            instrumented: decl.contains_guards(),
        };
        for member in &decl.members {
            match member {
                Member::Field(field) => class.fields.push(field.clone()),
                Member::Method(method) => class.methods.push(Arc::new(method.clone())),
                Member::Constructor(ctor) => class.constructors.push(Arc::new(ctor.clone())),
                Member::Class(_) | Member::Malformed { .. } => {}
            }
        }
        class
    }
}

/// A local variable with the type it was declared with, if any
struct Slot {
    value: Value,
    declared: Option<TypeRef>,
}

struct Frame {
    /// Lexically enclosing class
    class: String,
    this: Option<Arc<Instance>>,
    scopes: Vec<HashMap<String, Slot>>,
    depth: usize,
}

impl Frame {
    fn new(class: &str, this: Option<Arc<Instance>>, depth: usize) -> Self {
        Self {
            class: class.to_string(),
            this,
            scopes: vec![HashMap::new()],
            depth,
        }
    }

    fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, value: Value, declared: Option<TypeRef>) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), Slot { value, declared });
        }
    }

    fn slot(&self, name: &str) -> Option<&Slot> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.slot(name).map(|slot| &slot.value)
    }

    fn assign(&mut self, name: &str, value: Value) -> Result<(), Value> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                slot.value = value;
                return Ok(());
            }
        }
        Err(value)
    }
}

/// What a call site knows about the overload it wants
#[derive(Default)]
struct CallShape<'a> {
    /// `name(T,..)` fixed when the site was instrumented
    descriptor: Option<&'a str>,
    /// Declared types of the argument expressions, where known
    declared: Vec<Option<TypeRef>>,
}

pub struct Runtime {
    config: SeamConfig,
    classes: RwLock<IndexMap<String, Arc<LoadedClass>>>,
    statics: DashMap<(String, String), Value>,
    overrides: Arc<OverrideTable>,
    manifests: DashMap<String, SiteManifest>,
    agent: InstrumentationAgent,
    next_id: AtomicU64,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(SeamConfig::default())
    }

    pub fn with_config(config: SeamConfig) -> Self {
        Self {
            agent: InstrumentationAgent::new(&config),
            config,
            classes: RwLock::new(IndexMap::new()),
            statics: DashMap::new(),
            overrides: Arc::new(OverrideTable::new()),
            manifests: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Share an override table with other runtimes or test helpers
    pub fn with_overrides(mut self, overrides: Arc<OverrideTable>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn overrides(&self) -> &Arc<OverrideTable> {
        &self.overrides
    }

    pub fn config(&self) -> &SeamConfig {
        &self.config
    }

    /// Load every class of `unit`, run static initializers and return the
    /// manifests of classes the agent instrumented on the way in.
    pub fn load_unit(&self, unit: &CompilationUnit) -> EvalResult<Vec<SiteManifest>> {
        let mut produced = Vec::new();
        let mut loaded = Vec::new();

        for class in &unit.classes {
            let class = if self.agent.wants(class) {
                match self.agent.transform(unit, class) {
                    Ok(result) => {
                        produced.push(result.manifest.clone());
                        self.manifests
                            .insert(class.name.clone(), result.manifest);
                        result.class
                    }
                    Err(e) => {
                        warn!(class = %class.name, error = %e, "load-time instrumentation failed, loading original");
                        class.clone()
                    }
                }
            } else {
                class.clone()
            };
            self.register(&class, &mut loaded);
        }

        for name in &loaded {
            self.initialize_statics(name)?;
        }
        Ok(produced)
    }

    /// Attach a manifest produced at build time
    pub fn add_manifest(&self, manifest: SiteManifest) {
        self.manifests.insert(manifest.class.clone(), manifest);
    }

    pub fn manifest(&self, class: &str) -> Option<SiteManifest> {
        self.manifests.get(class).map(|m| m.clone())
    }

    pub fn class(&self, name: &str) -> Option<Arc<LoadedClass>> {
        self.classes.read().get(name).cloned()
    }

    pub fn get_static(&self, class: &str, field: &str) -> Option<Value> {
        self.statics
            .get(&(class.to_string(), field.to_string()))
            .map(|v| v.clone())
    }

    pub fn set_static(&self, class: &str, field: &str, value: Value) {
        self.statics
            .insert((class.to_string(), field.to_string()), value);
    }

    pub fn call_static(&self, class: &str, method: &str, args: Vec<Value>) -> EvalResult {
        self.call_on_class(class, method, args, &CallShape::default(), 0)
    }

    pub fn call_method(&self, receiver: &Value, method: &str, args: Vec<Value>) -> EvalResult {
        self.call_on_value(receiver, method, args, &CallShape::default(), 0)
    }

    pub fn instantiate(&self, class: &str, args: Vec<Value>) -> EvalResult {
        self.construct(class, args, 0)
    }

    /// Build a built-in or user exception object without running constructors
    pub fn make_exception(&self, class: &str, message: &str) -> Value {
        let instance = Instance::new(self.next_object_id(), class, self.lineage(class));
        instance.set_field("message", Value::string(message));
        Value::Object(Arc::new(instance))
    }

    /// Error carrying a fresh exception of `class`
    pub fn throw(&self, class: &str, message: impl Into<String>) -> EvaluatorError {
        let message = message.into();
        EvaluatorError::Thrown {
            class: class.to_string(),
            exception: self.make_exception(class, &message),
            message,
        }
    }

    /// The class followed by its ancestors, user classes and built-ins alike
    pub fn lineage(&self, class: &str) -> Vec<String> {
        let classes = self.classes.read();
        let mut lineage = Vec::new();
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            if lineage.len() >= MAX_LINEAGE || lineage.contains(&name) {
                break;
            }
            current = match classes.get(&name) {
                Some(loaded) => loaded.superclass.clone(),
                None => builtin_superclass(&name).map(str::to_string),
            };
            lineage.push(name);
        }
        lineage
    }

    fn next_object_id(&self) -> ObjectId {
        ObjectId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn register(&self, decl: &ClassDecl, loaded: &mut Vec<String>) {
        let class = Arc::new(LoadedClass::from_decl(decl));
        debug!(class = %decl.name, instrumented = class.instrumented, "loaded class");
        for field in class.fields.iter().filter(|f| f.modifiers.is_static) {
            self.set_static(&decl.name, &field.name, default_value(&field.ty));
        }
        self.classes.write().insert(decl.name.clone(), class);
        loaded.push(decl.name.clone());
        for nested in decl.nested_classes() {
            self.register(nested, loaded);
        }
    }

    fn initialize_statics(&self, class: &str) -> EvalResult<()> {
        let Some(loaded) = self.class(class) else {
            return Ok(());
        };
        for field in loaded.fields.iter().filter(|f| f.modifiers.is_static) {
            if let Some(init) = &field.init {
                let mut frame = Frame::new(class, None, 0);
                let value = self.eval(init, &mut frame)?;
                let value = self.coerce_slot(value, &field.ty, &field.name)?;
                self.set_static(class, &field.name, value);
            }
        }
        Ok(())
    }

    // ---- statements -----------------------------------------------------

    fn exec_block(&self, stmts: &[Stmt], frame: &mut Frame) -> EvalResult<Flow> {
        frame.push();
        let flow = self.exec_stmts(stmts, frame);
        frame.pop();
        flow
    }

    fn exec_stmts(&self, stmts: &[Stmt], frame: &mut Frame) -> EvalResult<Flow> {
        for stmt in stmts {
            if let Flow::Return(value) = self.exec(stmt, frame)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&self, stmt: &Stmt, frame: &mut Frame) -> EvalResult<Flow> {
        match stmt {
            Stmt::Local { name, ty, init, .. } => {
                let value = match init {
                    Some(init) => {
                        let value = self.eval(init, frame)?;
                        self.coerce_slot(value, ty, name)?
                    }
                    None => default_value(ty),
                };
                frame.declare(name, value, Some(ty.clone()));
                Ok(Flow::Normal)
            }
            Stmt::Expr(expr) => {
                self.eval(expr, frame)?;
                Ok(Flow::Normal)
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval(expr, frame)?,
                    None => Value::Unit,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval_condition(condition, frame, "if condition")? {
                    self.exec_nested(then_branch, frame)
                } else if let Some(else_branch) = else_branch {
                    self.exec_nested(else_branch, frame)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { condition, body } => {
                while self.eval_condition(condition, frame, "while condition")? {
                    if let Flow::Return(value) = self.exec_nested(body, frame)? {
                        return Ok(Flow::Return(value));
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Block(stmts) => self.exec_block(stmts, frame),
            Stmt::Throw { value, .. } => {
                let value = self.eval(value, frame)?;
                Err(self.raise(value)?)
            }
            Stmt::Try {
                body,
                catch_type,
                catch_var,
                handler,
            } => match self.exec_block(body, frame) {
                Err(EvaluatorError::Thrown { exception, .. })
                    if exception.is_instance_of(&TypeRef::class(catch_type)) =>
                {
                    debug!(catch = %catch_type, "caught exception");
                    frame.push();
                    frame.declare(catch_var, exception, Some(TypeRef::class(catch_type)));
                    let flow = self.exec_stmts(handler, frame);
                    frame.pop();
                    flow
                }
                other => other,
            },
        }
    }

    /// A branch body gets its own scope even when it is a single statement
    fn exec_nested(&self, stmt: &Stmt, frame: &mut Frame) -> EvalResult<Flow> {
        frame.push();
        let flow = self.exec(stmt, frame);
        frame.pop();
        flow
    }

    fn eval_condition(&self, expr: &Expr, frame: &mut Frame, what: &str) -> EvalResult<bool> {
        let value = self.eval(expr, frame)?;
        value
            .as_bool()
            .ok_or_else(|| EvaluatorError::type_error(what, "boolean", &value.type_name()))
    }

    /// Turn a thrown value into the error that unwinds to the nearest catch
    fn raise(&self, value: Value) -> EvalResult<EvaluatorError> {
        match &value {
            Value::Null => Ok(self.throw("NullPointerException", "throw null")),
            Value::Object(instance) if instance.is_instance_of("Exception") => {
                let message = match instance.get_field("message") {
                    Some(Value::String(message)) => message,
                    _ => String::new(),
                };
                Ok(EvaluatorError::Thrown {
                    class: instance.class.clone(),
                    message,
                    exception: value.clone(),
                })
            }
            other => Err(EvaluatorError::type_error(
                "throw",
                "Exception",
                &other.type_name(),
            )),
        }
    }

    // ---- expressions ----------------------------------------------------

    fn eval(&self, expr: &Expr, frame: &mut Frame) -> EvalResult {
        match expr {
            Expr::Literal(literal) => Ok(literal_value(literal)),
            Expr::This => frame
                .this
                .clone()
                .map(Value::Object)
                .ok_or_else(|| EvaluatorError::invalid("'this' used in a static context")),
            Expr::Name { name, .. } => self.lookup_name(name, frame),
            Expr::Field { target, name, .. } => {
                if let Some(class) = self.class_reference(target, frame) {
                    return self
                        .find_static(&class, name)
                        .ok_or_else(|| EvaluatorError::FieldNotFound {
                            class,
                            field: name.clone(),
                        });
                }
                let target = self.eval(target, frame)?;
                self.read_field(&target, name)
            }
            Expr::Index { target, index } => {
                let target = self.eval(target, frame)?;
                let index = self.eval(index, frame)?;
                self.read_index(&target, &index)
            }
            Expr::Call {
                receiver,
                method,
                args,
                ..
            } => self.eval_call(receiver.as_deref(), method, args, frame, None),
            Expr::New { class, args, .. } => {
                let args = self.eval_all(args, frame)?;
                self.construct(class, args, frame.depth)
            }
            Expr::NewArray { elem, elements } => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    let value = self.eval(element, frame)?;
                    items.push(self.coerce_slot(value, elem, "array element")?);
                }
                Ok(Value::array(elem.clone(), items))
            }
            Expr::ListLiteral { elements } => Ok(Value::list(self.eval_all(elements, frame)?)),
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right, frame),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, frame)?;
                match (op, &value) {
                    (UnaryOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
                    (UnaryOp::Neg, Value::Integer(n)) => Ok(Value::Integer(n.wrapping_neg())),
                    (UnaryOp::Neg, Value::Float(d)) => Ok(Value::Float(-d)),
                    (UnaryOp::Not, other) => {
                        Err(EvaluatorError::type_error("!", "boolean", &other.type_name()))
                    }
                    (UnaryOp::Neg, other) => {
                        Err(EvaluatorError::type_error("negation", "number", &other.type_name()))
                    }
                }
            }
            Expr::Assign { target, value } => self.eval_assign(target, value, frame),
            Expr::Let {
                name,
                ty,
                init,
                body,
            } => {
                let value = self.eval(init, frame)?;
                frame.push();
                frame.declare(name, value, ty.clone());
                let result = self.eval(body, frame);
                frame.pop();
                result
            }
            Expr::Guarded(guard) => self.eval_guarded(guard, frame),
        }
    }

    fn eval_all(&self, exprs: &[Expr], frame: &mut Frame) -> EvalResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e, frame)).collect()
    }

    /// Arguments first, then the table, then either the substitute or the
    /// original expression over the already-evaluated temporaries. A call
    /// falls back to the overload the site was built for.
    fn eval_guarded(&self, guard: &Guard, frame: &mut Frame) -> EvalResult {
        let args = self.eval_all(&guard.args, frame)?;
        let instance = match guard.scope {
            GuardScope::Instance => frame.this.as_ref().map(|this| this.id),
            GuardScope::Static => None,
        };
        match self.overrides.lookup(&guard.site, instance, &args) {
            Some(entry) => {
                debug!(site = %guard.site, "override applied");
                self.substitute(&entry, guard, &args)
            }
            None => match guard.fallback.as_ref() {
                Expr::Call {
                    receiver,
                    method,
                    args,
                    ..
                } => self.eval_call(
                    receiver.as_deref(),
                    method,
                    args,
                    frame,
                    guard.site.call_descriptor(),
                ),
                fallback => self.eval(fallback, frame),
            },
        }
    }

    fn substitute(&self, entry: &OverrideEntry, guard: &Guard, args: &[Value]) -> EvalResult {
        let value = match &entry.substitute {
            Substitute::Return(value) => value.clone(),
            Substitute::Compute(f) => f(args)?,
            Substitute::Throw { class, message } => return Err(self.throw(class, message.as_str())),
        };
        if guard.result.is_void() {
            return Ok(Value::Unit);
        }
        let actual = value.type_name();
        value.coerce_to(&guard.result).ok_or_else(|| {
            self.throw(
                "ClassCastException",
                format!(
                    "override for {} returned {} where {} is expected",
                    guard.site, actual, guard.result
                ),
            )
        })
    }

    fn lookup_name(&self, name: &str, frame: &Frame) -> EvalResult {
        if let Some(value) = frame.lookup(name) {
            return Ok(value.clone());
        }
        if let Some(value) = frame.this.as_ref().and_then(|this| this.get_field(name)) {
            return Ok(value);
        }
        self.find_static(&frame.class, name)
            .ok_or_else(|| EvaluatorError::VariableNotFound {
                name: name.to_string(),
            })
    }

    /// Static field by name, searching `class` and then its ancestors
    fn find_static(&self, class: &str, field: &str) -> Option<Value> {
        self.lineage(class)
            .iter()
            .find_map(|owner| self.get_static(owner, field))
    }

    fn static_owner(&self, class: &str, field: &str) -> Option<String> {
        self.lineage(class).into_iter().find(|owner| {
            self.statics
                .contains_key(&(owner.clone(), field.to_string()))
        })
    }

    /// `Name` that denotes a class rather than a value
    fn class_reference(&self, expr: &Expr, frame: &Frame) -> Option<String> {
        let Expr::Name { name, .. } = expr else {
            return None;
        };
        let shadowed = frame.lookup(name).is_some()
            || frame.this.as_ref().is_some_and(|this| this.has_field(name))
            || self.find_static(&frame.class, name).is_some();
        if shadowed {
            return None;
        }
        let known = self.classes.read().contains_key(name)
            || builtin_superclass(name).is_some()
            || is_library_class(name);
        known.then(|| name.clone())
    }

    fn read_field(&self, target: &Value, name: &str) -> EvalResult {
        match target {
            Value::Null => Err(self.throw(
                "NullPointerException",
                format!("Cannot read field \"{name}\" because value is null"),
            )),
            Value::Array { items, .. } if name == "length" => {
                Ok(Value::Integer(items.read().len() as i64))
            }
            Value::Object(instance) => match instance.get_field(name) {
                Some(value) => Ok(value),
                None => self
                    .find_static(&instance.class, name)
                    .ok_or_else(|| EvaluatorError::FieldNotFound {
                        class: instance.class.clone(),
                        field: name.to_string(),
                    }),
            },
            other => Err(EvaluatorError::FieldNotFound {
                class: other.type_name(),
                field: name.to_string(),
            }),
        }
    }

    fn read_index(&self, target: &Value, index: &Value) -> EvalResult {
        let items = match target {
            Value::Null => return Err(self.throw("NullPointerException", "Cannot index null")),
            Value::List(items) | Value::Array { items, .. } => items,
            other => {
                return Err(EvaluatorError::type_error("indexing", "array or List", &other.type_name()))
            }
        };
        let i = index
            .as_int()
            .ok_or_else(|| EvaluatorError::type_error("index", "int", &index.type_name()))?;
        let items = items.read();
        usize::try_from(i)
            .ok()
            .and_then(|i| items.get(i).cloned())
            .ok_or_else(|| {
                self.throw(
                    "IndexOutOfBoundsException",
                    format!("Index {i} out of bounds for length {}", items.len()),
                )
            })
    }

    fn write_index(&self, target: &Value, index: &Value, value: Value) -> EvalResult<()> {
        let (items, value) = match target {
            Value::Null => return Err(self.throw("NullPointerException", "Cannot index null")),
            Value::List(items) => (items, value),
            Value::Array { elem, items } => (items, self.coerce_slot(value, elem, "array element")?),
            other => {
                return Err(EvaluatorError::type_error("indexing", "array or List", &other.type_name()))
            }
        };
        let i = index
            .as_int()
            .ok_or_else(|| EvaluatorError::type_error("index", "int", &index.type_name()))?;
        let mut items = items.write();
        let len = items.len();
        match usize::try_from(i).ok().and_then(|i| items.get_mut(i)) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(self.throw(
                "IndexOutOfBoundsException",
                format!("Index {i} out of bounds for length {len}"),
            )),
        }
    }

    fn eval_assign(&self, target: &LValue, value: &Expr, frame: &mut Frame) -> EvalResult {
        match target {
            LValue::Name { name, .. } => {
                let value = self.eval(value, frame)?;
                let value = match frame.assign(name, value) {
                    Ok(()) => return self.lookup_name(name, frame),
                    Err(value) => value,
                };
                if let Some(this) = frame.this.as_ref().filter(|this| this.has_field(name)) {
                    this.set_field(name, value.clone());
                    return Ok(value);
                }
                match self.static_owner(&frame.class, name) {
                    Some(owner) => {
                        self.set_static(&owner, name, value.clone());
                        Ok(value)
                    }
                    None => Err(EvaluatorError::VariableNotFound { name: name.clone() }),
                }
            }
            LValue::Field {
                target: object,
                name,
                ..
            } => {
                if let Some(class) = self.class_reference(object, frame) {
                    let owner = self.static_owner(&class, name).ok_or_else(|| {
                        EvaluatorError::FieldNotFound {
                            class: class.clone(),
                            field: name.clone(),
                        }
                    })?;
                    let value = self.eval(value, frame)?;
                    self.set_static(&owner, name, value.clone());
                    return Ok(value);
                }
                let object = self.eval(object, frame)?;
                let value = self.eval(value, frame)?;
                match &object {
                    Value::Null => Err(self.throw(
                        "NullPointerException",
                        format!("Cannot assign field \"{name}\" because value is null"),
                    )),
                    Value::Object(instance) if instance.has_field(name) => {
                        instance.set_field(name, value.clone());
                        Ok(value)
                    }
                    other => Err(EvaluatorError::FieldNotFound {
                        class: other.type_name(),
                        field: name.clone(),
                    }),
                }
            }
            LValue::Index { target, index } => {
                let target = self.eval(target, frame)?;
                let index = self.eval(index, frame)?;
                let value = self.eval(value, frame)?;
                self.write_index(&target, &index, value.clone())?;
                Ok(value)
            }
        }
    }

    fn eval_binary(&self, op: BinaryOp, left: &Expr, right: &Expr, frame: &mut Frame) -> EvalResult {
        match op {
            BinaryOp::And => {
                return Ok(Value::Boolean(
                    self.eval_condition(left, frame, "&&")?
                        && self.eval_condition(right, frame, "&&")?,
                ))
            }
            BinaryOp::Or => {
                return Ok(Value::Boolean(
                    self.eval_condition(left, frame, "||")?
                        || self.eval_condition(right, frame, "||")?,
                ))
            }
            _ => {}
        }

        let l = self.eval(left, frame)?;
        let r = self.eval(right, frame)?;
        match op {
            BinaryOp::Add => match (&l, &r) {
                (Value::String(_), _) | (_, Value::String(_)) => {
                    Ok(Value::String(format!("{l}{r}")))
                }
                _ => self.arithmetic(&l, &r, "addition", i64::wrapping_add, |a, b| a + b),
            },
            BinaryOp::Sub => self.arithmetic(&l, &r, "subtraction", i64::wrapping_sub, |a, b| a - b),
            BinaryOp::Mul => {
                self.arithmetic(&l, &r, "multiplication", i64::wrapping_mul, |a, b| a * b)
            }
            BinaryOp::Div => match (&l, &r) {
                (Value::Integer(_), Value::Integer(0)) => {
                    Err(self.throw("ArithmeticException", "/ by zero"))
                }
                _ => self.arithmetic(&l, &r, "division", i64::wrapping_div, |a, b| a / b),
            },
            BinaryOp::Rem => match (&l, &r) {
                (Value::Integer(_), Value::Integer(0)) => {
                    Err(self.throw("ArithmeticException", "/ by zero"))
                }
                _ => self.arithmetic(&l, &r, "remainder", i64::wrapping_rem, |a, b| a % b),
            },
            BinaryOp::Eq => Ok(Value::Boolean(same_value(&l, &r))),
            BinaryOp::Ne => Ok(Value::Boolean(!same_value(&l, &r))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let (a, b) = match (as_number(&l), as_number(&r)) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(EvaluatorError::binary_type_error(
                            "compare",
                            &l.type_name(),
                            &r.type_name(),
                        ))
                    }
                };
                let result = match op {
                    BinaryOp::Lt => a < b,
                    BinaryOp::Le => a <= b,
                    BinaryOp::Gt => a > b,
                    _ => a >= b,
                };
                Ok(Value::Boolean(result))
            }
            BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit operators handled above"),
        }
    }

    fn arithmetic(
        &self,
        l: &Value,
        r: &Value,
        name: &str,
        int_op: impl Fn(i64, i64) -> i64,
        float_op: impl Fn(f64, f64) -> f64,
    ) -> EvalResult {
        match (l, r) {
            (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(int_op(*a, *b))),
            _ => match (as_number(l), as_number(r)) {
                (Some(a), Some(b)) => Ok(Value::Float(float_op(a, b))),
                _ => Err(EvaluatorError::binary_type_error(
                    name,
                    &l.type_name(),
                    &r.type_name(),
                )),
            },
        }
    }

    // ---- calls ----------------------------------------------------------

    fn eval_call(
        &self,
        receiver: Option<&Expr>,
        method: &str,
        args: &[Expr],
        frame: &mut Frame,
        descriptor: Option<&str>,
    ) -> EvalResult {
        let shape = CallShape {
            descriptor,
            declared: args.iter().map(|a| self.static_type(a, frame)).collect(),
        };
        match receiver {
            None => {
                let args = self.eval_all(args, frame)?;
                self.call_unqualified(method, args, &shape, frame)
            }
            Some(receiver) => {
                if let Some(class) = self.class_reference(receiver, frame) {
                    let args = self.eval_all(args, frame)?;
                    return self.call_on_class(&class, method, args, &shape, frame.depth);
                }
                let target = self.eval(receiver, frame)?;
                let args = self.eval_all(args, frame)?;
                self.call_on_value(&target, method, args, &shape, frame.depth)
            }
        }
    }

    /// Declared type of an argument expression where one is written down:
    /// locals, parameters, fields, literals and returns of unambiguous calls
    fn static_type(&self, expr: &Expr, frame: &Frame) -> Option<TypeRef> {
        match expr {
            Expr::Literal(Literal::Null) => None,
            Expr::Literal(literal) => literal_value(literal).runtime_type(),
            Expr::Name { name, .. } => match frame.slot(name) {
                Some(slot) => slot.declared.clone(),
                None => self.field_type(&frame.class, name),
            },
            Expr::Field { target, name, .. } => match target.as_ref() {
                Expr::This => self.field_type(&frame.class, name),
                target => self
                    .class_reference(target, frame)
                    .and_then(|class| self.field_type(&class, name)),
            },
            Expr::Call {
                receiver, method, args, ..
            } => {
                let class = match receiver.as_deref() {
                    None | Some(Expr::This) => frame.class.clone(),
                    Some(receiver) => self.class_reference(receiver, frame)?,
                };
                self.return_type(&class, method, args.len())
            }
            _ => None,
        }
    }

    fn field_type(&self, class: &str, field: &str) -> Option<TypeRef> {
        self.lineage(class).iter().find_map(|owner| {
            self.class(owner)?
                .fields
                .iter()
                .find(|f| f.name == field)
                .map(|f| f.ty.clone())
        })
    }

    /// The return type shared by every `method` of this arity, if they agree
    fn return_type(&self, class: &str, method: &str, arity: usize) -> Option<TypeRef> {
        let mut types = self
            .lineage(class)
            .into_iter()
            .filter_map(|owner| self.class(&owner))
            .flat_map(|loaded| {
                loaded
                    .methods
                    .iter()
                    .filter(|m| m.name == method && m.params.len() == arity)
                    .map(|m| m.return_type.clone())
                    .collect::<Vec<_>>()
            });
        let first = types.next()?;
        types.all(|ty| ty == first).then_some(first)
    }

    /// `m(args)`: resolved in the enclosing class, dispatched on `this` when
    /// the method is an instance method
    fn call_unqualified(
        &self,
        method: &str,
        args: Vec<Value>,
        shape: &CallShape,
        frame: &Frame,
    ) -> EvalResult {
        let (owner, decl) = self
            .find_method(&frame.class, method, &args, shape)
            .ok_or_else(|| EvaluatorError::method_not_found(&frame.class, method, args.len()))?;
        if decl.modifiers.is_static {
            return self.invoke(&owner, &decl, None, args, frame.depth);
        }
        let this = frame.this.clone().ok_or_else(|| {
            EvaluatorError::invalid(format!(
                "instance method '{method}' called from a static context"
            ))
        })?;
        let (owner, decl) = self
            .find_method(&this.class, method, &args, shape)
            .unwrap_or((owner, decl));
        self.invoke(&owner, &decl, Some(this), args, frame.depth)
    }

    fn call_on_class(
        &self,
        class: &str,
        method: &str,
        args: Vec<Value>,
        shape: &CallShape,
        depth: usize,
    ) -> EvalResult {
        if let Some((owner, decl)) = self.find_method(class, method, &args, shape) {
            if !decl.modifiers.is_static {
                return Err(EvaluatorError::invalid(format!(
                    "non-static method {class}.{method} cannot be called without an instance"
                )));
            }
            return self.invoke(&owner, &decl, None, args, depth);
        }
        match self.library_call(class, method, &args) {
            Some(result) => result,
            None => Err(EvaluatorError::method_not_found(class, method, args.len())),
        }
    }

    fn call_on_value(
        &self,
        target: &Value,
        method: &str,
        args: Vec<Value>,
        shape: &CallShape,
        depth: usize,
    ) -> EvalResult {
        match target {
            Value::Null => Err(self.throw(
                "NullPointerException",
                format!("Cannot invoke \"{method}()\" because value is null"),
            )),
            Value::Object(instance) => {
                let found = self.find_method(&instance.class, method, &args, shape);
                if let Some((owner, decl)) = found {
                    let this = (!decl.modifiers.is_static).then(|| instance.clone());
                    return self.invoke(&owner, &decl, this, args, depth);
                }
                match (method, args.as_slice()) {
                    ("getMessage", []) => Ok(instance.get_field("message").unwrap_or(Value::Null)),
                    _ => self.builtin_method(target, method, &args),
                }
            }
            _ => self.builtin_method(target, method, &args),
        }
    }

    /// Most specific applicable method named `name`, searching `class` and
    /// then its ancestors. Returns the declaring class with the method. A
    /// descriptor in `shape` wins over selection by argument types.
    fn find_method(
        &self,
        class: &str,
        name: &str,
        args: &[Value],
        shape: &CallShape,
    ) -> Option<(String, Arc<MethodDecl>)> {
        if let Some(descriptor) = shape.descriptor {
            for owner in self.lineage(class) {
                let Some(loaded) = self.class(&owner) else {
                    continue;
                };
                let pinned = loaded.methods.iter().find(|m| {
                    m.name == name && m.params.len() == args.len() && m.descriptor() == descriptor
                });
                if let Some(method) = pinned {
                    return Some((owner, method.clone()));
                }
            }
        }
        for owner in self.lineage(class) {
            let Some(loaded) = self.class(&owner) else {
                continue;
            };
            let best = select_applicable(
                loaded
                    .methods
                    .iter()
                    .filter(|m| m.name == name)
                    .map(|m| (m.params.as_slice(), m)),
                args,
                &shape.declared,
            );
            if let Some(method) = best {
                return Some((owner, method.clone()));
            }
        }
        None
    }

    fn invoke(
        &self,
        class: &str,
        method: &MethodDecl,
        this: Option<Arc<Instance>>,
        args: Vec<Value>,
        depth: usize,
    ) -> EvalResult {
        let depth = depth + 1;
        if depth > self.config.max_eval_depth {
            return Err(EvaluatorError::DepthExceeded(self.config.max_eval_depth));
        }
        let mut frame = Frame::new(class, this, depth);
        self.bind_params(&method.params, args, &mut frame)?;
        let value = match self.exec_stmts(&method.body, &mut frame)? {
            Flow::Return(value) => value,
            Flow::Normal => Value::Unit,
        };
        if method.return_type.is_void() {
            return Ok(Value::Unit);
        }
        let actual = value.type_name();
        value.coerce_to(&method.return_type).ok_or_else(|| {
            EvaluatorError::type_error(
                &format!("return from {}", method.name),
                &method.return_type.to_string(),
                &actual,
            )
        })
    }

    fn bind_params(&self, params: &[Param], args: Vec<Value>, frame: &mut Frame) -> EvalResult<()> {
        for (param, arg) in params.iter().zip(args) {
            let value = self.coerce_slot(arg, &param.ty, &param.name)?;
            frame.declare(&param.name, value, Some(param.ty.clone()));
        }
        Ok(())
    }

    fn coerce_slot(&self, value: Value, ty: &TypeRef, what: &str) -> EvalResult {
        let actual = value.type_name();
        value
            .coerce_to(ty)
            .ok_or_else(|| EvaluatorError::type_error(what, &ty.to_string(), &actual))
    }

    // ---- construction ---------------------------------------------------

    fn construct(&self, class: &str, args: Vec<Value>, depth: usize) -> EvalResult {
        match class {
            "ArrayList" | "LinkedList" | "List" if args.is_empty() => return Ok(Value::list(Vec::new())),
            "HashMap" | "LinkedHashMap" | "Map" if args.is_empty() => return Ok(Value::map(Vec::new())),
            _ => {}
        }

        let Some(loaded) = self.class(class) else {
            if builtin_superclass(class).is_some() || class == "Exception" {
                let message = match args.first() {
                    Some(Value::String(message)) => message.clone(),
                    _ => String::new(),
                };
                return Ok(self.make_exception(class, &message));
            }
            return Err(EvaluatorError::ClassNotFound {
                name: class.to_string(),
            });
        };

        let lineage = self.lineage(class);
        let instance = Arc::new(Instance::new(self.next_object_id(), class, lineage.clone()));
        if instance.is_instance_of("Exception") {
            let message = match args.first() {
                Some(value @ Value::String(_)) => value.clone(),
                _ => Value::Null,
            };
            instance.set_field("message", message);
        }

        // Ancestors first so subclass initializers can read inherited fields
        for owner in lineage.iter().rev() {
            let Some(declaring) = self.class(owner) else {
                continue;
            };
            for field in declaring.fields.iter().filter(|f| !f.modifiers.is_static) {
                let value = match &field.init {
                    Some(init) => {
                        let mut frame = Frame::new(owner, Some(instance.clone()), depth);
                        let value = self.eval(init, &mut frame)?;
                        self.coerce_slot(value, &field.ty, &field.name)?
                    }
                    None => default_value(&field.ty),
                };
                instance.set_field(&field.name, value);
            }
        }

        let ctor = select_applicable(
            loaded
                .constructors
                .iter()
                .map(|c| (c.params.as_slice(), c)),
            &args,
            &[],
        );
        match ctor {
            Some(ctor) => {
                let depth = depth + 1;
                if depth > self.config.max_eval_depth {
                    return Err(EvaluatorError::DepthExceeded(self.config.max_eval_depth));
                }
                let mut frame = Frame::new(class, Some(instance.clone()), depth);
                self.bind_params(&ctor.params, args, &mut frame)?;
                self.exec_stmts(&ctor.body, &mut frame)?;
            }
            None if loaded.constructors.is_empty() && args.is_empty() => {}
            None if loaded.constructors.is_empty() && instance.is_instance_of("Exception") => {}
            None => return Err(EvaluatorError::method_not_found(class, "<init>", args.len())),
        }
        Ok(Value::Object(instance))
    }

    // ---- built-ins ------------------------------------------------------

    fn library_call(&self, class: &str, method: &str, args: &[Value]) -> Option<EvalResult> {
        let result = match (class, method, args) {
            ("Math", "max" | "min" | "abs", _) => math(method, args),
            ("String", "valueOf", [value]) => Ok(Value::String(value.to_string())),
            ("Integer", "parseInt", [Value::String(s)]) => s.trim().parse::<i64>().map(Value::Integer).map_err(|_| {
                self.throw(
                    "NumberFormatException",
                    format!("For input string: \"{s}\""),
                )
            }),
            _ => return None,
        };
        Some(result)
    }

    fn builtin_method(&self, target: &Value, method: &str, args: &[Value]) -> EvalResult {
        let unknown = || EvaluatorError::method_not_found(&target.type_name(), method, args.len());
        match (target, method, args) {
            (_, "toString", []) => Ok(Value::String(target.to_string())),
            (_, "equals", [other]) => Ok(Value::Boolean(target.structural_eq(other))),

            (Value::String(s), "length", []) => Ok(Value::Integer(s.chars().count() as i64)),
            (Value::String(s), "isEmpty", []) => Ok(Value::Boolean(s.is_empty())),
            (Value::String(s), "contains", [Value::String(p)]) => Ok(Value::Boolean(s.contains(p.as_str()))),
            (Value::String(s), "startsWith", [Value::String(p)]) => {
                Ok(Value::Boolean(s.starts_with(p.as_str())))
            }
            (Value::String(s), "endsWith", [Value::String(p)]) => {
                Ok(Value::Boolean(s.ends_with(p.as_str())))
            }
            (Value::String(s), "toUpperCase", []) => Ok(Value::String(s.to_uppercase())),
            (Value::String(s), "toLowerCase", []) => Ok(Value::String(s.to_lowercase())),
            (Value::String(s), "trim", []) => Ok(Value::String(s.trim().to_string())),

            (Value::List(items), "size", []) => Ok(Value::Integer(items.read().len() as i64)),
            (Value::List(items), "isEmpty", []) => Ok(Value::Boolean(items.read().is_empty())),
            (Value::List(_), "get", [index]) => self.read_index(target, index),
            (Value::List(items), "add", [value]) => {
                items.write().push(value.clone());
                Ok(Value::Boolean(true))
            }
            (Value::List(items), "contains", [value]) => Ok(Value::Boolean(
                items.read().iter().any(|item| item.structural_eq(value)),
            )),

            (Value::Map(entries), "size", []) => Ok(Value::Integer(entries.read().len() as i64)),
            (Value::Map(entries), "isEmpty", []) => Ok(Value::Boolean(entries.read().is_empty())),
            (Value::Map(entries), "get", [key]) => Ok(entries
                .read()
                .iter()
                .find(|(k, _)| k.structural_eq(key))
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null)),
            (Value::Map(entries), "containsKey", [key]) => Ok(Value::Boolean(
                entries.read().iter().any(|(k, _)| k.structural_eq(key)),
            )),
            (Value::Map(entries), "put", [key, value]) => {
                let mut entries = entries.write();
                match entries.iter_mut().find(|(k, _)| k.structural_eq(key)) {
                    Some((_, slot)) => Ok(std::mem::replace(slot, value.clone())),
                    None => {
                        entries.push((key.clone(), value.clone()));
                        Ok(Value::Null)
                    }
                }
            }
            _ => Err(unknown()),
        }
    }
}

fn math(method: &str, args: &[Value]) -> EvalResult {
    match (method, args) {
        ("abs", [Value::Integer(n)]) => Ok(Value::Integer(n.wrapping_abs())),
        ("abs", [value]) => as_number(value)
            .map(|d| Value::Float(d.abs()))
            .ok_or_else(|| EvaluatorError::type_error("Math.abs", "number", &value.type_name())),
        ("max", [Value::Integer(a), Value::Integer(b)]) => Ok(Value::Integer(*a.max(b))),
        ("min", [Value::Integer(a), Value::Integer(b)]) => Ok(Value::Integer(*a.min(b))),
        (_, [a, b]) => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) if method == "max" => Ok(Value::Float(x.max(y))),
            (Some(x), Some(y)) => Ok(Value::Float(x.min(y))),
            _ => Err(EvaluatorError::binary_type_error(
                &format!("Math.{method}"),
                &a.type_name(),
                &b.type_name(),
            )),
        },
        _ => Err(EvaluatorError::method_not_found("Math", method, args.len())),
    }
}

fn is_library_class(name: &str) -> bool {
    matches!(name, "Math" | "String" | "Integer")
}

/// Among declarations whose parameters accept `args`, the one with the most
/// exact parameter types; the first declared wins a tie. An argument's
/// declared type counts over its runtime type.
fn select_applicable<'a, T>(
    candidates: impl Iterator<Item = (&'a [Param], T)>,
    args: &[Value],
    declared: &[Option<TypeRef>],
) -> Option<T> {
    let mut best: Option<(usize, T)> = None;
    for (params, candidate) in candidates {
        if params.len() != args.len() || !params.iter().zip(args).all(|(p, a)| a.fits(&p.ty)) {
            continue;
        }
        let exact = params
            .iter()
            .zip(args)
            .enumerate()
            .filter(|(i, (p, a))| {
                let ty = declared
                    .get(*i)
                    .cloned()
                    .flatten()
                    .or_else(|| a.runtime_type());
                ty.as_ref() == Some(&p.ty)
            })
            .count();
        if best.as_ref().map_or(true, |(score, _)| exact > *score) {
            best = Some((exact, candidate));
        }
    }
    best.map(|(_, candidate)| candidate)
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Int(n) => Value::Integer(*n),
        Literal::Double(d) => Value::Float(*d),
        Literal::Bool(b) => Value::Boolean(*b),
        Literal::Str(s) => Value::String(s.clone()),
        Literal::Null => Value::Null,
    }
}

pub fn default_value(ty: &TypeRef) -> Value {
    match ty {
        TypeRef::Int => Value::Integer(0),
        TypeRef::Double => Value::Float(0.0),
        TypeRef::Boolean => Value::Boolean(false),
        _ => Value::Null,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(n) => Some(*n as f64),
        Value::Float(d) => Some(*d),
        _ => None,
    }
}

/// `==`: numbers by value across int and double, strings by contents,
/// everything else by identity
fn same_value(l: &Value, r: &Value) -> bool {
    match (as_number(l), as_number(r)) {
        (Some(a), Some(b)) => a == b,
        _ => l.ref_eq(r),
    }
}
