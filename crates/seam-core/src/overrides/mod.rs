/*!
# Override Table

Test-populated map from injection site to substitute behavior. Rewritten
code only ever reads it, through [`OverrideTable::lookup`].

Entries for one site are kept in registration order and the first entry
whose instance scope and argument matchers accept the call wins. An entry
scoped to an instance never applies in a static context or through another
object.

```rust,ignore
use seam_core::overrides::{matcher::*, OverrideTable};

let table = OverrideTable::new();
table.when("Shop#total()/call:Shop.price(int)#0")
    .with_args(vec![eq(1)])
    .returns(Value::Integer(99));
table.when("Shop#total()/call:Shop.price(int)#0").returns(Value::Integer(0));
```
*/

pub mod matcher;


use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::ast::SiteId;
use crate::evaluator::{EvaluatorError, ObjectId, Value};

pub use matcher::Matcher;

/// Whose calls an override applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceScope {
    Any,
    Instance(ObjectId),
}

impl InstanceScope {
    /// `instance` is `None` at a site with no enclosing object
    pub fn admits(&self, instance: Option<ObjectId>) -> bool {
        match self {
            InstanceScope::Any => true,
            InstanceScope::Instance(id) => instance == Some(*id),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ArgMatchers {
    Any,
    /// One matcher per argument, in call order
    Exactly(Vec<Matcher>),
}

impl ArgMatchers {
    pub fn accepts(&self, args: &[Value]) -> bool {
        match self {
            ArgMatchers::Any => true,
            ArgMatchers::Exactly(matchers) => {
                matchers.len() == args.len()
                    && matchers.iter().zip(args).all(|(m, arg)| m.matches(arg))
            }
        }
    }
}

pub type ComputeFn = Arc<dyn Fn(&[Value]) -> Result<Value, EvaluatorError> + Send + Sync>;

#[derive(Clone)]
pub enum Substitute {
    Return(Value),
    /// Computed from the actual arguments
    Compute(ComputeFn),
    Throw {
        class: String,
        message: String,
    },
}

impl fmt::Debug for Substitute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Substitute::Return(value) => write!(f, "Return({value:?})"),
            Substitute::Compute(_) => write!(f, "Compute(<fn>)"),
            Substitute::Throw { class, message } => write!(f, "Throw({class}: {message})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OverrideEntry {
    pub site: SiteId,
    pub scope: InstanceScope,
    pub args: ArgMatchers,
    pub substitute: Substitute,
}

impl OverrideEntry {
    pub fn applies(&self, instance: Option<ObjectId>, args: &[Value]) -> bool {
        self.scope.admits(instance) && self.args.accepts(args)
    }
}

/// One lookup observed while recording was on
#[derive(Debug, Clone)]
pub struct Invocation {
    pub instance: Option<ObjectId>,
    pub args: Vec<Value>,
    pub overridden: bool,
}

#[derive(Default)]
pub struct OverrideTable {
    entries: DashMap<SiteId, Vec<Arc<OverrideEntry>>>,
    recording: AtomicBool,
    invocations: DashMap<SiteId, Vec<Invocation>>,
}

impl fmt::Debug for OverrideTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverrideTable")
            .field("sites", &self.entries.len())
            .field("recording", &self.recording.load(Ordering::Relaxed))
            .finish()
    }
}

impl OverrideTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entry: OverrideEntry) {
        debug!(site = %entry.site, scope = ?entry.scope, "registered override");
        self.entries
            .entry(entry.site.clone())
            .or_default()
            .push(Arc::new(entry));
    }

    pub fn when(&self, site: impl Into<SiteId>) -> OverrideBuilder<'_> {
        OverrideBuilder {
            table: self,
            site: site.into(),
            scope: InstanceScope::Any,
            args: ArgMatchers::Any,
        }
    }

    /// First entry for `site` that accepts this instance and argument list.
    /// Matchers run after the map guard is released, so they may use the table.
    pub fn lookup(
        &self,
        site: &SiteId,
        instance: Option<ObjectId>,
        args: &[Value],
    ) -> Option<Arc<OverrideEntry>> {
        let found = self
            .entries_for(site)
            .into_iter()
            .find(|entry| entry.applies(instance, args));

        if self.recording.load(Ordering::Relaxed) {
            self.invocations
                .entry(site.clone())
                .or_default()
                .push(Invocation {
                    instance,
                    args: args.to_vec(),
                    overridden: found.is_some(),
                });
        }
        found
    }

    pub fn entries_for(&self, site: &SiteId) -> Vec<Arc<OverrideEntry>> {
        self.entries
            .get(site)
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn remove(&self, site: &SiteId) -> usize {
        self.entries.remove(site).map_or(0, |(_, entries)| entries.len())
    }

    /// Number of registered entries across all sites
    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_recording(&self, on: bool) {
        self.recording.store(on, Ordering::Relaxed);
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    pub fn invocations(&self, site: &SiteId) -> Vec<Invocation> {
        self.invocations
            .get(site)
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn invocation_count(&self, site: &SiteId) -> usize {
        self.invocations.get(site).map_or(0, |calls| calls.len())
    }

    /// Drop all entries and recorded invocations
    pub fn clear(&self) {
        self.entries.clear();
        self.invocations.clear();
    }

    /// Clears the table when the returned guard goes out of scope
    pub fn scoped(&self) -> OverrideScope<'_> {
        OverrideScope { table: self }
    }
}

pub struct OverrideScope<'t> {
    table: &'t OverrideTable,
}

impl Deref for OverrideScope<'_> {
    type Target = OverrideTable;

    fn deref(&self) -> &OverrideTable {
        self.table
    }
}

impl Drop for OverrideScope<'_> {
    fn drop(&mut self) {
        self.table.clear();
    }
}

#[must_use = "an override is only registered by a terminal call such as returns()"]
pub struct OverrideBuilder<'t> {
    table: &'t OverrideTable,
    site: SiteId,
    scope: InstanceScope,
    args: ArgMatchers,
}

impl OverrideBuilder<'_> {
    /// Restrict to calls made from inside `instance`
    pub fn on(mut self, instance: ObjectId) -> Self {
        self.scope = InstanceScope::Instance(instance);
        self
    }

    pub fn with_args(mut self, matchers: Vec<Matcher>) -> Self {
        self.args = ArgMatchers::Exactly(matchers);
        self
    }

    pub fn returns(self, value: impl Into<Value>) {
        self.finish(Substitute::Return(value.into()));
    }

    pub fn computes(
        self,
        f: impl Fn(&[Value]) -> Result<Value, EvaluatorError> + Send + Sync + 'static,
    ) {
        self.finish(Substitute::Compute(Arc::new(f)));
    }

    pub fn throws(self, class: &str, message: &str) {
        self.finish(Substitute::Throw {
            class: class.to_string(),
            message: message.to_string(),
        });
    }

    fn finish(self, substitute: Substitute) {
        self.table.register(OverrideEntry {
            site: self.site,
            scope: self.scope,
            args: self.args,
            substitute,
        });
    }
}
