// Injection sites, their identifiers and the per-class manifest

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::{GuardScope, SiteId, Span, TypeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiteKind {
    Call,
    Construct,
    StaticFieldAccess,
}

impl SiteKind {
    /// Short form used inside site identifiers
    pub fn token(&self) -> &'static str {
        match self {
            SiteKind::Call => "call",
            SiteKind::Construct => "new",
            SiteKind::StaticFieldAccess => "get",
        }
    }
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SiteKind::Call => "CALL",
            SiteKind::Construct => "CONSTRUCT",
            SiteKind::StaticFieldAccess => "STATIC_FIELD_ACCESS",
        };
        f.write_str(name)
    }
}

/// One rewritten expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionSite {
    pub id: SiteId,
    pub kind: SiteKind,
    /// Class whose code contains the site
    pub class: String,
    /// Descriptor of the enclosing method or constructor
    pub enclosing_method: String,
    /// Where the original expression was written; display only
    pub span: Span,
    /// Resolved target, e.g. `Widget.price(int)`
    pub target: String,
    /// Static type of the original expression
    pub result: TypeRef,
    pub scope: GuardScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestOrigin {
    /// Produced by the build pipeline
    BuildTime,
    /// Produced by the instrumentation agent when the class was loaded
    LoadTime,
}

/// Every site rewritten in one top-level class, in processing order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteManifest {
    pub class: String,
    pub origin: ManifestOrigin,
    pub sites: Vec<InjectionSite>,
}

impl SiteManifest {
    pub fn new(class: &str, origin: ManifestOrigin) -> Self {
        Self {
            class: class.to_string(),
            origin,
            sites: Vec::new(),
        }
    }

    pub fn push(&mut self, site: InjectionSite) {
        self.sites.push(site);
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, InjectionSite> {
        self.sites.iter()
    }

    pub fn get(&self, id: &SiteId) -> Option<&InjectionSite> {
        self.sites.iter().find(|s| &s.id == id)
    }

    pub fn ids(&self) -> Vec<SiteId> {
        self.sites.iter().map(|s| s.id.clone()).collect()
    }

    /// Sites whose resolved target matches, e.g. every call to `Widget.price(int)`
    pub fn sites_targeting<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a InjectionSite> {
        self.sites.iter().filter(move |s| s.target == target)
    }

    /// Sites inside one enclosing method, by descriptor
    pub fn sites_in<'a>(&'a self, method: &'a str) -> impl Iterator<Item = &'a InjectionSite> {
        self.sites.iter().filter(move |s| s.enclosing_method == method)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl<'a> IntoIterator for &'a SiteManifest {
    type Item = &'a InjectionSite;
    type IntoIter = std::slice::Iter<'a, InjectionSite>;

    fn into_iter(self) -> Self::IntoIter {
        self.sites.iter()
    }
}

/// Hands out identifiers for the sites of one enclosing method.
///
/// `<Class>#<method>/<kind>:<target>#<ordinal>` where the ordinal counts
/// earlier sites with the same kind and target in the same method. Nothing
/// positional goes in, so reformatting or editing other members leaves the
/// identifiers alone.
#[derive(Debug)]
pub(crate) struct SiteIdAllocator {
    class: String,
    method: String,
    counters: HashMap<(SiteKind, String), usize>,
}

impl SiteIdAllocator {
    pub(crate) fn new(class: &str, method: &str) -> Self {
        Self {
            class: class.to_string(),
            method: method.to_string(),
            counters: HashMap::new(),
        }
    }

    pub(crate) fn next(&mut self, kind: SiteKind, target: &str) -> SiteId {
        let counter = self
            .counters
            .entry((kind, target.to_string()))
            .or_insert(0);
        let ordinal = *counter;
        *counter += 1;
        SiteId::new(format!(
            "{}#{}/{}:{}#{}",
            self.class,
            self.method,
            kind.token(),
            target,
            ordinal
        ))
    }
}
