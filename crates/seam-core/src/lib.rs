//! # Seam Core
//!
//! Build-time seam injection for class-based source trees:
//! - Syntax tree and parser for `.seam` units
//! - Method registry (first pass) and injection rewriter (second pass)
//! - Override table and argument matchers used by tests
//! - Runtime that evaluates instrumented classes, with a load-time agent for
//!   classes that were not instrumented at build time
//! - Build driver with agent artifact publication and diagnostics
//!
//! Rewriting performs no I/O; only the driver touches the file system.

#![warn(clippy::all)]

pub mod artifact;
pub mod ast;
pub mod diagnostics;
pub mod driver;
pub mod evaluator;
pub mod injector;
pub mod overrides;
pub mod parser;
pub mod registry;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// Re-export commonly used types
pub use artifact::{ArtifactError, PublicationState, AGENT_ARTIFACT};
pub use ast::{ClassDecl, CompilationUnit, SiteId, ToSource, TypeRef};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use driver::{BuildSession, FileDriver, Pipeline, UnitOutput};
pub use evaluator::{EvaluatorError, InstrumentationAgent, ObjectId, Runtime, Value};
pub use injector::{
    InjectError, InjectionSite, Injector, ManifestOrigin, RewriteResult, SiteKind, SiteManifest,
    UnitIndex,
};
pub use overrides::{matcher, Matcher, OverrideTable};
pub use parser::{create_parser, parse_unit, ParseError, Parser};
pub use registry::{MethodRegistry, MethodSignature, RegistryBuilder};

/// Seam version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing for seam core components
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match "seam_core=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    // A subscriber may already be installed by the host process
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Engine configuration, loadable from a JSON file. Every field is optional
/// in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeamConfig {
    /// Where the driver writes rewritten sources, manifests and the agent
    pub output_dir: PathBuf,
    /// Annotation that opts a class into instrumentation
    pub annotation: String,
    /// Classes opted in without the annotation
    pub instrumented_classes: Vec<String>,
    /// Extension of source files the driver picks up
    pub source_extension: String,
    /// Call depth limit of the runtime
    pub max_eval_depth: usize,
    /// Nesting limit of the rewrite pass
    pub max_rewrite_depth: usize,
    /// Whether the runtime instruments opted-in classes that arrive without guards
    pub load_time_instrumentation: bool,
    /// File name of the published agent artifact
    pub agent_artifact_name: String,
}

impl Default for SeamConfig {
    fn default() -> Self {
        Self {
            output_dir: "target/seam".into(),
            annotation: "Instrument".to_string(),
            instrumented_classes: Vec::new(),
            source_extension: "seam".to_string(),
            max_eval_depth: 100,
            max_rewrite_depth: injector::DEFAULT_MAX_DEPTH,
            load_time_instrumentation: true,
            agent_artifact_name: "seam.agent".to_string(),
        }
    }
}

impl SeamConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SeamError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Annotated, or listed by name
    pub fn opts_in(&self, class: &ClassDecl) -> bool {
        class.has_annotation(&self.annotation)
            || self.instrumented_classes.iter().any(|c| *c == class.name)
    }

    /// Every opted-in class of the unit, nested classes included
    pub fn opted_in_classes(&self, unit: &CompilationUnit) -> Vec<String> {
        fn collect(config: &SeamConfig, class: &ClassDecl, out: &mut Vec<String>) {
            if config.opts_in(class) {
                out.push(class.name.clone());
            }
            for nested in class.nested_classes() {
                collect(config, nested, out);
            }
        }
        let mut out = Vec::new();
        for class in &unit.classes {
            collect(self, class, &mut out);
        }
        out
    }
}

/// Error types for seam core operations
#[derive(thiserror::Error, Debug)]
pub enum SeamError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Instrumentation error: {0}")]
    Inject(#[from] InjectError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluatorError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for seam core operations
pub type Result<T> = std::result::Result<T, SeamError>;
