/*!
# Driver - Build Pipeline

Runs the injector over whole compilation units. Each opted-in class goes
through registry and rewrite on its own; a class that fails is emitted
unchanged with an error diagnostic, and the rest of the unit is unaffected.

[`BuildSession`] carries the state that lives for one build process: the
agent publication latch and the diagnostics attached to the build output.
*/

pub mod file_driver;


use std::path::Path;

use tracing::{error, info};

use crate::artifact::{self, PublicationState, AGENT_ARTIFACT};
use crate::ast::{ClassDecl, CompilationUnit};
use crate::diagnostics::Diagnostics;
use crate::injector::{Injector, RewriteResult, SiteManifest, UnitIndex};
use crate::SeamConfig;

pub use file_driver::{FileDriver, FileSummary};

/// Process-scoped build state
#[derive(Debug)]
pub struct BuildSession {
    config: SeamConfig,
    artifact: &'static [u8],
    /// Set before the first publication attempt, never reset
    publish_attempted: bool,
    publication: PublicationState,
    pub diagnostics: Diagnostics,
}

impl BuildSession {
    pub fn new(config: SeamConfig) -> Self {
        Self {
            config,
            artifact: AGENT_ARTIFACT,
            publish_attempted: false,
            publication: PublicationState::Pending,
            diagnostics: Diagnostics::new(),
        }
    }

    /// Publish different artifact bytes than the bundled ones
    pub fn with_artifact(mut self, bytes: &'static [u8]) -> Self {
        self.artifact = bytes;
        self
    }

    pub fn config(&self) -> &SeamConfig {
        &self.config
    }

    pub fn publication(&self) -> &PublicationState {
        &self.publication
    }

    /// Write the agent artifact into `dir` the first time this is called.
    /// Later calls return the first outcome without touching the disk.
    /// Failures become error diagnostics.
    pub fn publish_agent(&mut self, dir: &Path) -> &PublicationState {
        if self.publish_attempted {
            return &self.publication;
        }
        self.publish_attempted = true;

        let name = self.config.agent_artifact_name.clone();
        self.publication = match artifact::publish(self.artifact, dir, &name) {
            Ok(path) => {
                info!(path = %path.display(), bytes = self.artifact.len(), "published agent artifact");
                PublicationState::Published(path)
            }
            Err(e) => {
                error!(artifact = %name, error = %e, "agent artifact not published");
                self.diagnostics.error(&name, e.to_string());
                PublicationState::Failed
            }
        };
        &self.publication
    }
}

/// A unit after the pipeline: every class in original order, rewritten or
/// not, plus the rewrite results of the instrumented ones
#[derive(Debug, Clone)]
pub struct UnitOutput {
    pub unit: CompilationUnit,
    pub results: Vec<RewriteResult>,
}

impl UnitOutput {
    pub fn manifests(&self) -> impl Iterator<Item = &SiteManifest> {
        self.results.iter().map(|r| &r.manifest)
    }

    pub fn site_count(&self) -> usize {
        self.manifests().map(SiteManifest::len).sum()
    }
}

enum ClassOutcome {
    NotOptedIn(ClassDecl),
    Instrumented(RewriteResult),
    Degraded { class: ClassDecl, reason: String },
}

pub struct Pipeline {
    config: SeamConfig,
}

impl Pipeline {
    pub fn new(config: SeamConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SeamConfig {
        &self.config
    }

    fn index(&self, unit: &CompilationUnit) -> UnitIndex {
        UnitIndex::new(unit).with_opted_in(self.config.opted_in_classes(unit))
    }

    fn instrument(&self, index: &UnitIndex, class: &ClassDecl) -> ClassOutcome {
        if !self.config.opts_in(class) {
            return ClassOutcome::NotOptedIn(class.clone());
        }
        let injector = Injector::new(index).with_max_depth(self.config.max_rewrite_depth);
        match injector.instrument_class(class) {
            Ok(result) => ClassOutcome::Instrumented(result),
            Err(e) => ClassOutcome::Degraded {
                class: class.clone(),
                reason: e.to_string(),
            },
        }
    }

    /// Instrument every opted-in class of `unit`, one after another
    pub fn process_unit(&self, session: &mut BuildSession, unit: &CompilationUnit) -> UnitOutput {
        let index = self.index(unit);
        let outcomes: Vec<ClassOutcome> = unit
            .classes
            .iter()
            .map(|class| self.instrument(&index, class))
            .collect();
        collect_output(session, outcomes)
    }

    /// Same as [`Pipeline::process_unit`], one thread per class
    pub fn process_classes_parallel(
        &self,
        session: &mut BuildSession,
        unit: &CompilationUnit,
    ) -> UnitOutput {
        let index = self.index(unit);
        let index = &index;
        let outcomes: Vec<ClassOutcome> = std::thread::scope(|scope| {
            let handles: Vec<_> = unit
                .classes
                .iter()
                .map(|class| scope.spawn(move || self.instrument(index, class)))
                .collect();
            handles
                .into_iter()
                .zip(&unit.classes)
                .map(|(handle, class)| {
                    handle.join().unwrap_or_else(|_| ClassOutcome::Degraded {
                        class: class.clone(),
                        reason: "instrumentation thread panicked".to_string(),
                    })
                })
                .collect()
        });
        collect_output(session, outcomes)
    }
}

fn collect_output(session: &mut BuildSession, outcomes: Vec<ClassOutcome>) -> UnitOutput {
    let mut classes = Vec::with_capacity(outcomes.len());
    let mut results = Vec::new();
    for outcome in outcomes {
        match outcome {
            ClassOutcome::NotOptedIn(class) => classes.push(class),
            ClassOutcome::Instrumented(result) => {
                for skipped in &result.skipped {
                    session.diagnostics.warning(
                        &skipped.class,
                        format!("skipped at {}: {}", skipped.span, skipped.reason),
                    );
                }
                classes.push(result.class.clone());
                results.push(result);
            }
            ClassOutcome::Degraded { class, reason } => {
                session.diagnostics.error(
                    &class.name,
                    format!("left uninstrumented: {reason}"),
                );
                classes.push(class);
            }
        }
    }
    UnitOutput {
        unit: CompilationUnit { classes },
        results,
    }
}
