// Load-time instrumentation: the same registry and rewrite passes the build
// pipeline runs, applied to classes that arrive at the runtime unrewritten.

use tracing::info;

use crate::ast::{ClassDecl, CompilationUnit};
use crate::injector::{InjectError, Injector, ManifestOrigin, RewriteResult, UnitIndex};
use crate::SeamConfig;

#[derive(Debug, Clone)]
pub struct InstrumentationAgent {
    config: SeamConfig,
}

impl InstrumentationAgent {
    pub fn new(config: &SeamConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.load_time_instrumentation
    }

    /// Opted in, not already instrumented, and the agent is switched on
    pub fn wants(&self, class: &ClassDecl) -> bool {
        self.is_enabled() && self.config.opts_in(class) && !class.contains_guards()
    }

    pub fn transform(
        &self,
        unit: &CompilationUnit,
        class: &ClassDecl,
    ) -> Result<RewriteResult, InjectError> {
        let index = UnitIndex::new(unit).with_opted_in(self.config.opted_in_classes(unit));
        let result = Injector::new(&index)
            .with_origin(ManifestOrigin::LoadTime)
            .with_max_depth(self.config.max_rewrite_depth)
            .instrument_class(class)?;
        info!(class = %class.name, sites = result.manifest.len(), "instrumented on load");
        Ok(result)
    }
}
