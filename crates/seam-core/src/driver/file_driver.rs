/*!
# FileDriver - Directory Build

Walks a source tree, runs every `.seam` unit through the [`Pipeline`], and
writes the rewritten source plus a JSON site manifest per file into the output
directory. The agent artifact is published once, before the first file.

The output directory may sit inside the source tree (the default
`target/seam` under `.` does); the walk never descends into it.
*/

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::ast::ToSource;
use crate::injector::SiteManifest;
use crate::parser::parse_unit;
use crate::SeamConfig;

use super::{BuildSession, Pipeline};

/// Suffix of the per-file manifest written next to the rewritten source
pub const MANIFEST_SUFFIX: &str = "sites.json";

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileSummary {
    pub files_processed: u64,
    pub files_instrumented: u64,
    pub classes_instrumented: u64,
    pub sites: u64,
    pub outputs: Vec<PathBuf>,
    pub errors: Vec<String>,
}

impl FileSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: FileSummary) {
        self.files_processed += other.files_processed;
        self.files_instrumented += other.files_instrumented;
        self.classes_instrumented += other.classes_instrumented;
        self.sites += other.sites;
        self.outputs.extend(other.outputs);
        self.errors.extend(other.errors);
    }

    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct FileDriver {
    pipeline: Pipeline,
    parallel: bool,
}

impl FileDriver {
    pub fn new(config: SeamConfig) -> Self {
        Self {
            pipeline: Pipeline::new(config),
            parallel: false,
        }
    }

    /// Instrument the classes of each unit on separate threads
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn config(&self) -> &SeamConfig {
        self.pipeline.config()
    }

    /// Process a single file or every matching file under a directory
    pub fn run(&self, session: &mut BuildSession, source: &Path, output_dir: &Path) -> Result<FileSummary> {
        if !source.exists() {
            return Err(anyhow!("Source path does not exist: {}", source.display()));
        }
        fs::create_dir_all(output_dir)?;
        let output_root = output_dir.canonicalize()?;
        session.publish_agent(output_dir);

        let mut summary = FileSummary::new();
        if source.is_dir() {
            self.walk(session, source, output_dir, &output_root, &mut summary)?;
        } else {
            summary.merge(self.process_file(session, source, output_dir)?);
        }

        info!(
            files = summary.files_processed,
            instrumented = summary.files_instrumented,
            sites = summary.sites,
            errors = summary.errors.len(),
            "build finished"
        );
        Ok(summary)
    }

    fn walk(
        &self,
        session: &mut BuildSession,
        dir: &Path,
        output_dir: &Path,
        output_root: &Path,
        summary: &mut FileSummary,
    ) -> Result<()> {
        let mut entries = fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        // Stable output order regardless of directory listing order
        entries.sort();

        for path in entries {
            if path.is_dir() {
                if is_within(&path, output_root) {
                    debug!(dir = %path.display(), "skipping output directory");
                    continue;
                }
                let name = path.file_name().map(PathBuf::from).unwrap_or_default();
                let nested_output = output_dir.join(name);
                fs::create_dir_all(&nested_output)?;
                self.walk(session, &path, &nested_output, output_root, summary)?;
            } else if self.should_process_file(&path) {
                match self.process_file(session, &path, output_dir) {
                    Ok(file_summary) => summary.merge(file_summary),
                    Err(e) => summary
                        .errors
                        .push(format!("Error processing {}: {}", path.display(), e)),
                }
            }
        }
        Ok(())
    }

    fn should_process_file(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(&self.config().source_extension))
            .unwrap_or(false)
    }

    /// Parse, instrument and write one unit. A parse failure is reported as a
    /// diagnostic and yields no output files.
    pub fn process_file(
        &self,
        session: &mut BuildSession,
        path: &Path,
        output_dir: &Path,
    ) -> Result<FileSummary> {
        let mut summary = FileSummary::new();
        summary.files_processed += 1;

        let source = fs::read_to_string(path)?;
        let subject = path.display().to_string();
        let unit = match parse_unit(&source) {
            Ok(unit) => unit,
            Err(e) => {
                session.diagnostics.error(&subject, e.to_string());
                summary.errors.push(format!("{subject}: {e}"));
                return Ok(summary);
            }
        };

        let output = if self.parallel {
            self.pipeline.process_classes_parallel(session, &unit)
        } else {
            self.pipeline.process_unit(session, &unit)
        };

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("no file name in {}", path.display()))?;
        let extension = &self.config().source_extension;
        let source_out = output_dir.join(format!("{stem}.{extension}"));
        let manifest_out = output_dir.join(format!("{stem}.{MANIFEST_SUFFIX}"));

        fs::write(&source_out, output.unit.to_source())?;
        let manifests: Vec<&SiteManifest> = output.manifests().collect();
        fs::write(&manifest_out, serde_json::to_string_pretty(&manifests)?)?;
        debug!(file = %subject, out = %source_out.display(), "wrote instrumented unit");

        if !output.results.is_empty() {
            summary.files_instrumented += 1;
        }
        summary.classes_instrumented += output.results.len() as u64;
        summary.sites += output.site_count() as u64;
        summary.outputs.push(source_out);
        summary.outputs.push(manifest_out);
        Ok(summary)
    }
}

fn is_within(path: &Path, root: &Path) -> bool {
    path.canonicalize()
        .map(|path| path.starts_with(root))
        .unwrap_or(false)
}

/// Read back the manifests a build wrote for one unit
pub fn read_manifests(path: &Path) -> Result<Vec<SiteManifest>> {
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}
