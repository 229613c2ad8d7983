//! CLI command definitions and execution
//!
//! Every command renders its output to a string so it can be driven from
//! tests without a terminal.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use seam_core::{
    parse_unit, BuildSession, CompilationUnit, EvaluatorError, FileDriver, Pipeline, Runtime,
    SeamConfig, SiteManifest, Value,
};
use tracing::debug;

/// Available commands
#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    /// Instrument a file or directory tree into `out`
    Instrument {
        source: PathBuf,
        out: PathBuf,
        parallel: bool,
    },
    /// List the injection sites of one unit
    Sites { file: PathBuf, json: bool },
    /// Evaluate a method of an instrumented class
    Run {
        file: PathBuf,
        class: String,
        method: String,
        args: Vec<String>,
        /// Instrument on load instead of through the build pipeline
        agent: bool,
    },
}

/// What a command printed and whether it counts as a success
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub text: String,
    pub success: bool,
}

impl CommandOutput {
    fn ok(text: String) -> Self {
        Self {
            text,
            success: true,
        }
    }
}

pub fn execute(command: &CliCommand, config: &SeamConfig) -> Result<CommandOutput> {
    debug!(?command, "executing command");
    match command {
        CliCommand::Instrument {
            source,
            out,
            parallel,
        } => instrument(source, out, *parallel, config),
        CliCommand::Sites { file, json } => sites(file, *json, config),
        CliCommand::Run {
            file,
            class,
            method,
            args,
            agent,
        } => run(file, class, method, args, *agent, config),
    }
}

fn instrument(source: &Path, out: &Path, parallel: bool, config: &SeamConfig) -> Result<CommandOutput> {
    let mut session = BuildSession::new(config.clone());
    let summary = FileDriver::new(config.clone())
        .parallel(parallel)
        .run(&mut session, source, out)?;

    let mut text = String::new();
    writeln!(
        text,
        "Processed {} file(s): {} instrumented, {} class(es), {} site(s)",
        summary.files_processed, summary.files_instrumented, summary.classes_instrumented, summary.sites
    )?;
    match session.publication().published_path() {
        Some(path) => writeln!(text, "Agent published to {}", path.display())?,
        None => writeln!(text, "Agent not published")?,
    }
    for diagnostic in &session.diagnostics {
        writeln!(text, "{diagnostic}")?;
    }

    Ok(CommandOutput {
        text,
        success: summary.success() && !session.diagnostics.has_errors(),
    })
}

fn load(file: &Path) -> Result<CompilationUnit> {
    let source = fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    parse_unit(&source).map_err(|e| anyhow!("{}: {e}", file.display()))
}

fn sites(file: &Path, json: bool, config: &SeamConfig) -> Result<CommandOutput> {
    let unit = load(file)?;
    let mut session = BuildSession::new(config.clone());
    let output = Pipeline::new(config.clone()).process_unit(&mut session, &unit);
    let manifests: Vec<&SiteManifest> = output.manifests().collect();

    if json {
        return Ok(CommandOutput::ok(serde_json::to_string_pretty(&manifests)?));
    }

    let mut text = String::new();
    if manifests.is_empty() {
        writeln!(text, "No instrumented classes")?;
    }
    for manifest in manifests {
        writeln!(text, "{} ({} site(s))", manifest.class, manifest.len())?;
        for site in manifest {
            writeln!(
                text,
                "  {:<20} {:<8} {}  {}",
                site.kind.to_string(),
                site.result.to_string(),
                site.span,
                site.id
            )?;
        }
    }
    for diagnostic in &session.diagnostics {
        writeln!(text, "{diagnostic}")?;
    }
    Ok(CommandOutput {
        text,
        success: !session.diagnostics.has_errors(),
    })
}

fn run(
    file: &Path,
    class: &str,
    method: &str,
    args: &[String],
    agent: bool,
    config: &SeamConfig,
) -> Result<CommandOutput> {
    let unit = load(file)?;
    let runtime_config = SeamConfig {
        load_time_instrumentation: agent,
        ..config.clone()
    };
    let runtime = Runtime::with_config(runtime_config);

    if agent {
        runtime.load_unit(&unit)?;
    } else {
        let output = Pipeline::new(config.clone()).process_unit(&mut BuildSession::new(config.clone()), &unit);
        runtime.load_unit(&output.unit)?;
        for manifest in output.manifests() {
            runtime.add_manifest(manifest.clone());
        }
    }

    let loaded = runtime
        .class(class)
        .ok_or_else(|| anyhow!("class '{class}' not found in {}", file.display()))?;
    let is_static = loaded
        .methods
        .iter()
        .filter(|m| m.name == method)
        .all(|m| m.modifiers.is_static);
    let args: Vec<Value> = args.iter().map(|a| parse_value(a)).collect();

    let result = if is_static {
        runtime.call_static(class, method, args)
    } else {
        let receiver = runtime.instantiate(class, Vec::new())?;
        runtime.call_method(&receiver, method, args)
    };

    match result {
        Ok(value) => Ok(CommandOutput::ok(format!("{value}\n"))),
        Err(EvaluatorError::Thrown { class, message, .. }) => Ok(CommandOutput {
            text: format!("Uncaught {class}: {message}\n"),
            success: false,
        }),
        Err(e) => Err(e.into()),
    }
}

/// Literal form of a command line argument: numbers, booleans and `null`
/// are typed, anything else is a string (surrounding quotes removed)
pub fn parse_value(arg: &str) -> Value {
    match arg {
        "null" => return Value::Null,
        "true" => return Value::Boolean(true),
        "false" => return Value::Boolean(false),
        _ => {}
    }
    if let Ok(n) = arg.parse::<i64>() {
        return Value::Integer(n);
    }
    if let Ok(d) = arg.parse::<f64>() {
        return Value::Float(d);
    }
    let unquoted = arg
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(arg);
    Value::string(unquoted)
}
