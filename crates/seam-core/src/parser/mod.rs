// Parser module - turns seam source text into a `CompilationUnit`
use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::ast::CompilationUnit;

pub mod grammar;

#[cfg(test)]
mod tests;

pub use grammar::{SeamParser, DEFAULT_MAX_NESTING};

/// Failure to parse a unit at all. Individual members that fail to parse are
/// not errors: they come back as `Member::Malformed`.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Parse error at {line}:{column}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

/// Trait for all seam source parsers
pub trait Parser: Send + Sync {
    /// Parse source text into a compilation unit
    fn parse_unit(&mut self, source: &str) -> std::result::Result<CompilationUnit, ParseError>;

    /// Parse a file
    fn parse_file(&mut self, path: &Path) -> Result<CompilationUnit> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        self.parse_unit(&source)
            .with_context(|| format!("parsing {}", path.display()))
    }

    /// Get parser name for debugging
    fn name(&self) -> &'static str;
}

/// Create a parser by name
pub fn create_parser(parser_type: &str) -> Result<Box<dyn Parser>> {
    match parser_type {
        "seam" => Ok(Box::new(SeamParser::new())),
        _ => anyhow::bail!("Unknown parser type: {}", parser_type),
    }
}

/// Convenience for tests and one-shot callers
pub fn parse_unit(source: &str) -> std::result::Result<CompilationUnit, ParseError> {
    SeamParser::new().parse_unit(source)
}
