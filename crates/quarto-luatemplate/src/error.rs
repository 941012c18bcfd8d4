/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for template compilation and execution.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during template operations.
///
/// Every variant is fatal for the call that produced it. A failed render
/// leaves the [`CompiledTemplate`](crate::CompiledTemplate) untouched and
/// reusable.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// An include directive does not hold a single quoted string literal.
    #[error("Invalid include path literal {literal}: {message}")]
    SyntaxLiteral { literal: String, message: String },

    /// An include ancestry revisits a path.
    #[error("Cyclic include of '{}' (via {})", .path.display(), format_chain(.chain))]
    CyclicInclude { path: PathBuf, chain: Vec<PathBuf> },

    /// An included file is missing or unreadable.
    #[error("Failed to read include '{}': {source}", .path.display())]
    IncludeIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The generated procedure does not load (bad code or expression syntax).
    #[error("Syntax error in template '{name}': {message}")]
    CodeSyntax { name: String, message: String },

    /// Code tried to reach a capability outside the whitelist, or supplied
    /// precompiled bytecode.
    #[error("Disallowed code in template '{name}': {message}")]
    DisallowedCode { name: String, message: String },

    /// The procedure raised while running.
    #[error("Runtime error in template '{name}': {message}")]
    Runtime { name: String, message: String },

    /// The configuration could not be built.
    #[error("Invalid template options: {message}")]
    InvalidOptions { message: String },
}

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

fn format_chain(chain: &[PathBuf]) -> String {
    if chain.is_empty() {
        return "<template>".to_string();
    }
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cyclic_include_display() {
        let err = TemplateError::CyclicInclude {
            path: PathBuf::from("a.tpl"),
            chain: vec![PathBuf::from("a.tpl"), PathBuf::from("b.tpl")],
        };
        assert_eq!(
            err.to_string(),
            "Cyclic include of 'a.tpl' (via a.tpl -> b.tpl)"
        );
    }

    #[test]
    fn test_include_io_keeps_source() {
        let err = TemplateError::IncludeIo {
            path: PathBuf::from("missing.tpl"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.to_string().contains("missing.tpl"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
