/*
 * engine.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The seam between the template pipeline and the embedded language.
//!
//! The lexer, include resolver and compiler never evaluate code themselves.
//! They hand string literals, compiled steps and environments to a
//! [`ScriptEngine`], which owns everything language-specific: decoding
//! literals, lowering steps into its own source form, and running that
//! source as a fragment generator. [`LuaEngine`](crate::LuaEngine) is the
//! implementation used by default.

use crate::compiler::Step;
use crate::environment::Environment;
use crate::error::TemplateResult;

pub trait ScriptEngine {
    /// Lazily produced output of one execution.
    type Fragments: Iterator<Item = TemplateResult<String>>;

    /// Decode a quoted string literal with no capabilities available.
    ///
    /// Returns [`TemplateError::SyntaxLiteral`](crate::TemplateError::SyntaxLiteral)
    /// if `literal` is not a single string literal.
    fn eval_string_literal(&self, literal: &str) -> TemplateResult<String>;

    /// Lower compiled steps into source for this engine.
    ///
    /// The result must be loadable; syntax problems are reported here rather
    /// than at render time.
    fn lower(&self, name: &str, steps: &[Step]) -> TemplateResult<String>;

    /// Start executing lowered `source` against `environment`.
    ///
    /// Nothing runs until the returned iterator is polled; each `next()`
    /// runs the procedure up to its next emitted fragment.
    fn start(
        &self,
        name: &str,
        source: &str,
        environment: &Environment,
    ) -> TemplateResult<Self::Fragments>;
}
