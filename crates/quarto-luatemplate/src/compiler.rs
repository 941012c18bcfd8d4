/*
 * compiler.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Lowering of chunks into an executable procedure.

use crate::engine::ScriptEngine;
use crate::environment::Environment;
use crate::error::TemplateResult;
use crate::lexer::{Chunk, ChunkKind};
use crate::lua_engine::{LuaEngine, LuaFragments};
use tracing::{debug, warn};

/// One step of a compiled procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Emit literal text.
    Emit(String),
    /// Evaluate an expression and emit its value.
    Eval(String),
    /// Execute statements. Output comes only from explicit `emit` calls.
    Exec(String),
}

/// The executable form of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    steps: Vec<Step>,
    /// Source lowered for the engine that compiled it.
    source: String,
}

impl Procedure {
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// A compiled template, ready to render any number of times.
///
/// Compiled templates hold no interpreter state. Each render builds its own,
/// so one compiled template can serve concurrent renders with different
/// environments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTemplate {
    name: String,
    procedure: Procedure,
}

impl CompiledTemplate {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn procedure(&self) -> &Procedure {
        &self.procedure
    }

    /// Start rendering with the Lua engine, yielding fragments lazily.
    pub fn run(&self, environment: &Environment) -> TemplateResult<LuaFragments> {
        self.run_with(&LuaEngine::new(), environment)
    }

    /// Render with the Lua engine into a single string.
    pub fn render(&self, environment: &Environment) -> TemplateResult<String> {
        self.render_with(&LuaEngine::new(), environment)
    }

    /// Start rendering with `engine`. The template must have been compiled by
    /// the same kind of engine.
    pub fn run_with<E: ScriptEngine>(
        &self,
        engine: &E,
        environment: &Environment,
    ) -> TemplateResult<E::Fragments> {
        debug!(template = %self.name, "Running template");
        engine.start(&self.name, &self.procedure.source, environment)
    }

    /// Render with `engine` into a single string.
    pub fn render_with<E: ScriptEngine>(
        &self,
        engine: &E,
        environment: &Environment,
    ) -> TemplateResult<String> {
        self.run_with(engine, environment)?.collect()
    }
}

/// Turn chunks into steps, one per chunk, in order.
///
/// Expects trimmed chunks with includes already expanded; any include chunk
/// left over is skipped.
pub fn chunks_to_steps(chunks: &[Chunk]) -> Vec<Step> {
    chunks
        .iter()
        .filter_map(|chunk| match chunk.kind {
            ChunkKind::Text => Some(Step::Emit(chunk.content.clone())),
            ChunkKind::Expression => Some(Step::Eval(chunk.content.clone())),
            ChunkKind::Code => Some(Step::Exec(chunk.content.clone())),
            ChunkKind::Include => {
                warn!(include = %chunk.content, "Skipping unexpanded include");
                None
            }
        })
        .collect()
}

/// Compile trimmed chunks into a [`CompiledTemplate`] for `engine`.
pub fn compile_chunks<E: ScriptEngine>(
    chunks: &[Chunk],
    name: &str,
    engine: &E,
) -> TemplateResult<CompiledTemplate> {
    let steps = chunks_to_steps(chunks);
    let source = engine.lower(name, &steps)?;
    debug!(template = %name, steps = steps.len(), "Compiled template");
    Ok(CompiledTemplate {
        name: name.to_string(),
        procedure: Procedure { steps, source },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_chunks_to_steps() {
        let chunks = vec![
            Chunk::text("a"),
            Chunk::new(ChunkKind::Expression, " x "),
            Chunk::new(ChunkKind::Code, " y() "),
            Chunk::new(ChunkKind::Include, "\"left.tpl\""),
        ];
        assert_eq!(
            chunks_to_steps(&chunks),
            vec![
                Step::Emit("a".to_string()),
                Step::Eval(" x ".to_string()),
                Step::Exec(" y() ".to_string()),
            ]
        );
    }

    #[test]
    fn test_compiled_template_is_reusable_after_failure() {
        let chunks = vec![
            Chunk::text("n="),
            Chunk::new(ChunkKind::Expression, "n + 1"),
        ];
        let compiled = compile_chunks(&chunks, "reuse", &LuaEngine::new()).unwrap();

        let mut bad = Environment::new();
        bad.insert("n", "not a number");
        assert!(compiled.render(&bad).is_err());

        let mut good = Environment::new();
        good.insert("n", 41);
        assert_eq!(compiled.render(&good).unwrap(), "n=42");
    }

    #[test]
    fn test_compiled_template_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledTemplate>();
    }
}
