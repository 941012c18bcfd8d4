/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Text templates with embedded Lua.
//!
//! A template is literal text interleaved with directives:
//!
//! - Code: `#{ for i = 1, 3 do emit(i) end }#`
//! - Expressions: `#{= user.name }#`
//! - Includes: `#{include: "header.tpl" }#`
//! - Trim markers: `#{- ... -}#` trims the adjacent whitespace, `#{+ ... +}#`
//!   keeps it, overriding the configured trim policy
//!
//! # Architecture
//!
//! Compilation runs in separate stages, each consuming the full output of
//! the previous one:
//!
//! 1. [`lexer`] splits text into chunks;
//! 2. [`include`] expands includes, rejecting cycles;
//! 3. [`trim`] removes whitespace around directives;
//! 4. [`compiler`] lowers the chunks into a procedure for a [`ScriptEngine`].
//!
//! Rendering runs the procedure in a sandboxed Lua state as a coroutine that
//! yields one fragment at a time. Compiled templates carry no interpreter
//! state and can be rendered any number of times.
//!
//! # Example
//!
//! ```
//! use quarto_luatemplate::{Environment, TemplateError, TemplateOptions, compile, render};
//!
//! fn main() -> Result<(), TemplateError> {
//!     let template = compile("Hello #{= name }#!", "greeting", &TemplateOptions::default())?;
//!
//!     let mut env = Environment::new();
//!     env.insert("name", "World");
//!
//!     assert_eq!(render(&template, &env)?, "Hello World!");
//!     Ok(())
//! }
//! ```

pub mod compiler;
pub mod engine;
pub mod environment;
pub mod error;
pub mod include;
pub mod lexer;
pub mod lua_engine;
pub mod options;
pub mod pipeline;
pub mod sandbox;
pub mod trim;

// Re-export main types at crate root
pub use compiler::{CompiledTemplate, Procedure, Step};
pub use engine::ScriptEngine;
pub use environment::{EnvValue, Environment, HostFunction};
pub use error::{TemplateError, TemplateResult};
pub use include::{FileSystemLoader, IncludeLoader, IncludeTree, MemoryLoader};
pub use lexer::{Chunk, ChunkKind, TrimOverride};
pub use lua_engine::{LuaEngine, LuaFragments};
pub use options::{TemplateOptions, TrimPolicy, merge};
pub use pipeline::TemplateCompiler;

use indexmap::IndexSet;
use std::path::{Path, PathBuf};

/// Lex `template`, expanding includes.
pub fn lex(template: &str, options: &TemplateOptions) -> TemplateResult<Vec<Chunk>> {
    TemplateCompiler::new(options.clone()).lex(template)
}

/// Lex the template file at `path`, expanding includes relative to it.
pub fn lex_file(path: &Path, options: &TemplateOptions) -> TemplateResult<Vec<Chunk>> {
    TemplateCompiler::new(options.clone()).lex_file(path)
}

/// Distinct files included by `template`, in first-visit order.
pub fn get_dependencies(
    template: &str,
    options: &TemplateOptions,
) -> TemplateResult<IndexSet<PathBuf>> {
    TemplateCompiler::new(options.clone()).dependencies(template)
}

/// Expand includes in `template` and write it back in directive syntax.
pub fn precompile(template: &str, options: &TemplateOptions) -> TemplateResult<String> {
    TemplateCompiler::new(options.clone()).precompile(template)
}

/// Compile `template` under `name`.
pub fn compile(
    template: &str,
    name: &str,
    options: &TemplateOptions,
) -> TemplateResult<CompiledTemplate> {
    TemplateCompiler::new(options.clone()).compile(template, name)
}

/// Compile the template file at `path`.
pub fn compile_file(path: &Path, options: &TemplateOptions) -> TemplateResult<CompiledTemplate> {
    TemplateCompiler::new(options.clone()).compile_file(path)
}

/// Start rendering `template`, yielding output fragments on demand.
pub fn run(template: &CompiledTemplate, environment: &Environment) -> TemplateResult<LuaFragments> {
    template.run(environment)
}

/// Render `template` into a single string.
pub fn render(template: &CompiledTemplate, environment: &Environment) -> TemplateResult<String> {
    template.render(environment)
}
