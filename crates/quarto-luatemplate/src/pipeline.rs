/*
 * pipeline.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The full compilation pipeline: lex and expand includes, trim, lower.
//!
//! Each stage runs to completion before the next one starts.

use crate::compiler::{CompiledTemplate, compile_chunks};
use crate::engine::ScriptEngine;
use crate::error::{TemplateError, TemplateResult};
use crate::include::{FileSystemLoader, IncludeLoader, IncludeResolver, IncludeTree};
use crate::lexer::{Chunk, serialize};
use crate::lua_engine::LuaEngine;
use crate::options::TemplateOptions;
use crate::trim::apply_trim;
use indexmap::IndexSet;
use std::path::{Path, PathBuf};

/// Compiles templates with a given engine, include loader and options.
pub struct TemplateCompiler<E: ScriptEngine = LuaEngine, L: IncludeLoader = FileSystemLoader> {
    options: TemplateOptions,
    engine: E,
    loader: L,
}

impl TemplateCompiler {
    /// Compiler using Lua and the filesystem.
    pub fn new(options: TemplateOptions) -> Self {
        Self::with_parts(options, LuaEngine::new(), FileSystemLoader)
    }
}

impl<E: ScriptEngine, L: IncludeLoader> TemplateCompiler<E, L> {
    pub fn with_parts(options: TemplateOptions, engine: E, loader: L) -> Self {
        Self {
            options,
            engine,
            loader,
        }
    }

    pub fn options(&self) -> &TemplateOptions {
        &self.options
    }

    fn resolve(
        &self,
        text: &str,
        path: Option<&Path>,
    ) -> TemplateResult<(Vec<Chunk>, IncludeTree)> {
        IncludeResolver::new(&self.options, &self.engine, &self.loader).resolve(text, path)
    }

    fn read(&self, path: &Path) -> TemplateResult<String> {
        self.loader
            .load(path)
            .map_err(|source| TemplateError::IncludeIo {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Chunks of `text` with includes expanded.
    pub fn lex(&self, text: &str) -> TemplateResult<Vec<Chunk>> {
        Ok(self.resolve(text, None)?.0)
    }

    /// Chunks of the template file at `path` with includes expanded.
    pub fn lex_file(&self, path: &Path) -> TemplateResult<Vec<Chunk>> {
        let text = self.read(path)?;
        Ok(self.resolve(&text, Some(path))?.0)
    }

    /// Distinct files included (directly or not) by `text`, in first-visit order.
    pub fn dependencies(&self, text: &str) -> TemplateResult<IndexSet<PathBuf>> {
        Ok(self.resolve(text, None)?.1.dependencies())
    }

    /// Distinct files included by the template file at `path`.
    pub fn file_dependencies(&self, path: &Path) -> TemplateResult<IndexSet<PathBuf>> {
        let text = self.read(path)?;
        Ok(self.resolve(&text, Some(path))?.1.dependencies())
    }

    /// `text` with includes expanded, written back in directive syntax.
    ///
    /// No trimming is applied; trim markers are written back as they were.
    pub fn precompile(&self, text: &str) -> TemplateResult<String> {
        Ok(serialize(&self.lex(text)?, &self.options))
    }

    /// The template file at `path` with includes expanded, in directive syntax.
    pub fn precompile_file(&self, path: &Path) -> TemplateResult<String> {
        Ok(serialize(&self.lex_file(path)?, &self.options))
    }

    /// Compile `text` under `name`, or under the configured template name
    /// when `name` is empty.
    pub fn compile(&self, text: &str, name: &str) -> TemplateResult<CompiledTemplate> {
        let name = if name.is_empty() {
            self.options.template_name.as_str()
        } else {
            name
        };
        self.compile_resolved(text, None, name)
    }

    /// Compile the template file at `path`, named after the path.
    pub fn compile_file(&self, path: &Path) -> TemplateResult<CompiledTemplate> {
        let text = self.read(path)?;
        self.compile_resolved(&text, Some(path), &path.display().to_string())
    }

    fn compile_resolved(
        &self,
        text: &str,
        path: Option<&Path>,
        name: &str,
    ) -> TemplateResult<CompiledTemplate> {
        let (chunks, _) = self.resolve(text, path)?;
        let chunks = apply_trim(&chunks, &self.options);
        compile_chunks(&chunks, name, &self.engine)
    }
}
