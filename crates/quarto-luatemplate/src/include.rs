/*
 * include.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Include resolution.
//!
//! `#{include: "path" }#` directives are replaced in place by the chunks of
//! the referenced file, recursively. Every visited file becomes a node in an
//! [`IncludeTree`] whose parent links record the include ancestry; a path
//! that reappears among its own ancestors is a cycle. A file reached along
//! two different branches (a diamond) is not a cycle and is expanded twice.

use crate::engine::ScriptEngine;
use crate::error::{TemplateError, TemplateResult};
use crate::lexer::{Chunk, ChunkKind, ChunkScanner, push_coalesced};
use crate::options::TemplateOptions;
use indexmap::IndexSet;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Loads the source of an included file.
pub trait IncludeLoader {
    fn load(&self, path: &Path) -> std::io::Result<String>;
}

/// Loader that reads includes from the filesystem.
#[derive(Debug, Clone, Default)]
pub struct FileSystemLoader;

impl IncludeLoader for FileSystemLoader {
    fn load(&self, path: &Path) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Loader that serves includes from an in-memory map keyed by resolved path.
///
/// Useful for tests and for templates bundled into an application.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    files: HashMap<PathBuf, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file.
    pub fn add(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> &mut Self {
        self.files.insert(path.into(), content.into());
        self
    }

    /// Create a loader holding the given files.
    pub fn with_files(
        files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<String>)>,
    ) -> Self {
        let mut loader = Self::new();
        for (path, content) in files {
            loader.add(path, content);
        }
        loader
    }
}

impl IncludeLoader for MemoryLoader {
    fn load(&self, path: &Path) -> std::io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no in-memory template at {}", path.display()),
            )
        })
    }
}

/// Index of a node in an [`IncludeTree`].
pub type NodeId = usize;

#[derive(Debug, Clone)]
struct IncludeNode {
    path: Option<PathBuf>,
    parent: Option<NodeId>,
}

/// Arena of visited templates with parent links.
///
/// Node 0 is the top-level template; its path is unknown when the template
/// was given as text.
#[derive(Debug, Clone)]
pub struct IncludeTree {
    nodes: Vec<IncludeNode>,
}

impl IncludeTree {
    /// Create a tree holding only the root template.
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            nodes: vec![IncludeNode {
                path: root,
                parent: None,
            }],
        }
    }

    pub const ROOT: NodeId = 0;

    /// Path of a node, if known.
    pub fn path(&self, id: NodeId) -> Option<&Path> {
        self.nodes.get(id).and_then(|node| node.path.as_deref())
    }

    /// Record that `parent` includes `path`.
    ///
    /// Fails if `path` is `parent` itself or one of its ancestors.
    pub fn register(&mut self, parent: NodeId, path: PathBuf) -> TemplateResult<NodeId> {
        let mut current = Some(parent);
        while let Some(id) = current {
            let node = &self.nodes[id];
            if node.path.as_deref() == Some(path.as_path()) {
                return Err(TemplateError::CyclicInclude {
                    chain: self.ancestry(parent),
                    path,
                });
            }
            current = node.parent;
        }

        self.nodes.push(IncludeNode {
            path: Some(path),
            parent: Some(parent),
        });
        Ok(self.nodes.len() - 1)
    }

    /// Known paths from the root down to `id`.
    pub fn ancestry(&self, id: NodeId) -> Vec<PathBuf> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(id) = current {
            let node = &self.nodes[id];
            if let Some(path) = &node.path {
                chain.push(path.clone());
            }
            current = node.parent;
        }
        chain.reverse();
        chain
    }

    /// Distinct included paths in first-visit order. The root is not listed.
    pub fn dependencies(&self) -> IndexSet<PathBuf> {
        self.nodes
            .iter()
            .skip(1)
            .filter_map(|node| node.path.clone())
            .collect()
    }
}

/// Resolve an include path.
///
/// Absolute paths are used as given. Relative paths resolve against
/// `base_path` when set, otherwise against the directory of the including
/// file, otherwise they are left as given. The result is normalized so the
/// same file always maps to the same path.
pub fn resolve_include_path(
    include: &str,
    base_path: Option<&Path>,
    current_file: Option<&Path>,
) -> PathBuf {
    let include_path = Path::new(include);
    let joined = if include_path.has_root() {
        include_path.to_path_buf()
    } else if let Some(base) = base_path {
        base.join(include_path)
    } else {
        match current_file.and_then(Path::parent) {
            Some(dir) => dir.join(include_path),
            None => include_path.to_path_buf(),
        }
    };
    normalize_path(&joined)
}

/// Remove `.` components and resolve `..` against the preceding component,
/// without touching the filesystem. Leading `..` of a relative path stay.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                // Can't go above root
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other),
        }
    }
    normalized
}

/// Lexes a template and expands its includes.
pub struct IncludeResolver<'a, E: ScriptEngine, L: IncludeLoader> {
    options: &'a TemplateOptions,
    engine: &'a E,
    loader: &'a L,
    tree: IncludeTree,
}

impl<'a, E: ScriptEngine, L: IncludeLoader> IncludeResolver<'a, E, L> {
    pub fn new(options: &'a TemplateOptions, engine: &'a E, loader: &'a L) -> Self {
        Self {
            options,
            engine,
            loader,
            tree: IncludeTree::new(None),
        }
    }

    /// Lex `text` with all includes expanded.
    ///
    /// `path` is the file `text` came from, if any. It seeds the include
    /// tree so relative includes and cycles back to the top-level file are
    /// handled.
    pub fn resolve(
        mut self,
        text: &str,
        path: Option<&Path>,
    ) -> TemplateResult<(Vec<Chunk>, IncludeTree)> {
        self.tree = IncludeTree::new(path.map(normalize_path));
        let chunks = self.expand(text, IncludeTree::ROOT)?;
        Ok((chunks, self.tree))
    }

    fn expand(&mut self, text: &str, node: NodeId) -> TemplateResult<Vec<Chunk>> {
        let mut chunks = Vec::new();
        for chunk in ChunkScanner::new(text, self.options)? {
            if chunk.kind != ChunkKind::Include {
                push_coalesced(&mut chunks, chunk);
                continue;
            }

            let include = self.engine.eval_string_literal(&chunk.content)?;
            let path = resolve_include_path(
                &include,
                self.options.base_path.as_deref(),
                self.tree.path(node),
            );
            let child = self.tree.register(node, path.clone())?;
            debug!(
                path = %path.display(),
                depth = self.tree.ancestry(child).len(),
                "Resolving include"
            );

            let source = self
                .loader
                .load(&path)
                .map_err(|source| TemplateError::IncludeIo {
                    path: path.clone(),
                    source,
                })?;
            for included in self.expand(&source, child)? {
                push_coalesced(&mut chunks, included);
            }
        }
        Ok(chunks)
    }
}
