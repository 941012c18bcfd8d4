/*
 * lua_engine.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Lua implementation of [`ScriptEngine`].
//!
//! Compiled steps lower to a single Lua chunk:
//!
//! ```text
//! local __emit = ...
//! __emit("literal text")
//! __emit((expression
//! ))
//! statements
//! ```
//!
//! The chunk runs as a coroutine. `__emit` yields one string per call, so a
//! consumer pulling fragments from [`LuaFragments`] drives the template one
//! emit at a time. Each execution gets its own Lua state, which keeps runs
//! independent of each other.

use crate::compiler::Step;
use crate::engine::ScriptEngine;
use crate::environment::Environment;
use crate::error::{TemplateError, TemplateResult};
use crate::sandbox;
use mlua::{ChunkMode, Function, Lua, LuaOptions, StdLib, Thread, ThreadStatus, Value};
use std::fmt::Write;
use tracing::trace;

/// Signature at the start of precompiled Lua bytecode.
const BYTECODE_SIGNATURE: &str = "\x1bLua";

const EMIT_LOCAL: &str = "__emit";

/// Runs template procedures in sandboxed Lua 5.4 states.
#[derive(Debug, Clone, Default)]
pub struct LuaEngine;

impl LuaEngine {
    pub fn new() -> Self {
        Self
    }

    fn new_state() -> mlua::Result<Lua> {
        Lua::new_with(
            StdLib::COROUTINE
                | StdLib::TABLE
                | StdLib::STRING
                | StdLib::UTF8
                | StdLib::MATH
                | StdLib::OS,
            LuaOptions::new(),
        )
    }
}

impl ScriptEngine for LuaEngine {
    type Fragments = LuaFragments;

    fn eval_string_literal(&self, literal: &str) -> TemplateResult<String> {
        let syntax_error = |message: String| TemplateError::SyntaxLiteral {
            literal: literal.to_string(),
            message,
        };

        if !sandbox::is_string_literal(literal) {
            return Err(syntax_error("expected a single quoted string".to_string()));
        }

        let lua = Lua::new_with(StdLib::NONE, LuaOptions::new())
            .map_err(|e| syntax_error(e.to_string()))?;
        let empty = lua.create_table().map_err(|e| syntax_error(e.to_string()))?;
        let value: mlua::String = lua
            .load(format!("return {}", literal.trim()))
            .set_name("=include")
            .set_mode(ChunkMode::Text)
            .set_environment(empty)
            .eval()
            .map_err(|e| syntax_error(e.to_string()))?;
        Ok(value.to_str().map_err(|e| syntax_error(e.to_string()))?.to_string())
    }

    fn lower(&self, name: &str, steps: &[Step]) -> TemplateResult<String> {
        let mut source = format!("local {} = ...\n", EMIT_LOCAL);
        for step in steps {
            match step {
                Step::Emit(text) => {
                    let _ = writeln!(source, "{}({})", EMIT_LOCAL, quote_lua_string(text));
                }
                Step::Eval(expression) => {
                    reject_bytecode(name, expression)?;
                    let _ = writeln!(source, "{}(({}\n))", EMIT_LOCAL, expression);
                }
                Step::Exec(code) => {
                    reject_bytecode(name, code)?;
                    source.push_str(code);
                    source.push('\n');
                }
            }
        }

        let lua = Self::new_state().map_err(|e| runtime_error(name, e))?;
        lua.load(source.as_str())
            .set_name(format!("={}", name))
            .set_mode(ChunkMode::Text)
            .into_function()
            .map_err(|e| TemplateError::CodeSyntax {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        Ok(source)
    }

    fn start(
        &self,
        name: &str,
        source: &str,
        environment: &Environment,
    ) -> TemplateResult<LuaFragments> {
        if let Some(global) = sandbox::find_disallowed_global(source, environment) {
            return Err(TemplateError::DisallowedCode {
                name: name.to_string(),
                message: format!("'{}' is not available to templates", global),
            });
        }

        let setup = || -> mlua::Result<(Lua, Thread, Function)> {
            let lua = Self::new_state()?;
            let emit = sandbox::emit_function(&lua)?;
            let env = sandbox::build_environment(&lua, environment, &emit)?;
            let procedure = lua
                .load(source)
                .set_name(format!("={}", name))
                .set_mode(ChunkMode::Text)
                .set_environment(env)
                .into_function()?;
            let thread = lua.create_thread(procedure)?;
            Ok((lua, thread, emit))
        };
        let (lua, thread, emit) = setup().map_err(|e| classify_error(name, e))?;

        Ok(LuaFragments {
            name: name.to_string(),
            thread,
            emit: Some(emit),
            finished: false,
            _lua: lua,
        })
    }
}

/// Fragments produced by one execution, in order.
///
/// Dropping the iterator abandons the suspended execution.
pub struct LuaFragments {
    name: String,
    thread: Thread,
    // Passed to the procedure on the first resume.
    emit: Option<Function>,
    finished: bool,
    // Declared last so the handles above are dropped before the state.
    _lua: Lua,
}

impl Iterator for LuaFragments {
    type Item = TemplateResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished || self.thread.status() != ThreadStatus::Resumable {
                self.finished = true;
                return None;
            }

            let resumed = match self.emit.take() {
                Some(emit) => self.thread.resume::<Value>(emit),
                None => self.thread.resume::<Value>(()),
            };

            match resumed {
                Ok(value) => {
                    if self.thread.status() != ThreadStatus::Resumable {
                        // The procedure returned instead of yielding.
                        self.finished = true;
                        return None;
                    }
                    if let Value::String(fragment) = value {
                        let fragment = match fragment.to_str() {
                            Ok(s) => s.to_string(),
                            Err(e) => {
                                self.finished = true;
                                return Some(Err(classify_error(&self.name, e)));
                            }
                        };
                        trace!(template = %self.name, len = fragment.len(), "Emitted fragment");
                        return Some(Ok(fragment));
                    }
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(classify_error(&self.name, err)));
                }
            }
        }
    }
}

fn reject_bytecode(name: &str, code: &str) -> TemplateResult<()> {
    if code.contains(BYTECODE_SIGNATURE) {
        return Err(TemplateError::DisallowedCode {
            name: name.to_string(),
            message: "precompiled Lua bytecode is not accepted".to_string(),
        });
    }
    Ok(())
}

fn runtime_error(name: &str, err: mlua::Error) -> TemplateError {
    TemplateError::Runtime {
        name: name.to_string(),
        message: err.to_string(),
    }
}

fn classify_error(name: &str, err: mlua::Error) -> TemplateError {
    if let Some(denied) = sandbox::capability_denied(&err) {
        return TemplateError::DisallowedCode {
            name: name.to_string(),
            message: denied.to_string(),
        };
    }
    match err {
        mlua::Error::SyntaxError { message, .. } => TemplateError::CodeSyntax {
            name: name.to_string(),
            message,
        },
        other => runtime_error(name, other),
    }
}

/// Quote `text` as a Lua short string.
pub fn quote_lua_string(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c if (c as u32) < 0x20 || c == '\x7f' => {
                let _ = write!(quoted, "\\{:03}", c as u32);
            }
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
