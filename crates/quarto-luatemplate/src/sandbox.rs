/*
 * sandbox.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Capability whitelist for template code.
//!
//! Template code runs with a private global table holding only the
//! whitelisted names plus the caller's environment. A handful of names that
//! would give access to files, the loader or the host process are treated as
//! forbidden: code that mentions them as free globals is rejected before it
//! runs, and any dynamic lookup of them raises [`CapabilityDenied`].
//!
//! The module also carries the small Lua source scanner used for those
//! checks and for validating include path literals.

use crate::environment::{EnvValue, Environment};
use mlua::{Function, Lua, LuaSerdeExt, MultiValue, SerializeOptions, Table, Value};
use thiserror::Error;

/// Base functions copied into every sandbox.
const BASE_FUNCTIONS: &[&str] = &[
    "assert",
    "error",
    "getmetatable",
    "ipairs",
    "next",
    "pairs",
    "pcall",
    "rawequal",
    "rawget",
    "rawlen",
    "select",
    "setmetatable",
    "tonumber",
    "tostring",
    "type",
    "xpcall",
];

/// Libraries copied (shallowly) into every sandbox.
const LIBRARIES: &[&str] = &["string", "table", "math", "utf8"];

/// The part of `os` that does not touch the process or the filesystem.
const OS_FUNCTIONS: &[&str] = &["clock", "date", "difftime", "time"];

const KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if",
    "in", "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// Names that template code may never reach unless the caller binds them.
pub const FORBIDDEN_NAMES: &[&str] = &[
    "collectgarbage",
    "debug",
    "dofile",
    "getfenv",
    "io",
    "load",
    "loadfile",
    "loadstring",
    "package",
    "require",
    "setfenv",
];

const EMIT_HELPER: &str = r##"
local yield, tostring, select = coroutine.yield, tostring, select
return function(...)
  for i = 1, select("#", ...) do
    local value = select(i, ...)
    if value ~= nil then
      yield(tostring(value))
    end
  end
end
"##;

/// Raised when code looks up a forbidden name at runtime.
#[derive(Debug, Error)]
#[error("access to '{name}' is not permitted in templates")]
pub struct CapabilityDenied {
    pub name: String,
}

/// Find the first forbidden name `source` uses that `environment` does not bind.
pub fn find_disallowed_global<'a>(source: &'a str, environment: &Environment) -> Option<&'a str> {
    free_names(source)
        .into_iter()
        .find(|name| FORBIDDEN_NAMES.contains(name) && !environment.contains_key(name))
}

/// Create the `emit` function. It must be called from inside the coroutine
/// running the template; each non-nil argument becomes one fragment.
pub fn emit_function(lua: &Lua) -> mlua::Result<Function> {
    lua.load(EMIT_HELPER).set_name("=emit").eval()
}

/// Build the global table for one execution: whitelist first, then the
/// caller's environment on top.
pub fn build_environment(
    lua: &Lua,
    environment: &Environment,
    emit: &Function,
) -> mlua::Result<Table> {
    let globals = lua.globals();
    let sandbox = lua.create_table()?;

    for name in BASE_FUNCTIONS {
        sandbox.raw_set(*name, globals.raw_get::<Value>(*name)?)?;
    }
    for name in LIBRARIES {
        let library: Table = globals.raw_get(*name)?;
        sandbox.raw_set(*name, shallow_copy(lua, &library)?)?;
    }
    let os: Table = globals.raw_get("os")?;
    let os_subset = lua.create_table()?;
    for name in OS_FUNCTIONS {
        os_subset.raw_set(*name, os.raw_get::<Value>(*name)?)?;
    }
    sandbox.raw_set("os", os_subset)?;

    let table: Table = globals.raw_get("table")?;
    sandbox.raw_set("unpack", table.raw_get::<Value>("unpack")?)?;
    sandbox.raw_set("emit", emit.clone())?;

    let options = SerializeOptions::new()
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false);
    for (name, value) in environment.iter() {
        let value = match value {
            EnvValue::Data(data) => lua.to_value_with(data, options)?,
            EnvValue::Function(function) => {
                let function = function.clone();
                Value::Function(lua.create_function(move |lua, args: MultiValue| {
                    let args = args
                        .into_iter()
                        .map(|arg| lua.from_value::<serde_json::Value>(arg))
                        .collect::<mlua::Result<Vec<_>>>()?;
                    let result = function(&args).map_err(mlua::Error::RuntimeError)?;
                    lua.to_value_with(&result, options)
                })?)
            }
        };
        sandbox.raw_set(name, value)?;
    }

    let guard = lua.create_table()?;
    guard.raw_set(
        "__index",
        lua.create_function(|_, (_table, key): (Table, Value)| {
            if let Value::String(key) = &key {
                let key = key.to_str()?.to_string();
                if FORBIDDEN_NAMES.contains(&key.as_str()) {
                    return Err(mlua::Error::external(CapabilityDenied { name: key }));
                }
            }
            Ok(Value::Nil)
        })?,
    )?;
    sandbox.set_metatable(Some(guard))?;

    Ok(sandbox)
}

fn shallow_copy(lua: &Lua, table: &Table) -> mlua::Result<Table> {
    let copy = lua.create_table()?;
    table.for_each(|key: Value, value: Value| copy.raw_set(key, value))?;
    Ok(copy)
}

/// Find the [`CapabilityDenied`] behind an error raised by template code.
pub fn capability_denied(err: &mlua::Error) -> Option<&CapabilityDenied> {
    match err {
        mlua::Error::CallbackError { cause, .. } | mlua::Error::WithContext { cause, .. } => {
            capability_denied(cause)
        }
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<CapabilityDenied>(),
        _ => None,
    }
}

/// Check that `text` is exactly one Lua string literal (short or long form),
/// ignoring surrounding whitespace.
pub fn is_string_literal(text: &str) -> bool {
    let bytes = text.trim().as_bytes();
    let end = match bytes.first() {
        Some(b'"') | Some(b'\'') => skip_short_string(bytes, 0),
        Some(b'[') => {
            long_bracket_level(bytes, 0).and_then(|level| skip_long_bracket(bytes, 0, level))
        }
        _ => None,
    };
    end == Some(bytes.len())
}

/// What the scanner in [`free_names`] expects the next name to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Use,
    /// Inside a `local` or `for` name list.
    NameList,
    /// After `function`, before its parameter list.
    FunctionName,
    /// Inside a function's parameter list.
    Parameters,
}

/// Names used as free globals in Lua `source`.
///
/// Strings and comments are skipped. Field accesses (`a.io`, `a:io`) and
/// assignment targets or table keys (`io = ...`) are not reported. A name
/// bound anywhere by `local`, `for`, or a function name or parameter is
/// treated as local throughout; a global access to such a name is still
/// caught by the runtime guard.
pub fn free_names(source: &str) -> Vec<&str> {
    let bytes = source.as_bytes();
    let mut used = Vec::new();
    let mut declared: Vec<&str> = Vec::new();
    let mut binding = Binding::Use;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i += 2;
                if let Some(level) = long_bracket_level(bytes, i) {
                    i = skip_long_bracket(bytes, i, level).unwrap_or(bytes.len());
                } else {
                    while i < bytes.len() && bytes[i] != b'\n' {
                        i += 1;
                    }
                }
            }
            b'"' | b'\'' => {
                i = skip_short_string(bytes, i).unwrap_or(bytes.len());
                binding = Binding::Use;
            }
            b'[' if long_bracket_level(bytes, i).is_some() => {
                let level = long_bracket_level(bytes, i).unwrap_or(0);
                i = skip_long_bracket(bytes, i, level).unwrap_or(bytes.len());
                binding = Binding::Use;
            }
            b'0'..=b'9' => {
                while i < bytes.len() && (is_word_byte(bytes[i]) || bytes[i] == b'.') {
                    i += 1;
                }
                binding = Binding::Use;
            }
            b if b.is_ascii_alphabetic() || b == b'_' => {
                let start = i;
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                let word = &source[start..i];
                if KEYWORDS.contains(&word) {
                    binding = match word {
                        "local" | "for" => Binding::NameList,
                        "function" => Binding::FunctionName,
                        _ => Binding::Use,
                    };
                    continue;
                }
                match binding {
                    Binding::Use => {
                        if !is_field_access(bytes, start) && !is_assignment_target(bytes, i) {
                            used.push(word);
                        }
                    }
                    Binding::NameList | Binding::FunctionName | Binding::Parameters => {
                        declared.push(word);
                    }
                }
            }
            b if b.is_ascii_whitespace() => i += 1,
            _ => {
                binding = match (binding, b) {
                    (Binding::NameList, b',') => Binding::NameList,
                    (Binding::Parameters, b',') => Binding::Parameters,
                    (Binding::FunctionName, b'.' | b':') => Binding::FunctionName,
                    (Binding::FunctionName, b'(') => Binding::Parameters,
                    _ => Binding::Use,
                };
                i += 1;
            }
        }
    }

    used.retain(|name| !declared.contains(name));
    used
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_field_access(bytes: &[u8], start: usize) -> bool {
    let mut j = start;
    while j > 0 && bytes[j - 1].is_ascii_whitespace() {
        j -= 1;
    }
    match j.checked_sub(1).map(|k| bytes[k]) {
        Some(b':') => !(j >= 2 && bytes[j - 2] == b':'),
        Some(b'.') => !(j >= 2 && bytes[j - 2] == b'.'),
        _ => false,
    }
}

fn is_assignment_target(bytes: &[u8], end: usize) -> bool {
    let mut j = end;
    while j < bytes.len() && bytes[j].is_ascii_whitespace() {
        j += 1;
    }
    bytes.get(j) == Some(&b'=') && bytes.get(j + 1) != Some(&b'=')
}

/// Index just past the short string starting at `start`, or `None` if it
/// is unterminated or broken by a raw newline.
fn skip_short_string(bytes: &[u8], start: usize) -> Option<usize> {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return None,
            b if b == quote => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

/// Level of the long bracket (`[[`, `[=[`, ...) opening at `start`.
fn long_bracket_level(bytes: &[u8], start: usize) -> Option<usize> {
    if bytes.get(start) != Some(&b'[') {
        return None;
    }
    let mut i = start + 1;
    while bytes.get(i) == Some(&b'=') {
        i += 1;
    }
    (bytes.get(i) == Some(&b'[')).then_some(i - start - 1)
}

/// Index just past the long bracket of `level` opening at `start`.
fn skip_long_bracket(bytes: &[u8], start: usize, level: usize) -> Option<usize> {
    let mut close = Vec::with_capacity(level + 2);
    close.push(b']');
    close.extend(std::iter::repeat_n(b'=', level));
    close.push(b']');

    let body = start + level + 2;
    bytes
        .get(body..)?
        .windows(close.len())
        .position(|window| window == close.as_slice())
        .map(|offset| body + offset + close.len())
}
