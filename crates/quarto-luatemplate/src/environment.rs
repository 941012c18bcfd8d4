/*
 * environment.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Runtime environment supplied by the caller when rendering.
//!
//! An environment maps names to plain data (anything expressible as JSON) or
//! to host functions. It is layered over the capability whitelist, and its
//! entries win when a name appears in both.

use crate::error::{TemplateError, TemplateResult};
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A function the template may call.
///
/// Arguments arrive converted to JSON values; the returned value is converted
/// back for the template. An `Err` raises a runtime error at the call site.
pub type HostFunction = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// A single environment entry.
#[derive(Clone)]
pub enum EnvValue {
    /// Plain data. JSON `null` becomes `nil`.
    Data(Value),
    /// A callable host function.
    Function(HostFunction),
}

impl fmt::Debug for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvValue::Data(value) => f.debug_tuple("Data").field(value).finish(),
            EnvValue::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Names visible to a rendering template, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    entries: IndexMap<String, EnvValue>,
}

impl Environment {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an environment from the members of a JSON object.
    pub fn from_json(value: &Value) -> TemplateResult<Self> {
        match value {
            Value::Object(map) => Ok(Self {
                entries: map
                    .iter()
                    .map(|(k, v)| (k.clone(), EnvValue::Data(v.clone())))
                    .collect(),
            }),
            Value::Null => Ok(Self::new()),
            other => Err(TemplateError::InvalidOptions {
                message: format!("environment must be a JSON object, found {}", other),
            }),
        }
    }

    /// Bind `key` to a data value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.entries.insert(key.into(), EnvValue::Data(value.into()));
        self
    }

    /// Bind `key` to a host function.
    pub fn insert_function<F>(&mut self, key: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.entries
            .insert(key.into(), EnvValue::Function(Arc::new(function)));
        self
    }

    pub fn get(&self, key: &str) -> Option<&EnvValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EnvValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
