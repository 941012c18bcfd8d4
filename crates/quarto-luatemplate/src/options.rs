/*
 * options.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template options and the deep-merge used to build them.
//!
//! Callers usually supply only the handful of options they care about, as a
//! partial JSON object. [`TemplateOptions::from_partial`] merges that object
//! over the defaults with [`merge`] and deserializes the result.

use crate::error::{TemplateError, TemplateResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Which directives cause whitespace next to them to be trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrimPolicy {
    /// Never trim.
    #[serde(rename = "none")]
    None,
    /// Trim next to every directive.
    #[serde(rename = "all")]
    All,
    /// Trim only next to code directives.
    #[serde(rename = "code", alias = "code-only")]
    CodeOnly,
    /// Trim only next to expression directives.
    #[serde(rename = "expression", alias = "expression-only")]
    ExpressionOnly,
}

/// Options controlling lexing, include resolution and trimming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateOptions {
    /// Opening delimiter of a directive.
    pub start_tag: String,
    /// Closing delimiter of a directive.
    pub end_tag: String,
    /// Name used for the compiled template and in error messages.
    pub template_name: String,
    /// Policy for the end of text chunks (the whitespace left of a directive).
    pub trim_right: TrimPolicy,
    /// Policy for the start of text chunks (the whitespace right of a directive).
    pub trim_left: TrimPolicy,
    /// Root directory for relative include paths.
    ///
    /// When unset, includes resolve against the directory of the file that
    /// contains them.
    pub base_path: Option<PathBuf>,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            start_tag: "#{".to_string(),
            end_tag: "}#".to_string(),
            template_name: "template".to_string(),
            trim_right: TrimPolicy::CodeOnly,
            trim_left: TrimPolicy::CodeOnly,
            base_path: None,
        }
    }
}

impl TemplateOptions {
    /// Create options with the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from a partial JSON object merged over the defaults.
    ///
    /// `null` is treated as an empty object.
    pub fn from_partial(partial: &Value) -> TemplateResult<Self> {
        let overrides = match partial {
            Value::Null => None,
            Value::Object(_) => Some(partial),
            other => {
                return Err(TemplateError::InvalidOptions {
                    message: format!("expected an object, found {}", other),
                });
            }
        };

        let defaults =
            serde_json::to_value(Self::default()).map_err(|e| TemplateError::InvalidOptions {
                message: e.to_string(),
            })?;
        let merged = merge(&defaults, overrides);

        let options: Self =
            serde_json::from_value(merged).map_err(|e| TemplateError::InvalidOptions {
                message: e.to_string(),
            })?;
        options.validate()?;
        Ok(options)
    }

    /// Set both delimiters.
    pub fn with_tags(mut self, start_tag: impl Into<String>, end_tag: impl Into<String>) -> Self {
        self.start_tag = start_tag.into();
        self.end_tag = end_tag.into();
        self
    }

    /// Set both trim policies.
    pub fn with_trim(mut self, trim_left: TrimPolicy, trim_right: TrimPolicy) -> Self {
        self.trim_left = trim_left;
        self.trim_right = trim_right;
        self
    }

    /// Set the include root.
    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    /// Set the template name.
    pub fn with_template_name(mut self, name: impl Into<String>) -> Self {
        self.template_name = name.into();
        self
    }

    /// Check that the delimiters are usable.
    pub fn validate(&self) -> TemplateResult<()> {
        if self.start_tag.is_empty() || self.end_tag.is_empty() {
            return Err(TemplateError::InvalidOptions {
                message: "start_tag and end_tag must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Deep-merge `overrides` over `defaults`.
///
/// When both sides hold an object for the same key the objects are merged
/// recursively; otherwise the override wins. The result owns copies of
/// everything it contains, so later changes to either input never show up
/// in it. A missing override behaves like an empty object.
pub fn merge(defaults: &Value, overrides: Option<&Value>) -> Value {
    match (defaults, overrides) {
        (Value::Object(base), Some(Value::Object(over))) => Value::Object(merge_maps(base, over)),
        (_, Some(over)) => over.clone(),
        (base, None) => base.clone(),
    }
}

fn merge_maps(base: &Map<String, Value>, over: &Map<String, Value>) -> Map<String, Value> {
    let mut result = base.clone();
    for (key, value) in over {
        let merged = match result.get(key) {
            Some(existing) => merge(existing, Some(value)),
            None => value.clone(),
        };
        result.insert(key.clone(), merged);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_merge_nested_tables() {
        let defaults = json!({"a": 1, "nested": {"x": 1, "y": 2}});
        let overrides = json!({"nested": {"y": 3, "z": 4}, "b": true});

        let merged = merge(&defaults, Some(&overrides));
        assert_eq!(
            merged,
            json!({"a": 1, "b": true, "nested": {"x": 1, "y": 3, "z": 4}})
        );
    }

    #[test]
    fn test_merge_override_replaces_non_table() {
        let defaults = json!({"a": {"x": 1}});
        let overrides = json!({"a": "flat"});
        assert_eq!(merge(&defaults, Some(&overrides)), json!({"a": "flat"}));
    }

    #[test]
    fn test_merge_absent_override() {
        let defaults = json!({"a": {"x": 1}});
        assert_eq!(merge(&defaults, None), defaults);
    }

    #[test]
    fn test_merge_does_not_alias_inputs() {
        let defaults = json!({"a": {"x": 1}});
        let mut overrides = json!({"b": {"y": 2}});

        let merged = merge(&defaults, Some(&overrides));
        overrides["b"]["y"] = json!(99);

        assert_eq!(merged["b"]["y"], json!(2));
        assert_eq!(defaults, json!({"a": {"x": 1}}));
    }

    #[test]
    fn test_from_partial_keeps_defaults() {
        let options =
            TemplateOptions::from_partial(&json!({"trim_left": "all", "start_tag": "{{"}))
                .unwrap();
        assert_eq!(options.start_tag, "{{");
        assert_eq!(options.end_tag, "}#");
        assert_eq!(options.trim_left, TrimPolicy::All);
        assert_eq!(options.trim_right, TrimPolicy::CodeOnly);
        assert_eq!(options.base_path, None);
    }

    #[test]
    fn test_from_partial_accepts_aliases() {
        let options = TemplateOptions::from_partial(
            &json!({"trim_left": "expression-only", "trim_right": "code-only"}),
        )
        .unwrap();
        assert_eq!(options.trim_left, TrimPolicy::ExpressionOnly);
        assert_eq!(options.trim_right, TrimPolicy::CodeOnly);
    }

    #[test]
    fn test_from_partial_null_is_default() {
        let options = TemplateOptions::from_partial(&Value::Null).unwrap();
        assert_eq!(options, TemplateOptions::default());
    }

    #[test]
    fn test_from_partial_rejects_bad_policy() {
        let err = TemplateOptions::from_partial(&json!({"trim_left": "sometimes"})).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidOptions { .. }));
    }

    #[test]
    fn test_from_partial_rejects_empty_tag() {
        let err = TemplateOptions::from_partial(&json!({"end_tag": ""})).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidOptions { .. }));
    }
}
