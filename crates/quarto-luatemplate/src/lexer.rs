/*
 * lexer.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Chunk lexer.
//!
//! Splits template text into a flat sequence of [`Chunk`]s: literal text and
//! the three directive kinds. Directives never nest; the first end tag after
//! a start tag closes the directive, and delimiters inside a directive body
//! cannot be escaped.
//!
//! The lexer here is the raw scanner. Include expansion and text coalescing
//! across include boundaries happen in [`crate::include`].

use crate::error::{TemplateError, TemplateResult};
use crate::options::TemplateOptions;
use once_cell::sync::Lazy;
use regex::Regex;

static INCLUDE_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*include:\s*(.*?)\s*$").expect("valid include pattern"));

static EXPRESSION_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^=(.*)$").expect("valid expression pattern"));

/// The kind of a lexed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Literal text, emitted as-is.
    Text,
    /// Statements executed for their side effects.
    Code,
    /// An expression whose value is emitted.
    Expression,
    /// A reference to another template file.
    Include,
}

/// Per-side trim marker carried by a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrimOverride {
    /// No marker; the global policy decides.
    #[default]
    Unset,
    /// `-`: always trim on this side.
    ForceTrim,
    /// `+`: never trim on this side.
    ForceKeep,
}

impl TrimOverride {
    fn from_marker(marker: &str) -> Self {
        match marker {
            "-" => TrimOverride::ForceTrim,
            "+" => TrimOverride::ForceKeep,
            _ => TrimOverride::Unset,
        }
    }

    /// The marker text that produces this override.
    pub fn marker(self) -> &'static str {
        match self {
            TrimOverride::Unset => "",
            TrimOverride::ForceTrim => "-",
            TrimOverride::ForceKeep => "+",
        }
    }
}

/// One classified unit of a lexed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub kind: ChunkKind,
    /// The literal text for `Text`; the directive body for the others
    /// (without the `=` for expressions, and only the path literal for
    /// includes).
    pub content: String,
    /// Marker just inside the start tag. Controls the whitespace before the
    /// directive.
    pub trim_left: TrimOverride,
    /// Marker just inside the end tag. Controls the whitespace after the
    /// directive.
    pub trim_right: TrimOverride,
}

impl Chunk {
    /// Create a text chunk.
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(ChunkKind::Text, content)
    }

    /// Create a chunk of the given kind with no trim markers.
    pub fn new(kind: ChunkKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            trim_left: TrimOverride::Unset,
            trim_right: TrimOverride::Unset,
        }
    }

    /// Set the trim markers.
    pub fn with_trim(mut self, trim_left: TrimOverride, trim_right: TrimOverride) -> Self {
        self.trim_left = trim_left;
        self.trim_right = trim_right;
        self
    }

    pub fn is_text(&self) -> bool {
        self.kind == ChunkKind::Text
    }
}

/// Lazy scanner over the chunks of one template text.
///
/// Each scanner starts from the beginning of its input; nothing is shared
/// between scanners.
#[derive(Debug)]
pub struct ChunkScanner<'a> {
    text: &'a str,
    position: usize,
    directive: Regex,
    pending: Option<Chunk>,
}

impl<'a> ChunkScanner<'a> {
    /// Create a scanner for `text` using the delimiters in `options`.
    pub fn new(text: &'a str, options: &TemplateOptions) -> TemplateResult<Self> {
        options.validate()?;
        let pattern = format!(
            r"(?s){}([+-]?)(.*?)([+-]?){}",
            regex::escape(&options.start_tag),
            regex::escape(&options.end_tag)
        );
        let directive = Regex::new(&pattern).map_err(|e| TemplateError::InvalidOptions {
            message: format!("cannot build directive pattern: {}", e),
        })?;
        Ok(Self {
            text,
            position: 0,
            directive,
            pending: None,
        })
    }
}

impl Iterator for ChunkScanner<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if let Some(chunk) = self.pending.take() {
            return Some(chunk);
        }
        if self.position >= self.text.len() {
            return None;
        }

        let Some(captures) = self.directive.captures_at(self.text, self.position) else {
            let rest = &self.text[self.position..];
            self.position = self.text.len();
            return Some(Chunk::text(rest));
        };

        let whole = captures.get(0)?;
        let chunk = classify(
            captures.get(2).map_or("", |m| m.as_str()),
            TrimOverride::from_marker(captures.get(1).map_or("", |m| m.as_str())),
            TrimOverride::from_marker(captures.get(3).map_or("", |m| m.as_str())),
        );

        let gap_start = self.position;
        self.position = whole.end();
        if whole.start() > gap_start {
            self.pending = Some(chunk);
            Some(Chunk::text(&self.text[gap_start..whole.start()]))
        } else {
            Some(chunk)
        }
    }
}

fn classify(body: &str, trim_left: TrimOverride, trim_right: TrimOverride) -> Chunk {
    let chunk = if let Some(captures) = INCLUDE_BODY.captures(body) {
        Chunk::new(ChunkKind::Include, &captures[1])
    } else if let Some(captures) = EXPRESSION_BODY.captures(body) {
        Chunk::new(ChunkKind::Expression, &captures[1])
    } else {
        Chunk::new(ChunkKind::Code, body)
    };
    chunk.with_trim(trim_left, trim_right)
}

/// Scan `text` into chunks without expanding includes.
pub fn scan(text: &str, options: &TemplateOptions) -> TemplateResult<Vec<Chunk>> {
    Ok(ChunkScanner::new(text, options)?.collect())
}

/// Append `chunk` to `chunks`, merging it into a trailing text chunk.
pub(crate) fn push_coalesced(chunks: &mut Vec<Chunk>, chunk: Chunk) {
    if chunk.is_text() {
        if chunk.content.is_empty() {
            return;
        }
        if let Some(last) = chunks.last_mut()
            && last.is_text()
        {
            last.content.push_str(&chunk.content);
            return;
        }
    }
    chunks.push(chunk);
}

/// Serialize chunks back into directive syntax.
///
/// Include chunks are written back as include directives, so the output of
/// an include-expanded chunk list contains none.
pub fn serialize(chunks: &[Chunk], options: &TemplateOptions) -> String {
    let mut out = String::new();
    for chunk in chunks {
        if chunk.is_text() {
            out.push_str(&chunk.content);
            continue;
        }
        out.push_str(&options.start_tag);
        out.push_str(chunk.trim_left.marker());
        match chunk.kind {
            ChunkKind::Expression => out.push('='),
            ChunkKind::Include => out.push_str("include: "),
            ChunkKind::Code | ChunkKind::Text => {}
        }
        out.push_str(&chunk.content);
        out.push_str(chunk.trim_right.marker());
        out.push_str(&options.end_tag);
    }
    out
}
