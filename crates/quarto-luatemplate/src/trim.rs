/*
 * trim.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Whitespace trimming around directives.
//!
//! Each text chunk may lose whitespace at its end (before the next
//! directive) and at its start (after the previous directive):
//!
//! - end: horizontal whitespace after the last newline is dropped, so a
//!   directive indented on its own line leaves no indentation behind;
//! - start: horizontal whitespace up to and including the first newline is
//!   dropped, so the line break after a directive disappears.
//!
//! In both cases a chunk made only of horizontal whitespace is dropped
//! entirely. Text that does not have this shape is left alone.
//!
//! A side is trimmed when the neighboring directive's marker says so (`-`),
//! kept when it says `+`, and otherwise decided by the global policy for
//! that side and the neighbor's kind. The start and end of the template have
//! no neighbor; only the `all` policy trims there.

use crate::lexer::{Chunk, ChunkKind, TrimOverride};
use crate::options::{TemplateOptions, TrimPolicy};

/// Apply trimming to an include-expanded chunk sequence.
///
/// Text chunks that end up empty are removed.
pub fn apply_trim(chunks: &[Chunk], options: &TemplateOptions) -> Vec<Chunk> {
    let mut trimmed = Vec::with_capacity(chunks.len());

    for (i, chunk) in chunks.iter().enumerate() {
        if !chunk.is_text() {
            trimmed.push(chunk.clone());
            continue;
        }

        let previous = i.checked_sub(1).and_then(|j| chunks.get(j));
        let next = chunks.get(i + 1);

        let mut text = chunk.content.as_str();
        if should_trim(next.map(|n| (n.kind, n.trim_left)), options.trim_right) {
            text = trim_text_end(text);
        }
        if should_trim(previous.map(|p| (p.kind, p.trim_right)), options.trim_left) {
            text = trim_text_start(text);
        }

        if !text.is_empty() {
            trimmed.push(Chunk::text(text));
        }
    }

    trimmed
}

/// Decide whether to trim next to `neighbor` (its kind and the marker on the
/// side facing the text).
fn should_trim(neighbor: Option<(ChunkKind, TrimOverride)>, policy: TrimPolicy) -> bool {
    let Some((kind, marker)) = neighbor else {
        return policy == TrimPolicy::All;
    };
    match marker {
        TrimOverride::ForceTrim => true,
        TrimOverride::ForceKeep => false,
        TrimOverride::Unset => match policy {
            TrimPolicy::None => false,
            TrimPolicy::All => true,
            TrimPolicy::CodeOnly => kind == ChunkKind::Code,
            TrimPolicy::ExpressionOnly => kind == ChunkKind::Expression,
        },
    }
}

const HORIZONTAL_SPACE: [char; 2] = [' ', '\t'];

fn trim_text_end(text: &str) -> &str {
    let stripped = text.trim_end_matches(HORIZONTAL_SPACE);
    if stripped.is_empty() || stripped.ends_with('\n') {
        stripped
    } else {
        text
    }
}

fn trim_text_start(text: &str) -> &str {
    let rest = text.trim_start_matches(HORIZONTAL_SPACE);
    if rest.is_empty() {
        return rest;
    }
    rest.strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
        .unwrap_or(text)
}
