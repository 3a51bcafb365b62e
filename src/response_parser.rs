//! Extracts the single JSON object embedded in a model reply.
//!
//! The upstream classifier is a best-effort text generator, not a strict
//! API: replies arrive wrapped in prose, markdown fences, or with literal
//! newlines inside string values. This module is the compatibility boundary
//! that absorbs that drift so nothing downstream has to.

use crate::error::{AssistantError, Result};

/// How much of the failed candidate to carry in the error for diagnostics.
const DIAGNOSTIC_LIMIT: usize = 500;

/// Locate the greedy `{...}` span in `text`, repair raw newlines inside
/// string literals, and parse it as JSON.
///
/// Fails with [`AssistantError::MalformedResponse`] if no span exists or the
/// cleaned span does not parse. This is fatal for the current request and is
/// never retried here.
pub fn extract_json_object(text: &str) -> Result<serde_json::Value> {
    let start = text.find('{');
    let end = text.rfind('}');
    let span = match (start, end) {
        (Some(s), Some(e)) if s < e => &text[s..=e],
        _ => {
            return Err(AssistantError::MalformedResponse(
                "no JSON object found in model reply".to_string(),
            ))
        }
    };

    let cleaned = escape_newlines_in_strings(span);
    let cleaned = cleaned.trim();

    serde_json::from_str(cleaned).map_err(|e| {
        let excerpt: String = cleaned.chars().take(DIAGNOSTIC_LIMIT).collect();
        AssistantError::MalformedResponse(format!("{}; candidate: {}", e, excerpt))
    })
}

/// Replace raw newline characters that occur inside JSON string literals
/// with the two-character escape sequence. Newlines between tokens are
/// legal whitespace and are left alone.
fn escape_newlines_in_strings(span: &str) -> String {
    let mut out = String::with_capacity(span.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in span.chars() {
        match c {
            '"' if !escaped => {
                in_string = !in_string;
                out.push(c);
            }
            '\\' if in_string && !escaped => {
                escaped = true;
                out.push(c);
                continue;
            }
            '\n' if in_string => out.push_str("\\n"),
            '\r' if in_string => out.push_str("\\r"),
            _ => out.push(c),
        }
        escaped = false;
    }

    out
}
