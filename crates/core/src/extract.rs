//! Structured-output extraction from free-text participant transcripts.
//!
//! Extraction is a pure function of the text: anything after the first
//! approval token is ignored, and malformed input yields `None` rather than an
//! error. Callers treat `None` as "not yet complete".

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const APPROVAL_TOKEN: &str = "APPROVE";

const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    FencedBlock,
    WholeText,
    BracketScan,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Extraction {
    pub value: Value,
    pub strategy: ExtractionStrategy,
}

pub fn extract(transcript: &str) -> Option<Value> {
    extract_with_strategy(transcript).map(|extraction| extraction.value)
}

pub fn extract_with_strategy(transcript: &str) -> Option<Extraction> {
    let text = before_approval(transcript);

    if let Some(block) = fenced_block(text) {
        return match serde_json::from_str::<Value>(block.trim()) {
            Ok(value) => Some(Extraction { value, strategy: ExtractionStrategy::FencedBlock }),
            Err(error) => {
                tracing::debug!(
                    event_name = "extract.fenced_block_invalid",
                    error = %error,
                    "json fence present but content did not parse"
                );
                None
            }
        };
    }

    if let Some(value) = parse_structured(text.trim()) {
        return Some(Extraction { value, strategy: ExtractionStrategy::WholeText });
    }

    if let Some(value) = bracket_scan(text) {
        return Some(Extraction { value, strategy: ExtractionStrategy::BracketScan });
    }

    tracing::debug!(
        event_name = "extract.no_payload",
        transcript_chars = transcript.len(),
        "no structured payload found in transcript"
    );
    None
}

/// Case-insensitive check for the approval token.
pub fn contains_approval(text: &str) -> bool {
    approval_offset(text).is_some()
}

/// The transcript up to, not including, the first approval token.
pub fn before_approval(transcript: &str) -> &str {
    match approval_offset(transcript) {
        Some(offset) => &transcript[..offset],
        None => transcript,
    }
}

fn approval_offset(text: &str) -> Option<usize> {
    // ASCII case folding keeps byte offsets aligned with the original text.
    text.to_ascii_uppercase().find(APPROVAL_TOKEN)
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.to_ascii_lowercase().find(JSON_FENCE)? + JSON_FENCE.len();
    let rest = &text[start..];
    match rest.find(FENCE) {
        Some(end) => Some(&rest[..end]),
        None => Some(rest),
    }
}

fn parse_structured(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ (Value::Array(_) | Value::Object(_))) => Some(value),
        _ => None,
    }
}

fn bracket_scan(text: &str) -> Option<Value> {
    let start = text.find(|ch| ch == '[' || ch == '{')?;
    let end = matching_close(&text[start..])?;
    parse_structured(&text[start..start + end])
}

/// Byte length of the balanced bracket expression at the start of `text`.
fn matching_close(text: &str) -> Option<usize> {
    let mut expected: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '[' => expected.push(']'),
            '{' => expected.push('}'),
            ']' | '}' => {
                if expected.pop() != Some(ch) {
                    return None;
                }
                if expected.is_empty() {
                    return Some(offset + ch.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}
