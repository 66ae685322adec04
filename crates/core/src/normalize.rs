//! Recovery of JSON payloads from free-form model output.
//!
//! Models wrap their answers in prose, markdown fences and "thinking"
//! preambles. Extraction is layered and the last candidate always wins:
//!
//! 1. the last fenced block (```` ``` ```` optionally tagged `json`);
//! 2. otherwise the balanced top-level `{...}` / `[...]` spans, last first,
//!    keeping the first one that parses; scanning stops at an opener that
//!    never closes, so nothing nested inside truncated output is picked up;
//! 3. otherwise the span from the first opener to its last matching closer;
//! 4. otherwise the whole trimmed text.
//!
//! Candidates are parsed strictly. Nothing is repaired beyond trimming.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?i:json)?\s*(.*?)\s*```").expect("fenced block pattern is valid")
});

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("model output is not valid JSON ({source}); candidate: {candidate}")]
    MalformedResponse {
        candidate: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("model output does not match the expected {expected} shape: {source}")]
    UnexpectedShape {
        expected: &'static str,
        payload: Value,
        #[source]
        source: serde_json::Error,
    },
}

impl NormalizeError {
    /// The substring that failed to parse, when parsing was the failure.
    pub fn candidate(&self) -> Option<&str> {
        match self {
            Self::MalformedResponse { candidate, .. } => Some(candidate.as_str()),
            Self::UnexpectedShape { .. } => None,
        }
    }

    /// The parsed payload that failed the typed shape check.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::MalformedResponse { .. } => None,
            Self::UnexpectedShape { payload, .. } => Some(payload),
        }
    }
}

pub fn extract_structured(raw_text: &str) -> Result<Value, NormalizeError> {
    let text = raw_text.trim();
    if let Some(block) = last_fenced_block(text) {
        return parse_candidate(block);
    }

    let mut candidates = bracket_candidates(text).into_iter();
    let Some(first) = candidates.next() else {
        return parse_candidate(text);
    };
    // The error reported is the one for the preferred (last) candidate.
    let first_error = match parse_candidate(first) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };
    for candidate in candidates {
        if let Ok(value) = parse_candidate(candidate) {
            return Ok(value);
        }
    }
    Err(first_error)
}

/// Extracts a payload and deserializes it into the call-site schema.
pub fn extract_as<T>(raw_text: &str) -> Result<T, NormalizeError>
where
    T: DeserializeOwned,
{
    let payload = extract_structured(raw_text)?;
    serde_json::from_value::<T>(payload.clone()).map_err(|source| {
        NormalizeError::UnexpectedShape {
            expected: short_type_name::<T>(),
            payload,
            source,
        }
    })
}

/// Bracket-delimited candidates in preference order: balanced spans from
/// last to first, then the greedy span when it adds something new.
fn bracket_candidates(text: &str) -> Vec<&str> {
    let mut spans = balanced_spans(text);
    spans.reverse();
    if let Some(greedy) = greedy_span(text) {
        if !spans.contains(&greedy) {
            spans.push(greedy);
        }
    }
    spans
        .into_iter()
        .map(|(start, end)| text[start..=end].trim())
        .collect()
}

fn last_fenced_block(text: &str) -> Option<&str> {
    FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|captures| captures.get(1))
        .last()
        .map(|block| block.as_str().trim())
}

fn parse_candidate(candidate: &str) -> Result<Value, NormalizeError> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(value) => Ok(value),
        Err(source) => {
            let retrimmed =
                candidate.trim_matches(|ch: char| ch.is_whitespace() || ch == '\u{feff}');
            serde_json::from_str::<Value>(retrimmed).map_err(|_| {
                NormalizeError::MalformedResponse {
                    candidate: candidate.to_string(),
                    source,
                }
            })
        }
    }
}

/// Byte ranges of the top-level balanced objects and arrays, in order.
/// An opener that never closes ends the scan: whatever follows it is
/// truncated output, and spans nested inside it are not answers.
fn balanced_spans(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut pos = 0;

    while let Some(offset) = bytes[pos..].iter().position(|b| *b == b'{' || *b == b'[') {
        let start = pos + offset;
        let Some(end) = balanced_end(bytes, start) else {
            break;
        };
        spans.push((start, end));
        pos = end + 1;
        if pos >= bytes.len() {
            break;
        }
    }

    spans
}

fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut closers = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (index, byte) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => closers.push(b'}'),
            b'[' => closers.push(b']'),
            b'}' | b']' => {
                if closers.pop() != Some(*byte) {
                    return None;
                }
                if closers.is_empty() {
                    return Some(index);
                }
            }
            _ => {}
        }
    }

    None
}

/// First opener to the last closer of the same kind, for text whose
/// brackets never balance.
fn greedy_span(text: &str) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(|b| *b == b'{' || *b == b'[')?;
    let closer = if bytes[start] == b'{' { b'}' } else { b']' };
    bytes
        .iter()
        .rposition(|b| *b == closer)
        .filter(|end| *end > start)
        .map(|end| (start, end))
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    match full.find('<') {
        Some(generic_start) => {
            let (outer, inner) = full.split_at(generic_start);
            let outer = outer.rsplit("::").next().unwrap_or(outer);
            if outer == "Vec" {
                "list"
            } else {
                inner
                    .trim_end_matches('>')
                    .rsplit("::")
                    .next()
                    .unwrap_or(full)
            }
        }
        None => full.rsplit("::").next().unwrap_or(full),
    }
}
