//! Tolerant extraction of a JSON object from free-form LLM output.
//!
//! Models wrap JSON in prose, code fences and the odd single-quoted string.
//! [`extract_json_object`] finds the first balanced `{ ... }` (braces inside
//! string literals and escaped braces do not count), parses it, and on
//! failure retries once after a normalisation pass that repairs quote style,
//! invalid escapes and trailing commas.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub type JsonObject = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    /// No balanced object in the text.
    #[error("no JSON object found")]
    NotFound,
    /// A balanced candidate exists but is not valid JSON, even after repair.
    #[error("JSON object found but invalid: {reason}")]
    Invalid { candidate: String, reason: String },
}

/// The first balanced object in `text`, braces included.
///
/// A backslash always escapes the next character. Inside the object, `"`
/// and `'` open string literals whose contents are ignored for brace
/// counting. Returns `None` if the first object never closes.
pub fn find_object(text: &str) -> Option<&str> {
    let mut start = None;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = text.char_indices();

    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            chars.next();
            continue;
        }
        let Some(s) = start else {
            if c == '{' {
                start = Some(i);
                depth = 1;
            }
            continue;
        };
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[s..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Single repair pass: single-quoted strings become double-quoted, escapes
/// JSON does not know (`\{`, `\'`, ...) lose their backslash, and commas
/// directly before `}` or `]` are dropped.
pub fn normalize(candidate: &str) -> String {
    let chars: Vec<char> = candidate.chars().collect();
    let mut out = String::with_capacity(candidate.len() + 8);
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some(q) => {
                if c == '\\' {
                    match chars.get(i + 1) {
                        Some(&next) if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') => {
                            out.push('\\');
                            out.push(next);
                        }
                        Some(&next) => out.push(next),
                        None => out.push_str("\\\\"),
                    }
                    i += 2;
                    continue;
                }
                if c == q {
                    out.push('"');
                    quote = None;
                } else if c == '"' {
                    // Bare double quote inside a single-quoted string
                    out.push_str("\\\"");
                } else if c == '\n' {
                    out.push_str("\\n");
                } else {
                    out.push(c);
                }
            }
            None => match c {
                '"' | '\'' => {
                    out.push('"');
                    quote = Some(c);
                }
                ',' => {
                    let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                    if !matches!(next, Some('}') | Some(']')) {
                        out.push(c);
                    }
                }
                _ => out.push(c),
            },
        }
        i += 1;
    }
    out
}

/// Extract and parse the first JSON object in `text`.
pub fn extract_json_object(text: &str) -> Result<JsonObject, ExtractionError> {
    let candidate = find_object(text).ok_or(ExtractionError::NotFound)?;

    match serde_json::from_str::<JsonObject>(candidate) {
        Ok(obj) => Ok(obj),
        Err(first) => {
            tracing::debug!("JSON candidate rejected ({}), retrying after repair", first);
            serde_json::from_str::<JsonObject>(&normalize(candidate)).map_err(|e| {
                ExtractionError::Invalid {
                    candidate: candidate.to_string(),
                    reason: e.to_string(),
                }
            })
        }
    }
}

/// [`extract_json_object`] followed by typed deserialisation. A shape
/// mismatch is reported as [`ExtractionError::Invalid`].
pub fn extract_json_as<T: DeserializeOwned>(text: &str) -> Result<T, ExtractionError> {
    let obj = extract_json_object(text)?;
    let candidate = Value::Object(obj);
    serde_json::from_value(candidate.clone()).map_err(|e| ExtractionError::Invalid {
        candidate: candidate.to_string(),
        reason: e.to_string(),
    })
}
