//! AI response decoding.
//!
//! Assistants are asked for JSON `{fixes, explanation}` but routinely
//! wrap it in prose or a fenced code block. Decoding runs through
//! explicit fallback stages: direct parse, fenced-block extraction,
//! outermost-brace slice, then a typed error.

use serde::Deserialize;
use thiserror::Error;

use crate::types::Fix;

/// A decoded assistant response.
#[derive(Debug, Clone, Deserialize)]
pub struct AiResponse {
    #[serde(default)]
    pub fixes: Vec<Fix>,
    #[serde(default)]
    pub explanation: String,
}

/// Why a response could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("response contained no JSON object")]
    NoJsonFound,
    #[error("response JSON did not match the expected shape: {0}")]
    WrongShape(#[from] serde_json::Error),
}

/// Decode an assistant response, trying progressively looser extraction.
pub fn decode(raw: &str) -> Result<AiResponse, DecodeError> {
    let trimmed = raw.trim();

    // Stage 1: the whole response is the JSON object
    if let Ok(response) = serde_json::from_str::<AiResponse>(trimmed) {
        return Ok(response);
    }

    // Stage 2: a fenced code block holds it
    if let Some(block) = fenced_block(trimmed) {
        if let Ok(response) = serde_json::from_str::<AiResponse>(block.trim()) {
            return Ok(response);
        }
    }

    // Stage 3: slice from the first '{' to the last '}'
    let slice = outer_braces(trimmed).ok_or(DecodeError::NoJsonFound)?;
    Ok(serde_json::from_str::<AiResponse>(slice)?)
}

/// Extract the body of the first fenced code block.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip a language tag on the fence line
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// Slice from the first `{` to the last `}`.
fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end >= start {
        Some(&text[start..=end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{"fixes": [{"path": "src/A.cs", "replacements": [{"search": "old", "replace": "new"}]}], "explanation": "swap"}"#;

    #[test]
    fn test_direct_parse() {
        let response = decode(PAYLOAD).unwrap();
        assert_eq!(response.fixes.len(), 1);
        assert_eq!(response.explanation, "swap");
    }

    #[test]
    fn test_fenced_block_extraction() {
        let wrapped = format!("Here is the fix:\n```json\n{PAYLOAD}\n```\nDone.");
        let response = decode(&wrapped).unwrap();
        assert_eq!(response.fixes.len(), 1);
        assert_eq!(response.fixes[0].path, "src/A.cs");
    }

    #[test]
    fn test_brace_slice_fallback() {
        let chatty = format!("Sure! The change you need is {PAYLOAD} - let me know.");
        let response = decode(&chatty).unwrap();
        assert_eq!(response.fixes.len(), 1);
    }

    #[test]
    fn test_no_json_is_typed_error() {
        let err = decode("I could not determine a fix.").unwrap_err();
        assert!(matches!(err, DecodeError::NoJsonFound));
    }

    #[test]
    fn test_missing_fields_default() {
        let response = decode(r#"{"explanation": "nothing to do"}"#).unwrap();
        assert!(response.fixes.is_empty());
    }
}
