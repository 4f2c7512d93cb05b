//! Reply repair: turn raw delegate text into JSON.
//!
//! Agents that answer through a terminal sometimes garble punctuation
//! (UTF-8 dashes decoded as cp437/cp1252 and re-encoded), prepend a BOM, or
//! wrap the JSON in a fenced code block. Repair only touches those; it never
//! rewrites field values beyond the byte sequences listed below.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::domain::shape::{ValidationError, Violation};

static DASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("ÔÇô|ÔÇö|â€“|â€”").expect("dash pattern"));

static ELLIPSIS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("ÔÇª|â€¦").expect("ellipsis pattern"));

// en-dash leaking an embedded quote; longest variant first
static LEAKED_DASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("ا\"اخaُ|ا\"اخa|ا\"اخ").expect("leaked dash pattern"));

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)\r?\n?```").expect("fence pattern")
});

/// Decode raw bytes, honouring UTF-16 and UTF-8 byte order marks.
pub fn decode_bytes(raw: &[u8]) -> String {
    match raw {
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        _ => String::from_utf8_lossy(raw).into_owned(),
    }
}

fn decode_utf16(raw: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Replace known mojibake sequences for dashes and ellipses.
pub fn repair_text(text: &str) -> Cow<'_, str> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    if text.is_ascii() {
        return Cow::Borrowed(text);
    }
    let dashes = DASH_RE.replace_all(text, "-");
    let ellipses = ELLIPSIS_RE.replace_all(&dashes, "...");
    let leaked = LEAKED_DASH_RE.replace_all(&ellipses, "-");
    Cow::Owned(leaked.into_owned())
}

/// Body of the first fenced code block, if any.
pub fn extract_fenced(text: &str) -> Option<&str> {
    FENCE_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Repair and parse a text reply.
///
/// Tries, in order: the whole text, the first fenced block, the outermost
/// `{ ... }` span.
pub fn parse_reply(text: &str) -> Result<Value, ValidationError> {
    let repaired = repair_text(text);
    let trimmed = repaired.trim();

    let mut candidates: Vec<&str> = vec![trimmed];
    if let Some(body) = extract_fenced(trimmed) {
        candidates.push(body.trim());
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && start < end
    {
        candidates.push(&trimmed[start..=end]);
    }

    let mut last_err = None;
    for candidate in candidates {
        match serde_json::from_str::<Value>(candidate) {
            Ok(value) => return Ok(value),
            Err(e) => last_err = Some(e),
        }
    }

    let found = last_err
        .map(|e| format!("unparseable text ({e})"))
        .unwrap_or_else(|| "empty text".to_string());
    Err(ValidationError::new(
        vec![Violation {
            path: "$".to_string(),
            expected: "JSON document".to_string(),
            found,
        }],
        Value::String(text.to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::cp437_en_dash("a ÔÇô b", "a - b")]
    #[case::cp437_em_dash("a ÔÇö b", "a - b")]
    #[case::cp1252_en_dash("a â€“ b", "a - b")]
    #[case::cp1252_em_dash("a â€” b", "a - b")]
    #[case::cp437_ellipsis("wait ÔÇª", "wait ...")]
    #[case::cp1252_ellipsis("wait â€¦", "wait ...")]
    #[case::leaked_dash_long("x ا\"اخaُ y", "x - y")]
    #[case::leaked_dash_short("x ا\"اخ y", "x - y")]
    #[case::bom("\u{feff}{}", "{}")]
    #[case::clean("plain ascii", "plain ascii")]
    fn mojibake_is_repaired(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(repair_text(input), expected);
    }

    #[test]
    fn utf16_with_bom_is_decoded() {
        let mut raw = vec![0xFF, 0xFE];
        for unit in "{\"a\":1}".encode_utf16() {
            raw.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_bytes(&raw), "{\"a\":1}");
        assert_eq!(decode_bytes(b"\xEF\xBB\xBFok"), "ok");
    }

    #[test]
    fn fenced_json_is_extracted() {
        let text = "Here you go:\n```json\n{\"findings\": []}\n```\nDone.";
        assert_eq!(parse_reply(text).unwrap(), json!({"findings": []}));
    }

    #[test]
    fn json_with_surrounding_prose_is_extracted() {
        let text = "Result: {\"summary\": \"ok ÔÇö done\"} thanks";
        assert_eq!(parse_reply(text).unwrap(), json!({"summary": "ok - done"}));
    }

    #[test]
    fn garbage_is_a_validation_error_with_raw_text() {
        let err = parse_reply("no json here").unwrap_err();
        assert_eq!(err.raw, json!("no json here"));
        assert_eq!(err.violations[0].path, "$");
    }
}
