//! Text Extraction
//!
//! Best-effort scraping of model output. Fallback order for structured
//! payloads: fenced code block, then the outermost brace pair, then a parse
//! failure reported to the caller.

use crate::error::{CopilotError, Result};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SQL_FENCE: Regex = Regex::new(r"(?is)```sql\b\s*(.*?)\s*```").unwrap();
    static ref JSON_FENCE: Regex = Regex::new(r"(?is)```json\b\s*(.*?)\s*```").unwrap();
    // A tag only counts as one when a newline follows it.
    static ref ANY_FENCE: Regex =
        Regex::new(r"(?s)```(?:[A-Za-z0-9_-]+[^\S\n]*\n|\s*)(.*?)\s*```").unwrap();
}

/// Contents of the first fenced block tagged with `lang`, or of the first
/// untagged-or-tagged block when `lang` is `None`.
pub fn extract_fenced_block<'a>(text: &'a str, lang: Option<&str>) -> Option<&'a str> {
    let re: &Regex = match lang.map(|l| l.to_ascii_lowercase()) {
        Some(l) if l == "sql" => &SQL_FENCE,
        Some(l) if l == "json" => &JSON_FENCE,
        _ => &ANY_FENCE,
    };
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Remove fence markers without looking for a block.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "")
        .replace("```sql", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Normalize generated SQL: a fenced block wins over the raw text.
pub fn clean_sql(text: &str) -> String {
    if let Some(block) = extract_fenced_block(text, Some("sql")) {
        return block.to_string();
    }
    if let Some(block) = extract_fenced_block(text, None) {
        return block.to_string();
    }
    text.replace("```", "").trim().to_string()
}

/// Slice from the first `{` to the last `}` inclusive.
pub fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Locate and parse a JSON object embedded in free text. A fenced block is
/// tried first; when it holds no usable object the whole reply is scanned.
pub fn extract_json_object(text: &str) -> Result<serde_json::Value> {
    let trimmed = text.trim();
    let fenced = extract_fenced_block(trimmed, Some("json"))
        .or_else(|| extract_fenced_block(trimmed, None));

    let mut last_err = None;
    for candidate in fenced.into_iter().chain(std::iter::once(trimmed)) {
        let Some(sliced) = outer_braces(candidate) else {
            continue;
        };
        match serde_json::from_str::<serde_json::Value>(sliced) {
            Ok(value) if value.is_object() => return Ok(value),
            Ok(_) => {
                last_err = Some(CopilotError::Synthesis(
                    "Extracted JSON is not an object".to_string(),
                ))
            }
            Err(e) => last_err = Some(e.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        CopilotError::Synthesis(format!("No JSON object found in: {}", preview(trimmed)))
    }))
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}
