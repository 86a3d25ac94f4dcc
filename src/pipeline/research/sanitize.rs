//! Post-generation output sanitization.
//!
//! Strips model artifacts (thinking blocks, stray special tokens, markdown
//! fences) and isolates the JSON object the validator should parse.

use std::sync::LazyLock;

use regex::Regex;

/// Strip model-specific artifacts from raw generator output.
///
/// Handles:
/// 1. `<think>...</think>` reasoning blocks
/// 2. Gemma-style thinking prefixes (`<unusedN>thought\n...`)
/// 3. Stray `<unusedN>` / `<|...|>` special tokens
/// 4. Leading/trailing whitespace
pub fn sanitize_generation_output(raw: &str) -> String {
    static THINK_BLOCK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));
    static SPECIAL_TOKEN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<unused\d+>|<\|[a-z_]+\|>").expect("valid regex"));

    let mut text = THINK_BLOCK_RE.replace_all(raw, "").to_string();

    if let Some(idx) = text.find("<unused") {
        if let Some(thought_offset) = text[idx..].find("thought\n") {
            text = text[idx + thought_offset + 8..].to_string();
        }
    }

    text = SPECIAL_TOKEN_RE.replace_all(&text, "").to_string();
    text.trim().to_string()
}

/// Locate the JSON object to validate.
///
/// Prefers a fenced ```json block; otherwise returns the first balanced
/// top-level `{...}` span, honoring string literals and escapes.
pub fn extract_json_object(text: &str) -> Option<&str> {
    if let Some(fence) = text.find("```json") {
        let body_start = fence + 7;
        if let Some(end) = text[body_start..].find("```") {
            let body = text[body_start..body_start + end].trim();
            if body.starts_with('{') {
                return Some(body);
            }
        }
    }

    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
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
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── sanitize_generation_output ─────────────────────────────

    #[test]
    fn strips_think_blocks() {
        let raw = "<think>Let me consider the garlands...\nok</think>\n{\"rows\": []}";
        assert_eq!(sanitize_generation_output(raw), "{\"rows\": []}");
    }

    #[test]
    fn strips_thinking_prefix() {
        let raw = "<unused94>thought\nReasoning here\n{\"rows\": []}";
        assert_eq!(sanitize_generation_output(raw), "Reasoning here\n{\"rows\": []}");
    }

    #[test]
    fn strips_special_tokens() {
        let raw = "<|im_start|>{\"rows\": []}<unused3>";
        assert_eq!(sanitize_generation_output(raw), "{\"rows\": []}");
    }

    #[test]
    fn clean_text_unchanged() {
        let text = "{\"rows\": [{\"keyword\": \"confetti\"}]}";
        assert_eq!(sanitize_generation_output(text), text);
    }

    #[test]
    fn whitespace_only_returns_empty() {
        assert_eq!(sanitize_generation_output("  \n\t "), "");
    }

    // ── extract_json_object ────────────────────────────────────

    #[test]
    fn extracts_fenced_block() {
        let text = "Here you go:\n```json\n{\"rows\": []}\n```\nThanks!";
        assert_eq!(extract_json_object(text), Some("{\"rows\": []}"));
    }

    #[test]
    fn extracts_first_balanced_object() {
        let text = "Result: {\"a\": {\"b\": 1}} and then {\"c\": 2}";
        assert_eq!(extract_json_object(text), Some("{\"a\": {\"b\": 1}}"));
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let text = r#"{"title": "50 {fun} ideas \" }", "rows": []} trailing"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"title": "50 {fun} ideas \" }", "rows": []}"#)
        );
    }

    #[test]
    fn unbalanced_object_is_none() {
        assert!(extract_json_object("{\"rows\": [").is_none());
        assert!(extract_json_object("no json here").is_none());
    }
}
