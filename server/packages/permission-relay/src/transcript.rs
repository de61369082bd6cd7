//! Reads the agent's JSONL session transcript.

use std::path::Path;

use serde_json::Value;

/// Text of the last assistant message in `contents`, one JSON object per
/// line. Lines that fail to parse are skipped.
pub fn last_assistant_text(contents: &str) -> Option<String> {
    contents
        .lines()
        .rev()
        .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
        .filter(|record| record.get("type").and_then(Value::as_str) == Some("assistant"))
        .find_map(|record| message_content(&record).map(content_text))
}

pub fn last_assistant_text_in(path: &Path) -> std::io::Result<Option<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(last_assistant_text(&contents))
}

fn message_content(record: &Value) -> Option<&Value> {
    let content = match record.get("message") {
        Some(message) if message.is_object() => message.get("content"),
        _ => record.get("content"),
    };
    content.filter(|content| !content.is_null())
}

fn content_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text.as_str()),
                Value::Object(_) if part.get("type").and_then(Value::as_str) == Some("text") => {
                    Some(part.get("text").and_then(Value::as_str).unwrap_or_default())
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
