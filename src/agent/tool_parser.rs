//! Tool-call extraction from model replies.
//!
//! Local models express tool calls in several JSON dialects. The parser
//! tries, in order: a JSON array of calls, a single call object (`input`
//! accepted as an alias for `arguments`), a `function_call` wrapper, the
//! OpenAI `tool_calls` wrapper, `<tool_call>` tags, and finally a
//! brace-balanced scan for call objects embedded in surrounding prose.
//! Calls arriving without an id get a process-global `call_<n>` id.

use std::sync::Mutex;

use serde_json::Value;

use crate::ai::types::ToolCallRef;

static CALL_COUNTER: Mutex<u64> = Mutex::new(0);

/// Next process-global call id: `call_1`, `call_2`, …
pub fn next_call_id() -> String {
    let mut counter = CALL_COUNTER.lock().unwrap_or_else(|e| e.into_inner());
    *counter += 1;
    format!("call_{}", *counter)
}

/// Parse every tool call out of a model reply. Returns an empty vector for
/// a tool-free reply.
pub fn parse_tool_calls(content: &str) -> Vec<ToolCallRef> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(calls) = from_json_value(&value)
            && !calls.is_empty()
        {
            return calls;
        }
    }

    let tagged = parse_tagged(content);
    if !tagged.is_empty() {
        return tagged;
    }

    parse_embedded(content)
}

/// Interpret an already-parsed JSON value as one of the call shapes.
fn from_json_value(value: &Value) -> Option<Vec<ToolCallRef>> {
    match value {
        Value::Array(items) => {
            let calls: Vec<ToolCallRef> =
                items.iter().filter_map(from_call_object).collect();
            if calls.is_empty() { None } else { Some(calls) }
        }
        Value::Object(_) => {
            if let Some(call) = from_call_object(value) {
                return Some(vec![call]);
            }
            if let Some(call) = from_function_call(value) {
                return Some(vec![call]);
            }
            from_openai_wrapper(value)
        }
        _ => None,
    }
}

/// `{id?, name, arguments|input}`.
fn from_call_object(value: &Value) -> Option<ToolCallRef> {
    let name = value.get("name")?.as_str()?.to_string();
    let arguments = value
        .get("arguments")
        .or_else(|| value.get("input"))
        .map(normalize_arguments)
        .unwrap_or_else(|| Value::Object(Default::default()));
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(next_call_id);
    Some(ToolCallRef { id, name, arguments })
}

/// `{"function_call": {"name": …, "arguments": "<json>"}}`.
fn from_function_call(value: &Value) -> Option<ToolCallRef> {
    let call = value.get("function_call")?;
    let name = call.get("name")?.as_str()?.to_string();
    let arguments = call
        .get("arguments")
        .map(normalize_arguments)
        .unwrap_or_else(|| Value::Object(Default::default()));
    Some(ToolCallRef {
        id: next_call_id(),
        name,
        arguments,
    })
}

/// `{"tool_calls": [{id, type, function: {name, arguments: "<json>"}}]}`.
fn from_openai_wrapper(value: &Value) -> Option<Vec<ToolCallRef>> {
    let entries = value.get("tool_calls")?.as_array()?;
    let mut calls = Vec::new();
    for entry in entries {
        let Some(function) = entry.get("function") else {
            continue;
        };
        let Some(name) = function.get("name").and_then(Value::as_str) else {
            continue;
        };
        let arguments = function
            .get("arguments")
            .map(normalize_arguments)
            .unwrap_or_else(|| Value::Object(Default::default()));
        let id = entry
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(next_call_id);
        calls.push(ToolCallRef {
            id,
            name: name.to_string(),
            arguments,
        });
    }
    if calls.is_empty() { None } else { Some(calls) }
}

/// Arguments may arrive as an object or as a JSON-encoded string.
fn normalize_arguments(raw: &Value) -> Value {
    match raw {
        Value::String(s) => {
            serde_json::from_str(s).unwrap_or_else(|_| Value::Object(Default::default()))
        }
        other => other.clone(),
    }
}

// ─── <tool_call> tags ─────────────────────────────────────────────────────────

fn parse_tagged(content: &str) -> Vec<ToolCallRef> {
    const OPEN: &str = "<tool_call>";
    const CLOSE: &str = "</tool_call>";

    let mut calls = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find(OPEN) {
        rest = &rest[start + OPEN.len()..];
        let Some(end) = rest.find(CLOSE) else { break };
        let body = rest[..end].trim();
        rest = &rest[end + CLOSE.len()..];

        if let Ok(value) = serde_json::from_str::<Value>(body)
            && let Some(call) = from_call_object(&value)
        {
            calls.push(call);
        }
    }
    calls
}

// ─── Embedded-object scan ─────────────────────────────────────────────────────

/// Walk the string tracking brace depth (string-literal aware) and try each
/// balanced `{…}` substring as a call shape.
fn parse_embedded(content: &str) -> Vec<ToolCallRef> {
    let bytes = content.as_bytes();
    let mut calls = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        let Some(end) = balanced_end(bytes, i) else {
            i += 1;
            continue;
        };
        let candidate = &content[i..=end];
        if let Ok(value) = serde_json::from_str::<Value>(candidate)
            && let Some(mut found) = from_json_value(&value)
        {
            calls.append(&mut found);
            i = end + 1;
            continue;
        }
        i += 1;
    }
    calls
}

/// Byte index of the `}` closing the `{` at `start`, honoring JSON string
/// literals and escapes.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

// ─── Tests ────────────────────────────────────────────────────────────────────
