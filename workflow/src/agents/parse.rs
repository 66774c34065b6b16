//! Tolerant JSON extraction from generation output.
//!
//! Attempts, in order:
//! 1. Direct parse.
//! 2. Strip markdown code fences and retry.
//! 3. Extract the first balanced `{...}` block.
//! 4. Drop trailing commas from that block and retry.

use serde_json::Value;
use tracing::debug;

pub fn extract_json(raw: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(raw.trim()) {
        return Some(value);
    }

    let stripped = strip_code_fences(raw);
    if let Ok(value) = serde_json::from_str::<Value>(stripped) {
        return Some(value);
    }

    let block = first_object(stripped)?;
    if let Ok(value) = serde_json::from_str::<Value>(block) {
        return Some(value);
    }

    let sanitized = drop_trailing_commas(block);
    match serde_json::from_str::<Value>(&sanitized) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(err = %err, raw_len = raw.len(), "no JSON found in response");
            None
        }
    }
}

/// Inner text of the first fenced block, or the trimmed input when unfenced.
fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after_fence = &trimmed[open + 3..];
    // Skip the info string (`json`, `JSON`, ...) up to the end of the line.
    let body_start = after_fence.find('\n').map_or(0, |i| i + 1);
    let body = &after_fence[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// First `{...}` block with balanced braces, ignoring braces inside strings.
fn first_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, b) in s.bytes().enumerate().skip(start) {
        if escape {
            escape = false;
            continue;
        }
        match b {
            b'\\' if in_string => escape = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn drop_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escape = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}' | ']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}
