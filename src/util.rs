//! Shared utility functions used across the codebase.

/// Parse an environment variable as a boolean, returning `default` if unset.
///
/// Recognises `1`, `true`, `yes`, `y`, `on` (case-insensitive) as `true`;
/// any other value maps to `false`.
pub fn env_var_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

/// Find every top-level JSON object embedded in free text.
///
/// Scans for balanced `{...}` spans (ignoring braces inside string literals)
/// and keeps the ones that parse. Models often wrap JSON in prose or code
/// fences; this recovers it without a full parser.
pub fn extract_json_objects(text: &str) -> Vec<serde_json::Value> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut start = 0;

    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        match balanced_end(bytes, open) {
            Some(close) => {
                match serde_json::from_str::<serde_json::Value>(&text[open..=close]) {
                    Ok(value) if value.is_object() => {
                        found.push(value);
                        start = close + 1;
                    }
                    _ => start = open + 1,
                }
            }
            None => start = open + 1,
        }
    }

    found
}

/// Index of the brace closing the one at `open`, if balanced.
fn balanced_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Truncate to at most `max_chars` characters, appending `...` when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
