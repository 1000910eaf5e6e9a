//! Safe extraction of JSON objects from free-form model output.
//!
//! Models wrap JSON in prose, code fences, or multiple attempts. The
//! scanner walks the text for a balanced top-level object, tracking
//! string/escape state and nesting depth with a hard bound, then hands
//! the candidate to `serde_json` for real parsing. Anything deeper than
//! [`MAX_SCAN_DEPTH`] is abandoned rather than risked.

use serde_json::Value;

/// Maximum nesting depth the scanner will follow.
pub const MAX_SCAN_DEPTH: usize = 100;

/// Find and parse the first complete JSON object in `text`.
///
/// Returns `None` when no balanced, parseable object exists within the
/// depth bound. Arrays at the top level are ignored on purpose – stage
/// contracts are object-shaped.
#[must_use]
pub fn extract_first_json_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut search_from = 0usize;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        match scan_balanced(bytes, start) {
            ScanResult::Complete(end) => {
                if let Ok(value) = serde_json::from_str::<Value>(&text[start..end]) {
                    if value.is_object() {
                        return Some(value);
                    }
                }
                // Parse failed despite balancing (e.g. trailing commas);
                // resume after this opening brace.
                search_from = start + 1;
            }
            ScanResult::TooDeep => return None,
            ScanResult::Unbalanced => {
                search_from = start + 1;
            }
        }
    }
    None
}

enum ScanResult {
    /// Byte offset one past the closing brace.
    Complete(usize),
    TooDeep,
    Unbalanced,
}

/// Walk from the `{` at `start`, honoring strings and escapes, and
/// return the end of the balanced object.
fn scan_balanced(bytes: &[u8], start: usize) -> ScanResult {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &byte) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => {
                depth += 1;
                if depth > MAX_SCAN_DEPTH {
                    return ScanResult::TooDeep;
                }
            }
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return ScanResult::Complete(i + 1);
                }
            }
            _ => {}
        }
    }
    ScanResult::Unbalanced
}
