//! Balanced-JSON extraction from model output.
//!
//! Models wrap payloads in prose and code fences no matter how firmly the
//! prompt forbids it. The extractor scans for the first `[` or `{` and
//! returns the slice up to its matching close bracket, tracking string
//! literals and escapes so braces inside strings don't confuse the depth
//! counter.

/// Return the first balanced JSON value (object or array) in `text`, or
/// `None` when no opener is found or the brackets never balance.
pub fn first_json_value(text: &str) -> Option<&str> {
    let start = text.find(['[', '{'])?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
