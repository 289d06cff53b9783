use crate::error::{Error, Result};

/// Locates the JSON object or array in a model response.
///
/// Looks for a ```json fence first, then any fenced block starting with
/// `{` or `[`, then the first balanced object or array in the raw text.
pub fn extract_json(text: &str) -> Result<&str> {
    if let Some(start) = text.find("```json") {
        let start = start + 7;
        if let Some(end) = text[start..].find("```") {
            return Ok(text[start..start + end].trim());
        }
    }

    if let Some(start) = text.find("```") {
        let start = start + 3;
        // Skip any language identifier on the same line
        let start = text[start..]
            .find('\n')
            .map(|i| start + i + 1)
            .unwrap_or(start);
        if let Some(end) = text[start..].find("```") {
            let content = text[start..start + end].trim();
            if content.starts_with('{') || content.starts_with('[') {
                return Ok(content);
            }
        }
    }

    if let Some(start) = text.find(['{', '[']) {
        if let Some(end) = balanced_end(&text[start..]) {
            return Ok(&text[start..start + end]);
        }
    }

    Err(Error::ParseError("No valid JSON found in response".to_string()))
}

/// Byte length of the balanced value at the start of `text`.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}
