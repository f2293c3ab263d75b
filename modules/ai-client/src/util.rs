/// Return the body of the first fenced block (any language tag), or the
/// trimmed input when there is no fence. An unterminated fence yields
/// everything after the opening line.
pub fn strip_code_blocks(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after_open = &trimmed[open + 3..];
    let body = match after_open.find('\n') {
        Some(nl) => &after_open[nl + 1..],
        None => after_open,
    };
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}
