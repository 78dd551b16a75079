/// Name used when nothing safe is left of the client's filename.
pub const FALLBACK_FILENAME: &str = "unnamed";

const MAX_FILENAME_BYTES: usize = 255;

/// Sanitizes a client-supplied filename so it can be used as a single path
/// component inside a digest directory.
///
/// Only the last path component is kept, reserved and control characters are
/// replaced with `_`, leading dots and trailing dots/spaces are stripped and
/// the result is capped at 255 bytes. Never returns an empty string.
pub fn sanitize_filename(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or("");

    if name.len() != filename.len() {
        tracing::warn!("Path components stripped from filename: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
                || c == ';'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = sanitized
        .trim_start_matches('.')
        .trim_end_matches(['.', ' ']);

    // Limit length safely for UTF-8
    let mut end = trimmed.len().min(MAX_FILENAME_BYTES);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    let truncated = &trimmed[..end];

    if truncated.trim().is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        truncated.to_string()
    }
}
