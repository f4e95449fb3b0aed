//! String utilities for the domain layer.

/// Truncate a string to a maximum byte length with ellipsis (UTF-8 safe)
///
/// The cut point is moved back to the nearest character boundary so the
/// result is always valid UTF-8.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let target = max_len.saturating_sub(3);
        let mut end = target.min(s.len());
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

/// First line of a string, trimmed.
///
/// Used when compressing multi-line agent output into single-line digests
/// (error signatures, iteration summaries).
pub fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("").trim()
}
