//! Small pure text helpers.

/// Marker appended to byte-capped tool output.
pub const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Largest index `<= index` that lies on a char boundary of `s`.
#[must_use]
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut end = index;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// Keep at most `max_bytes` bytes of `raw`, then append [`TRUNCATION_MARKER`].
///
/// The marker does not count toward the cap, so an ASCII body is exactly
/// `max_bytes` long. Returns `raw` unchanged when it already fits.
#[must_use]
pub fn truncate_bytes_with_marker(mut raw: String, max_bytes: usize) -> String {
    if raw.len() <= max_bytes {
        return raw;
    }
    let end = floor_char_boundary(&raw, max_bytes);
    raw.truncate(end);
    raw.push_str(TRUNCATION_MARKER);
    raw
}

/// Truncate a string to `max` characters (minimum 3), ending in `...` when cut.
///
/// Surrounding whitespace is trimmed first.
#[must_use]
pub fn truncate_with_ellipsis(raw: &str, max: usize) -> String {
    let max = max.max(3);
    let trimmed = raw.trim();
    if trimmed.chars().count() <= max {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(max - 3).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::{TRUNCATION_MARKER, floor_char_boundary, truncate_bytes_with_marker, truncate_with_ellipsis};

    #[test]
    fn ellipsis_short_string_unchanged() {
        assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
    }

    #[test]
    fn ellipsis_cuts_long_string() {
        assert_eq!(truncate_with_ellipsis("hello world", 8), "hello...");
    }

    #[test]
    fn ellipsis_minimum_is_three() {
        assert_eq!(truncate_with_ellipsis("hello", 1), "...");
    }

    #[test]
    fn marker_truncation_keeps_exact_cap() {
        let out = truncate_bytes_with_marker("x".repeat(100), 40);
        assert_eq!(out.len(), 40 + TRUNCATION_MARKER.len());
        assert!(out.starts_with(&"x".repeat(40)));
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn marker_truncation_leaves_fitting_output_alone() {
        assert_eq!(truncate_bytes_with_marker("short".into(), 5), "short");
    }

    #[test]
    fn marker_truncation_respects_char_boundaries() {
        // "é" is two bytes; a cap of 3 lands inside the second one.
        let out = truncate_bytes_with_marker("éé".into(), 3);
        assert_eq!(out, format!("é{TRUNCATION_MARKER}"));
    }

    #[test]
    fn floor_boundary_clamps_past_end() {
        assert_eq!(floor_char_boundary("abc", 10), 3);
        assert_eq!(floor_char_boundary("aé", 2), 1);
    }
}
