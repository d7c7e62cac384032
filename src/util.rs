//! Small shared helpers.

use std::time::Duration;

/// Truncate `s` to at most `max` characters, appending `...` when anything
/// was cut. Always lands on a char boundary, so multi-byte text is safe.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}

/// Render a duration the way tool results report it: millisecond precision
/// under a second, tenths of a second above.
pub fn format_duration(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}
