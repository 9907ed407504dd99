//! Formatted output helpers for CLI commands.

use serde::Serialize;

/// Returns a horizontal rule `width` characters wide.
#[must_use]
pub fn rule(width: usize) -> String {
    "\u{2500}".repeat(width)
}

/// Prints one aligned `label: value` line.
pub fn print_field(label: &str, value: &str) {
    println!("  {:<20} {value}", format!("{label}:"));
}

/// Formats `count` with `noun`, pluralized with a trailing `s`.
#[must_use]
pub fn count_label(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

/// Prints `value` as pretty JSON.
///
/// # Errors
///
/// Returns an error if `value` cannot be serialized.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_label_pluralizes() {
        assert_eq!(count_label(0, "file"), "0 files");
        assert_eq!(count_label(1, "file"), "1 file");
        assert_eq!(count_label(3, "environment"), "3 environments");
    }

    #[test]
    fn rule_has_requested_width() {
        assert_eq!(rule(5).chars().count(), 5);
    }
}
