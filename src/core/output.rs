//! Compact output rendering helpers for CLI surfaces.
//!
//! Keeps verdict output bounded and readable while preserving signal.
//! Engines never print; only the CLI layer routes through here.

use crate::core::report::{Verdict, Violation};
use colored::Colorize;

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// One violation as a terminal line: `  RN9 timing.duration_ms: message`.
pub fn render_violation(v: &Violation) -> String {
    let location = v.path.as_deref().unwrap_or("-");
    format!(
        "  {} {}: {}",
        v.rule_id.red().bold(),
        location.yellow(),
        compact_line(&v.message, 160)
    )
}

/// Human-readable verdict for one document artifact.
pub fn render_verdict(label: &str, verdict: &Verdict) -> String {
    let mut lines = Vec::new();
    if verdict.valid {
        lines.push(format!("{} {}", "valid".green().bold(), label));
        if let Some(hash) = &verdict.hash {
            lines.push(format!("  {}", hash.dimmed()));
        }
    } else {
        lines.push(format!(
            "{} {} ({} violation(s))",
            "invalid".red().bold(),
            label,
            verdict.violations.len()
        ));
        for v in &verdict.violations {
            lines.push(render_violation(v));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::Violation;

    #[test]
    fn compact_line_bounds_and_collapses() {
        assert_eq!(compact_line("a\nb\t c", 10), "a b c");
        assert_eq!(compact_line("abcdef", 3), "abc...");
        assert_eq!(compact_line("abc", 3), "abc");
    }

    #[test]
    fn render_covers_both_outcomes() {
        colored::control::set_override(false);
        let ok = Verdict {
            valid: true,
            violations: vec![],
            hash: Some("sha256:abc".to_string()),
        };
        let text = render_verdict("runner.json", &ok);
        assert!(text.contains("valid runner.json"));
        assert!(text.contains("sha256:abc"));

        let bad = Verdict::invalid(vec![Violation::new("RN10", Some("exit.code".into()), "out of range")]);
        let text = render_verdict("runner.json", &bad);
        assert!(text.contains("invalid runner.json (1 violation(s))"));
        assert!(text.contains("RN10 exit.code: out of range"));
    }
}
