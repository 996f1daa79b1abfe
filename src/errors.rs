//! Terminal rendering for diagnostics.
//!
//! The evaluator core only produces [`Diagnostic`] values; everything about
//! how they look (colors, source snippets, "did you mean?" hints) lives
//! here, so the core stays testable by comparing plain data.

use crate::ast::{SourceMap, Span};
use crate::diagnostics::{Diagnostic, Severity};

/// ANSI color codes, disabled wholesale when not writing to a TTY.
#[derive(Debug, Clone, Default)]
pub struct Colors {
    pub enabled: bool,
}

impl Colors {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn red(&self) -> &'static str {
        if self.enabled {
            "\x1b[31m"
        } else {
            ""
        }
    }

    pub fn yellow(&self) -> &'static str {
        if self.enabled {
            "\x1b[33m"
        } else {
            ""
        }
    }

    pub fn cyan(&self) -> &'static str {
        if self.enabled {
            "\x1b[36m"
        } else {
            ""
        }
    }

    pub fn bold(&self) -> &'static str {
        if self.enabled {
            "\x1b[1m"
        } else {
            ""
        }
    }

    pub fn reset(&self) -> &'static str {
        if self.enabled {
            "\x1b[0m"
        } else {
            ""
        }
    }
}

// ============================================================================
// "Did you mean?" suggestions
// ============================================================================

/// Levenshtein edit distance between two strings.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Single-row DP over the second string.
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, &ca) in a.iter().enumerate() {
        let mut prev_diag = row[0];
        row[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            let next = (row[j] + 1).min(row[j + 1] + 1).min(prev_diag + cost);
            prev_diag = row[j + 1];
            row[j + 1] = next;
        }
    }
    row[b.len()]
}

/// Candidates within `max_distance` edits of `name`, closest first, ties
/// broken alphabetically, at most three. Never suggests `name` itself.
pub fn find_similar<'a>(
    name: &str,
    candidates: impl IntoIterator<Item = &'a str>,
    max_distance: usize,
) -> Vec<String> {
    let mut scored: Vec<(usize, String)> = candidates
        .into_iter()
        .filter_map(|c| {
            let dist = levenshtein_distance(name, c);
            (dist > 0 && dist <= max_distance).then(|| (dist, c.to_string()))
        })
        .collect();
    scored.sort();
    scored.into_iter().map(|(_, s)| s).take(3).collect()
}

// ============================================================================
// Diagnostic rendering
// ============================================================================

/// The header line, e.g. `-- RecoverableError [PE1001] ---------------------`.
pub fn format_header(diagnostic: &Diagnostic, colors: &Colors) -> String {
    let color = match diagnostic.severity {
        Severity::Warning => colors.yellow(),
        Severity::RecoverableError | Severity::FatalError => colors.red(),
    };
    let label = format!("{} [{}]", diagnostic.severity, diagnostic.code);
    let dashes = "-".repeat(60usize.saturating_sub(label.len() + 4));
    format!("{}-- {} {}{}", color, label, dashes, colors.reset())
}

/// The location line, e.g. `input.js:3:7`.
pub fn format_location(
    filename: Option<&str>,
    span: &Span,
    source_map: &SourceMap,
    colors: &Colors,
) -> String {
    let pos = source_map.position(span.start);
    let file = filename.unwrap_or("<input>");
    format!("{}{}:{}{}", colors.bold(), file, pos, colors.reset())
}

/// A source line with a caret underline beneath the offending span.
pub fn format_snippet(source_map: &SourceMap, span: &Span, colors: &Colors) -> String {
    let start = source_map.position(span.start);
    let end = source_map.position(span.end);
    let line_text = source_map.line(start.line).unwrap_or("");
    let gutter = start.line.to_string();

    let mut out = String::new();
    out.push_str(&format!(
        "{}{} |{} {}\n",
        colors.cyan(),
        gutter,
        colors.reset(),
        line_text
    ));

    let padding = " ".repeat(gutter.len() + 3 + start.column - 1);
    let underline = if start.line == end.line {
        "^".repeat((end.column.saturating_sub(start.column)).max(1))
    } else {
        "^".to_string()
    };
    out.push_str(&format!(
        "{}{}{}{}",
        padding,
        colors.red(),
        underline,
        colors.reset()
    ));
    out
}

/// The full multi-line rendering of one diagnostic.
pub fn render_diagnostic(
    diagnostic: &Diagnostic,
    source_map: &SourceMap,
    filename: Option<&str>,
    colors: &Colors,
) -> String {
    format!(
        "{}\n{}\n{}\n\n{}\n",
        format_header(diagnostic, colors),
        format_location(filename, &diagnostic.span, source_map, colors),
        format_snippet(source_map, &diagnostic.span, colors),
        diagnostic.message
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::codes;

    #[test]
    fn distance_basics() {
        assert_eq!(levenshtein_distance("count", "count"), 0);
        assert_eq!(levenshtein_distance("count", "cont"), 1);
        assert_eq!(levenshtein_distance("count", "counts"), 1);
        assert_eq!(levenshtein_distance("", "abc"), 3);
    }

    #[test]
    fn suggestions_are_ranked_and_capped() {
        let names = ["total", "totals", "tonal", "count", "toast"];
        let got = find_similar("totl", names, 2);
        assert_eq!(got.first().map(|s| s.as_str()), Some("total"));
        assert!(got.len() <= 3);
    }

    #[test]
    fn suggestions_exclude_the_name_itself() {
        let got = find_similar("count", ["count", "counter"], 2);
        assert!(!got.contains(&"count".to_string()));
    }

    #[test]
    fn rendering_is_plain_without_colors() {
        let source = "let x = 1;\nlet y = misspeled;\n";
        let map = SourceMap::new(source);
        let d = Diagnostic::new(
            Severity::RecoverableError,
            codes::UNBOUND_VARIABLE,
            "`misspeled` is not defined",
            Span::new(19, 28),
        );
        let rendered = render_diagnostic(&d, &map, Some("input.js"), &Colors::default());
        assert!(rendered.contains("PE1001"));
        assert!(rendered.contains("input.js:2:"));
        assert!(rendered.contains("misspeled"));
        assert!(rendered.contains('^'));
        assert!(!rendered.contains("\x1b["));
    }
}
