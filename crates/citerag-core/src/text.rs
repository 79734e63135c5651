//! Text normalization applied before chunking.

/// Normalizes extracted document text.
///
/// - removes NUL characters,
/// - strips trailing whitespace from every line,
/// - collapses runs of blank lines so at most one remains (3+ newlines
///   become exactly 2),
/// - trims leading and trailing whitespace.
pub fn clean_text(raw: &str) -> String {
    let without_nul = raw.replace('\0', "");

    let mut lines: Vec<&str> = Vec::new();
    for line in without_nul.split('\n') {
        let line = line.trim_end();
        if line.is_empty() && lines.last().is_some_and(|prev| prev.is_empty()) {
            continue;
        }
        lines.push(line);
    }

    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_whitespace_before_newlines() {
        assert_eq!(clean_text("alpha   \nbeta\t\nGamma"), "alpha\nbeta\nGamma");
    }

    #[test]
    fn collapses_blank_line_runs() {
        assert_eq!(clean_text("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(clean_text("a\n \n\t\n\nb"), "a\n\nb");
        assert_eq!(clean_text("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn removes_nul_and_trims() {
        assert_eq!(clean_text("\n\n  he\0llo \0\n\n"), "hello");
    }

    #[test]
    fn keeps_indentation_and_crlf_content() {
        assert_eq!(clean_text("line one\r\n    indented\r\n"), "line one\n    indented");
    }

    #[test]
    fn whitespace_only_becomes_empty() {
        assert_eq!(clean_text(" \n\t\n \0 "), "");
    }
}
