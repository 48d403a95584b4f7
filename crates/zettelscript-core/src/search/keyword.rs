//! Query sanitization for the FTS5 side-car (§4.1, §4.6).

/// Strip FTS5 query-syntax metacharacters and OR-join the remaining terms,
/// so a free-text query can never be misread as FTS5 query syntax.
pub fn sanitize_fts5_query(raw: &str) -> String {
    const SPECIAL: &[char] = &['"', '*', '^', ':', '(', ')', '-', '+'];
    raw.split_whitespace()
        .map(|term| term.chars().filter(|c| !SPECIAL.contains(c)).collect::<String>())
        .filter(|term| !term.is_empty())
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_terms_with_or() {
        assert_eq!(sanitize_fts5_query("alpha station"), "alpha OR station");
    }

    #[test]
    fn strips_fts5_metacharacters() {
        assert_eq!(sanitize_fts5_query("\"alpha\" AND*station"), "alpha OR ANDstation");
    }

    #[test]
    fn empty_query_sanitizes_to_empty_string() {
        assert_eq!(sanitize_fts5_query("   "), "");
    }

    #[test]
    fn strips_leading_dash_without_dropping_the_term() {
        assert_eq!(sanitize_fts5_query("-alpha"), "alpha");
    }
}
