//! Note parser (C2): preamble, title/kind/alias extraction, wiki-reference
//! scanning, exclusion zones, heading/paragraph spans.
//!
//! Scanning is regex-based and byte-oriented, one pass per exclusion-zone
//! category, spans merged with a sort + linear sweep — there is no teacher
//! module for this; built directly from first principles over `regex`.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{ParseError, ParseResult};
use crate::models::NodeKind;

/// One `[[target]]` / `[[target|display]]` occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct WikiReference {
    pub raw: String,
    pub target: String,
    pub display: String,
    pub is_identity: bool,
    pub span: (usize, usize),
}

/// Category of a region references must not be scanned within.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionKind {
    Preamble,
    FencedCode,
    InlineCode,
    Url,
    MarkdownLink,
    ExistingLink,
    Html,
    DisplayMath,
    InlineMath,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExclusionZone {
    pub kind: ExclusionKind,
    pub span: (usize, usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Fields recognized in the YAML preamble (§6.1); everything else lands in `metadata`.
#[derive(Debug, Clone, Default)]
pub struct PreambleFields {
    pub id: Option<String>,
    pub title: Option<String>,
    pub kind: Option<NodeKind>,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedNote {
    pub preamble: Option<PreambleFields>,
    pub title: String,
    pub kind: NodeKind,
    pub aliases: Vec<String>,
    pub body: String,
    pub body_offset: usize,
    pub references: Vec<WikiReference>,
    pub exclusion_zones: Vec<ExclusionZone>,
    pub headings: Vec<Span>,
    pub paragraphs: Vec<Span>,
    pub metadata: HashMap<String, serde_json::Value>,
}

fn wiki_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\[\]]+)\]\]").unwrap())
}

fn fenced_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)(```.*?```|~~~.*?~~~)").unwrap())
}

fn inline_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`[^`\n]+`").unwrap())
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:https?|ftp)://[^\s\]\)>]+").unwrap())
}

fn markdown_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!?\[[^\[\]]*\]\([^\)]*\)").unwrap())
}

fn html_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)(<!--.*?-->|</?[a-zA-Z][a-zA-Z0-9]*(?:\s[^<>]*)?>)").unwrap())
}

fn display_math_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\$\$.*?\$\$").unwrap())
}

fn inline_math_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$[^\$\n]+\$").unwrap())
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^#{1,6} .*$").unwrap())
}

/// Collapse runs of whitespace to single spaces and trim (§4.2).
pub fn collapse_whitespace(s: &str) -> String {
    s.trim().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn title_from_filename(path: &str) -> String {
    let stem = path.rsplit('/').next().unwrap_or(path);
    let stem = stem.strip_suffix(".md").unwrap_or(stem);
    stem.to_string()
}

/// Split a YAML preamble off the front of `input`, if present.
/// Returns the parsed fields, passthrough metadata, and the byte offset where the body begins.
fn split_preamble(input: &str) -> ParseResult<(Option<PreambleFields>, HashMap<String, serde_json::Value>, usize)> {
    if !input.starts_with("---\n") && !input.starts_with("---\r\n") {
        return Ok((None, HashMap::new(), 0));
    }

    let after_open = if input.starts_with("---\r\n") { 5 } else { 4 };
    let rest = &input[after_open..];

    let close_pos = rest
        .match_indices("\n---")
        .find(|(idx, _)| {
            let after = &rest[idx + 4..];
            after.starts_with('\n') || after.starts_with("\r\n") || after.is_empty()
        })
        .map(|(idx, _)| idx);

    let Some(close_idx) = close_pos else {
        return Ok((None, HashMap::new(), 0));
    };

    let yaml_block = &rest[..close_idx];
    let after_close = &rest[close_idx..];
    let skip = if after_close.starts_with("\r\n---\r\n") {
        7
    } else if after_close.starts_with("\n---\n") || after_close.starts_with("\n---\r\n") {
        if after_close.starts_with("\n---\r\n") { 6 } else { 5 }
    } else {
        // end of file right after the closing fence
        after_close.len()
    };
    let body_offset = after_open + close_idx + skip;

    let value: serde_yaml::Value = serde_yaml::from_str(yaml_block)
        .map_err(|e| ParseError::MalformedPreamble { path: String::new(), reason: e.to_string() })?;

    let mapping = value.as_mapping().cloned().unwrap_or_default();

    let mut fields = PreambleFields::default();
    let mut metadata = HashMap::new();

    for (k, v) in mapping.iter() {
        let key = k.as_str().unwrap_or_default();
        match key {
            "id" => fields.id = v.as_str().map(str::to_string),
            "title" => fields.title = v.as_str().map(str::to_string),
            "type" => {
                if let Some(s) = v.as_str() {
                    fields.kind = s.parse().ok();
                }
            }
            "aliases" => {
                fields.aliases = v
                    .as_sequence()
                    .map(|seq| seq.iter().filter_map(|e| e.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
            }
            _ => {
                if let Ok(json_value) = serde_json::to_value(v) {
                    metadata.insert(key.to_string(), json_value);
                }
            }
        }
    }

    Ok((Some(fields), metadata, body_offset))
}

fn scan_wiki_references(full_text: &str, start_at: usize) -> Vec<WikiReference> {
    wiki_ref_re()
        .find_iter(&full_text[start_at..])
        .map(|m| {
            let inner = &m.as_str()[2..m.as_str().len() - 2];
            let (target_raw, display_raw) = match inner.split_once('|') {
                Some((t, d)) => (t, d),
                None => (inner, inner),
            };
            let is_identity = target_raw.starts_with("id:");
            let target = collapse_whitespace(target_raw.strip_prefix("id:").unwrap_or(target_raw));
            let display = collapse_whitespace(display_raw);
            WikiReference {
                raw: m.as_str().to_string(),
                target,
                display,
                is_identity,
                span: (start_at + m.start(), start_at + m.end()),
            }
        })
        .collect()
}

fn collect_zones(full_text: &str, preamble_end: usize, references: &[WikiReference]) -> Vec<ExclusionZone> {
    let mut zones = Vec::new();
    if preamble_end > 0 {
        zones.push(ExclusionZone { kind: ExclusionKind::Preamble, span: (0, preamble_end) });
    }
    for m in fenced_code_re().find_iter(full_text) {
        zones.push(ExclusionZone { kind: ExclusionKind::FencedCode, span: (m.start(), m.end()) });
    }
    for m in inline_code_re().find_iter(full_text) {
        zones.push(ExclusionZone { kind: ExclusionKind::InlineCode, span: (m.start(), m.end()) });
    }
    for m in url_re().find_iter(full_text) {
        zones.push(ExclusionZone { kind: ExclusionKind::Url, span: (m.start(), m.end()) });
    }
    for m in markdown_link_re().find_iter(full_text) {
        zones.push(ExclusionZone { kind: ExclusionKind::MarkdownLink, span: (m.start(), m.end()) });
    }
    for r in references {
        zones.push(ExclusionZone { kind: ExclusionKind::ExistingLink, span: r.span });
    }
    for m in html_re().find_iter(full_text) {
        zones.push(ExclusionZone { kind: ExclusionKind::Html, span: (m.start(), m.end()) });
    }
    for m in display_math_re().find_iter(full_text) {
        zones.push(ExclusionZone { kind: ExclusionKind::DisplayMath, span: (m.start(), m.end()) });
    }
    for m in inline_math_re().find_iter(full_text) {
        zones.push(ExclusionZone { kind: ExclusionKind::InlineMath, span: (m.start(), m.end()) });
    }
    zones
}

/// Sort and merge overlapping zones; the earliest-sorted zone's kind wins the merge.
pub fn merge_zones(mut zones: Vec<ExclusionZone>) -> Vec<ExclusionZone> {
    zones.sort_by_key(|z| z.span.0);
    let mut merged: Vec<ExclusionZone> = Vec::with_capacity(zones.len());
    for zone in zones {
        if let Some(last) = merged.last_mut() {
            if zone.span.0 <= last.span.1 {
                last.span.1 = last.span.1.max(zone.span.1);
                continue;
            }
        }
        merged.push(zone);
    }
    merged
}

fn overlaps(a: (usize, usize), b: (usize, usize)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

fn admit_references(references: Vec<WikiReference>, merged_zones: &[ExclusionZone]) -> Vec<WikiReference> {
    let blocking: Vec<(usize, usize)> =
        merged_zones.iter().filter(|z| z.kind != ExclusionKind::ExistingLink).map(|z| z.span).collect();
    references.into_iter().filter(|r| !blocking.iter().any(|b| overlaps(r.span, *b))).collect()
}

fn scan_headings(full_text: &str, body_offset: usize) -> Vec<Span> {
    heading_re()
        .find_iter(&full_text[body_offset..])
        .map(|m| Span { start: body_offset + m.start(), end: body_offset + m.end() })
        .collect()
}

fn scan_paragraphs(full_text: &str, body_offset: usize, merged_zones: &[ExclusionZone]) -> Vec<Span> {
    let body = &full_text[body_offset..];
    let mut spans = Vec::new();
    let mut current_start: Option<usize> = None;
    let mut pos = body_offset;

    for line in body.split_inclusive('\n') {
        let line_trimmed = line.trim_end_matches(['\n', '\r']);
        let line_start = pos;
        let line_end = pos + line_trimmed.len();
        let in_zone = merged_zones.iter().any(|z| overlaps((line_start, line_end.max(line_start + 1)), z.span));

        if !line_trimmed.trim().is_empty() && !in_zone {
            if current_start.is_none() {
                current_start = Some(line_start);
            }
        } else if let Some(start) = current_start.take() {
            spans.push(Span { start, end: line_end });
        }
        pos += line.len();
    }
    if let Some(start) = current_start {
        spans.push(Span { start, end: pos });
    }
    spans
}

pub fn parse_note(path: &str, bytes: &[u8]) -> ParseResult<ParsedNote> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ParseError::MalformedPreamble { path: path.to_string(), reason: format!("not valid utf-8: {e}") })?;

    let (preamble, mut metadata, body_offset) = split_preamble(text).map_err(|e| match e {
        ParseError::MalformedPreamble { reason, .. } => ParseError::MalformedPreamble { path: path.to_string(), reason },
        other => other,
    })?;

    let body = &text[body_offset..];

    let references_all = scan_wiki_references(text, body_offset);
    let zones_raw = collect_zones(text, body_offset, &references_all);
    let merged_zones = merge_zones(zones_raw);
    let references = admit_references(references_all, &merged_zones);

    let headings = scan_headings(text, body_offset);
    let paragraphs = scan_paragraphs(text, body_offset, &merged_zones);

    let title = preamble
        .as_ref()
        .and_then(|p| p.title.clone())
        .or_else(|| {
            heading_re().find(body).map(|m| {
                let h = m.as_str().trim_start_matches('#').trim();
                h.to_string()
            })
        })
        .unwrap_or_else(|| title_from_filename(path));

    let kind = preamble.as_ref().and_then(|p| p.kind).unwrap_or_default();
    let aliases = preamble.as_ref().map(|p| p.aliases.clone()).unwrap_or_default();

    if let Some(p) = &preamble {
        if let Some(id) = &p.id {
            metadata.insert("id".to_string(), serde_json::Value::String(id.clone()));
        }
    }

    Ok(ParsedNote {
        preamble,
        title,
        kind,
        aliases,
        body: body.to_string(),
        body_offset,
        references,
        exclusion_zones: merged_zones,
        headings,
        paragraphs,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_prefers_preamble_then_heading_then_filename() {
        let note = parse_note("notes/alpha.md", b"no preamble, no heading, just text").unwrap();
        assert_eq!(note.title, "alpha");

        let note = parse_note("notes/alpha.md", b"# Heading Title\nbody text").unwrap();
        assert_eq!(note.title, "Heading Title");

        let note = parse_note("notes/alpha.md", b"---\ntitle: Preamble Title\n---\n# Heading Title\nbody").unwrap();
        assert_eq!(note.title, "Preamble Title");
    }

    #[test]
    fn preamble_aliases_and_type_parse() {
        let input = b"---\ntitle: Bob\ntype: character\naliases:\n  - Bobby\n  - Robert\n---\nbody";
        let note = parse_note("notes/bob.md", input).unwrap();
        assert_eq!(note.kind, NodeKind::Character);
        assert_eq!(note.aliases, vec!["Bobby".to_string(), "Robert".to_string()]);
        assert_eq!(note.body.trim(), "body");
    }

    #[test]
    fn unknown_preamble_keys_land_in_metadata() {
        let input = b"---\ntitle: X\ncustom_field: 42\n---\nbody";
        let note = parse_note("notes/x.md", input).unwrap();
        assert_eq!(note.metadata.get("custom_field").and_then(|v| v.as_i64()), Some(42));
    }

    #[test]
    fn malformed_preamble_is_a_hard_error() {
        let input = b"---\ntitle: [unterminated\n---\nbody";
        let result = parse_note("notes/bad.md", input);
        assert!(result.is_err());
    }

    #[test]
    fn wiki_reference_with_display_and_identity_prefix() {
        let note = parse_note("n.md", b"See [[Other Note|display text]] and [[id:abc-123]].").unwrap();
        assert_eq!(note.references.len(), 2);
        assert_eq!(note.references[0].target, "Other Note");
        assert_eq!(note.references[0].display, "display text");
        assert!(!note.references[0].is_identity);
        assert_eq!(note.references[1].target, "abc-123");
        assert!(note.references[1].is_identity);
    }

    #[test]
    fn reference_inside_fenced_code_block_is_not_admitted() {
        let note = parse_note("n.md", b"text\n```\n[[Ignored]]\n```\nmore [[Kept]]").unwrap();
        assert_eq!(note.references.len(), 1);
        assert_eq!(note.references[0].target, "Kept");
    }

    #[test]
    fn reference_inside_inline_code_is_not_admitted() {
        let note = parse_note("n.md", b"see `[[Ignored]]` but [[Kept]]").unwrap();
        assert_eq!(note.references.len(), 1);
        assert_eq!(note.references[0].target, "Kept");
    }

    #[test]
    fn self_link_is_admitted() {
        let note = parse_note("a.md", b"[[A]]").unwrap();
        assert_eq!(note.references.len(), 1);
        assert_eq!(note.references[0].target, "A");
    }

    #[test]
    fn merge_zones_is_idempotent() {
        let zones = vec![
            ExclusionZone { kind: ExclusionKind::FencedCode, span: (0, 10) },
            ExclusionZone { kind: ExclusionKind::InlineCode, span: (5, 15) },
            ExclusionZone { kind: ExclusionKind::Url, span: (20, 30) },
        ];
        let once = merge_zones(zones);
        let twice = merge_zones(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
        assert_eq!(once[0].span, (0, 15));
        assert_eq!(once[0].kind, ExclusionKind::FencedCode);
    }

    #[test]
    fn heading_and_paragraph_spans_are_detected() {
        let text = b"# Title\n\nFirst paragraph line one.\nFirst paragraph line two.\n\nSecond paragraph.";
        let note = parse_note("n.md", text).unwrap();
        assert_eq!(note.headings.len(), 1);
        assert_eq!(note.paragraphs.len(), 2);
    }

    #[test]
    fn collapse_whitespace_trims_and_joins() {
        assert_eq!(collapse_whitespace("  foo   bar\tbaz  "), "foo bar baz");
    }
}
