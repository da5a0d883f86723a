//! Placeholder Substitution - run-level token splicing
//!
//! Tokens are `{{name}}` with `name` made of word characters. Tokens named
//! `table_<identity>` mark dynamic-table slots and are never substituted as
//! text. A token may be split across several runs; the replacement lands in
//! the run where the token starts and every other character keeps the run,
//! and so the formatting, it had.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::fragment::{Document, Paragraph, Run};

pub const TABLE_PREFIX: &str = "table_";

fn token_pattern() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").expect("token pattern is valid"))
}

/// Token text for a placeholder name.
pub fn token(name: &str) -> String {
    format!("{{{{{}}}}}", name)
}

/// Token text for a dynamic-table slot.
pub fn table_token(identity: &str) -> String {
    token(&format!("{}{}", TABLE_PREFIX, identity))
}

pub fn is_table_slot(name: &str) -> bool {
    name.starts_with(TABLE_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMatch {
    pub start: usize,
    pub end: usize,
    pub name: String,
}

/// Every token in `text`, left to right, as byte ranges.
pub fn find_tokens(text: &str) -> Vec<TokenMatch> {
    token_pattern()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(TokenMatch {
                start: whole.start(),
                end: whole.end(),
                name: caps.get(1)?.as_str().to_string(),
            })
        })
        .collect()
}

/// Placeholder name to display value.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct PlaceholderMap {
    values: BTreeMap<String, String>,
}

impl PlaceholderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Outcome of substituting one fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitution {
    pub replaced: usize,
    /// Scalar token names with no value, left verbatim
    pub unresolved: BTreeSet<String>,
}

/// Replace scalar tokens in every body and table-cell paragraph.
pub fn substitute_text(document: &mut Document, placeholders: &PlaceholderMap) -> Substitution {
    let mut outcome = Substitution::default();
    document.for_each_paragraph_mut(&mut |paragraph| {
        let replaced = splice_paragraph(paragraph, |name| {
            let value = placeholders.get(name);
            if value.is_none() {
                outcome.unresolved.insert(name.to_string());
            }
            value.map(str::to_string)
        });
        outcome.replaced += replaced;
    });
    outcome
}

/// Rewrite every scalar token whose replacement `resolve` supplies.
/// Table slots are skipped. Returns the number of tokens replaced.
pub fn splice_paragraph(paragraph: &mut Paragraph, mut resolve: impl FnMut(&str) -> Option<String>) -> usize {
    let text = paragraph.text();
    if !text.contains("{{") {
        return 0;
    }

    let mut replaced = 0;
    // Right to left keeps earlier byte offsets valid.
    for m in find_tokens(&text).into_iter().rev() {
        if is_table_slot(&m.name) {
            continue;
        }
        if let Some(value) = resolve(&m.name) {
            replace_range(&mut paragraph.runs, m.start, m.end, &value);
            replaced += 1;
        }
    }
    replaced
}

/// Move each scalar token that spans several runs into the run where it
/// starts, so every token lies inside a single run.
pub fn coalesce_tokens(paragraph: &mut Paragraph) {
    splice_paragraph(paragraph, |name| Some(token(name)));
}

/// Replace paragraph text bytes `start..end` with `value`.
fn replace_range(runs: &mut Vec<Run>, start: usize, end: usize, value: &str) {
    let mut first = None;
    let mut last = None;
    let mut offset = 0;
    for (i, run) in runs.iter().enumerate() {
        let run_end = offset + run.text.len();
        if first.is_none() && start >= offset && start < run_end {
            first = Some((i, start - offset));
        }
        if end > offset && end <= run_end {
            last = Some((i, end - offset));
        }
        offset = run_end;
    }
    let (Some((fi, fs)), Some((li, le))) = (first, last) else { return };

    if fi == li {
        runs[fi].text.replace_range(fs..le, value);
        return;
    }

    let tail = runs[li].text[le..].to_string();
    runs[fi].text.truncate(fs);
    runs[fi].text.push_str(value);
    runs[li].text = tail;
    if runs[li].text.is_empty() {
        runs.remove(li);
    }
    // Runs in between lose their text; embedded content stays in place.
    let kept: Vec<Run> = runs.drain(fi + 1..li).filter(Run::is_embedded).collect();
    runs.splice(fi + 1..fi + 1, kept);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{Block, Embedded, RunFormat, Table, TableCell, TableRow};

    fn map(pairs: &[(&str, &str)]) -> PlaceholderMap {
        let mut m = PlaceholderMap::new();
        for (k, v) in pairs {
            m.insert(*k, *v);
        }
        m
    }

    #[test]
    fn test_token_grammar() {
        let found = find_tokens("a {{x}} {{ y }} {{table_z}} {{项目}}");
        let names: Vec<_> = found.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["x", "table_z", "项目"]);
        assert_eq!(token("x"), "{{x}}");
        assert_eq!(table_token("bidders"), "{{table_bidders}}");
    }

    #[test]
    fn test_single_run_substitution() {
        let mut p = Paragraph::new("Project {{name}} ({{code}})");
        let n = splice_paragraph(&mut p, |n| map(&[("name", "Bridge"), ("code", "B-1")]).get(n).map(str::to_string));
        assert_eq!(n, 2);
        assert_eq!(p.text(), "Project Bridge (B-1)");
    }

    #[test]
    fn test_split_token_preserves_surrounding_formats() {
        let mut p = Paragraph::from_runs(vec![
            Run::formatted("Dear {{na", RunFormat::bold()),
            Run::formatted("me}}, welcome", RunFormat::italic()),
        ]);
        let mut doc = Document::new();
        doc.push_paragraph(p.clone());
        substitute_text(&mut doc, &map(&[("name", "Alice")]));
        let Block::Paragraph(out) = &doc.blocks[0] else { panic!("expected paragraph") };

        assert_eq!(out.runs.len(), 2);
        assert_eq!(out.runs[0].text, "Dear Alice");
        assert_eq!(out.runs[0].format, RunFormat::bold());
        assert_eq!(out.runs[1].text, ", welcome");
        assert_eq!(out.runs[1].format, RunFormat::italic());

        p.runs[1].text = "me}}".into();
        splice_paragraph(&mut p, |_| Some("Bob".into()));
        assert_eq!(p.runs.len(), 1);
        assert_eq!(p.text(), "Dear Bob");
    }

    #[test]
    fn test_token_spanning_three_runs() {
        let mut p = Paragraph::from_runs(vec![
            Run::new("x{{"),
            Run::formatted("na", RunFormat::bold()),
            Run::formatted("me}}y", RunFormat::italic()),
            Run::new("!"),
        ]);
        splice_paragraph(&mut p, |_| Some("V".into()));
        let texts: Vec<_> = p.runs.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, ["xV", "y", "!"]);
        assert_eq!(p.runs[1].format, RunFormat::italic());
    }

    #[test]
    fn test_embedded_run_inside_split_token_survives() {
        let bookmark = Run {
            embedded: Some(Embedded::Standalone(r#"<w:bookmarkStart w:id="0" w:name="owner"/>"#.into())),
            ..Run::default()
        };
        let mut p = Paragraph::from_runs(vec![
            Run::formatted("Owner {{ow", RunFormat::bold()),
            bookmark.clone(),
            Run::new("n"),
            Run::formatted("er}}.", RunFormat::italic()),
        ]);
        splice_paragraph(&mut p, |_| Some("City".into()));
        assert_eq!(p.text(), "Owner City.");
        assert_eq!(p.runs.len(), 3);
        assert_eq!(p.runs[0].text, "Owner City");
        assert_eq!(p.runs[1], bookmark);
        assert_eq!(p.runs[2], Run::formatted(".", RunFormat::italic()));
    }

    #[test]
    fn test_untouched_runs_keep_format() {
        let mut p = Paragraph::from_runs(vec![
            Run::formatted("Heading ", RunFormat::bold()),
            Run::new("{{name}}"),
            Run::formatted(" tail", RunFormat::italic()),
        ]);
        splice_paragraph(&mut p, |_| Some("Z".into()));
        assert_eq!(p.runs[0], Run::formatted("Heading ", RunFormat::bold()));
        assert_eq!(p.runs[1].text, "Z");
        assert_eq!(p.runs[2], Run::formatted(" tail", RunFormat::italic()));
    }

    #[test]
    fn test_unresolved_and_table_tokens_stay_verbatim() {
        let mut doc = Document::new();
        doc.push_paragraph(Paragraph::new("{{known}} {{unknown}} {{table_rows}}"));
        let outcome = substitute_text(&mut doc, &map(&[("known", "K"), ("table_rows", "nope")]));
        assert_eq!(doc.text(), "K {{unknown}} {{table_rows}}");
        assert_eq!(outcome.replaced, 1);
        assert!(outcome.unresolved.contains("unknown"));
        assert!(!outcome.unresolved.contains("table_rows"));
    }

    #[test]
    fn test_table_cells_are_substituted() {
        let mut doc = Document::new();
        doc.blocks.push(Block::Table(Table {
            rows: vec![TableRow { raw_properties: None, cells: vec![TableCell::text("Owner: {{owner}}")] }],
            ..Table::default()
        }));
        substitute_text(&mut doc, &map(&[("owner", "City")]));
        assert_eq!(doc.text(), "Owner: City");
    }

    #[test]
    fn test_value_containing_braces_is_not_rescanned() {
        let mut p = Paragraph::new("{{a}}{{b}}");
        splice_paragraph(&mut p, |n| Some(if n == "b" { "{{a}}".into() } else { "A".into() }));
        assert_eq!(p.text(), "A{{a}}");
    }

    #[test]
    fn test_coalesce_moves_token_into_first_run() {
        let mut p = Paragraph::from_runs(vec![
            Run::formatted("see {{ti", RunFormat::bold()),
            Run::new("tle}} now"),
        ]);
        coalesce_tokens(&mut p);
        assert_eq!(p.runs[0].text, "see {{title}}");
        assert_eq!(p.runs[1].text, " now");
    }
}
