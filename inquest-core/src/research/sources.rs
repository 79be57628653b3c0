//! Citation records and `[n]` marker handling.
//!
//! Summaries cite their own search results with local markers `[1]..[k]`.
//! `CitationRegistry` assigns every distinct URL a stable global number across
//! the whole run; the composer later renumbers whatever the report references.

use crate::search::RawResult;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

/// A marker group `[n]`, `[n, m]` or `[n-m]`; the optional `(` flags markdown
/// links. Numbers have at most three digits, so bracketed years stay text.
static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d{1,3}(?:\s*[,\-–]\s*\d{1,3})*)\](\()?").expect("marker pattern is valid")
});

/// Widest `[a-b]` range read as a citation group.
const MAX_RANGE: usize = 50;

/// A source record bound to one marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub marker: String,
    pub url: String,
    pub title: String,
    pub snippet: String,
}

impl Citation {
    pub fn from_result(number: usize, result: &RawResult) -> Self {
        Self {
            marker: marker(number),
            url: result.url.clone(),
            title: result.title.clone(),
            snippet: result.content_snippet.clone(),
        }
    }

    pub fn renumbered(&self, number: usize) -> Self {
        Self {
            marker: marker(number),
            ..self.clone()
        }
    }
}

pub fn marker(number: usize) -> String {
    format!("[{number}]")
}

/// The numbers a marker group names, in order. `None` if it is not a citation.
fn parse_group(group: &str) -> Option<Vec<usize>> {
    let mut numbers = Vec::new();
    for part in group.split(',') {
        match part.split_once(['-', '–']) {
            Some((start, end)) => {
                let start: usize = start.trim().parse().ok()?;
                let end: usize = end.trim().parse().ok()?;
                if start > end || end - start > MAX_RANGE {
                    return None;
                }
                numbers.extend(start..=end);
            }
            None => numbers.push(part.trim().parse().ok()?),
        }
    }
    Some(numbers)
}

/// Every citation number in `text`, in order of appearance (repeats included).
/// Lists and ranges contribute each number they name.
pub fn find_markers(text: &str) -> Vec<usize> {
    MARKER_RE
        .captures_iter(text)
        .filter(|caps| caps.get(2).is_none())
        .filter_map(|caps| parse_group(&caps[1]))
        .flatten()
        .collect()
}

/// Rewrite each marker `[n]` as `[f(n)]`, or drop it when `f` returns `None`.
///
/// A list or range is split into one marker per mapped number, so `[1-3]`
/// may become `[4][5][6]`. Markdown links (`[text](url)`) are left untouched.
/// A space left dangling before a dropped marker is removed with it.
pub fn rewrite_markers<F>(text: &str, mut f: F) -> String
where
    F: FnMut(usize) -> Option<usize>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in MARKER_RE.captures_iter(text) {
        let (Some(whole), None) = (caps.get(0), caps.get(2)) else {
            continue;
        };
        let Some(numbers) = parse_group(&caps[1]) else {
            continue;
        };
        out.push_str(&text[last..whole.start()]);
        let mut mapped: Vec<usize> = Vec::with_capacity(numbers.len());
        for new in numbers.into_iter().filter_map(&mut f) {
            if !mapped.contains(&new) {
                mapped.push(new);
            }
        }
        if mapped.is_empty() && out.ends_with(' ') {
            out.pop();
        }
        for new in mapped {
            out.push_str(&marker(new));
        }
        last = whole.end();
    }
    out.push_str(&text[last..]);
    out
}

/// The run-wide set of sources, keyed by URL.
///
/// Numbers are assigned in first-seen order and never change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CitationRegistry {
    entries: Vec<Citation>,
    by_url: HashMap<String, usize>,
}

impl CitationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a citation by URL and return its global number.
    pub fn register(&mut self, citation: &Citation) -> usize {
        if let Some(&n) = self.by_url.get(&citation.url) {
            return n;
        }
        let n = self.entries.len() + 1;
        self.entries.push(citation.renumbered(n));
        self.by_url.insert(citation.url.clone(), n);
        n
    }

    /// Register every citation of one summary.
    pub fn merge(&mut self, citations: &[Citation]) {
        for citation in citations {
            self.register(citation);
        }
    }

    /// Global number for a URL, if registered.
    pub fn number_for(&self, url: &str) -> Option<usize> {
        self.by_url.get(url).copied()
    }

    pub fn get(&self, number: usize) -> Option<&Citation> {
        number.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    pub fn entries(&self) -> &[Citation] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
