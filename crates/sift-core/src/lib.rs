//! Core record model shared by sheet reconciliation and search curation.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "sift-core";

/// One cell of a tabular source, as handed over by the tabular collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
    #[default]
    Empty,
}

impl CellValue {
    /// Textual form used for comparison. `None` for empty cells and NaN.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Text(text) if !text.is_empty() => Some(text.clone()),
            CellValue::Text(_) | CellValue::Empty => None,
            CellValue::Number(n) if n.is_nan() => None,
            CellValue::Number(n) => Some(format_number(*n)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_text().is_none()
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_text().as_deref().unwrap_or_default())
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordField {
    pub column: String,
    pub value: CellValue,
}

/// One row of a tabular source. Field order follows the source's column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RawRecord {
    fields: Vec<RecordField>,
}

impl RawRecord {
    pub fn new(fields: Vec<RecordField>) -> Self {
        Self { fields }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<CellValue>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(column, value)| RecordField {
                    column: column.into(),
                    value: value.into(),
                })
                .collect(),
        }
    }

    pub fn fields(&self) -> &[RecordField] {
        &self.fields
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.column.as_str())
    }

    /// First field named `column`.
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.fields
            .iter()
            .find(|f| f.column == column)
            .map(|f| &f.value)
    }

    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column).and_then(CellValue::as_text)
    }
}

/// Already-parsed tabular source: ordered column names plus rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Table {
    pub source_id: String,
    pub columns: Vec<String>,
    pub rows: Vec<RawRecord>,
}

impl Table {
    pub fn new(source_id: impl Into<String>, columns: Vec<String>, rows: Vec<RawRecord>) -> Self {
        Self {
            source_id: source_id.into(),
            columns,
            rows,
        }
    }
}

/// Comparison key produced by the canonicalizer. An empty key never matches anything.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A competitor row whose key has no counterpart on the other side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingRecord {
    pub key: CanonicalKey,
    pub record: RawRecord,
}

/// Recency window a search call was restricted to.
///
/// Declaration order is the ranking order: last-day sorts before last-week
/// before last-month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecencyWindow {
    LastDay,
    LastWeek,
    LastMonth,
}

impl RecencyWindow {
    pub const ALL: [RecencyWindow; 3] = [
        RecencyWindow::LastDay,
        RecencyWindow::LastWeek,
        RecencyWindow::LastMonth,
    ];

    pub fn label(self) -> &'static str {
        match self {
            RecencyWindow::LastDay => "last-day",
            RecencyWindow::LastWeek => "last-week",
            RecencyWindow::LastMonth => "last-month",
        }
    }

    /// Time-based search restriction understood by the search backend.
    pub fn search_token(self) -> &'static str {
        match self {
            RecencyWindow::LastDay => "qdr:d",
            RecencyWindow::LastWeek => "qdr:w",
            RecencyWindow::LastMonth => "qdr:m",
        }
    }

    pub fn short_tag(self) -> &'static str {
        match self {
            RecencyWindow::LastDay => "1d",
            RecencyWindow::LastWeek => "7d",
            RecencyWindow::LastMonth => "1m",
        }
    }
}

impl fmt::Display for RecencyWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RecencyWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        RecencyWindow::ALL
            .into_iter()
            .find(|w| {
                wanted.eq_ignore_ascii_case(w.label())
                    || wanted == w.search_token()
                    || wanted == w.short_tag()
            })
            .ok_or_else(|| format!("unknown recency window `{wanted}`"))
    }
}

/// A search-result item tagged with the window it was first observed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub recency_tag: RecencyWindow,
    /// Cleaned query text of the call that produced this item.
    #[serde(default)]
    pub query: String,
}

/// Final ordered candidates. `url` is unique within the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "Vec<Candidate>", into = "Vec<Candidate>")]
pub struct CuratedList {
    entries: Vec<Candidate>,
}

impl CuratedList {
    /// Freezes an already ranked sequence. A repeated url keeps its first position.
    pub fn from_ranked(entries: Vec<Candidate>) -> Self {
        let mut seen = HashSet::with_capacity(entries.len());
        let entries = entries
            .into_iter()
            .filter(|c| seen.insert(c.url.clone()))
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[Candidate] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, url: &str) -> Option<&Candidate> {
        self.entries.iter().find(|c| c.url == url)
    }

    pub fn into_entries(self) -> Vec<Candidate> {
        self.entries
    }
}

impl From<Vec<Candidate>> for CuratedList {
    fn from(entries: Vec<Candidate>) -> Self {
        Self::from_ranked(entries)
    }
}

impl From<CuratedList> for Vec<Candidate> {
    fn from(list: CuratedList) -> Self {
        list.entries
    }
}

impl<'a> IntoIterator for &'a CuratedList {
    type Item = &'a Candidate;
    type IntoIter = std::slice::Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
