//! Collaborator contracts for tabular sources and search backends, plus the
//! CSV, HTTP and fixture-backed implementations.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use csv::ReaderBuilder;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sift_core::{CellValue, RawRecord, RecencyWindow, RecordField, Table};
use sift_storage::{FetchError, HttpFetcher};
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "sift-adapters";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("search backend refused the credential for query `{query}` ({window})")]
    Forbidden { query: String, window: RecencyWindow },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("csv decoding failed: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AdapterError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, AdapterError::Forbidden { .. })
    }
}

// Tabular sources

#[async_trait]
pub trait TabularSource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch_table(&self) -> Result<Table, AdapterError>;
}

/// CSV export fetched over HTTP (e.g. a spreadsheet's `export?format=csv` link).
#[derive(Debug, Clone)]
pub struct CsvUrlSource {
    source_id: String,
    url: String,
    http: HttpFetcher,
}

impl CsvUrlSource {
    pub fn new(source_id: impl Into<String>, url: impl Into<String>, http: HttpFetcher) -> Self {
        Self {
            source_id: source_id.into(),
            url: url.into(),
            http,
        }
    }
}

#[async_trait]
impl TabularSource for CsvUrlSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_table(&self) -> Result<Table, AdapterError> {
        let response = self.http.fetch_bytes(&self.url).await?;
        debug!(source_id = %self.source_id, bytes = response.body.len(), "fetched csv export");
        parse_csv_table(&self.source_id, &response.body)
    }
}

#[derive(Debug, Clone)]
pub struct CsvFileSource {
    source_id: String,
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new(source_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            source_id: source_id.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl TabularSource for CsvFileSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_table(&self) -> Result<Table, AdapterError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        parse_csv_table(&self.source_id, &bytes)
    }
}

/// Already-materialized table, handed out as is.
#[derive(Debug, Clone)]
pub struct StaticTableSource {
    table: Table,
}

impl StaticTableSource {
    pub fn new(table: Table) -> Self {
        Self { table }
    }
}

#[async_trait]
impl TabularSource for StaticTableSource {
    fn source_id(&self) -> &str {
        &self.table.source_id
    }

    async fn fetch_table(&self) -> Result<Table, AdapterError> {
        Ok(self.table.clone())
    }
}

/// Picks the HTTP or file implementation from the shape of `location`.
pub fn tabular_source_for(
    source_id: &str,
    location: &str,
    http: &HttpFetcher,
) -> Box<dyn TabularSource> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Box::new(CsvUrlSource::new(source_id, location, http.clone()))
    } else {
        Box::new(CsvFileSource::new(source_id, location))
    }
}

pub fn parse_csv_table(source_id: &str, bytes: &[u8]) -> Result<Table, AdapterError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let columns = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let fields = columns
            .iter()
            .enumerate()
            .map(|(idx, column)| RecordField {
                column: column.clone(),
                value: decode_cell(record.get(idx).unwrap_or_default()),
            })
            .collect();
        rows.push(RawRecord::new(fields));
    }

    Ok(Table::new(source_id, columns, rows))
}

/// Cells keep their source text so exports reproduce the sheet verbatim.
fn decode_cell(raw: &str) -> CellValue {
    if raw.trim().is_empty() {
        CellValue::Empty
    } else {
        CellValue::Text(raw.to_string())
    }
}

// Search backends

/// One organic result item as returned by the search collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SearchHit {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn backend_id(&self) -> &'static str;

    async fn search(
        &self,
        query: &str,
        window: RecencyWindow,
    ) -> Result<Vec<SearchHit>, AdapterError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchLocale {
    pub country: String,
    pub language: String,
}

impl SearchLocale {
    pub fn same(code: &str) -> Self {
        Self {
            country: code.to_string(),
            language: code.to_string(),
        }
    }
}

impl Default for SearchLocale {
    fn default() -> Self {
        Self::same("th")
    }
}

/// Serper-compatible JSON search API.
pub struct SerperSearchBackend {
    http: HttpFetcher,
    endpoint: String,
    api_key: String,
    locale: SearchLocale,
    max_results: u32,
}

impl SerperSearchBackend {
    pub fn new(http: HttpFetcher, endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            locale: SearchLocale::default(),
            max_results: 50,
        }
    }

    pub fn with_locale(mut self, locale: SearchLocale) -> Self {
        self.locale = locale;
        self
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn request_payload(&self, query: &str, window: RecencyWindow) -> JsonValue {
        json!({
            "q": query,
            "tbs": window.search_token(),
            "gl": self.locale.country,
            "hl": self.locale.language,
            "num": self.max_results,
        })
    }
}

#[async_trait]
impl SearchBackend for SerperSearchBackend {
    fn backend_id(&self) -> &'static str {
        "serper"
    }

    async fn search(
        &self,
        query: &str,
        window: RecencyWindow,
    ) -> Result<Vec<SearchHit>, AdapterError> {
        let payload = self.request_payload(query, window);
        let headers = [("X-API-KEY", self.api_key.as_str())];
        let response = self
            .http
            .post_json(&self.endpoint, &headers, &payload)
            .await
            .map_err(|err| {
                if err.is_forbidden() {
                    AdapterError::Forbidden {
                        query: query.to_string(),
                        window,
                    }
                } else {
                    AdapterError::Fetch(err)
                }
            })?;
        Ok(parse_organic_results(&response.body))
    }
}

/// Reads the `organic` array of a search response. Anything malformed counts as no results.
pub fn parse_organic_results(body: &[u8]) -> Vec<SearchHit> {
    let value: JsonValue = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "search response is not valid JSON; treating as empty");
            return Vec::new();
        }
    };
    let Some(items) = value.get("organic").and_then(JsonValue::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<SearchHit>(item.clone()).ok())
        .collect()
}

/// Recorded search responses, keyed by cleaned query text and window.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchFixture {
    pub fixture_id: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub responses: Vec<FixtureResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureResponse {
    pub query: String,
    pub window: RecencyWindow,
    #[serde(default = "default_fixture_status")]
    pub status: u16,
    #[serde(default)]
    pub organic: Vec<SearchHit>,
}

fn default_fixture_status() -> u16 {
    200
}

pub fn load_search_fixture(path: impl AsRef<Path>) -> Result<SearchFixture> {
    read_json_file(path)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Replays a [`SearchFixture`]. Unknown query/window pairs yield no results.
/// Every call is recorded so issue order can be inspected afterwards.
#[derive(Debug, Default)]
pub struct FixtureSearchBackend {
    fixture: SearchFixture,
    calls: Mutex<Vec<(String, RecencyWindow)>>,
}

impl FixtureSearchBackend {
    pub fn new(fixture: SearchFixture) -> Self {
        Self {
            fixture,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load_search_fixture(path)?))
    }

    pub fn calls(&self) -> Vec<(String, RecencyWindow)> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchBackend for FixtureSearchBackend {
    fn backend_id(&self) -> &'static str {
        "fixture"
    }

    async fn search(
        &self,
        query: &str,
        window: RecencyWindow,
    ) -> Result<Vec<SearchHit>, AdapterError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((query.to_string(), window));
        }
        let Some(response) = self
            .fixture
            .responses
            .iter()
            .find(|r| r.query == query && r.window == window)
        else {
            return Ok(Vec::new());
        };
        match response.status {
            200..=299 => Ok(response.organic.clone()),
            403 => Err(AdapterError::Forbidden {
                query: query.to_string(),
                window,
            }),
            status => Err(AdapterError::Fetch(FetchError::HttpStatus {
                status,
                url: format!("fixture://{}", self.fixture.fixture_id),
            })),
        }
    }
}
