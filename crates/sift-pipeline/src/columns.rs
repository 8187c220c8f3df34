//! Content-column selection for tabular sources.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColumnError {
    #[error("source has no columns")]
    NoColumns,
    #[error("column `{0}` is not present in the source")]
    UnknownColumn(String),
}

/// Picks the column holding the free-text description to compare.
pub trait ColumnResolver: Send + Sync {
    fn resolve_content_column(&self, columns: &[String]) -> Result<String, ColumnError>;
}

/// First column naming a marker (case-sensitive substring) or a token
/// (case-insensitive substring); otherwise the second column, or the only one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerColumnResolver {
    markers: Vec<String>,
    tokens: Vec<String>,
}

impl Default for MarkerColumnResolver {
    fn default() -> Self {
        Self::new(vec!["รายการ".to_string()], vec!["subject".to_string()])
    }
}

impl MarkerColumnResolver {
    pub fn new(markers: Vec<String>, tokens: Vec<String>) -> Self {
        let tokens = tokens.into_iter().map(|t| t.to_lowercase()).collect();
        Self { markers, tokens }
    }

    fn matches(&self, column: &str) -> bool {
        if self.markers.iter().any(|m| column.contains(m.as_str())) {
            return true;
        }
        let lowered = column.to_lowercase();
        self.tokens.iter().any(|t| lowered.contains(t.as_str()))
    }
}

impl ColumnResolver for MarkerColumnResolver {
    fn resolve_content_column(&self, columns: &[String]) -> Result<String, ColumnError> {
        if let Some(found) = columns.iter().find(|c| self.matches(c)) {
            return Ok(found.clone());
        }
        columns
            .get(1)
            .or_else(|| columns.last())
            .cloned()
            .ok_or(ColumnError::NoColumns)
    }
}

/// Always the named column. Used when the caller already knows the layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedColumnResolver {
    column: String,
}

impl FixedColumnResolver {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl ColumnResolver for FixedColumnResolver {
    fn resolve_content_column(&self, columns: &[String]) -> Result<String, ColumnError> {
        if columns.is_empty() {
            return Err(ColumnError::NoColumns);
        }
        if columns.iter().any(|c| c == &self.column) {
            Ok(self.column.clone())
        } else {
            Err(ColumnError::UnknownColumn(self.column.clone()))
        }
    }
}
