//! Text canonicalization: noisy free text to a comparable [`CanonicalKey`].

use serde::{Deserialize, Serialize};
use sift_core::{CanonicalKey, CellValue};

use crate::error::{PipelineError, Result};

pub const SUBSTITUTION_TABLE_VERSION: u32 = 1;

const SCRIPT_RANGE: std::ops::RangeInclusive<char> = '\u{0E00}'..='\u{0E7F}';

/// Characters that survive canonicalization: alphanumerics plus the Thai block.
pub fn is_key_char(c: char) -> bool {
    c.is_alphanumeric() || SCRIPT_RANGE.contains(&c)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionRule {
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
}

impl SubstitutionRule {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }

    pub fn delete(pattern: impl Into<String>) -> Self {
        Self::new(pattern, "")
    }
}

/// Ordered literal replacements applied to lowercased text, first to last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionTable {
    pub version: u32,
    pub rules: Vec<SubstitutionRule>,
}

impl Default for SubstitutionTable {
    fn default() -> Self {
        Self {
            version: SUBSTITUTION_TABLE_VERSION,
            rules: vec![
                // Buddhist-era year to its Gregorian equivalent.
                SubstitutionRule::new("2569", "2026"),
                SubstitutionRule::delete("พ.ศ."),
                SubstitutionRule::delete("ปี"),
                SubstitutionRule::delete("จำนวน"),
                SubstitutionRule::delete("รายการ"),
                SubstitutionRule::delete("ต้น"),
            ],
        }
    }
}

impl SubstitutionTable {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rejects tables that could not keep canonicalization idempotent.
    pub fn validate(&self) -> Result<()> {
        let origin = format!("substitution table v{}", self.version);
        for (idx, rule) in self.rules.iter().enumerate() {
            if rule.pattern.is_empty() {
                return Err(PipelineError::rules(&origin, format!("rule {idx} has an empty pattern")));
            }
            if rule.pattern != rule.pattern.to_lowercase() {
                return Err(PipelineError::rules(
                    &origin,
                    format!("pattern `{}` must be lowercase; input is lowercased first", rule.pattern),
                ));
            }
            if rule.replacement != rule.replacement.to_lowercase()
                || !rule.replacement.chars().all(is_key_char)
            {
                return Err(PipelineError::rules(
                    &origin,
                    format!(
                        "replacement `{}` for `{}` must be lowercase letters or digits",
                        rule.replacement, rule.pattern
                    ),
                ));
            }
            if rule.replacement.chars().count() > rule.pattern.chars().count() {
                return Err(PipelineError::rules(
                    &origin,
                    format!("replacement `{}` is longer than its pattern", rule.replacement),
                ));
            }
            if let Some(other) = self
                .rules
                .iter()
                .find(|other| rule.replacement.contains(other.pattern.as_str()))
            {
                return Err(PipelineError::rules(
                    &origin,
                    format!(
                        "replacement `{}` contains pattern `{}`",
                        rule.replacement, other.pattern
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn apply(&self, text: &str) -> String {
        self.rules.iter().fold(text.to_string(), |acc, rule| {
            if acc.contains(rule.pattern.as_str()) {
                acc.replace(rule.pattern.as_str(), &rule.replacement)
            } else {
                acc
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Canonicalizer {
    table: SubstitutionTable,
}

impl Canonicalizer {
    pub fn new(table: SubstitutionTable) -> Result<Self> {
        table.validate()?;
        Ok(Self { table })
    }

    pub fn table(&self) -> &SubstitutionTable {
        &self.table
    }

    /// Absent input yields the empty key.
    pub fn canonicalize(&self, text: Option<&str>) -> CanonicalKey {
        match text {
            Some(text) if !text.is_empty() => self.canonicalize_str(text),
            _ => CanonicalKey::empty(),
        }
    }

    /// Lowercase, substitute, strip, repeated until the text stops changing.
    ///
    /// A single pass is not enough: stripping can join fragments into a new
    /// pattern occurrence ("2 569" becomes "2569"). Iterating to a fixed point
    /// makes canonicalizing a key return the key itself.
    pub fn canonicalize_str(&self, text: &str) -> CanonicalKey {
        let mut current = text.to_string();
        let max_passes = text.chars().count() + self.table.len() + 2;
        for _ in 0..max_passes {
            let next = self.single_pass(&current);
            if next == current {
                break;
            }
            current = next;
        }
        CanonicalKey::new(current)
    }

    pub fn canonicalize_cell(&self, cell: Option<&CellValue>) -> CanonicalKey {
        let text = cell.and_then(CellValue::as_text);
        self.canonicalize(text.as_deref())
    }

    fn single_pass(&self, text: &str) -> String {
        self.table
            .apply(&text.to_lowercase())
            .chars()
            .filter(|c| is_key_char(*c))
            .collect()
    }
}
