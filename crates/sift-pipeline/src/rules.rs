//! YAML rule data: query templates, filter policy and substitution table.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::canonical::SubstitutionTable;
use crate::error::{PipelineError, Result};
use crate::filter::FilterPolicy;
use crate::query_plan::QueryPlanConfig;

pub const QUERIES_FILE: &str = "queries.yaml";
pub const FILTER_FILE: &str = "filter.yaml";
pub const CANONICAL_FILE: &str = "canonical.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryRules {
    #[serde(default)]
    pub templates: Vec<String>,
    #[serde(default)]
    pub plan: QueryPlanConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterRules {
    #[serde(default)]
    pub version: u32,
    #[serde(flatten)]
    pub policy: FilterPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleSet {
    pub queries: QueryRules,
    pub filter: FilterPolicy,
    pub substitution: SubstitutionTable,
}

impl RuleSet {
    /// Built-in filter and substitution defaults with no query templates.
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Reads the rule files under `dir`. Missing files fall back to the built-ins.
    pub async fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let queries = read_optional::<QueryRules>(&dir.join(QUERIES_FILE))
            .await?
            .unwrap_or_default();
        let filter = read_optional::<FilterRules>(&dir.join(FILTER_FILE))
            .await?
            .map(|rules| rules.policy)
            .unwrap_or_default();
        let substitution = read_optional::<SubstitutionTable>(&dir.join(CANONICAL_FILE))
            .await?
            .unwrap_or_default();
        substitution.validate()?;

        debug!(
            dir = %dir.display(),
            templates = queries.templates.len(),
            substitution_version = substitution.version,
            "loaded rules"
        );
        Ok(Self {
            queries,
            filter,
            substitution,
        })
    }
}

async fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let origin = path.display().to_string();
    let exists = fs::try_exists(path)
        .await
        .map_err(|err| PipelineError::rules(&origin, err.to_string()))?;
    if !exists {
        return Ok(None);
    }
    let text = fs::read_to_string(path)
        .await
        .map_err(|err| PipelineError::rules(&origin, err.to_string()))?;
    serde_yaml::from_str(&text)
        .map(Some)
        .map_err(|err| PipelineError::rules(&origin, err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::RecencyWindow;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_directory_yields_builtins() {
        let dir = tempdir().unwrap();
        let rules = RuleSet::from_dir(dir.path().join("absent")).await.unwrap();
        assert_eq!(rules, RuleSet::builtin());
        assert!(rules.queries.templates.is_empty());
    }

    #[tokio::test]
    async fn rule_files_override_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(QUERIES_FILE),
            "templates:\n  - \"\\\"ขายทอดตลาด\\\" พัสดุ\"\n  - รถยนต์ site:a.test\nplan:\n  default_windows: [last-week]\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join(FILTER_FILE),
            "version: 3\nblocked_domains: [spam.test]\nmenu_separator_threshold: 5\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join(CANONICAL_FILE),
            "version: 7\nrules:\n  - pattern: \"2569\"\n    replacement: \"2026\"\n  - pattern: ต้น\n",
        )
        .unwrap();

        let rules = RuleSet::from_dir(dir.path()).await.unwrap();
        assert_eq!(rules.queries.templates.len(), 2);
        assert_eq!(rules.queries.templates[0], "\"ขายทอดตลาด\" พัสดุ");
        assert_eq!(rules.queries.plan.default_windows, vec![RecencyWindow::LastWeek]);
        assert_eq!(
            rules.queries.plan.special_windows,
            vec![RecencyWindow::LastMonth]
        );
        assert_eq!(rules.filter.blocked_domains, vec!["spam.test".to_string()]);
        assert_eq!(rules.filter.menu_separator_threshold, 5);
        assert_eq!(
            rules.filter.highlight_keywords,
            FilterPolicy::default().highlight_keywords
        );
        assert_eq!(rules.substitution.version, 7);
        assert_eq!(rules.substitution.rules[1].replacement, "");
    }

    #[tokio::test]
    async fn invalid_substitution_table_is_a_rules_error() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CANONICAL_FILE),
            "version: 2\nrules:\n  - pattern: ab\n    replacement: xab\n",
        )
        .unwrap();
        let err = RuleSet::from_dir(dir.path()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Rules { .. }));
    }

    #[tokio::test]
    async fn malformed_yaml_names_the_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(FILTER_FILE), "blocked_domains: {oops").unwrap();
        let err = RuleSet::from_dir(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains(FILTER_FILE), "{err}");
    }
}
