//! Query cleaning and recency-window assignment.

use serde::{Deserialize, Serialize};
use sift_core::RecencyWindow;

const QUOTE_CHARS: &[char] = &['"', '\u{201C}', '\u{201D}'];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryPlanConfig {
    pub default_windows: Vec<RecencyWindow>,
    /// Templates containing any of these (case-insensitive) get `special_windows` instead.
    pub special_source_markers: Vec<String>,
    pub special_windows: Vec<RecencyWindow>,
    /// `-<domain>` exclusion clauses ending in one of these are dropped.
    pub blocked_domain_suffixes: Vec<String>,
}

impl Default for QueryPlanConfig {
    fn default() -> Self {
        Self {
            default_windows: vec![RecencyWindow::LastDay, RecencyWindow::LastWeek],
            special_source_markers: vec!["webportal.bangkok.go.th".to_string()],
            special_windows: vec![RecencyWindow::LastMonth],
            blocked_domain_suffixes: vec![".go.th".to_string()],
        }
    }
}

/// One search call: cleaned query text restricted to one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedQuery {
    /// Position of the source template, counting discarded ones.
    pub template_index: usize,
    pub query: String,
    pub window: RecencyWindow,
}

#[derive(Debug, Clone, Default)]
pub struct QueryPlanner {
    config: QueryPlanConfig,
}

impl QueryPlanner {
    pub fn new(config: QueryPlanConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QueryPlanConfig {
        &self.config
    }

    /// Drops quotes, `site:` clauses and blocked-domain exclusions, then
    /// collapses whitespace. `None` when nothing is left.
    pub fn clean_query(&self, template: &str) -> Option<String> {
        let unquoted = template.replace(QUOTE_CHARS, "");
        let kept = unquoted
            .split_whitespace()
            .filter(|token| !self.is_site_clause(token) && !self.is_blocked_exclusion(token))
            .collect::<Vec<_>>();
        if kept.is_empty() {
            None
        } else {
            Some(kept.join(" "))
        }
    }

    pub fn windows_for(&self, template: &str) -> &[RecencyWindow] {
        let lowered = template.to_lowercase();
        let special = self
            .config
            .special_source_markers
            .iter()
            .any(|marker| !marker.is_empty() && lowered.contains(&marker.to_lowercase()));
        if special {
            &self.config.special_windows
        } else {
            &self.config.default_windows
        }
    }

    /// Template order first, then window order within a template.
    pub fn build_queries<S: AsRef<str>>(&self, templates: &[S]) -> Vec<PlannedQuery> {
        let mut planned = Vec::new();
        for (template_index, template) in templates.iter().enumerate() {
            let template = template.as_ref();
            let Some(query) = self.clean_query(template) else {
                continue;
            };
            for window in self.windows_for(template) {
                planned.push(PlannedQuery {
                    template_index,
                    query: query.clone(),
                    window: *window,
                });
            }
        }
        planned
    }

    fn is_site_clause(&self, token: &str) -> bool {
        let token = token.strip_prefix('-').unwrap_or(token);
        token
            .get(..5)
            .is_some_and(|head| head.eq_ignore_ascii_case("site:"))
    }

    fn is_blocked_exclusion(&self, token: &str) -> bool {
        let Some(domain) = token.strip_prefix('-') else {
            return false;
        };
        let domain = domain.to_lowercase();
        self.config.blocked_domain_suffixes.iter().any(|suffix| {
            let suffix = suffix.to_lowercase();
            !suffix.is_empty() && domain.len() > suffix.len() && domain.ends_with(&suffix)
        })
    }
}
