//! Run orchestration: one reconciliation run, one curation run, optional cron.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sift_adapters::{
    tabular_source_for, SearchBackend, SearchHit, SearchLocale, SerperSearchBackend,
    TabularSource,
};
use sift_core::{Candidate, CuratedList, MissingRecord, Table};
use sift_storage::HttpFetcher;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::canonical::Canonicalizer;
use crate::columns::{ColumnResolver, MarkerColumnResolver};
use crate::config::PipelineConfig;
use crate::curate::Curator;
use crate::error::{PipelineError, Result};
use crate::filter::ResultFilter;
use crate::query_plan::{PlannedQuery, QueryPlanner};
use crate::reconcile::SetReconciler;
use crate::rules::RuleSet;

pub const COMPETITOR_SOURCE_ID: &str = "competitor";
pub const MINE_SOURCE_ID: &str = "mine";

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub competitor_source: String,
    pub mine_source: String,
    /// Column order of the competitor source, for exporting missing rows as is.
    pub competitor_columns: Vec<String>,
    pub competitor_column: String,
    pub mine_column: String,
    pub competitor_rows: usize,
    pub mine_rows: usize,
    pub competitor_distinct_keys: usize,
    pub mine_distinct_keys: usize,
    pub skipped_empty: usize,
    pub missing: Vec<MissingRecord>,
}

pub struct ReconcilePipeline {
    competitor: Box<dyn TabularSource>,
    mine: Box<dyn TabularSource>,
    competitor_resolver: Box<dyn ColumnResolver>,
    mine_resolver: Box<dyn ColumnResolver>,
    reconciler: SetReconciler,
}

impl ReconcilePipeline {
    pub fn new(
        competitor: Box<dyn TabularSource>,
        mine: Box<dyn TabularSource>,
        reconciler: SetReconciler,
    ) -> Self {
        Self {
            competitor,
            mine,
            competitor_resolver: Box::new(MarkerColumnResolver::default()),
            mine_resolver: Box::new(MarkerColumnResolver::default()),
            reconciler,
        }
    }

    pub fn with_resolvers(
        mut self,
        competitor: Box<dyn ColumnResolver>,
        mine: Box<dyn ColumnResolver>,
    ) -> Self {
        self.competitor_resolver = competitor;
        self.mine_resolver = mine;
        self
    }

    pub fn from_config(config: &PipelineConfig, rules: &RuleSet) -> anyhow::Result<Self> {
        let competitor = config
            .competitor_csv
            .as_deref()
            .ok_or_else(|| PipelineError::config("SIFT_COMPETITOR_CSV is not set"))?;
        let mine = config
            .mine_csv
            .as_deref()
            .ok_or_else(|| PipelineError::config("SIFT_MINE_CSV is not set"))?;
        let http = HttpFetcher::new(config.http_client_config())?;
        let canonicalizer = Canonicalizer::new(rules.substitution.clone())?;

        Ok(Self::new(
            tabular_source_for(COMPETITOR_SOURCE_ID, competitor, &http),
            tabular_source_for(MINE_SOURCE_ID, mine, &http),
            SetReconciler::new(canonicalizer),
        ))
    }

    /// Fetches both sides, then reconciles. Any fetch failure aborts the run.
    pub async fn run_once(&self) -> Result<ReconcileRunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let competitor = fetch_table(self.competitor.as_ref()).await?;
        let mine = fetch_table(self.mine.as_ref()).await?;

        let competitor_column = resolve_column(self.competitor_resolver.as_ref(), &competitor)?;
        let mine_column = resolve_column(self.mine_resolver.as_ref(), &mine)?;

        let result = self.reconciler.reconcile_detailed(
            &competitor.rows,
            &mine.rows,
            &competitor_column,
            &mine_column,
        );
        info!(
            %run_id,
            competitor_column = %competitor_column,
            mine_column = %mine_column,
            missing = result.missing.len(),
            "reconciliation finished"
        );

        Ok(ReconcileRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            competitor_source: competitor.source_id,
            mine_source: mine.source_id,
            competitor_columns: competitor.columns,
            competitor_column,
            mine_column,
            competitor_rows: competitor.rows.len(),
            mine_rows: mine.rows.len(),
            competitor_distinct_keys: result.competitor_distinct_keys,
            mine_distinct_keys: result.mine_distinct_keys,
            skipped_empty: result.skipped_empty,
            missing: result.missing,
        })
    }
}

async fn fetch_table(source: &dyn TabularSource) -> Result<Table> {
    let source_id = source.source_id().to_string();
    source
        .fetch_table()
        .instrument(info_span!("tabular_fetch", source_id = %source_id))
        .await
        .map_err(|source| PipelineError::Collaborator {
            call: format!("tabular fetch `{source_id}`"),
            source,
        })
}

fn resolve_column(resolver: &dyn ColumnResolver, table: &Table) -> Result<String> {
    resolver
        .resolve_content_column(&table.columns)
        .map_err(|err| PipelineError::InputShape {
            source_id: table.source_id.clone(),
            message: err.to_string(),
        })
}

#[derive(Debug, Clone, Serialize)]
pub struct CurationRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub backend: String,
    pub planned_calls: usize,
    /// Every call that failed, forbidden ones included.
    pub failed_calls: usize,
    pub forbidden_calls: usize,
    pub raw_candidates: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub curated: CuratedList,
}

pub struct CurationPipeline {
    backend: Arc<dyn SearchBackend>,
    planner: QueryPlanner,
    templates: Vec<String>,
    curator: Curator,
}

impl CurationPipeline {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        planner: QueryPlanner,
        templates: Vec<String>,
        curator: Curator,
    ) -> Self {
        Self {
            backend,
            planner,
            templates,
            curator,
        }
    }

    pub fn from_rules(backend: Arc<dyn SearchBackend>, rules: &RuleSet) -> Self {
        Self::new(
            backend,
            QueryPlanner::new(rules.queries.plan.clone()),
            rules.queries.templates.clone(),
            Curator::new(ResultFilter::new(rules.filter.clone())),
        )
    }

    /// Serper-backed pipeline. Fails before any call when the credential is unusable.
    pub fn from_config(config: &PipelineConfig, rules: &RuleSet) -> anyhow::Result<Self> {
        let api_key = config.require_api_key()?;
        let http = HttpFetcher::new(config.http_client_config())?;
        let backend = SerperSearchBackend::new(http, config.search_endpoint.clone(), api_key)
            .with_locale(SearchLocale::same(&config.search_locale))
            .with_max_results(config.search_max_results);
        Ok(Self::from_rules(Arc::new(backend), rules))
    }

    pub fn plan(&self) -> Vec<PlannedQuery> {
        self.planner.build_queries(&self.templates)
    }

    /// Issues every planned call in plan order. A failed call contributes nothing
    /// and the run carries on.
    pub async fn run_once(&self) -> Result<CurationRunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let plan = self.plan();
        if plan.is_empty() {
            return Err(PipelineError::config(
                "no usable query templates; check queries.yaml in the rules directory",
            ));
        }
        info!(%run_id, backend = self.backend.backend_id(), calls = plan.len(), "starting search run");

        let mut pass = self.curator.begin();
        let mut failed_calls = 0;
        let mut forbidden_calls = 0;
        let mut raw_candidates = 0;

        for planned in &plan {
            let span = info_span!(
                "search_call",
                template = planned.template_index,
                query = %planned.query,
                window = %planned.window,
            );
            let hits = match self
                .backend
                .search(&planned.query, planned.window)
                .instrument(span)
                .await
            {
                Ok(hits) => hits,
                Err(err) if err.is_forbidden() => {
                    failed_calls += 1;
                    forbidden_calls += 1;
                    warn!(
                        query = %planned.query,
                        window = %planned.window,
                        "search backend answered 403; SERPER_API_KEY may be invalid or out of quota"
                    );
                    continue;
                }
                Err(err) => {
                    failed_calls += 1;
                    warn!(
                        query = %planned.query,
                        window = %planned.window,
                        error = %err,
                        "search call failed; skipping"
                    );
                    continue;
                }
            };

            for hit in hits {
                if let Some(candidate) = candidate_from_hit(hit, planned) {
                    raw_candidates += 1;
                    pass.push(candidate);
                }
            }
        }

        let (curated, stats) = pass.finish();
        info!(
            %run_id,
            raw_candidates,
            rejected = stats.rejected,
            duplicates = stats.duplicates,
            kept = curated.len(),
            failed_calls,
            "search run finished"
        );

        Ok(CurationRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            backend: self.backend.backend_id().to_string(),
            planned_calls: plan.len(),
            failed_calls,
            forbidden_calls,
            raw_candidates,
            rejected: stats.rejected,
            duplicates: stats.duplicates,
            curated,
        })
    }
}

/// Items without a link cannot be deduplicated and are dropped.
pub fn candidate_from_hit(hit: SearchHit, planned: &PlannedQuery) -> Option<Candidate> {
    let url = hit.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty())?;
    Some(Candidate {
        url,
        title: hit.title.unwrap_or_default(),
        snippet: hit.snippet.unwrap_or_default(),
        recency_tag: planned.window,
        query: planned.query.clone(),
    })
}

/// Cron-driven repetition of `job`. `None` when the scheduler is disabled.
pub async fn maybe_build_scheduler<F, Fut>(
    config: &PipelineConfig,
    job: F,
) -> anyhow::Result<Option<JobScheduler>>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if !config.scheduler_enabled {
        return Ok(None);
    }
    build_scheduler(&config.search_cron, job).await.map(Some)
}

pub async fn build_scheduler<F, Fut>(cron: &str, job: F) -> anyhow::Result<JobScheduler>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Arc::new(job);
    let cron = cron.to_string();
    let scheduled = Job::new_async(&cron, move |_uuid, _l| {
        let job = Arc::clone(&job);
        Box::pin(async move {
            (*job)().await;
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(scheduled).await.context("adding scheduler job")?;
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::FixedColumnResolver;
    use sift_adapters::{
        CsvFileSource, FixtureResponse, FixtureSearchBackend, SearchFixture, StaticTableSource,
    };
    use sift_core::{RawRecord, RecencyWindow};

    fn table(source_id: &str, columns: &[&str], rows: &[&[&str]]) -> Box<dyn TabularSource> {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let rows = rows
            .iter()
            .map(|row| RawRecord::from_pairs(columns.iter().cloned().zip(row.iter().copied())))
            .collect();
        Box::new(StaticTableSource::new(Table::new(source_id, columns, rows)))
    }

    #[tokio::test]
    async fn reconcile_run_reports_missing_rows_and_counts() {
        let pipeline = ReconcilePipeline::new(
            table(
                "competitor",
                &["ลำดับ", "รายการ", "ราคา"],
                &[&["1", "ครุภัณฑ์57", "10"], &["2", "รถยนต์ชำรุด", "20"], &["3", "", ""]],
            ),
            table("mine", &["no", "subject"], &[&["1", "ครุภัณฑ์ 57"]]),
            SetReconciler::default(),
        );
        let summary = pipeline.run_once().await.unwrap();
        assert_eq!(summary.competitor_column, "รายการ");
        assert_eq!(summary.mine_column, "subject");
        assert_eq!(summary.competitor_columns, vec!["ลำดับ", "รายการ", "ราคา"]);
        assert_eq!(summary.competitor_rows, 3);
        assert_eq!(summary.competitor_distinct_keys, 2);
        assert_eq!(summary.mine_distinct_keys, 1);
        assert_eq!(summary.skipped_empty, 1);
        assert_eq!(summary.missing.len(), 1);
        assert_eq!(
            summary.missing[0].record.text("รายการ").as_deref(),
            Some("รถยนต์ชำรุด")
        );
        assert!(summary.finished_at >= summary.started_at);
    }

    #[tokio::test]
    async fn column_less_source_is_an_input_shape_error() {
        let pipeline = ReconcilePipeline::new(
            table("competitor", &["a", "b"], &[&["1", "x"]]),
            table("mine", &[], &[]),
            SetReconciler::default(),
        );
        let err = pipeline.run_once().await.unwrap_err();
        assert!(
            matches!(&err, PipelineError::InputShape { source_id, .. } if source_id == "mine"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn failed_fetch_aborts_and_names_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = ReconcilePipeline::new(
            Box::new(CsvFileSource::new("competitor", dir.path().join("gone.csv"))),
            table("mine", &["a", "b"], &[]),
            SetReconciler::default(),
        );
        let err = pipeline.run_once().await.unwrap_err();
        assert!(matches!(err, PipelineError::Collaborator { .. }));
        assert!(err.to_string().contains("tabular fetch `competitor`"), "{err}");
    }

    #[tokio::test]
    async fn injected_resolvers_override_the_heuristic() {
        let pipeline = ReconcilePipeline::new(
            table("competitor", &["id", "รายการ", "note"], &[&["1", "x", "โต๊ะ"]]),
            table("mine", &["id", "name"], &[&["1", "โต๊ะ"]]),
            SetReconciler::default(),
        )
        .with_resolvers(
            Box::new(FixedColumnResolver::new("note")),
            Box::new(FixedColumnResolver::new("name")),
        );
        let summary = pipeline.run_once().await.unwrap();
        assert_eq!(summary.competitor_column, "note");
        assert!(summary.missing.is_empty());
    }

    fn hit(title: &str, snippet: &str, link: Option<&str>) -> SearchHit {
        SearchHit {
            title: Some(title.to_string()),
            snippet: Some(snippet.to_string()),
            link: link.map(str::to_string),
        }
    }

    fn response(query: &str, window: RecencyWindow, status: u16, organic: Vec<SearchHit>) -> FixtureResponse {
        FixtureResponse {
            query: query.to_string(),
            window,
            status,
            organic,
        }
    }

    fn curation(fixture: SearchFixture, templates: &[&str]) -> (Arc<FixtureSearchBackend>, CurationPipeline) {
        let backend = Arc::new(FixtureSearchBackend::new(fixture));
        let mut rules = RuleSet::builtin();
        rules.queries.templates = templates.iter().map(|t| t.to_string()).collect();
        let pipeline = CurationPipeline::from_rules(backend.clone(), &rules);
        (backend, pipeline)
    }

    #[tokio::test]
    async fn curation_run_isolates_failed_calls_and_keeps_first_window() {
        let fixture = SearchFixture {
            fixture_id: "unit".into(),
            notes: None,
            responses: vec![
                response(
                    "ขายทอดตลาด พัสดุ",
                    RecencyWindow::LastDay,
                    200,
                    vec![
                        hit("ประกาศขายทอดตลาดพัสดุ", "เทศบาล", Some("https://a.test/1")),
                        hit("ประกาศขายทอดตลาด", "", None),
                        hit("ขายทอดตลาดพัสดุ", "", Some("https://www.youtube.com/watch?v=1")),
                    ],
                ),
                response(
                    "ขายทอดตลาด พัสดุ",
                    RecencyWindow::LastWeek,
                    200,
                    vec![
                        hit("ประกาศขายทอดตลาดพัสดุ", "เทศบาล", Some("https://a.test/1")),
                        hit("จำหน่ายครุภัณฑ์ชำรุด", "", Some("https://b.test/2")),
                    ],
                ),
                response("รถยนต์", RecencyWindow::LastDay, 403, vec![]),
                response("รถยนต์", RecencyWindow::LastWeek, 500, vec![]),
                response(
                    "ขายทอดตลาด",
                    RecencyWindow::LastMonth,
                    200,
                    vec![hit("ขายทอดตลาดรถยนต์", "", Some("https://c.test/3"))],
                ),
            ],
        };
        let (backend, pipeline) = curation(
            fixture,
            &[
                "\"ขายทอดตลาด\" พัสดุ -site:youtube.com",
                "รถยนต์",
                "ขายทอดตลาด site:webportal.bangkok.go.th",
            ],
        );

        let summary = pipeline.run_once().await.unwrap();
        assert_eq!(summary.planned_calls, 5);
        assert_eq!(summary.failed_calls, 2);
        assert_eq!(summary.forbidden_calls, 1);
        assert_eq!(summary.raw_candidates, 5);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.backend, "fixture");

        let urls: Vec<_> = summary.curated.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.test/1", "https://b.test/2", "https://c.test/3"]);
        assert_eq!(
            summary.curated.get("https://a.test/1").unwrap().recency_tag,
            RecencyWindow::LastDay
        );

        let calls = backend.calls();
        let expected: Vec<_> = pipeline
            .plan()
            .into_iter()
            .map(|p| (p.query, p.window))
            .collect();
        assert_eq!(calls, expected);
    }

    #[tokio::test]
    async fn empty_plan_is_a_configuration_error() {
        let (backend, pipeline) = curation(SearchFixture::default(), &["site:only.test", "\"\""]);
        let err = pipeline.run_once().await.unwrap_err();
        assert!(err.is_config());
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn hits_without_links_are_skipped() {
        let planned = PlannedQuery {
            template_index: 0,
            query: "q".into(),
            window: RecencyWindow::LastWeek,
        };
        assert!(candidate_from_hit(hit("t", "s", None), &planned).is_none());
        assert!(candidate_from_hit(hit("t", "s", Some("  ")), &planned).is_none());
        let candidate = candidate_from_hit(
            SearchHit {
                title: None,
                snippet: None,
                link: Some("https://a.test".into()),
            },
            &planned,
        )
        .unwrap();
        assert_eq!(candidate.title, "");
        assert_eq!(candidate.recency_tag, RecencyWindow::LastWeek);
        assert_eq!(candidate.query, "q");
    }

    #[test]
    fn missing_credential_stops_before_any_call() {
        let config = PipelineConfig::from_lookup(|_| None);
        let err = CurationPipeline::from_config(&config, &RuleSet::builtin())
            .err()
            .expect("config error");
        assert!(crate::error::is_config_error(&err));
    }

    #[test]
    fn reconcile_requires_both_locations() {
        let config = PipelineConfig::from_lookup(|key| {
            (key == "SIFT_COMPETITOR_CSV").then(|| "fixtures/sheets/competitor.csv".to_string())
        });
        let err = ReconcilePipeline::from_config(&config, &RuleSet::builtin())
            .err()
            .expect("config error");
        assert!(crate::error::is_config_error(&err));
        assert!(err.to_string().contains("SIFT_MINE_CSV"));
    }

    #[tokio::test]
    async fn disabled_scheduler_is_not_built() {
        let config = PipelineConfig::from_lookup(|_| None);
        let sched = maybe_build_scheduler(&config, || async {}).await.unwrap();
        assert!(sched.is_none());
    }
}
