//! Canonicalization, reconciliation and search-curation engine.

pub mod canonical;
pub mod columns;
pub mod config;
pub mod curate;
pub mod error;
pub mod filter;
pub mod query_plan;
pub mod reconcile;
pub mod rules;
pub mod run;

pub use canonical::{is_key_char, Canonicalizer, SubstitutionRule, SubstitutionTable};
pub use columns::{ColumnError, ColumnResolver, FixedColumnResolver, MarkerColumnResolver};
pub use config::PipelineConfig;
pub use curate::{rank, CurationPass, CurationStats, Curator, Deduplicator};
pub use error::{is_config_error, PipelineError};
pub use filter::{FilterPolicy, Rejection, ResultFilter};
pub use query_plan::{PlannedQuery, QueryPlanConfig, QueryPlanner};
pub use reconcile::{Reconciliation, SetReconciler};
pub use rules::RuleSet;
pub use run::{
    build_scheduler, maybe_build_scheduler, CurationPipeline, CurationRunSummary,
    ReconcilePipeline, ReconcileRunSummary,
};

pub const CRATE_NAME: &str = "sift-pipeline";
