use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use sift_adapters::FixtureSearchBackend;
use sift_pipeline::{
    is_config_error, maybe_build_scheduler, CurationPipeline, PipelineConfig, PipelineError,
    ReconcilePipeline, RuleSet,
};
use sift_report::{write_index, write_missing_csv, write_search_report};
use sift_storage::ReportStore;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "sift")]
#[command(about = "Catalogue reconciliation and curated search reports")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Overrides SIFT_OUTPUT_DIR.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Overrides SIFT_RULES_DIR.
    #[arg(long, global = true)]
    rules_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Find catalogue items the competitor lists that we do not.
    Reconcile {
        /// Competitor sheet (URL or file path); overrides SIFT_COMPETITOR_CSV.
        #[arg(long)]
        competitor: Option<String>,
        /// Our sheet (URL or file path); overrides SIFT_MINE_CSV.
        #[arg(long)]
        mine: Option<String>,
    },
    /// Run the planned searches and write a curated HTML report.
    Search {
        /// Replay recorded responses instead of calling the search API.
        #[arg(long)]
        fixture: Option<PathBuf>,
    },
    /// Rebuild the report index page.
    Index,
    /// Serve the output directory over HTTP.
    Serve {
        /// Overrides SIFT_WEB_PORT.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run searches on the configured cron schedule until interrupted.
    Watch,
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "info",
        1 => "info,sift=debug,sift_pipeline=debug,sift_adapters=debug,sift_report=debug",
        _ => "debug,sift=trace,sift_pipeline=trace,sift_adapters=trace,sift_report=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => fmt().with_env_filter(env_filter).with_target(false).init(),
        LogFormat::Json => fmt().json().with_env_filter(env_filter).init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "run failed");
            eprintln!("error: {err:#}");
            if is_config_error(&err) {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = PipelineConfig::from_env();
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }
    if let Some(dir) = cli.rules_dir {
        config.rules_dir = dir;
    }

    match cli.command {
        Command::Reconcile { competitor, mine } => {
            if competitor.is_some() {
                config.competitor_csv = competitor;
            }
            if mine.is_some() {
                config.mine_csv = mine;
            }
            reconcile(&config).await
        }
        Command::Search { fixture } => {
            let rules = RuleSet::from_dir(&config.rules_dir).await?;
            let pipeline = match fixture {
                Some(path) => CurationPipeline::from_rules(
                    Arc::new(FixtureSearchBackend::from_path(path)?),
                    &rules,
                ),
                None => CurationPipeline::from_config(&config, &rules)?,
            };
            search(&config, &rules, &pipeline).await
        }
        Command::Index => {
            let stored = write_index(&ReportStore::new(&config.output_dir), now()).await?;
            println!("index written: {}", stored.absolute_path.display());
            Ok(())
        }
        Command::Serve { port } => {
            let port = port.unwrap_or_else(sift_report::port_from_env);
            sift_report::serve(config.output_dir.clone(), port).await
        }
        Command::Watch => watch(config).await,
    }
}

fn now() -> chrono::NaiveDateTime {
    Local::now().naive_local()
}

async fn reconcile(config: &PipelineConfig) -> Result<()> {
    let rules = RuleSet::from_dir(&config.rules_dir).await?;
    let pipeline = ReconcilePipeline::from_config(config, &rules)?;
    let summary = pipeline.run_once().await?;
    let stored = write_missing_csv(
        &ReportStore::new(&config.output_dir),
        &summary.competitor_columns,
        &summary.missing,
    )
    .await?;
    println!(
        "reconcile complete: run_id={} competitor_rows={} mine_rows={} missing={} csv={}",
        summary.run_id,
        summary.competitor_rows,
        summary.mine_rows,
        summary.missing.len(),
        stored.absolute_path.display()
    );
    Ok(())
}

async fn search(config: &PipelineConfig, rules: &RuleSet, pipeline: &CurationPipeline) -> Result<()> {
    let summary = pipeline.run_once().await?;
    let store = ReportStore::new(&config.output_dir);
    let generated_at = now();
    let report = write_search_report(
        &store,
        &summary.curated,
        &rules.filter.highlight_keywords,
        generated_at,
    )
    .await?;
    write_index(&store, generated_at).await?;
    println!(
        "search complete: run_id={} calls={} failed={} raw={} curated={} report={}",
        summary.run_id,
        summary.planned_calls,
        summary.failed_calls,
        summary.raw_candidates,
        summary.curated.len(),
        report.absolute_path.display()
    );
    Ok(())
}

async fn watch(config: PipelineConfig) -> Result<()> {
    let rules = RuleSet::from_dir(&config.rules_dir).await?;
    let pipeline = Arc::new(CurationPipeline::from_config(&config, &rules)?);
    let job_config = Arc::new(config.clone());
    let job_rules = Arc::new(rules);

    let scheduler = maybe_build_scheduler(&config, move || {
        let pipeline = Arc::clone(&pipeline);
        let config = Arc::clone(&job_config);
        let rules = Arc::clone(&job_rules);
        async move {
            if let Err(err) = search(&config, &rules, &pipeline).await {
                error!(error = %format!("{err:#}"), "scheduled search failed");
            }
        }
    })
    .await?;
    let Some(mut scheduler) = scheduler else {
        return Err(PipelineError::config("SIFT_SCHEDULER_ENABLED is not set; nothing to watch").into());
    };

    scheduler.start().await?;
    info!(cron = %config.search_cron, "scheduler started");
    tokio::signal::ctrl_c().await?;
    info!("shutting down scheduler");
    scheduler.shutdown().await?;
    Ok(())
}
