//! End-to-end run: load every source, normalize dates, bring each to daily
//! granularity, merge in configured order and write the outputs.

use anyhow::Context;
use polars::prelude::DataFrame;
use tracing::{info, warn};

use crate::config::{PipelineConfig, SourceConfig};
use crate::error::{IntegratorError, Result};
use crate::loader::{dedupe_earliest, load_source, project_columns, read_dates, SourceTable};
use crate::report::{
    render_summary, residual_missing, write_summary, IntegrationReport, SourceStats,
};
use crate::resampler::{aggregate_daily, expand_to_daily};
use crate::stitcher::{merge_sources, MergeStep};
use crate::storage::write_master;

/// The master table and the report of the run that produced it.
#[derive(Debug, Clone)]
pub struct IntegrationRun {
    pub master: DataFrame,
    pub report: IntegrationReport,
}

/// Load one source and shape it to one row per day.
fn prepare_source(cfg: &SourceConfig) -> anyhow::Result<(SourceTable, SourceStats)> {
    let mut table = load_source(cfg)?;
    let mut stats = SourceStats {
        name: cfg.name.clone(),
        rows_read: table.rows_read,
        unparsed_dates: table.unparsed_dates,
        rows_without_date: table.rows_without_date()?,
        ..Default::default()
    };

    if cfg.aggregate.is_empty() {
        dedupe_earliest(&mut table, cfg.published_column.as_deref())?;
        project_columns(&mut table, &cfg.columns)?;
        table.df = expand_to_daily(
            &table,
            cfg.frequency,
            cfg.expand_fill,
            (cfg.expand_start, cfg.expand_end),
        )?;
    } else {
        table.df = aggregate_daily(&table, &cfg.aggregate)?;
    }

    stats.duplicates_dropped = table.duplicates_dropped;
    stats.rows_joined = table.df.height() - table.rows_without_date()?;
    Ok((table, stats))
}

/// Run the integration in memory.
///
/// Sources that cannot be loaded are skipped and reported; a merge that ends
/// with no rows is an error.
pub fn integrate(config: &PipelineConfig) -> Result<IntegrationRun> {
    let mut report = IntegrationReport::default();
    let mut steps = Vec::new();

    for cfg in &config.sources {
        match prepare_source(cfg) {
            Ok((table, stats)) => {
                let join = cfg.join_kind(steps.len());
                report.succeeded_sources.push(cfg.name.clone());
                report.sources.push(stats);
                steps.push(MergeStep { table, join });
            }
            Err(err) => {
                warn!(source = %cfg.name, error = %format!("{err:#}"), "skipping source");
                report.skip(cfg.name.clone(), format!("{err:#}"));
            }
        }
    }

    if steps.is_empty() {
        return Err(IntegratorError::EmptyMerge("every source was skipped".into()));
    }

    let outcome = merge_sources(steps, &config.fill)?;
    let dates: Vec<_> = read_dates(&outcome.master)?.into_iter().flatten().collect();

    report.rows_merged = outcome.master.height();
    report.date_start = dates.first().copied();
    report.date_end = dates.last().copied();
    report.disjoint_sources = outcome.disjoint_sources;
    report.renamed_columns = outcome.renamed_columns;
    report.fills = outcome.fills;
    report.residual_missing = residual_missing(&outcome.master);

    info!(
        succeeded = report.succeeded_sources.len(),
        skipped = report.skipped_sources.len(),
        rows = report.rows_merged,
        residual_missing = report.total_missing(),
        "integration finished"
    );
    for (column, missing) in &report.residual_missing {
        warn!(%column, missing, "column has no fill rule covering its gaps");
    }

    Ok(IntegrationRun {
        master: outcome.master,
        report,
    })
}

/// Integrate and write the master table, plus the summary and JSON report
/// when configured.
pub fn run(config: &PipelineConfig) -> anyhow::Result<IntegrationRun> {
    let mut result = integrate(config)?;
    let output = &config.output;

    write_master(&mut result.master, &output.path, output.format)
        .with_context(|| format!("Failed to write master table to {}", output.path.display()))?;
    if let Some(path) = &output.summary_path {
        write_summary(&result.master, path)?;
    }
    if let Some(path) = &output.report_path {
        result.report.write_json(path)?;
    }
    Ok(result)
}

/// Per-source inspection text, or the reason the source could not be loaded.
pub fn inspect(config: &PipelineConfig) -> Vec<(String, std::result::Result<String, String>)> {
    config
        .sources
        .iter()
        .map(|cfg| {
            let summary = load_source(cfg)
                .and_then(|table| {
                    let mut text = render_summary(&format!("Source: {}", cfg.name), &table.df)?;
                    text.push_str(&format!(
                        "\nUnparsed dates: {}\nRows without date: {}\n",
                        table.unparsed_dates,
                        table.rows_without_date()?
                    ));
                    Ok(text)
                })
                .map_err(|err| format!("{err:#}"));
            (cfg.name.clone(), summary)
        })
        .collect()
}
