use std::collections::HashSet;

use chrono::NaiveDate;
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{FillRule, JoinKind};
use crate::error::{IntegratorError, Result};
use crate::fill::{apply_fill_rules, FillOutcome};
use crate::loader::{dedupe_earliest, read_dates, SourceTable, DATE_COL};

/// One table to merge and the join that brings it in. The join of the first
/// step is ignored: that table is the starting point.
#[derive(Debug, Clone)]
pub struct MergeStep {
    pub table: SourceTable,
    pub join: JoinKind,
}

/// The merged table plus what happened on the way.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub master: DataFrame,
    /// Left/inner-joined sources that share no date with the table so far
    pub disjoint_sources: Vec<String>,
    pub renamed_columns: Vec<(String, String)>,
    pub fills: Vec<FillOutcome>,
}

fn join_args(kind: JoinKind) -> JoinArgs {
    match kind {
        JoinKind::Outer => {
            JoinArgs::new(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns)
        }
        JoinKind::Left => JoinArgs::new(JoinType::Left),
        JoinKind::Inner => JoinArgs::new(JoinType::Inner),
    }
}

fn date_set(df: &DataFrame) -> Result<HashSet<NaiveDate>> {
    Ok(read_dates(df)?.into_iter().flatten().collect())
}

/// Drop rows with a missing date and keep one row per date.
fn joinable(table: &mut SourceTable) -> Result<()> {
    if table.df.column(DATE_COL)?.null_count() > 0 {
        table.df = table
            .df
            .clone()
            .lazy()
            .filter(col(DATE_COL).is_not_null())
            .collect()?;
    }
    dedupe_earliest(table, None)?;
    Ok(())
}

/// Rename value columns already present in the merged table to
/// `<column>_<source>`, adding `_2`, `_3`, ... while that name is taken too.
fn rename_collisions(
    table: &mut SourceTable,
    taken: &HashSet<String>,
) -> Result<Vec<(String, String)>> {
    let names: Vec<String> = table
        .df
        .get_column_names()
        .into_iter()
        .map(|n| n.to_string())
        .collect();
    let clashing: Vec<String> = names
        .iter()
        .filter(|n| n.as_str() != DATE_COL && taken.contains(*n))
        .cloned()
        .collect();
    let mut own: HashSet<String> = names.into_iter().collect();

    let mut renamed = Vec::new();
    for column in clashing {
        let base = format!("{column}_{}", table.name);
        let mut new_name = base.clone();
        let mut suffix = 2;
        while taken.contains(&new_name) || own.contains(&new_name) {
            new_name = format!("{base}_{suffix}");
            suffix += 1;
        }
        table.df.rename(&column, new_name.as_str().into())?;
        own.insert(new_name.clone());
        warn!(source = %table.name, from = %column, to = %new_name, "renamed clashing column");
        renamed.push((column, new_name));
    }
    Ok(renamed)
}

/// Join the steps in order on `date`, sort ascending and apply the fill
/// policy table.
///
/// Fails with [`IntegratorError::EmptyMerge`] when the result has no rows.
pub fn merge_sources(steps: Vec<MergeStep>, fill_rules: &[FillRule]) -> Result<MergeOutcome> {
    let mut steps = steps.into_iter();
    let Some(first) = steps.next() else {
        return Err(IntegratorError::EmptyMerge("no sources to merge".into()));
    };

    let mut disjoint_sources = Vec::new();
    let mut renamed_columns = Vec::new();

    let mut anchor = first.table;
    joinable(&mut anchor)?;
    let mut taken: HashSet<String> = anchor
        .df
        .get_column_names()
        .into_iter()
        .map(|n| n.to_string())
        .collect();
    let mut master_dates = date_set(&anchor.df)?;
    let mut master = anchor.df;

    for step in steps {
        let mut table = step.table;
        joinable(&mut table)?;
        renamed_columns.extend(rename_collisions(&mut table, &taken)?);

        let dates = date_set(&table.df)?;
        if step.join != JoinKind::Outer && master_dates.is_disjoint(&dates) {
            warn!(source = %table.name, "source shares no date with the merged table");
            disjoint_sources.push(table.name.clone());
        }

        taken.extend(
            table
                .df
                .get_column_names()
                .into_iter()
                .map(|n| n.to_string()),
        );
        master = master
            .lazy()
            .join(
                table.df.lazy(),
                [col(DATE_COL)],
                [col(DATE_COL)],
                join_args(step.join),
            )
            .collect()?;
        master_dates = date_set(&master)?;
        debug!(source = %table.name, join = ?step.join, rows = master.height(), "joined source");
    }

    let mut master = master
        .lazy()
        .sort([DATE_COL], SortMultipleOptions::default())
        .collect()?;

    if master.height() == 0 {
        return Err(IntegratorError::EmptyMerge(
            "the sources share no dates; check the join order and date ranges".into(),
        ));
    }

    let fills = apply_fill_rules(&mut master, fill_rules)?;
    info!(rows = master.height(), columns = master.width(), "merged sources");

    Ok(MergeOutcome {
        master,
        disjoint_sources,
        renamed_columns,
        fills,
    })
}
