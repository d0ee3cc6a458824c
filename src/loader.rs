use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::dates::{from_epoch_days, normalize_date_in, parse_timestamp, to_epoch_days, RawDate};
use crate::error::IntegratorError;

/// Name of the canonical date column every table carries after loading.
pub const DATE_COL: &str = "date";

/// A source loaded into memory with its date key normalized.
///
/// `df` starts with a `date` column of polars `Date` type; rows whose date
/// could not be read keep a null there.
#[derive(Debug, Clone)]
pub struct SourceTable {
    pub name: String,
    pub df: DataFrame,
    pub rows_read: usize,
    pub unparsed_dates: usize,
    pub duplicates_dropped: usize,
}

impl SourceTable {
    /// Earliest and latest canonical date present
    pub fn date_range(&self) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let dates = read_dates(&self.df)?;
        let mut known = dates.into_iter().flatten();
        Ok(known.next().map(|first| {
            known.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d)))
        }))
    }

    /// Rows whose date is the missing sentinel
    pub fn rows_without_date(&self) -> Result<usize> {
        Ok(self.df.column(DATE_COL)?.null_count())
    }
}

/// Read a CSV file with a header row, inferring column types from every row.
pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let path = path.as_ref();
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .with_context(|| format!("Failed to open file: {}", path.display()))?
        .finish()
        .with_context(|| format!("Failed to parse CSV in file: {}", path.display()))?;
    Ok(df)
}

/// Load one source and replace its native date column with the canonical
/// `date` column.
pub fn load_source(cfg: &SourceConfig) -> Result<SourceTable> {
    if !cfg.path.exists() {
        return Err(IntegratorError::SourceNotFound(cfg.path.clone()).into());
    }
    let tz = cfg.tz()?;
    let raw = read_csv(&cfg.path)?;
    let table = canonicalize(&cfg.name, raw, &cfg.date_column, &tz).map_err(|err| {
        match err.downcast::<IntegratorError>() {
            Ok(IntegratorError::MissingDateColumn { column, .. }) => {
                IntegratorError::MissingDateColumn { column, path: cfg.path.clone() }.into()
            }
            Ok(other) => other.into(),
            Err(other) => other,
        }
    })?;

    info!(
        source = %cfg.name,
        rows = table.rows_read,
        columns = table.df.width() - 1,
        unparsed_dates = table.unparsed_dates,
        "loaded source"
    );
    Ok(table)
}

/// Normalize `date_column` of an in-memory frame into a leading `date` column.
pub fn canonicalize(name: &str, df: DataFrame, date_column: &str, tz: &Tz) -> Result<SourceTable> {
    let raw_dates = df.column(date_column).map_err(|_| IntegratorError::MissingDateColumn {
        column: date_column.to_string(),
        path: name.into(),
    })?;
    if date_column != DATE_COL && df.column(DATE_COL).is_ok() {
        return Err(IntegratorError::DateColumnConflict(date_column.to_string()).into());
    }

    let dates = normalize_column(raw_dates, tz)?;
    // Empty cells are missing, not unparsed.
    let unparsed_dates = dates
        .iter()
        .filter(|d| d.is_none())
        .count()
        .saturating_sub(raw_dates.null_count());
    let rows_read = df.height();

    let mut columns: Vec<Column> = vec![date_series(DATE_COL, &dates)?.into_column()];
    columns.extend(
        df.get_columns()
            .iter()
            .filter(|c| c.name().as_str() != date_column)
            .cloned(),
    );
    let df = DataFrame::new(columns)?;

    if unparsed_dates > 0 {
        warn!(source = %name, unparsed_dates, "dates that could not be normalized kept as missing");
    }

    Ok(SourceTable {
        name: name.to_string(),
        df,
        rows_read,
        unparsed_dates,
        duplicates_dropped: 0,
    })
}

/// Keep one row per canonical date: the earliest by `published_column`, or the
/// first in file order when there is no such column. Rows with a missing date
/// are all kept.
pub fn dedupe_earliest(
    table: &mut SourceTable,
    published_column: Option<&str>,
) -> crate::error::Result<usize> {
    let dates = read_dates(&table.df)?;
    let published = match published_column {
        Some(column) => published_times(table.df.column(column).map_err(|_| {
            IntegratorError::MissingColumn {
                source_name: table.name.clone(),
                column: column.to_string(),
            }
        })?)?,
        None => vec![None; dates.len()],
    };

    // Missing publication times sort after every known one.
    let mut best: HashMap<NaiveDate, (Option<DateTime<Utc>>, usize)> = HashMap::new();
    for (i, date) in dates.iter().enumerate() {
        let Some(date) = date else { continue };
        let candidate = published[i];
        best.entry(*date)
            .and_modify(|(ts, idx)| {
                let earlier = match (candidate, *ts) {
                    (Some(c), Some(t)) => c < t,
                    (Some(_), None) => true,
                    _ => false,
                };
                if earlier {
                    *ts = candidate;
                    *idx = i;
                }
            })
            .or_insert((candidate, i));
    }

    let mut keep: Vec<IdxSize> = dates
        .iter()
        .enumerate()
        .filter(|(_, d)| d.is_none())
        .map(|(i, _)| i as IdxSize)
        .chain(best.values().map(|(_, i)| *i as IdxSize))
        .collect();
    keep.sort_unstable();

    let dropped = dates.len() - keep.len();
    if dropped > 0 {
        table.df = table.df.take(&IdxCa::from_vec("idx".into(), keep))?;
        table.duplicates_dropped += dropped;
        debug!(source = %table.name, dropped, "dropped duplicate dates");
    }
    Ok(dropped)
}

/// Restrict a table to `date` plus the listed value columns. An empty list keeps everything.
pub fn project_columns(table: &mut SourceTable, columns: &[String]) -> crate::error::Result<()> {
    if columns.is_empty() {
        return Ok(());
    }
    for column in columns {
        if table.df.column(column).is_err() {
            return Err(IntegratorError::MissingColumn {
                source_name: table.name.clone(),
                column: column.clone(),
            });
        }
    }
    let selection = std::iter::once(DATE_COL.to_string())
        .chain(columns.iter().filter(|c| c.as_str() != DATE_COL).cloned());
    table.df = table.df.select(selection)?;
    Ok(())
}

// === Date column helpers =================================================

/// Build a polars `Date` series from canonical dates.
pub fn date_series(name: &str, dates: &[Option<NaiveDate>]) -> PolarsResult<Series> {
    let days: Vec<Option<i32>> = dates.iter().map(|d| d.map(to_epoch_days)).collect();
    Series::new(name.into(), days).cast(&DataType::Date)
}

/// Read the canonical `date` column back into chrono dates.
pub fn read_dates(df: &DataFrame) -> PolarsResult<Vec<Option<NaiveDate>>> {
    let days = df.column(DATE_COL)?.cast(&DataType::Int32)?;
    Ok(days
        .i32()?
        .into_iter()
        .map(|d| d.and_then(from_epoch_days))
        .collect())
}

fn normalize_column(column: &Column, tz: &Tz) -> PolarsResult<Vec<Option<NaiveDate>>> {
    let dates: Vec<Option<NaiveDate>> = match column.dtype() {
        DataType::String => column
            .str()?
            .into_iter()
            .map(|v| normalize_date_in(v, tz))
            .collect(),
        DataType::Date => {
            let days = column.cast(&DataType::Int32)?;
            days.i32()?
                .into_iter()
                .map(|d| d.and_then(from_epoch_days))
                .collect()
        }
        dt if dt.is_integer() => {
            let ints = column.cast(&DataType::Int64)?;
            ints.i64()?
                .into_iter()
                .map(|v| normalize_date_in(v, tz))
                .collect()
        }
        dt if dt.is_float() => {
            let floats = column.cast(&DataType::Float64)?;
            floats
                .f64()?
                .into_iter()
                .map(|v| match v {
                    Some(f) if f.fract() == 0.0 => normalize_date_in(RawDate::Int(f as i64), tz),
                    _ => None,
                })
                .collect()
        }
        _ => {
            let text = column.cast(&DataType::String)?;
            text.str()?
                .into_iter()
                .map(|v| normalize_date_in(v, tz))
                .collect()
        }
    };
    Ok(dates)
}

fn published_times(column: &Column) -> PolarsResult<Vec<Option<DateTime<Utc>>>> {
    let text = column.cast(&DataType::String)?;
    Ok(text
        .str()?
        .into_iter()
        .map(|v| v.and_then(parse_timestamp))
        .collect())
}
