//! Integration report and column summary.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::fill::FillOutcome;
use crate::loader::{read_dates, DATE_COL};

/// A source left out of the merge and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSource {
    pub name: String,
    pub reason: String,
}

/// Per-source counters collected while loading and merging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub name: String,
    pub rows_read: usize,
    pub unparsed_dates: usize,
    pub duplicates_dropped: usize,
    /// Rows excluded from the join because their date is missing
    pub rows_without_date: usize,
    /// Rows after expansion or aggregation, as joined
    pub rows_joined: usize,
}

/// Outcome of one integration run, returned instead of being printed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationReport {
    pub succeeded_sources: Vec<String>,
    pub skipped_sources: Vec<SkippedSource>,
    pub rows_merged: usize,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub sources: Vec<SourceStats>,
    /// Left-joined sources that matched no date of the anchor span
    pub disjoint_sources: Vec<String>,
    /// Columns renamed to avoid a clash, as (original, renamed)
    pub renamed_columns: Vec<(String, String)>,
    /// Columns the fill policy matched and how many values it filled
    pub fills: Vec<FillOutcome>,
    /// Columns still holding missing values after the fill policy, with counts
    pub residual_missing: Vec<(String, usize)>,
}

impl IntegrationReport {
    pub fn skip(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.skipped_sources.push(SkippedSource {
            name: name.into(),
            reason: reason.into(),
        });
    }

    pub fn total_missing(&self) -> usize {
        self.residual_missing.iter().map(|(_, n)| n).sum()
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        Ok(())
    }
}

/// Null count of every column except `date`, in column order, zeros skipped.
pub fn residual_missing(df: &DataFrame) -> Vec<(String, usize)> {
    df.get_columns()
        .iter()
        .filter(|c| c.name().as_str() != DATE_COL)
        .map(|c| (c.name().to_string(), c.null_count()))
        .filter(|(_, n)| *n > 0)
        .collect()
}

/// count / mean / std / min / max over the non-null values of a numeric column
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Describe {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

pub fn describe(values: &[Option<f64>]) -> Option<Describe> {
    let known: Vec<f64> = values.iter().flatten().copied().filter(|v| !v.is_nan()).collect();
    if known.is_empty() {
        return None;
    }
    let n = known.len() as f64;
    let mean = known.iter().sum::<f64>() / n;
    // Sample standard deviation, NaN for a single value.
    let std = if known.len() > 1 {
        (known.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        f64::NAN
    };
    let min = known.iter().copied().fold(f64::INFINITY, f64::min);
    let max = known.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(Describe { count: known.len(), mean, std, min, max })
}

/// Render the plain-text summary of a table: shape, date range, and one line
/// per column with dtype and missing values, then numeric statistics.
pub fn render_summary(title: &str, df: &DataFrame) -> Result<String> {
    let mut out = String::new();
    let rule = "=".repeat(80);
    let height = df.height();

    writeln!(out, "{rule}\n{title}\n{rule}\n")?;
    writeln!(out, "Shape: ({}, {})", height, df.width())?;
    if df.column(DATE_COL).is_ok() {
        let dates = read_dates(df)?;
        let known: Vec<NaiveDate> = dates.into_iter().flatten().collect();
        if let (Some(lo), Some(hi)) = (known.iter().min(), known.iter().max()) {
            writeln!(out, "Date range: {lo} ~ {hi}")?;
        }
    }
    let total_missing: usize = df.get_columns().iter().map(|c| c.null_count()).sum();
    writeln!(out, "Total missing: {total_missing}\n")?;

    writeln!(out, "{rule}\nColumns\n{rule}\n")?;
    for (i, column) in df.get_columns().iter().enumerate() {
        let nulls = column.null_count();
        let pct = if height == 0 { 0.0 } else { nulls as f64 / height as f64 * 100.0 };
        writeln!(
            out,
            "{:3}. {:50} | {:20} | missing: {:5} ({:6.2}%)",
            i + 1,
            column.name().as_str(),
            column.dtype().to_string(),
            nulls,
            pct
        )?;
    }

    writeln!(out, "\n{rule}\nNumeric columns\n{rule}\n")?;
    writeln!(
        out,
        "{:50} {:>8} {:>14} {:>14} {:>14} {:>14}",
        "column", "count", "mean", "std", "min", "max"
    )?;
    for column in df.get_columns() {
        if !column.dtype().is_numeric() {
            continue;
        }
        let values = column.cast(&DataType::Float64)?;
        let values: Vec<Option<f64>> = values.f64()?.into_iter().collect();
        if let Some(d) = describe(&values) {
            writeln!(
                out,
                "{:50} {:>8} {:>14.4} {:>14.4} {:>14.4} {:>14.4}",
                column.name().as_str(),
                d.count,
                d.mean,
                d.std,
                d.min,
                d.max
            )?;
        }
    }
    Ok(out)
}

/// Write the column summary of `df` to `path`.
pub fn write_summary(df: &DataFrame, path: &Path) -> Result<()> {
    let text = render_summary("Master table summary", df)?;
    fs::write(path, text).with_context(|| format!("Failed to write summary: {}", path.display()))?;
    Ok(())
}
