// Write the master table as CSV (default) or Parquet, and read it back with
// the `date` column restored to a polars `Date`.

use std::fs::{self, File};
use std::path::Path;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use polars::prelude::*;
use tracing::info;

use crate::config::OutputFormat;
use crate::loader::{canonicalize, read_csv, DATE_COL};

fn create_output(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }
    File::create(path).with_context(|| format!("Failed to create output file: {}", path.display()))
}

/// Save a DataFrame as CSV with a header row; `Date` columns are written as `YYYY-MM-DD`.
pub fn write_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    let mut file = create_output(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(df)
        .context("Failed to write CSV data")?;
    Ok(())
}

/// Save a DataFrame to a Parquet file
pub fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<()> {
    let file = create_output(path)?;
    ParquetWriter::new(file)
        .with_compression(ParquetCompression::Zstd(None))
        .finish(df)
        .context("Failed to write Parquet data")?;
    Ok(())
}

/// Load a DataFrame from a Parquet file
pub fn read_parquet(path: &Path) -> Result<DataFrame> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open Parquet file: {}", path.display()))?;
    let df = ParquetReader::new(file)
        .finish()
        .context("Failed to read Parquet data")?;
    Ok(df)
}

pub fn write_master(df: &mut DataFrame, path: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Csv => write_csv(df, path)?,
        OutputFormat::Parquet => write_parquet(df, path)?,
    }
    info!(path = %path.display(), rows = df.height(), ?format, "wrote master table");
    Ok(())
}

/// Read a master table written by [`write_master`].
///
/// CSV carries no types: columns are re-inferred and an all-empty column comes
/// back as text. Use [`read_master_as`] when the written schema is known.
pub fn read_master(path: &Path, format: OutputFormat) -> Result<DataFrame> {
    match format {
        OutputFormat::Parquet => read_parquet(path),
        OutputFormat::Csv => {
            let raw = read_csv(path)?;
            Ok(canonicalize("master", raw, DATE_COL, &Tz::UTC)?.df)
        }
    }
}

/// Read a master table and cast its columns back to `schema`.
pub fn read_master_as(path: &Path, format: OutputFormat, schema: &Schema) -> Result<DataFrame> {
    let mut df = read_master(path, format)?;
    for (name, dtype) in schema.iter() {
        let restored = match df.column(name.as_str()) {
            Ok(column) if column.dtype() != dtype => column
                .cast(dtype)
                .with_context(|| format!("Failed to restore column {name} as {dtype}"))?,
            _ => continue,
        };
        df.with_column(restored)?;
    }
    Ok(df)
}
