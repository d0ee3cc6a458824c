use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

/// Errors surfaced by the integrator.
///
/// Per-source variants are recoverable: the integrator turns them into
/// skipped-source entries. `EmptyMerge` and `Config` stop the run.
#[derive(Error, Debug)]
pub enum IntegratorError {
    #[error("source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("date column '{column}' not present in {}", .path.display())]
    MissingDateColumn { column: String, path: PathBuf },

    #[error("column 'date' already exists and is not the configured date column '{0}'")]
    DateColumnConflict(String),

    #[error("column '{column}' required by source '{source_name}' is missing")]
    MissingColumn { source_name: String, column: String },

    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),

    #[error("invalid expansion range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("source '{0}' has no dated rows")]
    NoDatedRows(String),

    #[error("merge produced zero rows ({0})")]
    EmptyMerge(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    ConfigLoad(#[from] config::ConfigError),

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IntegratorError>;
