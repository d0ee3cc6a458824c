//! Pipeline configuration.
//!
//! A pipeline file lists the sources in join order, the fill policy table and
//! the output location. Any key can be overridden from the environment with
//! the `INTEGRATOR` prefix and `__` as separator, e.g.
//! `INTEGRATOR__OUTPUT__PATH=/tmp/master.csv`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{IntegratorError, Result};

const ENV_PREFIX: &str = "INTEGRATOR";

/// Full pipeline description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Sources in join order; the first one anchors the date span
    pub sources: Vec<SourceConfig>,
    /// Fill policy table, applied in order after the merge
    #[serde(default)]
    pub fill: Vec<FillRule>,
    pub output: OutputConfig,
}

/// One input table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub path: PathBuf,
    /// Name of the column holding the source's date key
    pub date_column: String,
    #[serde(default)]
    pub frequency: Frequency,
    /// Start of the daily range a coarse source is expanded to
    #[serde(default)]
    pub expand_start: Option<NaiveDate>,
    /// Inclusive end of the expansion range
    #[serde(default)]
    pub expand_end: Option<NaiveDate>,
    /// Strategy used when expanding a coarse source to daily rows
    #[serde(default = "default_expand_fill")]
    pub expand_fill: FillStrategy,
    /// IANA timezone offset-carrying timestamps are converted to
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Timestamp column deciding which duplicate of a day is kept
    #[serde(default)]
    pub published_column: Option<String>,
    /// Per-day aggregations; when present they replace the duplicate tie-break
    #[serde(default)]
    pub aggregate: Vec<Aggregation>,
    /// Join used when this source is merged; defaults by position
    #[serde(default)]
    pub join: Option<JoinKind>,
    /// Value columns to keep; empty keeps all
    #[serde(default)]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Outer,
    Left,
    Inner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStrategy {
    Interpolate,
    ForwardFill,
    Zero,
    LeaveMissing,
}

/// A column family and how its gaps are filled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillRule {
    pub family: String,
    pub strategy: FillStrategy,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub prefix: Option<String>,
}

impl FillRule {
    pub fn matches(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
            || self
                .prefix
                .as_deref()
                .is_some_and(|p| !p.is_empty() && column.starts_with(p))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggOp {
    Sum,
    Mean,
    Max,
    Min,
    Count,
    /// Rows whose column equals `value`
    CountEq,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregation {
    pub column: String,
    pub op: AggOp,
    pub alias: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub format: OutputFormat,
    /// Plain-text column summary
    #[serde(default)]
    pub summary_path: Option<PathBuf>,
    /// JSON integration report
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

fn default_timezone() -> String {
    "UTC".into()
}

fn default_expand_fill() -> FillStrategy {
    FillStrategy::ForwardFill
}

impl SourceConfig {
    /// Minimal daily source, used by tests and programmatic callers
    pub fn daily(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        date_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            date_column: date_column.into(),
            frequency: Frequency::Daily,
            expand_start: None,
            expand_end: None,
            expand_fill: default_expand_fill(),
            timezone: default_timezone(),
            published_column: None,
            aggregate: Vec::new(),
            join: None,
            columns: Vec::new(),
        }
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| IntegratorError::UnknownTimezone(self.timezone.clone()))
    }

    /// Join used for this source at merge step `position` (0 = anchor)
    pub fn join_kind(&self, position: usize) -> JoinKind {
        self.join.unwrap_or(if position <= 1 { JoinKind::Outer } else { JoinKind::Left })
    }
}

impl PipelineConfig {
    /// Load a pipeline file, apply environment overrides and validate.
    ///
    /// Relative source and output paths are resolved against the directory
    /// holding the file.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: PipelineConfig = settings.try_deserialize()?;
        if let Some(base) = path.parent() {
            cfg.resolve_paths(base);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        for source in &mut self.sources {
            resolve(&mut source.path);
        }
        resolve(&mut self.output.path);
        if let Some(p) = self.output.summary_path.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.output.report_path.as_mut() {
            resolve(p);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(IntegratorError::Config("no sources configured".into()));
        }
        let mut names = HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return Err(IntegratorError::Config(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
            if source.date_column.trim().is_empty() {
                return Err(IntegratorError::Config(format!(
                    "source '{}' has an empty date column",
                    source.name
                )));
            }
            source.tz()?;
            if let (Some(start), Some(end)) = (source.expand_start, source.expand_end) {
                if start > end {
                    return Err(IntegratorError::InvalidRange { start, end });
                }
            }
            for agg in &source.aggregate {
                if agg.op == AggOp::CountEq && agg.value.is_none() {
                    return Err(IntegratorError::Config(format!(
                        "aggregation '{}' of source '{}' needs a value",
                        agg.alias, source.name
                    )));
                }
            }
        }
        for rule in &self.fill {
            if rule.columns.is_empty() && rule.prefix.as_deref().unwrap_or("").is_empty() {
                return Err(IntegratorError::Config(format!(
                    "fill family '{}' selects no columns",
                    rule.family
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn strategy(cfg: &PipelineConfig, column: &str) -> Option<FillStrategy> {
        cfg.fill
            .iter()
            .find(|rule| rule.matches(column))
            .map(|rule| rule.strategy)
    }

    const PIPELINE: &str = r#"
[[sources]]
name = "features"
path = "features.csv"
date_column = "date"

[[sources]]
name = "m2"
path = "m2.csv"
date_column = "Date"
frequency = "monthly"
expand_start = "2025-09-01"
expand_end = "2025-11-01"

[[sources]]
name = "sns"
path = "sns.csv"
date_column = "STD_DATE"
timezone = "Asia/Seoul"

[[sources.aggregate]]
column = "engagement"
op = "sum"
alias = "sns_engagement_total"

[[sources.aggregate]]
column = "platform"
op = "count_eq"
value = "YouTube"
alias = "sns_youtube_count"

[[fill]]
family = "activity"
strategy = "zero"
prefix = "sns_"

[[fill]]
family = "macro"
strategy = "interpolate"
columns = ["Yield_10Y", "USD_Index"]

[output]
path = "out/master.csv"
"#;

    #[test]
    fn load_pipeline_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{PIPELINE}").unwrap();
        drop(file);

        let cfg = PipelineConfig::load(&path).unwrap();
        assert_eq!(cfg.sources.len(), 3);
        assert_eq!(cfg.sources[1].frequency, Frequency::Monthly);
        assert_eq!(cfg.sources[1].expand_fill, FillStrategy::ForwardFill);
        assert_eq!(
            cfg.sources[1].expand_start,
            NaiveDate::from_ymd_opt(2025, 9, 1)
        );
        assert_eq!(cfg.sources[2].aggregate.len(), 2);
        assert_eq!(cfg.sources[2].aggregate[1].op, AggOp::CountEq);
        assert!(cfg.sources[0].path.starts_with(dir.path()));
        assert_eq!(cfg.output.path, dir.path().join("out/master.csv"));
        assert_eq!(cfg.output.format, OutputFormat::Csv);
        assert_eq!(strategy(&cfg, "sns_post_count"), Some(FillStrategy::Zero));
        assert_eq!(strategy(&cfg, "USD_Index"), Some(FillStrategy::Interpolate));
        assert_eq!(strategy(&cfg, "BTC_Price"), None);
    }

    #[test]
    fn example_pipeline_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/pipeline.example.toml");
        let cfg = PipelineConfig::load(&path).unwrap();
        assert_eq!(cfg.sources.len(), 4);
        assert_eq!(strategy(&cfg, "M2SL"), Some(FillStrategy::ForwardFill));
        assert_eq!(strategy(&cfg, "BTC_Price_Speed"), Some(FillStrategy::Zero));
        assert_eq!(strategy(&cfg, "sns_video_count"), Some(FillStrategy::Zero));
    }

    #[test]
    fn join_defaults_by_position() {
        let mut source = SourceConfig::daily("a", "a.csv", "date");
        assert_eq!(source.join_kind(0), JoinKind::Outer);
        assert_eq!(source.join_kind(1), JoinKind::Outer);
        assert_eq!(source.join_kind(2), JoinKind::Left);
        source.join = Some(JoinKind::Inner);
        assert_eq!(source.join_kind(2), JoinKind::Inner);
    }

    #[test]
    fn validation_rejects_bad_configs() {
        let output = OutputConfig {
            path: "master.csv".into(),
            format: OutputFormat::Csv,
            summary_path: None,
            report_path: None,
        };
        let mut cfg = PipelineConfig { sources: vec![], fill: vec![], output };
        assert!(matches!(cfg.validate(), Err(IntegratorError::Config(_))));

        cfg.sources = vec![
            SourceConfig::daily("a", "a.csv", "date"),
            SourceConfig::daily("a", "b.csv", "date"),
        ];
        assert!(matches!(cfg.validate(), Err(IntegratorError::Config(_))));

        cfg.sources.pop();
        cfg.sources[0].timezone = "Mars/Olympus".into();
        assert!(matches!(cfg.validate(), Err(IntegratorError::UnknownTimezone(_))));

        cfg.sources[0].timezone = "UTC".into();
        cfg.sources[0].expand_start = NaiveDate::from_ymd_opt(2025, 10, 1);
        cfg.sources[0].expand_end = NaiveDate::from_ymd_opt(2025, 9, 1);
        assert!(matches!(cfg.validate(), Err(IntegratorError::InvalidRange { .. })));

        cfg.sources[0].expand_end = None;
        assert!(cfg.validate().is_ok());
    }
}
