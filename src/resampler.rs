use chrono::{Duration, NaiveDate};
use polars::prelude::*;
use tracing::debug;

use crate::config::{AggOp, Aggregation, FillStrategy, Frequency};
use crate::dates::month_end;
use crate::error::{IntegratorError, Result};
use crate::fill::fill_column;
use crate::loader::{date_series, dedupe_earliest, read_dates, SourceTable, DATE_COL};

/// Last day covered by an observation made on `date`.
pub fn period_end(date: NaiveDate, frequency: Frequency) -> NaiveDate {
    match frequency {
        Frequency::Daily => date,
        Frequency::Weekly => date + Duration::days(6),
        Frequency::Monthly => month_end(date),
    }
}

/// Every calendar day from `start` to `end`, both included.
pub fn daily_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Expand a coarse source to one row per calendar day.
///
/// The range defaults to the first observation through the end of the last
/// observation's period. Several observations on one date collapse to the
/// first one. Days without an observation are filled with
/// `fill` (forward-fill for reported aggregates). A daily source without an
/// explicit range only loses its duplicate dates.
pub fn expand_to_daily(
    table: &SourceTable,
    frequency: Frequency,
    fill: FillStrategy,
    range: (Option<NaiveDate>, Option<NaiveDate>),
) -> Result<DataFrame> {
    // One observation per date, first in file order.
    let mut deduped = table.clone();
    dedupe_earliest(&mut deduped, None)?;
    if frequency == Frequency::Daily && range == (None, None) {
        return Ok(deduped.df);
    }

    let observed = deduped
        .df
        .lazy()
        .filter(col(DATE_COL).is_not_null())
        .sort([DATE_COL], SortMultipleOptions::default())
        .collect()?;

    let known: Vec<NaiveDate> = read_dates(&observed)?.into_iter().flatten().collect();
    let (start, end) = match (range, known.first(), known.last()) {
        ((Some(start), Some(end)), _, _) => (start, end),
        ((start, end), Some(first), Some(last)) => (
            start.unwrap_or(*first),
            end.unwrap_or_else(|| period_end(*last, frequency)),
        ),
        _ => return Err(IntegratorError::NoDatedRows(table.name.clone())),
    };
    if start > end {
        return Err(IntegratorError::InvalidRange { start, end });
    }

    // Observations before `start` still seed the forward fill.
    let seed_start = known.first().map_or(start, |first| start.min(*first));
    let days: Vec<Option<NaiveDate>> = daily_range(seed_start, end).into_iter().map(Some).collect();
    let target = DataFrame::new(vec![date_series(DATE_COL, &days)?.into_column()])?;

    let mut expanded = target
        .lazy()
        .join(
            observed.lazy(),
            [col(DATE_COL)],
            [col(DATE_COL)],
            JoinArgs::new(JoinType::Left),
        )
        .sort([DATE_COL], SortMultipleOptions::default())
        .collect()?;

    let value_columns: Vec<String> = expanded
        .get_column_names()
        .into_iter()
        .filter(|n| n.as_str() != DATE_COL)
        .map(|n| n.to_string())
        .collect();
    for column in &value_columns {
        fill_column(&mut expanded, column, fill)?;
    }
    let skip = (start - seed_start).num_days();
    let expanded = expanded.slice(skip, daily_range(start, end).len());

    debug!(
        source = %table.name,
        observed = known.len(),
        expanded = expanded.height(),
        %start,
        %end,
        "expanded to daily rows"
    );
    Ok(expanded)
}

fn aggregation_expr(agg: &Aggregation) -> Expr {
    let c = col(agg.column.as_str());
    let expr = match agg.op {
        AggOp::Sum => c.sum(),
        AggOp::Mean => c.mean(),
        AggOp::Max => c.max(),
        AggOp::Min => c.min(),
        AggOp::Count => c.count().cast(DataType::Int64),
        AggOp::CountEq => c
            .cast(DataType::String)
            .eq(lit(agg.value.clone().unwrap_or_default()))
            .sum()
            .cast(DataType::Int64),
    };
    expr.alias(agg.alias.as_str())
}

/// Collapse a many-rows-per-day source into one row per canonical date.
/// Rows without a date cannot be placed and are left out.
pub fn aggregate_daily(table: &SourceTable, aggregations: &[Aggregation]) -> Result<DataFrame> {
    for agg in aggregations {
        if table.df.column(&agg.column).is_err() {
            return Err(IntegratorError::MissingColumn {
                source_name: table.name.clone(),
                column: agg.column.clone(),
            });
        }
    }

    let exprs: Vec<Expr> = aggregations.iter().map(aggregation_expr).collect();
    let daily = table
        .df
        .clone()
        .lazy()
        .filter(col(DATE_COL).is_not_null())
        .group_by([col(DATE_COL)])
        .agg(exprs)
        .sort([DATE_COL], SortMultipleOptions::default())
        .collect()?;

    debug!(
        source = %table.name,
        rows = table.df.height(),
        days = daily.height(),
        "aggregated per day"
    );
    Ok(daily)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;
    use polars::df;

    use crate::loader::canonicalize;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn agg(column: &str, op: AggOp, alias: &str, value: Option<&str>) -> Aggregation {
        Aggregation {
            column: column.into(),
            op,
            alias: alias.into(),
            value: value.map(Into::into),
        }
    }

    fn monthly_table() -> SourceTable {
        let df = df!(
            "Date" => ["2025-09-01", "2025-10-01"],
            "M2SL" => [100.0, 105.0]
        )
        .unwrap();
        canonicalize("m2", df, "Date", &Tz::UTC).unwrap()
    }

    #[test]
    fn test_period_end_and_range() {
        assert_eq!(period_end(ymd(2025, 9, 1), Frequency::Monthly), ymd(2025, 9, 30));
        assert_eq!(period_end(ymd(2025, 9, 1), Frequency::Weekly), ymd(2025, 9, 7));
        assert_eq!(daily_range(ymd(2025, 9, 29), ymd(2025, 10, 2)).len(), 4);
        assert!(daily_range(ymd(2025, 9, 2), ymd(2025, 9, 1)).is_empty());
    }

    #[test]
    fn test_monthly_forward_fill() {
        let table = monthly_table();
        let daily = expand_to_daily(
            &table,
            Frequency::Monthly,
            FillStrategy::ForwardFill,
            (None, None),
        )
        .unwrap();

        assert_eq!(daily.height(), 61);
        let dates = read_dates(&daily).unwrap();
        assert_eq!(dates[0], Some(ymd(2025, 9, 1)));
        assert_eq!(dates[60], Some(ymd(2025, 10, 31)));
        let m2: Vec<_> = daily.column("M2SL").unwrap().f64().unwrap().into_iter().collect();
        assert!(m2[..30].iter().all(|v| *v == Some(100.0)));
        assert!(m2[30..].iter().all(|v| *v == Some(105.0)));
    }

    #[test]
    fn test_single_month_in_explicit_range() {
        let df = df!("Date" => ["2025-02-01"], "CPI" => [3.1]).unwrap();
        let table = canonicalize("cpi", df, "Date", &Tz::UTC).unwrap();
        let daily = expand_to_daily(
            &table,
            Frequency::Monthly,
            FillStrategy::ForwardFill,
            (Some(ymd(2025, 2, 1)), Some(ymd(2025, 2, 28))),
        )
        .unwrap();
        assert_eq!(daily.height(), 28);
        assert_eq!(daily.column("CPI").unwrap().null_count(), 0);
    }

    #[test]
    fn test_leading_days_stay_missing() {
        let table = monthly_table();
        let daily = expand_to_daily(
            &table,
            Frequency::Monthly,
            FillStrategy::ForwardFill,
            (Some(ymd(2025, 8, 30)), Some(ymd(2025, 9, 2))),
        )
        .unwrap();
        let m2: Vec<_> = daily.column("M2SL").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(m2, vec![None, None, Some(100.0), Some(100.0)]);
    }

    #[test]
    fn test_earlier_observation_seeds_range() {
        let table = monthly_table();
        let daily = expand_to_daily(
            &table,
            Frequency::Monthly,
            FillStrategy::ForwardFill,
            (Some(ymd(2025, 10, 15)), Some(ymd(2025, 11, 1))),
        )
        .unwrap();
        assert_eq!(daily.height(), 18);
        assert_eq!(read_dates(&daily).unwrap()[0], Some(ymd(2025, 10, 15)));
        let m2: Vec<_> = daily.column("M2SL").unwrap().f64().unwrap().into_iter().collect();
        assert!(m2.iter().all(|v| *v == Some(105.0)));
    }

    #[test]
    fn test_duplicate_observation_yields_one_row_per_day() {
        let df = df!(
            "Date" => ["2025-09-01", "2025-09-01"],
            "M2SL" => [100.0, 101.0]
        )
        .unwrap();
        let table = canonicalize("m2", df, "Date", &Tz::UTC).unwrap();
        let daily = expand_to_daily(
            &table,
            Frequency::Monthly,
            FillStrategy::ForwardFill,
            (None, None),
        )
        .unwrap();

        let dates = read_dates(&daily).unwrap();
        let unique: std::collections::HashSet<_> = dates.iter().collect();
        assert_eq!(daily.height(), 30);
        assert_eq!(unique.len(), 30);
        let m2 = daily.column("M2SL").unwrap().f64().unwrap();
        assert!(m2.into_iter().all(|v| v == Some(100.0)));

        let out = expand_to_daily(
            &table,
            Frequency::Daily,
            FillStrategy::ForwardFill,
            (None, None),
        )
        .unwrap();
        assert_eq!(out.height(), 1);
    }

    #[test]
    fn test_daily_without_range_passes_through() {
        let table = monthly_table();
        let out = expand_to_daily(
            &table,
            Frequency::Daily,
            FillStrategy::ForwardFill,
            (None, None),
        )
        .unwrap();
        assert_eq!(out.height(), 2);
    }

    #[test]
    fn test_aggregate_daily() {
        let df = df!(
            "STD_DATE" => ["20251010", "20251010", "20251011", "N/A"],
            "engagement" => [10.0, 30.0, 5.0, 99.0],
            "platform" => ["YouTube", "X", "YouTube", "YouTube"]
        )
        .unwrap();
        let table = canonicalize("sns", df, "STD_DATE", &Tz::UTC).unwrap();
        let aggs = vec![
            agg("engagement", AggOp::Sum, "sns_engagement_total", None),
            agg("engagement", AggOp::Max, "sns_engagement_max", None),
            agg("engagement", AggOp::Count, "sns_post_count", None),
            agg("platform", AggOp::CountEq, "sns_youtube_count", Some("YouTube")),
        ];
        let daily = aggregate_daily(&table, &aggs).unwrap();

        assert_eq!(daily.height(), 2);
        let floats = |name: &str| -> Vec<Option<f64>> {
            daily.column(name).unwrap().f64().unwrap().into_iter().collect()
        };
        let ints = |name: &str| -> Vec<Option<i64>> {
            daily.column(name).unwrap().i64().unwrap().into_iter().collect()
        };
        assert_eq!(floats("sns_engagement_total"), vec![Some(40.0), Some(5.0)]);
        assert_eq!(floats("sns_engagement_max"), vec![Some(30.0), Some(5.0)]);
        assert_eq!(ints("sns_post_count"), vec![Some(2), Some(1)]);
        assert_eq!(ints("sns_youtube_count"), vec![Some(1), Some(1)]);
    }

    #[test]
    fn test_aggregate_missing_column() {
        let table = monthly_table();
        let aggs = vec![agg("nope", AggOp::Sum, "x", None)];
        assert!(matches!(
            aggregate_daily(&table, &aggs),
            Err(IntegratorError::MissingColumn { .. })
        ));
    }
}
