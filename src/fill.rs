use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{FillRule, FillStrategy};
use crate::error::Result;
use crate::loader::DATE_COL;

// === Kernels =============================================================

/// Linear interpolation between known values by row position. Gaps before
/// the first and after the last known value take that value. A column with
/// no known value is left untouched.
pub fn interpolate_linear(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let known: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.filter(|x| !x.is_nan()).map(|x| (i, x)))
        .collect();
    let (Some(&(first_idx, first)), Some(&(last_idx, last))) = (known.first(), known.last()) else {
        return values.to_vec();
    };

    let mut out = Vec::with_capacity(values.len());
    let mut segment = 0usize;
    for i in 0..values.len() {
        if i <= first_idx {
            out.push(Some(first));
            continue;
        }
        if i >= last_idx {
            out.push(Some(last));
            continue;
        }
        while known[segment + 1].0 < i {
            segment += 1;
        }
        let (x0, y0) = known[segment];
        let (x1, y1) = known[segment + 1];
        if i == x1 {
            out.push(Some(y1));
        } else {
            let t = (i - x0) as f64 / (x1 - x0) as f64;
            out.push(Some(y0 + (y1 - y0) * t));
        }
    }
    out
}

// === DataFrame application ===============================================

/// Fill the gaps of one column in place. Returns how many values were filled.
pub fn fill_column(df: &mut DataFrame, column: &str, strategy: FillStrategy) -> Result<usize> {
    let current = df.column(column)?.as_materialized_series().clone();
    let before = current.null_count();
    if before == 0 || strategy == FillStrategy::LeaveMissing {
        return Ok(0);
    }

    let filled = match strategy {
        FillStrategy::ForwardFill => current.fill_null(FillNullStrategy::Forward(None))?,
        FillStrategy::Zero if current.dtype().is_numeric() => {
            current.fill_null(FillNullStrategy::Zero)?
        }
        FillStrategy::Interpolate if current.dtype().is_numeric() => {
            let values = current.cast(&DataType::Float64)?;
            let values: Vec<Option<f64>> = values.f64()?.into_iter().collect();
            Series::new(column.into(), interpolate_linear(&values))
        }
        _ => {
            warn!(
                column,
                ?strategy,
                dtype = %current.dtype(),
                "strategy does not apply to column type"
            );
            return Ok(0);
        }
    };

    let after = filled.null_count();
    df.with_column(filled)?;
    Ok(before - after)
}

/// What the policy table did to one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillOutcome {
    pub column: String,
    pub family: String,
    pub strategy: FillStrategy,
    pub filled: usize,
}

/// Apply the policy table to every column except `date`; the first matching
/// rule decides. Columns without a rule keep their missing values.
pub fn apply_fill_rules(df: &mut DataFrame, rules: &[FillRule]) -> Result<Vec<FillOutcome>> {
    let names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .filter(|n| n.as_str() != DATE_COL)
        .map(|n| n.to_string())
        .collect();

    let mut outcomes = Vec::new();
    for name in names {
        let Some(rule) = rules.iter().find(|r| r.matches(&name)) else {
            continue;
        };
        let filled = fill_column(df, &name, rule.strategy)?;
        if filled > 0 {
            debug!(column = %name, family = %rule.family, filled, "filled missing values");
        }
        outcomes.push(FillOutcome {
            column: name,
            family: rule.family.clone(),
            strategy: rule.strategy,
            filled,
        });
    }
    Ok(outcomes)
}
