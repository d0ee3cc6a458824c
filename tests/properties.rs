use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate};
use chrono_tz::Tz;
use polars::prelude::*;
use proptest::prelude::*;
use temporal_integrator::config::{FillStrategy, Frequency};
use temporal_integrator::loader::{canonicalize, date_series, read_dates, DATE_COL};
use temporal_integrator::normalize_date;
use temporal_integrator::resampler::{daily_range, expand_to_daily};

fn any_date() -> impl Strategy<Value = NaiveDate> {
    (1000i32..=9999, 1u32..=12, 1u32..=31).prop_filter_map("valid calendar day", |(y, m, d)| {
        NaiveDate::from_ymd_opt(y, m, d)
    })
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

    #[test]
    fn compact_text_and_integer_agree(date in any_date()) {
        let text = date.format("%Y%m%d").to_string();
        let int: i64 = text.parse().unwrap();
        prop_assert_eq!(normalize_date(text.as_str()), normalize_date(int));
        prop_assert_eq!(normalize_date(int), Some(date));
    }

    #[test]
    fn arbitrary_text_never_panics(s in "\\PC{0,24}") {
        let _ = normalize_date(s.as_str());
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

    #[test]
    fn monthly_expansion_covers_every_day_once(
        start in any_date().prop_map(|d| d.with_day(1).unwrap()),
        months in 1usize..6,
    ) {
        let mut firsts = vec![start];
        for _ in 1..months {
            let last = *firsts.last().unwrap();
            let next = (last + Duration::days(32)).with_day(1).unwrap();
            firsts.push(next);
        }
        let values: Vec<f64> = (0..firsts.len()).map(|i| i as f64).collect();
        let dates: Vec<Option<NaiveDate>> = firsts.iter().copied().map(Some).collect();
        let df = DataFrame::new(vec![
            date_series("Date", &dates).unwrap().into_column(),
            Series::new("value".into(), values).into_column(),
        ])
        .unwrap();
        let table = canonicalize("monthly", df, "Date", &Tz::UTC).unwrap();

        let expanded = expand_to_daily(
            &table,
            Frequency::Monthly,
            FillStrategy::ForwardFill,
            (None, None),
        )
        .unwrap();
        let got: Vec<NaiveDate> = read_dates(&expanded)
            .unwrap()
            .into_iter()
            .map(|d| d.unwrap())
            .collect();
        let unique: BTreeSet<NaiveDate> = got.iter().copied().collect();

        let end = firsts.last().unwrap();
        let expected = daily_range(start, temporal_integrator::dates::month_end(*end));
        prop_assert_eq!(unique.len(), got.len());
        prop_assert_eq!(got, expected);
        prop_assert_eq!(expanded.column("value").unwrap().null_count(), 0);
        prop_assert!(expanded.column(DATE_COL).is_ok());
    }
}
