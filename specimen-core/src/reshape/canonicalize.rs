//! Long-format frame construction and canonicalization (dedupe + stable sort).

use crate::domain::RegionSeries;
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

pub const DATE_COL: &str = "date";
pub const AREA_CODE_COL: &str = "areaCode";
pub const AREA_NAME_COL: &str = "areaName";

/// Polars `Date` is days since 1970-01-01.
pub(crate) fn to_epoch_days(date: NaiveDate) -> i32 {
    (date - NaiveDate::default()).num_days() as i32
}

pub(crate) fn from_epoch_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::default().checked_add_signed(chrono::Duration::days(days as i64))
}

/// Every metric name captured by at least one record.
pub fn metric_names(series: &[RegionSeries]) -> BTreeSet<&str> {
    series
        .iter()
        .flat_map(|s| s.records.iter())
        .flat_map(|r| r.metrics.keys().map(String::as_str))
        .collect()
}

/// Concatenate all series into one long frame.
///
/// Columns: `date` (Int32, epoch days), `areaCode`, `areaName`, then one
/// Float64 column per captured metric, null where a record lacks it.
pub fn long_frame(series: &[RegionSeries]) -> PolarsResult<DataFrame> {
    let n: usize = series.iter().map(|s| s.records.len()).sum();
    let names = metric_names(series);

    let mut dates: Vec<i32> = Vec::with_capacity(n);
    let mut codes: Vec<&str> = Vec::with_capacity(n);
    let mut area_names: Vec<Option<&str>> = Vec::with_capacity(n);
    let mut metrics: BTreeMap<&str, Vec<Option<f64>>> = names
        .iter()
        .map(|name| (*name, Vec::with_capacity(n)))
        .collect();

    for record in series.iter().flat_map(|s| s.records.iter()) {
        dates.push(to_epoch_days(record.date));
        codes.push(record.area_code.as_str());
        area_names.push(record.area_name.as_deref());
        for (name, values) in metrics.iter_mut() {
            values.push(record.metrics.get(*name).copied().flatten());
        }
    }

    let mut columns: Vec<Column> = vec![
        Series::new(DATE_COL.into(), dates).into(),
        Series::new(AREA_CODE_COL.into(), codes).into(),
        Series::new(AREA_NAME_COL.into(), area_names).into(),
    ];
    for (name, values) in metrics {
        columns.push(Series::new(name.into(), values).into());
    }

    DataFrame::new(columns)
}

/// Drop exact-duplicate rows and sort by date.
///
/// Both steps keep the original relative order of the surviving rows, so the
/// result is deterministic for a given input order.
pub fn canonicalize(df: LazyFrame) -> LazyFrame {
    df.unique_stable(None, UniqueKeepStrategy::First).sort(
        [DATE_COL],
        SortMultipleOptions::default().with_maintain_order(true),
    )
}
