//! Long-to-wide reshape of collected region series.
//!
//! 1. concatenate every series into one long frame
//! 2. drop exact-duplicate rows
//! 3. stable sort by date
//! 4. pivot: one row per distinct date, one column per distinct area code,
//!    cell = covariate value, absent pair = missing (never zero)
//!
//! Two surviving rows for the same (date, area code) with different covariate
//! values cannot be pivoted unambiguously; [`ConflictPolicy`] decides what
//! happens, always deterministically.

pub mod canonicalize;
pub mod matrix;

pub use canonicalize::{canonicalize, long_frame};
pub use matrix::{CellConflict, MatrixShapeError, WideMatrix};

use crate::config::ConfigError;
use crate::domain::structure::RESERVED_NAMES;
use crate::domain::{RegionId, RegionSeries};
use canonicalize::{from_epoch_days, metric_names, AREA_CODE_COL, DATE_COL};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// What to do with conflicting values for one (date, region) cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Fail the reshape with [`ReshapeError::ConflictingValues`].
    #[default]
    Reject,
    /// Keep the first value in canonical order.
    KeepFirst,
    /// Mean of the non-missing values.
    Mean,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictPolicy::Reject => "reject",
            ConflictPolicy::KeepFirst => "keep-first",
            ConflictPolicy::Mean => "mean",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ConflictPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(ConflictPolicy::Reject),
            "keep-first" | "keep_first" | "first" => Ok(ConflictPolicy::KeepFirst),
            "mean" => Ok(ConflictPolicy::Mean),
            other => Err(ConfigError::UnknownConflictPolicy(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReshapeError {
    #[error("covariate '{0}' is not present in the collected records")]
    UnknownCovariate(String),

    #[error(
        "{count} cell(s) have conflicting values; first: {region} on {date} has {values:?}"
    )]
    ConflictingValues {
        count: usize,
        date: NaiveDate,
        region: RegionId,
        values: Vec<Option<f64>>,
    },

    #[error("metric '{0}' collides with a key column of the long frame")]
    ReservedMetricName(String),

    #[error("invalid date in long frame: {0} days from epoch")]
    InvalidDate(i32),

    #[error(transparent)]
    Matrix(#[from] MatrixShapeError),

    #[error("dataframe error: {0}")]
    Frame(#[from] PolarsError),
}

/// Pivot collected series into a wide matrix of `covariate`.
pub fn reshape(
    series: &[RegionSeries],
    covariate: &str,
    policy: ConflictPolicy,
) -> Result<WideMatrix, ReshapeError> {
    if series.iter().all(|s| s.records.is_empty()) {
        return Ok(WideMatrix::empty(covariate));
    }
    let names = metric_names(series);
    if let Some(name) = names.iter().find(|n| RESERVED_NAMES.contains(*n)) {
        return Err(ReshapeError::ReservedMetricName(name.to_string()));
    }
    if !names.contains(covariate) {
        return Err(ReshapeError::UnknownCovariate(covariate.to_string()));
    }

    let long = canonicalize(long_frame(series)?.lazy()).collect()?;

    // Distinct covariate values per cell, in canonical order.
    let mut cells: BTreeMap<(NaiveDate, &str), Vec<Option<f64>>> = BTreeMap::new();
    let days = long.column(DATE_COL)?.i32()?;
    let codes = long.column(AREA_CODE_COL)?.str()?;
    let values = long.column(covariate)?.f64()?;

    for ((day, code), value) in days.into_iter().zip(codes.into_iter()).zip(values.into_iter()) {
        // date and areaCode are built from non-optional fields
        let (Some(day), Some(code)) = (day, code) else {
            continue;
        };
        let date = from_epoch_days(day).ok_or(ReshapeError::InvalidDate(day))?;
        let seen = cells.entry((date, code)).or_default();
        if !seen.contains(&value) {
            seen.push(value);
        }
    }

    let dates: Vec<NaiveDate> = cells
        .keys()
        .map(|(d, _)| *d)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let columns: Vec<&str> = cells
        .keys()
        .map(|(_, c)| *c)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let conflict_count = cells.values().filter(|v| v.len() > 1).count();
    if conflict_count > 0 && policy == ConflictPolicy::Reject {
        if let Some(((date, code), vals)) = cells.iter().find(|(_, v)| v.len() > 1) {
            return Err(ReshapeError::ConflictingValues {
                count: conflict_count,
                date: *date,
                region: RegionId::new(*code),
                values: vals.clone(),
            });
        }
    }

    let col_index: BTreeMap<&str, usize> =
        columns.iter().enumerate().map(|(i, c)| (*c, i)).collect();
    let mut grid = vec![vec![None; columns.len()]; dates.len()];
    let mut conflicts = Vec::new();
    let mut row = 0;

    // cells iterate in (date, code) order, so rows advance monotonically
    for ((date, code), vals) in &cells {
        while dates[row] != *date {
            row += 1;
        }
        let resolved = resolve(vals, policy);
        if vals.len() > 1 {
            warn!(
                %date,
                region = code,
                values = ?vals,
                resolved = ?resolved,
                %policy,
                "conflicting values for one cell"
            );
            conflicts.push(CellConflict {
                date: *date,
                region: RegionId::new(*code),
                values: vals.clone(),
                resolved,
            });
        }
        grid[row][col_index[code]] = resolved;
    }

    let columns = columns.into_iter().map(RegionId::new).collect();
    Ok(WideMatrix::new(covariate, dates, columns, grid)?.with_conflicts(conflicts))
}

fn resolve(values: &[Option<f64>], policy: ConflictPolicy) -> Option<f64> {
    match policy {
        ConflictPolicy::Reject | ConflictPolicy::KeepFirst => values.first().copied().flatten(),
        ConflictPolicy::Mean => {
            let present: Vec<f64> = values.iter().flatten().copied().collect();
            if present.is_empty() {
                None
            } else {
                Some(present.iter().sum::<f64>() / present.len() as f64)
            }
        }
    }
}
