//! The wide output matrix: one row per date, one column per region.

use super::canonicalize::{to_epoch_days, DATE_COL};
use crate::domain::RegionId;
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// A (date, region) cell that had more than one distinct covariate value
/// after deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellConflict {
    pub date: NaiveDate,
    pub region: RegionId,
    /// Distinct values in canonical (date-sorted, input) order.
    pub values: Vec<Option<f64>>,
    /// Value written to the cell.
    pub resolved: Option<f64>,
}

/// A grid that violates the matrix invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatrixShapeError {
    #[error("dates are not strictly ascending at row {0}")]
    UnsortedDates(usize),

    #[error("columns are not strictly ascending at column {0}")]
    UnsortedColumns(usize),

    #[error("{rows} value rows for {dates} dates")]
    RowCount { rows: usize, dates: usize },

    #[error("row {row} has {len} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        len: usize,
        expected: usize,
    },
}

/// Dates × regions matrix of one covariate.
///
/// - `dates` is strictly ascending and covers every date seen in any input.
/// - `columns` is strictly ascending by region code.
/// - `values` has one row per date, each with one cell per column. A cell is
///   `None` where the region reported nothing for that date (or reported
///   null). A reported zero is `Some(0.0)`.
///
/// The invariants are checked on construction and on deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MatrixParts")]
pub struct WideMatrix {
    covariate: String,
    dates: Vec<NaiveDate>,
    columns: Vec<RegionId>,
    values: Vec<Vec<Option<f64>>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    conflicts: Vec<CellConflict>,
}

#[derive(Deserialize)]
struct MatrixParts {
    covariate: String,
    dates: Vec<NaiveDate>,
    columns: Vec<RegionId>,
    values: Vec<Vec<Option<f64>>>,
    #[serde(default)]
    conflicts: Vec<CellConflict>,
}

impl TryFrom<MatrixParts> for WideMatrix {
    type Error = MatrixShapeError;

    fn try_from(p: MatrixParts) -> Result<Self, Self::Error> {
        Ok(Self::new(p.covariate, p.dates, p.columns, p.values)?.with_conflicts(p.conflicts))
    }
}

impl WideMatrix {
    /// Build a matrix, checking axis order and grid shape.
    pub fn new(
        covariate: impl Into<String>,
        dates: Vec<NaiveDate>,
        columns: Vec<RegionId>,
        values: Vec<Vec<Option<f64>>>,
    ) -> Result<Self, MatrixShapeError> {
        if let Some(i) = dates.windows(2).position(|w| w[0] >= w[1]) {
            return Err(MatrixShapeError::UnsortedDates(i + 1));
        }
        if let Some(i) = columns.windows(2).position(|w| w[0] >= w[1]) {
            return Err(MatrixShapeError::UnsortedColumns(i + 1));
        }
        if values.len() != dates.len() {
            return Err(MatrixShapeError::RowCount {
                rows: values.len(),
                dates: dates.len(),
            });
        }
        if let Some((row, r)) = values.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            return Err(MatrixShapeError::RaggedRow {
                row,
                len: r.len(),
                expected: columns.len(),
            });
        }

        Ok(Self {
            covariate: covariate.into(),
            dates,
            columns,
            values,
            conflicts: Vec::new(),
        })
    }

    pub fn empty(covariate: impl Into<String>) -> Self {
        Self {
            covariate: covariate.into(),
            dates: Vec::new(),
            columns: Vec::new(),
            values: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    pub(crate) fn with_conflicts(mut self, conflicts: Vec<CellConflict>) -> Self {
        self.conflicts = conflicts;
        self
    }

    pub fn covariate(&self) -> &str {
        &self.covariate
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn columns(&self) -> &[RegionId] {
        &self.columns
    }

    /// Row-major cells, `values()[row][col]`.
    pub fn values(&self) -> &[Vec<Option<f64>>] {
        &self.values
    }

    /// Cells resolved under a non-rejecting conflict policy.
    pub fn conflicts(&self) -> &[CellConflict] {
        &self.conflicts
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.dates.len(), self.columns.len())
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn row_index(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    pub fn column_index(&self, region: &str) -> Option<usize> {
        self.columns
            .binary_search_by(|c| c.as_str().cmp(region))
            .ok()
    }

    /// Cell value. Outer `None`: no such row or column. Inner `None`: missing.
    pub fn get(&self, date: NaiveDate, region: &str) -> Option<Option<f64>> {
        let row = self.row_index(date)?;
        let col = self.column_index(region)?;
        Some(self.values[row][col])
    }

    pub fn row(&self, date: NaiveDate) -> Option<&[Option<f64>]> {
        self.row_index(date).map(|i| self.values[i].as_slice())
    }

    pub fn column(&self, region: &str) -> Option<Vec<Option<f64>>> {
        let col = self.column_index(region)?;
        Some(self.values.iter().map(|row| row[col]).collect())
    }

    /// Number of non-missing cells.
    pub fn observed_cells(&self) -> usize {
        self.values.iter().flatten().filter(|v| v.is_some()).count()
    }

    /// Polars frame: `date` (Date) followed by one Float64 column per region.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let days: Vec<i32> = self.dates.iter().map(|d| to_epoch_days(*d)).collect();
        let mut columns: Vec<Column> =
            vec![Series::new(DATE_COL.into(), days).cast(&DataType::Date)?.into()];

        for (j, region) in self.columns.iter().enumerate() {
            let col: Vec<Option<f64>> = self.values.iter().map(|row| row[j]).collect();
            columns.push(Series::new(region.as_str().into(), col).into());
        }

        DataFrame::new(columns)
    }

    /// Write as CSV: header `date,<region…>`, empty field for missing cells.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_writer(writer);

        let mut header = Vec::with_capacity(self.columns.len() + 1);
        header.push(DATE_COL.to_string());
        header.extend(self.columns.iter().map(|c| c.to_string()));
        wtr.write_record(&header)?;

        for (date, row) in self.dates.iter().zip(&self.values) {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(date.format("%Y-%m-%d").to_string());
            record.extend(row.iter().map(|v| v.map(|x| x.to_string()).unwrap_or_default()));
            wtr.write_record(&record)?;
        }

        wtr.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String, csv::Error> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// BLAKE3 hash over covariate, axes and cell values.
    ///
    /// Equal matrices hash equal across runs and platforms; conflict
    /// diagnostics are not part of the hash.
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.covariate.as_bytes());
        hasher.update(&[0]);
        for date in &self.dates {
            hasher.update(&to_epoch_days(*date).to_le_bytes());
        }
        for region in &self.columns {
            hasher.update(region.as_str().as_bytes());
            hasher.update(&[0]);
        }
        for value in self.values.iter().flatten() {
            match value {
                Some(v) => {
                    hasher.update(&[1]);
                    hasher.update(&v.to_bits().to_le_bytes());
                }
                None => {
                    hasher.update(&[0]);
                }
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}
