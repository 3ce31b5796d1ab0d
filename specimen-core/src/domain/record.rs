//! Long-format observations as returned by the reporting API.

use super::region::RegionId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One reported observation for one region on one date.
///
/// `metrics` holds every numeric field captured by the request structure
/// (the covariate selected for the matrix is one of them). A `None` metric
/// means the API reported `null` for that field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecimenRecord {
    pub date: NaiveDate,
    pub area_code: RegionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_name: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, Option<f64>>,
}

impl SpecimenRecord {
    pub fn new(date: NaiveDate, area_code: impl Into<RegionId>) -> Self {
        Self {
            date,
            area_code: area_code.into(),
            area_name: None,
            metrics: BTreeMap::new(),
        }
    }

    /// Builder-style setter for a single metric.
    pub fn with_metric(mut self, name: impl Into<String>, value: Option<f64>) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_area_name(mut self, name: impl Into<String>) -> Self {
        self.area_name = Some(name.into());
        self
    }

    /// Value of a metric, flattening "not captured" and "reported null".
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied().flatten()
    }
}

/// The full time series of one region from one successful fetch.
///
/// Records are kept sorted by date (stable, so same-date rows keep the order
/// the API returned them in).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSeries {
    pub region: RegionId,
    pub records: Vec<SpecimenRecord>,
}

impl RegionSeries {
    pub fn new(region: RegionId, mut records: Vec<SpecimenRecord>) -> Self {
        records.sort_by_key(|r| r.date);
        Self { region, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.records.first().map(|r| r.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.records.last().map(|r| r.date)
    }
}
