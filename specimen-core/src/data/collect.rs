//! Batch collector. Drives the per-region fetcher over a region list.
//!
//! Regions that cannot be fetched are dropped from the output and listed in
//! the report; the collector itself never fails.

use super::provider::ReportingApi;
use super::retry::{fetch_region, Abandoned, AbandonReason, FetchOutcome, RetryPolicy};
use crate::domain::{RegionId, RegionSeries, Structure};
use rayon::prelude::*;
use tracing::{info, warn};

/// Progress callback for multi-region collection.
pub trait CollectProgress: Send + Sync {
    /// Called when starting to fetch a region.
    fn on_start(&self, region: &RegionId, index: usize, total: usize);

    /// Called when a region reaches a terminal outcome.
    fn on_complete(&self, region: &RegionId, index: usize, total: usize, outcome: &FetchOutcome);

    /// Called when the entire batch is done.
    fn on_batch_complete(&self, report: &CollectReport);
}

/// Progress reporter that logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl CollectProgress for TracingProgress {
    fn on_start(&self, region: &RegionId, index: usize, total: usize) {
        info!("[{}/{}] fetching {region}", index + 1, total);
    }

    fn on_complete(&self, region: &RegionId, _index: usize, _total: usize, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Succeeded(series) => {
                info!(%region, rows = series.len(), "region collected")
            }
            FetchOutcome::Abandoned(a) => match &a.reason {
                AbandonReason::Empty => warn!(%region, "region skipped: API returned no data"),
                AbandonReason::Exhausted(err) => warn!(
                    %region,
                    attempts = a.attempts,
                    "region skipped: unreachable ({err})"
                ),
            },
        }
    }

    fn on_batch_complete(&self, report: &CollectReport) {
        info!(
            "collection complete: {}/{} regions collected, {} empty, {} unreachable",
            report.series.len(),
            report.total(),
            report.empty_regions().count(),
            report.unreachable_regions().count(),
        );
    }
}

/// Progress reporter that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl CollectProgress for NoProgress {
    fn on_start(&self, _region: &RegionId, _index: usize, _total: usize) {}
    fn on_complete(&self, _region: &RegionId, _index: usize, _total: usize, _outcome: &FetchOutcome) {}
    fn on_batch_complete(&self, _report: &CollectReport) {}
}

/// Result of a collection run.
///
/// `series` keeps the relative order of the input region list.
#[derive(Debug, Default)]
pub struct CollectReport {
    pub series: Vec<RegionSeries>,
    pub abandoned: Vec<Abandoned>,
}

impl CollectReport {
    pub fn total(&self) -> usize {
        self.series.len() + self.abandoned.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.abandoned.is_empty()
    }

    /// Regions that answered with zero rows.
    pub fn empty_regions(&self) -> impl Iterator<Item = &RegionId> {
        self.abandoned
            .iter()
            .filter(|a| a.is_empty_response())
            .map(|a| &a.region)
    }

    /// Regions whose every attempt failed.
    pub fn unreachable_regions(&self) -> impl Iterator<Item = &RegionId> {
        self.abandoned
            .iter()
            .filter(|a| !a.is_empty_response())
            .map(|a| &a.region)
    }

    fn push(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Succeeded(series) => self.series.push(series),
            FetchOutcome::Abandoned(abandoned) => self.abandoned.push(abandoned),
        }
    }
}

/// Fetch every region in order, one at a time.
///
/// Duplicate region ids are not collapsed: each occurrence is fetched.
pub fn collect_all(
    api: &dyn ReportingApi,
    regions: &[RegionId],
    structure: &Structure,
    policy: &RetryPolicy,
    progress: &dyn CollectProgress,
) -> CollectReport {
    let total = regions.len();
    let mut report = CollectReport::default();

    for (i, region) in regions.iter().enumerate() {
        progress.on_start(region, i, total);
        let outcome = fetch_region(api, region, structure, policy);
        progress.on_complete(region, i, total, &outcome);
        report.push(outcome);
    }

    progress.on_batch_complete(&report);
    report
}

/// Fetch regions on a bounded worker pool.
///
/// Output order is the input order regardless of which fetch finishes first,
/// so the result is interchangeable with [`collect_all`]. `workers <= 1`
/// runs the sequential collector.
pub fn collect_all_parallel(
    api: &dyn ReportingApi,
    regions: &[RegionId],
    structure: &Structure,
    policy: &RetryPolicy,
    progress: &dyn CollectProgress,
    workers: usize,
) -> CollectReport {
    if workers <= 1 || regions.len() <= 1 {
        return collect_all(api, regions, structure, policy, progress);
    }

    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("specimen-fetch-{i}"))
        .build()
    {
        Ok(pool) => pool,
        Err(e) => {
            warn!("failed to build fetch pool ({e}), collecting sequentially");
            return collect_all(api, regions, structure, policy, progress);
        }
    };

    let total = regions.len();
    // Indexed collect: position i holds the outcome of regions[i].
    let outcomes: Vec<FetchOutcome> = pool.install(|| {
        regions
            .par_iter()
            .enumerate()
            .map(|(i, region)| {
                progress.on_start(region, i, total);
                let outcome = fetch_region(api, region, structure, policy);
                progress.on_complete(region, i, total, &outcome);
                outcome
            })
            .collect()
    });

    let mut report = CollectReport::default();
    for outcome in outcomes {
        report.push(outcome);
    }

    progress.on_batch_complete(&report);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::ApiError;
    use crate::domain::SpecimenRecord;
    use chrono::NaiveDate;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Succeeds for every region except those in `failing`, which always error.
    struct Selective {
        failing: HashSet<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl Selective {
        fn new(failing: &[&'static str]) -> Self {
            Self {
                failing: failing.iter().copied().collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl ReportingApi for Selective {
        fn name(&self) -> &str {
            "selective"
        }

        fn fetch_region(
            &self,
            region: &RegionId,
            _structure: &Structure,
        ) -> Result<Vec<SpecimenRecord>, ApiError> {
            self.calls.lock().unwrap().push(region.to_string());
            if self.failing.contains(region.as_str()) {
                return Err(ApiError::Status {
                    status: 500,
                    message: "boom".into(),
                });
            }
            let date = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
            Ok(vec![SpecimenRecord::new(date, region.clone())
                .with_metric("newCasesBySpecimenDate", Some(1.0))])
        }
    }

    fn ids(codes: &[&str]) -> Vec<RegionId> {
        codes.iter().map(|c| RegionId::new(*c)).collect()
    }

    #[test]
    fn failed_region_is_dropped_in_order() {
        let api = Selective::new(&["B"]);
        let policy = RetryPolicy::new(2).unwrap();
        let report = collect_all(
            &api,
            &ids(&["A", "B", "C"]),
            &Structure::specimen(),
            &policy,
            &NoProgress,
        );

        let got: Vec<_> = report.series.iter().map(|s| s.region.as_str()).collect();
        assert_eq!(got, vec!["A", "C"]);
        assert_eq!(report.abandoned.len(), 1);
        assert_eq!(report.abandoned[0].region.as_str(), "B");
        assert_eq!(report.abandoned[0].attempts, 2);
        assert_eq!(report.unreachable_regions().count(), 1);
        assert!(!report.all_succeeded());

        // A once, B twice, C once, in order
        assert_eq!(*api.calls.lock().unwrap(), vec!["A", "B", "B", "C"]);
    }

    #[test]
    fn duplicate_regions_are_fetched_twice() {
        let api = Selective::new(&[]);
        let report = collect_all(
            &api,
            &ids(&["A", "A"]),
            &Structure::specimen(),
            &RetryPolicy::default(),
            &NoProgress,
        );
        assert_eq!(report.series.len(), 2);
        assert_eq!(api.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn parallel_matches_sequential_order() {
        let regions: Vec<RegionId> = (0..40).map(|i| RegionId::new(format!("R{i:02}"))).collect();
        let api = Selective::new(&["R03", "R17", "R31"]);
        let policy = RetryPolicy::new(1).unwrap();

        let seq = collect_all(&api, &regions, &Structure::specimen(), &policy, &NoProgress);
        let par = collect_all_parallel(
            &api,
            &regions,
            &Structure::specimen(),
            &policy,
            &NoProgress,
            4,
        );

        let seq_ids: Vec<_> = seq.series.iter().map(|s| s.region.clone()).collect();
        let par_ids: Vec<_> = par.series.iter().map(|s| s.region.clone()).collect();
        assert_eq!(seq_ids, par_ids);
        assert_eq!(par.abandoned.len(), 3);
        assert_eq!(par.total(), 40);
    }

    #[test]
    fn empty_region_list_yields_empty_report() {
        let api = Selective::new(&[]);
        let report = collect_all(
            &api,
            &[],
            &Structure::specimen(),
            &RetryPolicy::default(),
            &NoProgress,
        );
        assert_eq!(report.total(), 0);
        assert!(report.all_succeeded());
    }
}
