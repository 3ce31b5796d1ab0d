//! Pipeline entry point: resolve regions, collect, reshape.

use crate::config::ConfigError;
use crate::data::collect::{collect_all_parallel, CollectProgress, TracingProgress};
use crate::data::provider::ReportingApi;
use crate::data::registry::{RegionRegistry, RegistryError};
use crate::data::retry::{Abandoned, RetryPolicy};
use crate::domain::structure::NEW_CASES_BY_SPECIMEN_DATE;
use crate::domain::{RegionId, Structure};
use crate::reshape::{reshape, ConflictPolicy, ReshapeError, WideMatrix};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Reshape(#[from] ReshapeError),
}

/// Everything a run needs besides the API and the region list.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub structure: Structure,
    /// Metric placed in the matrix cells. Must be a metric of `structure`.
    pub covariate: String,
    pub retry: RetryPolicy,
    /// Collector worker threads; 1 is sequential.
    pub workers: usize,
    pub conflicts: ConflictPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            structure: Structure::specimen(),
            covariate: NEW_CASES_BY_SPECIMEN_DATE.to_string(),
            retry: RetryPolicy::default(),
            workers: 1,
            conflicts: ConflictPolicy::default(),
        }
    }
}

impl PipelineOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts() == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if !self.structure.has_metric(&self.covariate) {
            return Err(ConfigError::CovariateNotInStructure(self.covariate.clone()));
        }
        Ok(())
    }
}

/// Result of a run: the matrix plus the regions that contributed no column.
#[derive(Debug)]
pub struct PipelineOutput {
    pub matrix: WideMatrix,
    pub abandoned: Vec<Abandoned>,
}

/// Fetch every region and pivot into a dates × regions matrix.
///
/// `regions = None` uses the registry's full list. Regions that fail every
/// attempt, or respond with no rows, are left out of the matrix and listed in
/// [`PipelineOutput::abandoned`].
pub fn get_specimen(
    api: &dyn ReportingApi,
    registry: &dyn RegionRegistry,
    regions: Option<Vec<RegionId>>,
    options: &PipelineOptions,
) -> Result<PipelineOutput, PipelineError> {
    let regions = match regions {
        Some(regions) => regions,
        None => registry.region_codes()?,
    };
    run_pipeline(api, &regions, options, &TracingProgress)
}

/// [`get_specimen`] over an already-resolved region list.
pub fn run_pipeline(
    api: &dyn ReportingApi,
    regions: &[RegionId],
    options: &PipelineOptions,
    progress: &dyn CollectProgress,
) -> Result<PipelineOutput, PipelineError> {
    options.validate()?;

    info!(
        api = api.name(),
        regions = regions.len(),
        covariate = %options.covariate,
        max_attempts = options.retry.max_attempts(),
        workers = options.workers,
        "starting collection"
    );

    let report = collect_all_parallel(
        api,
        regions,
        &options.structure,
        &options.retry,
        progress,
        options.workers,
    );

    let matrix = reshape(&report.series, &options.covariate, options.conflicts)?;
    let (rows, cols) = matrix.shape();
    info!(rows, cols, conflicts = matrix.conflicts().len(), "reshaped");

    Ok(PipelineOutput {
        matrix,
        abandoned: report.abandoned,
    })
}
