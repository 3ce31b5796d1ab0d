//! Data acquisition: API client, region registry, retrying fetcher, collector

pub mod collect;
pub mod govuk;
pub mod provider;
pub mod registry;
pub mod retry;

pub use collect::{collect_all, collect_all_parallel, CollectProgress, CollectReport, NoProgress, TracingProgress};
pub use govuk::GovUkClient;
pub use provider::{ApiError, ReportingApi};
pub use registry::{CsvRegistry, RegionRegistry, RegistryError, StaticRegistry};
pub use retry::{fetch_region, AbandonReason, Abandoned, FetchOutcome, RetryPolicy};
