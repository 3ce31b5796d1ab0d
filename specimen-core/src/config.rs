//! Serializable pipeline configuration.
//!
//! Loaded from TOML; every field has a default so an empty file (or no file)
//! yields the standard specimen run:
//!
//! ```toml
//! [api]
//! base_url = "https://api.coronavirus.data.gov.uk/v1/data"
//! timeout_secs = 30
//!
//! [fetch]
//! max_attempts = 3
//! base_delay_ms = 0
//! workers = 1
//!
//! [reshape]
//! covariate = "newCasesBySpecimenDate"
//! conflicts = "reject"
//!
//! [registry]
//! path = "lad_metadata.csv"
//! code_column = "lad19cd"
//! ```

use crate::data::retry::RetryPolicy;
use crate::domain::Structure;
use crate::pipeline::PipelineOptions;
use crate::reshape::ConflictPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.coronavirus.data.gov.uk/v1/data";
pub const DEFAULT_CODE_COLUMN: &str = "lad19cd";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid structure: {0}")]
    InvalidStructure(String),

    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("unknown conflict policy '{0}' (expected reject, keep-first or mean)")]
    UnknownConflictPolicy(String),

    #[error("covariate '{0}' is not a metric of the request structure")]
    CovariateNotInStructure(String),

    #[error("structure selects no metric to use as covariate")]
    NoCovariate,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub api: ApiConfig,
    pub fetch: FetchConfig,
    pub reshape: ReshapeConfig,
    /// Explicit request structure. `None` selects the specimen structure.
    pub structure: Option<Structure>,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Per-request timeout. The pipeline itself has no wall-clock limit.
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            user_agent: concat!("specimen/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    /// Total attempts per region, including the first.
    pub max_attempts: u32,
    /// Base delay of the exponential backoff between attempts.
    pub base_delay_ms: u64,
    /// Worker threads for the collector. 1 means strictly sequential.
    pub workers: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 0,
            workers: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReshapeConfig {
    /// Metric to place in the matrix cells. `None` picks the first metric of the structure.
    pub covariate: Option<String>,
    pub conflicts: ConflictPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Region metadata CSV used when no regions are given explicitly.
    pub path: Option<PathBuf>,
    pub code_column: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: None,
            code_column: DEFAULT_CODE_COLUMN.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve into validated pipeline options.
    pub fn to_options(&self) -> Result<PipelineOptions, ConfigError> {
        let structure = self.structure.clone().unwrap_or_default();
        let covariate = match &self.reshape.covariate {
            Some(c) => c.clone(),
            None => structure
                .metric_fields()
                .next()
                .map(str::to_string)
                .ok_or(ConfigError::NoCovariate)?,
        };

        let retry = RetryPolicy::new(self.fetch.max_attempts)?
            .with_base_delay(Duration::from_millis(self.fetch.base_delay_ms));

        let options = PipelineOptions {
            structure,
            covariate,
            retry,
            workers: self.fetch.workers.max(1),
            conflicts: self.reshape.conflicts,
        };
        options.validate()?;
        Ok(options)
    }
}
