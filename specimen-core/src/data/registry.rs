//! Region registry: the canonical list of region codes.
//!
//! Used when the caller does not name regions explicitly. The usual source is
//! the LTLA metadata CSV, whose `lad19cd` column holds the codes.

use crate::domain::RegionId;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("read registry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse registry CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("registry has no column '{0}'")]
    MissingColumn(String),

    #[error("registry lists no regions")]
    Empty,
}

/// Source of the ordered list of all known region codes.
pub trait RegionRegistry {
    fn region_codes(&self) -> Result<Vec<RegionId>, RegistryError>;
}

/// A fixed, in-memory list.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    codes: Vec<RegionId>,
}

impl StaticRegistry {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RegionId>,
    {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }
}

impl RegionRegistry for StaticRegistry {
    fn region_codes(&self) -> Result<Vec<RegionId>, RegistryError> {
        Ok(self.codes.clone())
    }
}

/// Region codes read from one column of a CSV file, in file order.
#[derive(Debug, Clone)]
pub struct CsvRegistry {
    path: PathBuf,
    code_column: String,
}

impl CsvRegistry {
    pub fn new(path: impl Into<PathBuf>, code_column: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code_column: code_column.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse codes from any CSV reader. Blank cells are skipped.
    pub fn read_codes<R: std::io::Read>(
        reader: R,
        code_column: &str,
    ) -> Result<Vec<RegionId>, RegistryError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let idx = rdr
            .headers()?
            .iter()
            .position(|h| h.trim() == code_column)
            .ok_or_else(|| RegistryError::MissingColumn(code_column.to_string()))?;

        let mut codes = Vec::new();
        for record in rdr.records() {
            let record = record?;
            if let Some(code) = record.get(idx).map(str::trim).filter(|c| !c.is_empty()) {
                codes.push(RegionId::new(code));
            }
        }

        if codes.is_empty() {
            return Err(RegistryError::Empty);
        }
        Ok(codes)
    }
}

impl RegionRegistry for CsvRegistry {
    fn region_codes(&self) -> Result<Vec<RegionId>, RegistryError> {
        let file = std::fs::File::open(&self.path).map_err(|source| RegistryError::Io {
            path: self.path.clone(),
            source,
        })?;
        Self::read_codes(file, &self.code_column)
    }
}
