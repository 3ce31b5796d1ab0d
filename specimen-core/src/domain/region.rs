use serde::{Deserialize, Serialize};
use std::fmt;

/// Reporting region code (e.g. an LTLA code such as `E06000001`).
///
/// Opaque to the pipeline: it is passed to the API filter and used as the
/// column key of the wide matrix, nothing else.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub String);

impl RegionId {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RegionId {
    fn from(code: &str) -> Self {
        Self(code.to_string())
    }
}

impl From<String> for RegionId {
    fn from(code: String) -> Self {
        Self(code)
    }
}

impl AsRef<str> for RegionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
