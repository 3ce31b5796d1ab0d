//! Per-region fetch with a bounded attempt budget.
//!
//! The retry loop is an explicit state machine:
//!
//! ```text
//!            error, attempt < max
//!           ┌──────────────────┐
//!           ▼                  │
//!   Attempting{attempt} ───────┘
//!      │            │
//!      │ Ok(rows)   │ Ok(empty) | error with attempt == max
//!      ▼            ▼
//!  Succeeded     Abandoned
//! ```
//!
//! `max_attempts` counts every call including the first, so a budget of 1
//! means one call and no retry. An empty successful response is terminal
//! immediately; it is not retried.

use super::provider::{ApiError, ReportingApi};
use crate::config::ConfigError;
use crate::domain::{RegionId, RegionSeries, Structure};
use std::time::Duration;
use tracing::{debug, warn};

/// Attempt budget and backoff for one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(Self {
            max_attempts,
            base_delay: Duration::ZERO,
        })
    }

    /// Exponential backoff: `base_delay * 2^(n-1)` before retry number `n`.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Delay to wait after failed attempt `attempt` (1-based) before the next one.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::ZERO,
        }
    }
}

/// Why a region produced no series.
#[derive(Debug)]
pub enum AbandonReason {
    /// Every attempt raised an error; carries the last one.
    Exhausted(ApiError),
    /// The API answered successfully with no rows.
    Empty,
}

/// A region that was given up on.
#[derive(Debug)]
pub struct Abandoned {
    pub region: RegionId,
    /// Calls made before giving up.
    pub attempts: u32,
    pub reason: AbandonReason,
}

impl Abandoned {
    pub fn is_empty_response(&self) -> bool {
        matches!(self.reason, AbandonReason::Empty)
    }
}

/// Terminal result of [`fetch_region`].
#[derive(Debug)]
pub enum FetchOutcome {
    Succeeded(RegionSeries),
    Abandoned(Abandoned),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Succeeded(_))
    }

    pub fn series(self) -> Option<RegionSeries> {
        match self {
            FetchOutcome::Succeeded(series) => Some(series),
            FetchOutcome::Abandoned(_) => None,
        }
    }
}

#[derive(Debug)]
enum FetchState {
    Attempting { attempt: u32 },
    Succeeded(RegionSeries),
    Abandoned(Abandoned),
}

impl FetchState {
    fn step(
        self,
        api: &dyn ReportingApi,
        region: &RegionId,
        structure: &Structure,
        policy: &RetryPolicy,
    ) -> FetchState {
        let attempt = match self {
            FetchState::Attempting { attempt } => attempt,
            terminal => return terminal,
        };

        match api.fetch_region(region, structure) {
            Ok(records) if records.is_empty() => {
                warn!(%region, attempt, "API returned no rows, dropping region");
                FetchState::Abandoned(Abandoned {
                    region: region.clone(),
                    attempts: attempt,
                    reason: AbandonReason::Empty,
                })
            }
            Ok(records) => {
                debug!(%region, attempt, rows = records.len(), "fetched region");
                FetchState::Succeeded(RegionSeries::new(region.clone(), records))
            }
            Err(err) if attempt >= policy.max_attempts => {
                warn!(
                    %region,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "fetch failed, giving up on region"
                );
                FetchState::Abandoned(Abandoned {
                    region: region.clone(),
                    attempts: attempt,
                    reason: AbandonReason::Exhausted(err),
                })
            }
            Err(err) => {
                warn!(
                    %region,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "fetch failed, retrying"
                );
                let delay = policy.delay_after(attempt);
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                FetchState::Attempting {
                    attempt: attempt + 1,
                }
            }
        }
    }
}

/// Fetch one region's full series, retrying on API errors.
///
/// Never returns an error: failures are reported as [`FetchOutcome::Abandoned`].
pub fn fetch_region(
    api: &dyn ReportingApi,
    region: &RegionId,
    structure: &Structure,
    policy: &RetryPolicy,
) -> FetchOutcome {
    let mut state = FetchState::Attempting { attempt: 1 };
    loop {
        state = match state {
            FetchState::Succeeded(series) => return FetchOutcome::Succeeded(series),
            FetchState::Abandoned(abandoned) => return FetchOutcome::Abandoned(abandoned),
            attempting => attempting.step(api, region, structure, policy),
        };
    }
}
