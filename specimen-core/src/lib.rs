//! Specimen Core: regional time-series collection and long-to-wide reshape.
//!
//! This crate contains the whole pipeline:
//! - Domain types (region codes, request structure, records, series)
//! - Per-region fetcher with a bounded attempt budget
//! - Batch collector (sequential, or bounded-parallel with stable order)
//! - Reshaper: dedupe, date sort, pivot into a dates × regions matrix
//! - TOML configuration and the `get_specimen` entry point

pub mod config;
pub mod data;
pub mod domain;
pub mod pipeline;
pub mod reshape;

pub use config::{ConfigError, PipelineConfig};
pub use domain::{RegionId, RegionSeries, SpecimenRecord, Structure};
pub use pipeline::{get_specimen, run_pipeline, PipelineError, PipelineOptions, PipelineOutput};
pub use reshape::{reshape, ConflictPolicy, WideMatrix};
