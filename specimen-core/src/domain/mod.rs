//! Domain types for the specimen pipeline

pub mod record;
pub mod region;
pub mod structure;

pub use record::{RegionSeries, SpecimenRecord};
pub use region::RegionId;
pub use structure::{Structure, StructureField};
