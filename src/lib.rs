//! # phenocorr
//!
//! Correlation and significance between molecular phenotypes and
//! per-sample covariate vectors, restricted to a genomic region.
//!
//! Load phenotypes into a [`PhenotypeStore`], sort it, optionally impute,
//! then call [`analyze`] once per covariate vector.

pub mod driver;
pub mod error;
pub mod io;
pub mod kernel;
pub mod region;
pub mod significance;
pub mod store;

pub use driver::{
    analyze, AnalysisConfig, AnalysisDriver, AnalysisReport, AssociationResult, SkippedFeature,
};
pub use error::{Result, StatsError};
pub use region::{select_overlapping, set_region, Region, Selection};
pub use store::{
    FeatureLocus, MemorySource, PhenotypeRecord, PhenotypeRow, PhenotypeSource, PhenotypeStore,
};
