//! A single association analysis over one region and one covariate vector.
//!
//! The phases are encoded as types: [`AnalysisDriver`] selects a region and
//! becomes a [`RegionSelected`], whose `run` consumes it and returns the
//! finished [`AnalysisReport`]. Nothing carries over to the next analysis.

use crate::error::{Result, StatsError};
use crate::kernel::CenteredVector;
use crate::region::{select_overlapping, Region, Selection};
use crate::significance::{degrees_of_freedom, p_value};
use crate::store::PhenotypeStore;
use log::{debug, info, warn};
use ndarray::ArrayView1;
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisConfig {
    /// Length every phenotype row and the covariate must have.
    pub sample_count: usize,
    /// Spread features across the rayon pool.
    pub parallel: bool,
}

impl AnalysisConfig {
    pub fn for_store(store: &PhenotypeStore) -> Self {
        Self { sample_count: store.sample_count(), parallel: true }
    }

    pub fn sequential(self) -> Self {
        Self { parallel: false, ..self }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssociationResult {
    pub feature_id: String,
    pub correlation: f64,
    pub p_value: f64,
}

/// A feature left out of the results and the reason it was left out.
#[derive(Debug)]
pub struct SkippedFeature {
    pub feature_id: String,
    pub error: StatsError,
}

#[derive(Debug)]
pub struct AnalysisReport {
    pub region: Region,
    pub results: Vec<AssociationResult>,
    pub skipped: Vec<SkippedFeature>,
}

impl AnalysisReport {
    pub fn evaluated(&self) -> usize {
        self.results.len() + self.skipped.len()
    }
}

pub struct AnalysisDriver<'a> {
    store: &'a PhenotypeStore,
    config: AnalysisConfig,
}

impl<'a> AnalysisDriver<'a> {
    pub fn new(store: &'a PhenotypeStore, config: AnalysisConfig) -> Result<Self> {
        if config.sample_count != store.sample_count() {
            return Err(StatsError::LengthMismatch {
                expected: store.sample_count(),
                found: config.sample_count,
            });
        }
        Ok(Self { store, config })
    }

    pub fn select_region(self, region: &Region) -> Result<RegionSelected<'a>> {
        let selection = select_overlapping(self.store, region)?;
        info!("Region {}: {} features selected.", region, selection.len());
        Ok(RegionSelected { selection, config: self.config })
    }
}

pub struct RegionSelected<'a> {
    selection: Selection<'a>,
    config: AnalysisConfig,
}

impl<'a> RegionSelected<'a> {
    pub fn selection(&self) -> &Selection<'a> {
        &self.selection
    }

    /// Correlates every selected feature with `covariate`.
    ///
    /// Fails outright on a covariate of the wrong length or when there are
    /// too few samples for a positive df. Per-feature failures end up in
    /// `skipped`.
    pub fn run(self, covariate: ArrayView1<f64>) -> Result<AnalysisReport> {
        let sample_count = self.config.sample_count;
        if covariate.len() != sample_count {
            return Err(StatsError::LengthMismatch {
                expected: sample_count,
                found: covariate.len(),
            });
        }
        let df = degrees_of_freedom(sample_count);
        if df <= 0.0 {
            return Err(StatsError::InvalidDegreesOfFreedom(df));
        }

        let store = self.selection.store();
        let covariate = match CenteredVector::new(covariate) {
            Ok(centered) => centered,
            Err(e) if e.is_recoverable() => {
                warn!(
                    "Covariate vector unusable ({}); skipping all {} selected features.",
                    e,
                    self.selection.len()
                );
                return Ok(self.skip_all(&e));
            }
            Err(e) => return Err(e),
        };

        let evaluate = |&row: &usize| evaluate_feature(store, row, &covariate, df);
        let outcomes: Vec<Result<AssociationResult>> = if self.config.parallel {
            self.selection.indices().par_iter().map(evaluate).collect()
        } else {
            self.selection.indices().iter().map(evaluate).collect()
        };

        let mut results = Vec::with_capacity(outcomes.len());
        let mut skipped = Vec::new();
        for (&row, outcome) in self.selection.indices().iter().zip(outcomes) {
            match outcome {
                Ok(result) => results.push(result),
                Err(error) if error.is_recoverable() => {
                    let feature_id = store.loci()[row].id.clone();
                    warn!("Skipping feature '{}': {}", feature_id, error);
                    skipped.push(SkippedFeature { feature_id, error });
                }
                Err(error) => return Err(error),
            }
        }

        info!(
            "Region {}: {} associations computed, {} features skipped.",
            self.selection.region(),
            results.len(),
            skipped.len()
        );
        Ok(AnalysisReport { region: self.selection.region().clone(), results, skipped })
    }

    fn skip_all(&self, cause: &StatsError) -> AnalysisReport {
        let store = self.selection.store();
        let skipped = self
            .selection
            .indices()
            .iter()
            .map(|&row| SkippedFeature {
                feature_id: store.loci()[row].id.clone(),
                error: StatsError::DegenerateInput(format!("covariate: {}", cause)),
            })
            .collect();
        AnalysisReport { region: self.selection.region().clone(), results: Vec::new(), skipped }
    }
}

fn evaluate_feature(
    store: &PhenotypeStore,
    row: usize,
    covariate: &CenteredVector,
    df: f64,
) -> Result<AssociationResult> {
    let locus = &store.loci()[row];
    let values = store.values(row);
    if values.iter().any(|v| v.is_nan()) {
        return Err(StatsError::DegenerateFeature {
            id: locus.id.clone(),
            reason: "contains missing values; impute before analysis".to_string(),
        });
    }

    let centered = CenteredVector::new(values)?;
    let correlation = centered.correlation(covariate)?;
    let p = p_value(correlation, df)?;
    debug!("{}\tr={:.6}\tp={:.4e}", locus.id, correlation, p);

    Ok(AssociationResult { feature_id: locus.id.clone(), correlation, p_value: p })
}

/// Runs a whole analysis with the store's own sample count.
pub fn analyze(
    store: &PhenotypeStore,
    region: &Region,
    covariate: ArrayView1<f64>,
) -> Result<AnalysisReport> {
    AnalysisDriver::new(store, AnalysisConfig::for_store(store))?
        .select_region(region)?
        .run(covariate)
}
