//! Phenotype storage: per-feature loci, the feature x sample value matrix
//! and the id index.
//!
//! A store is filled by one or more `load` calls, sorted once, optionally
//! imputed, and then only read. Every source loaded into the same store
//! must carry the same sample set in the same order.

use crate::error::{Result, StatsError};
use crate::region::Region;
use log::{debug, info, warn};
use ndarray::{Array2, ArrayView1, Axis};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::ops::Range;

/// Genomic position and identity of one feature. Coordinates are 1-based
/// and closed on both ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureLocus {
    pub id: String,
    pub chr: String,
    pub start: u64,
    pub end: u64,
    pub negative_strand: bool,
}

impl FeatureLocus {
    /// Order by chromosome name, then start, then end.
    pub fn position_cmp(&self, other: &FeatureLocus) -> Ordering {
        self.chr
            .cmp(&other.chr)
            .then(self.start.cmp(&other.start))
            .then(self.end.cmp(&other.end))
    }

    pub fn span(&self) -> u64 {
        self.end - self.start
    }
}

/// One parsed input row. `values` uses `f64::NAN` as the missing marker.
#[derive(Debug, Clone)]
pub struct PhenotypeRow {
    pub locus: FeatureLocus,
    pub values: Vec<f64>,
}

/// Yields phenotype rows sharing one sample ordering.
pub trait PhenotypeSource {
    /// Sample names from the source header, in column order.
    fn sample_names(&self) -> &[String];

    fn next_row(&mut self) -> Option<Result<PhenotypeRow>>;
}

/// Source over rows that were already parsed elsewhere.
pub struct MemorySource {
    sample_names: Vec<String>,
    rows: std::vec::IntoIter<PhenotypeRow>,
}

impl MemorySource {
    pub fn new(sample_names: Vec<String>, rows: Vec<PhenotypeRow>) -> Self {
        Self { sample_names, rows: rows.into_iter() }
    }
}

impl PhenotypeSource for MemorySource {
    fn sample_names(&self) -> &[String] {
        &self.sample_names
    }

    fn next_row(&mut self) -> Option<Result<PhenotypeRow>> {
        self.rows.next().map(Ok)
    }
}

/// What a scan pass finds: the header and each feature's locus.
#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub sample_names: Vec<String>,
    pub loci: Vec<FeatureLocus>,
}

impl ScanSummary {
    pub fn sample_count(&self) -> usize {
        self.sample_names.len()
    }

    pub fn feature_count(&self) -> usize {
        self.loci.len()
    }
}

/// Borrowed view of one stored feature.
#[derive(Debug, Clone, Copy)]
pub struct PhenotypeRecord<'a> {
    pub locus: &'a FeatureLocus,
    pub values: ArrayView1<'a, f64>,
}

/// Contiguous rows of one chromosome in a sorted store.
#[derive(Debug, Clone)]
pub(crate) struct ChromosomeBlock {
    pub(crate) chr: String,
    pub(crate) rows: Range<usize>,
    /// Largest `end - start` among the block's features.
    pub(crate) max_span: u64,
}

#[derive(Debug)]
pub struct PhenotypeStore {
    sample_names: Vec<String>,
    loci: Vec<FeatureLocus>,
    values: Array2<f64>,
    index: HashMap<String, usize>,
    blocks: Vec<ChromosomeBlock>,
    sorted: bool,
}

impl Default for PhenotypeStore {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_header(sample_names: &[String]) -> Result<()> {
    if sample_names.is_empty() {
        return Err(StatsError::Format("phenotype header lists no samples".to_string()));
    }
    let mut seen = HashSet::with_capacity(sample_names.len());
    for name in sample_names {
        if !seen.insert(name.as_str()) {
            return Err(StatsError::Format(format!(
                "sample '{}' appears more than once in the phenotype header",
                name
            )));
        }
    }
    Ok(())
}

fn validate_locus(locus: &FeatureLocus) -> Result<()> {
    if locus.id.is_empty() {
        return Err(StatsError::Format(format!(
            "feature at {}:{}-{} has an empty id",
            locus.chr, locus.start, locus.end
        )));
    }
    if locus.chr.is_empty() {
        return Err(StatsError::Format(format!("feature '{}' has an empty chromosome", locus.id)));
    }
    if locus.start > locus.end {
        return Err(StatsError::Format(format!(
            "feature '{}' starts after it ends ({} > {})",
            locus.id, locus.start, locus.end
        )));
    }
    Ok(())
}

impl PhenotypeStore {
    pub fn new() -> Self {
        Self {
            sample_names: Vec::new(),
            loci: Vec::new(),
            values: Array2::zeros((0, 0)),
            index: HashMap::new(),
            blocks: Vec::new(),
            sorted: true,
        }
    }

    /// Reads a source's header and loci without keeping any values.
    pub fn scan<S: PhenotypeSource>(source: &mut S) -> Result<ScanSummary> {
        let sample_names = source.sample_names().to_vec();
        validate_header(&sample_names)?;

        let mut loci = Vec::new();
        while let Some(row) = source.next_row() {
            let row = row?;
            validate_locus(&row.locus)?;
            loci.push(row.locus);
        }
        info!(
            "Scanned {} features across {} samples.",
            loci.len(),
            sample_names.len()
        );
        Ok(ScanSummary { sample_names, loci })
    }

    /// Loads, then sorts, a single source.
    pub fn load_and_index<S: PhenotypeSource>(source: &mut S) -> Result<Self> {
        let mut store = Self::new();
        store.load(source)?;
        store.sort();
        Ok(store)
    }

    /// Appends every row of `source`. Returns the number of features added.
    /// On error the store is left exactly as it was.
    pub fn load<S: PhenotypeSource>(&mut self, source: &mut S) -> Result<usize> {
        self.load_filtered(source, |_| true)
    }

    /// Appends only the rows overlapping `region`. Rows outside the region
    /// are still validated, duplicate ids included, but never stored.
    pub fn load_in_region<S: PhenotypeSource>(
        &mut self,
        source: &mut S,
        region: &Region,
    ) -> Result<usize> {
        self.load_filtered(source, |locus| region.overlaps(locus))
    }

    fn load_filtered<S, F>(&mut self, source: &mut S, keep: F) -> Result<usize>
    where
        S: PhenotypeSource,
        F: Fn(&FeatureLocus) -> bool,
    {
        let header = source.sample_names().to_vec();
        validate_header(&header)?;
        let first_source = self.sample_names.is_empty();
        if !first_source && self.sample_names != header {
            return Err(StatsError::Format(format!(
                "sample mismatch: store has {} samples (first: {:?}), source {} (first: {:?})",
                self.sample_names.len(),
                self.sample_names.iter().take(3).collect::<Vec<_>>(),
                header.len(),
                header.iter().take(3).collect::<Vec<_>>()
            )));
        }

        let sample_count = header.len();
        let mut staged: Vec<PhenotypeRow> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut filtered_out = 0usize;

        // Rows are only staged here; the store is untouched until the whole
        // source has been read and validated.
        while let Some(row) = source.next_row() {
            let row = row?;
            validate_locus(&row.locus)?;
            if row.values.len() != sample_count {
                return Err(StatsError::Format(format!(
                    "feature '{}' has {} values, expected {}",
                    row.locus.id,
                    row.values.len(),
                    sample_count
                )));
            }
            if self.index.contains_key(&row.locus.id) || !seen.insert(row.locus.id.clone()) {
                return Err(StatsError::DuplicateKey(row.locus.id));
            }
            if keep(&row.locus) {
                staged.push(row);
            } else {
                filtered_out += 1;
            }
        }

        let added = staged.len();
        let mut values = Vec::with_capacity(added * sample_count);
        for row in &staged {
            values.extend_from_slice(&row.values);
        }
        let block = Array2::from_shape_vec((added, sample_count), values)
            .map_err(|e| StatsError::Format(format!("phenotype block: {}", e)))?;
        if first_source {
            self.sample_names = header;
            self.values = block;
        } else {
            self.values
                .append(Axis(0), block.view())
                .map_err(|e| StatsError::Format(format!("phenotype block: {}", e)))?;
        }
        for row in staged {
            self.index.insert(row.locus.id.clone(), self.loci.len());
            self.loci.push(row.locus);
        }

        if added > 0 {
            self.sorted = false;
        }
        info!(
            "Loaded {} features ({} outside region) over {} samples; store now holds {}.",
            added,
            filtered_out,
            sample_count,
            self.loci.len()
        );
        Ok(added)
    }

    /// Stable sort by `(chr, start, end)`. Does nothing on a store that is
    /// already sorted.
    pub fn sort(&mut self) {
        if self.sorted {
            debug!("Phenotype store already sorted; skipping.");
            return;
        }

        let mut order: Vec<usize> = (0..self.loci.len()).collect();
        order.sort_by(|&a, &b| self.loci[a].position_cmp(&self.loci[b]));

        if order.iter().enumerate().any(|(pos, &row)| pos != row) {
            self.values = self.values.select(Axis(0), &order);
            let mut slots: Vec<Option<FeatureLocus>> =
                std::mem::take(&mut self.loci).into_iter().map(Some).collect();
            self.loci = order.iter().filter_map(|&row| slots[row].take()).collect();
        }

        self.rebuild_index();
        self.rebuild_blocks();
        self.sorted = true;
        info!(
            "Sorted {} features across {} chromosomes.",
            self.loci.len(),
            self.blocks.len()
        );
    }

    /// Replaces each missing value with the mean of its feature's observed
    /// values and returns how many were replaced. Fails without touching the
    /// store if any feature has no observed value at all.
    pub fn impute(&mut self) -> Result<usize> {
        if let Some(row) = self.unimputable_rows().next() {
            return Err(StatsError::DegenerateFeature {
                id: self.loci[row].id.clone(),
                reason: "no observed values to impute from".to_string(),
            });
        }

        let mut replaced = 0usize;
        for mut row in self.values.rows_mut() {
            let (sum, observed) = row
                .iter()
                .filter(|v| !v.is_nan())
                .fold((0.0f64, 0usize), |(s, c), &v| (s + v, c + 1));
            if observed == row.len() {
                continue;
            }
            let fill = sum / observed as f64;
            for v in row.iter_mut().filter(|v| v.is_nan()) {
                *v = fill;
                replaced += 1;
            }
        }
        info!("Imputed {} missing phenotype values.", replaced);
        Ok(replaced)
    }

    /// Removes features with no observed value and returns their ids.
    pub fn drop_unimputable(&mut self) -> Vec<String> {
        let dropped: HashSet<usize> = self.unimputable_rows().collect();
        if dropped.is_empty() {
            return Vec::new();
        }

        let kept: Vec<usize> = (0..self.loci.len()).filter(|row| !dropped.contains(row)).collect();
        self.values = self.values.select(Axis(0), &kept);

        let mut dropped_ids = Vec::with_capacity(dropped.len());
        let mut kept_loci = Vec::with_capacity(kept.len());
        for (row, locus) in std::mem::take(&mut self.loci).into_iter().enumerate() {
            if dropped.contains(&row) {
                dropped_ids.push(locus.id);
            } else {
                kept_loci.push(locus);
            }
        }
        self.loci = kept_loci;
        self.rebuild_index();
        if self.sorted {
            self.rebuild_blocks();
        }

        warn!(
            "Dropped {} features with no observed values (first: {:?}).",
            dropped_ids.len(),
            dropped_ids.iter().take(3).collect::<Vec<_>>()
        );
        dropped_ids
    }

    fn unimputable_rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.values
            .rows()
            .into_iter()
            .enumerate()
            .filter(|(_, row)| row.iter().all(|v| v.is_nan()))
            .map(|(i, _)| i)
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .loci
            .iter()
            .enumerate()
            .map(|(row, locus)| (locus.id.clone(), row))
            .collect();
    }

    fn rebuild_blocks(&mut self) {
        let mut blocks: Vec<ChromosomeBlock> = Vec::new();
        for (row, locus) in self.loci.iter().enumerate() {
            match blocks.last_mut() {
                Some(block) if block.chr == locus.chr => {
                    block.rows.end = row + 1;
                    block.max_span = block.max_span.max(locus.span());
                }
                _ => blocks.push(ChromosomeBlock {
                    chr: locus.chr.clone(),
                    rows: row..row + 1,
                    max_span: locus.span(),
                }),
            }
        }
        self.blocks = blocks;
    }

    pub fn sample_count(&self) -> usize {
        self.sample_names.len()
    }

    pub fn sample_names(&self) -> &[String] {
        &self.sample_names
    }

    pub fn len(&self) -> usize {
        self.loci.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loci.is_empty()
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn loci(&self) -> &[FeatureLocus] {
        &self.loci
    }

    pub fn locus(&self, row: usize) -> Option<&FeatureLocus> {
        self.loci.get(row)
    }

    /// Value row of feature `row`. Panics if `row >= self.len()`.
    pub fn values(&self, row: usize) -> ArrayView1<'_, f64> {
        self.values.row(row)
    }

    pub fn record(&self, row: usize) -> Option<PhenotypeRecord<'_>> {
        self.loci.get(row).map(|locus| PhenotypeRecord { locus, values: self.values.row(row) })
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<PhenotypeRecord<'_>> {
        self.index_of(id).and_then(|row| self.record(row))
    }

    pub fn records(&self) -> impl Iterator<Item = PhenotypeRecord<'_>> + '_ {
        self.loci
            .iter()
            .zip(self.values.rows())
            .map(|(locus, values)| PhenotypeRecord { locus, values })
    }

    pub(crate) fn blocks(&self) -> &[ChromosomeBlock] {
        &self.blocks
    }
}
