//! Region descriptors and overlap selection over a sorted store.
//!
//! Regions use the same 1-based closed coordinates as [`FeatureLocus`].

use crate::error::{Result, StatsError};
use crate::store::{FeatureLocus, PhenotypeRecord, PhenotypeStore};
use log::debug;
use std::fmt;
use std::str::FromStr;

/// Descriptor selecting every feature.
pub const WHOLE_GENOME: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Region {
    Genome,
    Interval { chr: String, start: u64, end: u64 },
}

impl Region {
    pub fn chromosome(chr: impl Into<String>) -> Self {
        Region::Interval { chr: chr.into(), start: 1, end: u64::MAX }
    }

    pub fn interval(chr: impl Into<String>, start: u64, end: u64) -> Result<Self> {
        let chr = chr.into();
        if start > end {
            return Err(StatsError::Parse {
                input: format!("{}:{}-{}", chr, start, end),
                reason: "start is greater than end".to_string(),
            });
        }
        Ok(Region::Interval { chr, start, end })
    }

    /// Closed-interval overlap on the same chromosome.
    pub fn overlaps(&self, locus: &FeatureLocus) -> bool {
        match self {
            Region::Genome => true,
            Region::Interval { chr, start, end } => {
                locus.chr == *chr && locus.start <= *end && locus.end >= *start
            }
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Genome => write!(f, "{}", WHOLE_GENOME),
            Region::Interval { chr, start: 1, end: u64::MAX } => write!(f, "{}", chr),
            Region::Interval { chr, start, end } => write!(f, "{}:{}-{}", chr, start, end),
        }
    }
}

fn parse_error(input: &str, reason: impl Into<String>) -> StatsError {
    StatsError::Parse { input: input.to_string(), reason: reason.into() }
}

fn parse_coordinate(text: &str, input: &str) -> Result<u64> {
    let digits: String = text.chars().filter(|&c| c != ',').collect();
    if digits.is_empty() {
        return Err(parse_error(input, "missing coordinate"));
    }
    digits
        .parse::<u64>()
        .map_err(|e| parse_error(input, format!("bad coordinate '{}': {}", text, e)))
}

impl FromStr for Region {
    type Err = StatsError;

    /// Accepts `*`, `chr`, `chr:pos` and `chr:start-end`.
    fn from_str(s: &str) -> Result<Self> {
        let descriptor = s.trim();
        if descriptor.is_empty() {
            return Err(parse_error(s, "empty region descriptor"));
        }
        if descriptor == WHOLE_GENOME {
            return Ok(Region::Genome);
        }
        if descriptor.chars().any(char::is_whitespace) {
            return Err(parse_error(s, "region contains whitespace"));
        }

        // Contig names may themselves contain ':', so split on the last one.
        let (chr, range) = match descriptor.rsplit_once(':') {
            None => return Ok(Region::chromosome(descriptor)),
            Some(parts) => parts,
        };
        if chr.is_empty() {
            return Err(parse_error(s, "missing chromosome name"));
        }

        let (start, end) = match range.split_once('-') {
            Some((from, to)) => (parse_coordinate(from, s)?, parse_coordinate(to, s)?),
            None => {
                let pos = parse_coordinate(range, s)?;
                (pos, pos)
            }
        };
        if start > end {
            return Err(parse_error(s, "start is greater than end"));
        }
        Ok(Region::Interval { chr: chr.to_string(), start, end })
    }
}

/// Parses a region descriptor.
pub fn set_region(descriptor: &str) -> Result<Region> {
    descriptor.parse()
}

/// Rows of a store overlapping a region, in sorted order.
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    store: &'a PhenotypeStore,
    region: Region,
    indices: Vec<usize>,
}

impl<'a> Selection<'a> {
    pub fn store(&self) -> &'a PhenotypeStore {
        self.store
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = PhenotypeRecord<'a>> + '_ {
        let store = self.store;
        self.indices.iter().filter_map(move |&row| store.record(row))
    }
}

/// Selects every feature overlapping `region`.
///
/// Within the region's chromosome block, the first candidate is found by
/// binary search on `start + max_span`, and the scan stops at the first
/// feature starting after the region ends.
pub fn select_overlapping<'a>(store: &'a PhenotypeStore, region: &Region) -> Result<Selection<'a>> {
    if !store.is_sorted() {
        return Err(StatsError::UnsortedStore);
    }

    let indices = match region {
        Region::Genome => (0..store.len()).collect(),
        Region::Interval { chr, start, end } => overlapping_rows(store, chr, *start, *end),
    };
    debug!("Region {} overlaps {} of {} features.", region, indices.len(), store.len());

    Ok(Selection { store, region: region.clone(), indices })
}

fn overlapping_rows(store: &PhenotypeStore, chr: &str, start: u64, end: u64) -> Vec<usize> {
    let blocks = store.blocks();
    let block = match blocks.binary_search_by(|b| b.chr.as_str().cmp(chr)) {
        Ok(i) => &blocks[i],
        Err(_) => return Vec::new(),
    };

    let loci = &store.loci()[block.rows.clone()];
    let first = loci.partition_point(|l| l.start.saturating_add(block.max_span) < start);
    let last = loci.partition_point(|l| l.start <= end);
    if first >= last {
        return Vec::new();
    }

    loci[first..last]
        .iter()
        .enumerate()
        .filter(|(_, l)| l.end >= start)
        .map(|(offset, _)| block.rows.start + first + offset)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{row, samples};
    use crate::store::MemorySource;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn store_of(rows: Vec<crate::store::PhenotypeRow>) -> PhenotypeStore {
        PhenotypeStore::load_and_index(&mut MemorySource::new(samples(1), rows)).unwrap()
    }

    fn selected_ids(store: &PhenotypeStore, region: &str) -> Vec<String> {
        let region = set_region(region).unwrap();
        select_overlapping(store, &region)
            .unwrap()
            .records()
            .map(|r| r.locus.id.clone())
            .collect()
    }

    #[test]
    fn selects_exactly_the_overlapping_records_in_order() {
        let store = store_of(vec![
            row("f1", "chr1", 10, 20, &[1.0]),
            row("f2", "chr1", 30, 40, &[1.0]),
            row("f3", "chr2", 5, 15, &[1.0]),
        ]);
        assert_eq!(selected_ids(&store, "chr1:15-35"), vec!["f1", "f2"]);
        let selection = select_overlapping(&store, &set_region("chr1:15-35").unwrap()).unwrap();
        assert_eq!(selection.indices(), &[0, 1]);
    }

    #[test]
    fn boundaries_are_inclusive() {
        let store = store_of(vec![row("f1", "chr1", 10, 20, &[1.0])]);
        assert_eq!(selected_ids(&store, "chr1:20-25"), vec!["f1"]);
        assert_eq!(selected_ids(&store, "chr1:1-10"), vec!["f1"]);
        assert!(selected_ids(&store, "chr1:21-30").is_empty());
        assert!(selected_ids(&store, "chr1:1-9").is_empty());
    }

    #[test]
    fn no_overlap_is_an_empty_selection() {
        let store = store_of(vec![row("f1", "chr1", 10, 20, &[1.0])]);
        assert!(selected_ids(&store, "chr1:100-200").is_empty());
        assert!(selected_ids(&store, "chrX:1-1000").is_empty());
    }

    #[test]
    fn long_feature_starting_far_upstream_is_found() {
        let store = store_of(vec![
            row("long", "chr1", 1, 10_000, &[1.0]),
            row("a", "chr1", 100, 110, &[1.0]),
            row("b", "chr1", 200, 210, &[1.0]),
            row("c", "chr1", 9_000, 9_010, &[1.0]),
        ]);
        assert_eq!(selected_ids(&store, "chr1:5000-5100"), vec!["long"]);
        assert_eq!(selected_ids(&store, "chr1:205-9000"), vec!["long", "b", "c"]);
    }

    #[test]
    fn genome_and_chromosome_sentinels() {
        let store = store_of(vec![
            row("a", "chr1", 10, 20, &[1.0]),
            row("b", "chr2", 10, 20, &[1.0]),
        ]);
        assert_eq!(selected_ids(&store, "*"), vec!["a", "b"]);
        assert_eq!(selected_ids(&store, "chr2"), vec!["b"]);
    }

    #[test]
    fn unsorted_store_is_refused() {
        let mut store = PhenotypeStore::new();
        let mut source = MemorySource::new(samples(1), vec![row("a", "chr1", 1, 2, &[1.0])]);
        store.load(&mut source).unwrap();
        assert!(matches!(
            select_overlapping(&store, &Region::Genome),
            Err(StatsError::UnsortedStore)
        ));
    }

    #[test]
    fn matches_linear_predicate_on_random_features() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let chromosomes = ["chr1", "chr2", "chr3"];
        let rows = (0..400)
            .map(|i| {
                let chr = chromosomes[rng.random_range(0..chromosomes.len())];
                let start = rng.random_range(1..50_000u64);
                let len = if rng.random_bool(0.05) {
                    rng.random_range(0..20_000u64)
                } else {
                    rng.random_range(0..500u64)
                };
                row(&format!("f{}", i), chr, start, start + len, &[0.0])
            })
            .collect();
        let store = store_of(rows);

        for _ in 0..200 {
            let chr = chromosomes[rng.random_range(0..chromosomes.len())];
            let start = rng.random_range(1..55_000u64);
            let end = start + rng.random_range(0..3_000u64);
            let region = Region::interval(chr, start, end).unwrap();
            let expected: Vec<usize> =
                (0..store.len()).filter(|&i| region.overlaps(&store.loci()[i])).collect();
            let selection = select_overlapping(&store, &region).unwrap();
            assert_eq!(selection.indices(), expected.as_slice(), "region {}", region);
        }
    }

    #[test]
    fn parses_descriptors() {
        assert_eq!(set_region("*").unwrap(), Region::Genome);
        assert_eq!(set_region("chr7").unwrap(), Region::chromosome("chr7"));
        assert_eq!(
            set_region(" chr1:1,000-2,500 ").unwrap(),
            Region::Interval { chr: "chr1".into(), start: 1000, end: 2500 }
        );
        assert_eq!(
            set_region("chr1:42").unwrap(),
            Region::Interval { chr: "chr1".into(), start: 42, end: 42 }
        );
        assert_eq!(
            set_region("HLA-A*01:01:1-5").unwrap(),
            Region::Interval { chr: "HLA-A*01:01".into(), start: 1, end: 5 }
        );
        assert_eq!(set_region("chr1:15-35").unwrap().to_string(), "chr1:15-35");
        assert_eq!(set_region("chr7").unwrap().to_string(), "chr7");
    }

    #[test]
    fn rejects_malformed_descriptors() {
        let rejected = [
            "", "   ", "chr1:", ":1-5", "chr1:a-5", "chr1:9-3", "chr1:1-5x", "chr1:-5", "chr 1:1-5",
        ];
        for bad in rejected {
            assert!(
                matches!(set_region(bad), Err(StatsError::Parse { .. })),
                "accepted '{}'",
                bad
            );
        }
        assert!(matches!(Region::interval("chr1", 9, 3), Err(StatsError::Parse { .. })));
    }
}
