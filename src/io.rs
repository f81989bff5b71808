//! Plain-text phenotype and covariate readers.
//!
//! Phenotypes come as a tab-separated BED with six fixed columns
//! (`chr start end id info strand`) followed by one column per sample;
//! BED's 0-based half-open coordinates become 1-based closed loci.
//! Covariates come as a whitespace-separated table, one row per
//! covariate, columns matched to the phenotype samples by name.

use crate::error::{Result, StatsError};
use crate::store::{FeatureLocus, PhenotypeRow, PhenotypeSource};
use log::{debug, warn};
use ndarray::{Array2, ArrayView1};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const BED_FIXED_COLUMNS: usize = 6;
const MISSING_TOKENS: [&str; 5] = ["NA", "NaN", "nan", ".", ""];

fn parse_value(token: &str, line_number: usize) -> Result<f64> {
    if MISSING_TOKENS.contains(&token) {
        return Ok(f64::NAN);
    }
    token.parse::<f64>().map_err(|e| {
        StatsError::Format(format!("line {}: bad value '{}': {}", line_number, token, e))
    })
}

/// Reads the first non-blank line into `line`. Returns its 1-based number,
/// or `None` at end of input.
fn read_content_line<R: BufRead>(
    reader: &mut R,
    line: &mut String,
    line_number: &mut usize,
) -> Result<Option<usize>> {
    loop {
        line.clear();
        if reader.read_line(line)? == 0 {
            return Ok(None);
        }
        *line_number += 1;
        if !line.trim().is_empty() {
            return Ok(Some(*line_number));
        }
    }
}

pub struct BedPhenotypeReader<R> {
    reader: R,
    sample_names: Vec<String>,
    line_number: usize,
    buffer: String,
}

impl BedPhenotypeReader<BufReader<File>> {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        debug!("Opened phenotype file {}", path.display());
        Self::new(BufReader::new(file))
    }
}

impl<R: BufRead> BedPhenotypeReader<R> {
    /// Parses the header line. The header must start with `#` and name at
    /// least one sample after the six fixed columns.
    pub fn new(mut reader: R) -> Result<Self> {
        let mut buffer = String::new();
        let mut line_number = 0;
        if read_content_line(&mut reader, &mut buffer, &mut line_number)?.is_none() {
            return Err(StatsError::Format("phenotype file is empty".to_string()));
        }

        let header = buffer.trim_end_matches(['\r', '\n']);
        if !header.starts_with('#') {
            return Err(StatsError::Format(format!(
                "line {}: phenotype header must start with '#'",
                line_number
            )));
        }
        let fields: Vec<&str> = header.split('\t').collect();
        if fields.len() <= BED_FIXED_COLUMNS {
            return Err(StatsError::Format(format!(
                "line {}: phenotype header has {} columns, expected {} fixed columns plus samples",
                line_number,
                fields.len(),
                BED_FIXED_COLUMNS
            )));
        }
        let sample_names = fields[BED_FIXED_COLUMNS..].iter().map(|s| s.to_string()).collect();

        Ok(Self { reader, sample_names, line_number, buffer })
    }

    fn parse_row(&self) -> Result<PhenotypeRow> {
        let n = self.line_number;
        let line = self.buffer.trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < BED_FIXED_COLUMNS {
            return Err(StatsError::Format(format!(
                "line {}: {} columns, expected at least {}",
                n,
                fields.len(),
                BED_FIXED_COLUMNS
            )));
        }

        let coordinate = |text: &str| {
            text.parse::<u64>().map_err(|e| {
                StatsError::Format(format!("line {}: bad coordinate '{}': {}", n, text, e))
            })
        };
        let start = coordinate(fields[1])?.checked_add(1).ok_or_else(|| {
            StatsError::Format(format!("line {}: start '{}' out of range", n, fields[1]))
        })?;
        let end = coordinate(fields[2])?;
        let negative_strand = match fields[5] {
            "-" => true,
            "+" | "." => false,
            other => {
                return Err(StatsError::Format(format!("line {}: bad strand '{}'", n, other)));
            }
        };

        let values = fields[BED_FIXED_COLUMNS..]
            .iter()
            .map(|token| parse_value(token, n))
            .collect::<Result<Vec<f64>>>()?;

        Ok(PhenotypeRow {
            locus: FeatureLocus {
                id: fields[3].to_string(),
                chr: fields[0].to_string(),
                start,
                end,
                negative_strand,
            },
            values,
        })
    }
}

impl<R: BufRead> PhenotypeSource for BedPhenotypeReader<R> {
    fn sample_names(&self) -> &[String] {
        &self.sample_names
    }

    fn next_row(&mut self) -> Option<Result<PhenotypeRow>> {
        loop {
            match read_content_line(&mut self.reader, &mut self.buffer, &mut self.line_number) {
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
                Ok(Some(_)) if self.buffer.starts_with('#') => continue,
                Ok(Some(_)) => return Some(self.parse_row()),
            }
        }
    }
}

/// Covariate vectors aligned to a phenotype sample order.
#[derive(Debug, Clone)]
pub struct CovariateTable {
    ids: Vec<String>,
    values: Array2<f64>,
}

impl CovariateTable {
    pub fn from_path(path: &Path, sample_names: &[String]) -> Result<Self> {
        let file = File::open(path)?;
        debug!("Opened covariate file {}", path.display());
        Self::read_aligned(BufReader::new(file), sample_names)
    }

    /// Reads the table and reorders its columns to `sample_names`. Every
    /// sample in `sample_names` must have a column; extra columns are
    /// dropped.
    pub fn read_aligned<R: BufRead>(mut reader: R, sample_names: &[String]) -> Result<Self> {
        let mut line = String::new();
        let mut line_number = 0;
        if read_content_line(&mut reader, &mut line, &mut line_number)?.is_none() {
            return Err(StatsError::Format("covariate file is empty".to_string()));
        }

        let header: Vec<&str> = line.trim_start_matches('#').split_whitespace().collect();
        if header.len() < 2 {
            return Err(StatsError::Format("covariate header names no samples".to_string()));
        }
        let mut column_of: HashMap<&str, usize> = HashMap::with_capacity(header.len() - 1);
        for (column, &name) in header.iter().enumerate().skip(1) {
            if column_of.insert(name, column).is_some() {
                return Err(StatsError::Format(format!(
                    "sample '{}' appears more than once in the covariate header",
                    name
                )));
            }
        }

        let columns = sample_names
            .iter()
            .map(|name| {
                column_of.get(name.as_str()).copied().ok_or_else(|| {
                    StatsError::Format(format!("sample '{}' has no covariate column", name))
                })
            })
            .collect::<Result<Vec<usize>>>()?;
        if columns.len() < header.len() - 1 {
            warn!(
                "Covariate table has {} samples not in the phenotype data; ignoring them.",
                header.len() - 1 - columns.len()
            );
        }
        let expected_fields = header.len();

        let mut ids: Vec<String> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut values = Array2::<f64>::zeros((0, sample_names.len()));
        let mut row_line = String::new();
        while let Some(n) = read_content_line(&mut reader, &mut row_line, &mut line_number)? {
            if row_line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = row_line.split_whitespace().collect();
            if fields.len() != expected_fields {
                return Err(StatsError::Format(format!(
                    "line {}: {} fields, header has {}",
                    n,
                    fields.len(),
                    expected_fields
                )));
            }
            let id = fields[0].to_string();
            if seen.insert(id.clone(), ids.len()).is_some() {
                return Err(StatsError::DuplicateKey(id));
            }
            let aligned = columns
                .iter()
                .map(|&column| parse_value(fields[column], n))
                .collect::<Result<Vec<f64>>>()?;
            values
                .push_row(ArrayView1::from(aligned.as_slice()))
                .map_err(|e| StatsError::Format(format!("line {}: {}", n, e)))?;
            ids.push(id);
        }

        debug!("Read {} covariates over {} samples.", ids.len(), sample_names.len());
        Ok(Self { ids, values })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
        self.values.row(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ArrayView1<'_, f64>)> + '_ {
        self.ids.iter().map(String::as_str).zip(self.values.rows())
    }
}
