//! Mean, variance and Pearson correlation over per-sample vectors.
//!
//! Correlation runs on centred vectors: the covariate is centred once per
//! analysis and each feature once per evaluation, then `r` is
//! `sxy / (sqrt(sxx) * sqrt(syy))` with every sum produced by
//! [`inner_product`].

use crate::error::{Result, StatsError};
use ndarray::ArrayView1;

/// Distance from +-1 under which a correlation is reported as exactly +-1.
const PERFECT_CORRELATION_TOLERANCE: f64 = 8.0 * f64::EPSILON;

/// Arithmetic mean of `values[i] / scale`.
pub fn mean(values: ArrayView1<f64>, scale: f64) -> Result<f64> {
    if values.is_empty() {
        return Err(StatsError::EmptyVector);
    }
    let sum: f64 = values.iter().map(|&v| v / scale).sum();
    Ok(sum / values.len() as f64)
}

/// Sample variance of `values[i] / scale` around `mean` (denominator n - 1).
pub fn variance(values: ArrayView1<f64>, mean: f64, scale: f64) -> Result<f64> {
    let n = values.len();
    if n < 2 {
        return Err(StatsError::InsufficientSamples { required: 2, found: n });
    }
    let sum_sq: f64 = values
        .iter()
        .map(|&v| {
            let d = v / scale - mean;
            d * d
        })
        .sum();
    Ok(sum_sq / (n - 1) as f64)
}

/// Dot product with four independent accumulators.
///
/// Elements are consumed in groups of four, one partial sum per lane; the
/// 0-3 trailing elements go into the first lane before the single final
/// reduction.
#[inline]
pub fn inner_product(a: &[f64], b: &[f64]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(StatsError::LengthMismatch { expected: a.len(), found: b.len() });
    }
    let mut partial = [0.0f64; 4];
    let groups_a = a.chunks_exact(4);
    let groups_b = b.chunks_exact(4);
    let tail_a = groups_a.remainder();
    let tail_b = groups_b.remainder();

    for (x, y) in groups_a.zip(groups_b) {
        partial[0] += x[0] * y[0];
        partial[1] += x[1] * y[1];
        partial[2] += x[2] * y[2];
        partial[3] += x[3] * y[3];
    }
    for (x, y) in tail_a.iter().zip(tail_b) {
        partial[0] += x * y;
    }

    Ok((partial[0] + partial[1]) + (partial[2] + partial[3]))
}

/// A vector with its mean removed, rescaled so its largest entry has
/// magnitude 1.
///
/// Correlation is scale-invariant, and keeping the entries in `[-1, 1]`
/// keeps every later product inside the `f64` range whatever the input
/// magnitude.
#[derive(Debug, Clone)]
pub struct CenteredVector {
    values: Vec<f64>,
    scale: f64,
    sum_sq: f64,
}

impl CenteredVector {
    pub fn new(values: ArrayView1<f64>) -> Result<Self> {
        let n = values.len();
        if n < 2 {
            return Err(StatsError::InsufficientSamples { required: 2, found: n });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(StatsError::DegenerateInput(
                "vector contains non-finite values".to_string(),
            ));
        }

        let magnitude = values.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
        if magnitude == 0.0 {
            return Err(StatsError::DegenerateInput(format!(
                "zero variance across {} samples",
                n
            )));
        }

        let m = mean(values, magnitude)?;
        let mut centered: Vec<f64> = values.iter().map(|&v| v / magnitude - m).collect();

        // Residue left by rounding the mean of a constant vector sits around
        // n * eps^2 once values are scaled to unit magnitude.
        let residue = inner_product(&centered, &centered)?;
        if !(residue > n as f64 * f64::EPSILON * f64::EPSILON) {
            return Err(StatsError::DegenerateInput(format!(
                "zero variance across {} samples",
                n
            )));
        }

        let spread = centered.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
        centered.iter_mut().for_each(|v| *v /= spread);
        let sum_sq = inner_product(&centered, &centered)?;

        Ok(Self { values: centered, scale: magnitude * spread, sum_sq })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Centred values divided by [`scale`](Self::scale).
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Largest absolute centred value of the input.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Sum of squares of [`as_slice`](Self::as_slice); between 1 and `len()`.
    pub fn sum_of_squares(&self) -> f64 {
        self.sum_sq
    }

    /// Pearson correlation against another centred vector of the same length.
    pub fn correlation(&self, other: &CenteredVector) -> Result<f64> {
        if self.len() != other.len() {
            return Err(StatsError::LengthMismatch { expected: self.len(), found: other.len() });
        }
        let sxy = inner_product(&self.values, &other.values)?;
        let r = sxy / (self.sum_sq.sqrt() * other.sum_sq.sqrt());
        Ok(stabilize(r))
    }
}

/// Pearson correlation between two raw sample vectors.
pub fn correlation(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Result<f64> {
    if a.len() != b.len() {
        return Err(StatsError::LengthMismatch { expected: a.len(), found: b.len() });
    }
    CenteredVector::new(a)?.correlation(&CenteredVector::new(b)?)
}

fn stabilize(r: f64) -> f64 {
    let clamped = r.clamp(-1.0, 1.0);
    if 1.0 - clamped.abs() <= PERFECT_CORRELATION_TOLERANCE {
        clamped.signum()
    } else {
        clamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{aview1, Array1};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_vector(rng: &mut ChaCha8Rng, n: usize) -> Array1<f64> {
        (0..n).map(|_| rng.random_range(-10.0..10.0)).collect()
    }

    #[test]
    fn mean_and_variance_of_small_vector() {
        let v = [2.0, 4.0, 6.0];
        assert_eq!(mean(aview1(&v), 1.0).unwrap(), 4.0);
        assert_eq!(variance(aview1(&v), 4.0, 1.0).unwrap(), 4.0);
    }

    #[test]
    fn scale_divides_every_value() {
        let v = [2.0, 4.0, 6.0];
        let m = mean(aview1(&v), 2.0).unwrap();
        assert_eq!(m, 2.0);
        assert_eq!(variance(aview1(&v), m, 2.0).unwrap(), 1.0);
    }

    #[test]
    fn empty_and_short_vectors_are_rejected() {
        let empty: [f64; 0] = [];
        assert!(matches!(mean(aview1(&empty), 1.0), Err(StatsError::EmptyVector)));
        assert!(matches!(
            variance(aview1(&[3.0]), 3.0, 1.0),
            Err(StatsError::InsufficientSamples { required: 2, found: 1 })
        ));
    }

    #[test]
    fn unrolled_product_matches_naive_sum() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for n in (0..=9).chain([1001, 4096]) {
            let a = random_vector(&mut rng, n);
            let b = random_vector(&mut rng, n);
            let naive: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
            let fast = inner_product(a.as_slice().unwrap(), b.as_slice().unwrap()).unwrap();
            assert_relative_eq!(fast, naive, epsilon = 1e-9, max_relative = 1e-12);
        }
    }

    #[test]
    fn trailing_elements_are_counted() {
        let a = [1.0, 1.0, 1.0, 1.0, 2.0, 3.0, 4.0];
        let b = [1.0, 1.0, 1.0, 1.0, 10.0, 100.0, 1000.0];
        assert_eq!(inner_product(&a, &b).unwrap(), 4.0 + 20.0 + 300.0 + 4000.0);
    }

    #[test]
    fn self_correlation_is_one() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for n in [2, 3, 5, 17, 250] {
            let v = random_vector(&mut rng, n);
            let r = correlation(v.view(), v.view()).unwrap();
            assert!((r - 1.0).abs() < 1e-9, "n={} r={}", n, r);
        }
    }

    #[test]
    fn correlation_is_symmetric() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..50 {
            let a = random_vector(&mut rng, 37);
            let b = random_vector(&mut rng, 37);
            let ab = correlation(a.view(), b.view()).unwrap();
            let ba = correlation(b.view(), a.view()).unwrap();
            assert_relative_eq!(ab, ba, epsilon = 1e-12);
            assert!((-1.0..=1.0).contains(&ab));
        }
    }

    #[test]
    fn known_correlation_value() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 1.0, 4.0, 3.0, 5.0];
        assert_relative_eq!(correlation(aview1(&x), aview1(&y)).unwrap(), 0.8, epsilon = 1e-12);
    }

    #[test]
    fn collinear_vectors_report_exact_bounds() {
        let x = [1.0, 2.0, 3.0];
        assert_eq!(correlation(aview1(&x), aview1(&[2.0, 4.0, 6.0])).unwrap(), 1.0);
        assert_eq!(correlation(aview1(&x), aview1(&[9.0, 6.0, 3.0])).unwrap(), -1.0);
    }

    #[test]
    fn constant_vector_is_degenerate() {
        let x = [1.0, 2.0, 3.0];
        assert!(matches!(
            correlation(aview1(&x), aview1(&[0.1, 0.1, 0.1])),
            Err(StatsError::DegenerateInput(_))
        ));
        assert!(matches!(
            CenteredVector::new(aview1(&[0.0, 0.0, 0.0, 0.0])),
            Err(StatsError::DegenerateInput(_))
        ));
        assert!(matches!(
            CenteredVector::new(aview1(&[1.0, f64::NAN, 2.0])),
            Err(StatsError::DegenerateInput(_))
        ));
    }

    #[test]
    fn unequal_lengths_are_rejected() {
        assert!(matches!(
            correlation(aview1(&[1.0, 2.0, 3.0]), aview1(&[1.0, 2.0])),
            Err(StatsError::LengthMismatch { expected: 3, found: 2 })
        ));
    }

    #[test]
    fn centering_scales_to_unit_magnitude() {
        let c = CenteredVector::new(aview1(&[2.0, 4.0, 6.0])).unwrap();
        let centered = c.as_slice();
        assert_relative_eq!(centered[0], -1.0, epsilon = 1e-12);
        assert_relative_eq!(centered[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(centered[2], 1.0, epsilon = 1e-12);
        assert_relative_eq!(c.scale(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(c.sum_of_squares(), 2.0, epsilon = 1e-12);
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn correlation_holds_at_extreme_magnitudes() {
        let x = [1.0, 2.0, 3.0];
        let y = [1.0, 3.0, 2.0];
        for scale in [1e-160, 1e-300, 1e100, 1e150, 1e300] {
            let xs = Array1::from_iter(x.iter().map(|v| v * scale));
            let ys = Array1::from_iter(y.iter().map(|v| v * scale));
            let doubled = xs.mapv(|v| v * 0.5);
            let r = correlation(xs.view(), ys.view()).unwrap();
            assert_relative_eq!(r, 0.5, epsilon = 1e-12);
            assert_eq!(correlation(xs.view(), doubled.view()).unwrap(), 1.0, "scale {}", scale);
        }
    }

    #[test]
    fn tiny_and_huge_vectors_correlate() {
        let tiny = [1e-160, 3e-160, 2e-160, 5e-160];
        let huge = [1e100, 3e100, 2e100, 5e100];
        assert_eq!(correlation(aview1(&tiny), aview1(&huge)).unwrap(), 1.0);
    }
}
