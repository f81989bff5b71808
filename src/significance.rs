//! Correlation to p-value through the F(1, df) upper tail.

use crate::error::{Result, StatsError};
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

/// Parameters estimated by a simple regression (intercept and slope).
pub const ESTIMATED_PARAMETERS: usize = 2;

/// Residual degrees of freedom for a correlation over `sample_count` samples.
pub fn degrees_of_freedom(sample_count: usize) -> f64 {
    sample_count as f64 - ESTIMATED_PARAMETERS as f64
}

/// Two-sided p-value of a Pearson correlation `r` with `df` residual degrees
/// of freedom. Never returns 0: the result is floored at `f64::MIN_POSITIVE`
/// so `-log10(p)` stays finite.
pub fn p_value(correlation: f64, df: f64) -> Result<f64> {
    if !df.is_finite() || df <= 0.0 {
        return Err(StatsError::InvalidDegreesOfFreedom(df));
    }
    if correlation.is_nan() {
        return Err(StatsError::DegenerateInput("correlation is NaN".to_string()));
    }

    let r2 = (correlation * correlation).min(1.0);
    let denom = 1.0 - r2;
    let f_stat = if denom > 0.0 { df * r2 / denom } else { f64::INFINITY };

    let raw = if f_stat.is_finite() {
        let f_dist = FisherSnedecor::new(1.0, df)
            .map_err(|_| StatsError::InvalidDegreesOfFreedom(df))?;
        f_dist.sf(f_stat)
    } else {
        0.0
    };

    // clamp passes NaN through unchanged
    if raw.is_nan() {
        return Err(StatsError::DegenerateInput(format!(
            "F survival function undefined at F={} df={}",
            f_stat, df
        )));
    }
    Ok(raw.clamp(f64::MIN_POSITIVE, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn zero_correlation_is_not_significant() {
        assert_relative_eq!(p_value(0.0, 10.0).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn matches_t_test_reference() {
        // r = 0.5, n = 12: t = 1.8257, two-sided p = 0.0978546.
        assert_relative_eq!(p_value(0.5, 10.0).unwrap(), 0.097_854_6, epsilon = 1e-6);
        // df = 1 has a closed form: p = 1 - 2/pi * atan(sqrt(F)).
        let r: f64 = 0.6;
        let f = r * r / (1.0 - r * r);
        let expected = 1.0 - 2.0 / std::f64::consts::PI * f.sqrt().atan();
        assert_relative_eq!(p_value(r, 1.0).unwrap(), expected, epsilon = 1e-10);
    }

    #[test]
    fn perfect_correlation_hits_the_floor() {
        assert_eq!(p_value(1.0, 1.0).unwrap(), f64::MIN_POSITIVE);
        assert_eq!(p_value(-1.0, 25.0).unwrap(), f64::MIN_POSITIVE);
    }

    #[test]
    fn never_zero_near_the_bounds() {
        for df in [1.0, 3.0, 50.0, 5000.0] {
            for r in [1.0 - 1e-15, 1.0 - f64::EPSILON, -(1.0 - 1e-12), 0.999_999_999] {
                let p = p_value(r, df).unwrap();
                assert!(p > 0.0 && p <= 1.0, "r={} df={} p={}", r, df, p);
            }
        }
    }

    #[test]
    fn bounded_and_decreasing_in_abs_r() {
        for df in [1.0, 4.0, 98.0] {
            let mut previous = f64::INFINITY;
            for step in 0..200 {
                let r = step as f64 / 200.0;
                let p = p_value(r, df).unwrap();
                assert!(p > 0.0 && p <= 1.0);
                assert!(p <= previous, "not decreasing at r={} df={}", r, df);
                assert_eq!(p, p_value(-r, df).unwrap());
                previous = p;
            }
        }
    }

    #[test]
    fn rejects_bad_degrees_of_freedom() {
        assert!(matches!(p_value(0.3, 0.0), Err(StatsError::InvalidDegreesOfFreedom(_))));
        assert!(matches!(p_value(0.3, -2.0), Err(StatsError::InvalidDegreesOfFreedom(_))));
        assert!(matches!(p_value(0.3, f64::NAN), Err(StatsError::InvalidDegreesOfFreedom(_))));
        assert!(matches!(p_value(f64::NAN, 5.0), Err(StatsError::DegenerateInput(_))));
    }

    #[test]
    fn df_subtracts_two_parameters() {
        assert_eq!(degrees_of_freedom(3), 1.0);
        assert_eq!(degrees_of_freedom(2), 0.0);
    }
}
