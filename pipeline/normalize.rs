//! # Normal-Scale Test Statistics
//!
//! Groups range from ten observations to many thousands, so raw t- and likelihood-ratio
//! statistics are not comparable across them. This module maps each statistic through
//! its own null distribution onto the standard normal scale:
//!
//! - t-statistics: `z = Φ⁻¹(F_t(t; n − k))`
//! - likelihood-ratio statistics: `z = Φ⁻¹(F_χ²(LR; dof))`, and for `dof = 3` also the
//!   Wilson–Hilferty cube-root approximation, which stays finite in the far tails.
//!
//! Probabilities are clipped to `[ε, 1 − ε]` before inversion so that no score is infinite.
//! Each upper-tail probability is computed directly as a survival function rather than as
//! `1 − cdf`, which keeps precision for large statistics.

use crate::types::ApproxScore;
use statrs::distribution::{ChiSquared, ContinuousCDF, StudentsT};
use statrs::function::erf::{erfc, erfc_inv};
use std::f64::consts::SQRT_2;
use thiserror::Error;

/// Degrees of freedom at which the Wilson–Hilferty score is reported.
pub const WILSON_HILFERTY_DOF: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("Degrees of freedom must be positive, got {0}.")]
    NonPositiveDof(f64),
    #[error("Statistic is not finite: {0}")]
    NonFiniteStatistic(f64),
    #[error("Could not construct the reference distribution: {0}")]
    Distribution(String),
}

/// Standard normal cumulative distribution function.
#[inline]
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / SQRT_2)
}

/// Standard normal quantile function, the inverse of [`normal_cdf`] on (0, 1).
#[inline]
pub fn normal_quantile(p: f64) -> f64 {
    -SQRT_2 * erfc_inv(2.0 * p)
}

/// Standard normal density.
#[inline]
pub fn normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Clamps a probability into `[clip, 1 − clip]`.
#[inline]
pub fn clip_probability(p: f64, clip: f64) -> f64 {
    p.clamp(clip, 1.0 - clip)
}

/// Inverts a probability given as its lower and upper tail masses, using whichever tail
/// is smaller so neither side loses precision to cancellation.
fn quantile_from_tails(lower: f64, upper: f64, clip: f64) -> f64 {
    if upper < lower {
        -normal_quantile(clip_probability(upper, clip))
    } else {
        normal_quantile(clip_probability(lower, clip))
    }
}

/// Maps a Student-t statistic from a group of size `n` onto the normal scale, treating it
/// as t-distributed with `n − dof_adjustment` degrees of freedom.
pub fn t_to_z(t: f64, n: usize, dof_adjustment: usize, clip: f64) -> Result<f64, NormalizeError> {
    if !t.is_finite() {
        return Err(NormalizeError::NonFiniteStatistic(t));
    }
    let dof = n as f64 - dof_adjustment as f64;
    if !(dof > 0.0) {
        return Err(NormalizeError::NonPositiveDof(dof));
    }
    let dist =
        StudentsT::new(0.0, 1.0, dof).map_err(|e| NormalizeError::Distribution(e.to_string()))?;
    Ok(quantile_from_tails(dist.cdf(t), dist.sf(t), clip))
}

/// Maps a likelihood-ratio statistic onto the normal scale through the exact chi-square
/// null distribution.
pub fn lr_to_z(lr: f64, dof: usize, clip: f64) -> Result<f64, NormalizeError> {
    if !lr.is_finite() {
        return Err(NormalizeError::NonFiniteStatistic(lr));
    }
    if dof == 0 {
        return Err(NormalizeError::NonPositiveDof(0.0));
    }
    let dist =
        ChiSquared::new(dof as f64).map_err(|e| NormalizeError::Distribution(e.to_string()))?;
    let lr = lr.max(0.0);
    Ok(quantile_from_tails(dist.cdf(lr), dist.sf(lr), clip))
}

/// The Wilson–Hilferty cube-root transform of a chi-square variate,
/// `((x/k)^(1/3) − (1 − 2/(9k))) / sqrt(2/(9k))`.
#[inline]
pub fn wilson_hilferty(lr: f64, dof: usize) -> f64 {
    let k = dof as f64;
    let v = 2.0 / (9.0 * k);
    ((lr.max(0.0) / k).cbrt() - (1.0 - v)) / v.sqrt()
}

/// The Wilson–Hilferty score of a group, reported only for `dof = 3` and a design whose
/// condition ratio exceeds `condition_threshold`.
pub fn wilson_hilferty_score(
    lr: f64,
    dof: usize,
    condition_ratio: f64,
    condition_threshold: f64,
) -> ApproxScore {
    if dof != WILSON_HILFERTY_DOF || !(condition_ratio > condition_threshold) || !lr.is_finite() {
        return ApproxScore::NotComputed;
    }
    ApproxScore::Computed(wilson_hilferty(lr, dof))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn normal_quantile_inverts_the_cdf() {
        for i in 1..1000 {
            let p = i as f64 / 1000.0;
            assert_abs_diff_eq!(normal_cdf(normal_quantile(p)), p, epsilon = 1e-12);
        }
        for &p in &[1e-12, 1e-8, 1e-4, 1.0 - 1e-4, 1.0 - 1e-8] {
            let back = normal_cdf(normal_quantile(p));
            assert!((back - p).abs() <= 1e-9 * p.max(1e-3), "p = {p}, back = {back}");
        }
    }

    #[test]
    fn well_known_quantiles() {
        assert_abs_diff_eq!(normal_quantile(0.5), 0.0, epsilon = 1e-14);
        assert_abs_diff_eq!(normal_quantile(0.975), 1.959963984540054, epsilon = 1e-9);
        assert_abs_diff_eq!(normal_cdf(-1.0), 0.15865525393145707, epsilon = 1e-12);
        assert_abs_diff_eq!(normal_pdf(0.0), 0.3989422804014327, epsilon = 1e-14);
    }

    #[test]
    fn t_to_z_is_odd_and_shrinks_toward_zero() {
        let z = t_to_z(2.5, 12, 5, 1e-12).unwrap();
        let z_neg = t_to_z(-2.5, 12, 5, 1e-12).unwrap();
        assert_abs_diff_eq!(z, -z_neg, epsilon = 1e-10);
        // Heavy tails at 7 degrees of freedom: the same t is less extreme as a z.
        assert!(z > 0.0 && z < 2.5);

        // With many degrees of freedom the t is already close to normal.
        let z_large = t_to_z(2.5, 100_000, 5, 1e-12).unwrap();
        assert_abs_diff_eq!(z_large, 2.5, epsilon = 1e-3);
        assert_abs_diff_eq!(t_to_z(0.0, 20, 5, 1e-12).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn extreme_statistics_are_clipped_to_finite_scores() {
        let cap = normal_quantile(1.0 - 1e-12);
        let z = t_to_z(1e6, 50, 5, 1e-12).unwrap();
        assert!(z.is_finite());
        assert_abs_diff_eq!(z, -normal_quantile(1e-12), epsilon = 1e-9);
        assert_abs_diff_eq!(z, cap, epsilon = 1e-3);
        assert!(t_to_z(-1e6, 50, 5, 1e-12).unwrap() < -7.0);

        let z_lr = lr_to_z(1e4, 3, 1e-12).unwrap();
        assert!(z_lr.is_finite() && z_lr > 7.0);
    }

    #[test]
    fn invalid_inputs_are_errors() {
        assert_eq!(
            t_to_z(1.0, 5, 5, 1e-12),
            Err(NormalizeError::NonPositiveDof(0.0))
        );
        assert!(matches!(
            t_to_z(f64::NAN, 20, 5, 1e-12),
            Err(NormalizeError::NonFiniteStatistic(_))
        ));
        assert!(lr_to_z(1.0, 0, 1e-12).is_err());
    }

    #[test]
    fn lr_to_z_matches_chi_square_quantiles() {
        // 7.814728 is the 95th percentile of chi-square with 3 degrees of freedom.
        assert_abs_diff_eq!(
            lr_to_z(7.814727903251178, 3, 1e-12).unwrap(),
            normal_quantile(0.95),
            epsilon = 1e-6
        );
        // The median of chi-square(3) maps to zero.
        assert_abs_diff_eq!(lr_to_z(2.365974, 3, 1e-12).unwrap(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn wilson_hilferty_agrees_with_exact_mapping_in_the_central_range() {
        let mut lr = 0.5;
        while lr <= 15.0 {
            let exact = lr_to_z(lr, 3, 1e-12).unwrap();
            let approx = wilson_hilferty(lr, 3);
            assert!(
                (exact - approx).abs() < 0.05,
                "LR = {lr}: exact {exact}, Wilson-Hilferty {approx}"
            );
            lr += 0.1;
        }
        // Over the wider span the two never disagree wildly.
        let mut lr = 0.1;
        while lr <= 50.0 {
            let exact = lr_to_z(lr, 3, 1e-12).unwrap();
            assert!((exact - wilson_hilferty(lr, 3)).abs() < 0.5);
            lr += 0.1;
        }
    }

    #[test]
    fn wilson_hilferty_preconditions_yield_the_sentinel() {
        assert_eq!(
            wilson_hilferty_score(4.0, 2, 0.1, 1e-7),
            ApproxScore::NotComputed
        );
        assert_eq!(
            wilson_hilferty_score(4.0, 3, 1e-9, 1e-7),
            ApproxScore::NotComputed
        );
        assert_eq!(ApproxScore::NotComputed.value_or_sentinel(), 0.0);
        match wilson_hilferty_score(4.0, 3, 0.1, 1e-7) {
            ApproxScore::Computed(z) => assert_abs_diff_eq!(z, wilson_hilferty(4.0, 3)),
            ApproxScore::NotComputed => panic!("Expected a computed score"),
        }
    }
}
