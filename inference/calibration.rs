//! Checks whether a collection of z-scores is consistent with N(0, 1).
//!
//! The control covariate carries no signal by construction, so its z-scores should look
//! standard normal. Their mean, variance and a Kolmogorov–Smirnov distance summarize how
//! far the normalization is from calibrated.

use crate::normalize::normal_cdf;
use serde::Serialize;

/// Moments and the Kolmogorov–Smirnov statistic of a set of scores against N(0, 1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NullCalibration {
    pub count: usize,
    pub mean: f64,
    /// Unbiased sample variance.
    pub variance: f64,
    /// `sup |F_n(z) − Φ(z)|`.
    pub ks_statistic: f64,
    /// Asymptotic p-value of the KS statistic.
    pub ks_p_value: f64,
}

/// Summarizes the finite entries of `z_scores`. Needs at least two of them.
pub fn null_calibration(z_scores: impl IntoIterator<Item = f64>) -> Option<NullCalibration> {
    let mut sorted: Vec<f64> = z_scores.into_iter().filter(|z| z.is_finite()).collect();
    let count = sorted.len();
    if count < 2 {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let n = count as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|z| (z - mean).powi(2)).sum::<f64>() / (n - 1.0);

    let ks_statistic = sorted
        .iter()
        .enumerate()
        .map(|(i, &z)| {
            let cdf = normal_cdf(z);
            let above = (i + 1) as f64 / n - cdf;
            let below = cdf - i as f64 / n;
            above.max(below)
        })
        .fold(0.0, f64::max);

    Some(NullCalibration {
        count,
        mean,
        variance,
        ks_statistic,
        ks_p_value: kolmogorov_p_value(ks_statistic, count),
    })
}

/// Asymptotic Kolmogorov distribution tail `Q(λ) = 2 Σ (−1)^(k−1) exp(−2k²λ²)` with the
/// Stephens small-sample correction `λ = (√n + 0.12 + 0.11/√n) D`.
pub fn kolmogorov_p_value(statistic: f64, count: usize) -> f64 {
    let root = (count as f64).sqrt();
    let lambda = (root + 0.12 + 0.11 / root) * statistic;
    if lambda < 1e-3 {
        return 1.0;
    }
    let mut sum = 0.0;
    let mut sign = 1.0;
    for k in 1..=100 {
        let k = k as f64;
        let term = (-2.0 * k * k * lambda * lambda).exp();
        sum += sign * term;
        if term < 1e-16 {
            break;
        }
        sign = -sign;
    }
    (2.0 * sum).clamp(0.0, 1.0)
}
