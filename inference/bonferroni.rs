//! Bonferroni control of the family-wise error rate for two-sided z tests.

use crate::normalize::normal_quantile;

/// The per-test |z| threshold that holds the family-wise error rate at `alpha`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FamilyWiseThreshold {
    pub alpha: f64,
    /// Number of tests the correction is spread over.
    pub tests: usize,
    pub z_threshold: f64,
}

impl FamilyWiseThreshold {
    /// Builds the threshold for the finite entries of `z_scores`. `None` when there are none.
    pub fn for_scores(alpha: f64, z_scores: impl IntoIterator<Item = f64>) -> Option<Self> {
        let tests = z_scores.into_iter().filter(|z| z.is_finite()).count();
        bonferroni_threshold(alpha, tests).map(|z_threshold| Self {
            alpha,
            tests,
            z_threshold,
        })
    }

    #[inline]
    pub fn is_significant(&self, z: f64) -> bool {
        z.abs() > self.z_threshold
    }
}

/// `Φ⁻¹(1 − α / (2m))`, the two-sided Bonferroni critical value for `m` tests.
pub fn bonferroni_threshold(alpha: f64, tests: usize) -> Option<f64> {
    if tests == 0 || !(alpha > 0.0 && alpha < 1.0) {
        return None;
    }
    let tail = alpha / (2.0 * tests as f64);
    // Φ⁻¹(1 − t) = −Φ⁻¹(t) keeps precision when t is tiny.
    Some(-normal_quantile(tail))
}
