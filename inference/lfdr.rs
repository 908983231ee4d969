//! # Local False-Discovery Rate
//!
//! Efron's two-group model treats each z-score as drawn from the mixture
//!
//! ```text
//! f(z) = π0 · f0(z) + (1 − π0) · f1(z)
//! ```
//!
//! and reports `fdr(z) = π0 · f0(z) / f(z)`, the posterior probability that a score came
//! from the null component. The estimate proceeds in four steps:
//!
//! 1.  **Mixture density (Lindsey's method):** the z-scores are binned and the bin counts
//!     are regressed on a polynomial of the bin centres with a Poisson log-linear model,
//!     fitted by iteratively reweighted least squares. The fitted means, divided by
//!     `m · bin_width`, give a smooth estimate of `f`.
//! 2.  **Null density:** either the theoretical N(0, 1), or an empirical N(δ0, σ0²)
//!     obtained by matching a quadratic to `log f` over the central bins.
//! 3.  **Null proportion:** the ratio of the fitted mixture mass to the null mass over the
//!     central region, capped at one.
//! 4.  **Tail shaping:** the binned fdr is made non-increasing moving outward from the null
//!     centre, then interpolated linearly to each score.

use super::rolling::quantile_sorted;
use crate::config::{LocalFdrConfig, NullModel};
use crate::normalize::normal_pdf;
use ndarray::{Array1, Array2, Axis};
use ndarray_linalg::Solve;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocalFdrError {
    #[error("Local FDR needs at least {required} finite z-scores, found {found}.")]
    TooFewScores { found: usize, required: usize },

    #[error("All z-scores are (nearly) identical; no density can be estimated.")]
    DegenerateRange,

    #[error("A linear system solve failed while fitting the density: {0}")]
    LinearSystemSolveFailed(#[from] ndarray_linalg::error::LinalgError),

    #[error(
        "The Poisson density fit did not converge within {max_iterations} iterations. Last deviance change was {last_change:.6e}."
    )]
    DidNotConverge {
        max_iterations: usize,
        last_change: f64,
    },

    #[error("Central matching found no peak in the log density (curvature {curvature:.3e}).")]
    NoCentralPeak { curvature: f64 },
}

/// The fitted two-group model and the per-score local FDR.
#[derive(Debug, Clone)]
pub struct LocalFdrEstimate {
    /// One entry per input score; `None` for non-finite scores.
    pub fdr: Vec<Option<f64>>,
    /// Estimated proportion of null scores.
    pub pi0: f64,
    pub null_mean: f64,
    pub null_sd: f64,
    /// Bin centres and the monotone fdr at each, for plotting.
    pub bin_centers: Vec<f64>,
    pub bin_fdr: Vec<f64>,
}

/// Estimates the local false-discovery rate of every score in `z`.
pub fn local_fdr(z: &[f64], config: &LocalFdrConfig) -> Result<LocalFdrEstimate, LocalFdrError> {
    let finite: Vec<f64> = z.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < config.min_scores.max(config.degree + 2) {
        return Err(LocalFdrError::TooFewScores {
            found: finite.len(),
            required: config.min_scores.max(config.degree + 2),
        });
    }

    let histogram = internal::Histogram::new(&finite, config.bins)?;
    let density = internal::fit_mixture_density(&histogram, finite.len(), config)?;

    let mut sorted = finite.clone();
    sorted.sort_by(f64::total_cmp);
    let tail = 0.5 * (1.0 - config.central_fraction);
    let central = (
        quantile_sorted(&sorted, tail),
        quantile_sorted(&sorted, 1.0 - tail),
    );
    let central_bins: Vec<usize> = (0..histogram.centers.len())
        .filter(|&k| (central.0..=central.1).contains(&histogram.centers[k]))
        .collect();
    // A very narrow central interval can fall between bin centres.
    let central_bins = if central_bins.is_empty() {
        vec![histogram.nearest_bin((central.0 + central.1) / 2.0)]
    } else {
        central_bins
    };

    let (null_mean, null_sd, pi0) = match config.null_model {
        NullModel::Theoretical => {
            let null_mass: f64 = central_bins
                .iter()
                .map(|&k| normal_pdf(histogram.centers[k]))
                .sum();
            let mixture_mass: f64 = central_bins.iter().map(|&k| density[k]).sum();
            (0.0, 1.0, (mixture_mass / null_mass).min(1.0))
        }
        NullModel::CentralMatching => {
            internal::central_matching(&histogram.centers, &density, &central_bins)?
        }
    };

    let raw: Vec<f64> = histogram
        .centers
        .iter()
        .zip(&density)
        .map(|(&x, &f)| {
            let f0 = normal_pdf((x - null_mean) / null_sd) / null_sd;
            (pi0 * f0 / f).clamp(0.0, 1.0)
        })
        .collect();
    let centre = histogram.nearest_bin(null_mean);
    let bin_fdr = internal::monotone_outward(&raw, centre);

    let fdr = z
        .iter()
        .map(|&v| {
            v.is_finite()
                .then(|| internal::interpolate(&histogram.centers, &bin_fdr, v))
        })
        .collect();

    log::info!(
        "Local FDR: pi0 = {:.3}, null N({:.3}, {:.3}^2) over {} bins.",
        pi0,
        null_mean,
        null_sd,
        histogram.centers.len()
    );

    Ok(LocalFdrEstimate {
        fdr,
        pi0,
        null_mean,
        null_sd,
        bin_centers: histogram.centers,
        bin_fdr,
    })
}

mod internal {
    use super::*;

    /// Equal-width bins spanning the observed range.
    pub(super) struct Histogram {
        pub lower: f64,
        pub width: f64,
        pub centers: Vec<f64>,
        pub counts: Vec<f64>,
    }

    impl Histogram {
        pub(super) fn new(values: &[f64], bins: usize) -> Result<Self, LocalFdrError> {
            let lower = values.iter().copied().fold(f64::INFINITY, f64::min);
            let upper = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if !(upper - lower > 1e-9) {
                return Err(LocalFdrError::DegenerateRange);
            }
            let width = (upper - lower) / bins as f64;
            let mut counts = vec![0.0; bins];
            for &v in values {
                let k = (((v - lower) / width) as usize).min(bins - 1);
                counts[k] += 1.0;
            }
            let centers = (0..bins)
                .map(|k| lower + (k as f64 + 0.5) * width)
                .collect();
            Ok(Self {
                lower,
                width,
                centers,
                counts,
            })
        }

        pub(super) fn nearest_bin(&self, x: f64) -> usize {
            let k = ((x - self.lower) / self.width).floor();
            k.clamp(0.0, (self.centers.len() - 1) as f64) as usize
        }
    }

    /// Lindsey's method: Poisson regression of bin counts on a polynomial in the bin
    /// centre, returning the fitted density at each centre.
    pub(super) fn fit_mixture_density(
        histogram: &Histogram,
        total: usize,
        config: &LocalFdrConfig,
    ) -> Result<Vec<f64>, LocalFdrError> {
        let bins = histogram.centers.len();
        let first = histogram.centers[0];
        let last = histogram.centers[bins - 1];
        let mid = 0.5 * (first + last);
        let half = (0.5 * (last - first)).max(f64::EPSILON);

        // Powers of the centre rescaled to [-1, 1] keep X'WX well conditioned.
        let x = Array2::from_shape_fn((bins, config.degree + 1), |(k, j)| {
            ((histogram.centers[k] - mid) / half).powi(j as i32)
        });
        let y = Array1::from_vec(histogram.counts.clone());

        let mut mu = y.mapv(|c| c + 0.5);
        let mut eta = mu.mapv(f64::ln);
        let mut deviance = poisson_deviance(&y, &mu);
        let mut last_change = f64::INFINITY;

        for iteration in 0..config.max_iterations {
            let z = &eta + &((&y - &mu) / &mu);
            let xtw = (&x * &mu.view().insert_axis(Axis(1))).reversed_axes();
            let xtwx = xtw.dot(&x);
            let xtwz = xtw.dot(&z);
            let beta = xtwx.solve_into(xtwz)?;

            eta = x.dot(&beta).mapv(|v| v.min(700.0));
            mu = eta.mapv(f64::exp);
            let next = poisson_deviance(&y, &mu);
            last_change = (next - deviance).abs();
            deviance = next;
            log::debug!(
                "Poisson density fit iteration {}: deviance {:.6}",
                iteration + 1,
                deviance
            );
            if last_change <= config.convergence_tolerance * (deviance.abs() + 0.1) {
                let scale = total as f64 * histogram.width;
                return Ok(mu.iter().map(|m| m / scale).collect());
            }
        }

        Err(LocalFdrError::DidNotConverge {
            max_iterations: config.max_iterations,
            last_change,
        })
    }

    fn poisson_deviance(y: &Array1<f64>, mu: &Array1<f64>) -> f64 {
        2.0 * y
            .iter()
            .zip(mu.iter())
            .map(|(&yi, &mi)| {
                let log_term = if yi > 0.0 { yi * (yi / mi).ln() } else { 0.0 };
                log_term - (yi - mi)
            })
            .sum::<f64>()
    }

    /// Fits `log f(x) ≈ a + b·x + c·x²` over the central bins and reads off the matched
    /// normal null `π0 · N(δ0, σ0²)`. Returns `(δ0, σ0, π0)`.
    pub(super) fn central_matching(
        centers: &[f64],
        density: &[f64],
        central_bins: &[usize],
    ) -> Result<(f64, f64, f64), LocalFdrError> {
        let rows = central_bins.len();
        let x = Array2::from_shape_fn((rows, 3), |(i, j)| centers[central_bins[i]].powi(j as i32));
        let y: Array1<f64> = central_bins.iter().map(|&k| density[k].ln()).collect();
        let coefficients = x.t().dot(&x).solve_into(x.t().dot(&y))?;
        let (a, b, c) = (coefficients[0], coefficients[1], coefficients[2]);
        if !(c < 0.0) {
            return Err(LocalFdrError::NoCentralPeak { curvature: c });
        }

        let variance = -1.0 / (2.0 * c);
        let mean = b * variance;
        let sd = variance.sqrt();
        let pi0 = (a + mean * mean / (2.0 * variance)).exp()
            * (2.0 * std::f64::consts::PI).sqrt()
            * sd;
        Ok((mean, sd, pi0.min(1.0)))
    }

    /// Makes `values` non-increasing moving away from index `centre` in both directions.
    pub(super) fn monotone_outward(values: &[f64], centre: usize) -> Vec<f64> {
        let mut out = values.to_vec();
        for k in centre + 1..out.len() {
            out[k] = out[k].min(out[k - 1]);
        }
        for k in (0..centre).rev() {
            out[k] = out[k].min(out[k + 1]);
        }
        out
    }

    /// Piecewise-linear interpolation through `(xs, ys)`, constant beyond the ends.
    pub(super) fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
        let last = xs.len() - 1;
        if x <= xs[0] {
            return ys[0];
        }
        if x >= xs[last] {
            return ys[last];
        }
        let upper = xs.partition_point(|&c| c < x);
        let lower = upper - 1;
        let t = (x - xs[lower]) / (xs[upper] - xs[lower]);
        ys[lower] + t * (ys[upper] - ys[lower])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn mixture(nulls: usize, signals: usize, shift: f64, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut z: Vec<f64> = (0..nulls).map(|_| rng.sample(StandardNormal)).collect();
        z.extend((0..signals).map(|_| shift + rng.sample::<f64, _>(StandardNormal)));
        z
    }

    #[test]
    fn fdr_lies_in_the_unit_interval() {
        let z = mixture(2000, 200, 3.5, 17);
        let estimate = local_fdr(&z, &LocalFdrConfig::default()).unwrap();
        assert_eq!(estimate.fdr.len(), z.len());
        for value in estimate.fdr.iter().map(|v| v.unwrap()) {
            assert!((0.0..=1.0).contains(&value), "fdr {value} out of range");
        }
        assert!(estimate.pi0 > 0.8 && estimate.pi0 <= 1.0, "pi0 = {}", estimate.pi0);
    }

    #[test]
    fn fdr_separates_signal_from_null() {
        let z = mixture(2000, 200, 3.5, 23);
        let estimate = local_fdr(&z, &LocalFdrConfig::default()).unwrap();
        let at = |target: f64| {
            let (i, _) = z
                .iter()
                .enumerate()
                .min_by(|a, b| (a.1 - target).abs().total_cmp(&(b.1 - target).abs()))
                .unwrap();
            estimate.fdr[i].unwrap()
        };
        assert!(at(0.0) > 0.8, "fdr near zero = {}", at(0.0));
        assert!(at(5.0) < 0.1, "fdr near five = {}", at(5.0));
    }

    #[test]
    fn fdr_decreases_as_scores_move_into_the_tails() {
        let z = mixture(3000, 150, -3.0, 5);
        let estimate = local_fdr(&z, &LocalFdrConfig::default()).unwrap();

        let mut pairs: Vec<(f64, f64)> = z
            .iter()
            .zip(&estimate.fdr)
            .map(|(&v, f)| (v, f.unwrap()))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        for w in pairs.windows(2).filter(|w| w[0].0 >= 2.0) {
            assert!(w[1].1 <= w[0].1 + 1e-12, "right tail not monotone at z = {}", w[1].0);
        }
        for w in pairs.windows(2).filter(|w| w[1].0 <= -2.0) {
            assert!(w[0].1 <= w[1].1 + 1e-12, "left tail not monotone at z = {}", w[0].0);
        }
    }

    #[test]
    fn central_matching_recovers_a_shifted_null() {
        let mut rng = StdRng::seed_from_u64(99);
        let z: Vec<f64> = (0..5000)
            .map(|_| 0.3 + 1.2 * rng.sample::<f64, _>(StandardNormal))
            .collect();
        let config = LocalFdrConfig {
            null_model: NullModel::CentralMatching,
            ..LocalFdrConfig::default()
        };
        let estimate = local_fdr(&z, &config).unwrap();
        assert_abs_diff_eq!(estimate.null_mean, 0.3, epsilon = 0.15);
        assert_abs_diff_eq!(estimate.null_sd, 1.2, epsilon = 0.15);
        assert!(estimate.pi0 > 0.85);
    }

    #[test]
    fn non_finite_scores_pass_through_as_none() {
        let mut z = mixture(500, 0, 0.0, 3);
        z.push(f64::NAN);
        let estimate = local_fdr(&z, &LocalFdrConfig::default()).unwrap();
        assert!(estimate.fdr.last().unwrap().is_none());
        assert!(estimate.fdr[0].is_some());
    }

    #[test]
    fn too_few_scores_are_refused() {
        let z = mixture(20, 0, 0.0, 1);
        match local_fdr(&z, &LocalFdrConfig::default()) {
            Err(LocalFdrError::TooFewScores { found, required }) => {
                assert_eq!(found, 20);
                assert_eq!(required, 100);
            }
            other => panic!("Expected TooFewScores, got {:?}", other.map(|e| e.pi0)),
        }
    }

    #[test]
    fn helpers_behave_at_the_edges() {
        assert_eq!(
            internal::monotone_outward(&[0.2, 0.9, 1.0, 0.5, 0.7], 2),
            vec![0.2, 0.9, 1.0, 0.5, 0.5]
        );
        let xs = [0.0, 1.0, 2.0];
        let ys = [1.0, 0.5, 0.0];
        assert_eq!(internal::interpolate(&xs, &ys, -1.0), 1.0);
        assert_eq!(internal::interpolate(&xs, &ys, 1.5), 0.25);
        assert_eq!(internal::interpolate(&xs, &ys, 3.0), 0.0);
    }
}
