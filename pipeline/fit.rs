//! # Per-Group Dual-Model Fitting
//!
//! For one species group this module fits two nested ordinary-least-squares models of
//! latitude (see [`crate::design`] for their exact columns):
//!
//! 1.  **Reduced:** intercept, day, longitude residuals and the control covariate.
//! 2.  **Full:** the reduced model plus the products of day with each other predictor.
//!
//! Before fitting, the conditioning of the reduced design is checked through the ratio of
//! its smallest to largest singular value. Groups that are too small, whose longitudes
//! have no mean direction, or whose design is close to rank deficient are skipped with a
//! [`SkipReason`]; a skip is an expected outcome, not an error.
//!
//! The least-squares solves use a thin QR factorization, `X = QR`, so that
//! `β = R⁻¹Qᵀy` and `Cov(β) = σ̂²R⁻¹R⁻ᵀ` never form `XᵀX` explicitly.

use crate::circular::{CircularError, CircularPoint, residualize};
use crate::config::PipelineConfig;
use crate::design::{GroupCovariates, ModelSpec, Term, build_design};
use crate::types::{SkipReason, SpeciesGroup};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::{Diag, QR, SVD, SolveTriangular, UPLO};
use std::f64::consts::PI;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FitError {
    #[error("A linear algebra routine failed: {0}")]
    LinalgError(#[from] ndarray_linalg::error::LinalgError),

    #[error("The design has {rows} rows but {cols} columns; at least one residual degree of freedom is required.")]
    NoResidualDof { rows: usize, cols: usize },

    #[error("Response has {response} values but the design has {rows} rows.")]
    DimensionMismatch { response: usize, rows: usize },

    #[error("The least-squares solution is not finite (residual sum of squares {rss:.3e}).")]
    NonFiniteSolution { rss: f64 },
}

/// A coefficient estimate with its standard error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoefficientEstimate {
    pub estimate: f64,
    pub standard_error: f64,
}

impl CoefficientEstimate {
    /// Wald t-statistic, `estimate / standard_error`.
    #[inline]
    pub fn t_statistic(&self) -> f64 {
        self.estimate / self.standard_error
    }
}

/// The result of one ordinary-least-squares fit.
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub coefficients: Array1<f64>,
    pub standard_errors: Array1<f64>,
    /// Residual sum of squares.
    pub rss: f64,
    /// Maximized Gaussian log-likelihood with the variance profiled out.
    pub log_likelihood: f64,
}

impl OlsFit {
    #[inline]
    pub fn num_params(&self) -> usize {
        self.coefficients.len()
    }

    pub fn coefficient(&self, index: usize) -> CoefficientEstimate {
        CoefficientEstimate {
            estimate: self.coefficients[index],
            standard_error: self.standard_errors[index],
        }
    }
}

/// Maximized log-likelihood of a Gaussian linear model with `n` observations and
/// residual sum of squares `rss`, using the ML variance estimate `rss / n`.
#[inline]
pub fn gaussian_log_likelihood(rss: f64, n: usize) -> f64 {
    let n = n as f64;
    -0.5 * n * ((2.0 * PI).ln() + (rss / n).ln() + 1.0)
}

/// Ratio of the smallest to the largest singular value of `x`. Zero for a matrix with
/// no columns or a zero largest singular value.
pub fn condition_ratio(x: &Array2<f64>) -> Result<f64, FitError> {
    let (_, s, _) = x.svd(false, false)?;

    let max_sv = s.iter().fold(0.0_f64, |max, &val| max.max(val));
    let min_sv = s.iter().fold(f64::INFINITY, |min, &val| min.min(val));
    if !(max_sv > 0.0) || !min_sv.is_finite() {
        return Ok(0.0);
    }
    // A tall matrix has as many singular values as columns; anything missing is zero.
    if s.len() < x.ncols() {
        return Ok(0.0);
    }
    Ok(min_sv / max_sv)
}

/// Fits `y ~ x` by least squares through a thin QR factorization.
pub fn fit_ols(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<OlsFit, FitError> {
    let (n, p) = x.dim();
    if y.len() != n {
        return Err(FitError::DimensionMismatch {
            response: y.len(),
            rows: n,
        });
    }
    if n <= p {
        return Err(FitError::NoResidualDof { rows: n, cols: p });
    }

    let (q, r) = x.qr()?;
    let r_inv = r.solve_triangular(UPLO::Upper, Diag::NonUnit, &Array2::<f64>::eye(p))?;
    let coefficients = r_inv.dot(&q.t().dot(&y));

    let residuals = &y - &x.dot(&coefficients);
    let rss = residuals.dot(&residuals);
    if !rss.is_finite() || rss <= 0.0 || coefficients.iter().any(|b| !b.is_finite()) {
        return Err(FitError::NonFiniteSolution { rss });
    }

    // diag(R⁻¹R⁻ᵀ) is the squared row norms of R⁻¹.
    let sigma2 = rss / (n - p) as f64;
    let standard_errors = r_inv
        .rows()
        .into_iter()
        .map(|row| (sigma2 * row.dot(&row)).sqrt())
        .collect::<Array1<f64>>();

    Ok(OlsFit {
        coefficients,
        standard_errors,
        rss,
        log_likelihood: gaussian_log_likelihood(rss, n),
    })
}

/// Everything the dual-model fit produces for one included group.
#[derive(Debug, Clone)]
pub struct GroupFit {
    pub species: String,
    pub n: usize,
    pub mean_latitude: f64,
    /// Circular mean longitude, in degrees.
    pub mean_longitude: f64,
    pub condition_ratio: f64,
    pub reduced: OlsFit,
    pub full: OlsFit,
    /// Day effect from the full model.
    pub day: CoefficientEstimate,
    /// Control covariate effect from the full model.
    pub fake: CoefficientEstimate,
    /// `2 × (ℓ_full − ℓ_reduced)`.
    pub lr_stat: f64,
    /// Number of parameters the full model adds.
    pub lr_dof: usize,
}

/// Fits the reduced and full models to one group, or reports why the group is skipped.
pub fn fit_group(group: &SpeciesGroup, config: &PipelineConfig) -> Result<GroupFit, SkipReason> {
    let reduced_spec = ModelSpec::reduced();
    let full_spec = ModelSpec::full();

    let n = group.len();
    if n < config.min_group_size || n <= full_spec.num_params() {
        log::debug!("{}: {} observations, skipping", group.species, n);
        return Err(SkipReason::InsufficientData);
    }

    let points: Vec<CircularPoint> = group
        .observations
        .iter()
        .map(|o| CircularPoint {
            sin: o.sin,
            cos: o.cos,
        })
        .collect();
    let residuals = match residualize(&points, config.degenerate_norm_tolerance) {
        Ok(residuals) => residuals,
        Err(CircularError::DegenerateMean { norm, .. }) => {
            log::debug!(
                "{}: mean longitude vector has norm {:.3e}, skipping",
                group.species,
                norm
            );
            return Err(SkipReason::DegenerateLongitude);
        }
        Err(CircularError::Empty) => return Err(SkipReason::InsufficientData),
    };

    let covariates = GroupCovariates::new(group, &residuals);
    let x_reduced = build_design(&covariates, &reduced_spec);
    let x_full = build_design(&covariates, &full_spec);

    let numerical = |e: FitError| {
        log::warn!("{}: {}", group.species, e);
        SkipReason::NumericalFailure
    };

    let ratio = condition_ratio(&x_reduced).map_err(numerical)?;
    if ratio < config.condition_threshold {
        log::debug!(
            "{}: reduced design condition ratio {:.3e} below {:.1e}, skipping",
            group.species,
            ratio,
            config.condition_threshold
        );
        return Err(SkipReason::WeaklyIdentified);
    }

    let y = covariates.latitude.view();
    let reduced = fit_ols(x_reduced.view(), y).map_err(numerical)?;
    let full = fit_ols(x_full.view(), y).map_err(numerical)?;

    let day_index = full_spec.position(Term::Day).ok_or(SkipReason::NumericalFailure)?;
    let fake_index = full_spec.position(Term::Fake).ok_or(SkipReason::NumericalFailure)?;
    let day = full.coefficient(day_index);
    let fake = full.coefficient(fake_index);
    if !(day.standard_error > 0.0 && fake.standard_error > 0.0) {
        log::warn!("{}: non-positive standard error, skipping", group.species);
        return Err(SkipReason::NumericalFailure);
    }

    // Nested least squares can only lower the RSS; clamp rounding noise at zero.
    let lr_stat = (2.0 * (full.log_likelihood - reduced.log_likelihood)).max(0.0);
    let lr_dof = full.num_params() - reduced.num_params();

    Ok(GroupFit {
        species: group.species.clone(),
        n,
        mean_latitude: group.mean_latitude(),
        mean_longitude: residuals.mean.to_degrees(),
        condition_ratio: ratio,
        reduced,
        full,
        day,
        fake,
        lr_stat,
        lr_dof,
    })
}
