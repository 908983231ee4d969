//! # Large-Scale Inference
//!
//! Decisions and diagnostics computed across the whole collection of per-group z-scores:
//!
//! - [`bonferroni`]: the family-wise error threshold on |z|.
//! - [`lfdr`]: Efron's empirical-Bayes local false-discovery rate.
//! - [`rolling`]: rolling-window quantile bands of z against latitude and sample size.
//! - [`calibration`]: how closely a set of z-scores follows N(0, 1).

pub mod bonferroni;
pub mod calibration;
pub mod lfdr;
pub mod rolling;
