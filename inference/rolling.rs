//! Rolling quantile bands of a score against an ordering covariate.
//!
//! Scores are ordered by a covariate (mean latitude, or log sample size) and a trailing
//! window of fixed length slides over them. At each position the requested quantiles of
//! the scores in the window are reported, which shows whether the score distribution
//! drifts with the covariate.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RollingError {
    #[error("Rolling window must hold at least one value.")]
    EmptyWindow,
    #[error("Quantile level {0} is outside [0, 1].")]
    InvalidLevel(f64),
    #[error("Got {keys} ordering keys for {values} scores.")]
    LengthMismatch { keys: usize, values: usize },
}

/// One point of a rolling band.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandPoint {
    /// Identifier of the item at this position.
    pub id: String,
    /// Ordering covariate of the item at this position.
    pub key: f64,
    pub score: f64,
    /// Quantiles of the trailing window ending here, in the order of the requested levels.
    /// `None` until the window has filled.
    pub quantiles: Vec<Option<f64>>,
}

/// A complete rolling band over one ordering covariate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollingBand {
    pub covariate: String,
    pub window: usize,
    pub levels: Vec<f64>,
    pub points: Vec<BandPoint>,
}

/// A fixed-capacity window that keeps its contents sorted.
#[derive(Debug, Clone)]
struct SortedWindow {
    capacity: usize,
    sorted: Vec<f64>,
}

impl SortedWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            sorted: Vec::with_capacity(capacity),
        }
    }

    fn insert(&mut self, value: f64) {
        let at = self.sorted.partition_point(|&v| v < value);
        self.sorted.insert(at, value);
    }

    fn remove(&mut self, value: f64) {
        let at = self.sorted.partition_point(|&v| v < value);
        if self.sorted.get(at) == Some(&value) {
            self.sorted.remove(at);
        }
    }

    fn is_full(&self) -> bool {
        self.sorted.len() >= self.capacity
    }

    fn quantile(&self, level: f64) -> f64 {
        quantile_sorted(&self.sorted, level)
    }
}

/// Linear-interpolation quantile of non-empty sorted data.
pub fn quantile_sorted(sorted: &[f64], level: f64) -> f64 {
    let pos = level.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

/// Computes the rolling band of `scores` ordered by `keys`.
///
/// Items with a non-finite key or score are left out. Ties in the key are broken by `ids`
/// so the band is deterministic.
pub fn rolling_band(
    covariate: &str,
    ids: &[&str],
    keys: &[f64],
    scores: &[f64],
    window: usize,
    levels: &[f64],
) -> Result<RollingBand, RollingError> {
    if window == 0 {
        return Err(RollingError::EmptyWindow);
    }
    if let Some(&bad) = levels.iter().find(|l| !(0.0..=1.0).contains(*l)) {
        return Err(RollingError::InvalidLevel(bad));
    }
    if keys.len() != scores.len() || ids.len() != scores.len() {
        return Err(RollingError::LengthMismatch {
            keys: keys.len(),
            values: scores.len(),
        });
    }

    let mut order: Vec<usize> = (0..scores.len())
        .filter(|&i| keys[i].is_finite() && scores[i].is_finite())
        .collect();
    order.sort_by(|&a, &b| keys[a].total_cmp(&keys[b]).then_with(|| ids[a].cmp(ids[b])));

    let mut current = SortedWindow::new(window);
    let mut points = Vec::with_capacity(order.len());
    for (position, &i) in order.iter().enumerate() {
        current.insert(scores[i]);
        if position >= window {
            current.remove(scores[order[position - window]]);
        }
        let quantiles = levels
            .iter()
            .map(|&level| current.is_full().then(|| current.quantile(level)))
            .collect();
        points.push(BandPoint {
            id: ids[i].to_string(),
            key: keys[i],
            score: scores[i],
            quantiles,
        });
    }

    Ok(RollingBand {
        covariate: covariate.to_string(),
        window,
        levels: levels.to_vec(),
        points,
    })
}
