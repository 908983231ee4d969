// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is only for types that are shared between files.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One raw occurrence row as supplied by the caller (already filtered by date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccurrenceRecord {
    pub species: String,
    pub event_date: NaiveDate,
    /// Decimal degrees in [-90, 90].
    pub latitude: f64,
    /// Decimal degrees in [-180, 180].
    pub longitude: f64,
}

/// An occurrence with its derived covariates attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub species: String,
    pub event_date: NaiveDate,
    pub latitude: f64,
    pub longitude: f64,
    /// Days since the configured epoch, in thousands.
    pub day: f64,
    pub sin: f64,
    pub cos: f64,
    /// Control covariate drawn independently of everything else.
    pub fake: f64,
}

/// All observations of one species, with the group-level summaries the fitter needs.
#[derive(Debug, Clone)]
pub struct SpeciesGroup {
    pub species: String,
    pub observations: Vec<Observation>,
}

impl SpeciesGroup {
    #[inline]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Arithmetic mean latitude, the group centroid used by the diagnostics.
    pub fn mean_latitude(&self) -> f64 {
        if self.observations.is_empty() {
            return f64::NAN;
        }
        self.observations.iter().map(|o| o.latitude).sum::<f64>() / self.len() as f64
    }
}

/// Why a group did not make it into the result table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SkipReason {
    /// Fewer observations than the inclusion rule allows.
    InsufficientData,
    /// The longitude embeddings average to (almost) the zero vector.
    DegenerateLongitude,
    /// The reduced design is numerically close to rank deficient.
    WeaklyIdentified,
    /// A linear algebra routine failed on an otherwise acceptable group.
    NumericalFailure,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SkipReason::InsufficientData => "insufficient data",
            SkipReason::DegenerateLongitude => "degenerate longitude",
            SkipReason::WeaklyIdentified => "weakly identified",
            SkipReason::NumericalFailure => "numerical failure",
        };
        f.write_str(label)
    }
}

/// Counts of excluded groups by reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipSummary {
    pub insufficient_data: usize,
    pub degenerate_longitude: usize,
    pub weakly_identified: usize,
    pub numerical_failure: usize,
}

impl SkipSummary {
    pub fn record(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::InsufficientData => self.insufficient_data += 1,
            SkipReason::DegenerateLongitude => self.degenerate_longitude += 1,
            SkipReason::WeaklyIdentified => self.weakly_identified += 1,
            SkipReason::NumericalFailure => self.numerical_failure += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.insufficient_data
            + self.degenerate_longitude
            + self.weakly_identified
            + self.numerical_failure
    }
}

/// The Wilson–Hilferty score is only defined under its preconditions; otherwise it carries
/// the neutral sentinel and must not be used for inference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ApproxScore {
    Computed(f64),
    NotComputed,
}

impl ApproxScore {
    /// Value for tabular output: the score itself or the sentinel `0.0`.
    #[inline]
    pub fn value_or_sentinel(&self) -> f64 {
        match self {
            ApproxScore::Computed(z) => *z,
            ApproxScore::NotComputed => 0.0,
        }
    }

    #[inline]
    pub fn computed(&self) -> Option<f64> {
        match self {
            ApproxScore::Computed(z) => Some(*z),
            ApproxScore::NotComputed => None,
        }
    }
}

/// One row of the result table: everything the pipeline derives for an included species.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeciesTrend {
    pub species: String,
    pub n: usize,
    pub mean_latitude: f64,
    /// Circular mean longitude of the group, in degrees.
    pub mean_longitude: f64,
    pub condition_ratio: f64,

    pub day_coef: f64,
    pub day_se: f64,
    pub day_t: f64,
    pub day_z: f64,

    pub fake_coef: f64,
    pub fake_se: f64,
    pub fake_t: f64,
    pub fake_z: f64,

    pub lr_stat: f64,
    pub lr_dof: usize,
    pub lr_z: f64,
    pub lr_z_wilson_hilferty: ApproxScore,

    /// Appended by the inference stage. `None` when too few groups support an estimate.
    pub local_fdr: Option<f64>,
    pub bonferroni_significant: bool,
    pub fdr_discovery: bool,
}
