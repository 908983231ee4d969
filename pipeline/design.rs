//! # Design-Matrix Construction
//!
//! The two nested models are described by an explicit, enumerable set of [`Term`]s rather
//! than a formula string. [`ModelSpec`] lists the terms of a model in their canonical
//! column order; [`build_design`] turns a group's covariates into the numeric matrix.
//!
//! Canonical order (this order is the contract between the builder and the fitter):
//!
//! | column | reduced | full |
//! |--------|---------|------|
//! | intercept | ✓ | ✓ |
//! | day | ✓ | ✓ |
//! | lon_sin | ✓ | ✓ |
//! | lon_cos | ✓ | ✓ |
//! | fake | ✓ | ✓ |
//! | day:lon_sin | | ✓ |
//! | day:lon_cos | | ✓ |
//! | day:fake | | ✓ |

use crate::circular::CircularResiduals;
use crate::types::SpeciesGroup;
use ndarray::{Array1, Array2};
use std::fmt;

/// A single column of a design matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Term {
    Intercept,
    Day,
    LonSin,
    LonCos,
    Fake,
    DayByLonSin,
    DayByLonCos,
    DayByFake,
}

impl Term {
    /// Predictors that enter additively, in canonical order.
    pub const ADDITIVE: [Term; 4] = [Term::Day, Term::LonSin, Term::LonCos, Term::Fake];
    /// Products of day with each other additive predictor.
    pub const DAY_INTERACTIONS: [Term; 3] = [Term::DayByLonSin, Term::DayByLonCos, Term::DayByFake];

    pub fn name(self) -> &'static str {
        match self {
            Term::Intercept => "intercept",
            Term::Day => "day",
            Term::LonSin => "lon_sin",
            Term::LonCos => "lon_cos",
            Term::Fake => "fake",
            Term::DayByLonSin => "day:lon_sin",
            Term::DayByLonCos => "day:lon_cos",
            Term::DayByFake => "day:fake",
        }
    }

    #[inline]
    fn value(self, row: &CovariateRow) -> f64 {
        match self {
            Term::Intercept => 1.0,
            Term::Day => row.day,
            Term::LonSin => row.lon_sin,
            Term::LonCos => row.lon_cos,
            Term::Fake => row.fake,
            Term::DayByLonSin => row.day * row.lon_sin,
            Term::DayByLonCos => row.day * row.lon_cos,
            Term::DayByFake => row.day * row.fake,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The ordered list of terms that make up one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    terms: Vec<Term>,
}

impl ModelSpec {
    /// Intercept plus the additive predictors.
    pub fn reduced() -> Self {
        let mut terms = vec![Term::Intercept];
        terms.extend_from_slice(&Term::ADDITIVE);
        Self { terms }
    }

    /// The reduced model plus every day interaction.
    pub fn full() -> Self {
        let mut spec = Self::reduced();
        spec.terms.extend_from_slice(&Term::DAY_INTERACTIONS);
        spec
    }

    #[inline]
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    #[inline]
    pub fn num_params(&self) -> usize {
        self.terms.len()
    }

    /// Column index of `term`, if the model contains it.
    pub fn position(&self, term: Term) -> Option<usize> {
        self.terms.iter().position(|&t| t == term)
    }
}

/// Per-observation covariates after circular residualization.
#[derive(Debug, Clone, Copy)]
struct CovariateRow {
    day: f64,
    lon_sin: f64,
    lon_cos: f64,
    fake: f64,
}

/// The response and raw covariate columns of one group, ready to be expanded into any
/// model's design matrix.
#[derive(Debug, Clone)]
pub struct GroupCovariates {
    pub latitude: Array1<f64>,
    rows: Vec<CovariateRow>,
}

impl GroupCovariates {
    /// Pairs each observation with its longitude residual. `residuals` must come from the
    /// same group in the same order.
    pub fn new(group: &SpeciesGroup, residuals: &CircularResiduals) -> Self {
        debug_assert_eq!(group.len(), residuals.residuals.len());
        let latitude = group.observations.iter().map(|o| o.latitude).collect();
        let rows = group
            .observations
            .iter()
            .zip(&residuals.residuals)
            .map(|(o, r)| CovariateRow {
                day: o.day,
                lon_sin: r.sin,
                lon_cos: r.cos,
                fake: o.fake,
            })
            .collect();
        Self { latitude, rows }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Builds the `n × p` design matrix of `spec` for a group.
pub fn build_design(covariates: &GroupCovariates, spec: &ModelSpec) -> Array2<f64> {
    let terms = spec.terms();
    Array2::from_shape_fn((covariates.len(), terms.len()), |(i, j)| {
        terms[j].value(&covariates.rows[i])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circular::{CircularPoint, residualize};
    use crate::types::Observation;
    use chrono::NaiveDate;

    fn group() -> SpeciesGroup {
        let observations = (0..4)
            .map(|i| {
                let longitude = 10.0 + i as f64;
                let p = CircularPoint::from_degrees(longitude);
                Observation {
                    species: "Parus major".to_string(),
                    event_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                    latitude: 50.0 + i as f64,
                    longitude,
                    day: 18.0 + 0.1 * i as f64,
                    sin: p.sin,
                    cos: p.cos,
                    fake: i as f64 - 1.5,
                }
            })
            .collect();
        SpeciesGroup {
            species: "Parus major".to_string(),
            observations,
        }
    }

    #[test]
    fn models_are_nested_with_three_extra_terms() {
        let reduced = ModelSpec::reduced();
        let full = ModelSpec::full();
        assert_eq!(reduced.num_params(), 5);
        assert_eq!(full.num_params(), 8);
        assert_eq!(&full.terms()[..5], reduced.terms());
        assert_eq!(full.position(Term::Day), Some(1));
        assert_eq!(full.position(Term::Fake), Some(4));
        assert_eq!(reduced.position(Term::DayByFake), None);
    }

    #[test]
    fn design_columns_follow_the_term_list() {
        let g = group();
        let points: Vec<_> = g
            .observations
            .iter()
            .map(|o| CircularPoint { sin: o.sin, cos: o.cos })
            .collect();
        let residuals = residualize(&points, 1e-9).unwrap();
        let covariates = GroupCovariates::new(&g, &residuals);
        let x = build_design(&covariates, &ModelSpec::full());

        assert_eq!(x.shape(), &[4, 8]);
        for i in 0..4 {
            let o = &g.observations[i];
            let r = residuals.residuals[i];
            assert_eq!(x[[i, 0]], 1.0);
            assert_eq!(x[[i, 1]], o.day);
            assert_eq!(x[[i, 2]], r.sin);
            assert_eq!(x[[i, 3]], r.cos);
            assert_eq!(x[[i, 4]], o.fake);
            assert_eq!(x[[i, 5]], o.day * r.sin);
            assert_eq!(x[[i, 6]], o.day * r.cos);
            assert_eq!(x[[i, 7]], o.day * o.fake);
        }
        assert_eq!(covariates.latitude[3], 53.0);
    }
}
