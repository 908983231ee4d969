//! Unit-circle embedding of longitude and the circular group mean used to centre it.
//!
//! Longitude wraps at ±180°, so a species straddling the antimeridian has an arithmetic
//! mean longitude on the wrong side of the planet. Working with `(sin θ, cos θ)` and a
//! vector-sum mean avoids the wraparound entirely.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CircularError {
    #[error("Cannot take the circular mean of an empty sequence.")]
    Empty,
    #[error(
        "The averaged longitude vector has norm {norm:.3e}, below the tolerance {tolerance:.1e}; the mean direction is undefined."
    )]
    DegenerateMean { norm: f64, tolerance: f64 },
}

/// A point on the unit circle stored as its sine and cosine components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircularPoint {
    pub sin: f64,
    pub cos: f64,
}

impl CircularPoint {
    /// Embeds an angle given in degrees.
    #[inline]
    pub fn from_degrees(degrees: f64) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self { sin, cos }
    }

    /// The angle in degrees, in (-180, 180].
    #[inline]
    pub fn to_degrees(self) -> f64 {
        self.sin.atan2(self.cos).to_degrees()
    }

    #[inline]
    pub fn norm(self) -> f64 {
        self.sin.hypot(self.cos)
    }

    /// Component-wise difference, i.e. the residual of `self` around `centre`.
    #[inline]
    pub fn residual(self, centre: CircularPoint) -> CircularPoint {
        CircularPoint {
            sin: self.sin - centre.sin,
            cos: self.cos - centre.cos,
        }
    }
}

/// The normalized mean direction of a group of embeddings.
///
/// Averages the sine and cosine components separately and rescales the averaged vector
/// to unit length. A mean vector shorter than `tolerance` means the points are spread
/// (nearly) uniformly around the circle and no direction is meaningful.
pub fn circular_mean(
    points: impl IntoIterator<Item = CircularPoint>,
    tolerance: f64,
) -> Result<CircularPoint, CircularError> {
    let mut count = 0usize;
    let mut sum_sin = 0.0;
    let mut sum_cos = 0.0;
    for p in points {
        sum_sin += p.sin;
        sum_cos += p.cos;
        count += 1;
    }
    if count == 0 {
        return Err(CircularError::Empty);
    }

    let mean = CircularPoint {
        sin: sum_sin / count as f64,
        cos: sum_cos / count as f64,
    };
    let norm = mean.norm();
    if !(norm >= tolerance) {
        return Err(CircularError::DegenerateMean { norm, tolerance });
    }

    Ok(CircularPoint {
        sin: mean.sin / norm,
        cos: mean.cos / norm,
    })
}

/// Within-group residual embeddings together with the mean they were centred on.
#[derive(Debug, Clone)]
pub struct CircularResiduals {
    pub mean: CircularPoint,
    pub residuals: Vec<CircularPoint>,
}

/// Centres every embedding on the group's circular mean.
pub fn residualize(
    points: &[CircularPoint],
    tolerance: f64,
) -> Result<CircularResiduals, CircularError> {
    let mean = circular_mean(points.iter().copied(), tolerance)?;
    let residuals = points.iter().map(|p| p.residual(mean)).collect();
    Ok(CircularResiduals { mean, residuals })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn embedding_matches_trigonometry() {
        let p = CircularPoint::from_degrees(90.0);
        assert_abs_diff_eq!(p.sin, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.cos, 0.0, epsilon = 1e-12);

        let q = CircularPoint::from_degrees(-135.0);
        assert_abs_diff_eq!(q.norm(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q.to_degrees(), -135.0, epsilon = 1e-9);
    }

    #[test]
    fn mean_handles_the_antimeridian() {
        let points: Vec<_> = [179.0, -179.0, 178.0, -178.0]
            .iter()
            .map(|&d| CircularPoint::from_degrees(d))
            .collect();
        let mean = circular_mean(points.iter().copied(), 1e-9).unwrap();
        assert_abs_diff_eq!(mean.norm(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(mean.to_degrees().abs(), 180.0, epsilon = 1e-9);
    }

    #[test]
    fn uniformly_spread_longitudes_are_degenerate() {
        let points: Vec<_> = [0.0, 90.0, 180.0, 270.0]
            .iter()
            .map(|&d| CircularPoint::from_degrees(d))
            .collect();
        match circular_mean(points.iter().copied(), 1e-9) {
            Err(CircularError::DegenerateMean { norm, .. }) => assert!(norm < 1e-9),
            other => panic!("Expected DegenerateMean, got {:?}", other),
        }
    }

    #[test]
    fn empty_sequence_is_rejected() {
        assert_eq!(
            circular_mean(std::iter::empty(), 1e-9),
            Err(CircularError::Empty)
        );
    }

    #[test]
    fn residuals_are_embedding_minus_mean() {
        let points: Vec<_> = [10.0, 20.0, 30.0]
            .iter()
            .map(|&d| CircularPoint::from_degrees(d))
            .collect();
        let centred = residualize(&points, 1e-9).unwrap();
        assert_abs_diff_eq!(centred.mean.to_degrees(), 20.0, epsilon = 1e-9);
        for (p, r) in points.iter().zip(&centred.residuals) {
            assert_abs_diff_eq!(r.sin, p.sin - centred.mean.sin, epsilon = 1e-15);
            assert_abs_diff_eq!(r.cos, p.cos - centred.mean.cos, epsilon = 1e-15);
        }
        // The middle point sits on the mean direction.
        assert_abs_diff_eq!(centred.residuals[1].norm(), 0.0, epsilon = 1e-12);
    }
}
