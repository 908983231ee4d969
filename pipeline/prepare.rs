//! Derives per-observation covariates and partitions observations by species.

use crate::circular::CircularPoint;
use crate::types::{Observation, OccurrenceRecord, SpeciesGroup};
use ahash::AHashMap;
use chrono::NaiveDate;
use itertools::Itertools;
use rand::Rng;
use rand_distr::StandardNormal;

/// Days between `epoch` and `date`, in thousands.
#[inline]
pub fn day_index(date: NaiveDate, epoch: NaiveDate) -> f64 {
    (date - epoch).num_days() as f64 / 1000.0
}

/// Attaches `day`, the longitude embedding and the control covariate to every record.
///
/// The control covariate is drawn from `rng` in input order, one standard-normal value
/// per record, so a seeded generator reproduces the same draws for the same input.
pub fn derive_observations<R: Rng + ?Sized>(
    records: &[OccurrenceRecord],
    epoch: NaiveDate,
    rng: &mut R,
) -> Vec<Observation> {
    records
        .iter()
        .map(|record| {
            let embedding = CircularPoint::from_degrees(record.longitude);
            Observation {
                species: record.species.clone(),
                event_date: record.event_date,
                latitude: record.latitude,
                longitude: record.longitude,
                day: day_index(record.event_date, epoch),
                sin: embedding.sin,
                cos: embedding.cos,
                fake: rng.sample(StandardNormal),
            }
        })
        .collect()
}

/// Partitions observations into one group per species, sorted by species identifier.
/// Observations keep their input order within a group.
pub fn group_by_species(observations: Vec<Observation>) -> Vec<SpeciesGroup> {
    let mut by_species: AHashMap<String, Vec<Observation>> = AHashMap::new();
    for observation in observations {
        by_species
            .entry(observation.species.clone())
            .or_default()
            .push(observation);
    }

    by_species
        .into_iter()
        .sorted_unstable_by(|a, b| a.0.cmp(&b.0))
        .map(|(species, observations)| SpeciesGroup {
            species,
            observations,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn record(species: &str, date: (i32, u32, u32), longitude: f64) -> OccurrenceRecord {
        OccurrenceRecord {
            species: species.to_string(),
            event_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            latitude: 40.0,
            longitude,
        }
    }

    #[test]
    fn day_is_measured_in_thousands_of_days() {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!(day_index(epoch, epoch), 0.0);
        let later = NaiveDate::from_ymd_opt(1972, 9, 27).unwrap();
        assert_abs_diff_eq!(day_index(later, epoch), 1.0, epsilon = 1e-12);
        let earlier = NaiveDate::from_ymd_opt(1969, 12, 31).unwrap();
        assert_abs_diff_eq!(day_index(earlier, epoch), -0.001, epsilon = 1e-12);
    }

    #[test]
    fn seeded_draws_are_reproducible() {
        let records = vec![
            record("A", (2020, 1, 1), 10.0),
            record("B", (2020, 1, 2), -170.0),
            record("A", (2021, 1, 1), 12.0),
        ];
        let epoch = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        let first = derive_observations(&records, epoch, &mut StdRng::seed_from_u64(9));
        let second = derive_observations(&records, epoch, &mut StdRng::seed_from_u64(9));
        assert_eq!(first, second);

        let other = derive_observations(&records, epoch, &mut StdRng::seed_from_u64(10));
        assert_ne!(first[0].fake, other[0].fake);

        let p = CircularPoint::from_degrees(-170.0);
        assert_eq!(first[1].sin, p.sin);
        assert_eq!(first[1].cos, p.cos);
    }

    #[test]
    fn groups_are_sorted_and_keep_input_order() {
        let records = vec![
            record("Turdus merula", (2020, 1, 3), 1.0),
            record("Anas platyrhynchos", (2020, 1, 1), 2.0),
            record("Turdus merula", (2020, 1, 2), 3.0),
        ];
        let epoch = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        let observations = derive_observations(&records, epoch, &mut StdRng::seed_from_u64(1));
        let groups = group_by_species(observations);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].species, "Anas platyrhynchos");
        assert_eq!(groups[1].species, "Turdus merula");
        let longitudes: Vec<f64> = groups[1].observations.iter().map(|o| o.longitude).collect();
        assert_eq!(longitudes, vec![1.0, 3.0]);
    }
}
