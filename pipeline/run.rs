//! # Pipeline Orchestration
//!
//! Ties the stages together for one batch run:
//!
//! 1.  Derive covariates for every record, drawing the control covariate from the caller's
//!     generator in input order.
//! 2.  Group by species and fit every group in parallel. Each rayon task owns its group and
//!     returns either a fit or a skip reason; nothing is shared while fitting.
//! 3.  Map the fitted statistics onto the normal scale.
//! 4.  Run the cross-group inference on the day-effect z-scores and append the derived
//!     columns to the result rows.

use crate::config::{ConfigError, PipelineConfig};
use crate::data::DataError;
use crate::fit::{GroupFit, fit_group};
use crate::inference::bonferroni::FamilyWiseThreshold;
use crate::inference::calibration::{NullCalibration, null_calibration};
use crate::inference::lfdr::local_fdr;
use crate::inference::rolling::{RollingBand, RollingError, rolling_band};
use crate::normalize::{NormalizeError, lr_to_z, normal_cdf, t_to_z, wilson_hilferty_score};
use crate::prepare::{derive_observations, group_by_species};
use crate::types::{OccurrenceRecord, SkipReason, SkipSummary, SpeciesGroup, SpeciesTrend};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;

/// Central probability range over which the two LR scores are compared.
const AGREEMENT_RANGE: (f64, f64) = (0.1, 0.99);

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Data error: {0}")]
    Data(#[from] DataError),
    #[error("Rolling band error: {0}")]
    Rolling(#[from] RollingError),
}

/// The fitted two-group model behind the local FDR column.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFdrSummary {
    pub pi0: f64,
    pub null_mean: f64,
    pub null_sd: f64,
    /// Groups with local FDR at or below the configured level.
    pub discoveries: usize,
    /// Histogram bin centres and the monotone local FDR at each.
    pub bin_centers: Vec<f64>,
    pub bin_fdr: Vec<f64>,
}

/// Everything one run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// One row per included group, sorted by species.
    pub trends: Vec<SpeciesTrend>,
    pub skipped: SkipSummary,
    pub groups_considered: usize,
    pub family_wise: Option<FamilyWiseThreshold>,
    pub local_fdr: Option<LocalFdrSummary>,
    /// Calibration of the control-covariate z-scores against N(0, 1).
    pub control_calibration: Option<NullCalibration>,
    /// Largest |exact − Wilson–Hilferty| LR score over groups in the central range.
    pub wilson_hilferty_max_disagreement: Option<f64>,
    /// Day z-scores ordered by group mean latitude.
    pub latitude_band: RollingBand,
    /// Day z-scores ordered by log group size.
    pub sample_size_band: RollingBand,
}

/// Runs the pipeline with a generator seeded from `config.seed`.
pub fn run_pipeline_seeded(
    records: &[OccurrenceRecord],
    config: &PipelineConfig,
) -> Result<PipelineOutput, PipelineError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    run_pipeline(records, config, &mut rng)
}

/// Runs the pipeline on records the caller has already filtered.
pub fn run_pipeline<R: Rng + ?Sized>(
    records: &[OccurrenceRecord],
    config: &PipelineConfig,
    rng: &mut R,
) -> Result<PipelineOutput, PipelineError> {
    config.validate()?;
    if records.is_empty() {
        return Err(DataError::NoRecords { dropped: 0 }.into());
    }

    let observations = derive_observations(records, config.epoch, rng);
    let groups = group_by_species(observations);
    log::info!(
        "Derived covariates for {} records in {} species.",
        records.len(),
        groups.len()
    );
    analyze_groups(groups, config)
}

/// Fits, normalizes and runs the cross-group inference on prepared groups.
pub fn analyze_groups(
    mut groups: Vec<SpeciesGroup>,
    config: &PipelineConfig,
) -> Result<PipelineOutput, PipelineError> {
    config.validate()?;
    groups.sort_by(|a, b| a.species.cmp(&b.species));
    let groups_considered = groups.len();

    let outcomes: Vec<Result<SpeciesTrend, SkipReason>> = groups
        .into_par_iter()
        .map(|group| {
            let fit = fit_group(&group, config)?;
            normalize_fit(fit, config).map_err(|e| {
                log::warn!("{}: {}", group.species, e);
                SkipReason::NumericalFailure
            })
        })
        .collect();

    let mut skipped = SkipSummary::default();
    let mut trends = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome {
            Ok(trend) => trends.push(trend),
            Err(reason) => skipped.record(reason),
        }
    }
    log::info!(
        "Fitted {} of {} groups. Skipped: {} insufficient data, {} degenerate longitude, {} weakly identified, {} numerical failure.",
        trends.len(),
        groups_considered,
        skipped.insufficient_data,
        skipped.degenerate_longitude,
        skipped.weakly_identified,
        skipped.numerical_failure
    );

    let day_z: Vec<f64> = trends.iter().map(|t| t.day_z).collect();

    let family_wise = FamilyWiseThreshold::for_scores(config.fwer_alpha, day_z.iter().copied());
    if let Some(threshold) = &family_wise {
        for trend in &mut trends {
            trend.bonferroni_significant = threshold.is_significant(trend.day_z);
        }
        log::info!(
            "Bonferroni |z| threshold {:.3} over {} tests: {} significant.",
            threshold.z_threshold,
            threshold.tests,
            trends.iter().filter(|t| t.bonferroni_significant).count()
        );
    }

    let local_fdr = match local_fdr(&day_z, &config.local_fdr) {
        Ok(estimate) => {
            for (trend, fdr) in trends.iter_mut().zip(&estimate.fdr) {
                trend.local_fdr = *fdr;
                trend.fdr_discovery = fdr.is_some_and(|v| v <= config.fdr_level);
            }
            let discoveries = trends.iter().filter(|t| t.fdr_discovery).count();
            log::info!(
                "{} discoveries at local FDR <= {}.",
                discoveries,
                config.fdr_level
            );
            Some(LocalFdrSummary {
                pi0: estimate.pi0,
                null_mean: estimate.null_mean,
                null_sd: estimate.null_sd,
                discoveries,
                bin_centers: estimate.bin_centers,
                bin_fdr: estimate.bin_fdr,
            })
        }
        Err(e) => {
            log::warn!("Local FDR not estimated: {e}");
            None
        }
    };

    let control_calibration = null_calibration(trends.iter().map(|t| t.fake_z));
    if let Some(c) = &control_calibration {
        log::info!(
            "Control covariate z-scores: mean {:.3}, variance {:.3}, KS {:.4} (p = {:.3}).",
            c.mean,
            c.variance,
            c.ks_statistic,
            c.ks_p_value
        );
    }

    let wilson_hilferty_max_disagreement = trends
        .iter()
        .filter(|t| (AGREEMENT_RANGE.0..=AGREEMENT_RANGE.1).contains(&normal_cdf(t.lr_z)))
        .filter_map(|t| t.lr_z_wilson_hilferty.computed().map(|wh| (wh - t.lr_z).abs()))
        .reduce(f64::max);
    if let Some(d) = wilson_hilferty_max_disagreement {
        log::info!("Largest exact vs Wilson-Hilferty LR score disagreement: {d:.4}");
    }

    let ids: Vec<&str> = trends.iter().map(|t| t.species.as_str()).collect();
    let latitudes: Vec<f64> = trends.iter().map(|t| t.mean_latitude).collect();
    let log_sizes: Vec<f64> = trends.iter().map(|t| (t.n as f64).ln()).collect();
    let latitude_band = rolling_band(
        "mean_latitude",
        &ids,
        &latitudes,
        &day_z,
        config.rolling_window,
        &config.rolling_quantiles,
    )?;
    let sample_size_band = rolling_band(
        "log_n",
        &ids,
        &log_sizes,
        &day_z,
        config.rolling_window,
        &config.rolling_quantiles,
    )?;

    Ok(PipelineOutput {
        trends,
        skipped,
        groups_considered,
        family_wise,
        local_fdr,
        control_calibration,
        wilson_hilferty_max_disagreement,
        latitude_band,
        sample_size_band,
    })
}

/// Maps one group's raw statistics onto the normal scale.
fn normalize_fit(fit: GroupFit, config: &PipelineConfig) -> Result<SpeciesTrend, NormalizeError> {
    let clip = config.probability_clip;
    let day_t = fit.day.t_statistic();
    let fake_t = fit.fake.t_statistic();

    Ok(SpeciesTrend {
        day_z: t_to_z(day_t, fit.n, config.t_dof_adjustment, clip)?,
        fake_z: t_to_z(fake_t, fit.n, config.t_dof_adjustment, clip)?,
        lr_z: lr_to_z(fit.lr_stat, fit.lr_dof, clip)?,
        lr_z_wilson_hilferty: wilson_hilferty_score(
            fit.lr_stat,
            fit.lr_dof,
            fit.condition_ratio,
            config.condition_threshold,
        ),
        species: fit.species,
        n: fit.n,
        mean_latitude: fit.mean_latitude,
        mean_longitude: fit.mean_longitude,
        condition_ratio: fit.condition_ratio,
        day_coef: fit.day.estimate,
        day_se: fit.day.standard_error,
        day_t,
        fake_coef: fit.fake.estimate,
        fake_se: fit.fake.standard_error,
        fake_t,
        lr_stat: fit.lr_stat,
        lr_dof: fit.lr_dof,
        local_fdr: None,
        bonferroni_significant: false,
        fdr_discovery: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use rand_distr::StandardNormal;

    fn species_records(
        species: &str,
        n: usize,
        day_slope: f64,
        rng: &mut StdRng,
    ) -> Vec<OccurrenceRecord> {
        let start = NaiveDate::from_ymd_opt(2012, 1, 1).unwrap();
        (0..n)
            .map(|_| {
                let offset = rng.gen_range(0..3650);
                let date = start + Duration::days(offset);
                let day = offset as f64 / 1000.0;
                OccurrenceRecord {
                    species: species.to_string(),
                    event_date: date,
                    latitude: 40.0 + day_slope * day + 0.5 * rng.sample::<f64, _>(StandardNormal),
                    longitude: 10.0 + 2.0 * rng.sample::<f64, _>(StandardNormal),
                }
            })
            .collect()
    }

    #[test]
    fn skips_are_tallied_and_rows_sorted() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut records = species_records("Parus major", 40, 1.0, &mut rng);
        records.extend(species_records("Alauda arvensis", 40, 0.0, &mut rng));
        records.extend(species_records("Corvus corax", 4, 0.0, &mut rng));

        let output = run_pipeline_seeded(&records, &PipelineConfig::default()).unwrap();
        assert_eq!(output.groups_considered, 3);
        assert_eq!(output.skipped.insufficient_data, 1);
        assert_eq!(output.skipped.total(), 1);
        let species: Vec<&str> = output.trends.iter().map(|t| t.species.as_str()).collect();
        assert_eq!(species, vec!["Alauda arvensis", "Parus major"]);

        // Two groups are too few for the local FDR and the default rolling window.
        assert!(output.local_fdr.is_none());
        assert!(output.trends.iter().all(|t| t.local_fdr.is_none()));
        assert!(output.family_wise.is_some());
        assert!(output.latitude_band.points.iter().all(|p| p.quantiles[0].is_none()));
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let mut rng = StdRng::seed_from_u64(8);
        let records = species_records("Parus major", 60, 0.5, &mut rng);
        let config = PipelineConfig {
            seed: 21,
            ..PipelineConfig::default()
        };
        let first = run_pipeline_seeded(&records, &config).unwrap();
        let second = run_pipeline_seeded(&records, &config).unwrap();
        assert_eq!(first.trends, second.trends);
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(
            run_pipeline_seeded(&[], &PipelineConfig::default()),
            Err(PipelineError::Data(DataError::NoRecords { .. }))
        ));
    }

    #[test]
    fn invalid_configuration_is_rejected_before_fitting() {
        let config = PipelineConfig {
            rolling_window: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            analyze_groups(Vec::new(), &config),
            Err(PipelineError::Config(_))
        ));
    }
}
