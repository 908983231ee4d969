//! # Pipeline Configuration
//!
//! Every tunable constant of the trend pipeline lives in [`PipelineConfig`]. The struct is
//! serialized to and from TOML so that a run can be reproduced exactly from the file that
//! produced it. Missing keys fall back to the defaults, which are the values the analysis
//! was designed around.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

/// Which null density the local false-discovery-rate estimate compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullModel {
    /// The theoretical N(0, 1) null.
    Theoretical,
    /// A normal null whose centre and spread are matched to the central peak of the
    /// observed z-score histogram.
    CentralMatching,
}

/// Settings for the empirical-Bayes local FDR estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalFdrConfig {
    /// Number of equal-width histogram bins spanning the observed z-scores.
    pub bins: usize,
    /// Degree of the polynomial used in the Poisson regression for the mixture density.
    pub degree: usize,
    pub null_model: NullModel,
    /// Fraction of the z-scores (centred on the median) treated as the null-dominated core.
    pub central_fraction: f64,
    /// Below this many finite z-scores no estimate is attempted.
    pub min_scores: usize,
    pub max_iterations: usize,
    pub convergence_tolerance: f64,
}

impl Default for LocalFdrConfig {
    fn default() -> Self {
        Self {
            bins: 120,
            degree: 7,
            null_model: NullModel::Theoretical,
            central_fraction: 0.5,
            min_scores: 100,
            max_iterations: 50,
            convergence_tolerance: 1e-8,
        }
    }
}

/// The complete blueprint of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Day zero for the `day` covariate. Days are measured from here in thousands.
    pub epoch: NaiveDate,
    /// Groups with fewer observations are excluded as having insufficient data.
    pub min_group_size: usize,
    /// Smallest acceptable ratio of smallest to largest singular value of the reduced design.
    pub condition_threshold: f64,
    /// Norm below which a circular mean direction is considered undefined.
    pub degenerate_norm_tolerance: f64,
    /// Subtracted from n to give the Student-t degrees of freedom of a coefficient statistic.
    pub t_dof_adjustment: usize,
    /// Probabilities are clipped to `[clip, 1 - clip]` before normal inversion.
    pub probability_clip: f64,
    /// Target family-wise error rate for the Bonferroni threshold.
    pub fwer_alpha: f64,
    /// Groups whose local FDR is at or below this level are reported as discoveries.
    pub fdr_level: f64,
    pub rolling_window: usize,
    pub rolling_quantiles: Vec<f64>,
    /// Seed for the control covariate draw.
    pub seed: u64,
    pub local_fdr: LocalFdrConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            epoch: NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default(),
            min_group_size: 10,
            condition_threshold: 1e-7,
            degenerate_norm_tolerance: 1e-9,
            t_dof_adjustment: 5,
            probability_clip: 1e-12,
            fwer_alpha: 0.05,
            fdr_level: 0.1,
            rolling_window: 200,
            rolling_quantiles: vec![0.025, 0.5, 0.975],
            seed: 0,
            local_fdr: LocalFdrConfig::default(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl PipelineConfig {
    /// Loads a configuration from a TOML file and validates it.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration to a human-readable TOML file.
    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Rejects settings under which the statistics are undefined.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::InvalidValue {
                field,
                reason: reason.into(),
            }
        }

        if self.min_group_size <= self.t_dof_adjustment {
            return Err(invalid(
                "min_group_size",
                format!(
                    "must exceed t_dof_adjustment ({}) so every included group has positive t degrees of freedom",
                    self.t_dof_adjustment
                ),
            ));
        }
        if !(self.condition_threshold > 0.0 && self.condition_threshold < 1.0) {
            return Err(invalid("condition_threshold", "must lie in (0, 1)"));
        }
        if !(self.degenerate_norm_tolerance > 0.0) {
            return Err(invalid("degenerate_norm_tolerance", "must be positive"));
        }
        if !(self.probability_clip > 0.0 && self.probability_clip < 0.5) {
            return Err(invalid("probability_clip", "must lie in (0, 0.5)"));
        }
        if !(self.fwer_alpha > 0.0 && self.fwer_alpha < 1.0) {
            return Err(invalid("fwer_alpha", "must lie in (0, 1)"));
        }
        if !(self.fdr_level > 0.0 && self.fdr_level <= 1.0) {
            return Err(invalid("fdr_level", "must lie in (0, 1]"));
        }
        if self.rolling_window == 0 {
            return Err(invalid("rolling_window", "must be at least 1"));
        }
        if let Some(q) = self
            .rolling_quantiles
            .iter()
            .find(|q| !(0.0..=1.0).contains(*q))
        {
            return Err(invalid(
                "rolling_quantiles",
                format!("quantile level {q} is outside [0, 1]"),
            ));
        }

        let lfdr = &self.local_fdr;
        if lfdr.bins < 10 {
            return Err(invalid("local_fdr.bins", "must be at least 10"));
        }
        if lfdr.degree == 0 || lfdr.degree >= lfdr.bins {
            return Err(invalid(
                "local_fdr.degree",
                "must be positive and smaller than the number of bins",
            ));
        }
        if !(lfdr.central_fraction > 0.0 && lfdr.central_fraction < 1.0) {
            return Err(invalid("local_fdr.central_fraction", "must lie in (0, 1)"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn default_config_is_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.min_group_size, 10);
        assert_eq!(config.t_dof_adjustment, 5);
        assert_eq!(config.rolling_window, 200);
        assert_eq!(config.epoch, NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
    }

    #[test]
    fn toml_round_trip_preserves_every_field() {
        let mut config = PipelineConfig::default();
        config.seed = 1234;
        config.local_fdr.null_model = NullModel::CentralMatching;
        config.rolling_quantiles = vec![0.1, 0.9];

        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        config.save(path).unwrap();
        let loaded = PipelineConfig::load(path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "seed = 7\nepoch = \"2000-01-01\"\n\n[local_fdr]\nbins = 60").unwrap();
        file.flush().unwrap();

        let loaded = PipelineConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(loaded.seed, 7);
        assert_eq!(loaded.epoch, NaiveDate::from_ymd_opt(2000, 1, 1).unwrap());
        assert_eq!(loaded.local_fdr.bins, 60);
        assert_eq!(loaded.local_fdr.degree, 7);
        assert_eq!(loaded.fwer_alpha, 0.05);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = PipelineConfig::default();
        config.min_group_size = 5;
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "min_group_size"),
            other => panic!("Expected InvalidValue(min_group_size), got {:?}", other),
        }

        let mut config = PipelineConfig::default();
        config.rolling_quantiles = vec![0.5, 1.5];
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.local_fdr.degree = 200;
        assert!(config.validate().is_err());
    }
}
