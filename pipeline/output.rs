//! Tabular export of the result rows and the rolling bands.

use crate::inference::rolling::RollingBand;
use crate::run::LocalFdrSummary;
use crate::types::SpeciesTrend;
use polars::prelude::*;
use std::fs::File;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// One column per field of [`SpeciesTrend`]. The Wilson–Hilferty score is written with
/// its sentinel and a separate `lr_z_wh_computed` flag.
pub fn trends_to_dataframe(trends: &[SpeciesTrend]) -> Result<DataFrame, OutputError> {
    fn floats(name: &str, trends: &[SpeciesTrend], f: impl Fn(&SpeciesTrend) -> f64) -> Column {
        Column::new(name.into(), trends.iter().map(f).collect::<Vec<f64>>())
    }

    let columns = vec![
        Column::new(
            "species".into(),
            trends.iter().map(|t| t.species.as_str()).collect::<Vec<&str>>(),
        ),
        Column::new(
            "n".into(),
            trends.iter().map(|t| t.n as u64).collect::<Vec<u64>>(),
        ),
        floats("mean_latitude", trends, |t| t.mean_latitude),
        floats("mean_longitude", trends, |t| t.mean_longitude),
        floats("condition_ratio", trends, |t| t.condition_ratio),
        floats("day_coef", trends, |t| t.day_coef),
        floats("day_se", trends, |t| t.day_se),
        floats("day_t", trends, |t| t.day_t),
        floats("day_z", trends, |t| t.day_z),
        floats("fake_coef", trends, |t| t.fake_coef),
        floats("fake_se", trends, |t| t.fake_se),
        floats("fake_t", trends, |t| t.fake_t),
        floats("fake_z", trends, |t| t.fake_z),
        floats("lr_stat", trends, |t| t.lr_stat),
        Column::new(
            "lr_dof".into(),
            trends.iter().map(|t| t.lr_dof as u64).collect::<Vec<u64>>(),
        ),
        floats("lr_z", trends, |t| t.lr_z),
        floats("lr_z_wh", trends, |t| t.lr_z_wilson_hilferty.value_or_sentinel()),
        Column::new(
            "lr_z_wh_computed".into(),
            trends
                .iter()
                .map(|t| t.lr_z_wilson_hilferty.computed().is_some())
                .collect::<Vec<bool>>(),
        ),
        Column::new(
            "local_fdr".into(),
            trends.iter().map(|t| t.local_fdr).collect::<Vec<Option<f64>>>(),
        ),
        Column::new(
            "bonferroni_significant".into(),
            trends
                .iter()
                .map(|t| t.bonferroni_significant)
                .collect::<Vec<bool>>(),
        ),
        Column::new(
            "fdr_discovery".into(),
            trends.iter().map(|t| t.fdr_discovery).collect::<Vec<bool>>(),
        ),
    ];
    Ok(DataFrame::new(columns)?)
}

/// Long-format table of one or more bands: one row per band point, one column per level.
pub fn bands_to_dataframe(bands: &[&RollingBand]) -> Result<DataFrame, OutputError> {
    let levels: Vec<f64> = bands.first().map(|b| b.levels.clone()).unwrap_or_default();
    let points = || bands.iter().flat_map(|b| b.points.iter().map(move |p| (*b, p)));

    let mut columns = vec![
        Column::new(
            "covariate".into(),
            points().map(|(b, _)| b.covariate.as_str()).collect::<Vec<&str>>(),
        ),
        Column::new(
            "species".into(),
            points().map(|(_, p)| p.id.as_str()).collect::<Vec<&str>>(),
        ),
        Column::new(
            "key".into(),
            points().map(|(_, p)| p.key).collect::<Vec<f64>>(),
        ),
        Column::new(
            "day_z".into(),
            points().map(|(_, p)| p.score).collect::<Vec<f64>>(),
        ),
    ];
    for (q, level) in levels.iter().enumerate() {
        columns.push(Column::new(
            format!("q{level}").into(),
            points()
                .map(|(_, p)| p.quantiles.get(q).copied().flatten())
                .collect::<Vec<Option<f64>>>(),
        ));
    }
    Ok(DataFrame::new(columns)?)
}

/// The binned local FDR curve: one row per histogram bin.
pub fn fdr_curve_to_dataframe(summary: &LocalFdrSummary) -> Result<DataFrame, OutputError> {
    Ok(DataFrame::new(vec![
        Column::new("z".into(), summary.bin_centers.clone()),
        Column::new("local_fdr".into(), summary.bin_fdr.clone()),
    ])?)
}

fn write_tsv(df: &mut DataFrame, path: &str) -> Result<(), OutputError> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b'\t')
        .finish(df)?;
    Ok(())
}

/// Writes the result rows to a tab-separated file.
pub fn write_trends_tsv(trends: &[SpeciesTrend], path: &str) -> Result<(), OutputError> {
    let mut df = trends_to_dataframe(trends)?;
    write_tsv(&mut df, path)?;
    log::info!("Wrote {} species rows to '{path}'", trends.len());
    Ok(())
}

/// Writes rolling bands to a tab-separated file.
pub fn write_bands_tsv(bands: &[&RollingBand], path: &str) -> Result<(), OutputError> {
    let mut df = bands_to_dataframe(bands)?;
    write_tsv(&mut df, path)?;
    log::info!("Wrote {} band points to '{path}'", df.height());
    Ok(())
}

/// Writes the binned local FDR curve to a tab-separated file.
pub fn write_fdr_curve_tsv(summary: &LocalFdrSummary, path: &str) -> Result<(), OutputError> {
    let mut df = fdr_curve_to_dataframe(summary)?;
    write_tsv(&mut df, path)?;
    log::info!("Wrote the local FDR curve over {} bins to '{path}'", df.height());
    Ok(())
}
