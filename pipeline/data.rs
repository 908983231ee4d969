//! # Occurrence Loading and Schema Validation
//!
//! This module is the entry point for user-provided occurrence tables. It reads a
//! delimited file (tab-separated by default, as in GBIF downloads) with `polars`,
//! validates the schema, and turns the rows into [`OccurrenceRecord`]s.
//!
//! - Strict schema: a missing required column aborts the load with an error naming it.
//! - Lenient rows: occurrence exports routinely contain rows with a blank species, an
//!   unparseable or partial date, or coordinates that are blank or not numbers. Such rows
//!   are dropped and counted in [`DroppedRows`] rather than failing the whole run.
//!
//! Only the four required columns are read, and all of them as text. Exports carry
//! dozens of other columns whose types polars would otherwise guess from the first rows,
//! so a stray value far down an unrelated column could abort the load.

use crate::types::OccurrenceRecord;
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error("No usable occurrence records remain after validation and filtering ({dropped} rows dropped).")]
    NoRecords { dropped: usize },
}

/// Column names and filters for reading an occurrence table.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub species_column: String,
    pub date_column: String,
    pub latitude_column: String,
    pub longitude_column: String,
    /// Field separator. `None` picks `,` for `.csv` files and tab otherwise.
    pub separator: Option<u8>,
    /// Records dated before this day are excluded.
    pub min_date: Option<NaiveDate>,
}

impl LoadOptions {
    fn required_columns(&self) -> [&String; 4] {
        [
            &self.species_column,
            &self.date_column,
            &self.latitude_column,
            &self.longitude_column,
        ]
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            species_column: "species".to_string(),
            date_column: "eventDate".to_string(),
            latitude_column: "decimalLatitude".to_string(),
            longitude_column: "decimalLongitude".to_string(),
            separator: None,
            min_date: None,
        }
    }
}

/// Counts of rows discarded while building records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DroppedRows {
    pub missing_species: usize,
    pub unparseable_date: usize,
    /// Blank coordinates, or coordinates that do not parse as finite numbers.
    pub missing_coordinates: usize,
    pub coordinates_out_of_range: usize,
    pub before_min_date: usize,
}

impl DroppedRows {
    pub fn total(&self) -> usize {
        self.missing_species
            + self.unparseable_date
            + self.missing_coordinates
            + self.coordinates_out_of_range
            + self.before_min_date
    }
}

/// Validated records together with an account of what was discarded.
#[derive(Debug, Clone)]
pub struct LoadedOccurrences {
    pub records: Vec<OccurrenceRecord>,
    pub dropped: DroppedRows,
}

/// Reads and validates an occurrence file.
pub fn load_occurrences(path: &str, options: &LoadOptions) -> Result<LoadedOccurrences, DataError> {
    let separator = options.separator.unwrap_or_else(|| {
        match Path::new(path).extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => b',',
            _ => b'\t',
        }
    });

    log::info!("Loading occurrences from '{path}'");
    let reader_options = || {
        CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .with_parse_options(CsvParseOptions::default().with_separator(separator))
    };

    let header = CsvReader::new(File::open(Path::new(path))?)
        .with_options(reader_options().with_n_rows(Some(1)))
        .finish()?;
    internal::check_required_columns(&header, options)?;

    let projection: Arc<[PlSmallStr]> = options
        .required_columns()
        .into_iter()
        .map(|name| PlSmallStr::from(name.as_str()))
        .collect();
    let df = CsvReader::new(File::open(Path::new(path))?)
        .with_options(reader_options().with_columns(Some(projection)))
        .finish()?;
    log::info!("Read {} rows of the {} required columns.", df.height(), df.width());

    records_from_dataframe(&df, options)
}

/// Validates an in-memory occurrence table and converts it into records.
pub fn records_from_dataframe(
    df: &DataFrame,
    options: &LoadOptions,
) -> Result<LoadedOccurrences, DataError> {
    internal::check_required_columns(df, options)?;

    let species = internal::string_column(df, &options.species_column)?;
    let dates = internal::string_column(df, &options.date_column)?;
    let latitudes = internal::numeric_column(df, &options.latitude_column)?;
    let longitudes = internal::numeric_column(df, &options.longitude_column)?;

    let mut dropped = DroppedRows::default();
    let mut records = Vec::with_capacity(df.height());
    for (((species, date), latitude), longitude) in
        species.into_iter().zip(dates).zip(latitudes).zip(longitudes)
    {
        let Some(species) = species.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        else {
            dropped.missing_species += 1;
            continue;
        };
        let Some(event_date) = date.as_deref().and_then(parse_event_date) else {
            dropped.unparseable_date += 1;
            continue;
        };
        let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
            dropped.missing_coordinates += 1;
            continue;
        };
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            dropped.coordinates_out_of_range += 1;
            continue;
        }
        if options.min_date.is_some_and(|min| event_date < min) {
            dropped.before_min_date += 1;
            continue;
        }
        records.push(OccurrenceRecord {
            species,
            event_date,
            latitude,
            longitude,
        });
    }

    if dropped.total() > 0 {
        log::warn!(
            "Dropped {} rows: {} without species, {} with unparseable dates, {} without coordinates, {} with out-of-range coordinates, {} before the minimum date.",
            dropped.total(),
            dropped.missing_species,
            dropped.unparseable_date,
            dropped.missing_coordinates,
            dropped.coordinates_out_of_range,
            dropped.before_min_date
        );
    }
    if records.is_empty() {
        return Err(DataError::NoRecords {
            dropped: dropped.total(),
        });
    }
    log::info!("{} occurrence records passed validation.", records.len());

    Ok(LoadedOccurrences { records, dropped })
}

/// Parses the calendar day of an event date.
///
/// Accepts `YYYY-MM-DD` optionally followed by a time (`T..` or ` ..`), and ISO 8601
/// intervals (`start/end`), for which the start day is used. Partial dates such as
/// `2019-05` carry no day and are rejected.
pub fn parse_event_date(raw: &str) -> Option<NaiveDate> {
    let start = raw.trim().split('/').next()?.trim();
    let day = start.get(..10)?;
    if start.len() > 10 && !matches!(start.as_bytes()[10], b'T' | b' ') {
        return None;
    }
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Internal helpers for column extraction.
mod internal {
    use super::*;

    pub(super) fn string_column(
        df: &DataFrame,
        column_name: &str,
    ) -> Result<Vec<Option<String>>, DataError> {
        let column = df.column(column_name)?;
        let casted = column
            .cast(&DataType::String)
            .map_err(|_| DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "string",
                found_type: format!("{:?}", column.dtype()),
            })?;
        Ok(casted
            .str()?
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect())
    }

    pub(super) fn check_required_columns(
        df: &DataFrame,
        options: &LoadOptions,
    ) -> Result<(), DataError> {
        let present: HashSet<String> = df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        for name in options.required_columns() {
            if !present.contains(name.as_str()) {
                return Err(DataError::ColumnNotFound(name.clone()));
            }
        }
        Ok(())
    }

    /// Text columns are parsed value by value so that one bad cell drops one row.
    /// Other dtypes must cast to `Float64`. Non-finite values count as missing.
    pub(super) fn numeric_column(
        df: &DataFrame,
        column_name: &str,
    ) -> Result<Vec<Option<f64>>, DataError> {
        let column = df.column(column_name)?;
        if matches!(column.dtype(), DataType::String) {
            return Ok(column
                .str()?
                .into_iter()
                .map(|v| v.and_then(parse_coordinate))
                .collect());
        }
        let casted = column
            .cast(&DataType::Float64)
            .map_err(|_| DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", column.dtype()),
            })?;
        Ok(casted
            .f64()?
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect())
    }

    pub(super) fn parse_coordinate(raw: &str) -> Option<f64> {
        raw.trim().parse::<f64>().ok().filter(|x| x.is_finite())
    }
}
