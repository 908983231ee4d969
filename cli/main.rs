#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use chrono::NaiveDate;
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::process;

use latshift::data::{LoadOptions, load_occurrences};
use latshift::output::{write_bands_tsv, write_fdr_curve_tsv, write_trends_tsv};
use latshift::{PipelineConfig, PipelineOutput, run_pipeline_seeded};

#[derive(Args)]
pub struct RunArgs {
    /// Occurrence table (tab-separated, or comma-separated with a .csv extension)
    pub occurrences: String,

    /// TOML configuration file; defaults are used for anything it leaves out
    #[arg(long, value_name = "FILE")]
    pub config: Option<String>,

    /// Seed for the control covariate, overriding the configuration
    #[arg(long, value_name = "N")]
    pub seed: Option<u64>,

    /// Drop records dated before this day (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub min_date: Option<NaiveDate>,

    /// Where to write the per-species result table
    #[arg(long, value_name = "FILE", default_value = "latshift_trends.tsv")]
    pub out: String,

    /// Where to write the rolling quantile bands
    #[arg(long, value_name = "FILE")]
    pub bands: Option<String>,

    /// Where to write the binned local FDR curve
    #[arg(long, value_name = "FILE")]
    pub fdr_curve: Option<String>,

    /// Name of the species column
    #[arg(long, default_value = "species")]
    pub species_column: String,

    /// Name of the event date column
    #[arg(long, default_value = "eventDate")]
    pub date_column: String,
}

#[derive(Parser)]
#[command(
    name = "latshift",
    version,
    about = "Per-species latitude trend inference over occurrence records",
    long_about = "Fits nested regressions of latitude on time for every species in an \
                 occurrence table, maps the test statistics to z-scores and applies \
                 Bonferroni and local false-discovery-rate inference across species."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline on an occurrence table
    Run(RunArgs),
    /// Print the default configuration as TOML
    DefaultConfig,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Run(args)) => run(args),
        Some(Commands::DefaultConfig) => PipelineConfig::default()
            .to_toml()
            .map(|text| print!("{text}"))
            .map_err(Into::into),
        None => {
            Cli::command().print_help().expect("print help");
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    let options = LoadOptions {
        species_column: args.species_column,
        date_column: args.date_column,
        min_date: args.min_date,
        ..LoadOptions::default()
    };
    let loaded = load_occurrences(&args.occurrences, &options)?;
    if loaded.dropped.total() > 0 {
        log::info!(
            "Dropped {} rows: {} without species, {} with unusable dates, {} without coordinates, {} with coordinates out of range, {} before the minimum date.",
            loaded.dropped.total(),
            loaded.dropped.missing_species,
            loaded.dropped.unparseable_date,
            loaded.dropped.missing_coordinates,
            loaded.dropped.coordinates_out_of_range,
            loaded.dropped.before_min_date
        );
    }

    let output = run_pipeline_seeded(&loaded.records, &config)?;
    write_trends_tsv(&output.trends, &args.out)?;
    if let Some(path) = &args.bands {
        write_bands_tsv(&[&output.latitude_band, &output.sample_size_band], path)?;
    }
    if let Some(path) = &args.fdr_curve {
        match &output.local_fdr {
            Some(summary) => write_fdr_curve_tsv(summary, path)?,
            None => log::warn!("No local FDR was estimated; '{path}' not written."),
        }
    }
    print_summary(&output);
    Ok(())
}

fn print_summary(output: &PipelineOutput) {
    println!(
        "Species analysed: {} of {}",
        output.trends.len(),
        output.groups_considered
    );
    println!(
        "Skipped: {} insufficient data, {} degenerate longitude, {} weakly identified, {} numerical failure",
        output.skipped.insufficient_data,
        output.skipped.degenerate_longitude,
        output.skipped.weakly_identified,
        output.skipped.numerical_failure
    );
    if let Some(fw) = &output.family_wise {
        let significant = output
            .trends
            .iter()
            .filter(|t| t.bonferroni_significant)
            .count();
        println!(
            "Bonferroni (alpha = {}): |z| > {:.3}, {} significant",
            fw.alpha, fw.z_threshold, significant
        );
    }
    match &output.local_fdr {
        Some(fdr) => println!(
            "Local FDR: pi0 = {:.3}, {} discoveries",
            fdr.pi0, fdr.discoveries
        ),
        None => println!("Local FDR: not estimated"),
    }
    if let Some(c) = &output.control_calibration {
        println!(
            "Control z-scores: mean {:.3}, variance {:.3}, KS p = {:.3}",
            c.mean, c.variance, c.ks_p_value
        );
    }
}
