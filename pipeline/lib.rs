#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod circular;
pub mod config;
pub mod data;
pub mod design;
pub mod fit;
pub mod normalize;
pub mod output;
pub mod prepare;
pub mod run;
pub mod types;

#[path = "../inference/mod.rs"]
pub mod inference;

pub use config::{LocalFdrConfig, NullModel, PipelineConfig};
pub use run::{PipelineError, PipelineOutput, analyze_groups, run_pipeline, run_pipeline_seeded};
pub use types::{OccurrenceRecord, SkipReason, SkipSummary, SpeciesTrend};
