//! NavCity Metrics - Navigation statistics for NavCity virtual-city task logs
//!
//! Participants find a sequence of destinations in a virtual city. Each session
//! is logged frame by frame; this crate turns those logs into per-destination
//! statistics through a deterministic pipeline: row parsing → normalization →
//! metric computation → cohort aggregation.
//!
//! ## Modules
//!
//! - **Session metrics**: `normalizer` and `metrics` turn one log into records
//! - **Cohort tables**: `aggregate` and `correction` build merged and averaged tables
//! - **Routes**: `trajectory` extracts waypoint tables for route maps
//! - **Batch runs**: `pipeline` and `store` process whole data folders

pub mod aggregate;
pub mod config;
pub mod correction;
pub mod error;
pub mod metrics;
pub mod normalizer;
pub mod pipeline;
pub mod schema;
pub mod store;
pub mod trajectory;
pub mod types;

pub use aggregate::{average_rows, combine_cohorts, merge, MergedTable};
pub use config::{AnalysisConfig, LayoutConfig, RawFormatConfig, UnknownDestinationPolicy};
pub use correction::{apply_correction, correct_tables, recompute_average, Correction};
pub use error::ComputeError;
pub use metrics::MetricEngine;
pub use normalizer::SampleNormalizer;
pub use pipeline::{process_session_file, run_batches, session_statistics, BatchReport, BatchRunner, BatchStep};
pub use trajectory::TrajectoryCollector;
pub use types::{AveragedRow, MergedRow, MetricField, Position, Sample, SessionKey, StatisticsRecord};

/// Crate version recorded in run manifests
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name recorded in run manifests
pub const PRODUCER_NAME: &str = "navcity-metrics";
