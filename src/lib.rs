//! Academic score analytics.
//!
//! Raw score rows are normalised into a [`models::Snapshot`], aggregated per
//! student and course, and analysed for strength tiers, trends, improvement,
//! peer similarity, course recommendations and mentor pairings. See
//! [`pipeline::analyze`] for the entry point.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod error;
pub mod improvement;
pub mod mentor;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod recommend;
pub mod report;
pub mod similarity;
pub mod store;
pub mod trend;

pub use config::AnalysisConfig;
pub use error::{ConfigError, PipelineError, ValidationError};
pub use models::Snapshot;
pub use pipeline::{analyze, analyze_records, AnalysisReport};
