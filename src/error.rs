//! Error types for the analysis engine.
//!
//! Per-record problems never abort a batch: they surface as
//! [`ValidationError`]s attached to the offending row. Configuration
//! problems fail a run before any computation starts.

use serde::Serialize;
use thiserror::Error;

/// Why a raw row could not become a canonical score record.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },

    #[error("field `{field}` is not a finite number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("unrecognised timestamp {value:?}")]
    InvalidTimestamp { value: String },

    #[error("score {score} is negative")]
    NegativeScore { score: f64 },

    #[error("max score {max_score} must be positive")]
    NonPositiveMaxScore { max_score: f64 },

    #[error("score {score} exceeds max score {max_score}")]
    ScoreExceedsMax { score: f64, max_score: f64 },

    #[error("attempt {attempt_id} for {student_id}/{course_id} already seen at row {first_row}")]
    DuplicateAttempt {
        student_id: String,
        course_id: String,
        attempt_id: String,
        first_row: usize,
    },
}

/// An invalid threshold or weight. Fails the whole run eagerly.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("`{field}` must be a finite number, got {value}")]
    NotFinite { field: &'static str, value: f64 },

    #[error("`{field}` = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("weak threshold {weak} must not exceed strong threshold {strong}")]
    WeakAboveStrong { weak: f64, strong: f64 },

    #[error("critical threshold {critical} must not exceed weak threshold {weak}")]
    CriticalAboveWeak { critical: f64, weak: f64 },

    #[error("`{field}` must be at least 1")]
    ZeroCount { field: &'static str },

    #[error("mentor weights must not both be zero")]
    ZeroWeights,

    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Errors that abort an analysis run without publishing anything.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("analysis cancelled before completion")]
    Cancelled,
}
