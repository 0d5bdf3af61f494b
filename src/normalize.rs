use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

use crate::config::NormalizeConfig;
use crate::error::ValidationError;
use crate::models::{CourseId, ScoreRecord, StudentId};

/// A loosely typed input row, as handed over by a record repository.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawScoreRow {
    /// 1-based position in the source, used when reporting rejections.
    pub row: usize,
    pub fields: BTreeMap<String, String>,
}

impl RawScoreRow {
    pub fn new<K, V>(row: usize, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            row,
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRecord {
    pub row: usize,
    pub error: ValidationError,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub records: Vec<ScoreRecord>,
    pub rejected: Vec<RejectedRecord>,
}

// (alias, canonical). An alias only applies when the canonical column is absent.
const ALIASES: &[(&str, &str)] = &[
    ("mark", "score"),
    ("course", "course_id"),
    ("course_name", "course_id"),
    ("candidate_id", "student_id"),
    ("email", "student_id"),
    ("candidate_email", "student_id"),
    ("attempt", "attempt_id"),
    ("attempt_number", "attempt_id"),
    ("timestamp", "attempt_timestamp"),
    ("attempt_date", "attempt_timestamp"),
    ("total", "max_score"),
    ("out_of", "max_score"),
    ("tags", "topic_tags"),
    ("topics", "topic_tags"),
];

fn canonical_column(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

fn canonical_fields(raw: &BTreeMap<String, String>) -> HashMap<String, String> {
    let mut fields: HashMap<String, String> = raw
        .iter()
        .map(|(k, v)| (canonical_column(k), v.trim().to_string()))
        .collect();

    for (alias, canonical) in ALIASES {
        if fields.contains_key(*canonical) {
            continue;
        }
        if let Some(value) = fields.get(*alias).cloned() {
            fields.insert(canonical.to_string(), value);
        }
    }

    fields
}

fn required<'a>(
    fields: &'a HashMap<String, String>,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    match fields.get(field) {
        Some(value) if !value.is_empty() => Ok(value.as_str()),
        _ => Err(ValidationError::MissingField { field }),
    }
}

fn parse_number(field: &'static str, value: &str) -> Result<f64, ValidationError> {
    match value.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(ValidationError::InvalidNumber {
            field,
            value: value.to_string(),
        }),
    }
}

/// Parses RFC 3339, naive date-times (UTC assumed) and bare dates (midnight UTC).
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ValidationError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Some(naive) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(naive.and_utc());
    }
    Err(ValidationError::InvalidTimestamp {
        value: value.to_string(),
    })
}

fn parse_tags(value: Option<&String>) -> BTreeSet<String> {
    value
        .map(|raw| {
            raw.split([';', ',', '|'])
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// The student a raw row belongs to, if it names one, even when the row
/// would otherwise be rejected.
pub fn raw_student_id(row: &RawScoreRow) -> Option<StudentId> {
    let fields = canonical_fields(&row.fields);
    required(&fields, "student_id").ok().map(StudentId::new)
}

/// Turn one raw row into a canonical record, or say why it cannot be one.
pub fn normalize_row(
    row: &RawScoreRow,
    config: &NormalizeConfig,
) -> Result<ScoreRecord, ValidationError> {
    let fields = canonical_fields(&row.fields);

    let student_id = required(&fields, "student_id")?;
    let course_id = required(&fields, "course_id")?;
    let attempt_id = required(&fields, "attempt_id")?;
    let attempt_timestamp = parse_timestamp(required(&fields, "attempt_timestamp")?)?;
    let score = parse_number("score", required(&fields, "score")?)?;

    let max_score = match fields.get("max_score").filter(|v| !v.is_empty()) {
        Some(value) => parse_number("max_score", value)?,
        None if config.require_max_score => {
            return Err(ValidationError::MissingField { field: "max_score" })
        }
        None => config.default_max_score,
    };

    if score < 0.0 {
        return Err(ValidationError::NegativeScore { score });
    }
    if max_score <= 0.0 {
        return Err(ValidationError::NonPositiveMaxScore { max_score });
    }
    if score > max_score {
        return Err(ValidationError::ScoreExceedsMax { score, max_score });
    }

    Ok(ScoreRecord {
        student_id: StudentId::new(student_id),
        course_id: CourseId::new(course_id),
        attempt_id: attempt_id.to_string(),
        attempt_timestamp,
        score,
        max_score,
        topic_tags: parse_tags(fields.get("topic_tags")),
    })
}

/// Normalise a batch. Bad rows are reported and skipped; the batch goes on.
pub fn normalize_batch(rows: &[RawScoreRow], config: &NormalizeConfig) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    let mut seen: HashMap<(StudentId, CourseId, String), usize> = HashMap::new();

    for row in rows {
        let record = match normalize_row(row, config) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(row = row.row, %error, "rejected score record");
                batch.rejected.push(RejectedRecord {
                    row: row.row,
                    error,
                });
                continue;
            }
        };

        let key = (
            record.student_id.clone(),
            record.course_id.clone(),
            record.attempt_id.clone(),
        );
        if let Some(&first_row) = seen.get(&key) {
            let error = ValidationError::DuplicateAttempt {
                student_id: record.student_id.0,
                course_id: record.course_id.0,
                attempt_id: record.attempt_id,
                first_row,
            };
            tracing::warn!(row = row.row, %error, "rejected score record");
            batch.rejected.push(RejectedRecord {
                row: row.row,
                error,
            });
            continue;
        }
        seen.insert(key, row.row);
        batch.records.push(record);
    }

    tracing::debug!(
        accepted = batch.records.len(),
        rejected = batch.rejected.len(),
        "normalised score batch"
    );
    batch
}
