use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::NormalizeConfig;
use crate::normalize::{normalize_batch, raw_student_id, RawScoreRow, RejectedRecord};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseId(pub String);

impl StudentId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl CourseId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated single-attempt observation. Only the normalizer builds these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub attempt_id: String,
    pub attempt_timestamp: DateTime<Utc>,
    pub score: f64,
    pub max_score: f64,
    pub topic_tags: BTreeSet<String>,
}

impl ScoreRecord {
    pub fn pct(&self) -> f64 {
        self.score / self.max_score * 100.0
    }
}

/// An immutable, identified batch of canonical records.
///
/// `roster` lists every student seen in the source batch, including those
/// whose rows were all rejected, so they can be reported as having no data.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub records: Arc<[ScoreRecord]>,
    pub roster: Arc<[StudentId]>,
    pub rejected: Arc<[RejectedRecord]>,
}

impl Snapshot {
    pub fn new(records: Vec<ScoreRecord>) -> Self {
        Self::with_id(Uuid::new_v4(), Utc::now(), records)
    }

    pub fn with_id(id: Uuid, taken_at: DateTime<Utc>, records: Vec<ScoreRecord>) -> Self {
        let roster: BTreeSet<StudentId> = records.iter().map(|r| r.student_id.clone()).collect();
        Self {
            id,
            taken_at,
            records: records.into(),
            roster: roster.into_iter().collect(),
            rejected: Arc::from(Vec::new()),
        }
    }

    /// Normalise raw rows into a fresh snapshot, keeping the rejections.
    pub fn ingest(rows: &[RawScoreRow], config: &NormalizeConfig) -> Self {
        Self::ingest_with_id(Uuid::new_v4(), Utc::now(), rows, config)
    }

    pub fn ingest_with_id(
        id: Uuid,
        taken_at: DateTime<Utc>,
        rows: &[RawScoreRow],
        config: &NormalizeConfig,
    ) -> Self {
        let batch = normalize_batch(rows, config);
        let mut roster: BTreeSet<StudentId> = batch
            .records
            .iter()
            .map(|r| r.student_id.clone())
            .collect();
        roster.extend(rows.iter().filter_map(raw_student_id));

        Self {
            id,
            taken_at,
            records: batch.records.into(),
            roster: roster.into_iter().collect(),
            rejected: batch.rejected.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptPoint {
    pub timestamp: DateTime<Utc>,
    pub attempt_id: String,
    pub pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentCourseAggregate {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub mean_pct: f64,
    pub stdev_pct: f64,
    pub latest_pct: f64,
    pub best_pct: f64,
    pub attempt_count: usize,
    pub attempt_sequence: Vec<AttemptPoint>,
    pub topic_tags: BTreeSet<String>,
}

/// A matrix entry. `Absent` means no attempt and is never read as a zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "pct", rename_all = "snake_case")]
pub enum Cell {
    Absent,
    Observed(f64),
}

impl Cell {
    pub fn value(self) -> Option<f64> {
        match self {
            Cell::Absent => None,
            Cell::Observed(pct) => Some(pct),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreMatrix {
    pub students: Vec<StudentId>,
    pub courses: Vec<CourseId>,
    pub rows: Vec<Vec<Cell>>,
}

impl ScoreMatrix {
    pub fn row(&self, student: &StudentId) -> Option<&[Cell]> {
        let idx = self.students.binary_search(student).ok()?;
        Some(&self.rows[idx])
    }

    pub fn cell(&self, student: &StudentId, course: &CourseId) -> Cell {
        let Ok(col) = self.courses.binary_search(course) else {
            return Cell::Absent;
        };
        self.row(student).map_or(Cell::Absent, |row| row[col])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    Strong,
    Weak,
    Neutral,
}

/// Ordered so that `High` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "tier", rename_all = "snake_case")]
pub enum TierOutcome {
    Classified(Tier),
    NoData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub mean_pct: f64,
    pub tag: Tag,
    pub tier: Tier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentTier {
    pub student_id: StudentId,
    pub outcome: TierOutcome,
    pub strong_count: usize,
    pub weak_count: usize,
    pub neutral_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendFit {
    pub slope: f64,
    pub intercept: f64,
    pub predicted_next_pct: f64,
    /// Coefficient of determination of the fit.
    pub fit_quality: f64,
    pub sample_size: usize,
    pub low_confidence: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub direction: TrendDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fit: Option<TrendFit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseImprovement {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub baseline_pct: f64,
    pub current_pct: f64,
    pub improvement: f64,
    pub attempts: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallTrend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementSummary {
    pub student_id: StudentId,
    pub total_improvement: f64,
    pub average_improvement: f64,
    pub courses_improved: usize,
    pub courses_declined: usize,
    pub overall: OverallTrend,
    pub courses: Vec<CourseImprovement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityPair {
    pub student_a: StudentId,
    pub student_b: StudentId,
    pub score: f64,
    pub shared_courses: usize,
}

/// Ordered so that `High` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    Similarity,
    Catalog,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub priority: Priority,
    pub source: RecommendationSource,
    pub trigger_course: CourseId,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentorPairing {
    pub weak_student_id: StudentId,
    pub mentor_id: StudentId,
    pub course_id: CourseId,
    pub compatibility_score: f64,
    pub similarity: f64,
    pub mentor_mean_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmatchedMentee {
    pub student_id: StudentId,
    pub course_id: CourseId,
}
