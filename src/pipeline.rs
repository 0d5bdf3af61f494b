//! Runs every component over one snapshot and assembles the report.
//!
//! Classification, trends, improvement and similarity are independent and
//! run side by side on the blocking pool. Recommendations and mentor
//! matching need both the classification and the similarity index, so they
//! run afterwards. A report is either returned whole or not at all.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::{self, JoinError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::aggregate::{build_aggregates, build_matrix};
use crate::classify::{classify, Classification};
use crate::config::AnalysisConfig;
use crate::error::PipelineError;
use crate::improvement::summarize;
use crate::mentor::{match_mentors, MentorMatches};
use crate::models::{
    ClassificationResult, ImprovementSummary, MentorPairing, Recommendation, SimilarityPair,
    Snapshot, StudentCourseAggregate, StudentId, StudentTier, TierOutcome, TrendResult,
    UnmatchedMentee,
};
use crate::normalize::{RawScoreRow, RejectedRecord};
use crate::recommend::{CourseCatalog, Recommender};
use crate::similarity::{cap_neighbors, compute_pairs, SimilarityIndex};
use crate::trend::predict_all;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueScope {
    Component { name: String },
    Student { student_id: StudentId },
    Pair { student_a: StudentId, student_b: StudentId },
}

/// A failure confined to one component, student or pair, reported next to
/// the results that did succeed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisIssue {
    pub scope: IssueScope,
    pub message: String,
}

impl AnalysisIssue {
    fn component(name: &str, message: impl Into<String>) -> Self {
        Self {
            scope: IssueScope::Component {
                name: name.to_string(),
            },
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub snapshot_id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub config: AnalysisConfig,
    pub record_count: usize,
    pub rejected: Vec<RejectedRecord>,
    pub aggregates: Vec<StudentCourseAggregate>,
    pub classifications: Vec<ClassificationResult>,
    pub tiers: Vec<StudentTier>,
    pub trends: Vec<TrendResult>,
    pub improvements: Vec<ImprovementSummary>,
    pub similarity: Vec<SimilarityPair>,
    pub recommendations: Vec<Recommendation>,
    pub mentor_pairings: Vec<MentorPairing>,
    pub unmatched_mentees: Vec<UnmatchedMentee>,
    pub issues: Vec<AnalysisIssue>,
}

impl AnalysisReport {
    /// Snapshot metadata and rejections with every result section empty.
    fn envelope(snapshot: &Snapshot, config: &AnalysisConfig) -> Self {
        Self {
            snapshot_id: snapshot.id,
            taken_at: snapshot.taken_at,
            config: config.clone(),
            record_count: snapshot.records.len(),
            rejected: snapshot.rejected.to_vec(),
            aggregates: Vec::new(),
            classifications: Vec::new(),
            tiers: Vec::new(),
            trends: Vec::new(),
            improvements: Vec::new(),
            similarity: Vec::new(),
            recommendations: Vec::new(),
            mentor_pairings: Vec::new(),
            unmatched_mentees: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

const AGGREGATE_BUILDER: &str = "aggregate builder";
const CLASSIFIER: &str = "classifier";
const TREND_PREDICTOR: &str = "trend predictor";
const IMPROVEMENT_TRACKER: &str = "improvement tracker";
const SIMILARITY_ENGINE: &str = "similarity engine";
const RECOMMENDER: &str = "course recommender";
const MENTOR_MATCHER: &str = "mentor matcher";

fn settle<T>(
    component: &str,
    joined: Result<T, JoinError>,
    issues: &mut Vec<AnalysisIssue>,
) -> Option<T> {
    match joined {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(component, error = %err, "analysis component failed");
            issues.push(AnalysisIssue::component(
                component,
                format!("component failed: {err}"),
            ));
            None
        }
    }
}

fn skip(components: &[&str], reason: &str, issues: &mut Vec<AnalysisIssue>) {
    for name in components {
        tracing::warn!(component = name, reason, "skipped analysis component");
        issues.push(AnalysisIssue::component(name, format!("skipped: {reason}")));
    }
}

/// The report for a run whose aggregates could not be built.
fn without_aggregates(
    snapshot: &Snapshot,
    config: &AnalysisConfig,
    mut issues: Vec<AnalysisIssue>,
) -> AnalysisReport {
    skip(
        &[
            CLASSIFIER,
            TREND_PREDICTOR,
            IMPROVEMENT_TRACKER,
            SIMILARITY_ENGINE,
            RECOMMENDER,
            MENTOR_MATCHER,
        ],
        "aggregate builder did not complete",
        &mut issues,
    );
    AnalysisReport {
        issues,
        ..AnalysisReport::envelope(snapshot, config)
    }
}

fn finite_pairs(
    pairs: Vec<SimilarityPair>,
    issues: &mut Vec<AnalysisIssue>,
) -> Vec<SimilarityPair> {
    pairs
        .into_iter()
        .filter(|pair| {
            if pair.score.is_finite() {
                return true;
            }
            tracing::warn!(
                a = %pair.student_a,
                b = %pair.student_b,
                "dropped non-finite similarity"
            );
            issues.push(AnalysisIssue {
                scope: IssueScope::Pair {
                    student_a: pair.student_a.clone(),
                    student_b: pair.student_b.clone(),
                },
                message: "similarity score is not finite".to_string(),
            });
            false
        })
        .collect()
}

fn ensure_running(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        tracing::info!("analysis cancelled");
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}

/// Analyse one snapshot. Identical snapshots and configs give identical
/// reports.
pub async fn analyze(
    snapshot: &Snapshot,
    config: &AnalysisConfig,
    cancel: &CancellationToken,
) -> Result<AnalysisReport, PipelineError> {
    config.validate()?;
    ensure_running(cancel)?;

    let mut issues = Vec::new();
    let built = {
        let records = Arc::clone(&snapshot.records);
        task::spawn_blocking(move || {
            let aggregates: Arc<[StudentCourseAggregate]> = build_aggregates(&records).into();
            let matrix = build_matrix(&aggregates);
            (aggregates, matrix)
        })
    }
    .await;
    let Some((aggregates, matrix)) = settle(AGGREGATE_BUILDER, built, &mut issues) else {
        ensure_running(cancel)?;
        return Ok(without_aggregates(snapshot, config, issues));
    };
    ensure_running(cancel)?;

    let classify_task = {
        let aggregates = Arc::clone(&aggregates);
        let roster = Arc::clone(&snapshot.roster);
        let thresholds = config.thresholds.clone();
        let rules = config.tier.clone();
        task::spawn_blocking(move || classify(&aggregates, &roster, &thresholds, &rules))
    };
    let trend_task = {
        let aggregates = Arc::clone(&aggregates);
        let trend = config.trend.clone();
        task::spawn_blocking(move || predict_all(&aggregates, &trend))
    };
    let improvement_task = {
        let aggregates = Arc::clone(&aggregates);
        let band = config.trend.improvement_band;
        task::spawn_blocking(move || summarize(&aggregates, band))
    };
    let similarity_task = {
        let cancel = cancel.clone();
        let limit = config.similarity.neighbor_limit;
        task::spawn_blocking(move || {
            let pairs = compute_pairs(&matrix, &cancel)?;
            Ok::<_, PipelineError>(match limit {
                Some(limit) => cap_neighbors(pairs, limit),
                None => pairs,
            })
        })
    };

    let (classification, trends, improvements, similarity) =
        tokio::join!(classify_task, trend_task, improvement_task, similarity_task);

    let classification: Option<Arc<Classification>> =
        settle(CLASSIFIER, classification, &mut issues).map(Arc::new);
    let trends = settle(TREND_PREDICTOR, trends, &mut issues).unwrap_or_default();
    let improvements = settle(IMPROVEMENT_TRACKER, improvements, &mut issues).unwrap_or_default();
    let pairs = settle(SIMILARITY_ENGINE, similarity, &mut issues).transpose()?;
    ensure_running(cancel)?;

    let pairs = pairs.map(|pairs| finite_pairs(pairs, &mut issues));
    let index = pairs.as_deref().map(|pairs| Arc::new(SimilarityIndex::new(pairs)));

    let mut recommendations = Vec::new();
    let mut mentors = MentorMatches::default();
    if let (Some(classification), Some(index)) = (&classification, &index) {
        let recommend_task = {
            let classification = Arc::clone(classification);
            let index = Arc::clone(index);
            let aggregates = Arc::clone(&aggregates);
            let catalog = CourseCatalog::from_config(&config.catalog);
            let thresholds = config.thresholds.clone();
            let top_k = config.similarity.top_k;
            task::spawn_blocking(move || {
                Recommender {
                    classification: &classification,
                    aggregates: &aggregates,
                    similarity: &index,
                    catalog: &catalog,
                    thresholds: &thresholds,
                    top_k,
                }
                .recommend_all()
            })
        };
        let mentor_task = {
            let classification = Arc::clone(classification);
            let index = Arc::clone(index);
            let thresholds = config.thresholds.clone();
            let mentor = config.mentor.clone();
            task::spawn_blocking(move || {
                match_mentors(&classification, &index, &thresholds, &mentor)
            })
        };

        let (recommended, matched) = tokio::join!(recommend_task, mentor_task);
        recommendations = settle(RECOMMENDER, recommended, &mut issues).unwrap_or_default();
        mentors = settle(MENTOR_MATCHER, matched, &mut issues).unwrap_or_default();
    } else {
        skip(
            &[RECOMMENDER, MENTOR_MATCHER],
            "classifier or similarity engine did not complete",
            &mut issues,
        );
    }
    ensure_running(cancel)?;

    let (classifications, tiers) = match classification {
        Some(classification) => {
            let classification = Arc::unwrap_or_clone(classification);
            (classification.results, classification.tiers)
        }
        None => (Vec::new(), Vec::new()),
    };
    for tier in tiers.iter().filter(|t| t.outcome == TierOutcome::NoData) {
        issues.push(AnalysisIssue {
            scope: IssueScope::Student {
                student_id: tier.student_id.clone(),
            },
            message: "no valid score records".to_string(),
        });
    }

    let report = AnalysisReport {
        aggregates: aggregates.to_vec(),
        classifications,
        tiers,
        trends,
        improvements,
        similarity: pairs.unwrap_or_default(),
        recommendations,
        mentor_pairings: mentors.pairings,
        unmatched_mentees: mentors.unmatched,
        issues,
        ..AnalysisReport::envelope(snapshot, config)
    };

    tracing::info!(
        snapshot = %report.snapshot_id,
        records = report.record_count,
        rejected = report.rejected.len(),
        students = report.tiers.len(),
        recommendations = report.recommendations.len(),
        pairings = report.mentor_pairings.len(),
        issues = report.issues.len(),
        "analysis complete"
    );
    Ok(report)
}

/// Normalise raw rows into a fresh snapshot and analyse it.
pub async fn analyze_records(
    rows: &[RawScoreRow],
    config: &AnalysisConfig,
    cancel: &CancellationToken,
) -> Result<AnalysisReport, PipelineError> {
    config.validate()?;
    let snapshot = Snapshot::ingest(rows, &config.normalize);
    analyze(&snapshot, config, cancel).await
}
