//! Pairwise student similarity over the score matrix.
//!
//! Cosine similarity is restricted to the courses both students attempted.
//! Absent cells are dropped from the dot product and from both norms, so a
//! student with little overlap is not dragged towards zero by courses they
//! never took.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::models::{Cell, ScoreMatrix, SimilarityPair, StudentId};

/// Cosine over the dimensions where both rows are observed.
///
/// Returns `(score, shared)` or `None` when no dimension is shared or a
/// restricted norm is zero.
pub fn restricted_cosine(a: &[Cell], b: &[Cell]) -> Option<(f64, usize)> {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    let mut shared = 0usize;

    for (x, y) in a.iter().zip(b) {
        let (Some(x), Some(y)) = (x.value(), y.value()) else {
            continue;
        };
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
        shared += 1;
    }

    if shared == 0 || norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    let score = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    Some((score, shared))
}

/// Every unordered pair sharing at least one course, sorted by (a, b).
///
/// The token is checked between rows; a cancelled run yields no pairs.
pub fn compute_pairs(
    matrix: &ScoreMatrix,
    cancel: &CancellationToken,
) -> Result<Vec<SimilarityPair>, PipelineError> {
    compute_pairs_with(matrix, cancel, |_| {})
}

/// Like [`compute_pairs`], calling `on_row` with each row index before the
/// row's pairs are computed.
pub fn compute_pairs_with(
    matrix: &ScoreMatrix,
    cancel: &CancellationToken,
    mut on_row: impl FnMut(usize),
) -> Result<Vec<SimilarityPair>, PipelineError> {
    let mut pairs = Vec::new();
    let n = matrix.students.len();

    for i in 0..n {
        on_row(i);
        if cancel.is_cancelled() {
            tracing::debug!(row = i, students = n, "similarity cancelled");
            return Err(PipelineError::Cancelled);
        }
        for j in (i + 1)..n {
            if let Some((score, shared)) = restricted_cosine(&matrix.rows[i], &matrix.rows[j]) {
                pairs.push(SimilarityPair {
                    student_a: matrix.students[i].clone(),
                    student_b: matrix.students[j].clone(),
                    score,
                    shared_courses: shared,
                });
            }
        }
    }

    tracing::debug!(students = n, pairs = pairs.len(), "computed similarity pairs");
    Ok(pairs)
}

fn by_score_then_id(a: &(StudentId, f64), b: &(StudentId, f64)) -> Ordering {
    b.1.partial_cmp(&a.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.0.cmp(&b.0))
}

/// Keep only pairs inside the top-`limit` neighbours of at least one side.
pub fn cap_neighbors(pairs: Vec<SimilarityPair>, limit: usize) -> Vec<SimilarityPair> {
    let index = SimilarityIndex::new(&pairs);
    let mut keep: BTreeSet<(StudentId, StudentId)> = BTreeSet::new();
    for student in index.neighbors.keys() {
        for (other, _) in index.neighbors(student, limit) {
            let key = if student < &other {
                (student.clone(), other)
            } else {
                (other, student.clone())
            };
            keep.insert(key);
        }
    }
    pairs
        .into_iter()
        .filter(|p| keep.contains(&(p.student_a.clone(), p.student_b.clone())))
        .collect()
}

/// Symmetric lookup over a computed pair set.
#[derive(Debug, Clone, Default)]
pub struct SimilarityIndex {
    neighbors: BTreeMap<StudentId, Vec<(StudentId, f64)>>,
}

impl SimilarityIndex {
    pub fn new(pairs: &[SimilarityPair]) -> Self {
        let mut neighbors: BTreeMap<StudentId, Vec<(StudentId, f64)>> = BTreeMap::new();
        for pair in pairs {
            neighbors
                .entry(pair.student_a.clone())
                .or_default()
                .push((pair.student_b.clone(), pair.score));
            neighbors
                .entry(pair.student_b.clone())
                .or_default()
                .push((pair.student_a.clone(), pair.score));
        }
        for list in neighbors.values_mut() {
            list.sort_by(by_score_then_id);
        }
        Self { neighbors }
    }

    pub fn score(&self, a: &StudentId, b: &StudentId) -> Option<f64> {
        self.neighbors
            .get(a)?
            .iter()
            .find(|(other, _)| other == b)
            .map(|(_, score)| *score)
    }

    /// Up to `k` most similar students, ties broken by lower id.
    pub fn neighbors(&self, student: &StudentId, k: usize) -> Vec<(StudentId, f64)> {
        self.neighbors
            .get(student)
            .map(|list| list.iter().take(k).cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CourseId;

    fn matrix(rows: &[(&str, &[Option<f64>])]) -> ScoreMatrix {
        let width = rows.first().map_or(0, |(_, r)| r.len());
        ScoreMatrix {
            students: rows.iter().map(|(s, _)| StudentId::new(*s)).collect(),
            courses: (0..width).map(|c| CourseId::new(format!("C{c}"))).collect(),
            rows: rows
                .iter()
                .map(|(_, r)| {
                    r.iter()
                        .map(|v| v.map_or(Cell::Absent, Cell::Observed))
                        .collect()
                })
                .collect(),
        }
    }

    fn id(s: &str) -> StudentId {
        StudentId::new(s)
    }

    #[test]
    fn self_similarity_is_one() {
        let row = [Cell::Observed(40.0), Cell::Absent, Cell::Observed(90.0)];
        let (score, shared) = restricted_cosine(&row, &row).unwrap();
        assert!((score - 1.0).abs() < 1e-12);
        assert_eq!(shared, 2);
    }

    #[test]
    fn absent_cells_are_not_zeros() {
        // Treating C1 as zero for S2 would give 0.707 instead of 1.0.
        let m = matrix(&[
            ("S1", &[Some(80.0), Some(80.0)]),
            ("S2", &[Some(80.0), None]),
        ]);
        let pairs = compute_pairs(&m, &CancellationToken::new()).unwrap();
        assert_eq!(pairs.len(), 1);
        assert!((pairs[0].score - 1.0).abs() < 1e-12);
        assert_eq!(pairs[0].shared_courses, 1);
    }

    #[test]
    fn no_shared_course_means_no_pair() {
        let m = matrix(&[
            ("S1", &[Some(80.0), None]),
            ("S2", &[None, Some(70.0)]),
        ]);
        assert!(compute_pairs(&m, &CancellationToken::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn zero_norm_on_shared_dims_is_skipped() {
        let m = matrix(&[("S1", &[Some(0.0)]), ("S2", &[Some(70.0)])]);
        assert!(compute_pairs(&m, &CancellationToken::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn similarity_is_symmetric() {
        let m = matrix(&[
            ("S1", &[Some(90.0), Some(40.0), None]),
            ("S2", &[Some(60.0), Some(70.0), Some(20.0)]),
        ]);
        let index = SimilarityIndex::new(&compute_pairs(&m, &CancellationToken::new()).unwrap());
        let ab = index.score(&id("S1"), &id("S2")).unwrap();
        let ba = index.score(&id("S2"), &id("S1")).unwrap();
        assert_eq!(ab, ba);
        let (reverse, _) = restricted_cosine(&m.rows[1], &m.rows[0]).unwrap();
        assert_eq!(ab, reverse);
    }

    #[test]
    fn neighbors_break_ties_by_lower_id() {
        let m = matrix(&[
            ("S1", &[Some(50.0), Some(50.0)]),
            ("S2", &[Some(10.0), Some(10.0)]),
            ("S3", &[Some(90.0), Some(90.0)]),
            ("S4", &[Some(90.0), Some(10.0)]),
        ]);
        let index = SimilarityIndex::new(&compute_pairs(&m, &CancellationToken::new()).unwrap());
        let top: Vec<StudentId> = index
            .neighbors(&id("S1"), 2)
            .into_iter()
            .map(|(s, _)| s)
            .collect();
        assert_eq!(top, vec![id("S2"), id("S3")]);
    }

    #[test]
    fn capping_keeps_each_students_nearest() {
        let m = matrix(&[
            ("S1", &[Some(90.0), Some(10.0)]),
            ("S2", &[Some(85.0), Some(15.0)]),
            ("S3", &[Some(10.0), Some(90.0)]),
            ("S4", &[Some(15.0), Some(85.0)]),
        ]);
        let pairs = compute_pairs(&m, &CancellationToken::new()).unwrap();
        assert_eq!(pairs.len(), 6);
        let capped = cap_neighbors(pairs, 1);
        let kept: Vec<(&str, &str)> = capped
            .iter()
            .map(|p| (p.student_a.as_str(), p.student_b.as_str()))
            .collect();
        assert_eq!(kept, vec![("S1", "S2"), ("S3", "S4")]);
    }

    #[test]
    fn cancelling_mid_run_discards_finished_rows() {
        let m = matrix(&[
            ("S1", &[Some(50.0), Some(70.0)]),
            ("S2", &[Some(60.0), Some(40.0)]),
            ("S3", &[Some(90.0), Some(80.0)]),
            ("S4", &[Some(30.0), Some(20.0)]),
        ]);
        let token = CancellationToken::new();
        let mut visited = Vec::new();
        let result = compute_pairs_with(&m, &token, |row| {
            visited.push(row);
            if row == 2 {
                token.cancel();
            }
        });
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(visited, vec![0, 1, 2]);
    }

    #[test]
    fn cancelled_token_stops_the_run() {
        let m = matrix(&[("S1", &[Some(50.0)]), ("S2", &[Some(60.0)])]);
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            compute_pairs(&m, &token),
            Err(PipelineError::Cancelled)
        ));
    }
}
