use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{
    AttemptPoint, Cell, CourseId, ScoreMatrix, ScoreRecord, StudentCourseAggregate, StudentId,
};

/// Integer attempt ids first in numeric order, then the rest lexically.
fn attempt_id_key(id: &str) -> (bool, Option<u64>, &str) {
    let parsed = id.parse::<u64>().ok();
    (parsed.is_none(), parsed, id)
}

fn compare_attempt_ids(a: &str, b: &str) -> Ordering {
    attempt_id_key(a).cmp(&attempt_id_key(b))
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn population_stdev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// One aggregate per (student, course), ordered by student then course.
pub fn build_aggregates(records: &[ScoreRecord]) -> Vec<StudentCourseAggregate> {
    let mut grouped: BTreeMap<(StudentId, CourseId), Vec<&ScoreRecord>> = BTreeMap::new();
    for record in records {
        grouped
            .entry((record.student_id.clone(), record.course_id.clone()))
            .or_default()
            .push(record);
    }

    grouped
        .into_iter()
        .map(|((student_id, course_id), mut attempts)| {
            attempts.sort_by(|a, b| {
                a.attempt_timestamp
                    .cmp(&b.attempt_timestamp)
                    .then_with(|| compare_attempt_ids(&a.attempt_id, &b.attempt_id))
            });

            let attempt_sequence: Vec<AttemptPoint> = attempts
                .iter()
                .map(|r| AttemptPoint {
                    timestamp: r.attempt_timestamp,
                    attempt_id: r.attempt_id.clone(),
                    pct: r.pct(),
                })
                .collect();
            let pcts: Vec<f64> = attempt_sequence.iter().map(|p| p.pct).collect();
            let topic_tags: BTreeSet<String> = attempts
                .iter()
                .flat_map(|r| r.topic_tags.iter().cloned())
                .collect();

            StudentCourseAggregate {
                student_id,
                course_id,
                mean_pct: mean(&pcts),
                stdev_pct: population_stdev(&pcts),
                latest_pct: pcts.last().copied().unwrap_or_default(),
                best_pct: pcts.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                attempt_count: pcts.len(),
                attempt_sequence,
                topic_tags,
            }
        })
        .collect()
}

/// Student × course matrix of mean percentages. Unattempted cells are `Absent`.
pub fn build_matrix(aggregates: &[StudentCourseAggregate]) -> ScoreMatrix {
    let students: Vec<StudentId> = aggregates
        .iter()
        .map(|a| a.student_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let courses: Vec<CourseId> = aggregates
        .iter()
        .map(|a| a.course_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut rows = vec![vec![Cell::Absent; courses.len()]; students.len()];
    for aggregate in aggregates {
        // Both indexes come from the same aggregates, so the lookups succeed.
        if let (Ok(r), Ok(c)) = (
            students.binary_search(&aggregate.student_id),
            courses.binary_search(&aggregate.course_id),
        ) {
            rows[r][c] = Cell::Observed(aggregate.mean_pct);
        }
    }

    ScoreMatrix {
        students,
        courses,
        rows,
    }
}

/// Aggregates grouped per student, for components that work student by student.
pub fn by_student(
    aggregates: &[StudentCourseAggregate],
) -> BTreeMap<&StudentId, Vec<&StudentCourseAggregate>> {
    let mut map: BTreeMap<&StudentId, Vec<&StudentCourseAggregate>> = BTreeMap::new();
    for aggregate in aggregates {
        map.entry(&aggregate.student_id).or_default().push(aggregate);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn record(
        student: &str,
        course: &str,
        attempt: &str,
        day: i64,
        score: f64,
        max: f64,
    ) -> ScoreRecord {
        ScoreRecord {
            student_id: StudentId::new(student),
            course_id: CourseId::new(course),
            attempt_id: attempt.to_string(),
            attempt_timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
                + Duration::days(day),
            score,
            max_score: max,
            topic_tags: BTreeSet::new(),
        }
    }

    #[test]
    fn percentages_are_taken_per_record_before_averaging() {
        let records = vec![
            record("S1", "C1", "1", 0, 5.0, 10.0),
            record("S1", "C1", "2", 1, 90.0, 100.0),
        ];
        let aggregates = build_aggregates(&records);
        assert_eq!(aggregates.len(), 1);
        // (50 + 90) / 2, not (5 + 90) / (10 + 100)
        assert!((aggregates[0].mean_pct - 70.0).abs() < 1e-9);
        assert!((aggregates[0].stdev_pct - 20.0).abs() < 1e-9);
        assert_eq!(aggregates[0].best_pct, 90.0);
        assert_eq!(aggregates[0].latest_pct, 90.0);
    }

    #[test]
    fn constant_attempts_have_zero_population_stdev() {
        let records = vec![
            record("S1", "C1", "1", 0, 60.0, 100.0),
            record("S1", "C1", "2", 1, 60.0, 100.0),
            record("S1", "C1", "3", 2, 60.0, 100.0),
        ];
        let aggregate = &build_aggregates(&records)[0];
        assert_eq!(aggregate.mean_pct, 60.0);
        assert_eq!(aggregate.stdev_pct, 0.0);
        assert_eq!(aggregate.attempt_count, 3);
    }

    #[test]
    fn sequence_sorts_by_time_then_attempt_id() {
        let records = vec![
            record("S1", "C1", "10", 1, 30.0, 100.0),
            record("S1", "C1", "9", 1, 20.0, 100.0),
            record("S1", "C1", "1", 0, 10.0, 100.0),
        ];
        let aggregate = &build_aggregates(&records)[0];
        let ids: Vec<&str> = aggregate
            .attempt_sequence
            .iter()
            .map(|p| p.attempt_id.as_str())
            .collect();
        assert_eq!(ids, vec!["1", "9", "10"]);
        assert_eq!(aggregate.latest_pct, 30.0);
    }

    #[test]
    fn mixed_attempt_ids_order_the_same_whatever_the_input_order() {
        let two = record("S1", "C1", "2", 0, 20.0, 100.0);
        let ten = record("S1", "C1", "10", 0, 10.0, 100.0);
        let other = record("S1", "C1", "1a", 0, 30.0, 100.0);

        let orders = [
            vec![two.clone(), ten.clone(), other.clone()],
            vec![other.clone(), two.clone(), ten.clone()],
            vec![ten.clone(), other.clone(), two.clone()],
            vec![other, ten, two],
        ];
        for records in &orders {
            let aggregate = &build_aggregates(records)[0];
            let ids: Vec<&str> = aggregate
                .attempt_sequence
                .iter()
                .map(|p| p.attempt_id.as_str())
                .collect();
            assert_eq!(ids, vec!["2", "10", "1a"]);
            assert_eq!(aggregate.latest_pct, 30.0);
        }
    }

    #[test]
    fn attempt_id_order_is_total() {
        let ids = ["2", "10", "1a", "01", "b", "1"];
        for a in ids {
            for b in ids {
                assert_eq!(compare_attempt_ids(a, b), compare_attempt_ids(b, a).reverse());
                for c in ids {
                    if compare_attempt_ids(a, b).is_lt() && compare_attempt_ids(b, c).is_lt() {
                        assert!(compare_attempt_ids(a, c).is_lt());
                    }
                }
            }
        }
    }

    #[test]
    fn unattempted_cells_are_absent_not_zero() {
        let records = vec![
            record("S1", "C1", "1", 0, 0.0, 100.0),
            record("S2", "C2", "1", 0, 80.0, 100.0),
        ];
        let matrix = build_matrix(&build_aggregates(&records));
        let s1 = StudentId::new("S1");
        let c1 = CourseId::new("C1");
        let c2 = CourseId::new("C2");
        assert_eq!(matrix.cell(&s1, &c1), Cell::Observed(0.0));
        assert_eq!(matrix.cell(&s1, &c2), Cell::Absent);
        assert_eq!(matrix.courses.len(), 2);
        assert_eq!(matrix.students.len(), 2);
    }
}
