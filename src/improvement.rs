use std::cmp::Ordering;

use crate::aggregate::by_student;
use crate::models::{CourseImprovement, ImprovementSummary, OverallTrend, StudentCourseAggregate};

/// First-to-last change for one (student, course); `None` under two attempts.
pub fn course_improvement(aggregate: &StudentCourseAggregate) -> Option<CourseImprovement> {
    if aggregate.attempt_sequence.len() < 2 {
        return None;
    }
    let baseline = aggregate.attempt_sequence.first()?.pct;
    let current = aggregate.attempt_sequence.last()?.pct;
    Some(CourseImprovement {
        student_id: aggregate.student_id.clone(),
        course_id: aggregate.course_id.clone(),
        baseline_pct: baseline,
        current_pct: current,
        improvement: current - baseline,
        attempts: aggregate.attempt_sequence.len(),
    })
}

pub fn summarize(aggregates: &[StudentCourseAggregate], band: f64) -> Vec<ImprovementSummary> {
    by_student(aggregates)
        .into_iter()
        .map(|(student_id, student_aggregates)| {
            let courses: Vec<CourseImprovement> = student_aggregates
                .into_iter()
                .filter_map(course_improvement)
                .collect();

            let total: f64 = courses.iter().map(|c| c.improvement).sum();
            let average = if courses.is_empty() {
                0.0
            } else {
                total / courses.len() as f64
            };
            let overall = if courses.is_empty() {
                OverallTrend::InsufficientData
            } else if average > band {
                OverallTrend::Increasing
            } else if average < -band {
                OverallTrend::Decreasing
            } else {
                OverallTrend::Stable
            };

            ImprovementSummary {
                student_id: student_id.clone(),
                total_improvement: total,
                average_improvement: average,
                courses_improved: courses.iter().filter(|c| c.improvement > 0.0).count(),
                courses_declined: courses.iter().filter(|c| c.improvement < 0.0).count(),
                overall,
                courses,
            }
        })
        .collect()
}

/// Students with repeat attempts, best average improvement first.
pub fn most_improved(summaries: &[ImprovementSummary], limit: usize) -> Vec<&ImprovementSummary> {
    let mut ranked: Vec<&ImprovementSummary> = summaries
        .iter()
        .filter(|s| s.overall != OverallTrend::InsufficientData)
        .collect();
    ranked.sort_by(|a, b| {
        b.average_improvement
            .partial_cmp(&a.average_improvement)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.student_id.cmp(&b.student_id))
    });
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttemptPoint, CourseId, StudentId};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn aggregate(student: &str, course: &str, pcts: &[f64]) -> StudentCourseAggregate {
        StudentCourseAggregate {
            student_id: StudentId::new(student),
            course_id: CourseId::new(course),
            mean_pct: 0.0,
            stdev_pct: 0.0,
            latest_pct: 0.0,
            best_pct: 0.0,
            attempt_count: pcts.len(),
            attempt_sequence: pcts
                .iter()
                .enumerate()
                .map(|(i, pct)| AttemptPoint {
                    timestamp: Utc::now(),
                    attempt_id: i.to_string(),
                    pct: *pct,
                })
                .collect(),
            topic_tags: BTreeSet::new(),
        }
    }

    #[test]
    fn compares_first_and_last_attempt() {
        let improvement = course_improvement(&aggregate("S1", "C1", &[40.0, 90.0, 55.0])).unwrap();
        assert_eq!(improvement.baseline_pct, 40.0);
        assert_eq!(improvement.current_pct, 55.0);
        assert_eq!(improvement.improvement, 15.0);
        assert!(course_improvement(&aggregate("S1", "C1", &[40.0])).is_none());
    }

    #[test]
    fn overall_trend_uses_the_band() {
        let summaries = summarize(
            &[
                aggregate("S1", "C1", &[40.0, 60.0]),
                aggregate("S1", "C2", &[70.0, 66.0]),
                aggregate("S2", "C1", &[60.0, 58.0]),
                aggregate("S3", "C1", &[80.0]),
            ],
            5.0,
        );
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].overall, OverallTrend::Increasing);
        assert_eq!(summaries[0].courses_improved, 1);
        assert_eq!(summaries[0].courses_declined, 1);
        assert_eq!(summaries[0].average_improvement, 8.0);
        assert_eq!(summaries[1].overall, OverallTrend::Stable);
        assert_eq!(summaries[2].overall, OverallTrend::InsufficientData);
    }

    #[test]
    fn ranking_skips_students_without_repeats() {
        let summaries = summarize(
            &[
                aggregate("S1", "C1", &[40.0, 50.0]),
                aggregate("S2", "C1", &[40.0, 70.0]),
                aggregate("S3", "C1", &[40.0]),
                aggregate("S4", "C1", &[40.0, 70.0]),
            ],
            5.0,
        );
        let ranked: Vec<&str> = most_improved(&summaries, 2)
            .iter()
            .map(|s| s.student_id.as_str())
            .collect();
        assert_eq!(ranked, vec!["S2", "S4"]);
    }
}
