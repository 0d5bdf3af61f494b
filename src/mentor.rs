use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::classify::Classification;
use crate::config::{MentorConfig, Thresholds};
use crate::models::{CourseId, MentorPairing, StudentId, Tag, UnmatchedMentee};
use crate::similarity::SimilarityIndex;

#[derive(Debug, Clone, Default)]
pub struct MentorMatches {
    pub pairings: Vec<MentorPairing>,
    /// Weak pairs with no Strong student on the course.
    pub unmatched: Vec<UnmatchedMentee>,
}

/// Mentor strength above the Strong threshold, scaled into [0, 1].
pub fn strength_margin(mentor_mean_pct: f64, thresholds: &Thresholds) -> f64 {
    ((mentor_mean_pct - thresholds.strong) / (100.0 - thresholds.strong)).clamp(0.0, 1.0)
}

pub fn compatibility(similarity: f64, margin: f64, config: &MentorConfig) -> f64 {
    config.similarity_weight * similarity + config.strength_weight * margin
}

/// Pair every Weak (student, course) with up to `top_k` Strong students on
/// the same course, most similar first.
pub fn match_mentors(
    classification: &Classification,
    similarity: &SimilarityIndex,
    thresholds: &Thresholds,
    config: &MentorConfig,
) -> MentorMatches {
    let mut strong_by_course: BTreeMap<&CourseId, Vec<(&StudentId, f64)>> = BTreeMap::new();
    for result in classification.results.iter().filter(|r| r.tag == Tag::Strong) {
        strong_by_course
            .entry(&result.course_id)
            .or_default()
            .push((&result.student_id, result.mean_pct));
    }

    let mut matches = MentorMatches::default();
    for weak in classification.results.iter().filter(|r| r.tag == Tag::Weak) {
        let mut candidates: Vec<(&StudentId, f64, f64)> = strong_by_course
            .get(&weak.course_id)
            .map(|mentors| {
                mentors
                    .iter()
                    .filter(|(mentor, _)| **mentor != weak.student_id)
                    .map(|(mentor, mean_pct)| {
                        let sim = similarity
                            .score(&weak.student_id, mentor)
                            .unwrap_or(0.0);
                        (*mentor, sim, *mean_pct)
                    })
                    .collect()
            })
            .unwrap_or_default();

        if candidates.is_empty() {
            matches.unmatched.push(UnmatchedMentee {
                student_id: weak.student_id.clone(),
                course_id: weak.course_id.clone(),
            });
            continue;
        }

        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        candidates.truncate(config.top_k);

        for (mentor, sim, mentor_mean_pct) in candidates {
            let margin = strength_margin(mentor_mean_pct, thresholds);
            matches.pairings.push(MentorPairing {
                weak_student_id: weak.student_id.clone(),
                mentor_id: mentor.clone(),
                course_id: weak.course_id.clone(),
                compatibility_score: compatibility(sim, margin, config),
                similarity: sim,
                mentor_mean_pct,
            });
        }
    }

    tracing::debug!(
        pairings = matches.pairings.len(),
        waitlisted = matches.unmatched.len(),
        "matched mentors"
    );
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::config::TierRules;
    use crate::models::{SimilarityPair, StudentCourseAggregate};
    use std::collections::BTreeSet;

    fn aggregate(student: &str, course: &str, mean_pct: f64) -> StudentCourseAggregate {
        StudentCourseAggregate {
            student_id: StudentId::new(student),
            course_id: CourseId::new(course),
            mean_pct,
            stdev_pct: 0.0,
            latest_pct: mean_pct,
            best_pct: mean_pct,
            attempt_count: 1,
            attempt_sequence: Vec::new(),
            topic_tags: BTreeSet::new(),
        }
    }

    fn pair(a: &str, b: &str, score: f64) -> SimilarityPair {
        SimilarityPair {
            student_a: StudentId::new(a),
            student_b: StudentId::new(b),
            score,
            shared_courses: 2,
        }
    }

    fn run(aggregates: &[StudentCourseAggregate], pairs: &[SimilarityPair]) -> MentorMatches {
        let thresholds = Thresholds::default();
        let classification = classify(aggregates, &[], &thresholds, &TierRules::default());
        match_mentors(
            &classification,
            &SimilarityIndex::new(pairs),
            &thresholds,
            &MentorConfig::default(),
        )
    }

    #[test]
    fn strong_similar_student_becomes_mentor() {
        let matches = run(
            &[
                aggregate("S2", "C1", 50.0),
                aggregate("S3", "C1", 85.0),
            ],
            &[pair("S2", "S3", 0.95)],
        );
        assert_eq!(matches.pairings.len(), 1);
        let pairing = &matches.pairings[0];
        assert_eq!(pairing.mentor_id, StudentId::new("S3"));
        assert_eq!(pairing.weak_student_id, StudentId::new("S2"));
        // 0.5 * 0.95 + 0.5 * (10 / 25)
        assert!((pairing.compatibility_score - 0.675).abs() < 1e-9);
        assert!(matches.unmatched.is_empty());
    }

    #[test]
    fn no_strong_student_means_waitlist_not_error() {
        let matches = run(
            &[aggregate("S2", "C1", 50.0), aggregate("S4", "C1", 65.0)],
            &[pair("S2", "S4", 0.9)],
        );
        assert!(matches.pairings.is_empty());
        assert_eq!(
            matches.unmatched,
            vec![UnmatchedMentee {
                student_id: StudentId::new("S2"),
                course_id: CourseId::new("C1"),
            }]
        );
    }

    #[test]
    fn ranks_by_similarity_and_caps_at_top_k() {
        let mut aggregates = vec![aggregate("M0", "C1", 40.0)];
        let mut pairs = Vec::new();
        for i in 1..=7 {
            let mentor = format!("M{i}");
            aggregates.push(aggregate(&mentor, "C1", 100.0 - i as f64));
            pairs.push(pair("M0", &mentor, 0.5 + i as f64 * 0.05));
        }
        let matches = run(&aggregates, &pairs);
        let mentors: Vec<&str> = matches
            .pairings
            .iter()
            .map(|p| p.mentor_id.as_str())
            .collect();
        assert_eq!(mentors, vec!["M7", "M6", "M5", "M4", "M3"]);
    }

    #[test]
    fn margin_is_scaled_and_clamped() {
        let t = Thresholds::default();
        assert_eq!(strength_margin(75.0, &t), 0.0);
        assert_eq!(strength_margin(100.0, &t), 1.0);
        assert!((strength_margin(87.5, &t) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn weights_are_configurable() {
        let config = MentorConfig {
            similarity_weight: 1.0,
            strength_weight: 0.0,
            ..MentorConfig::default()
        };
        assert_eq!(compatibility(0.8, 1.0, &config), 0.8);
    }
}
