use std::collections::{BTreeMap, BTreeSet};

use crate::classify::Classification;
use crate::config::{CatalogConfig, Thresholds};
use crate::models::{
    ClassificationResult, CourseId, Priority, Recommendation, RecommendationSource,
    StudentCourseAggregate, StudentId, Tag,
};
use crate::similarity::SimilarityIndex;

/// Static weakness-to-remedial-course lookup.
#[derive(Debug, Clone)]
pub struct CourseCatalog {
    default_course: CourseId,
    /// Subject key, split into lowercase words, to remedial courses.
    remedial: Vec<(Vec<String>, Vec<CourseId>)>,
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_run(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

impl CourseCatalog {
    pub fn from_config(config: &CatalogConfig) -> Self {
        Self {
            default_course: CourseId::new(config.default_course.clone()),
            remedial: config
                .remedial
                .iter()
                .map(|(key, courses)| {
                    (
                        words(key),
                        courses.iter().cloned().map(CourseId::new).collect(),
                    )
                })
                .collect(),
        }
    }

    /// Keys whose words appear as whole words in `needle`, or the reverse.
    fn matches(&self, needle: &str) -> Vec<CourseId> {
        let needle = words(needle);
        self.remedial
            .iter()
            .filter(|(key, _)| contains_run(&needle, key) || contains_run(key, &needle))
            .flat_map(|(_, courses)| courses.iter().cloned())
            .collect()
    }

    /// Remedial courses for a weak course: by course id, then by its topic
    /// tags, then the default course. Never empty.
    pub fn lookup<'a>(
        &self,
        course: &CourseId,
        topic_tags: impl IntoIterator<Item = &'a String>,
    ) -> Vec<CourseId> {
        let mut found = self.matches(course.as_str());
        if found.is_empty() {
            found = topic_tags
                .into_iter()
                .flat_map(|tag| self.matches(tag))
                .collect();
        }
        if found.is_empty() {
            found.push(self.default_course.clone());
        }
        let mut seen = BTreeSet::new();
        found.retain(|c| seen.insert(c.clone()));
        found
    }
}

impl Default for CourseCatalog {
    fn default() -> Self {
        Self::from_config(&CatalogConfig::default())
    }
}

/// Severity of the gap on the weak course, independent of the branch.
pub fn priority_for(mean_pct: f64, thresholds: &Thresholds) -> Priority {
    if mean_pct < thresholds.critical {
        Priority::High
    } else if mean_pct < thresholds.weak {
        Priority::Medium
    } else {
        Priority::Low
    }
}

/// Fold candidates into one recommendation per (student, course), keeping
/// the higher priority. On a tie the similarity candidate wins, then the
/// earlier one.
pub fn merge_candidates(candidates: Vec<Recommendation>) -> Vec<Recommendation> {
    let mut merged: BTreeMap<(StudentId, CourseId), Recommendation> = BTreeMap::new();
    for candidate in candidates {
        let key = (candidate.student_id.clone(), candidate.course_id.clone());
        match merged.get(&key) {
            Some(existing)
                if existing.priority > candidate.priority
                    || (existing.priority == candidate.priority
                        && (existing.source == RecommendationSource::Similarity
                            || candidate.source == RecommendationSource::Catalog)) => {}
            _ => {
                merged.insert(key, candidate);
            }
        }
    }
    merged.into_values().collect()
}

pub struct Recommender<'a> {
    pub classification: &'a Classification,
    pub aggregates: &'a [StudentCourseAggregate],
    pub similarity: &'a SimilarityIndex,
    pub catalog: &'a CourseCatalog,
    pub thresholds: &'a Thresholds,
    pub top_k: usize,
}

impl Recommender<'_> {
    fn topic_tags(&self, student: &StudentId, course: &CourseId) -> Vec<&String> {
        self.aggregates
            .iter()
            .find(|a| &a.student_id == student && &a.course_id == course)
            .map(|a| a.topic_tags.iter().collect())
            .unwrap_or_default()
    }

    /// Candidates for one Weak tag. Similarity first; the catalog only when
    /// no similar student is Strong on the course.
    pub fn candidates_for(&self, weak: &ClassificationResult) -> Vec<Recommendation> {
        let priority = priority_for(weak.mean_pct, self.thresholds);

        let strong_neighbors: Vec<(StudentId, f64)> = self
            .similarity
            .neighbors(&weak.student_id, self.top_k)
            .into_iter()
            .filter(|(other, _)| {
                self.classification.tag(other, &weak.course_id) == Some(Tag::Strong)
            })
            .collect();

        if let Some((closest, score)) = strong_neighbors.first() {
            return vec![Recommendation {
                student_id: weak.student_id.clone(),
                course_id: weak.course_id.clone(),
                priority,
                source: RecommendationSource::Similarity,
                trigger_course: weak.course_id.clone(),
                rationale: format!(
                    "{} similar student(s) are strong in {} (closest {} at {:.2})",
                    strong_neighbors.len(),
                    weak.course_id,
                    closest,
                    score
                ),
            }];
        }

        self.catalog
            .lookup(
                &weak.course_id,
                self.topic_tags(&weak.student_id, &weak.course_id),
            )
            .into_iter()
            .map(|course_id| Recommendation {
                student_id: weak.student_id.clone(),
                rationale: format!(
                    "remedial course for weak result in {} ({:.1}%)",
                    weak.course_id, weak.mean_pct
                ),
                course_id,
                priority,
                source: RecommendationSource::Catalog,
                trigger_course: weak.course_id.clone(),
            })
            .collect()
    }

    pub fn recommend_all(&self) -> Vec<Recommendation> {
        let candidates: Vec<Recommendation> = self
            .classification
            .results
            .iter()
            .filter(|r| r.tag == Tag::Weak)
            .flat_map(|weak| self.candidates_for(weak))
            .collect();
        let recommendations = merge_candidates(candidates);
        tracing::debug!(
            recommendations = recommendations.len(),
            "built course recommendations"
        );
        recommendations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierRules;
    use crate::models::SimilarityPair;

    fn aggregate(
        student: &str,
        course: &str,
        mean_pct: f64,
        tags: &[&str],
    ) -> StudentCourseAggregate {
        StudentCourseAggregate {
            student_id: StudentId::new(student),
            course_id: CourseId::new(course),
            mean_pct,
            stdev_pct: 0.0,
            latest_pct: mean_pct,
            best_pct: mean_pct,
            attempt_count: 1,
            attempt_sequence: Vec::new(),
            topic_tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn pair(a: &str, b: &str, score: f64) -> SimilarityPair {
        SimilarityPair {
            student_a: StudentId::new(a),
            student_b: StudentId::new(b),
            score,
            shared_courses: 1,
        }
    }

    fn recommend(
        aggregates: &[StudentCourseAggregate],
        pairs: &[SimilarityPair],
    ) -> Vec<Recommendation> {
        let thresholds = Thresholds::default();
        let classification =
            crate::classify::classify(aggregates, &[], &thresholds, &TierRules::default());
        let similarity = SimilarityIndex::new(pairs);
        let catalog = CourseCatalog::default();
        Recommender {
            classification: &classification,
            aggregates,
            similarity: &similarity,
            catalog: &catalog,
            thresholds: &thresholds,
            top_k: 5,
        }
        .recommend_all()
    }

    #[test]
    fn priority_reflects_gap_severity() {
        let t = Thresholds::default();
        assert_eq!(priority_for(39.9, &t), Priority::High);
        assert_eq!(priority_for(40.0, &t), Priority::Medium);
        assert_eq!(priority_for(59.9, &t), Priority::Medium);
        assert_eq!(priority_for(60.0, &t), Priority::Low);
    }

    #[test]
    fn catalog_matches_by_id_then_tags_then_default() {
        let catalog = CourseCatalog::default();
        let by_id = catalog.lookup(&CourseId::new("Intro Python"), []);
        assert_eq!(
            by_id,
            vec![
                CourseId::new("Python Fundamentals"),
                CourseId::new("Data Structures in Python")
            ]
        );

        let tag = "sql".to_string();
        let by_tag = catalog.lookup(&CourseId::new("CS-204"), [&tag]);
        assert!(by_tag.contains(&CourseId::new("SQL Masterclass")));

        let fallback = catalog.lookup(&CourseId::new("Pottery"), []);
        assert_eq!(fallback, vec![CourseId::new("General Study Skills Workshop")]);
    }

    #[test]
    fn catalog_matches_whole_words_only() {
        let catalog = CourseCatalog::default();
        let default = vec![CourseId::new("General Study Skills Workshop")];
        let a = "a".to_string();
        let os = "os".to_string();
        assert_eq!(catalog.lookup(&CourseId::new("a"), []), default);
        assert_eq!(catalog.lookup(&CourseId::new("Kinesiology"), [&a, &os]), default);
        assert_eq!(catalog.lookup(&CourseId::new("Jav"), []), default);

        let data = catalog.lookup(&CourseId::new("Applied Data-Science 2"), []);
        assert!(data.contains(&CourseId::new("Intro to ML")));
        let networks = "networks".to_string();
        let by_tag = catalog.lookup(&CourseId::new("CS-301"), [&networks]);
        assert!(by_tag.contains(&CourseId::new("Networking Basics")));
        let by_partial_key = catalog.lookup(&CourseId::new("Operating"), []);
        assert!(by_partial_key.contains(&CourseId::new("OS Concepts")));
    }

    #[test]
    fn similar_strong_student_drives_recommendation() {
        let aggregates = vec![
            aggregate("S1", "Python", 35.0, &[]),
            aggregate("S2", "Python", 88.0, &[]),
        ];
        let recs = recommend(&aggregates, &[pair("S1", "S2", 0.9)]);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].course_id, CourseId::new("Python"));
        assert_eq!(recs[0].source, RecommendationSource::Similarity);
        assert_eq!(recs[0].priority, Priority::High);
    }

    #[test]
    fn every_weak_tag_yields_a_recommendation() {
        let aggregates = vec![aggregate("S1", "Pottery", 50.0, &[])];
        let recs = recommend(&aggregates, &[]);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].source, RecommendationSource::Catalog);
        assert_eq!(recs[0].priority, Priority::Medium);
        assert_eq!(recs[0].trigger_course, CourseId::new("Pottery"));
    }

    #[test]
    fn duplicate_candidates_keep_highest_priority() {
        let similarity = Recommendation {
            student_id: StudentId::new("S1"),
            course_id: CourseId::new("Python Fundamentals"),
            priority: Priority::Medium,
            source: RecommendationSource::Similarity,
            trigger_course: CourseId::new("Python Fundamentals"),
            rationale: String::new(),
        };
        let catalog = Recommendation {
            priority: Priority::High,
            source: RecommendationSource::Catalog,
            trigger_course: CourseId::new("Intro Python"),
            ..similarity.clone()
        };
        let merged = merge_candidates(vec![similarity.clone(), catalog.clone()]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].priority, Priority::High);

        let merged = merge_candidates(vec![catalog, similarity]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].priority, Priority::High);
    }

    #[test]
    fn both_branches_for_the_same_course_emit_once() {
        // S1 is weak in "Python Fundamentals" (similarity branch, Medium) and
        // critically weak in "Intro Python" (catalog branch, High, which maps
        // to "Python Fundamentals" too).
        let aggregates = vec![
            aggregate("S1", "Python Fundamentals", 55.0, &[]),
            aggregate("S1", "Intro Python", 20.0, &[]),
            aggregate("S2", "Python Fundamentals", 90.0, &[]),
        ];
        let recs = recommend(&aggregates, &[pair("S1", "S2", 0.8)]);
        let fundamentals: Vec<&Recommendation> = recs
            .iter()
            .filter(|r| r.course_id == CourseId::new("Python Fundamentals"))
            .collect();
        assert_eq!(fundamentals.len(), 1);
        assert_eq!(fundamentals[0].priority, Priority::High);
        assert_eq!(fundamentals[0].source, RecommendationSource::Catalog);
    }
}
