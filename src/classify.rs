use crate::aggregate::by_student;
use crate::config::{Thresholds, TierRules};
use crate::models::{
    ClassificationResult, CourseId, StudentCourseAggregate, StudentId, StudentTier, Tag, Tier,
    TierOutcome,
};

pub fn tag_for(mean_pct: f64, thresholds: &Thresholds) -> Tag {
    if mean_pct >= thresholds.strong {
        Tag::Strong
    } else if mean_pct < thresholds.weak {
        Tag::Weak
    } else {
        Tag::Neutral
    }
}

/// Student-level tier from per-course tags. No tags means no data, never Medium.
pub fn tier_for(student_id: &StudentId, tags: &[Tag], rules: &TierRules) -> StudentTier {
    let strong_count = tags.iter().filter(|t| **t == Tag::Strong).count();
    let weak_count = tags.iter().filter(|t| **t == Tag::Weak).count();
    let neutral_count = tags.len() - strong_count - weak_count;

    let outcome = if tags.is_empty() {
        TierOutcome::NoData
    } else {
        let total = tags.len() as f64;
        let strong_fraction = strong_count as f64 / total;
        let weak_fraction = weak_count as f64 / total;
        if strong_fraction > rules.high_strong_fraction && weak_count <= rules.high_max_weak {
            TierOutcome::Classified(Tier::High)
        } else if weak_fraction >= rules.low_weak_fraction {
            TierOutcome::Classified(Tier::Low)
        } else {
            TierOutcome::Classified(Tier::Medium)
        }
    };

    StudentTier {
        student_id: student_id.clone(),
        outcome,
        strong_count,
        weak_count,
        neutral_count,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub results: Vec<ClassificationResult>,
    pub tiers: Vec<StudentTier>,
}

impl Classification {
    pub fn tag(&self, student: &StudentId, course: &CourseId) -> Option<Tag> {
        self.results
            .binary_search_by(|r| (&r.student_id, &r.course_id).cmp(&(student, course)))
            .ok()
            .map(|idx| self.results[idx].tag)
    }

    pub fn tier(&self, student: &StudentId) -> TierOutcome {
        self.tiers
            .binary_search_by(|t| t.student_id.cmp(student))
            .map_or(TierOutcome::NoData, |idx| self.tiers[idx].outcome)
    }
}

/// Tag every aggregate and tier every student that has aggregates.
///
/// `roster` names students who should get a tier even without any
/// aggregates; they come back as [`TierOutcome::NoData`].
pub fn classify(
    aggregates: &[StudentCourseAggregate],
    roster: &[StudentId],
    thresholds: &Thresholds,
    rules: &TierRules,
) -> Classification {
    let grouped = by_student(aggregates);
    let mut classification = Classification::default();

    for (student_id, student_aggregates) in &grouped {
        let tags: Vec<Tag> = student_aggregates
            .iter()
            .map(|a| tag_for(a.mean_pct, thresholds))
            .collect();
        let tier = tier_for(student_id, &tags, rules);
        // Students in `grouped` have at least one aggregate.
        let TierOutcome::Classified(student_tier) = tier.outcome else {
            continue;
        };

        for (aggregate, tag) in student_aggregates.iter().zip(tags) {
            classification.results.push(ClassificationResult {
                student_id: aggregate.student_id.clone(),
                course_id: aggregate.course_id.clone(),
                mean_pct: aggregate.mean_pct,
                tag,
                tier: student_tier,
            });
        }
        classification.tiers.push(tier);
    }

    for student_id in roster {
        if !grouped.contains_key(student_id) {
            classification.tiers.push(tier_for(student_id, &[], rules));
        }
    }
    classification.results.sort_by(|a, b| {
        (&a.student_id, &a.course_id).cmp(&(&b.student_id, &b.course_id))
    });
    classification
        .tiers
        .sort_by(|a, b| a.student_id.cmp(&b.student_id));
    classification.tiers.dedup_by(|a, b| a.student_id == b.student_id);

    tracing::debug!(
        results = classification.results.len(),
        students = classification.tiers.len(),
        "classified aggregates"
    );
    classification
}
