use std::collections::BTreeMap;
use std::fmt::Write;

use crate::improvement::most_improved;
use crate::models::{Tag, Tier, TierOutcome, TrendDirection};
use crate::pipeline::{AnalysisReport, IssueScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TierLabel {
    High,
    Medium,
    Low,
    NoData,
}

impl TierLabel {
    fn from_outcome(outcome: TierOutcome) -> Self {
        match outcome {
            TierOutcome::Classified(Tier::High) => TierLabel::High,
            TierOutcome::Classified(Tier::Medium) => TierLabel::Medium,
            TierOutcome::Classified(Tier::Low) => TierLabel::Low,
            TierOutcome::NoData => TierLabel::NoData,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TierLabel::High => "High",
            TierLabel::Medium => "Medium",
            TierLabel::Low => "Low",
            TierLabel::NoData => "No data",
        }
    }
}

pub fn summarize_tiers(report: &AnalysisReport) -> BTreeMap<TierLabel, usize> {
    let mut counts = BTreeMap::new();
    for tier in &report.tiers {
        *counts.entry(TierLabel::from_outcome(tier.outcome)).or_insert(0) += 1;
    }
    counts
}

pub fn build_report(report: &AnalysisReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Academic Insights Report");
    let _ = writeln!(
        output,
        "Snapshot {} taken {} ({} records, {} rejected)",
        report.snapshot_id,
        report.taken_at.format("%Y-%m-%d %H:%M UTC"),
        report.record_count,
        report.rejected.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Tier Mix");

    let tiers = summarize_tiers(report);
    if tiers.is_empty() {
        let _ = writeln!(output, "No students in this snapshot.");
    } else {
        for (label, count) in &tiers {
            let _ = writeln!(output, "- {}: {} students", label.as_str(), count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Weak Results");

    let mut weak: Vec<_> = report
        .classifications
        .iter()
        .filter(|c| c.tag == Tag::Weak)
        .collect();
    weak.sort_by(|a, b| a.mean_pct.total_cmp(&b.mean_pct));
    if weak.is_empty() {
        let _ = writeln!(output, "No weak course results.");
    } else {
        for result in weak.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} in {}: mean {:.1}%",
                result.student_id, result.course_id, result.mean_pct
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Declining Trends");

    let declining: Vec<_> = report
        .trends
        .iter()
        .filter(|t| t.direction == TrendDirection::Declining)
        .filter_map(|t| t.fit.as_ref().map(|fit| (t, fit)))
        .collect();
    if declining.is_empty() {
        let _ = writeln!(output, "No declining trends.");
    } else {
        for (trend, fit) in declining {
            let _ = writeln!(
                output,
                "- {} in {}: slope {:.2}, next predicted {:.1}% (R² {:.2}{})",
                trend.student_id,
                trend.course_id,
                fit.slope,
                fit.predicted_next_pct,
                fit.fit_quality,
                if fit.low_confidence { ", low confidence" } else { "" }
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Most Improved");

    let improved = most_improved(&report.improvements, 5);
    if improved.is_empty() {
        let _ = writeln!(output, "No students with repeat attempts.");
    } else {
        for summary in improved {
            let _ = writeln!(
                output,
                "- {}: average {:+.1} points across {} courses",
                summary.student_id,
                summary.average_improvement,
                summary.courses.len()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recommendations");

    if report.recommendations.is_empty() {
        let _ = writeln!(output, "No recommendations.");
    } else {
        for rec in &report.recommendations {
            let _ = writeln!(
                output,
                "- {} -> {} ({:?} priority): {}",
                rec.student_id, rec.course_id, rec.priority, rec.rationale
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Mentor Pairings");

    if report.mentor_pairings.is_empty() {
        let _ = writeln!(output, "No mentor pairings.");
    } else {
        for pairing in &report.mentor_pairings {
            let _ = writeln!(
                output,
                "- {} mentored by {} in {} (compatibility {:.2})",
                pairing.weak_student_id,
                pairing.mentor_id,
                pairing.course_id,
                pairing.compatibility_score
            );
        }
    }
    if !report.unmatched_mentees.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "Waitlisted (no strong student available):");
        for mentee in &report.unmatched_mentees {
            let _ = writeln!(output, "- {} in {}", mentee.student_id, mentee.course_id);
        }
    }

    if !report.rejected.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Rejected Rows");
        for rejected in &report.rejected {
            let _ = writeln!(output, "- row {}: {}", rejected.row, rejected.error);
        }
    }

    if !report.issues.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Issues");
        for issue in &report.issues {
            let scope = match &issue.scope {
                IssueScope::Component { name } => name.clone(),
                IssueScope::Student { student_id } => format!("student {student_id}"),
                IssueScope::Pair {
                    student_a,
                    student_b,
                } => format!("pair {student_a}/{student_b}"),
            };
            let _ = writeln!(output, "- {}: {}", scope, issue.message);
        }
    }

    output
}
