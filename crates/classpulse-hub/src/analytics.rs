//! Aggregate statistics over activity records.
//!
//! Computes the compact summaries the grounding builder hands to the LLM:
//! per-student aggregates, class trends, comparison deltas, and rankings.

use std::collections::BTreeMap;

use serde::Serialize;

use classpulse_core::dataset::ActivityRecord;
use classpulse_core::session::RankingFilters;

/// Mean score for one week of activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekPoint {
    pub week_number: u32,
    pub avg_score: f64,
    pub sessions: usize,
}

/// Mean score for one concept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConceptStat {
    pub concept: String,
    pub avg_score: f64,
    pub sessions: usize,
}

/// Core analytics for a single student.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentStats {
    pub student: String,
    pub total_sessions: usize,
    pub average_score: f64,
    pub median_score: f64,
    pub best_score: f64,
    pub worst_score: f64,
    /// Weekly mean scores, oldest week first.
    pub trend_by_week: Vec<WeekPoint>,
    /// Concept means, weakest first.
    pub concept_breakdown: Vec<ConceptStat>,
}

/// Aggregates for a class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassTrends {
    pub class_id: String,
    pub total_sessions: usize,
    pub total_students: usize,
    pub average_score: f64,
    pub trend_by_week: Vec<WeekPoint>,
    pub concept_breakdown: Vec<ConceptStat>,
}

/// One ranking entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankEntry {
    pub student: String,
    pub average_score: f64,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn weekly_trend(records: &[&ActivityRecord]) -> Vec<WeekPoint> {
    let mut weeks: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
    for record in records {
        let entry = weeks.entry(record.week_number).or_insert((0.0, 0));
        entry.0 += record.score;
        entry.1 += 1;
    }
    weeks
        .into_iter()
        .map(|(week_number, (sum, count))| WeekPoint {
            week_number,
            avg_score: sum / count as f64,
            sessions: count,
        })
        .collect()
}

fn concept_breakdown(records: &[&ActivityRecord]) -> Vec<ConceptStat> {
    let mut concepts: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for record in records {
        let entry = concepts.entry(record.concept.clone()).or_insert((0.0, 0));
        entry.0 += record.score;
        entry.1 += 1;
    }
    let mut out: Vec<ConceptStat> = concepts
        .into_iter()
        .map(|(concept, (sum, count))| ConceptStat {
            concept,
            avg_score: sum / count as f64,
            sessions: count,
        })
        .collect();
    // Weakest first; the BTreeMap already orders ties alphabetically and
    // the stable sort keeps it that way.
    out.sort_by(|a, b| {
        a.avg_score
            .partial_cmp(&b.avg_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    out
}

/// Stats for one student over their records. `None` when there is no data,
/// which callers must report as "no data", not "not found".
pub fn student_stats(student: &str, records: &[ActivityRecord]) -> Option<StudentStats> {
    let needle = student.to_lowercase();
    let own: Vec<&ActivityRecord> = records
        .iter()
        .filter(|r| r.student.to_lowercase() == needle)
        .collect();
    if own.is_empty() {
        return None;
    }
    let scores: Vec<f64> = own.iter().map(|r| r.score).collect();
    Some(StudentStats {
        student: own[0].student.clone(),
        total_sessions: own.len(),
        average_score: mean(&scores),
        median_score: median(&scores),
        best_score: scores.iter().cloned().fold(f64::MIN, f64::max),
        worst_score: scores.iter().cloned().fold(f64::MAX, f64::min),
        trend_by_week: weekly_trend(&own),
        concept_breakdown: concept_breakdown(&own),
    })
}

/// Aggregates across all records of a class.
pub fn class_trends(class_id: &str, records: &[ActivityRecord]) -> Option<ClassTrends> {
    let needle = class_id.to_lowercase();
    let own: Vec<&ActivityRecord> = records
        .iter()
        .filter(|r| r.class_id.to_lowercase() == needle)
        .collect();
    if own.is_empty() {
        return None;
    }
    let scores: Vec<f64> = own.iter().map(|r| r.score).collect();
    let mut students: Vec<String> = own.iter().map(|r| r.student.to_lowercase()).collect();
    students.sort();
    students.dedup();
    Some(ClassTrends {
        class_id: own[0].class_id.clone(),
        total_sessions: own.len(),
        total_students: students.len(),
        average_score: mean(&scores),
        trend_by_week: weekly_trend(&own),
        concept_breakdown: concept_breakdown(&own),
    })
}

/// Delta between two students' mean scores, first-named minus second-named.
pub fn compare_delta(first: &StudentStats, second: &StudentStats) -> f64 {
    first.average_score - second.average_score
}

/// Filter records by the ranking filters (class, concept, recent weeks).
pub fn filter_records(records: &[ActivityRecord], filters: &RankingFilters) -> Vec<ActivityRecord> {
    let mut out: Vec<ActivityRecord> = records
        .iter()
        .filter(|r| {
            filters
                .class_id
                .as_ref()
                .is_none_or(|c| r.class_id.eq_ignore_ascii_case(c))
        })
        .filter(|r| {
            filters
                .concept
                .as_ref()
                .is_none_or(|c| r.concept.eq_ignore_ascii_case(c))
        })
        .cloned()
        .collect();
    if let Some(weeks) = filters.last_weeks {
        if weeks > 0 {
            if let Some(max_week) = out.iter().map(|r| r.week_number).max() {
                let cutoff = max_week.saturating_sub(weeks - 1);
                out.retain(|r| r.week_number >= cutoff);
            }
        }
    }
    out
}

/// Rank students by mean score over the filtered records. Descending by
/// default, ascending when the filters ask for the bottom; ties broken by
/// name ascending; truncated to the requested limit.
pub fn rank_students(records: &[ActivityRecord], filters: &RankingFilters) -> Vec<RankEntry> {
    let filtered = filter_records(records, filters);
    let mut per_student: BTreeMap<String, (String, f64, usize)> = BTreeMap::new();
    for record in &filtered {
        let entry = per_student
            .entry(record.student.to_lowercase())
            .or_insert((record.student.clone(), 0.0, 0));
        entry.1 += record.score;
        entry.2 += 1;
    }
    let mut entries: Vec<RankEntry> = per_student
        .into_values()
        .map(|(student, sum, count)| RankEntry {
            student,
            average_score: sum / count as f64,
        })
        .collect();
    entries.sort_by(|a, b| {
        let by_score = if filters.ascending {
            a.average_score.partial_cmp(&b.average_score)
        } else {
            b.average_score.partial_cmp(&a.average_score)
        }
        .unwrap_or(std::cmp::Ordering::Equal);
        by_score.then_with(|| a.student.cmp(&b.student))
    });
    entries.truncate(filters.limit);
    entries
}
