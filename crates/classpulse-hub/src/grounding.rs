//! Grounding builder — compact, scope-shaped data context for the LLM.
//!
//! Every grounded reply is backed by a freshly built text block: aggregates
//! first, then a bounded tail of raw records. The block is rebuilt from the
//! dataset on every turn; nothing from previous grounding blocks is reused.

use std::fmt::Write as _;

use tracing::debug;

use classpulse_core::dataset::{ActivityRecord, DatasetProvider};
use classpulse_core::error::Result;
use classpulse_core::session::{RankingFilters, Scope};

use crate::analytics::{self, StudentStats};

/// Raw record rows included per scope kind. Aggregates always fit; these
/// bound only the record tail.
const STUDENT_ROW_CAP: usize = 40;
/// Weekly trend entries shown in grounding text.
const TREND_WEEKS: usize = 4;
const CLASS_ROW_CAP: usize = 50;
const COMPARE_ROW_CAP: usize = 60;
const MULTI_ROW_CAP: usize = 80;
const RANKING_ROW_CAP: usize = 80;

/// The labeled context block handed to the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundingBlock {
    /// Short label for the prompt tag ("STUDENT", "COMPARISON", ...).
    pub label: String,
    pub text: String,
}

/// Static product knowledge used for general questions instead of dataset
/// grounding. Covers the assistant's own features and vocabulary.
const KNOWLEDGE_BASE: &str = "\
ClassPulse Instructor Assistant - product knowledge

- The assistant answers questions about student activity data: per-student \
progress, class trends, comparisons between students, and rankings.
- Scores are on a 0-100 scale; each record is one completed activity session \
with a concept label and a week number.
- The Delta column in a comparison is the first-named student's average \
minus the second-named student's average. A positive delta means the \
first-named student is ahead.
- Rankings order students by their average score over the selected records; \
\"bottom\" or \"lowest\" rankings sort ascending.
- \"Last N weeks\" filters keep only the N most recent week numbers present \
in the data.
- Conversations remember their subject: after asking about a student, class, \
or comparison, follow-up questions without names stay on the same subject.
- If the assistant is not helping, ask for support; repeated dissatisfaction \
automatically opens a ticket with the support team.";

fn fmt_score(score: f64) -> String {
    format!("{:.1}", score)
}

fn push_records(out: &mut String, records: &[ActivityRecord], cap: usize) {
    let start = records.len().saturating_sub(cap);
    let tail = &records[start..];
    let _ = writeln!(
        out,
        "\nRecent records ({} of {} shown):",
        tail.len(),
        records.len()
    );
    for r in tail {
        let _ = writeln!(
            out,
            "- week {} | {} | {} | {} | {}",
            r.week_number,
            r.student,
            r.class_id,
            r.concept,
            fmt_score(r.score)
        );
    }
}

fn push_student_stats(out: &mut String, stats: &StudentStats) {
    let _ = writeln!(out, "Student: {}", stats.student);
    let _ = writeln!(
        out,
        "Sessions: {} | Average: {} | Median: {} | Best: {} | Worst: {}",
        stats.total_sessions,
        fmt_score(stats.average_score),
        fmt_score(stats.median_score),
        fmt_score(stats.best_score),
        fmt_score(stats.worst_score)
    );
    let _ = writeln!(out, "Weekly trend (recent weeks):");
    let start = stats.trend_by_week.len().saturating_sub(TREND_WEEKS);
    for point in &stats.trend_by_week[start..] {
        let _ = writeln!(
            out,
            "- week {}: avg {} over {} sessions",
            point.week_number,
            fmt_score(point.avg_score),
            point.sessions
        );
    }
    let _ = writeln!(out, "Concepts (weakest first):");
    for concept in &stats.concept_breakdown {
        let _ = writeln!(
            out,
            "- {}: avg {} over {} sessions",
            concept.concept,
            fmt_score(concept.avg_score),
            concept.sessions
        );
    }
}

async fn student_block(dataset: &dyn DatasetProvider, name: &str) -> Result<GroundingBlock> {
    let records = dataset.records_for(name).await?;
    let mut text = String::new();
    match analytics::student_stats(name, &records) {
        Some(stats) => {
            push_student_stats(&mut text, &stats);
            push_records(&mut text, &records, STUDENT_ROW_CAP);
        }
        None => {
            let _ = writeln!(text, "No activity data recorded for {}.", name);
        }
    }
    Ok(GroundingBlock {
        label: "STUDENT".to_string(),
        text,
    })
}

async fn class_block(dataset: &dyn DatasetProvider, class_id: &str) -> Result<GroundingBlock> {
    let records = dataset.records_for_class(class_id).await?;
    let mut text = String::new();
    match analytics::class_trends(class_id, &records) {
        Some(trends) => {
            let _ = writeln!(text, "Class: {}", trends.class_id);
            let _ = writeln!(
                text,
                "Students: {} | Sessions: {} | Average: {}",
                trends.total_students,
                trends.total_sessions,
                fmt_score(trends.average_score)
            );
            let _ = writeln!(text, "Weekly trend (recent weeks):");
            let start = trends.trend_by_week.len().saturating_sub(TREND_WEEKS);
            for point in &trends.trend_by_week[start..] {
                let _ = writeln!(
                    text,
                    "- week {}: avg {} over {} sessions",
                    point.week_number,
                    fmt_score(point.avg_score),
                    point.sessions
                );
            }
            let _ = writeln!(text, "Concepts (weakest first):");
            for concept in &trends.concept_breakdown {
                let _ = writeln!(
                    text,
                    "- {}: avg {} over {} sessions",
                    concept.concept,
                    fmt_score(concept.avg_score),
                    concept.sessions
                );
            }
            push_records(&mut text, &records, CLASS_ROW_CAP);
        }
        None => {
            let _ = writeln!(text, "No activity data recorded for class {}.", class_id);
        }
    }
    Ok(GroundingBlock {
        label: "CLASS".to_string(),
        text,
    })
}

async fn compare_block(
    dataset: &dyn DatasetProvider,
    first: &str,
    second: &str,
) -> Result<GroundingBlock> {
    let mut text = String::new();
    let first_records = dataset.records_for(first).await?;
    let second_records = dataset.records_for(second).await?;
    let first_stats = analytics::student_stats(first, &first_records);
    let second_stats = analytics::student_stats(second, &second_records);

    for (name, stats) in [(first, &first_stats), (second, &second_stats)] {
        match stats {
            Some(stats) => push_student_stats(&mut text, stats),
            None => {
                let _ = writeln!(text, "No activity data recorded for {}.", name);
            }
        }
        text.push('\n');
    }
    if let (Some(a), Some(b)) = (&first_stats, &second_stats) {
        let delta = analytics::compare_delta(a, b);
        let _ = writeln!(
            text,
            "Delta ({} minus {}): {:+.1}",
            a.student, b.student, delta
        );
    }

    let mut combined = first_records;
    combined.extend(second_records);
    push_records(&mut text, &combined, COMPARE_ROW_CAP);
    Ok(GroundingBlock {
        label: "COMPARISON".to_string(),
        text,
    })
}

async fn multi_block(dataset: &dyn DatasetProvider, names: &[String]) -> Result<GroundingBlock> {
    let mut text = String::new();
    let mut combined: Vec<ActivityRecord> = Vec::new();
    for name in names {
        let records = dataset.records_for(name).await?;
        match analytics::student_stats(name, &records) {
            Some(stats) => {
                let _ = writeln!(
                    text,
                    "{}: {} sessions, avg {}, best {}, worst {}",
                    stats.student,
                    stats.total_sessions,
                    fmt_score(stats.average_score),
                    fmt_score(stats.best_score),
                    fmt_score(stats.worst_score)
                );
            }
            None => {
                let _ = writeln!(text, "{}: no activity data recorded", name);
            }
        }
        combined.extend(records);
    }
    push_records(&mut text, &combined, MULTI_ROW_CAP);
    Ok(GroundingBlock {
        label: "MULTI-STUDENT".to_string(),
        text,
    })
}

async fn ranking_block(
    dataset: &dyn DatasetProvider,
    filters: &RankingFilters,
) -> Result<GroundingBlock> {
    let records = dataset.records_all().await?;
    let ranked = analytics::rank_students(&records, filters);
    let mut text = String::new();
    let direction = if filters.ascending {
        "lowest first"
    } else {
        "highest first"
    };
    let _ = writeln!(text, "Ranking by average score ({}):", direction);
    if let Some(class_id) = &filters.class_id {
        let _ = writeln!(text, "Filtered to class {}", class_id);
    }
    if let Some(concept) = &filters.concept {
        let _ = writeln!(text, "Filtered to concept {}", concept);
    }
    if let Some(weeks) = filters.last_weeks {
        let _ = writeln!(text, "Window: last {} weeks", weeks);
    }
    if ranked.is_empty() {
        let _ = writeln!(text, "No matching activity data.");
    }
    for (i, entry) in ranked.iter().enumerate() {
        let _ = writeln!(
            text,
            "{}. {} - avg {}",
            i + 1,
            entry.student,
            fmt_score(entry.average_score)
        );
    }
    let filtered = analytics::filter_records(&records, filters);
    push_records(&mut text, &filtered, RANKING_ROW_CAP);
    Ok(GroundingBlock {
        label: "RANKING".to_string(),
        text,
    })
}

async fn general_block(dataset: &dyn DatasetProvider) -> Result<GroundingBlock> {
    let students = dataset.list_students().await?;
    let classes = dataset.list_classes().await?;
    let records = dataset.records_all().await?;
    let mut text = String::from(KNOWLEDGE_BASE);
    text.push_str("\n\nDataset overview:\n");
    let _ = writeln!(
        text,
        "- {} students across {} classes, {} recorded sessions",
        students.len(),
        classes.len(),
        records.len()
    );
    if !records.is_empty() {
        let avg = records.iter().map(|r| r.score).sum::<f64>() / records.len() as f64;
        let _ = writeln!(text, "- overall average score: {}", fmt_score(avg));
    }
    Ok(GroundingBlock {
        label: "GENERAL".to_string(),
        text,
    })
}

/// Build the grounding block for a scope. The general scope gets the static
/// product knowledge plus a dataset overview, never raw record rows.
pub async fn build(dataset: &dyn DatasetProvider, scope: &Scope) -> Result<GroundingBlock> {
    let block = match scope {
        Scope::General => general_block(dataset).await?,
        Scope::Student { name } => student_block(dataset, name).await?,
        Scope::Class { id } => class_block(dataset, id).await?,
        Scope::Compare { first, second } => compare_block(dataset, first, second).await?,
        Scope::Multi { names } => multi_block(dataset, names).await?,
        Scope::Ranking { filters } => ranking_block(dataset, filters).await?,
    };
    debug!(label = %block.label, bytes = block.text.len(), "grounding block built");
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use classpulse_core::dataset::InMemoryDataset;

    fn record(student: &str, class_id: &str, concept: &str, score: f64, week: u32) -> ActivityRecord {
        ActivityRecord {
            student: student.to_string(),
            class_id: class_id.to_string(),
            concept: concept.to_string(),
            score,
            week_number: week,
            timestamp: Utc::now(),
        }
    }

    fn dataset() -> InMemoryDataset {
        InMemoryDataset::new(vec![
            record("Aisha", "4B", "loops", 80.0, 1),
            record("Aisha", "4B", "debugging", 60.0, 2),
            record("Adam", "4B", "loops", 70.0, 1),
            record("Zoe", "5A", "loops", 90.0, 2),
        ])
    }

    #[tokio::test]
    async fn test_general_scope_has_overview_but_no_rows() {
        let block = build(&dataset(), &Scope::General).await.unwrap();
        assert_eq!(block.label, "GENERAL");
        assert!(block.text.contains("Delta column"));
        assert!(block.text.contains("3 students across 2 classes, 4 recorded sessions"));
        // No raw record rows leak into the general block.
        assert!(!block.text.contains("week 1"));
    }

    #[tokio::test]
    async fn test_student_block_has_aggregates_and_tail() {
        let scope = Scope::Student {
            name: "Aisha".into(),
        };
        let block = build(&dataset(), &scope).await.unwrap();
        assert_eq!(block.label, "STUDENT");
        assert!(block.text.contains("Student: Aisha"));
        assert!(block.text.contains("Sessions: 2"));
        assert!(block.text.contains("Recent records (2 of 2 shown):"));
    }

    #[tokio::test]
    async fn test_student_block_without_data_says_so() {
        let scope = Scope::Student {
            name: "Nobody".into(),
        };
        let block = build(&dataset(), &scope).await.unwrap();
        assert!(block.text.contains("No activity data recorded for Nobody"));
    }

    #[tokio::test]
    async fn test_compare_block_delta_is_first_minus_second() {
        let scope = Scope::Compare {
            first: "Aisha".into(),
            second: "Adam".into(),
        };
        let block = build(&dataset(), &scope).await.unwrap();
        assert_eq!(block.label, "COMPARISON");
        // Aisha avg 70.0, Adam avg 70.0 -> delta +0.0; check the line shape.
        assert!(block.text.contains("Delta (Aisha minus Adam):"));
    }

    #[tokio::test]
    async fn test_record_tail_is_capped() {
        let records: Vec<ActivityRecord> = (0..100)
            .map(|i| record("Aisha", "4B", "loops", 50.0, i))
            .collect();
        let dataset = InMemoryDataset::new(records);
        let scope = Scope::Student {
            name: "Aisha".into(),
        };
        let block = build(&dataset, &scope).await.unwrap();
        assert!(block.text.contains("Recent records (40 of 100 shown):"));
        // The tail keeps the newest rows.
        assert!(block.text.contains("week 99"));
        assert!(!block.text.contains("week 59 |"));
    }

    #[tokio::test]
    async fn test_ranking_block_orders_and_labels() {
        let scope = Scope::Ranking {
            filters: RankingFilters::default(),
        };
        let block = build(&dataset(), &scope).await.unwrap();
        assert_eq!(block.label, "RANKING");
        assert!(block.text.contains("1. Zoe"));
        assert!(block.text.contains("highest first"));
    }
}
