//! Dataset provider — read-only access to student activity records.
//!
//! The tabular data source (CSV export, warehouse, ...) is an external
//! collaborator; this module defines the contract plus an in-memory
//! implementation used by the server binary and tests.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One activity record from the tabular dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub student: String,
    pub class_id: String,
    /// Concept / category label for the activity ("loops", "debugging", ...).
    pub concept: String,
    pub score: f64,
    pub week_number: u32,
    pub timestamp: DateTime<Utc>,
}

/// Read-only tabular data provider. Never mutated by the assistant.
#[async_trait]
pub trait DatasetProvider: Send + Sync {
    /// Known student names, in dataset order, deduplicated.
    async fn list_students(&self) -> Result<Vec<String>>;

    /// Known class identifiers, in dataset order, deduplicated.
    async fn list_classes(&self) -> Result<Vec<String>>;

    /// Records for one student, in dataset order.
    async fn records_for(&self, student: &str) -> Result<Vec<ActivityRecord>>;

    /// Records for all students in a class, in dataset order.
    async fn records_for_class(&self, class_id: &str) -> Result<Vec<ActivityRecord>>;

    /// The full dataset, in order. Used for rankings and overall aggregates.
    async fn records_all(&self) -> Result<Vec<ActivityRecord>>;
}

/// In-memory dataset backed by a JSON array of records.
pub struct InMemoryDataset {
    records: Vec<ActivityRecord>,
}

impl InMemoryDataset {
    pub fn new(records: Vec<ActivityRecord>) -> Self {
        Self { records }
    }

    /// Load a JSON array of records from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let records: Vec<ActivityRecord> = serde_json::from_str(&content)?;
        Ok(Self::new(records))
    }

    fn unique_by<F>(&self, field: F) -> Vec<String>
    where
        F: Fn(&ActivityRecord) -> &str,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for record in &self.records {
            let value = field(record);
            if seen.insert(value.to_lowercase()) {
                out.push(value.to_string());
            }
        }
        out
    }
}

#[async_trait]
impl DatasetProvider for InMemoryDataset {
    async fn list_students(&self) -> Result<Vec<String>> {
        Ok(self.unique_by(|r| &r.student))
    }

    async fn list_classes(&self) -> Result<Vec<String>> {
        Ok(self.unique_by(|r| &r.class_id))
    }

    async fn records_for(&self, student: &str) -> Result<Vec<ActivityRecord>> {
        let needle = student.to_lowercase();
        Ok(self
            .records
            .iter()
            .filter(|r| r.student.to_lowercase() == needle)
            .cloned()
            .collect())
    }

    async fn records_for_class(&self, class_id: &str) -> Result<Vec<ActivityRecord>> {
        let needle = class_id.to_lowercase();
        Ok(self
            .records
            .iter()
            .filter(|r| r.class_id.to_lowercase() == needle)
            .cloned()
            .collect())
    }

    async fn records_all(&self) -> Result<Vec<ActivityRecord>> {
        Ok(self.records.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(student: &str, class_id: &str, score: f64) -> ActivityRecord {
        ActivityRecord {
            student: student.to_string(),
            class_id: class_id.to_string(),
            concept: "loops".to_string(),
            score,
            week_number: 1,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_rosters_are_deduplicated_in_order() {
        let dataset = InMemoryDataset::new(vec![
            record("Aisha", "4B", 80.0),
            record("Adam", "4B", 70.0),
            record("Aisha", "4B", 85.0),
            record("Zoe", "5A", 90.0),
        ]);
        assert_eq!(
            dataset.list_students().await.unwrap(),
            vec!["Aisha", "Adam", "Zoe"]
        );
        assert_eq!(dataset.list_classes().await.unwrap(), vec!["4B", "5A"]);
    }

    #[tokio::test]
    async fn test_records_for_is_case_insensitive() {
        let dataset = InMemoryDataset::new(vec![record("Aisha", "4B", 80.0)]);
        assert_eq!(dataset.records_for("aisha").await.unwrap().len(), 1);
        assert!(dataset.records_for("nobody").await.unwrap().is_empty());
    }
}
