//! Record Store: read-only access to SWE-bench records.
//!
//! Records come from a columnar dataset file downloaded once from the hub.
//! [`DatasetQuery`] narrows and orders a loaded subset before evaluation.

pub mod predictions;
pub mod reader;
pub mod record;

pub use predictions::Predictions;
pub use reader::{load, RecordIter, RecordStore};
pub use record::{BenchmarkRecord, EvaluationLabels, Subset};

use std::collections::{BTreeSet, HashSet};

use crate::error::DatasetError;

/// Selection applied to loaded records.
#[derive(Debug, Clone, Default)]
pub struct DatasetQuery {
    /// Keep only records of this repository.
    pub repo: Option<String>,
    /// Keep only these instance ids (empty keeps all).
    pub instance_ids: Vec<String>,
    /// Order by `created_at`, oldest first.
    pub sort_by_created: bool,
    /// Keep at most this many records after filtering and ordering.
    pub limit: Option<usize>,
}

impl DatasetQuery {
    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    pub fn with_instances(mut self, ids: Vec<String>) -> Self {
        self.instance_ids = ids;
        self
    }

    pub fn sorted_by_created(mut self) -> Self {
        self.sort_by_created = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Apply the query. An unknown repository is an error listing the
    /// repositories the dataset does contain.
    pub fn apply(
        &self,
        mut records: Vec<BenchmarkRecord>,
    ) -> Result<Vec<BenchmarkRecord>, DatasetError> {
        if let Some(repo) = &self.repo {
            let available: BTreeSet<&str> = records.iter().map(|r| r.repo.as_str()).collect();
            if !available.contains(repo.as_str()) {
                return Err(DatasetError::UnknownRepository {
                    repo: repo.clone(),
                    available: available.into_iter().collect::<Vec<_>>().join(", "),
                });
            }
            records.retain(|r| &r.repo == repo);
        }

        if !self.instance_ids.is_empty() {
            let wanted: HashSet<&str> = self.instance_ids.iter().map(String::as_str).collect();
            records.retain(|r| wanted.contains(r.instance_id.as_str()));
        }

        if self.sort_by_created {
            // Stable: undated records keep file order after the dated ones.
            records.sort_by(|a, b| match (&a.created_at, &b.created_at) {
                (Some(x), Some(y)) => x.cmp(y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            });
        }

        if let Some(limit) = self.limit {
            records.truncate(limit);
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(id: &str, repo: &str, day: Option<u32>) -> BenchmarkRecord {
        let mut r = BenchmarkRecord::new(id, repo, "abc", "");
        r.created_at = day.map(|d| Utc.with_ymd_and_hms(2023, 1, d, 0, 0, 0).unwrap());
        r
    }

    #[test]
    fn test_repo_filter() {
        let records = vec![record("a", "o/x", None), record("b", "o/y", None)];
        let out = DatasetQuery::default()
            .with_repo("o/y")
            .apply(records)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].instance_id, "b");
    }

    #[test]
    fn test_unknown_repo_lists_available() {
        let records = vec![record("a", "o/x", None), record("b", "o/y", None)];
        let err = DatasetQuery::default()
            .with_repo("o/z")
            .apply(records)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("o/z"));
        assert!(msg.contains("o/x, o/y"));
    }

    #[test]
    fn test_sort_by_created_oldest_first() {
        let records = vec![
            record("late", "o/x", Some(20)),
            record("undated", "o/x", None),
            record("early", "o/x", Some(2)),
        ];
        let out = DatasetQuery::default()
            .sorted_by_created()
            .apply(records)
            .unwrap();
        let ids: Vec<&str> = out.iter().map(|r| r.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late", "undated"]);
    }

    #[test]
    fn test_instances_and_limit() {
        let records = vec![
            record("a", "o/x", None),
            record("b", "o/x", None),
            record("c", "o/x", None),
        ];
        let out = DatasetQuery::default()
            .with_instances(vec!["c".to_string(), "a".to_string()])
            .with_limit(1)
            .apply(records)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].instance_id, "a");
    }
}
