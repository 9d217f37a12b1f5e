//! Parquet reader for SWE-bench datasets.
//!
//! Reads the princeton-nlp/SWE-bench column layout. Test-id list columns are
//! accepted either as JSON-encoded strings (the hub encoding) or as Arrow
//! `List<Utf8>` columns.

use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::array::{Array, GenericStringArray, ListArray, OffsetSizeTrait, StringArray};
use arrow::array::LargeStringArray;
use arrow::datatypes::{DataType, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDateTime, Utc};
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};

use super::record::{BenchmarkRecord, EvaluationLabels, Subset};
use crate::error::DatasetError;

/// Columns every subset must provide.
pub const REQUIRED_COLUMNS: [&str; 4] = ["instance_id", "repo", "base_commit", "patch"];

/// Columns the evaluation subset must additionally provide.
pub const EVALUATION_COLUMNS: [&str; 3] = ["test_patch", "FAIL_TO_PASS", "PASS_TO_PASS"];

/// Optional list of tests the fix is expected to leave failing.
pub const PASS_TO_FAIL_COLUMN: &str = "PASS_TO_FAIL";

const DEFAULT_BATCH_SIZE: usize = 256;

/// Read-only handle on a dataset file.
///
/// Holds no cached rows: every call to [`RecordStore::iterate`] re-opens the
/// file and yields records in file order.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
    batch_size: usize,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lazily iterate the records of `subset`.
    ///
    /// Fails up front with `MissingColumn` when the file lacks a column the
    /// subset requires.
    pub fn iterate(&self, subset: Subset) -> Result<RecordIter, DatasetError> {
        let display = self.path.display().to_string();
        let file = File::open(&self.path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        check_columns(builder.schema(), subset, &display)?;
        let reader = builder.with_batch_size(self.batch_size).build()?;

        Ok(RecordIter {
            path: display,
            subset,
            reader,
            buffered: Vec::new().into_iter(),
            seen: HashSet::new(),
            rows_read: 0,
            done: false,
        })
    }

    /// Read every record of `subset` into memory.
    pub fn load(&self, subset: Subset) -> Result<Vec<BenchmarkRecord>, DatasetError> {
        let records = self.iterate(subset)?.collect::<Result<Vec<_>, _>>()?;
        tracing::info!(
            path = %self.path.display(),
            subset = %subset,
            rows = records.len(),
            "Dataset loaded"
        );
        Ok(records)
    }
}

/// Convenience wrapper for `RecordStore::new(path).load(subset)`.
pub fn load(path: &Path, subset: Subset) -> Result<Vec<BenchmarkRecord>, DatasetError> {
    RecordStore::new(path).load(subset)
}

fn check_columns(schema: &Schema, subset: Subset, path: &str) -> Result<(), DatasetError> {
    let evaluation: &[&str] = if subset.requires_labels() {
        &EVALUATION_COLUMNS
    } else {
        &[]
    };
    for column in REQUIRED_COLUMNS.iter().chain(evaluation.iter()) {
        if schema.field_with_name(column).is_err() {
            return Err(DatasetError::MissingColumn {
                path: path.to_string(),
                column: column.to_string(),
                subset: subset.to_string(),
            });
        }
    }
    Ok(())
}

/// Lazy, finite record sequence over one pass of a dataset file.
///
/// The first error ends the sequence.
pub struct RecordIter {
    path: String,
    subset: Subset,
    reader: ParquetRecordBatchReader,
    buffered: std::vec::IntoIter<BenchmarkRecord>,
    seen: HashSet<String>,
    rows_read: usize,
    done: bool,
}

impl Iterator for RecordIter {
    type Item = Result<BenchmarkRecord, DatasetError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(record) = self.buffered.next() {
                return Some(Ok(record));
            }
            match self.reader.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
                Some(Ok(batch)) => match self.decode(&batch) {
                    Ok(records) => {
                        self.rows_read += batch.num_rows();
                        self.buffered = records.into_iter();
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                },
            }
        }
    }
}

impl RecordIter {
    fn format_error(&self, reason: String) -> DatasetError {
        DatasetError::Format {
            path: self.path.clone(),
            reason,
        }
    }

    fn decode(&mut self, batch: &RecordBatch) -> Result<Vec<BenchmarkRecord>, DatasetError> {
        let num_rows = batch.num_rows();

        let mut instance_ids = self.required_strings(batch, "instance_id")?;
        let mut repos = self.required_strings(batch, "repo")?;
        let mut base_commits = self.required_strings(batch, "base_commit")?;
        let mut patches = self.required_strings(batch, "patch")?;
        let mut hints = self.optional_strings(batch, "hints_text");
        let mut statements = self.optional_strings(batch, "problem_statement");
        let mut versions = self.optional_strings(batch, "version");
        let created = self.optional_strings(batch, "created_at");

        let mut labels = if self.subset.requires_labels() {
            let test_patches = self.required_strings(batch, "test_patch")?;
            let f2p = self.required_test_ids(batch, "FAIL_TO_PASS")?;
            let p2p = self.required_test_ids(batch, "PASS_TO_PASS")?;
            let p2f = self
                .test_ids(batch, PASS_TO_FAIL_COLUMN)?
                .unwrap_or_else(|| vec![Some(Vec::new()); num_rows]);
            Some((test_patches, f2p, p2p, p2f))
        } else {
            None
        };

        let mut records = Vec::with_capacity(num_rows);
        for i in 0..num_rows {
            let row = self.rows_read + i;
            let instance_id = self.cell(&mut instance_ids, i, "instance_id", row)?;
            let repo = self.cell(&mut repos, i, "repo", row)?;
            let base_commit = self.cell(&mut base_commits, i, "base_commit", row)?;
            let patch = self.cell(&mut patches, i, "patch", row)?;

            if !self.seen.insert(instance_id.clone()) {
                return Err(self.format_error(format!(
                    "duplicate instance_id '{instance_id}' at row {row}"
                )));
            }

            let mut record = BenchmarkRecord::new(instance_id, repo, base_commit, patch);
            record.first_hints = hints[i].take().filter(|h| !h.is_empty());
            record.problem_statement = statements[i].take();
            record.version = versions[i].take();
            record.created_at = created[i].as_deref().and_then(parse_timestamp);

            if let Some((test_patches, f2p, p2p, p2f)) = labels.as_mut() {
                let test_patch = self.cell(test_patches, i, "test_patch", row)?;
                let fail_to_pass = self.cell(f2p, i, "FAIL_TO_PASS", row)?;
                let pass_to_pass = self.cell(p2p, i, "PASS_TO_PASS", row)?;
                let pass_to_fail = p2f[i].take().unwrap_or_default();

                let passed_tests: BTreeSet<String> =
                    fail_to_pass.into_iter().chain(pass_to_pass).collect();
                record.labels = Some(EvaluationLabels {
                    test_patch,
                    passed_tests,
                    failed_tests: pass_to_fail.into_iter().collect(),
                });
            }

            records.push(record);
        }
        Ok(records)
    }

    fn cell<T>(
        &self,
        column: &mut [Option<T>],
        i: usize,
        name: &str,
        row: usize,
    ) -> Result<T, DatasetError> {
        column[i]
            .take()
            .ok_or_else(|| self.format_error(format!("null value in column '{name}' at row {row}")))
    }

    fn required_strings(
        &self,
        batch: &RecordBatch,
        name: &str,
    ) -> Result<Vec<Option<String>>, DatasetError> {
        let column = batch
            .column_by_name(name)
            .ok_or_else(|| self.format_error(format!("column '{name}' missing from batch")))?;
        let any = column.as_any();
        if let Some(arr) = any.downcast_ref::<StringArray>() {
            return Ok(collect_strings(arr));
        }
        if let Some(arr) = any.downcast_ref::<LargeStringArray>() {
            return Ok(collect_strings(arr));
        }
        Err(self.format_error(format!(
            "column '{name}' has type {}, expected a string column",
            column.data_type()
        )))
    }

    fn optional_strings(&self, batch: &RecordBatch, name: &str) -> Vec<Option<String>> {
        match batch.column_by_name(name) {
            None => vec![None; batch.num_rows()],
            Some(_) => self.required_strings(batch, name).unwrap_or_else(|e| {
                tracing::debug!(column = name, error = %e, "Ignoring unreadable optional column");
                vec![None; batch.num_rows()]
            }),
        }
    }

    fn required_test_ids(
        &self,
        batch: &RecordBatch,
        name: &str,
    ) -> Result<Vec<Option<Vec<String>>>, DatasetError> {
        self.test_ids(batch, name)?
            .ok_or_else(|| self.format_error(format!("column '{name}' missing from batch")))
    }

    fn test_ids(
        &self,
        batch: &RecordBatch,
        name: &str,
    ) -> Result<Option<Vec<Option<Vec<String>>>>, DatasetError> {
        let Some(column) = batch.column_by_name(name) else {
            return Ok(None);
        };
        match column.data_type() {
            DataType::Utf8 | DataType::LargeUtf8 => {
                let strings = self.required_strings(batch, name)?;
                let mut out = Vec::with_capacity(strings.len());
                for (i, value) in strings.into_iter().enumerate() {
                    let parsed = match value {
                        None => None,
                        Some(raw) => Some(parse_id_list(&raw).map_err(|e| {
                            self.format_error(format!(
                                "column '{name}' at row {} is not a JSON string array: {e}",
                                self.rows_read + i
                            ))
                        })?),
                    };
                    out.push(parsed);
                }
                Ok(Some(out))
            }
            DataType::List(_) => {
                let list = column
                    .as_any()
                    .downcast_ref::<ListArray>()
                    .ok_or_else(|| self.format_error(format!("column '{name}' is not a list")))?;
                let mut out = Vec::with_capacity(list.len());
                for i in 0..list.len() {
                    if list.is_null(i) {
                        out.push(None);
                        continue;
                    }
                    let values = list.value(i);
                    let strings = values
                        .as_any()
                        .downcast_ref::<StringArray>()
                        .ok_or_else(|| {
                            self.format_error(format!(
                                "column '{name}' has list items of type {}, expected strings",
                                values.data_type()
                            ))
                        })?;
                    out.push(Some(strings.iter().flatten().map(str::to_string).collect()));
                }
                Ok(Some(out))
            }
            other => Err(self.format_error(format!(
                "column '{name}' has type {other}, expected a JSON string or list of strings"
            ))),
        }
    }
}

fn collect_strings<O: OffsetSizeTrait>(arr: &GenericStringArray<O>) -> Vec<Option<String>> {
    arr.iter().map(|v| v.map(str::to_string)).collect()
}

fn parse_id_list(raw: &str) -> Result<Vec<String>, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
