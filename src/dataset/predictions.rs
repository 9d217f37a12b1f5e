//! Candidate patch files.
//!
//! Accepts the formats SWE-bench prediction files come in:
//! - a JSON array of `{"instance_id", "model_patch"}` entries
//! - JSONL with one such entry per line
//! - a JSON object keyed by instance id, whose values are either the patch
//!   text or an entry object

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;

use crate::error::DatasetError;

#[derive(Debug, Deserialize)]
struct PredictionEntry {
    instance_id: String,
    #[serde(default)]
    model_patch: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KeyedPrediction {
    Patch(String),
    Entry {
        #[serde(default)]
        model_patch: Option<String>,
    },
}

/// Candidate patches keyed by instance id.
#[derive(Debug, Clone, Default)]
pub struct Predictions {
    patches: HashMap<String, String>,
}

impl Predictions {
    pub fn get(&self, instance_id: &str) -> Option<&str> {
        self.patches.get(instance_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn insert(&mut self, instance_id: impl Into<String>, patch: impl Into<String>) {
        self.patches.insert(instance_id.into(), patch.into());
    }

    /// Parse predictions from file contents.
    pub fn parse(content: &str) -> Result<Self, String> {
        let trimmed = content.trim_start();
        let mut predictions = Self::default();

        if trimmed.is_empty() {
            return Ok(predictions);
        }

        if trimmed.starts_with('[') {
            let entries: Vec<PredictionEntry> =
                serde_json::from_str(trimmed).map_err(|e| e.to_string())?;
            for entry in entries {
                predictions.insert(entry.instance_id, entry.model_patch.unwrap_or_default());
            }
            return Ok(predictions);
        }

        let jsonl: Result<Vec<PredictionEntry>, _> = trimmed
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<PredictionEntry>)
            .collect();
        if let Ok(entries) = jsonl {
            for entry in entries {
                predictions.insert(entry.instance_id, entry.model_patch.unwrap_or_default());
            }
            return Ok(predictions);
        }

        let keyed: BTreeMap<String, KeyedPrediction> =
            serde_json::from_str(trimmed).map_err(|e| e.to_string())?;
        for (instance_id, value) in keyed {
            let patch = match value {
                KeyedPrediction::Patch(p) => p,
                KeyedPrediction::Entry { model_patch } => model_patch.unwrap_or_default(),
            };
            predictions.insert(instance_id, patch);
        }
        Ok(predictions)
    }

    /// Load predictions from a file on disk.
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let content = std::fs::read_to_string(path)?;
        let predictions = Self::parse(&content).map_err(|reason| DatasetError::Predictions {
            path: path.display().to_string(),
            reason,
        })?;
        tracing::info!(
            path = %path.display(),
            count = predictions.len(),
            "Predictions loaded"
        );
        Ok(predictions)
    }
}
