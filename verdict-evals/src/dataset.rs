// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Flat-file datasets for evaluation campaigns
//!
//! Everything persists as CSV or JSON: query batches in, trace batches out,
//! labeled calibration sets, and the final report. Labels are stored as
//! PASS/FAIL strings in CSV (matching how labelers write them) and as 0/1
//! vectors in the calibration-pairs JSON.

use crate::harness::{BulkOutcome, EvaluationReport};
use crate::{LabeledTrace, Trace};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// One row of a query batch awaiting agent responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: String,
    pub query: String,
    pub criterion: String,
}

/// Calibration pairs in the shape downstream statistics tooling expects:
/// parallel 0/1 vectors of ground truth and judge predictions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationPairs {
    pub test_labels: Vec<u8>,
    pub test_preds: Vec<u8>,
    #[serde(default)]
    pub description: String,
}

impl CalibrationPairs {
    pub fn from_pairs(pairs: &[(bool, bool)]) -> Self {
        Self {
            test_labels: pairs.iter().map(|&(t, _)| t as u8).collect(),
            test_preds: pairs.iter().map(|&(_, p)| p as u8).collect(),
            description: "Test set labels and judge predictions for corrected estimation"
                .to_string(),
        }
    }

    pub fn pairs(&self) -> Result<Vec<(bool, bool)>, DatasetError> {
        if self.test_labels.len() != self.test_preds.len() {
            return Err(DatasetError::MismatchedPairs {
                labels: self.test_labels.len(),
                preds: self.test_preds.len(),
            });
        }
        Ok(self
            .test_labels
            .iter()
            .zip(&self.test_preds)
            .map(|(&t, &p)| (t != 0, p != 0))
            .collect())
    }
}

/// Errors loading or persisting datasets
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid label {0:?}; expected PASS or FAIL")]
    InvalidLabel(String),

    #[error("file {0} contains no rows")]
    Empty(String),

    #[error("calibration file has {labels} labels but {preds} predictions")]
    MismatchedPairs { labels: usize, preds: usize },
}

#[derive(Debug, Deserialize)]
struct LabeledRow {
    id: String,
    query: String,
    criterion: String,
    response: String,
    label: String,
}

fn parse_label(label: &str) -> Result<bool, DatasetError> {
    match label.trim().to_uppercase().as_str() {
        "PASS" => Ok(true),
        "FAIL" => Ok(false),
        other => Err(DatasetError::InvalidLabel(other.to_string())),
    }
}

/// Load a query batch (`id, query, criterion` columns).
pub fn load_queries(path: &Path) -> Result<Vec<QueryRecord>, DatasetError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut queries = Vec::new();
    for row in reader.deserialize() {
        queries.push(row?);
    }
    if queries.is_empty() {
        return Err(DatasetError::Empty(path.display().to_string()));
    }
    info!(n = queries.len(), path = %path.display(), "loaded query batch");
    Ok(queries)
}

/// Load traces (`id, query, criterion, response` columns).
pub fn load_traces(path: &Path) -> Result<Vec<Trace>, DatasetError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut traces = Vec::new();
    for row in reader.deserialize() {
        traces.push(row?);
    }
    if traces.is_empty() {
        return Err(DatasetError::Empty(path.display().to_string()));
    }
    info!(n = traces.len(), path = %path.display(), "loaded traces");
    Ok(traces)
}

/// Load a labeled test set (trace columns plus a PASS/FAIL `label`).
pub fn load_labeled_traces(path: &Path) -> Result<Vec<LabeledTrace>, DatasetError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut labeled = Vec::new();
    for row in reader.deserialize() {
        let row: LabeledRow = row?;
        labeled.push(LabeledTrace {
            trace: Trace {
                id: row.id,
                query: row.query,
                criterion: row.criterion,
                response: row.response,
            },
            ground_truth: parse_label(&row.label)?,
        });
    }
    if labeled.is_empty() {
        return Err(DatasetError::Empty(path.display().to_string()));
    }
    info!(n = labeled.len(), path = %path.display(), "loaded labeled test set");
    Ok(labeled)
}

#[derive(Debug, Serialize)]
struct LabeledRowOut<'a> {
    id: &'a str,
    query: &'a str,
    criterion: &'a str,
    response: &'a str,
    label: &'a str,
}

/// Write a labeled test set with PASS/FAIL labels, in the same shape
/// [`load_labeled_traces`] reads back.
pub fn write_labeled_traces(path: &Path, labeled: &[LabeledTrace]) -> Result<(), DatasetError> {
    let mut writer = csv::Writer::from_path(path)?;
    for item in labeled {
        writer.serialize(LabeledRowOut {
            id: &item.trace.id,
            query: &item.trace.query,
            criterion: &item.trace.criterion,
            response: &item.trace.response,
            label: if item.ground_truth { "PASS" } else { "FAIL" },
        })?;
    }
    writer.flush()?;
    info!(n = labeled.len(), path = %path.display(), "wrote labeled test set");
    Ok(())
}

/// Write bulk agent outcomes as a trace CSV. Failed rows keep their error
/// message in a dedicated column instead of masquerading as responses.
pub fn write_bulk_outcomes(path: &Path, outcomes: &[BulkOutcome]) -> Result<(), DatasetError> {
    let mut writer = csv::Writer::from_path(path)?;
    for outcome in outcomes {
        writer.serialize(outcome)?;
    }
    writer.flush()?;
    info!(n = outcomes.len(), path = %path.display(), "wrote bulk outcomes");
    Ok(())
}

/// Persist calibration pairs as JSON.
pub fn save_calibration_pairs(path: &Path, pairs: &CalibrationPairs) -> Result<(), DatasetError> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), pairs)?;
    info!(n = pairs.test_labels.len(), path = %path.display(), "saved calibration pairs");
    Ok(())
}

/// Load calibration pairs from JSON.
pub fn load_calibration_pairs(path: &Path) -> Result<CalibrationPairs, DatasetError> {
    let file = File::open(path)?;
    let pairs: CalibrationPairs = serde_json::from_reader(BufReader::new(file))?;
    // Validate up front so a bad file fails before any judging spend.
    pairs.pairs()?;
    Ok(pairs)
}

/// Persist the final evaluation report as JSON.
pub fn save_report(path: &Path, report: &EvaluationReport) -> Result<(), DatasetError> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)?;
    info!(path = %path.display(), "saved evaluation report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_load_labeled_traces_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test_set.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "id,query,criterion,response,label").unwrap();
        writeln!(file, "t1,vegan soup,vegan,Use vegetable broth,PASS").unwrap();
        writeln!(file, "t2,keto bread,keto,Use wheat flour,FAIL").unwrap();
        drop(file);

        let labeled = load_labeled_traces(&path).unwrap();
        assert_eq!(labeled.len(), 2);
        assert!(labeled[0].ground_truth);
        assert!(!labeled[1].ground_truth);
        assert_eq!(labeled[1].trace.criterion, "keto");
    }

    #[test]
    fn test_labeled_traces_write_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("labeled.csv");

        let labeled = vec![
            LabeledTrace {
                trace: Trace {
                    id: "t1".to_string(),
                    query: "vegan soup".to_string(),
                    criterion: "vegan".to_string(),
                    response: "Use vegetable broth".to_string(),
                },
                ground_truth: true,
            },
            LabeledTrace {
                trace: Trace {
                    id: "t2".to_string(),
                    query: "keto bread".to_string(),
                    criterion: "keto".to_string(),
                    response: "Use wheat flour".to_string(),
                },
                ground_truth: false,
            },
        ];
        write_labeled_traces(&path, &labeled).unwrap();

        let loaded = load_labeled_traces(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded[0].ground_truth);
        assert!(!loaded[1].ground_truth);
        assert_eq!(loaded[1].trace.response, "Use wheat flour");
    }

    #[test]
    fn test_invalid_label_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "id,query,criterion,response,label").unwrap();
        writeln!(file, "t1,q,c,r,MAYBE").unwrap();
        drop(file);

        let err = load_labeled_traces(&path).unwrap_err();
        assert!(matches!(err, DatasetError::InvalidLabel(_)));
    }

    #[test]
    fn test_empty_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "id,query,criterion").unwrap();
        drop(file);

        assert!(matches!(load_queries(&path), Err(DatasetError::Empty(_))));
    }

    #[test]
    fn test_calibration_pairs_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pairs.json");

        let pairs = CalibrationPairs::from_pairs(&[(true, true), (true, false), (false, false)]);
        save_calibration_pairs(&path, &pairs).unwrap();

        let loaded = load_calibration_pairs(&path).unwrap();
        assert_eq!(
            loaded.pairs().unwrap(),
            vec![(true, true), (true, false), (false, false)]
        );
    }

    #[test]
    fn test_mismatched_pairs_are_rejected() {
        let pairs = CalibrationPairs {
            test_labels: vec![1, 0],
            test_preds: vec![1],
            description: String::new(),
        };
        assert!(matches!(
            pairs.pairs(),
            Err(DatasetError::MismatchedPairs { .. })
        ));
    }

    #[test]
    fn test_write_bulk_outcomes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("traces.csv");

        let outcomes = vec![
            BulkOutcome {
                id: "q1".to_string(),
                query: "vegan soup".to_string(),
                criterion: "vegan".to_string(),
                response: Some("Use vegetable broth".to_string()),
                error: None,
            },
            BulkOutcome {
                id: "q2".to_string(),
                query: "keto bread".to_string(),
                criterion: "keto".to_string(),
                response: None,
                error: Some("agent timed out".to_string()),
            },
        ];
        write_bulk_outcomes(&path, &outcomes).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("id,query,criterion,response,error"));
        assert!(contents.contains("agent timed out"));
    }
}
