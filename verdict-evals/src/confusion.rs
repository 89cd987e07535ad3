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

//! Confusion-matrix estimation of judge error rates
//!
//! The calibration set pairs ground-truth labels with judge predictions.
//! Partitioning those pairs into tp/fn/tn/fp yields the judge's true positive
//! rate and true negative rate, the two quantities the prevalence corrector
//! needs. A calibration set missing an entire class makes TPR or TNR
//! undefined; that is a hard error here, because silently substituting 0.0
//! would catastrophically bias the downstream correction.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Counts from pairing ground truth with judge predictions.
///
/// `ground_truth = true` is the positive class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionStats {
    pub true_positives: u64,
    pub false_negatives: u64,
    pub true_negatives: u64,
    pub false_positives: u64,
}

/// Calibration set cannot support a TPR or TNR estimate
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("calibration set has no positive ground-truth examples; TPR is undefined")]
    NoPositiveExamples,

    #[error("calibration set has no negative ground-truth examples; TNR is undefined")]
    NoNegativeExamples,

    #[error("calibration set is empty")]
    Empty,
}

impl ConfusionStats {
    /// Partition `(ground_truth, judge_prediction)` pairs into counts.
    pub fn from_pairs(pairs: &[(bool, bool)]) -> Self {
        let mut stats = ConfusionStats::default();
        for &(truth, prediction) in pairs {
            match (truth, prediction) {
                (true, true) => stats.true_positives += 1,
                (true, false) => stats.false_negatives += 1,
                (false, false) => stats.true_negatives += 1,
                (false, true) => stats.false_positives += 1,
            }
        }
        stats
    }

    pub fn total(&self) -> u64 {
        self.true_positives + self.false_negatives + self.true_negatives + self.false_positives
    }

    /// True positive rate: P(judge says PASS | truly PASS).
    pub fn tpr(&self) -> Result<f64, CalibrationError> {
        let positives = self.true_positives + self.false_negatives;
        if positives == 0 {
            return Err(CalibrationError::NoPositiveExamples);
        }
        Ok(self.true_positives as f64 / positives as f64)
    }

    /// True negative rate: P(judge says FAIL | truly FAIL).
    pub fn tnr(&self) -> Result<f64, CalibrationError> {
        let negatives = self.true_negatives + self.false_positives;
        if negatives == 0 {
            return Err(CalibrationError::NoNegativeExamples);
        }
        Ok(self.true_negatives as f64 / negatives as f64)
    }

    /// Mean of TPR and TNR; errors if either is undefined.
    pub fn balanced_accuracy(&self) -> Result<f64, CalibrationError> {
        Ok((self.tpr()? + self.tnr()?) / 2.0)
    }

    /// Fraction of pairs where the judge agreed with ground truth.
    pub fn accuracy(&self) -> Result<f64, CalibrationError> {
        let total = self.total();
        if total == 0 {
            return Err(CalibrationError::Empty);
        }
        Ok((self.true_positives + self.true_negatives) as f64 / total as f64)
    }
}
