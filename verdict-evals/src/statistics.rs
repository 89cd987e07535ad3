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

//! Bootstrap interval estimation for the corrected success rate
//!
//! The corrected rate is a ratio of estimated quantities; when TPR/TNR come
//! from a small calibration set its sampling distribution is long-tailed and
//! non-normal, exactly when the judge is least reliable. A closed-form
//! Gaussian interval would understate tail risk there, so this module uses a
//! percentile bootstrap instead: resample the calibration pairs and the
//! unlabeled predictions independently, re-run the correction per resample,
//! and read the interval off the empirical percentiles.
//!
//! Resampling accepts an explicit seed so identical inputs reproduce
//! bit-identical intervals.

use crate::confusion::ConfusionStats;
use crate::correction::correct_rate;
use crate::EvalError;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Success-rate estimate with a two-sided confidence interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateEstimate {
    /// Corrected rate computed on the full, unresampled data
    pub point: f64,

    /// Lower percentile bound, clamped to [0, 1]
    pub lower: f64,

    /// Upper percentile bound, clamped to [0, 1]
    pub upper: f64,

    /// Confidence level (e.g., 0.95 for 95% CI)
    pub confidence_level: f64,

    /// Number of bootstrap resamples that produced a usable draw
    pub n_resamples: usize,

    /// Whether the point estimate was clamped into [0, 1]
    pub clamped: bool,
}

/// Seeded bootstrap estimator for the corrected success rate.
pub struct SuccessRateEstimator {
    n_resamples: usize,
    seed: Option<u64>,
    confidence: f64,
}

impl Default for SuccessRateEstimator {
    fn default() -> Self {
        Self {
            n_resamples: 10_000,
            seed: None,
            confidence: 0.95,
        }
    }
}

impl SuccessRateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resamples(mut self, n: usize) -> Self {
        self.n_resamples = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Estimate the true success rate from calibration pairs and unlabeled
    /// judge predictions.
    ///
    /// `calibration` holds `(ground_truth, judge_prediction)` pairs from the
    /// labeled test set; `unlabeled_preds` holds the judge's calls over the
    /// evaluation population. Structural problems with the full data (a
    /// missing calibration class, a chance-level judge) abort the estimate.
    pub fn estimate(
        &self,
        calibration: &[(bool, bool)],
        unlabeled_preds: &[bool],
    ) -> Result<RateEstimate, EvalError> {
        if unlabeled_preds.is_empty() {
            return Err(EvalError::EmptyPopulation);
        }

        // Point estimate on the full data. Errors here are fatal: a silent
        // fallback would report a misleading number.
        let stats = ConfusionStats::from_pairs(calibration);
        let tpr = stats.tpr()?;
        let tnr = stats.tnr()?;
        let p_obs = positive_rate(unlabeled_preds);
        let corrected = correct_rate(tpr, tnr, p_obs)?;

        let mut rng: Box<dyn RngCore> = match self.seed {
            Some(s) => Box::new(StdRng::seed_from_u64(s)),
            None => Box::new(thread_rng()),
        };

        let n_cal = calibration.len();
        let n_pop = unlabeled_preds.len();
        let mut thetas: Vec<f64> = Vec::with_capacity(self.n_resamples);
        let mut cal_resample = vec![(false, false); n_cal];
        let mut discarded = 0usize;

        for _ in 0..self.n_resamples {
            for slot in cal_resample.iter_mut() {
                *slot = calibration[rng.gen_range(0..n_cal)];
            }
            let resampled = ConfusionStats::from_pairs(&cal_resample);
            let (tpr_star, tnr_star) = match (resampled.tpr(), resampled.tnr()) {
                (Ok(tpr), Ok(tnr)) => (tpr, tnr),
                // Resample lost an entire class; this draw carries no
                // information about the rates.
                _ => {
                    discarded += 1;
                    continue;
                }
            };

            let mut positives = 0usize;
            for _ in 0..n_pop {
                if unlabeled_preds[rng.gen_range(0..n_pop)] {
                    positives += 1;
                }
            }
            let p_obs_star = positives as f64 / n_pop as f64;

            match correct_rate(tpr_star, tnr_star, p_obs_star) {
                Ok(corrected_star) => thetas.push(corrected_star.theta),
                Err(_) => discarded += 1,
            }
        }

        if discarded > 0 {
            debug!(
                discarded,
                kept = thetas.len(),
                "discarded degenerate bootstrap draws"
            );
        }

        let (lower, upper) = if thetas.is_empty() {
            // Every draw was degenerate; the point estimate is all we have.
            (corrected.theta, corrected.theta)
        } else {
            thetas.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            percentile_bounds(&thetas, self.confidence)
        };

        Ok(RateEstimate {
            point: corrected.theta,
            lower: lower.min(corrected.theta).clamp(0.0, 1.0),
            upper: upper.max(corrected.theta).clamp(0.0, 1.0),
            confidence_level: self.confidence,
            n_resamples: thetas.len(),
            clamped: corrected.clamped,
        })
    }
}

/// Fraction of predictions that are positive.
pub fn positive_rate(preds: &[bool]) -> f64 {
    if preds.is_empty() {
        return 0.0;
    }
    preds.iter().filter(|&&p| p).count() as f64 / preds.len() as f64
}

/// [alpha/2, 1 - alpha/2] empirical percentiles of sorted draws.
fn percentile_bounds(sorted: &[f64], confidence: f64) -> (f64, f64) {
    let alpha = 1.0 - confidence;
    let n = sorted.len();
    let lower_idx = ((alpha / 2.0) * n as f64).floor() as usize;
    let upper_idx = (((1.0 - alpha / 2.0) * n as f64).ceil() as usize).saturating_sub(1);

    (
        sorted[lower_idx.min(n - 1)],
        sorted[upper_idx.min(n - 1)],
    )
}
