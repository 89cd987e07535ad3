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

//! Prevalence correction for a noisy binary judge
//!
//! The observed positive rate among judge predictions mixes true successes
//! the judge caught with true failures it mislabeled:
//!
//! ```text
//! p_obs = theta * TPR + (1 - theta) * (1 - TNR)
//! ```
//!
//! Solving for `theta` recovers the true success rate. The inversion divides
//! by `TPR + TNR - 1`, which is zero for a judge performing at chance; that
//! case is surfaced as [`DegenerateJudgeError`] instead of an extreme or
//! infinite value. The linear inversion can also overshoot [0, 1] when the
//! calibration sample is small, so the result is clamped and the clamping is
//! recorded rather than applied silently.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Below this margin over chance, the corrector is numerically unstable.
pub const CHANCE_MARGIN_EPSILON: f64 = 1e-6;

/// Corrected success rate, with a flag for out-of-range inversions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrectedRate {
    /// Corrected true positive rate, clamped into [0, 1]
    pub theta: f64,

    /// Whether the raw inversion fell outside [0, 1] and was clamped
    pub clamped: bool,
}

/// Judge performs at (or indistinguishably near) chance
#[derive(Debug, Clone, Copy, Error, PartialEq)]
#[error(
    "judge performs at chance (TPR {tpr:.3} + TNR {tnr:.3} - 1 = {margin:.2e}); \
     corrected estimate is ill-conditioned",
    margin = .tpr + .tnr - 1.0
)]
pub struct DegenerateJudgeError {
    pub tpr: f64,
    pub tnr: f64,
}

/// Invert the two-class confusion model to recover the true positive rate.
///
/// `tpr` and `tnr` come from the calibration set, `p_obs` is the observed
/// positive rate among judge predictions over the unlabeled population.
pub fn correct_rate(tpr: f64, tnr: f64, p_obs: f64) -> Result<CorrectedRate, DegenerateJudgeError> {
    let margin = tpr + tnr - 1.0;
    if margin.abs() < CHANCE_MARGIN_EPSILON {
        return Err(DegenerateJudgeError { tpr, tnr });
    }

    let raw = (p_obs - (1.0 - tnr)) / margin;
    let theta = raw.clamp(0.0, 1.0);
    let clamped = raw != theta;
    if clamped {
        warn!(
            raw_theta = raw,
            tpr, tnr, p_obs, "corrected rate fell outside [0, 1]; clamping"
        );
    }

    Ok(CorrectedRate { theta, clamped })
}
