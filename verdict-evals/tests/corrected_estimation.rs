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

//! End-to-end properties of the corrected success-rate pipeline:
//! harness -> confusion calibration -> prevalence correction -> bootstrap.

use async_trait::async_trait;
use std::sync::Arc;
use verdict_evals::{
    EvalConfig, EvalHarness, Judge, JudgeError, JudgeVerdict, LabeledTrace, SuccessRateEstimator,
    Trace,
};

/// Deterministic judge: PASS iff the response contains the marker.
struct MarkerJudge;

#[async_trait]
impl Judge for MarkerJudge {
    async fn judge(&self, trace: &Trace) -> Result<JudgeVerdict, JudgeError> {
        Ok(JudgeVerdict {
            label: trace.response.contains("GOOD"),
            reasoning: String::new(),
        })
    }

    fn id(&self) -> &str {
        "marker"
    }
}

fn trace(id: &str, response: &str) -> Trace {
    Trace {
        id: id.to_string(),
        query: "query".to_string(),
        criterion: "criterion".to_string(),
        response: response.to_string(),
    }
}

fn population(n_pass: usize, n_fail: usize) -> Vec<Trace> {
    let mut traces = Vec::new();
    for i in 0..n_pass {
        traces.push(trace(&format!("p{i}"), "GOOD recipe"));
    }
    for i in 0..n_fail {
        traces.push(trace(&format!("f{i}"), "bad recipe"));
    }
    traces
}

fn config() -> EvalConfig {
    EvalConfig {
        max_concurrent: 8,
        timeout_secs: 5,
        max_retries: 1,
        retry_backoff_ms: 1,
    }
}

#[tokio::test]
async fn perfect_judge_corrected_rate_equals_raw_rate() {
    // Calibration where the judge agrees with ground truth everywhere.
    let mut labeled = Vec::new();
    for i in 0..10 {
        labeled.push(LabeledTrace {
            trace: trace(&format!("lp{i}"), "GOOD recipe"),
            ground_truth: true,
        });
        labeled.push(LabeledTrace {
            trace: trace(&format!("lf{i}"), "bad recipe"),
            ground_truth: false,
        });
    }

    let harness = EvalHarness::new(Arc::new(MarkerJudge), config());
    let calibration = harness.calibrate(&labeled).await;
    assert_eq!(calibration.stats.tpr().unwrap(), 1.0);
    assert_eq!(calibration.stats.tnr().unwrap(), 1.0);

    let estimator = SuccessRateEstimator::new().with_seed(5).with_resamples(500);
    let report = harness
        .evaluate(&population(30, 70), &calibration.pairs(), &estimator)
        .await
        .unwrap();

    assert_eq!(report.corrected.point, report.raw_observed_rate);
    assert!((report.raw_observed_rate - 0.3).abs() < 1e-12);
}

#[tokio::test]
async fn corrected_rate_is_monotonic_in_observed_rate() {
    // Imperfect but informative judge: TPR=0.8, TNR=0.7.
    let mut pairs = Vec::new();
    pairs.extend(std::iter::repeat((true, true)).take(8));
    pairs.extend(std::iter::repeat((true, false)).take(2));
    pairs.extend(std::iter::repeat((false, false)).take(7));
    pairs.extend(std::iter::repeat((false, true)).take(3));

    let harness = EvalHarness::new(Arc::new(MarkerJudge), config());
    let estimator = SuccessRateEstimator::new().with_seed(5).with_resamples(200);

    let mut previous = f64::NEG_INFINITY;
    for n_pass in [35, 45, 55, 65] {
        let report = harness
            .evaluate(&population(n_pass, 100 - n_pass), &pairs, &estimator)
            .await
            .unwrap();
        assert!(report.corrected.point > previous);
        previous = report.corrected.point;
    }
}

#[tokio::test]
async fn interval_brackets_point_and_reproduces_with_seed() {
    let mut pairs = Vec::new();
    pairs.extend(std::iter::repeat((true, true)).take(8));
    pairs.extend(std::iter::repeat((true, false)).take(2));
    pairs.extend(std::iter::repeat((false, false)).take(7));
    pairs.extend(std::iter::repeat((false, true)).take(3));

    let harness = EvalHarness::new(Arc::new(MarkerJudge), config());
    let traces = population(40, 60);
    let estimator = SuccessRateEstimator::new().with_seed(99).with_resamples(1000);

    let first = harness.evaluate(&traces, &pairs, &estimator).await.unwrap();
    let second = harness.evaluate(&traces, &pairs, &estimator).await.unwrap();

    assert!((first.corrected.point - 0.2).abs() < 1e-12);
    assert!(first.corrected.lower <= first.corrected.point);
    assert!(first.corrected.point <= first.corrected.upper);
    assert!(first.corrected.upper - first.corrected.lower > 0.0);

    assert_eq!(
        first.corrected.lower.to_bits(),
        second.corrected.lower.to_bits()
    );
    assert_eq!(
        first.corrected.upper.to_bits(),
        second.corrected.upper.to_bits()
    );
}
