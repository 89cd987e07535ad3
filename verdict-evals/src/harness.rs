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

//! Evaluation harness: bounded-concurrency execution over a population
//!
//! Judge calls are independent, so the harness fans them out behind a
//! semaphore sized to the upstream rate limit, retries per-item failures
//! with exponential backoff, and aggregates only after every task has
//! completed. An item that still fails after its retry budget is recorded
//! as excluded; it never counts toward the numerator or denominator of the
//! observed rate.

use crate::agent::{ChatAgent, ChatMessage};
use crate::confusion::ConfusionStats;
use crate::dataset::QueryRecord;
use crate::judge::Judge;
use crate::statistics::{positive_rate, RateEstimate, SuccessRateEstimator};
use crate::{EvalConfig, EvalError, LabeledTrace, Trace};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Per-trace judging outcome, kept for audit logs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgedTrace {
    pub trace_id: String,

    /// The judge's call; `None` when all attempts failed
    pub prediction: Option<bool>,
    pub reasoning: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
}

/// Final estimate over an unlabeled population
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub corrected: RateEstimate,

    /// Uncorrected positive rate among judge predictions, for comparison
    pub raw_observed_rate: f64,

    /// Items with a usable judge prediction
    pub n_evaluated: usize,

    /// Items dropped after exhausting the retry budget
    pub n_excluded: usize,
}

/// Judge performance on a labeled test set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub stats: ConfusionStats,
    pub records: Vec<CalibrationRecord>,
    pub n_excluded: usize,
}

/// One calibration pairing of ground truth with the judge's call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub trace_id: String,
    pub ground_truth: bool,
    pub prediction: bool,
    pub reasoning: String,
}

impl CalibrationReport {
    /// `(ground_truth, judge_prediction)` pairs for the estimator.
    pub fn pairs(&self) -> Vec<(bool, bool)> {
        self.records
            .iter()
            .map(|r| (r.ground_truth, r.prediction))
            .collect()
    }
}

/// Result of one bulk agent invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub id: String,
    pub query: String,
    pub criterion: String,
    pub response: Option<String>,
    pub error: Option<String>,
}

/// Orchestrates judge and agent execution over trace populations.
pub struct EvalHarness {
    judge: Arc<dyn Judge>,
    config: EvalConfig,
}

impl EvalHarness {
    pub fn new(judge: Arc<dyn Judge>, config: EvalConfig) -> Self {
        Self { judge, config }
    }

    /// Run the judge over every trace, with bounded concurrency and
    /// per-item retry.
    pub async fn judge_population(&self, traces: &[Trace]) -> Vec<JudgedTrace> {
        info!(
            judge = self.judge.id(),
            n_traces = traces.len(),
            max_concurrent = self.config.max_concurrent,
            "judging population"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut tasks = Vec::with_capacity(traces.len());

        for trace in traces.iter().cloned() {
            let judge = Arc::clone(&self.judge);
            let semaphore = Arc::clone(&semaphore);
            let config = self.config.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                judge_one(judge, &trace, &config).await
            }));
        }

        // Aggregate only after every task has finished; no shared counters.
        let mut judgments = Vec::with_capacity(tasks.len());
        for (task, trace) in tasks.into_iter().zip(traces) {
            match task.await {
                Ok(judgment) => judgments.push(judgment),
                Err(e) => {
                    warn!(trace_id = %trace.id, error = %e, "judge task panicked");
                    judgments.push(JudgedTrace {
                        trace_id: trace.id.clone(),
                        prediction: None,
                        reasoning: None,
                        error: Some(format!("task panicked: {e}")),
                        attempts: 0,
                    });
                }
            }
        }

        let excluded = judgments.iter().filter(|j| j.prediction.is_none()).count();
        if excluded > 0 {
            warn!(excluded, "judge failed on some traces; they will be excluded");
        }

        judgments
    }

    /// Judge the population and estimate the corrected success rate.
    ///
    /// `calibration_pairs` are precomputed `(ground_truth, judge_prediction)`
    /// pairs from the labeled test set.
    pub async fn evaluate(
        &self,
        traces: &[Trace],
        calibration_pairs: &[(bool, bool)],
        estimator: &SuccessRateEstimator,
    ) -> Result<EvaluationReport, EvalError> {
        let judgments = self.judge_population(traces).await;

        let predictions: Vec<bool> = judgments.iter().filter_map(|j| j.prediction).collect();
        let n_excluded = judgments.len() - predictions.len();
        if predictions.is_empty() {
            return Err(EvalError::EmptyPopulation);
        }

        let corrected = estimator.estimate(calibration_pairs, &predictions)?;
        let raw_observed_rate = positive_rate(&predictions);

        info!(
            raw = raw_observed_rate,
            corrected = corrected.point,
            n_evaluated = predictions.len(),
            n_excluded,
            "evaluation complete"
        );

        Ok(EvaluationReport {
            corrected,
            raw_observed_rate,
            n_evaluated: predictions.len(),
            n_excluded,
        })
    }

    /// Run the judge over a labeled test set and pair its calls with ground
    /// truth. Failed items are excluded from the confusion counts.
    pub async fn calibrate(&self, labeled: &[LabeledTrace]) -> CalibrationReport {
        let traces: Vec<Trace> = labeled.iter().map(|l| l.trace.clone()).collect();
        let judgments = self.judge_population(&traces).await;

        let mut records = Vec::new();
        let mut n_excluded = 0usize;
        for (labeled, judgment) in labeled.iter().zip(&judgments) {
            match judgment.prediction {
                Some(prediction) => records.push(CalibrationRecord {
                    trace_id: labeled.trace.id.clone(),
                    ground_truth: labeled.ground_truth,
                    prediction,
                    reasoning: judgment.reasoning.clone().unwrap_or_default(),
                }),
                None => n_excluded += 1,
            }
        }

        let pairs: Vec<(bool, bool)> =
            records.iter().map(|r| (r.ground_truth, r.prediction)).collect();
        let stats = ConfusionStats::from_pairs(&pairs);

        CalibrationReport {
            stats,
            records,
            n_excluded,
        }
    }
}

/// Cap on the backoff doubling exponent; deeper retries wait the max.
const MAX_BACKOFF_DOUBLINGS: u32 = 10;

async fn judge_one(judge: Arc<dyn Judge>, trace: &Trace, config: &EvalConfig) -> JudgedTrace {
    let timeout = Duration::from_secs(config.timeout_secs);
    let mut last_error = String::new();

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let doublings = (attempt - 1).min(MAX_BACKOFF_DOUBLINGS);
            let backoff = config.retry_backoff_ms.saturating_mul(1 << doublings);
            debug!(trace_id = %trace.id, attempt, backoff_ms = backoff, "retrying judge call");
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }

        match tokio::time::timeout(timeout, judge.judge(trace)).await {
            Ok(Ok(verdict)) => {
                return JudgedTrace {
                    trace_id: trace.id.clone(),
                    prediction: Some(verdict.label),
                    reasoning: Some(verdict.reasoning),
                    error: None,
                    attempts: attempt + 1,
                };
            }
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = format!("timed out after {}s", config.timeout_secs),
        }
    }

    JudgedTrace {
        trace_id: trace.id.clone(),
        prediction: None,
        reasoning: None,
        error: Some(last_error),
        attempts: config.max_retries + 1,
    }
}

/// Run the agent over a batch of queries, yielding trace rows for later
/// judging. Per-query agent failures become failed rows, not batch aborts.
pub async fn run_bulk(
    agent: Arc<dyn ChatAgent>,
    queries: &[QueryRecord],
    config: &EvalConfig,
) -> Vec<BulkOutcome> {
    info!(
        n_queries = queries.len(),
        max_concurrent = config.max_concurrent,
        "running agent over query batch"
    );

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
    let timeout = Duration::from_secs(config.timeout_secs);
    let mut tasks = Vec::with_capacity(queries.len());

    for query in queries.iter().cloned() {
        let agent = Arc::clone(&agent);
        let semaphore = Arc::clone(&semaphore);

        tasks.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let history = vec![ChatMessage::user(query.query.clone())];

            let result = tokio::time::timeout(timeout, agent.respond(&history)).await;
            match result {
                Ok(Ok(updated)) => {
                    let reply = updated
                        .last()
                        .filter(|m| m.role == "assistant")
                        .map(|m| m.content.clone());
                    match reply {
                        Some(response) => BulkOutcome {
                            id: query.id,
                            query: query.query,
                            criterion: query.criterion,
                            response: Some(response),
                            error: None,
                        },
                        None => BulkOutcome {
                            id: query.id,
                            query: query.query,
                            criterion: query.criterion,
                            response: None,
                            error: Some("no assistant reply in updated history".to_string()),
                        },
                    }
                }
                Ok(Err(e)) => BulkOutcome {
                    id: query.id,
                    query: query.query,
                    criterion: query.criterion,
                    response: None,
                    error: Some(e.to_string()),
                },
                Err(_) => BulkOutcome {
                    id: query.id,
                    query: query.query,
                    criterion: query.criterion,
                    response: None,
                    error: Some("agent timed out".to_string()),
                },
            }
        }));
    }

    let mut outcomes = Vec::with_capacity(tasks.len());
    for (task, query) in tasks.into_iter().zip(queries) {
        match task.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => outcomes.push(BulkOutcome {
                id: query.id.clone(),
                query: query.query.clone(),
                criterion: query.criterion.clone(),
                response: None,
                error: Some(format!("task panicked: {e}")),
            }),
        }
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::{JudgeError, JudgeVerdict};
    use crate::llm_client::LLMError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Judge that fails a fixed number of times per call before succeeding.
    struct FlakyJudge {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Judge for FlakyJudge {
        async fn judge(&self, _trace: &Trace) -> Result<JudgeVerdict, JudgeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(JudgeError::Llm(LLMError::RateLimitExceeded))
            } else {
                Ok(JudgeVerdict {
                    label: true,
                    reasoning: "ok".to_string(),
                })
            }
        }

        fn id(&self) -> &str {
            "flaky"
        }
    }

    /// Judge that labels PASS exactly when the response contains "PASS".
    struct KeywordJudge;

    #[async_trait]
    impl Judge for KeywordJudge {
        async fn judge(&self, trace: &Trace) -> Result<JudgeVerdict, JudgeError> {
            Ok(JudgeVerdict {
                label: trace.response.contains("PASS"),
                reasoning: String::new(),
            })
        }

        fn id(&self) -> &str {
            "keyword"
        }
    }

    fn trace(id: &str, response: &str) -> Trace {
        Trace {
            id: id.to_string(),
            query: "q".to_string(),
            criterion: "c".to_string(),
            response: response.to_string(),
        }
    }

    fn fast_config() -> EvalConfig {
        EvalConfig {
            max_concurrent: 4,
            timeout_secs: 5,
            max_retries: 3,
            retry_backoff_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let judge = Arc::new(FlakyJudge {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
        });
        let harness = EvalHarness::new(judge, fast_config());

        let judgments = harness.judge_population(&[trace("t1", "r")]).await;

        assert_eq!(judgments.len(), 1);
        assert_eq!(judgments[0].prediction, Some(true));
        assert_eq!(judgments[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_excluded_not_failed() {
        let judge = Arc::new(FlakyJudge {
            failures_before_success: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let harness = EvalHarness::new(judge, fast_config());

        let judgments = harness.judge_population(&[trace("t1", "r")]).await;

        assert_eq!(judgments[0].prediction, None);
        assert!(judgments[0].error.is_some());
        assert_eq!(judgments[0].attempts, 4);
    }

    #[tokio::test]
    async fn test_deep_retry_budget_does_not_overflow_backoff() {
        // Retry budgets past 64 must not overflow the doubling arithmetic.
        let judge = Arc::new(FlakyJudge {
            failures_before_success: 66,
            calls: AtomicU32::new(0),
        });
        let config = EvalConfig {
            max_concurrent: 1,
            timeout_secs: 5,
            max_retries: 70,
            retry_backoff_ms: 0,
        };
        let harness = EvalHarness::new(judge, config);

        let judgments = harness.judge_population(&[trace("t1", "r")]).await;

        assert_eq!(judgments[0].prediction, Some(true));
        assert_eq!(judgments[0].attempts, 67);
    }

    #[tokio::test]
    async fn test_evaluate_reports_corrected_and_raw_rates() {
        let harness = EvalHarness::new(Arc::new(KeywordJudge), fast_config());

        // 40 of 100 responses pass the keyword judge.
        let mut traces = Vec::new();
        for i in 0..40 {
            traces.push(trace(&format!("p{i}"), "PASS"));
        }
        for i in 0..60 {
            traces.push(trace(&format!("f{i}"), "nope"));
        }

        // TPR=0.8, TNR=0.7 calibration.
        let mut pairs = Vec::new();
        pairs.extend(std::iter::repeat((true, true)).take(8));
        pairs.extend(std::iter::repeat((true, false)).take(2));
        pairs.extend(std::iter::repeat((false, false)).take(7));
        pairs.extend(std::iter::repeat((false, true)).take(3));

        let estimator = SuccessRateEstimator::new().with_seed(11).with_resamples(500);
        let report = harness.evaluate(&traces, &pairs, &estimator).await.unwrap();

        assert_eq!(report.n_evaluated, 100);
        assert_eq!(report.n_excluded, 0);
        assert!((report.raw_observed_rate - 0.4).abs() < 1e-12);
        assert!((report.corrected.point - 0.2).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_calibrate_pairs_predictions_with_ground_truth() {
        let harness = EvalHarness::new(Arc::new(KeywordJudge), fast_config());

        let labeled = vec![
            LabeledTrace {
                trace: trace("t1", "PASS"),
                ground_truth: true,
            },
            LabeledTrace {
                trace: trace("t2", "nope"),
                ground_truth: true,
            },
            LabeledTrace {
                trace: trace("t3", "nope"),
                ground_truth: false,
            },
            LabeledTrace {
                trace: trace("t4", "PASS"),
                ground_truth: false,
            },
        ];

        let report = harness.calibrate(&labeled).await;

        assert_eq!(report.n_excluded, 0);
        assert_eq!(report.stats.true_positives, 1);
        assert_eq!(report.stats.false_negatives, 1);
        assert_eq!(report.stats.true_negatives, 1);
        assert_eq!(report.stats.false_positives, 1);
        assert_eq!(report.pairs().len(), 4);
    }

    struct FailingAgent;

    #[async_trait]
    impl ChatAgent for FailingAgent {
        async fn respond(
            &self,
            _history: &[ChatMessage],
        ) -> Result<Vec<ChatMessage>, crate::agent::AgentError> {
            Err(crate::agent::AgentError::EmptyHistory)
        }
    }

    struct EchoAgent;

    #[async_trait]
    impl ChatAgent for EchoAgent {
        async fn respond(
            &self,
            history: &[ChatMessage],
        ) -> Result<Vec<ChatMessage>, crate::agent::AgentError> {
            let mut updated = history.to_vec();
            updated.push(ChatMessage::assistant(format!(
                "re: {}",
                history.last().unwrap().content
            )));
            Ok(updated)
        }
    }

    #[tokio::test]
    async fn test_run_bulk_records_responses_and_failures() {
        let queries = vec![
            QueryRecord {
                id: "q1".to_string(),
                query: "q".to_string(),
                criterion: "c".to_string(),
            },
            QueryRecord {
                id: "q2".to_string(),
                query: "q".to_string(),
                criterion: "c".to_string(),
            },
        ];

        let ok = run_bulk(Arc::new(EchoAgent), &queries, &fast_config()).await;
        assert_eq!(ok.len(), 2);
        assert_eq!(ok[0].response.as_deref(), Some("re: q"));
        assert!(ok[0].error.is_none());

        let failed = run_bulk(Arc::new(FailingAgent), &queries, &fast_config()).await;
        assert!(failed.iter().all(|o| o.response.is_none()));
        assert!(failed.iter().all(|o| o.error.is_some()));
    }
}
