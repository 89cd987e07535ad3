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

//! # Verdict Evaluation Framework
//!
//! Judge-error-corrected success-rate estimation for LLM agents.
//!
//! An LLM judge is a noisy binary classifier: the raw fraction of traces it
//! marks as passing is a biased estimate of the true success rate. This crate
//! measures the judge's error rates (TPR/TNR) on a small labeled calibration
//! set, inverts the two-class confusion model to recover the true rate, and
//! quantifies uncertainty with a seeded percentile bootstrap.
//!
//! ## Features
//!
//! - **Confusion-matrix calibration**: TPR/TNR from paired labels
//! - **Prevalence correction**: bias-corrected success rate with clamping
//! - **Bootstrap intervals**: reproducible, seed-stable confidence bounds
//! - **Evaluation harness**: bounded-concurrency judging with retry/backoff
//! - **LLM-as-judge**: typed verdict contract over free-text model replies
//!
//! ## Example
//!
//! ```rust,ignore
//! use verdict_evals::harness::EvalHarness;
//! use verdict_evals::judge::LlmJudge;
//! use verdict_evals::llm_client::OpenAIClient;
//! use verdict_evals::statistics::SuccessRateEstimator;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Arc::new(OpenAIClient::new(
//!         std::env::var("OPENAI_API_KEY").unwrap(),
//!         "gpt-4o-mini".to_string(),
//!     ));
//!     let judge = Arc::new(LlmJudge::new(client, prompt_template));
//!     let harness = EvalHarness::new(judge, Default::default());
//!
//!     let estimator = SuccessRateEstimator::new().with_seed(42);
//!     let report = harness
//!         .evaluate(&traces, &calibration_pairs, &estimator)
//!         .await
//!         .unwrap();
//!     println!("corrected rate: {:.3}", report.corrected.point);
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod agent;
pub mod confusion;
pub mod correction;
pub mod dataset;
pub mod harness;
pub mod judge;
pub mod llm_client;
pub mod statistics;

pub use agent::{AgentError, ChatAgent, ChatMessage, LlmAgent};
pub use confusion::{CalibrationError, ConfusionStats};
pub use correction::{correct_rate, CorrectedRate, DegenerateJudgeError};
pub use dataset::{CalibrationPairs, DatasetError, QueryRecord};
pub use harness::{
    run_bulk, BulkOutcome, CalibrationReport, EvalHarness, EvaluationReport, JudgedTrace,
};
pub use judge::{Judge, JudgeError, JudgeVerdict, LlmJudge};
pub use llm_client::{LLMClient, LLMError, LLMResponse, OpenAIClient};
pub use statistics::{RateEstimate, SuccessRateEstimator};

/// A single agent interaction under evaluation: the user query, the criterion
/// the response must satisfy, and the response itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Unique trace identifier
    pub id: String,

    /// User query sent to the agent
    pub query: String,

    /// Criterion the judge evaluates the response against
    /// (e.g., a dietary restriction the recipe must honor)
    pub criterion: String,

    /// Agent response being judged
    pub response: String,
}

/// A trace from a held-out set with a known correct answer.
///
/// `ground_truth = true` means the response truly satisfies the criterion
/// (the "positive" class).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledTrace {
    #[serde(flatten)]
    pub trace: Trace,
    pub ground_truth: bool,
}

/// Errors surfaced by the estimator and harness.
///
/// Item-level transient errors (judge call failures) are retried and then
/// excluded inside the harness; only structural errors reach this enum.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    DegenerateJudge(#[from] DegenerateJudgeError),

    #[error("no judge predictions survived evaluation; cannot estimate a rate")]
    EmptyPopulation,
}

/// Configuration for harness execution
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Maximum number of concurrent judge/agent invocations.
    /// Sized to respect the upstream API rate limit.
    pub max_concurrent: usize,

    /// Timeout per invocation in seconds
    pub timeout_secs: u64,

    /// Maximum number of retries after a failed invocation
    pub max_retries: u32,

    /// Base backoff between retries in milliseconds (doubles per attempt)
    pub retry_backoff_ms: u64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 32,
            timeout_secs: 60,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}
