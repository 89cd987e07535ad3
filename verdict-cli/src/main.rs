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

//! Offline evaluation-campaign commands
//!
//! - `bulk-test`: run the agent over a query batch and persist trace rows
//! - `label`: ground-truth a trace sample with a stronger LLM
//! - `calibrate`: measure judge TPR/TNR on a labeled test set
//! - `evaluate`: judge the full population and report the corrected rate

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use verdict_evals::{
    dataset, run_bulk, CalibrationPairs, EvalConfig, EvalHarness, LabeledTrace, LlmAgent, LlmJudge,
    OpenAIClient, SuccessRateEstimator,
};

#[derive(Parser, Debug)]
#[command(name = "verdict", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct LlmArgs {
    /// API key for the hosted LLM
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Model name
    #[arg(long, default_value = "gpt-4o-mini")]
    model: String,

    /// Override the chat completions base URL
    #[arg(long, env = "VERDICT_LLM_BASE_URL")]
    base_url: Option<String>,

    /// Number of concurrent requests
    #[arg(long, default_value_t = 32)]
    workers: usize,
}

impl LlmArgs {
    fn client(&self) -> Arc<OpenAIClient> {
        let mut client = OpenAIClient::new(self.api_key.clone(), self.model.clone());
        if let Some(base_url) = &self.base_url {
            client = client.with_base_url(base_url.clone());
        }
        Arc::new(client)
    }

    fn eval_config(&self) -> EvalConfig {
        EvalConfig {
            max_concurrent: self.workers,
            ..EvalConfig::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent over a query CSV and store trace rows for later judging
    BulkTest {
        /// CSV with id, query, criterion columns
        #[arg(long, default_value = "data/sample_queries.csv")]
        queries: PathBuf,

        /// System prompt file for the agent
        #[arg(long)]
        system_prompt: PathBuf,

        /// Output directory
        #[arg(long, default_value = "results")]
        out_dir: PathBuf,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Label a trace sample with a stronger LLM to build the test set
    Label {
        /// Trace CSV with id, query, criterion, response columns
        #[arg(long, default_value = "data/raw_traces.csv")]
        traces: PathBuf,

        /// Labeling prompt template (with __QUERY__/__CRITERION__/__RESPONSE__)
        #[arg(long)]
        prompt: PathBuf,

        /// Output path for the labeled test set
        #[arg(long, default_value = "data/test_set.csv")]
        out: PathBuf,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Run the judge over a labeled test set and measure its TPR/TNR
    Calibrate {
        /// Labeled CSV with id, query, criterion, response, label columns
        #[arg(long, default_value = "data/test_set.csv")]
        test_set: PathBuf,

        /// Judge prompt template (with __QUERY__/__CRITERION__/__RESPONSE__)
        #[arg(long)]
        prompt: PathBuf,

        /// Output directory
        #[arg(long, default_value = "results")]
        out_dir: PathBuf,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Judge the full trace population and estimate the corrected rate
    Evaluate {
        /// Trace CSV with id, query, criterion, response columns
        #[arg(long, default_value = "data/raw_traces.csv")]
        traces: PathBuf,

        /// Calibration pairs JSON produced by `calibrate`
        #[arg(long, default_value = "results/calibration_pairs.json")]
        calibration: PathBuf,

        /// Judge prompt template
        #[arg(long)]
        prompt: PathBuf,

        /// Output directory
        #[arg(long, default_value = "results")]
        out_dir: PathBuf,

        /// Bootstrap seed for reproducible intervals
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Number of bootstrap resamples
        #[arg(long, default_value_t = 10_000)]
        resamples: usize,

        /// Confidence level for the interval
        #[arg(long, default_value_t = 0.95)]
        confidence: f64,

        #[command(flatten)]
        llm: LlmArgs,
    },
}

#[derive(Debug, Serialize)]
struct JudgePerformance {
    true_positive_rate: f64,
    true_negative_rate: f64,
    balanced_accuracy: f64,
    accuracy: f64,
    total_predictions: usize,
    n_excluded: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "verdict_cli=info,verdict_evals=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::BulkTest {
            queries,
            system_prompt,
            out_dir,
            llm,
        } => bulk_test(queries, system_prompt, out_dir, llm).await,
        Commands::Label {
            traces,
            prompt,
            out,
            llm,
        } => label(traces, prompt, out, llm).await,
        Commands::Calibrate {
            test_set,
            prompt,
            out_dir,
            llm,
        } => calibrate(test_set, prompt, out_dir, llm).await,
        Commands::Evaluate {
            traces,
            calibration,
            prompt,
            out_dir,
            seed,
            resamples,
            confidence,
            llm,
        } => {
            evaluate(
                traces, calibration, prompt, out_dir, seed, resamples, confidence, llm,
            )
            .await
        }
    }
}

async fn bulk_test(
    queries: PathBuf,
    system_prompt: PathBuf,
    out_dir: PathBuf,
    llm: LlmArgs,
) -> Result<()> {
    let queries = dataset::load_queries(&queries)?;
    let prompt = std::fs::read_to_string(&system_prompt)
        .with_context(|| format!("reading system prompt {}", system_prompt.display()))?;

    let agent = Arc::new(LlmAgent::new(llm.client(), prompt));
    let outcomes = run_bulk(agent, &queries, &llm.eval_config()).await;

    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    println!(
        "Processed {} queries ({} failed)",
        outcomes.len(),
        failed
    );

    std::fs::create_dir_all(&out_dir)?;
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let out_path = out_dir.join(format!("results_{timestamp}.csv"));
    dataset::write_bulk_outcomes(&out_path, &outcomes)?;
    println!("Saved {} results to {}", outcomes.len(), out_path.display());
    Ok(())
}

/// Ground-truth a trace sample with a stronger model than the judge under
/// calibration; reviewers then spot-check the CSV before it becomes the
/// test set.
async fn label(traces: PathBuf, prompt: PathBuf, out: PathBuf, llm: LlmArgs) -> Result<()> {
    let traces = dataset::load_traces(&traces)?;
    let template = std::fs::read_to_string(&prompt)
        .with_context(|| format!("reading labeling prompt {}", prompt.display()))?;

    let labeler = Arc::new(LlmJudge::new(llm.client(), template));
    let harness = EvalHarness::new(labeler, llm.eval_config());
    let judgments = harness.judge_population(&traces).await;

    let mut labeled = Vec::new();
    let mut skipped = 0usize;
    for (trace, judgment) in traces.iter().zip(&judgments) {
        match judgment.prediction {
            Some(ground_truth) => labeled.push(LabeledTrace {
                trace: trace.clone(),
                ground_truth,
            }),
            None => skipped += 1,
        }
    }

    let passes = labeled.iter().filter(|l| l.ground_truth).count();
    println!(
        "Labeled {} traces ({} PASS, {} FAIL)",
        labeled.len(),
        passes,
        labeled.len() - passes
    );
    if skipped > 0 {
        println!("  Skipped (labeler failed): {skipped}");
    }

    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    dataset::write_labeled_traces(&out, &labeled)?;
    println!("Saved labeled test set to {}", out.display());
    Ok(())
}

async fn calibrate(
    test_set: PathBuf,
    prompt: PathBuf,
    out_dir: PathBuf,
    llm: LlmArgs,
) -> Result<()> {
    let labeled = dataset::load_labeled_traces(&test_set)?;
    let template = std::fs::read_to_string(&prompt)
        .with_context(|| format!("reading judge prompt {}", prompt.display()))?;

    let judge = Arc::new(LlmJudge::new(llm.client(), template));
    let harness = EvalHarness::new(judge, llm.eval_config());
    let report = harness.calibrate(&labeled).await;

    let tpr = report.stats.tpr()?;
    let tnr = report.stats.tnr()?;
    let performance = JudgePerformance {
        true_positive_rate: tpr,
        true_negative_rate: tnr,
        balanced_accuracy: report.stats.balanced_accuracy()?,
        accuracy: report.stats.accuracy()?,
        total_predictions: report.records.len(),
        n_excluded: report.n_excluded,
    };

    println!("Judge performance on test set:");
    println!("  True Positive Rate (TPR): {tpr:.3}");
    println!("  True Negative Rate (TNR): {tnr:.3}");
    println!("  Balanced Accuracy:        {:.3}", performance.balanced_accuracy);
    println!("  Overall Accuracy:         {:.3}", performance.accuracy);
    if report.n_excluded > 0 {
        println!("  Excluded (judge failed):  {}", report.n_excluded);
    }

    print_error_samples(&report);

    std::fs::create_dir_all(&out_dir)?;
    let performance_path = out_dir.join("judge_performance.json");
    std::fs::write(
        &performance_path,
        serde_json::to_string_pretty(&performance)?,
    )?;
    println!("Saved performance metrics to {}", performance_path.display());

    let pairs = CalibrationPairs::from_pairs(&report.pairs());
    let pairs_path = out_dir.join("calibration_pairs.json");
    dataset::save_calibration_pairs(&pairs_path, &pairs)?;
    println!("Saved calibration pairs to {}", pairs_path.display());
    Ok(())
}

/// Show a few misjudged traces so prompt authors can see failure modes.
fn print_error_samples(report: &verdict_evals::CalibrationReport) {
    let false_positives: Vec<_> = report
        .records
        .iter()
        .filter(|r| !r.ground_truth && r.prediction)
        .collect();
    let false_negatives: Vec<_> = report
        .records
        .iter()
        .filter(|r| r.ground_truth && !r.prediction)
        .collect();

    println!("\nError analysis:");
    println!("  False positives: {}", false_positives.len());
    println!("  False negatives: {}", false_negatives.len());

    for record in false_positives.iter().take(3) {
        println!(
            "  FP {}: {}",
            record.trace_id,
            summarize(&record.reasoning)
        );
    }
    for record in false_negatives.iter().take(3) {
        println!(
            "  FN {}: {}",
            record.trace_id,
            summarize(&record.reasoning)
        );
    }
}

fn summarize(reasoning: &str) -> String {
    let trimmed = reasoning.trim();
    if trimmed.is_empty() {
        return "(no reasoning)".to_string();
    }
    let summary: String = trimmed.chars().take(100).collect();
    if trimmed.chars().count() > 100 {
        format!("{summary}...")
    } else {
        summary
    }
}

#[allow(clippy::too_many_arguments)]
async fn evaluate(
    traces: PathBuf,
    calibration: PathBuf,
    prompt: PathBuf,
    out_dir: PathBuf,
    seed: u64,
    resamples: usize,
    confidence: f64,
    llm: LlmArgs,
) -> Result<()> {
    let traces = dataset::load_traces(&traces)?;
    let pairs = dataset::load_calibration_pairs(&calibration)?.pairs()?;
    let template = std::fs::read_to_string(&prompt)
        .with_context(|| format!("reading judge prompt {}", prompt.display()))?;

    println!("Judging {} traces...", traces.len());
    let judge = Arc::new(LlmJudge::new(llm.client(), template));
    let harness = EvalHarness::new(judge, llm.eval_config());

    let estimator = SuccessRateEstimator::new()
        .with_seed(seed)
        .with_resamples(resamples)
        .with_confidence(confidence);
    let report = harness.evaluate(&traces, &pairs, &estimator).await?;

    let corrected = &report.corrected;
    println!("\nFinal results:");
    println!(
        "  Raw observed success rate: {:.3} ({:.1}%)",
        report.raw_observed_rate,
        report.raw_observed_rate * 100.0
    );
    println!(
        "  Corrected success rate:    {:.3} ({:.1}%)",
        corrected.point,
        corrected.point * 100.0
    );
    println!(
        "  {:.0}% confidence interval: [{:.3}, {:.3}]",
        corrected.confidence_level * 100.0,
        corrected.lower,
        corrected.upper
    );
    println!(
        "  Correction applied:        {:.3} percentage points",
        (report.raw_observed_rate - corrected.point).abs() * 100.0
    );
    println!(
        "  Evaluated: {} traces, excluded: {}",
        report.n_evaluated, report.n_excluded
    );
    if corrected.clamped {
        println!("  Note: point estimate was clamped into [0, 1]");
    }

    std::fs::create_dir_all(&out_dir)?;
    let report_path = out_dir.join("final_evaluation.json");
    dataset::save_report(&report_path, &report)?;
    println!("Saved final results to {}", report_path.display());
    Ok(())
}
