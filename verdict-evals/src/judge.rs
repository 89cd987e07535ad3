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

//! LLM-as-judge boundary
//!
//! The judge is an opaque binary classifier over traces. Model replies are
//! free text, so the fragile work of digging a JSON verdict out of them is
//! isolated in one adapter here; the rest of the crate only ever sees a
//! typed [`JudgeVerdict`] or a typed failure. A reply that cannot be parsed
//! is an error, never a silent FAIL, because silently folding failures into
//! the negative class would bias the corrected rate.

use crate::llm_client::{LLMClient, LLMError};
use crate::Trace;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Prompt placeholders the judge template must contain
pub const QUERY_PLACEHOLDER: &str = "__QUERY__";
pub const CRITERION_PLACEHOLDER: &str = "__CRITERION__";
pub const RESPONSE_PLACEHOLDER: &str = "__RESPONSE__";

/// Typed verdict from the judge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeVerdict {
    /// True when the judge labels the trace PASS
    pub label: bool,
    pub reasoning: String,
}

/// Errors from judge invocation
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("LLM client error: {0}")]
    Llm(#[from] LLMError),

    #[error("no JSON verdict found in judge reply: {0}")]
    UnparseableVerdict(String),

    #[error("judge returned label {0:?}; expected PASS or FAIL")]
    UnknownLabel(String),
}

/// Binary classifier over traces, typically an LLM
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, trace: &Trace) -> Result<JudgeVerdict, JudgeError>;

    /// Identifier for logs and reports
    fn id(&self) -> &str;
}

/// LLM-backed judge driven by a prompt template.
///
/// The template carries `__QUERY__`, `__CRITERION__`, and `__RESPONSE__`
/// placeholders and must instruct the model to answer with a JSON object
/// holding `label` ("PASS"/"FAIL") and `reasoning`.
pub struct LlmJudge {
    client: Arc<dyn LLMClient>,
    prompt_template: String,
    id: String,
}

impl LlmJudge {
    pub fn new(client: Arc<dyn LLMClient>, prompt_template: impl Into<String>) -> Self {
        let id = format!("llm_judge/{}", client.model_name());
        Self {
            client,
            prompt_template: prompt_template.into(),
            id,
        }
    }

    fn render_prompt(&self, trace: &Trace) -> String {
        self.prompt_template
            .replace(QUERY_PLACEHOLDER, &trace.query)
            .replace(CRITERION_PLACEHOLDER, &trace.criterion)
            .replace(RESPONSE_PLACEHOLDER, &trace.response)
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge(&self, trace: &Trace) -> Result<JudgeVerdict, JudgeError> {
        let prompt = self.render_prompt(trace);
        let response = self.client.evaluate(prompt).await?;
        parse_verdict(&response.content)
    }

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Deserialize)]
struct RawVerdict {
    label: String,
    #[serde(default)]
    reasoning: String,
}

/// Parse a judge reply into a typed verdict.
pub fn parse_verdict(content: &str) -> Result<JudgeVerdict, JudgeError> {
    let json_text = extract_json(content)
        .ok_or_else(|| JudgeError::UnparseableVerdict(truncate(content, 200)))?;

    let raw: RawVerdict = serde_json::from_str(&json_text)
        .map_err(|_| JudgeError::UnparseableVerdict(truncate(content, 200)))?;

    let label = match raw.label.trim().to_uppercase().as_str() {
        "PASS" => true,
        "FAIL" => false,
        other => return Err(JudgeError::UnknownLabel(other.to_string())),
    };

    Ok(JudgeVerdict {
        label,
        reasoning: raw.reasoning,
    })
}

/// Extract a JSON object from the formats LLMs actually reply with:
/// a ```json fenced block, a bare fenced block, or a raw object embedded
/// in prose.
fn extract_json(content: &str) -> Option<String> {
    if let Some(start) = content.find("```json") {
        let after_marker = &content[start + 7..];
        if let Some(end) = after_marker.find("```") {
            let candidate = after_marker[..end].trim();
            if candidate.contains('{') {
                return Some(candidate.to_string());
            }
        }
    }

    if let Some(start) = content.find("```") {
        let after_marker = &content[start + 3..];
        if let Some(end) = after_marker.find("```") {
            let block = after_marker[..end].trim();
            // Skip a language identifier line if present.
            let candidate = match block.find('\n') {
                Some(newline) if !block[..newline].contains('{') => block[newline..].trim(),
                _ => block,
            };
            if candidate.contains('{') {
                return Some(candidate.to_string());
            }
        }
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end > start {
        return Some(content[start..=end].to_string());
    }

    None
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}
