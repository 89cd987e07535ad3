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

//! Agent-under-test boundary
//!
//! The agent takes the full conversation history and returns the updated
//! history with its reply appended. The chat server proxies this contract
//! over HTTP; the bulk runner calls it directly.

use crate::llm_client::{LLMClient, LLMError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// A single message in a conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the sender: "system", "user", or "assistant"
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Errors from the agent under test
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("conversation history is empty")]
    EmptyHistory,

    #[error("LLM client error: {0}")]
    Llm(#[from] LLMError),
}

/// The conversational agent being evaluated.
///
/// Treated as an opaque collaborator by the harness: it may be slow and it
/// may fail, and a failure for one query must not abort a batch.
#[async_trait]
pub trait ChatAgent: Send + Sync {
    /// Produce the updated history with the assistant reply appended.
    async fn respond(&self, history: &[ChatMessage]) -> Result<Vec<ChatMessage>, AgentError>;
}

/// LLM-backed agent with a fixed system prompt
pub struct LlmAgent {
    client: Arc<dyn LLMClient>,
    system_prompt: String,
}

impl LlmAgent {
    pub fn new(client: Arc<dyn LLMClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            client,
            system_prompt: system_prompt.into(),
        }
    }
}

#[async_trait]
impl ChatAgent for LlmAgent {
    async fn respond(&self, history: &[ChatMessage]) -> Result<Vec<ChatMessage>, AgentError> {
        if history.is_empty() {
            return Err(AgentError::EmptyHistory);
        }

        let mut messages: Vec<ChatMessage> = Vec::with_capacity(history.len() + 2);
        if history[0].role != "system" {
            messages.push(ChatMessage::system(self.system_prompt.clone()));
        }
        messages.extend_from_slice(history);

        let response = self.client.chat(&messages).await?;
        messages.push(ChatMessage::assistant(response.content));
        Ok(messages)
    }
}
