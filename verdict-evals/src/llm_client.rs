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

//! LLM client abstraction shared by the judge and the agent under test

use crate::agent::ChatMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Trait for hosted LLM chat APIs
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Send a conversation and get the assistant reply
    async fn chat(&self, messages: &[ChatMessage]) -> Result<LLMResponse, LLMError>;

    /// Send a single evaluation prompt.
    /// Default implementation wraps the prompt as one user message.
    async fn evaluate(&self, prompt: String) -> Result<LLMResponse, LLMError> {
        self.chat(&[ChatMessage {
            role: "user".to_string(),
            content: prompt,
        }])
        .await
    }

    /// Get model name
    fn model_name(&self) -> &str;
}

/// Response from an LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub model: String,
}

/// Errors from LLM clients
#[derive(Debug, Error)]
pub enum LLMError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// OpenAI-compatible chat completions client
pub struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    temperature: f64,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.0,
            client: reqwest::Client::new(),
        }
    }

    /// Point at a compatible endpoint (proxy, local server, test mock).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<LLMResponse, LLMError> {
        let request = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(LLMError::RateLimitExceeded);
            }
            return Err(LLMError::ApiError(error_text));
        }

        let response_data: serde_json::Value = response.json().await?;

        let content = response_data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or(LLMError::InvalidResponse("Missing content".to_string()))?
            .to_string();

        Ok(LLMResponse {
            content,
            model: self.model.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_message(content: &str) -> ChatMessage {
        ChatMessage {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_chat_parses_assistant_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": "hello"}}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client =
            OpenAIClient::new("test-key".to_string(), "gpt-4o-mini".to_string())
                .with_base_url(server.url());
        let response = client.chat(&[user_message("hi")]).await.unwrap();

        assert_eq!(response.content, "hello");
        assert_eq!(response.model, "gpt-4o-mini");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_throttling_maps_to_rate_limit_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;

        let client = OpenAIClient::new("test-key".to_string(), "gpt-4o-mini".to_string())
            .with_base_url(server.url());
        let err = client.chat(&[user_message("hi")]).await.unwrap_err();

        assert!(matches!(err, LLMError::RateLimitExceeded));
    }

    #[tokio::test]
    async fn test_missing_content_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(serde_json::json!({"choices": []}).to_string())
            .create_async()
            .await;

        let client = OpenAIClient::new("test-key".to_string(), "gpt-4o-mini".to_string())
            .with_base_url(server.url());
        let err = client.chat(&[user_message("hi")]).await.unwrap_err();

        assert!(matches!(err, LLMError::InvalidResponse(_)));
    }
}
