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

//! Chat backend for the agent under test
//!
//! A deliberately thin HTTP boundary: `POST /chat` proxies the full
//! conversation history to the agent and returns the updated history with
//! the reply appended; `GET /` serves the static chat page. Agent failures
//! surface as a generic 500 with the error message as detail.

pub mod config;

use axum::{
    extract::State,
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use verdict_evals::{ChatAgent, ChatMessage, LlmAgent, OpenAIClient};

use anyhow::Result;
use config::ServerConfig;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<dyn ChatAgent>,
    pub static_dir: PathBuf,
}

/// Incoming chat payload: the entire conversation history
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

/// Updated conversation history returned to the front-end
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub messages: Vec<ChatMessage>,
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "verdict_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Verdict chat server");
    config.validate()?;

    let api_key = config.resolved_api_key()?;
    let mut client = OpenAIClient::new(api_key, config.agent.model.clone());
    if let Some(base_url) = &config.agent.base_url {
        client = client.with_base_url(base_url.clone());
    }
    let agent = Arc::new(LlmAgent::new(
        Arc::new(client),
        config.agent.system_prompt.clone(),
    ));

    let state = AppState {
        agent,
        static_dir: config.server.static_dir.clone(),
    };
    let app = build_router(state, config.server.enable_cors);

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr).await?;
    tracing::info!("Listening on {}", config.server.listen_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the router; separated from [`run_server`] so tests can drive it
/// with a stub agent.
pub fn build_router(state: AppState, enable_cors: bool) -> Router {
    let mut router = Router::new()
        .route("/chat", post(chat_endpoint))
        .route("/", get(index))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

/// Main conversational endpoint: proxy the message list to the agent and
/// return the updated list.
async fn chat_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    let updated = state
        .agent
        .respond(&payload.messages)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "agent invocation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    Ok(Json(ChatResponse { messages: updated }))
}

/// Serve the chat UI.
async fn index(State(state): State<AppState>) -> Result<Html<String>, (StatusCode, String)> {
    let html_path = state.static_dir.join("index.html");
    match tokio::fs::read_to_string(&html_path).await {
        Ok(contents) => Ok(Html(contents)),
        Err(_) => Err((
            StatusCode::NOT_FOUND,
            "Frontend not found. Did you forget to build it?".to_string(),
        )),
    }
}
