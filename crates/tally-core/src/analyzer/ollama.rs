//! Ollama analyzer backend
//!
//! HTTP client for the Ollama API. The model is asked to answer with a single
//! JSON object matching the raw-candidate field names; anything around the
//! object (markdown fences, chatter) is stripped before parsing.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{Payload, RawCandidate, SourceKind};

use super::AnalyzerBackend;

pub struct OllamaAnalyzer {
    http_client: Client,
    base_url: String,
    model: String,
}

impl Clone for OllamaAnalyzer {
    fn clone(&self) -> Self {
        Self {
            http_client: self.http_client.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
        }
    }
}

impl OllamaAnalyzer {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// Create from environment variables (`OLLAMA_HOST`, `OLLAMA_MODEL`).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OLLAMA_HOST").ok()?;
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.2".to_string());
        Some(Self::new(&host, &model))
    }

    fn prompt(app: &str, kind: SourceKind, payload: &Payload) -> String {
        format!(
            concat!(
                "You extract financial transactions from captured app messages.\n",
                "Source app: {app}\n",
                "Capture channel: {kind}\n",
                "Message:\n{payload}\n\n",
                "If the message describes a money movement, answer with exactly one JSON object:\n",
                "{{\"kind\": \"expense|income|transfer\", \"money\": \"<amount>\", \"currency\": \"<code or empty>\", ",
                "\"time\": \"<epoch seconds or millis, empty if unknown>\", \"counterparty\": \"<merchant or payee>\", ",
                "\"account_from\": \"<paying account or empty>\", \"account_to\": \"<receiving account or empty>\", ",
                "\"channel\": \"<payment channel label>\"}}\n",
                "If it does not describe a money movement, answer with the word NONE."
            ),
            app = app,
            kind = kind.as_str(),
            payload = payload.as_text(),
        )
    }
}

/// Request to Ollama API
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
}

/// Response from Ollama API
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// Pull the first JSON object out of a model response and parse it as a
/// candidate. Returns None when the model declined or the object carries no
/// amount.
fn parse_candidate(response: &str) -> Option<RawCandidate> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }
    let candidate: RawCandidate = serde_json::from_str(&response[start..=end]).ok()?;
    match candidate.money.as_deref() {
        Some(m) if !m.trim().is_empty() => Some(candidate),
        _ => None,
    }
}

#[async_trait]
impl AnalyzerBackend for OllamaAnalyzer {
    async fn extract(
        &self,
        app: &str,
        kind: SourceKind,
        payload: &Payload,
    ) -> Result<Option<RawCandidate>> {
        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: Self::prompt(app, kind, payload),
            stream: false,
        };

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Http(response.error_for_status().unwrap_err()));
        }

        let ollama_response: OllamaResponse = response.json().await?;
        debug!(model = %self.model, "analyzer response: {}", ollama_response.response);

        Ok(parse_candidate(&ollama_response.response))
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}
