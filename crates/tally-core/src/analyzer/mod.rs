//! Analyzer fallback abstraction
//!
//! When no rule matches a payload, the pipeline hands it to an analyzer: a
//! local LLM asked to extract the same structured fields a rule would. The
//! analyzer is an external collaborator: it may be slow, it may time out, and
//! every failure is treated as "no match" (fail open). It is never called
//! while the per-fingerprint merge lock is held.
//!
//! # Architecture
//!
//! - `AnalyzerBackend` trait: the extraction interface
//! - `AnalyzerClient` enum: concrete wrapper providing Clone + compile-time
//!   dispatch
//! - Backend implementations: `OllamaAnalyzer`, `MockAnalyzer`
//!
//! # Configuration
//!
//! Environment variables:
//! - `ANALYZER_BACKEND`: Backend to use (ollama, mock). Default: ollama
//! - `OLLAMA_HOST`: Ollama server URL (required for ollama backend)
//! - `OLLAMA_MODEL`: Model name (default: llama3.2)

mod mock;
mod ollama;

pub use mock::MockAnalyzer;
pub use ollama::OllamaAnalyzer;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Payload, RawCandidate, SourceKind};

/// Trait defining the analyzer extraction interface.
#[async_trait]
pub trait AnalyzerBackend: Send + Sync {
    /// Try to extract a candidate from a payload no rule matched.
    /// `Ok(None)` means the analyzer saw no transaction in the payload.
    async fn extract(
        &self,
        app: &str,
        kind: SourceKind,
        payload: &Payload,
    ) -> Result<Option<RawCandidate>>;

    /// Check if the backend is reachable.
    async fn health_check(&self) -> bool;

    /// Model name (for labeling analyzer-produced candidates).
    fn model(&self) -> &str;

    /// Host URL (for logging).
    fn host(&self) -> &str;
}

/// Concrete analyzer client enum.
///
/// Provides Clone and compile-time dispatch without Box<dyn> overhead.
#[derive(Clone)]
pub enum AnalyzerClient {
    Ollama(OllamaAnalyzer),
    Mock(MockAnalyzer),
}

impl AnalyzerClient {
    /// Create an analyzer client from environment variables.
    ///
    /// Returns None if the required variables are not set; the pipeline then
    /// runs rules-only and archives unmatched events.
    pub fn from_env() -> Option<Self> {
        let backend = std::env::var("ANALYZER_BACKEND").unwrap_or_else(|_| "ollama".to_string());
        match backend.to_lowercase().as_str() {
            "ollama" => OllamaAnalyzer::from_env().map(AnalyzerClient::Ollama),
            "mock" => Some(AnalyzerClient::Mock(MockAnalyzer::empty())),
            _ => {
                tracing::warn!(backend = %backend, "Unknown ANALYZER_BACKEND, falling back to ollama");
                OllamaAnalyzer::from_env().map(AnalyzerClient::Ollama)
            }
        }
    }

    /// Create an Ollama backend directly.
    pub fn ollama(host: &str, model: &str) -> Self {
        AnalyzerClient::Ollama(OllamaAnalyzer::new(host, model))
    }

    /// Create a mock backend for testing.
    pub fn mock(analyzer: MockAnalyzer) -> Self {
        AnalyzerClient::Mock(analyzer)
    }
}

#[async_trait]
impl AnalyzerBackend for AnalyzerClient {
    async fn extract(
        &self,
        app: &str,
        kind: SourceKind,
        payload: &Payload,
    ) -> Result<Option<RawCandidate>> {
        match self {
            AnalyzerClient::Ollama(b) => b.extract(app, kind, payload).await,
            AnalyzerClient::Mock(b) => b.extract(app, kind, payload).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            AnalyzerClient::Ollama(b) => b.health_check().await,
            AnalyzerClient::Mock(b) => b.health_check().await,
        }
    }

    fn model(&self) -> &str {
        match self {
            AnalyzerClient::Ollama(b) => b.model(),
            AnalyzerClient::Mock(b) => b.model(),
        }
    }

    fn host(&self) -> &str {
        match self {
            AnalyzerClient::Ollama(b) => b.host(),
            AnalyzerClient::Mock(b) => b.host(),
        }
    }
}
