//! Mock analyzer for testing
//!
//! Returns a canned candidate (or nothing) after an optional delay, so tests
//! can exercise the fallback path and its timeout handling without a running
//! LLM server.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Payload, RawCandidate, SourceKind};

use super::AnalyzerBackend;

#[derive(Clone, Default)]
pub struct MockAnalyzer {
    response: Option<RawCandidate>,
    delay: Option<Duration>,
    healthy: bool,
}

impl MockAnalyzer {
    /// Mock that extracts the given candidate from every payload.
    pub fn returning(candidate: RawCandidate) -> Self {
        Self {
            response: Some(candidate),
            delay: None,
            healthy: true,
        }
    }

    /// Mock that never sees a transaction.
    pub fn empty() -> Self {
        Self {
            response: None,
            delay: None,
            healthy: true,
        }
    }

    /// Delay every extraction, for timeout tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl AnalyzerBackend for MockAnalyzer {
    async fn extract(
        &self,
        _app: &str,
        _kind: SourceKind,
        _payload: &Payload,
    ) -> Result<Option<RawCandidate>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.response.clone())
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn host(&self) -> &str {
        "mock://analyzer"
    }
}
