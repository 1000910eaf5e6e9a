//! The `ChatCompleter` capability: the single seam between the pipeline
//! and any LLM provider.
//!
//! Provider SDKs live outside the core. The pipeline invokes completions
//! through [`complete_with_retry`], which applies a per-call timeout and
//! bounded retries with exponential backoff plus jitter. Stage code never
//! holds a lock across these calls.

pub mod json_extract;

pub use json_extract::extract_first_json_object;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use rand::Rng;
use thiserror::Error;
use tracing::warn;

/// A single chat message.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// `system`, `user`, or `assistant`.
    pub role: &'static str,
    /// Message content.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    /// A user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// A completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    /// Provider-specific model override.
    pub model: Option<String>,
}

/// Errors raised by completion backends and the retry wrapper.
#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    /// The provider returned an error.
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(veritas::llm::provider))]
    Provider {
        /// Provider name.
        provider: &'static str,
        /// Provider message.
        message: String,
    },

    /// The per-call timeout elapsed.
    #[error("llm call timed out after {0:?}")]
    #[diagnostic(code(veritas::llm::timeout))]
    Timeout(Duration),

    /// Retries exhausted; the last error is attached.
    #[error("llm retries exhausted after {attempts} attempts: {last}")]
    #[diagnostic(code(veritas::llm::retries_exhausted))]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Final error.
        last: Box<LlmError>,
    },
}

/// The completion capability.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    /// Produce a completion for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] when the provider fails.
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;
}

/// Retry policy for completion calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Maximum attempts (1 = no retries).
    pub max_attempts: u32,
    /// Base backoff delay; attempt `n` waits `base * 2^n` plus jitter.
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            base_backoff: Duration::from_millis(250),
        }
    }
}

/// Invoke `completer` under the retry policy.
///
/// # Errors
///
/// Returns [`LlmError::RetriesExhausted`] wrapping the last failure once
/// the attempt budget is spent.
pub async fn complete_with_retry(
    completer: &Arc<dyn ChatCompleter>,
    request: &ChatRequest,
    policy: RetryPolicy,
) -> Result<String, LlmError> {
    let attempts = policy.max_attempts.max(1);
    let mut last: Option<LlmError> = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let exp = policy.base_backoff.saturating_mul(1 << (attempt - 1));
            let jitter_ms = rand::rng().random_range(0..=exp.as_millis().max(1) as u64 / 2);
            tokio::time::sleep(exp + Duration::from_millis(jitter_ms)).await;
        }

        match tokio::time::timeout(policy.timeout, completer.complete(request)).await {
            Ok(Ok(text)) => return Ok(text),
            Ok(Err(err)) => {
                warn!(attempt, error = %err, "llm attempt failed");
                last = Some(err);
            }
            Err(_) => {
                warn!(attempt, timeout = ?policy.timeout, "llm attempt timed out");
                last = Some(LlmError::Timeout(policy.timeout));
            }
        }
    }

    Err(LlmError::RetriesExhausted {
        attempts,
        last: Box::new(last.unwrap_or(LlmError::Timeout(policy.timeout))),
    })
}

/// Scripted completer for tests and wiring checks.
///
/// Pops responses front-to-back; when the script is exhausted it repeats
/// the final entry. An `Err` entry simulates a provider failure.
#[derive(Default)]
pub struct ScriptedCompleter {
    responses: parking_lot::Mutex<Vec<Result<String, String>>>,
}

impl ScriptedCompleter {
    /// A completer that always returns `text`.
    #[must_use]
    pub fn always(text: impl Into<String>) -> Self {
        Self {
            responses: parking_lot::Mutex::new(vec![Ok(text.into())]),
        }
    }

    /// A completer that replays `responses` in order.
    #[must_use]
    pub fn script(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses: parking_lot::Mutex::new(responses),
        }
    }

    /// A completer that always fails.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            responses: parking_lot::Mutex::new(vec![Err(message.into())]),
        }
    }
}

#[async_trait]
impl ChatCompleter for ScriptedCompleter {
    async fn complete(&self, _request: &ChatRequest) -> Result<String, LlmError> {
        let mut responses = self.responses.lock();
        let next = if responses.len() > 1 {
            responses.remove(0)
        } else {
            responses.first().cloned().unwrap_or(Err("empty script".to_string()))
        };
        next.map_err(|message| LlmError::Provider {
            provider: "scripted",
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_replays_then_repeats() {
        let completer: Arc<dyn ChatCompleter> = Arc::new(ScriptedCompleter::script(vec![
            Ok("first".into()),
            Ok("second".into()),
        ]));
        let req = ChatRequest::default();
        assert_eq!(completer.complete(&req).await.unwrap(), "first");
        assert_eq!(completer.complete(&req).await.unwrap(), "second");
        assert_eq!(completer.complete(&req).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failure() {
        let completer: Arc<dyn ChatCompleter> = Arc::new(ScriptedCompleter::script(vec![
            Err("hiccup".into()),
            Ok("recovered".into()),
        ]));
        let policy = RetryPolicy {
            timeout: Duration::from_secs(1),
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
        };
        let out = complete_with_retry(&completer, &ChatRequest::default(), policy)
            .await
            .unwrap();
        assert_eq!(out, "recovered");
    }

    #[tokio::test]
    async fn retry_budget_exhausts() {
        let completer: Arc<dyn ChatCompleter> = Arc::new(ScriptedCompleter::failing("down"));
        let policy = RetryPolicy {
            timeout: Duration::from_secs(1),
            max_attempts: 2,
            base_backoff: Duration::from_millis(1),
        };
        let err = complete_with_retry(&completer, &ChatRequest::default(), policy)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 2, .. }));
    }
}
