//! Window processing: send a clipped request to the model and get the reply.
//!
//! [`WindowProcessor`] is the seam between the engine and whatever turns a
//! [`WindowRequest`] into reply XML. [`LlmProcessor`] is the production
//! implementation on top of `edgequake-llm`; tests plug in scripted fakes.
//!
//! ## Retry Strategy
//!
//! Transient API failures (429, 503, timeouts) are retried with exponential
//! backoff, `retry_backoff_ms * 2^(attempt-1)`: with a 500 ms base and three
//! retries the waits are 500 ms, 1 s and 2 s.

use crate::config::WindowConfig;
use crate::error::{InciseError, WindowError};
use crate::pipeline::group::PageRange;
use crate::pipeline::request::WindowRequest;
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Raw reply for one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowReply {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub retries: u32,
}

impl WindowReply {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            input_tokens: 0,
            output_tokens: 0,
            retries: 0,
        }
    }
}

/// Turns one window request into reply XML.
pub trait WindowProcessor: Send + Sync {
    fn process(
        &self,
        request: &WindowRequest,
    ) -> impl Future<Output = Result<WindowReply, WindowError>> + Send;
}

/// [`WindowProcessor`] backed by an `edgequake-llm` provider.
pub struct LlmProcessor {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_output_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout_secs: u64,
}

impl LlmProcessor {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &WindowConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout_secs: config.api_timeout_secs,
        }
    }

    /// Resolve the provider from `config` and wrap it.
    pub async fn from_config(config: &WindowConfig) -> Result<Self, InciseError> {
        let provider = resolve_provider(config).await?;
        Ok(Self::new(provider, config))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_output_tokens),
            ..Default::default()
        }
    }
}

impl WindowProcessor for LlmProcessor {
    async fn process(&self, request: &WindowRequest) -> Result<WindowReply, WindowError> {
        let range = request.range;
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user(request.to_xml()),
        ];
        let options = self.options();
        let policy = RetryPolicy {
            max_retries: self.max_retries,
            backoff_ms: self.retry_backoff_ms,
            limit: Duration::from_secs(self.api_timeout_secs),
        };

        let (response, retries) = call_with_retry(range, policy, || {
            self.provider.chat(&messages, Some(&options))
        })
        .await?;
        debug!(
            "Window {}: {} input tokens, {} output tokens, {:?}",
            range,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(WindowReply {
            content: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
            retries,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_retries: u32,
    backoff_ms: u64,
    /// Per-attempt deadline.
    limit: Duration,
}

/// Run `call` until it succeeds or the retries are spent.
///
/// Returns the value and the number of retries it took. When every attempt
/// fails the error is [`WindowError::Timeout`] if the last attempt timed out,
/// [`WindowError::LlmFailed`] otherwise.
async fn call_with_retry<T, E, F, Fut>(
    range: PageRange,
    policy: RetryPolicy,
    mut call: F,
) -> Result<(T, u32), WindowError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut last_err: Option<String> = None;
    let mut timed_out = false;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(policy.backoff_ms, attempt);
            warn!(
                "Window {}: retry {}/{} after {}ms",
                range, attempt, policy.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(policy.limit, call()).await {
            Ok(Ok(value)) => return Ok((value, attempt)),
            Ok(Err(e)) => {
                let err_msg = e.to_string();
                warn!("Window {}: attempt {} failed: {}", range, attempt + 1, err_msg);
                last_err = Some(err_msg);
                timed_out = false;
            }
            Err(_) => {
                warn!(
                    "Window {}: attempt {} timed out after {:?}",
                    range,
                    attempt + 1,
                    policy.limit
                );
                timed_out = true;
            }
        }
    }

    if timed_out {
        return Err(WindowError::Timeout {
            range,
            secs: policy.limit.as_secs(),
        });
    }
    Err(WindowError::LlmFailed {
        range,
        retries: policy.max_retries,
        detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
    })
}

/// Delay before retry `attempt` (1-based).
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, InciseError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        InciseError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. `config.provider`, used as-is.
/// 2. `config.provider_name` with `config.model`.
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
/// 4. OpenAI when `OPENAI_API_KEY` is set.
/// 5. Whatever `ProviderFactory::from_env` detects.
pub async fn resolve_provider(config: &WindowConfig) -> Result<Arc<dyn LLMProvider>, InciseError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| InciseError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 2), 1000);
        assert_eq!(backoff_ms(500, 3), 2000);
        assert_eq!(backoff_ms(u64::MAX, 5), u64::MAX);
    }

    fn policy(max_retries: u32, limit_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_ms: 1,
            limit: Duration::from_millis(limit_ms),
        }
    }

    const RANGE: PageRange = PageRange { begin: 2, end: 5 };

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry(RANGE, policy(3, 1000), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("503 Service Unavailable")
                } else {
                    Ok("<response/>")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), ("<response/>", 2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_report_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<((), u32), _> = call_with_retry(RANGE, policy(2, 1000), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("429 attempt {n}")) }
        })
        .await;
        match result {
            Err(WindowError::LlmFailed {
                range,
                retries,
                detail,
            }) => {
                assert_eq!(range, RANGE);
                assert_eq!(retries, 2);
                assert_eq!(detail, "429 attempt 2");
            }
            other => panic!("expected LlmFailed, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn final_timeout_is_reported_as_timeout() {
        let result: Result<((), u32), WindowError> =
            call_with_retry(RANGE, policy(1, 10), || async {
                sleep(Duration::from_millis(200)).await;
                Err::<(), &str>("never reached")
            })
            .await;
        assert!(matches!(result, Err(WindowError::Timeout { range: RANGE, .. })));
    }

    #[tokio::test]
    async fn error_after_timeout_is_a_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<((), u32), WindowError> =
            call_with_retry(RANGE, policy(1, 10), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        sleep(Duration::from_millis(200)).await;
                    }
                    Err::<(), &str>("bad gateway")
                }
            })
            .await;
        assert!(matches!(result, Err(WindowError::LlmFailed { .. })));
    }

    #[test]
    fn reply_defaults() {
        let r = WindowReply::new("<response/>");
        assert_eq!(r.content, "<response/>");
        assert_eq!((r.input_tokens, r.output_tokens, r.retries), (0, 0, 0));
    }
}
