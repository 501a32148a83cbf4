//! Configuration for windowed conversion runs.
//!
//! Every knob lives in [`WindowConfig`], built through
//! [`WindowConfigBuilder`]. Setters clamp obviously out-of-range values; the
//! cross-field budget checks happen once in [`WindowConfigBuilder::build`],
//! before any unit is read.

use crate::error::InciseError;
use crate::pipeline::group::Budget;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Configuration for one conversion run.
///
/// # Example
/// ```rust
/// use edgequake_incise::WindowConfig;
///
/// let config = WindowConfig::builder()
///     .max_tokens(4000)
///     .gap_rate(0.2)
///     .model("gpt-4.1-nano")
///     .build()
///     .unwrap();
/// assert_eq!(config.budget().unwrap().head, 800);
/// ```
#[derive(Clone)]
pub struct WindowConfig {
    /// Token budget of one window request (head + body + tail). Default: 8000.
    pub max_tokens: usize,

    /// Share of `max_tokens` reserved for look-back context. Default: 0.15.
    pub gap_rate: f64,

    /// Look-ahead ceiling as a share of the look-back ceiling. Default: 0.5.
    pub tail_rate: f64,

    /// Ceiling for atomic segments. `None` uses the body ceiling.
    pub segment_max_tokens: Option<usize>,

    pub model: Option<String>,

    /// Provider name passed to `ProviderFactory` (`openai`, `anthropic`, ...).
    pub provider_name: Option<String>,

    /// Pre-built provider; takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Completion token limit per window. Default: 4096.
    pub max_output_tokens: usize,

    /// Retries per window after the first attempt. Default: 3.
    pub max_retries: u32,

    /// Base backoff; doubled on every retry. Default: 500 ms.
    pub retry_backoff_ms: u64,

    /// Per-call timeout. Default: 120 s.
    pub api_timeout_secs: u64,

    /// Replaces [`crate::prompts::DEFAULT_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// Where window replies are persisted for resume. `None` disables it.
    pub checkpoint_dir: Option<PathBuf>,

    pub progress_callback: Option<ProgressCallback>,

    /// Checked between windows; raising it stops the run with
    /// [`InciseError::Aborted`].
    pub abort: Option<Arc<AtomicBool>>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_tokens: 8000,
            gap_rate: 0.15,
            tail_rate: 0.5,
            segment_max_tokens: None,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_output_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            system_prompt: None,
            checkpoint_dir: None,
            progress_callback: None,
            abort: None,
        }
    }
}

impl fmt::Debug for WindowConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowConfig")
            .field("max_tokens", &self.max_tokens)
            .field("gap_rate", &self.gap_rate)
            .field("tail_rate", &self.tail_rate)
            .field("segment_max_tokens", &self.segment_max_tokens)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("checkpoint_dir", &self.checkpoint_dir)
            .finish()
    }
}

impl WindowConfig {
    pub fn builder() -> WindowConfigBuilder {
        WindowConfigBuilder {
            config: Self::default(),
        }
    }

    /// Window ceilings derived from `max_tokens`, `gap_rate` and `tail_rate`.
    pub fn budget(&self) -> Result<Budget, InciseError> {
        Budget::new(self.max_tokens, self.gap_rate, self.tail_rate)
    }

    /// Ceiling handed to the segment builder.
    pub fn segment_ceiling(&self) -> Result<usize, InciseError> {
        match self.segment_max_tokens {
            Some(n) => Ok(n),
            None => Ok(self.budget()?.body),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.abort
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

#[derive(Debug)]
pub struct WindowConfigBuilder {
    config: WindowConfig,
}

impl WindowConfigBuilder {
    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn gap_rate(mut self, rate: f64) -> Self {
        self.config.gap_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn tail_rate(mut self, rate: f64) -> Self {
        self.config.tail_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn segment_max_tokens(mut self, n: usize) -> Self {
        self.config.segment_max_tokens = Some(n.max(1));
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: usize) -> Self {
        self.config.max_output_tokens = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.checkpoint_dir = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn abort_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.config.abort = Some(flag);
        self
    }

    pub fn build(self) -> Result<WindowConfig, InciseError> {
        self.config.budget()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = WindowConfig::default();
        assert_eq!(c.max_tokens, 8000);
        assert_eq!(c.max_retries, 3);
        let b = c.budget().unwrap();
        assert_eq!((b.head, b.tail, b.body), (1200, 600, 6200));
        assert_eq!(c.segment_ceiling().unwrap(), 6200);
    }

    #[test]
    fn setters_clamp() {
        let c = WindowConfig::builder()
            .gap_rate(3.0)
            .tail_rate(-1.0)
            .temperature(9.0)
            .api_timeout_secs(0)
            .config;
        assert_eq!(c.gap_rate, 1.0);
        assert_eq!(c.tail_rate, 0.0);
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.api_timeout_secs, 1);
    }

    #[test]
    fn build_rejects_empty_body() {
        let err = WindowConfig::builder().gap_rate(1.0).tail_rate(0.0).build();
        assert!(matches!(err, Err(InciseError::InvalidConfig(_))));
        let err = WindowConfig::builder().max_tokens(0).build();
        assert!(err.is_err());
    }

    #[test]
    fn explicit_segment_ceiling_wins() {
        let c = WindowConfig::builder().segment_max_tokens(300).build().unwrap();
        assert_eq!(c.segment_ceiling().unwrap(), 300);
    }

    #[test]
    fn abort_flag_is_observed() {
        let flag = Arc::new(AtomicBool::new(false));
        let c = WindowConfig::builder().abort_flag(flag.clone()).build().unwrap();
        assert!(!c.is_aborted());
        flag.store(true, Ordering::Relaxed);
        assert!(c.is_aborted());
    }

    #[test]
    fn debug_hides_provider() {
        let s = format!("{:?}", WindowConfig::default());
        assert!(s.contains("max_tokens"));
        assert!(s.contains("provider"));
    }
}
