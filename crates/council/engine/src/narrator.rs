//! Narrative generation: the offline template narrator and the client
//! wrapper that adds response caching, per-call timeouts, and retries.

use crate::cache::{prompt_key, ResponseCache};
use crate::config::{DeliberationConfig, RetryPolicy};
use crate::external::{NarrativeGenerator, ParticipantContext};
use async_trait::async_trait;
use council_types::{ExternalError, ExternalResult};
use std::sync::Arc;
use std::time::Duration;

const STANCES: &[&str] = &[
    "we should prioritize resident safety and coordinate volunteers on the ground.",
    "I support allocating budget for immediate repairs to the affected infrastructure.",
    "let's notify residents early and commit to a clear timeline.",
    "we need to protect water quality and the green spaces nearby.",
    "I agree we must reroute traffic and keep transit running.",
    "local community groups should lead outreach so nobody is left out.",
];

/// Deterministic narrator used when no language model is configured
///
/// The same prompt and speaker always yield the same text.
#[derive(Debug, Default, Clone)]
pub struct TemplateNarrator;

#[async_trait]
impl NarrativeGenerator for TemplateNarrator {
    async fn generate(&self, prompt: &str, context: &ParticipantContext) -> ExternalResult<String> {
        let headline = prompt
            .lines()
            .find_map(|line| line.strip_prefix("Event: "))
            .unwrap_or("the situation");
        let digest = blake3::hash(format!("{}\0{}", context.participant_id, prompt).as_bytes());
        let stance = STANCES[digest.as_bytes()[0] as usize % STANCES.len()];
        let speaker = match &context.persona {
            Some(persona) => format!("{} ({})", context.display_name, persona),
            None => context.display_name.clone(),
        };
        Ok(format!("{} on {}: {}", speaker, headline, stance))
    }
}

/// Narrative calls with caching, timeout, and retry
pub struct NarrativeClient {
    generator: Arc<dyn NarrativeGenerator>,
    cache: Arc<ResponseCache>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl NarrativeClient {
    pub fn new(
        generator: Arc<dyn NarrativeGenerator>,
        cache: Arc<ResponseCache>,
        config: &DeliberationConfig,
    ) -> Self {
        Self {
            generator,
            cache,
            timeout: config.call_timeout(),
            retry: config.retry.clone(),
        }
    }

    /// Generate text for `prompt`, serving repeats from the response cache
    ///
    /// Each attempt runs under the per-call timeout. The last failure is
    /// returned once retries are exhausted; the caller picks the fallback.
    pub async fn generate(&self, prompt: &str, context: &ParticipantContext) -> ExternalResult<String> {
        let key = prompt_key(prompt);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(
                self.timeout,
                self.generator.generate(prompt, context),
            )
            .await
            {
                Ok(Ok(text)) if !text.trim().is_empty() => Ok(text.trim().to_string()),
                Ok(Ok(_)) => Err(ExternalError::InvalidResponse("empty narrative".into())),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(ExternalError::Timeout(self.timeout.as_millis() as u64)),
            };

            match outcome {
                Ok(text) => {
                    self.cache.put(key, text.clone());
                    return Ok(text);
                }
                Err(err) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    tracing::debug!(
                        participant = %context.participant_id,
                        attempt,
                        error = %err,
                        "Narrative call failed, retrying"
                    );
                    tokio::time::sleep(self.retry.delay_for(attempt)).await;
                }
                Err(err) => {
                    tracing::warn!(
                        participant = %context.participant_id,
                        attempts = attempt + 1,
                        error = %err,
                        "Narrative call failed"
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Generate text, substituting `fallback` on failure
    pub async fn generate_or(
        &self,
        prompt: &str,
        context: &ParticipantContext,
        fallback: impl FnOnce() -> String,
    ) -> String {
        match self.generate(prompt, context).await {
            Ok(text) => text,
            Err(_) => fallback(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use council_types::ParticipantId;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl NarrativeGenerator for Flaky {
        async fn generate(&self, _prompt: &str, _context: &ParticipantContext) -> ExternalResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(ExternalError::Unavailable("busy".into()));
            }
            Ok("  fine  ".into())
        }
    }

    struct Stalled;

    #[async_trait]
    impl NarrativeGenerator for Stalled {
        async fn generate(&self, _prompt: &str, _context: &ParticipantContext) -> ExternalResult<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("late".into())
        }
    }

    fn client(generator: Arc<dyn NarrativeGenerator>, max_retries: u32) -> NarrativeClient {
        let mut config = DeliberationConfig::default();
        config.call_timeout_ms = 1_000;
        config.retry = RetryPolicy {
            max_retries,
            backoff_ms: 10,
            exponential_backoff: false,
        };
        let cache = Arc::new(ResponseCache::new("response", Duration::from_secs(1800)));
        NarrativeClient::new(generator, cache, &config)
    }

    fn ctx() -> ParticipantContext {
        ParticipantContext::anonymous(ParticipantId::new("a"))
    }

    #[tokio::test]
    async fn test_template_is_deterministic() {
        let narrator = TemplateNarrator;
        let prompt = "Event: Flood downtown\nSpeak.";
        let a = narrator.generate(prompt, &ctx()).await.unwrap();
        let b = narrator.generate(prompt, &ctx()).await.unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("a on Flood downtown: "));
    }

    #[tokio::test]
    async fn test_retry_then_cache() {
        let flaky = Arc::new(Flaky {
            failures_left: AtomicU32::new(1),
            calls: AtomicU32::new(0),
        });
        let client = client(flaky.clone(), 1);

        assert_eq!(client.generate("p", &ctx()).await.unwrap(), "fine");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);

        assert_eq!(client.generate("p", &ctx()).await.unwrap(), "fine");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_use_fallback() {
        let flaky = Arc::new(Flaky {
            failures_left: AtomicU32::new(5),
            calls: AtomicU32::new(0),
        });
        let client = client(flaky.clone(), 2);
        let text = client
            .generate_or("p", &ctx(), || "fallback".to_string())
            .await;
        assert_eq!(text, "fallback");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported() {
        let client = client(Arc::new(Stalled), 0);
        let err = client.generate("p", &ctx()).await.unwrap_err();
        assert_eq!(err, ExternalError::Timeout(1_000));
    }
}
