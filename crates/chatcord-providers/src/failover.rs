//! Failover dispatch across a model's provider list.
//!
//! Providers are tried in registry order. The first one that answers is
//! promoted to the front for that model, so currently reachable backends
//! are tried first on later calls. If every provider fails, the caller gets
//! a formatted message embedding the last error instead of an `Err`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use chatcord_core::types::ChatMessage;

use crate::registry::ProviderRegistry;
use crate::traits::{LlmRequestConfig, ProviderHandle};

/// Result of one dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A provider answered.
    Reply { text: String, provider: String },
    /// Every provider failed; `message` is ready to show to the user.
    Exhausted { message: String },
}

impl DispatchOutcome {
    pub fn is_reply(&self) -> bool {
        matches!(self, DispatchOutcome::Reply { .. })
    }
}

/// User-facing text for an exhausted dispatch.
pub fn exhausted_message(last_error: &str) -> String {
    format!(
        ":x: **All providers failed to respond**\n\
         > Try a different model or try again later.\n\n\
         **Last error:** ```{last_error}```"
    )
}

/// Tries providers in order and promotes the first success.
pub struct FailoverDispatcher {
    registry: Arc<ProviderRegistry>,
    request: LlmRequestConfig,
    /// Upper bound for the whole provider list; `None` means unbounded.
    deadline: Option<Duration>,
}

impl FailoverDispatcher {
    pub fn new(registry: Arc<ProviderRegistry>, request: LlmRequestConfig) -> Self {
        Self {
            registry,
            request,
            deadline: None,
        }
    }

    /// Bound the total time spent across all providers. Zero disables it.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = (!deadline.is_zero()).then_some(deadline);
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Send `history` to the providers registered for `model`.
    pub async fn dispatch(&self, model: &str, history: &[ChatMessage]) -> DispatchOutcome {
        let Some((key, providers)) = self.registry.resolve(model) else {
            error!(model = %model, "No providers available");
            return DispatchOutcome::Exhausted {
                message: exhausted_message(&format!("no providers configured for model '{model}'")),
            };
        };
        if key != model {
            warn!(model = %model, fallback = %key, "Unknown model, using default model's providers");
        }

        let mut last_error = None;
        let attempt = self.attempt_all(&key, &providers, history, &mut last_error);
        let result = match self.deadline {
            None => Ok(attempt.await),
            Some(deadline) => tokio::time::timeout(deadline, attempt).await,
        };
        let reply = match result {
            Ok(reply) => reply,
            Err(_) => {
                let previous = last_error
                    .take()
                    .map(|e| format!("; previous error: {e}"))
                    .unwrap_or_default();
                last_error = Some(format!(
                    "no provider answered within {:?}{previous}",
                    self.deadline.unwrap_or_default()
                ));
                None
            }
        };

        match reply {
            Some(outcome) => outcome,
            None => {
                let last_error = last_error.unwrap_or_else(|| "unknown error".to_string());
                error!(model = %key, error = %last_error, "All providers failed");
                DispatchOutcome::Exhausted {
                    message: exhausted_message(&last_error),
                }
            }
        }
    }

    async fn attempt_all(
        &self,
        model: &str,
        providers: &[ProviderHandle],
        history: &[ChatMessage],
        last_error: &mut Option<String>,
    ) -> Option<DispatchOutcome> {
        for provider in providers {
            info!(provider = provider.display_name(), model = %model, "Trying provider");
            match provider.chat(history, model, &self.request).await {
                Ok(text) if !text.trim().is_empty() => {
                    self.registry.promote(model, provider.name());
                    return Some(DispatchOutcome::Reply {
                        text,
                        provider: provider.name().to_string(),
                    });
                }
                Ok(_) => {
                    warn!(provider = provider.display_name(), "Provider returned an empty response");
                    *last_error = Some(format!("{} returned an empty response", provider.display_name()));
                }
                Err(e) => {
                    warn!(provider = provider.display_name(), error = %e, "Provider failed");
                    *last_error = Some(e.to_string());
                }
            }
        }
        None
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::LlmProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers with a fixed result and counts calls.
    struct Scripted {
        name: &'static str,
        reply: Result<&'static str, &'static str>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn ok(name: &'static str, text: &'static str) -> Arc<Self> {
            Arc::new(Self { name, reply: Ok(text), delay: None, calls: AtomicUsize::new(0) })
        }

        fn failing(name: &'static str, error: &'static str) -> Arc<Self> {
            Arc::new(Self { name, reply: Err(error), delay: None, calls: AtomicUsize::new(0) })
        }

        fn slow(name: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self { name, reply: Ok("late"), delay: Some(delay), calls: AtomicUsize::new(0) })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        async fn chat(&self, _: &[ChatMessage], _: &str, _: &LlmRequestConfig) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.reply.map(String::from).map_err(|e| anyhow::anyhow!(e))
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn dispatcher(model: &str, providers: Vec<ProviderHandle>) -> FailoverDispatcher {
        let registry = Arc::new(ProviderRegistry::new(model));
        registry.set_providers(model, providers);
        FailoverDispatcher::new(registry, LlmRequestConfig::default())
    }

    fn order(d: &FailoverDispatcher, model: &str) -> Vec<String> {
        d.registry()
            .get_providers(model)
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let a = Scripted::ok("a", "from a");
        let b = Scripted::ok("b", "from b");
        let d = dispatcher("m", vec![a.clone().into(), b.clone().into()]);

        let outcome = d.dispatch("m", &[ChatMessage::user("hi")]).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Reply { text: "from a".into(), provider: "a".into() }
        );
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_promotion_after_failover() {
        let a = Scripted::failing("a", "boom");
        let b = Scripted::ok("b", "ok");
        let c = Scripted::ok("c", "unused");
        let d = dispatcher("m", vec![a.clone().into(), b.clone().into(), c.clone().into()]);

        assert!(d.dispatch("m", &[]).await.is_reply());
        assert_eq!(order(&d, "m"), vec!["b", "a", "c"]);

        // Next call goes straight to B
        d.dispatch("m", &[]).await;
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 2);
        assert_eq!(c.calls(), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_embeds_last_error() {
        let d = dispatcher(
            "m",
            vec![
                Scripted::failing("a", "first error").into(),
                Scripted::failing("b", "second error").into(),
            ],
        );

        match d.dispatch("m", &[]).await {
            DispatchOutcome::Exhausted { message } => {
                assert!(message.contains("All providers failed"));
                assert!(message.contains("second error"));
                assert!(!message.contains("first error"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(order(&d, "m"), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_empty_reply_counts_as_failure() {
        let d = dispatcher(
            "m",
            vec![Scripted::ok("blank", "  ").into(), Scripted::ok("real", "text").into()],
        );
        match d.dispatch("m", &[]).await {
            DispatchOutcome::Reply { provider, .. } => assert_eq!(provider, "real"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_model_uses_default_list() {
        let d = dispatcher("default", vec![Scripted::failing("x", "e").into(), Scripted::ok("y", "hi").into()]);
        assert!(d.dispatch("no-such-model", &[]).await.is_reply());
        // Promotion lands on the list that was actually used
        assert_eq!(order(&d, "default"), vec!["y", "x"]);
    }

    #[tokio::test]
    async fn test_no_providers_at_all() {
        let d = FailoverDispatcher::new(Arc::new(ProviderRegistry::new("m")), LlmRequestConfig::default());
        match d.dispatch("m", &[]).await {
            DispatchOutcome::Exhausted { message } => assert!(message.contains("no providers configured")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deadline_stops_dispatch() {
        let slow = Scripted::slow("slow", Duration::from_secs(5));
        let never = Scripted::ok("never", "unused");
        let d = dispatcher("m", vec![slow.clone().into(), never.clone().into()])
            .with_deadline(Duration::from_millis(50));

        match d.dispatch("m", &[]).await {
            DispatchOutcome::Exhausted { message } => assert!(message.contains("within 50ms")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(never.calls(), 0);
    }

    #[test]
    fn test_zero_deadline_disabled() {
        let d = dispatcher("m", vec![]).with_deadline(Duration::ZERO);
        assert!(d.deadline.is_none());
    }
}
