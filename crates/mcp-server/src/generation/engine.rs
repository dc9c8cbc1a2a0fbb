use async_stream::stream;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    FragmentStream, GenerationBackend, GenerationError, GenerationRequest, GroundedPrompt,
    SamplingConfig,
};

/// Runs grounded prompts against a backend in either delivery mode.
#[derive(Clone)]
pub struct GroundedGenerationEngine {
    backend: Arc<dyn GenerationBackend>,
}

impl GroundedGenerationEngine {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }

    fn request(prompt: &GroundedPrompt, sampling: SamplingConfig) -> GenerationRequest {
        GenerationRequest {
            system: prompt.system.clone(),
            user: prompt.user.clone(),
            sampling,
        }
    }

    /// Whole-response generation.
    pub async fn generate(
        &self,
        prompt: &GroundedPrompt,
        sampling: SamplingConfig,
    ) -> Result<String, GenerationError> {
        debug!(
            "Blocking generation (temperature={}, top_p={})",
            sampling.temperature, sampling.top_p
        );
        self.backend.complete(&Self::request(prompt, sampling)).await
    }

    /// Incremental generation. Backend failures never surface as errors: the
    /// diagnostic text becomes the final fragment and the stream ends.
    pub fn generate_stream(&self, prompt: &GroundedPrompt, sampling: SamplingConfig) -> FragmentStream {
        debug!(
            "Streaming generation (temperature={}, top_p={})",
            sampling.temperature, sampling.top_p
        );

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let mut upstream = self.backend.stream(Self::request(prompt, sampling));

        let fragments = stream! {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    item = upstream.next() => item,
                };
                match next {
                    Some(Ok(text)) => {
                        if !text.is_empty() {
                            yield text;
                        }
                    }
                    Some(Err(err)) => {
                        warn!("Streaming generation failed: {}", err);
                        yield err.diagnostic();
                        break;
                    }
                    None => break,
                }
            }
        };

        FragmentStream::new(fragments.boxed(), cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::provider::MockGenerationBackend;
    use crate::generation::ScriptedBackend;
    use futures::stream;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn prompt() -> GroundedPrompt {
        GroundedPrompt {
            system: "system".to_string(),
            user: "user".to_string(),
            truncation: None,
        }
    }

    #[tokio::test]
    async fn streamed_concatenation_matches_blocking_output() {
        let engine = GroundedGenerationEngine::new(Arc::new(ScriptedBackend::new([
            "1. Vacuum ",
            "the sales table.\n",
            "2. Analyze it.",
        ])));

        let blocking = engine.generate(&prompt(), SamplingConfig::deterministic()).await.unwrap();
        let streamed = engine
            .generate_stream(&prompt(), SamplingConfig::deterministic())
            .collect_text()
            .await;

        assert_eq!(streamed, blocking);
    }

    #[tokio::test]
    async fn passes_sampling_profile_to_backend() {
        let mut backend = MockGenerationBackend::new();
        backend
            .expect_complete()
            .withf(|req| req.sampling == SamplingConfig::deterministic() && req.user == "user")
            .times(1)
            .returning(|_| Ok("plan".to_string()));

        let engine = GroundedGenerationEngine::new(Arc::new(backend));
        let text = engine.generate(&prompt(), SamplingConfig::deterministic()).await.unwrap();
        assert_eq!(text, "plan");
    }

    #[tokio::test]
    async fn backend_error_becomes_final_fragment() {
        let engine = GroundedGenerationEngine::new(Arc::new(
            ScriptedBackend::new(["partial analysis"])
                .failing_with(GenerationError::Throttled("429".to_string())),
        ));

        let fragments: Vec<String> = engine
            .generate_stream(&prompt(), SamplingConfig::balanced())
            .collect()
            .await;

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0], "partial analysis");
        assert!(fragments[1].starts_with("Failed to generate Redshift analysis:"));
    }

    #[tokio::test]
    async fn immediate_failure_yields_only_diagnostic() {
        let engine = GroundedGenerationEngine::new(Arc::new(
            ScriptedBackend::new(Vec::<String>::new())
                .failing_with(GenerationError::Transport("connection refused".to_string())),
        ));

        let fragments: Vec<String> = engine
            .generate_stream(&prompt(), SamplingConfig::balanced())
            .collect()
            .await;

        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].contains("connection refused"));
    }

    #[tokio::test]
    async fn cancellation_stops_a_pending_backend() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();

        let mut backend = MockGenerationBackend::new();
        backend.expect_stream().returning(move |_| {
            struct Release(Arc<AtomicBool>);
            impl Drop for Release {
                fn drop(&mut self) {
                    self.0.store(true, Ordering::SeqCst);
                }
            }
            let guard = Release(flag.clone());
            stream::once(async { Ok("first".to_string()) })
                .chain(stream::pending())
                .map(move |item| {
                    let _keep = &guard;
                    item
                })
                .boxed()
        });

        let engine = GroundedGenerationEngine::new(Arc::new(backend));
        let mut fragments = engine.generate_stream(&prompt(), SamplingConfig::balanced());
        let token = fragments.cancellation_token();

        assert_eq!(fragments.next().await.as_deref(), Some("first"));

        // The backend now never answers; cancelling must still end the stream.
        let consumer = tokio::spawn(async move { fragments.next().await });
        tokio::task::yield_now().await;
        token.cancel();

        let next = tokio::time::timeout(std::time::Duration::from_secs(2), consumer)
            .await
            .expect("stream did not stop after cancellation")
            .unwrap();
        assert_eq!(next, None);
        assert!(released.load(Ordering::SeqCst));
    }
}
