//! Grounded Generation Engine
//!
//! Builds knowledge-grounded prompts and runs them against a language-model
//! backend, either as one blocking completion or as a cancellable stream of
//! text fragments.

pub mod engine;
pub mod provider;
pub mod stream;
pub mod templates;

pub use engine::GroundedGenerationEngine;
pub use provider::{
    create_backend, AnthropicBackend, BackendStream, GenerationBackend, GenerationRequest,
    LLMConfig, OpenAIBackend, ScriptedBackend,
};
pub use stream::FragmentStream;
pub use templates::{build_grounded_prompt, GroundedPrompt, Truncation, SYSTEM_PROMPT};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("model backend throttled the request: {0}")]
    Throttled(String),
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
    #[error("model transport failure: {0}")]
    Transport(String),
}

impl GenerationError {
    /// Human-readable diagnostic handed back to the calling agent.
    pub fn diagnostic(&self) -> String {
        format!("Failed to generate Redshift analysis: {}", self)
    }
}

/// Sampling parameters for one completion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
}

impl SamplingConfig {
    pub fn new(max_tokens: u32, temperature: f64, top_p: f64) -> crate::Result<Self> {
        if max_tokens == 0 {
            return Err(crate::Error::Validation("max_tokens must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&temperature) {
            return Err(crate::Error::Validation(format!(
                "temperature {} is outside [0, 1]",
                temperature
            )));
        }
        if !(0.0..=1.0).contains(&top_p) {
            return Err(crate::Error::Validation(format!("top_p {} is outside [0, 1]", top_p)));
        }
        Ok(Self {
            max_tokens,
            temperature,
            top_p,
        })
    }

    /// Low-variance profile for plans that feed a later audit.
    pub fn deterministic() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.0,
            top_p: 0.6,
        }
    }

    /// Profile for free-form streamed explanations.
    pub fn balanced() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.5,
            top_p: 0.9,
        }
    }
}
