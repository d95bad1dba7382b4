//! Intent classification through an external language model.
//!
//! The classifier gets a system prompt, the user's message and the catalog
//! of functions the bot can run. It answers with either a function call or
//! plain text, which [`Intent::from_parts`] turns into an [`Intent`].

use std::future::Future;

use thiserror::Error;

use crate::types::Intent;

pub mod catalog;
pub mod openai;

pub use catalog::{FunctionSpec, Parameters, Property, function_catalog, system_prompt};
pub use openai::{OpenAiClassifier, OpenAiConfig};

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("classifier returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("classifier response is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("classifier response has no choices")]
    NoChoices,
}

impl ClassifierError {
    /// Whether retrying the same message later has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            ClassifierError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ClassifierError::Status { status, .. } => *status == 429 || *status >= 500,
            ClassifierError::Decode(_) | ClassifierError::NoChoices => false,
        }
    }
}

/// Maps a user message to an intent.
pub trait IntentClassifier: Send + Sync + 'static {
    fn classify(
        &self,
        system_prompt: &str,
        user_text: &str,
        catalog: &[FunctionSpec],
    ) -> impl Future<Output = Result<Intent, ClassifierError>> + Send;
}
