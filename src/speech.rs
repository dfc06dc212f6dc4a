//! Speech coordinator: the optional bridge from node presentation to
//! synthesis and recognition collaborators.
//!
//! Engines are consumed through two narrow async ports; this crate never
//! implements them. The coordinator decides *whether* to involve speech for
//! a given node and hands completions back to the flow as plain callbacks,
//! which the controller marshals onto its owning context.
//!
//! Enabling a direction that was never configured is a fatal precondition
//! violation ([`SpeechError::NotConfigured`]); a direction that is simply
//! disabled or not ready degrades to immediate completion.

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;
use tracing::debug;

use crate::node::{ActionGroup, MessageNode, NodeId};

/// Text-to-speech collaborator contract.
///
/// `speak` resolves when the utterance has finished (or was stopped).
#[async_trait]
pub trait SynthesizerPort: Send + Sync {
    async fn speak(&self, text: &str);
    async fn stop(&self);
}

/// One candidate utterance a recognizer may match against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecognitionCandidate {
    pub id: NodeId,
    pub utterance: String,
}

/// Speech-to-text collaborator contract.
///
/// `listen` resolves with the id of the matched candidate, or `None` when
/// nothing matched (or listening was stopped).
#[async_trait]
pub trait RecognizerPort: Send + Sync {
    async fn listen(&self, candidates: &[RecognitionCandidate]) -> Option<NodeId>;
    async fn stop(&self);
}

/// Fatal speech precondition violations.
#[derive(Debug, Error, Diagnostic)]
pub enum SpeechError {
    /// Speech was enabled but `configure` was never called.
    #[error("speech enabled but never configured")]
    #[diagnostic(
        code(chatflow::speech::not_configured),
        help("Call SpeechCoordinator::configure after setting up the engines.")
    )]
    NotConfigured,
}

/// Decides when presentation involves the speech collaborators.
#[derive(Clone, Default)]
pub struct SpeechCoordinator {
    synthesizer: Option<Arc<dyn SynthesizerPort>>,
    recognizer: Option<Arc<dyn RecognizerPort>>,
    synthesizer_enabled: bool,
    recognizer_enabled: bool,
    synthesizer_ready: bool,
    recognizer_ready: bool,
    configured: bool,
}

impl SpeechCoordinator {
    /// A coordinator with speech fully disabled; every `try_*` completes
    /// immediately.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_synthesizer(mut self, port: Arc<dyn SynthesizerPort>) -> Self {
        self.synthesizer = Some(port);
        self
    }

    #[must_use]
    pub fn with_recognizer(mut self, port: Arc<dyn RecognizerPort>) -> Self {
        self.recognizer = Some(port);
        self
    }

    #[must_use]
    pub fn enable_synthesizer(mut self, enable: bool) -> Self {
        self.synthesizer_enabled = enable;
        self
    }

    #[must_use]
    pub fn enable_recognizer(mut self, enable: bool) -> Self {
        self.recognizer_enabled = enable;
        self
    }

    /// Record the outcome of engine setup. Readiness only sticks for
    /// directions that actually have a port.
    #[must_use]
    pub fn configured(mut self, synthesizer_ready: bool, recognizer_ready: bool) -> Self {
        self.configured = true;
        self.synthesizer_ready = synthesizer_ready && self.synthesizer.is_some();
        self.recognizer_ready = recognizer_ready && self.recognizer.is_some();
        self
    }

    /// Speak `message` if synthesis applies to it.
    ///
    /// Returns `Ok(true)` when the utterance was handed to the synthesizer
    /// and `on_done` is deferred to its completion; `Ok(false)` when speech
    /// does not apply and the caller should continue immediately.
    pub fn try_speak(
        &self,
        message: &MessageNode,
        on_done: impl FnOnce() + Send + 'static,
    ) -> Result<bool, SpeechError> {
        if !self.synthesizer_enabled {
            return Ok(false);
        }
        if !self.configured {
            return Err(SpeechError::NotConfigured);
        }
        let (Some(port), true) = (self.synthesizer.as_ref(), self.synthesizer_ready) else {
            return Ok(false);
        };
        let Some(text) = message.speakable_text() else {
            return Ok(false);
        };
        debug!(id = %message.id(), "handing message to synthesizer");
        let port = Arc::clone(port);
        let text = text.to_owned();
        tokio::spawn(async move {
            port.speak(&text).await;
            on_done();
        });
        Ok(true)
    }

    /// Listen for one utterance matching a member of `group`.
    ///
    /// Returns `Ok(true)` when a one-shot listener was registered and
    /// `on_chosen` will be called with the matched action id (or `None`);
    /// `Ok(false)` when recognition does not apply.
    pub fn try_listen(
        &self,
        group: &ActionGroup,
        on_chosen: impl FnOnce(Option<NodeId>) + Send + 'static,
    ) -> Result<bool, SpeechError> {
        if !self.recognizer_enabled {
            return Ok(false);
        }
        if !self.configured {
            return Err(SpeechError::NotConfigured);
        }
        let (Some(port), true) = (self.recognizer.as_ref(), self.recognizer_ready) else {
            return Ok(false);
        };
        let candidates: Vec<RecognitionCandidate> = group
            .iter()
            .map(|action| RecognitionCandidate {
                id: action.id().clone(),
                utterance: action.text().to_owned(),
            })
            .collect();
        debug!(candidates = candidates.len(), "registering one-shot listener");
        let port = Arc::clone(port);
        tokio::spawn(async move {
            let chosen = port.listen(&candidates).await;
            on_chosen(chosen);
        });
        Ok(true)
    }

    /// Stop in-flight synthesis and recognition, if any.
    pub fn stop(&self) {
        if let Some(port) = &self.synthesizer {
            let port = Arc::clone(port);
            tokio::spawn(async move { port.stop().await });
        }
        if let Some(port) = &self.recognizer {
            let port = Arc::clone(port);
            tokio::spawn(async move { port.stop().await });
        }
    }
}

impl std::fmt::Debug for SpeechCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechCoordinator")
            .field("synthesizer", &self.synthesizer.is_some())
            .field("recognizer", &self.recognizer.is_some())
            .field("synthesizer_enabled", &self.synthesizer_enabled)
            .field("recognizer_enabled", &self.recognizer_enabled)
            .field("configured", &self.configured)
            .finish()
    }
}
