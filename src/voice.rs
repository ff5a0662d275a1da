//! Voice command capture
//!
//! Speech recognition and translation are external services. Each voice
//! command opens its own recognizer and translator sessions and drops them
//! when the sentence is ready, so nothing is loaded at startup.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    #[error("Voice commands unavailable: no recognizer configured")]
    Unavailable,

    #[error("Speech recognition failed: {0}")]
    Recognition(String),

    #[error("Translation failed: {0}")]
    Translation(String),

    #[error("No speech heard within {0:?}")]
    Timeout(Duration),
}

/// Captures one spoken phrase
#[async_trait]
pub trait SpeechRecognizer: Send {
    async fn listen(&mut self) -> Result<String, VoiceError>;
}

/// Converts a phrase into a command sentence in the control language
#[async_trait]
pub trait Translator: Send {
    async fn translate(&mut self, phrase: &str) -> Result<String, VoiceError>;
}

/// Opens recognizer and translator sessions on demand
pub trait VoiceBackend: Send + Sync {
    fn recognizer(&self) -> Result<Box<dyn SpeechRecognizer>, VoiceError>;

    /// None when phrases are already in the control language
    fn translator(&self) -> Result<Option<Box<dyn Translator>>, VoiceError>;
}

/// Turns one utterance into a command sentence
#[derive(Clone)]
pub struct VoiceCommandService {
    backend: Option<Arc<dyn VoiceBackend>>,
    listen_timeout: Duration,
}

impl VoiceCommandService {
    pub fn new(backend: Arc<dyn VoiceBackend>, listen_timeout: Duration) -> Self {
        Self {
            backend: Some(backend),
            listen_timeout,
        }
    }

    /// Service that reports voice as unavailable
    pub fn disabled() -> Self {
        Self {
            backend: None,
            listen_timeout: Duration::ZERO,
        }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    /// Listen for one phrase and return it as a command sentence
    pub async fn capture_sentence(&self) -> Result<String, VoiceError> {
        let backend = self.backend.as_ref().ok_or(VoiceError::Unavailable)?;

        let mut recognizer = backend.recognizer()?;
        info!("[CMD] Listening for a voice command...");
        let phrase = tokio::time::timeout(self.listen_timeout, recognizer.listen())
            .await
            .map_err(|_| VoiceError::Timeout(self.listen_timeout))??;
        drop(recognizer);
        debug!("[CMD] Heard '{}'", phrase);

        let sentence = match backend.translator()? {
            Some(mut translator) => translator.translate(&phrase).await?,
            None => phrase,
        };
        info!("[CMD] Voice command: '{}'", sentence);
        Ok(sentence)
    }
}
