//! # Text-to-Speech Adapter
//!
//! Synthesizes the spoken acknowledgement sent back to the user. Unlike the
//! other two adapters, a missing credential is not an error here: the service
//! is simply unavailable and the caller falls back to client-side speech, so
//! a deployment without TTS still talks through the browser.

use crate::config::TtsConfig;
use crate::error::{AgentError, AgentResult};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Adapter to the external text-to-speech service.
pub struct SpeechSynthesizer {
    config: TtsConfig,
    client: reqwest::Client,
}

impl SpeechSynthesizer {
    pub fn new(config: TtsConfig) -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Synthesis(format!("client init: {}", e)))?;
        Ok(Self { config, client })
    }

    /// Container type of the audio the service returns.
    pub fn mime_type(&self) -> &'static str {
        "audio/mpeg"
    }

    /// Synthesize text to audio bytes.
    ///
    /// `Ok(None)` covers both "nothing to say" (blank input, checked before
    /// any network call) and "service unavailable" (no credential). Upstream
    /// failures are errors for the caller to degrade from.
    pub async fn synthesize(&self, text: &str) -> AgentResult<Option<Vec<u8>>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        if self.config.api_key.is_empty() {
            debug!("TTS credential not configured, skipping synthesis");
            return Ok(None);
        }

        let response = self
            .client
            .post(format!("{}/v1/speak", self.config.base_url))
            .header("Authorization", format!("Token {}", self.config.api_key))
            .query(&[("model", self.config.voice.as_str())])
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| AgentError::Synthesis(format!("request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AgentError::Synthesis(format!("upstream error: {}", e)))?;

        let audio = response
            .bytes()
            .await
            .map_err(|e| AgentError::Synthesis(format!("body read failed: {}", e)))?;

        if audio.is_empty() {
            debug!("TTS returned empty audio");
            return Ok(None);
        }

        debug!(bytes = audio.len(), "Synthesized acknowledgement");
        Ok(Some(audio.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthesizer_without_key() -> SpeechSynthesizer {
        SpeechSynthesizer::new(TtsConfig {
            api_key: String::new(),
            base_url: "http://localhost:1".to_string(),
            voice: "aura-asteria-en".to_string(),
            timeout_secs: 1,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_blank_input_is_absent_without_calling_out() {
        let tts = synthesizer_without_key();
        assert!(tts.synthesize("").await.unwrap().is_none());
        assert!(tts.synthesize("   \n\t").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_credential_is_unavailable_not_error() {
        let tts = synthesizer_without_key();
        assert!(tts.synthesize("Here is your balance.").await.unwrap().is_none());
    }
}
