//! # Speech-to-Text Adapter
//!
//! Sends a finalized utterance to a Deepgram-compatible listen endpoint and
//! extracts the transcript. The audio container is classified from magic
//! bytes so the request carries the right content type. Browsers send WebM
//! by default, but WAV, OGG, FLAC, MP3, and MP4 uploads all occur in the
//! wild.
//!
//! A successful call with no transcript text is "absent", not an error: the
//! user said nothing intelligible, and the caller decides what to tell them.

use crate::audio::AudioFormat;
use crate::config::SttConfig;
use crate::error::{AgentError, AgentResult};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Adapter to the external speech-to-text service.
pub struct TranscriptionClient {
    config: SttConfig,
    client: reqwest::Client,
}

/// Response layout of the listen endpoint, reduced to the fields we read.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListenResponse {
    #[serde(default)]
    results: ListenResults,
}

#[derive(Debug, Default, Deserialize)]
struct ListenResults {
    #[serde(default)]
    channels: Vec<ListenChannel>,
}

#[derive(Debug, Default, Deserialize)]
struct ListenChannel {
    #[serde(default)]
    alternatives: Vec<ListenAlternative>,
}

#[derive(Debug, Default, Deserialize)]
struct ListenAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

impl ListenResponse {
    /// Best transcript in the response, if any text came back.
    fn transcript(&self) -> Option<(String, f32)> {
        let alternative = self.results.channels.first()?.alternatives.first()?;
        if alternative.transcript.is_empty() {
            None
        } else {
            Some((alternative.transcript.clone(), alternative.confidence))
        }
    }
}

impl TranscriptionClient {
    pub fn new(config: SttConfig) -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Transcription(format!("client init: {}", e)))?;
        Ok(Self { config, client })
    }

    /// Transcribe an utterance. `Ok(None)` means the service answered but
    /// heard nothing; errors cover credential, transport, HTTP, and timeout
    /// failures alike.
    pub async fn transcribe(
        &self,
        audio: &[u8],
        language: &str,
    ) -> AgentResult<Option<String>> {
        if self.config.api_key.is_empty() {
            return Err(AgentError::Transcription(
                "STT api key not configured".to_string(),
            ));
        }

        let format = AudioFormat::detect(audio);
        debug!(format = ?format, bytes = audio.len(), "Transcribing utterance");

        let url = format!("{}/v1/listen", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.config.api_key))
            .header("Content-Type", format.mime_type())
            .query(&[
                ("model", self.config.model.as_str()),
                ("language", language),
                ("punctuate", "true"),
                ("smart_format", "true"),
            ])
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| AgentError::Transcription(format!("request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AgentError::Transcription(format!("upstream error: {}", e)))?;

        let body: ListenResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Transcription(format!("bad response body: {}", e)))?;

        match body.transcript() {
            Some((transcript, confidence)) => {
                info!(confidence = confidence, "Transcript received");
                Ok(Some(transcript))
            }
            None => {
                debug!("No transcript in response");
                Ok(None)
            }
        }
    }
}
