//! # Voice-Command Orchestrator
//!
//! Composes the audio assembler, the three AI-service adapters, and the audit
//! recorder into the per-connection protocol state machine:
//!
//! ```text
//! IDLE --audio chunk--> RECORDING --AUDIO_END--> PROCESSING --> IDLE
//!   \------------------TEXT_COMMAND------------> PROCESSING --> IDLE
//! ```
//!
//! One orchestrator instance serves all connections; per-user state lives in
//! keyed maps behind mutexes. Handlers return the ordered sequence of frames
//! to transmit, and the WebSocket layer sends them in exactly that order:
//! the spoken acknowledgement always precedes `ACTION_DISPATCH`, because a
//! dispatched `navigate` may tear the connection down and any audio sent
//! after it would be lost.
//!
//! ## Degradation:
//! Every external failure lands on a spoken fallback instead of an error:
//! transcription trouble becomes "didn't catch that", planner trouble becomes
//! the deterministic keyword plan, synthesis trouble becomes a text-only
//! reply the client speaks itself. A session stays usable with all three
//! services down.

use crate::audio::AudioAssembler;
use crate::audit::{AuditRecorder, AuditStore};
use crate::config::AppConfig;
use crate::error::AgentResult;
use crate::protocol::{AgentSpeak, ExecutionResult, ServerMessage, UserContext};
use crate::services::{planner, PlanGenerator, SpeechSynthesizer, TranscriptionClient};
use base64::Engine;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const REPLY_NO_AUDIO: &str = "I didn't hear anything. Please try again.";
const REPLY_NOT_UNDERSTOOD: &str = "Sorry, I didn't catch that. Could you say it again?";
const REPLY_EXECUTED: &str = "Done. What else can I help you with?";

/// Stateful handler for every agent connection.
pub struct Orchestrator {
    stt: TranscriptionClient,
    planner: PlanGenerator,
    tts: SpeechSynthesizer,
    recorder: AuditRecorder,
    assembler: AudioAssembler,
    contexts: Mutex<HashMap<String, UserContext>>,
    min_utterance_bytes: usize,
}

impl Orchestrator {
    pub fn new(config: &AppConfig, audit_store: Arc<dyn AuditStore>) -> AgentResult<Self> {
        Ok(Self {
            stt: TranscriptionClient::new(config.services.stt.clone())?,
            planner: PlanGenerator::new(config.services.llm.clone())?,
            tts: SpeechSynthesizer::new(config.services.tts.clone())?,
            recorder: AuditRecorder::new(audit_store),
            assembler: AudioAssembler::new(config.limits.max_utterance_bytes),
            contexts: Mutex::new(HashMap::new()),
            min_utterance_bytes: config.limits.min_utterance_bytes,
        })
    }

    /// Append a binary audio chunk. No reply; an over-cap chunk is dropped.
    pub fn handle_chunk(&self, user_id: &str, chunk: &[u8]) {
        self.assembler.append(user_id, chunk);
    }

    /// Decode and append a base64 audio chunk, identically to a binary one.
    pub fn handle_base64_chunk(&self, user_id: &str, data: &str) {
        match base64::engine::general_purpose::STANDARD.decode(data) {
            Ok(chunk) => self.handle_chunk(user_id, &chunk),
            Err(err) => warn!(user_id = %user_id, error = %err, "Undecodable base64 audio chunk"),
        }
    }

    /// Overwrite the user's UI context snapshot. No reply.
    pub fn handle_context_update(&self, user_id: &str, context: UserContext) {
        debug!(user_id = %user_id, url = %context.url, "Context updated");
        self.contexts.lock().unwrap().insert(user_id.to_string(), context);
    }

    /// End of utterance: drain the buffer and run the command pipeline on
    /// whatever was heard.
    pub async fn handle_audio_end(&self, user_id: &str) -> Vec<ServerMessage> {
        let audio = self.assembler.finalize(user_id);

        if audio.len() < self.min_utterance_bytes {
            debug!(user_id = %user_id, bytes = audio.len(), "Utterance below minimum length");
            return vec![self.speak(REPLY_NO_AUDIO).await];
        }

        let language = self.context_for(user_id).locale;
        let transcript = match self.stt.transcribe(&audio, &language).await {
            Ok(Some(transcript)) => transcript,
            Ok(None) => {
                debug!(user_id = %user_id, "Empty transcript");
                return vec![self.speak(REPLY_NOT_UNDERSTOOD).await];
            }
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "Transcription failed");
                return vec![self.speak(REPLY_NOT_UNDERSTOOD).await];
            }
        };

        info!(user_id = %user_id, "Transcribed command");
        self.run_command(user_id, &transcript).await
    }

    /// Typed command: same pipeline, no audio leg.
    pub async fn handle_text_command(&self, user_id: &str, text: &str) -> Vec<ServerMessage> {
        self.run_command(user_id, text).await
    }

    /// Execution outcome for a previously dispatched plan.
    ///
    /// Unknown plan ids are ignored silently: no audit write, no reply.
    pub async fn handle_execution_result(
        &self,
        user_id: &str,
        result: ExecutionResult,
    ) -> Vec<ServerMessage> {
        let status = if result.is_success() { "success" } else { "failed" };
        let known = self
            .recorder
            .complete(&result.plan_id, status, result.error.as_deref())
            .await;

        if !known {
            return Vec::new();
        }

        let text = if result.is_success() {
            REPLY_EXECUTED.to_string()
        } else {
            format!(
                "Sorry, something went wrong: {}",
                result.error.as_deref().unwrap_or("unknown error")
            )
        };

        info!(user_id = %user_id, plan_id = %result.plan_id, status = %status,
            "Execution result recorded");
        vec![self.speak(&text).await]
    }

    /// Disconnect cleanup: drop the in-flight buffer and context snapshot,
    /// sweep pending audit correlations owned by this user.
    pub async fn handle_disconnect(&self, user_id: &str) {
        self.assembler.discard(user_id);
        self.contexts.lock().unwrap().remove(user_id);
        self.recorder.sweep_user(user_id).await;
        debug!(user_id = %user_id, "Session state discarded");
    }

    /// The shared command pipeline: plan (with deterministic fallback), log,
    /// acknowledge, dispatch. The acknowledgement frame goes first.
    async fn run_command(&self, user_id: &str, transcript: &str) -> Vec<ServerMessage> {
        let context = self.context_for(user_id);

        let plan = match self.planner.generate(transcript, &context).await {
            Ok(plan) => plan,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "Planner failed, using fallback");
                planner::fallback_plan(transcript)
            }
        };

        if let Err(err) = self.recorder.log_command(user_id, transcript, &plan).await {
            warn!(user_id = %user_id, error = %err, "Failed to log command");
        }

        let mut frames = Vec::with_capacity(2);
        if let Some(ack) = plan.first_speak_text() {
            let ack = ack.to_string();
            frames.push(self.speak(&ack).await);
        }
        frames.push(ServerMessage::ActionDispatch(plan));
        frames
    }

    /// Build an `AGENT_SPEAK` frame, degrading to text-only when synthesis is
    /// unavailable or fails.
    async fn speak(&self, text: &str) -> ServerMessage {
        let payload = match self.tts.synthesize(text).await {
            Ok(Some(audio)) => AgentSpeak::with_audio(
                text,
                base64::engine::general_purpose::STANDARD.encode(audio),
                self.tts.mime_type(),
            ),
            Ok(None) => AgentSpeak::text_only(text),
            Err(err) => {
                warn!(error = %err, "Synthesis failed, replying text-only");
                AgentSpeak::text_only(text)
            }
        };
        ServerMessage::AgentSpeak(payload)
    }

    fn context_for(&self, user_id: &str) -> UserContext {
        self.contexts
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Correlation entries still awaiting an execution result.
    pub fn pending_audits(&self) -> usize {
        self.recorder.pending_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditStore;
    use crate::protocol::{ActionPlan, Step};

    /// Orchestrator with no service credentials configured: the planner and
    /// STT fail (exercising the fallback paths) and TTS is unavailable
    /// (exercising text-only degradation). No network is ever touched.
    fn orchestrator() -> (Orchestrator, Arc<MemoryAuditStore>) {
        let store = Arc::new(MemoryAuditStore::default());
        let orchestrator = Orchestrator::new(&AppConfig::default(), store.clone()).unwrap();
        (orchestrator, store)
    }

    fn dispatched_plan(frames: &[ServerMessage]) -> &ActionPlan {
        frames
            .iter()
            .find_map(|frame| match frame {
                ServerMessage::ActionDispatch(plan) => Some(plan),
                _ => None,
            })
            .expect("no ACTION_DISPATCH frame")
    }

    #[tokio::test]
    async fn test_text_command_acknowledges_before_dispatching() {
        let (orchestrator, _) = orchestrator();
        orchestrator.handle_context_update(
            "u1",
            UserContext {
                url: "/dashboard".to_string(),
                ..UserContext::default()
            },
        );

        let frames = orchestrator.handle_text_command("u1", "check my balance").await;

        assert_eq!(frames.len(), 2);
        match &frames[0] {
            ServerMessage::AgentSpeak(speak) => {
                assert_eq!(speak.text, "Here is your account balance.");
                assert!(speak.audio_base64.is_none());
                assert!(speak.use_browser_tts);
            }
            other => panic!("expected AGENT_SPEAK first, got {:?}", other),
        }
        let plan = dispatched_plan(&frames);
        assert_eq!(
            plan.steps,
            vec![
                Step::Navigate {
                    url: "/dashboard".to_string()
                },
                Step::Speak {
                    text: "Here is your account balance.".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_planner_failure_still_dispatches() {
        // No planner credential: generate fails on every call, yet the
        // pipeline completes with a fallback dispatch.
        let (orchestrator, store) = orchestrator();

        let frames = orchestrator.handle_text_command("u1", "pay the gas bill").await;

        let plan = dispatched_plan(&frames);
        assert_eq!(plan.meta.source.as_deref(), Some("fallback"));
        assert!(!plan.steps.is_empty());

        // And the command was audited as dispatched.
        assert_eq!(orchestrator.pending_audits(), 1);
        let record = store.get_by_plan(&plan.plan_id).expect("audit record");
        assert_eq!(record.result, "dispatched");
        assert_eq!(record.command_text, "pay the gas bill");
    }

    #[tokio::test]
    async fn test_short_utterance_skips_transcription() {
        let (orchestrator, _) = orchestrator();
        orchestrator.handle_chunk("u1", &[0u8; 40]);

        let frames = orchestrator.handle_audio_end("u1").await;

        // One fallback speak frame; the reply proves the transcription
        // client was never consulted (its failure path says "didn't catch
        // that", not "didn't hear anything").
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            ServerMessage::AgentSpeak(speak) => assert_eq!(speak.text, REPLY_NO_AUDIO),
            other => panic!("expected AGENT_SPEAK, got {:?}", other),
        }
        assert_eq!(orchestrator.pending_audits(), 0);
    }

    #[tokio::test]
    async fn test_audio_end_without_chunks_is_harmless() {
        let (orchestrator, _) = orchestrator();
        let frames = orchestrator.handle_audio_end("u1").await;
        assert_eq!(frames.len(), 1);
    }

    #[tokio::test]
    async fn test_transcription_failure_degrades_to_retry_prompt() {
        // A full-length utterance with no STT credential: the upstream call
        // fails and the user is asked to repeat, on a live connection.
        let (orchestrator, _) = orchestrator();
        orchestrator.handle_chunk("u1", &[0u8; 200]);

        let frames = orchestrator.handle_audio_end("u1").await;

        assert_eq!(frames.len(), 1);
        match &frames[0] {
            ServerMessage::AgentSpeak(speak) => assert_eq!(speak.text, REPLY_NOT_UNDERSTOOD),
            other => panic!("expected AGENT_SPEAK, got {:?}", other),
        }
        // The buffer drained even though transcription failed.
        let frames = orchestrator.handle_audio_end("u1").await;
        match &frames[0] {
            ServerMessage::AgentSpeak(speak) => assert_eq!(speak.text, REPLY_NO_AUDIO),
            other => panic!("expected AGENT_SPEAK, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_base64_chunks_append_like_binary() {
        let (orchestrator, _) = orchestrator();
        let encoded = base64::engine::general_purpose::STANDARD.encode([1u8; 60]);
        orchestrator.handle_base64_chunk("u1", &encoded);
        orchestrator.handle_chunk("u1", &[2u8; 30]);

        // 90 bytes total: still below the 100-byte minimum.
        let frames = orchestrator.handle_audio_end("u1").await;
        match &frames[0] {
            ServerMessage::AgentSpeak(speak) => assert_eq!(speak.text, REPLY_NO_AUDIO),
            other => panic!("expected AGENT_SPEAK, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execution_result_updates_audit_and_confirms() {
        let (orchestrator, store) = orchestrator();
        let frames = orchestrator.handle_text_command("u1", "check my balance").await;
        let plan_id = dispatched_plan(&frames).plan_id.clone();

        let frames = orchestrator
            .handle_execution_result(
                "u1",
                ExecutionResult {
                    plan_id: plan_id.clone(),
                    status: "success".to_string(),
                    error: None,
                },
            )
            .await;

        assert_eq!(frames.len(), 1);
        match &frames[0] {
            ServerMessage::AgentSpeak(speak) => assert_eq!(speak.text, REPLY_EXECUTED),
            other => panic!("expected AGENT_SPEAK, got {:?}", other),
        }
        assert_eq!(store.get_by_plan(&plan_id).unwrap().result, "success");
        assert_eq!(orchestrator.pending_audits(), 0);
    }

    #[tokio::test]
    async fn test_execution_failure_mentions_the_error() {
        let (orchestrator, store) = orchestrator();
        let frames = orchestrator.handle_text_command("u1", "transfer money").await;
        let plan_id = dispatched_plan(&frames).plan_id.clone();

        let frames = orchestrator
            .handle_execution_result(
                "u1",
                ExecutionResult {
                    plan_id: plan_id.clone(),
                    status: "failed".to_string(),
                    error: Some("element not found".to_string()),
                },
            )
            .await;

        match &frames[0] {
            ServerMessage::AgentSpeak(speak) => {
                assert!(speak.text.contains("element not found"));
            }
            other => panic!("expected AGENT_SPEAK, got {:?}", other),
        }
        assert_eq!(
            store.get_by_plan(&plan_id).unwrap().result,
            "failed: element not found"
        );
    }

    #[tokio::test]
    async fn test_unknown_plan_id_ignored_silently() {
        let (orchestrator, _) = orchestrator();
        let frames = orchestrator
            .handle_execution_result(
                "u1",
                ExecutionResult {
                    plan_id: "never-dispatched".to_string(),
                    status: "success".to_string(),
                    error: None,
                },
            )
            .await;
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_discards_state_and_sweeps_pending() {
        let (orchestrator, store) = orchestrator();
        orchestrator.handle_chunk("u1", &[0u8; 500]);
        orchestrator.handle_context_update("u1", UserContext::default());
        let frames = orchestrator.handle_text_command("u1", "check my balance").await;
        let plan_id = dispatched_plan(&frames).plan_id.clone();

        orchestrator.handle_disconnect("u1").await;

        assert_eq!(orchestrator.pending_audits(), 0);
        assert_eq!(store.get_by_plan(&plan_id).unwrap().result, "abandoned");
        // A late result for the swept plan is now an unknown id.
        let frames = orchestrator
            .handle_execution_result(
                "u1",
                ExecutionResult {
                    plan_id,
                    status: "success".to_string(),
                    error: None,
                },
            )
            .await;
        assert!(frames.is_empty());
    }
}
