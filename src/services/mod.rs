//! # External AI-Service Adapters
//!
//! HTTP adapters for the three services the voice pipeline depends on:
//!
//! - **transcribe**: speech-to-text (Deepgram-compatible `/v1/listen`)
//! - **planner**: language-model action planning (OpenAI-compatible chat
//!   completions), plus the deterministic keyword fallback
//! - **synthesize**: text-to-speech (`/v1/speak`)
//!
//! All three are single-attempt with a per-service timeout; every failure is
//! an ordinary error the orchestrator degrades from, never a reason to drop
//! the connection.

pub mod planner;
pub mod synthesize;
pub mod transcribe;

pub use planner::PlanGenerator;
pub use synthesize::SpeechSynthesizer;
pub use transcribe::TranscriptionClient;
