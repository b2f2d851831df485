//! # Utterance Assembly
//!
//! Accumulates audio chunks per user between the first chunk of an utterance
//! and its `AUDIO_END`. Chunks arrive as binary frames or base64 text frames
//! and are appended in arrival order; `finalize` drains the buffer atomically
//! so the next utterance starts clean.
//!
//! A buffer exists only while an utterance is in flight. A per-user size cap
//! bounds memory when a client streams chunks but never sends `AUDIO_END`.

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

/// Per-user append-only audio accumulator.
pub struct AudioAssembler {
    buffers: Mutex<HashMap<String, Vec<u8>>>,
    max_utterance_bytes: usize,
}

impl AudioAssembler {
    pub fn new(max_utterance_bytes: usize) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            max_utterance_bytes,
        }
    }

    /// Append a chunk to the user's buffer, creating it on the first chunk.
    ///
    /// Returns `false` when the chunk would push the buffer past the size cap;
    /// the chunk is dropped and the buffer keeps what it already holds.
    pub fn append(&self, user_id: &str, chunk: &[u8]) -> bool {
        let mut buffers = self.buffers.lock().unwrap();
        let buffer = buffers.entry(user_id.to_string()).or_default();

        if buffer.len() + chunk.len() > self.max_utterance_bytes {
            warn!(
                user_id = %user_id,
                buffered = buffer.len(),
                chunk = chunk.len(),
                cap = self.max_utterance_bytes,
                "Audio buffer cap reached, dropping chunk"
            );
            return false;
        }

        buffer.extend_from_slice(chunk);
        true
    }

    /// Atomically remove and return the accumulated bytes for a user.
    ///
    /// Returns an empty vec when no buffer exists, so an `AUDIO_END` without
    /// any preceding chunks is harmless.
    pub fn finalize(&self, user_id: &str) -> Vec<u8> {
        self.buffers
            .lock()
            .unwrap()
            .remove(user_id)
            .unwrap_or_default()
    }

    /// Drop any in-flight buffer for a user (disconnect cleanup).
    pub fn discard(&self, user_id: &str) {
        self.buffers.lock().unwrap().remove(user_id);
    }

    /// Bytes currently buffered for a user.
    pub fn buffered_len(&self, user_id: &str) -> usize {
        self.buffers
            .lock()
            .unwrap()
            .get(user_id)
            .map_or(0, Vec::len)
    }
}
