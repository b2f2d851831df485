//! # Configuration Management
//!
//! Loads application configuration from layered sources:
//! - Built-in defaults
//! - TOML configuration file (config.toml)
//! - Environment variables (APP_ prefix, plus a few well-known names used by
//!   deployment platforms and the AI-service providers)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Well-known environment variables (HOST, PORT, DEEPGRAM_API_KEY,
//!    GROQ_API_KEY, TTS_API_KEY, SECRET_KEY, APP_ENV)
//! 2. APP_-prefixed environment variables
//! 3. config.toml
//! 4. Defaults

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub services: ServicesConfig,
    pub limits: LimitsConfig,
}

/// Server bind address and deployment mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Deployment mode; rate limiting is enforced only in "production".
    pub environment: String,
}

/// Connect-token validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret shared with the token issuer.
    pub secret_key: String,
}

/// Credentials and endpoints for the three external AI services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    pub stt: SttConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
}

/// Speech-to-text service (Deepgram-compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

/// Language-model planner service (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

/// Text-to-speech service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    pub api_key: String,
    pub base_url: String,
    pub voice: String,
    pub timeout_secs: u64,
}

/// Rate limits and audio-buffer policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// New WebSocket connections allowed per user per 60-second window.
    pub connections_per_minute: u32,
    /// Inbound messages allowed per connection per 1-second window.
    pub messages_per_second: u32,
    /// Utterances shorter than this are treated as "no usable audio".
    pub min_utterance_bytes: usize,
    /// Hard per-user cap on in-flight audio; chunks beyond it are dropped.
    pub max_utterance_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                environment: "development".to_string(),
            },
            auth: AuthConfig {
                secret_key: "changeme".to_string(),
            },
            services: ServicesConfig {
                stt: SttConfig {
                    api_key: String::new(),
                    base_url: "https://api.deepgram.com".to_string(),
                    model: "nova-2".to_string(),
                    timeout_secs: 30,
                },
                llm: LlmConfig {
                    api_key: String::new(),
                    base_url: "https://api.groq.com/openai/v1".to_string(),
                    model: "llama3-70b-8192".to_string(),
                    timeout_secs: 30,
                },
                tts: TtsConfig {
                    api_key: String::new(),
                    base_url: "https://api.deepgram.com".to_string(),
                    voice: "aura-asteria-en".to_string(),
                    timeout_secs: 15,
                },
            },
            limits: LimitsConfig {
                connections_per_minute: 10,
                messages_per_second: 5,
                min_utterance_bytes: 100,
                max_utterance_bytes: 10 * 1024 * 1024,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        // Well-known variable names used by deployment platforms and the
        // service providers themselves.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }
        if let Ok(environment) = env::var("APP_ENV") {
            settings = settings.set_override("server.environment", environment)?;
        }
        if let Ok(key) = env::var("SECRET_KEY") {
            settings = settings.set_override("auth.secret_key", key)?;
        }
        if let Ok(key) = env::var("DEEPGRAM_API_KEY") {
            settings = settings.set_override("services.stt.api_key", key)?;
        }
        if let Ok(key) = env::var("GROQ_API_KEY") {
            settings = settings.set_override("services.llm.api_key", key)?;
        }
        if let Ok(key) = env::var("TTS_API_KEY") {
            settings = settings.set_override("services.tts.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations that cannot serve traffic.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.limits.connections_per_minute == 0 {
            return Err(anyhow::anyhow!("connections_per_minute must be greater than 0"));
        }

        if self.limits.messages_per_second == 0 {
            return Err(anyhow::anyhow!("messages_per_second must be greater than 0"));
        }

        if self.limits.min_utterance_bytes >= self.limits.max_utterance_bytes {
            return Err(anyhow::anyhow!(
                "min_utterance_bytes must be below max_utterance_bytes"
            ));
        }

        if self.is_production() && self.auth.secret_key == "changeme" {
            return Err(anyhow::anyhow!(
                "auth.secret_key must be set in production"
            ));
        }

        Ok(())
    }

    /// Whether rate limits are enforced.
    pub fn is_production(&self) -> bool {
        self.server.environment == "production"
    }
}
