//! # Application State
//!
//! Shared state handed to every HTTP handler and WebSocket session. The
//! service objects (orchestrator, connection registry, rate limiter) are
//! constructed once at startup and passed around by reference. There are no
//! module-level singletons, so tests can build an `AppState` around
//! substitute collaborators.

use crate::audit::AuditStore;
use crate::config::AppConfig;
use crate::error::AgentResult;
use crate::orchestrator::Orchestrator;
use crate::ratelimit::RateLimiter;
use crate::websocket::AgentRegistry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<RwLock<AppConfig>>,

    /// Protocol state machine shared by all connections.
    pub orchestrator: Arc<Orchestrator>,

    /// Live connection handles, one per user.
    pub registry: Arc<AgentRegistry>,

    /// Connection and message quotas.
    pub rate_limiter: Arc<RateLimiter>,

    /// HTTP request metrics.
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started.
    pub start_time: Instant,
}

/// Request counters collected by the logging middleware.
#[derive(Debug, Default)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Per-endpoint request counters.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl AppState {
    /// Wire up the service objects from configuration and an audit store.
    pub fn new(config: AppConfig, audit_store: Arc<dyn AuditStore>) -> AgentResult<Self> {
        let orchestrator = Orchestrator::new(&config, audit_store)?;
        let rate_limiter = RateLimiter::new(
            config.limits.connections_per_minute,
            config.limits.messages_per_second,
            config.is_production(),
        );

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            orchestrator: Arc::new(orchestrator),
            registry: Arc::new(AgentRegistry::new()),
            rate_limiter: Arc::new(rate_limiter),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        })
    }

    /// Copy of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Record one finished HTTP request (called by the logging middleware).
    pub fn record_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
        if is_error {
            metrics.error_count += 1;
        }

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
