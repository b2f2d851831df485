//! Health and metrics endpoints. Service credentials are reported only as
//! configured/unconfigured, never echoed.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": "agent-voice-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "environment": config.server.environment,
        },
        "connections": {
            "active": state.registry.connected_count(),
            "pending_audits": state.orchestrator.pending_audits(),
        },
        "services": {
            "stt": { "configured": !config.services.stt.api_key.is_empty() },
            "llm": { "configured": !config.services.llm.api_key.is_empty() },
            "tts": { "configured": !config.services.tts.api_key.is_empty() },
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.metrics.read().unwrap();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "average_duration_ms": metric.average_duration_ms(),
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "totals": {
            "request_count": metrics.request_count,
            "error_count": metrics.error_count,
        },
        "active_connections": state.registry.connected_count(),
        "endpoints": endpoint_stats,
    }))
}
