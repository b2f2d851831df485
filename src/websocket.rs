//! # WebSocket Agent Endpoint
//!
//! Handles the long-lived, bidirectional agent connection at `/ws/agent/v1`.
//! Each connection is one Actix actor; the actor mailbox plus `ctx.wait` give
//! the per-connection guarantee that frame N+1 is not processed until frame
//! N's effects (including every outbound send) have been issued.
//!
//! ## Connection Lifecycle:
//! 1. **Token check**: `?auth_token=` is validated in the route handler; a
//!    bad token gets a policy-violation close and the session is never
//!    registered
//! 2. **Rate check**: the per-user connection quota is enforced before the
//!    upgrade (429 on denial)
//! 3. **Registration**: the new handle replaces any previous one for the same
//!    user, and the displaced session is closed explicitly
//! 4. **Frame loop**: malformed frames are logged and skipped; only
//!    transport-level failures terminate the loop
//! 5. **Teardown**: unregister, drop buffered audio and context, sweep
//!    pending audit correlations

use crate::auth;
use crate::error::AgentError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::{ConnectionRegistry, SessionHandle};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the server pings idle peers.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Peers silent for longer than this are presumed gone.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Registry of live agent connections, keyed by user id.
pub type AgentRegistry = ConnectionRegistry<Addr<AgentWebSocket>>;

/// One agent connection.
pub struct AgentWebSocket {
    /// Authenticated user, or `None` when the token was rejected; the actor
    /// then closes immediately without registering.
    user_id: Option<String>,

    /// Distinguishes this session from a replacement for the same user.
    connection_id: Uuid,

    state: AppState,

    last_heartbeat: Instant,
}

impl AgentWebSocket {
    pub fn new(user_id: Option<String>, state: AppState) -> Self {
        Self {
            user_id,
            connection_id: Uuid::new_v4(),
            state,
            last_heartbeat: Instant::now(),
        }
    }

    /// Serialize and transmit one outbound frame.
    fn send_frame(ctx: &mut ws::WebsocketContext<Self>, frame: &ServerMessage) {
        match serde_json::to_string(frame) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(error = %err, "Failed to serialize outbound frame"),
        }
    }

    /// Run a processing episode to completion before the next inbound frame.
    ///
    /// `ctx.wait` parks mailbox delivery until the future resolves, so the
    /// returned frames go out, in order, before anything else is handled.
    fn run_episode<F>(&mut self, ctx: &mut ws::WebsocketContext<Self>, episode: F)
    where
        F: std::future::Future<Output = Vec<ServerMessage>> + 'static,
    {
        ctx.wait(actix::fut::wrap_future(episode).map(
            |frames, _act: &mut Self, ctx: &mut ws::WebsocketContext<Self>| {
                for frame in &frames {
                    Self::send_frame(ctx, frame);
                }
            },
        ));
    }

    /// Route one parsed inbound message.
    fn dispatch(
        &mut self,
        user_id: String,
        message: ClientMessage,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let orchestrator = self.state.orchestrator.clone();
        match message {
            ClientMessage::ContextUpdate(context) => {
                orchestrator.handle_context_update(&user_id, context);
            }
            ClientMessage::AudioChunkBase64 { data } => {
                orchestrator.handle_base64_chunk(&user_id, &data);
            }
            ClientMessage::AudioEnd => {
                self.run_episode(ctx, async move {
                    orchestrator.handle_audio_end(&user_id).await
                });
            }
            ClientMessage::TextCommand { text } => {
                self.run_episode(ctx, async move {
                    orchestrator.handle_text_command(&user_id, &text).await
                });
            }
            ClientMessage::ExecutionResult(result) => {
                self.run_episode(ctx, async move {
                    orchestrator.handle_execution_result(&user_id, result).await
                });
            }
        }
    }
}

/// Message for delivering an outbound frame through the registry.
#[derive(Message)]
#[rtype(result = "()")]
pub struct DeliverFrame(pub ServerMessage);

/// Message asking a displaced session to close its transport.
#[derive(Message)]
#[rtype(result = "()")]
pub struct CloseSession;

impl SessionHandle for Addr<AgentWebSocket> {
    fn deliver(&self, message: ServerMessage) {
        self.do_send(DeliverFrame(message));
    }

    fn close(&self) {
        self.do_send(CloseSession);
    }
}

impl Actor for AgentWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let Some(user_id) = self.user_id.clone() else {
            warn!("Rejecting unauthenticated agent connection");
            ctx.close(Some(ws::CloseReason {
                code: ws::CloseCode::Policy,
                description: Some("invalid or expired token".to_string()),
            }));
            ctx.stop();
            return;
        };

        info!(user_id = %user_id, connection_id = %self.connection_id, "Agent connected");

        let displaced =
            self.state
                .registry
                .register(&user_id, self.connection_id, ctx.address());
        if let Some(displaced) = displaced {
            info!(user_id = %user_id, "Closing displaced session");
            displaced.close();
        }

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("Heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let Some(user_id) = self.user_id.clone() else {
            return;
        };

        // A displaced session no longer owns the user's entry; its teardown
        // must not wipe state now belonging to the replacement connection.
        let owned = self.state.registry.unregister(&user_id, self.connection_id);
        if owned {
            self.state.rate_limiter.forget(&user_id);
            let orchestrator = self.state.orchestrator.clone();
            let cleanup_user = user_id.clone();
            tokio::spawn(async move {
                orchestrator.handle_disconnect(&cleanup_user).await;
            });
        }

        info!(user_id = %user_id, connection_id = %self.connection_id, owned = owned,
            "Agent disconnected");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AgentWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let Some(user_id) = self.user_id.clone() else {
            return;
        };

        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                error!(user_id = %user_id, error = %err, "WebSocket protocol error");
                ctx.stop();
                return;
            }
        };

        match msg {
            ws::Message::Text(text) => {
                if !self.state.rate_limiter.check_message(&user_id) {
                    debug!(user_id = %user_id, "Message rate exceeded, dropping frame");
                    return;
                }
                // A bad frame costs one log line, never the connection.
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => self.dispatch(user_id, message, ctx),
                    Err(err) => {
                        warn!(user_id = %user_id, error = %err, "Malformed frame, skipping");
                    }
                }
            }
            ws::Message::Binary(data) => {
                if !self.state.rate_limiter.check_message(&user_id) {
                    debug!(user_id = %user_id, "Message rate exceeded, dropping chunk");
                    return;
                }
                self.state.orchestrator.handle_chunk(&user_id, &data);
            }
            ws::Message::Ping(data) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            ws::Message::Pong(_) => {
                self.last_heartbeat = Instant::now();
            }
            ws::Message::Close(reason) => {
                info!(user_id = %user_id, reason = ?reason, "Client closed connection");
                ctx.close(reason);
                ctx.stop();
            }
            ws::Message::Continuation(_) => {
                warn!(user_id = %user_id, "Unexpected continuation frame");
            }
            ws::Message::Nop => {}
        }
    }
}

impl Handler<DeliverFrame> for AgentWebSocket {
    type Result = ();

    fn handle(&mut self, msg: DeliverFrame, ctx: &mut Self::Context) {
        Self::send_frame(ctx, &msg.0);
    }
}

impl Handler<CloseSession> for AgentWebSocket {
    type Result = ();

    fn handle(&mut self, _msg: CloseSession, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Normal,
            description: Some("session replaced by a newer connection".to_string()),
        }));
        ctx.stop();
    }
}

/// HTTP-to-WebSocket upgrade handler for `/ws/agent/v1`.
///
/// Token validation and the connection-rate check both run before the
/// upgrade; a rejected token still upgrades but closes immediately with a
/// policy code, so WebSocket clients see a close reason rather than a bare
/// handshake failure.
pub async fn agent_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let query = web::Query::<HashMap<String, String>>::from_query(req.query_string())
        .unwrap_or_else(|_| web::Query(HashMap::new()));
    let config = state.get_config();

    let user_id = match query.get("auth_token") {
        Some(token) => match auth::authenticate(token, &config.auth.secret_key) {
            Ok(user_id) => {
                if !state.rate_limiter.check_connection(&user_id) {
                    return Err(AgentError::RateLimited(
                        "connection attempts exceeded, slow down".to_string(),
                    )
                    .into());
                }
                Some(user_id)
            }
            Err(err) => {
                warn!(error = %err, "Connect token rejected");
                None
            }
        },
        None => {
            warn!("Connection attempt without auth_token");
            None
        }
    };

    ws::start(
        AgentWebSocket::new(user_id, state.get_ref().clone()),
        &req,
        stream,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AgentSpeak;

    #[test]
    fn test_agent_speak_frame_shape() {
        let frame = ServerMessage::AgentSpeak(AgentSpeak::text_only("Hello"));
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();

        assert_eq!(json["type"], "AGENT_SPEAK");
        assert_eq!(json["payload"]["text"], "Hello");
        assert_eq!(json["payload"]["audio_base64"], serde_json::Value::Null);
        assert_eq!(json["payload"]["use_browser_tts"], true);
    }

    #[test]
    fn test_action_dispatch_frame_shape() {
        let plan: crate::protocol::ActionPlan = serde_json::from_str(
            r#"{"plan_id":"p1","steps":[{"kind":"navigate","url":"/dashboard"}]}"#,
        )
        .unwrap();
        let frame = ServerMessage::ActionDispatch(plan);
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();

        assert_eq!(json["type"], "ACTION_DISPATCH");
        assert_eq!(json["payload"]["plan_id"], "p1");
        assert_eq!(json["payload"]["steps"][0]["kind"], "navigate");
    }
}
