use crate::config::ChannelConfig;
use crate::error::AppError;
use crate::state::AppState;
use crate::websocket::dispatch::{ChannelDispatcher, Dispatched};
use crate::websocket::{ConnectionId, ConnectionRegistry, ConnectionState, InboundFrame, OutboundEvent};
use actix::{Actor, ActorContext, ActorFutureExt, AsyncContext, StreamHandler, WrapFuture};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Subscribe to this conversation as soon as the handshake succeeds
    pub conversation_id: Option<Uuid>,
}

// WebSocket Actor
struct WsSession {
    state: ConnectionState,
    /// Set while the connection is in the registry
    registered: Option<(Uuid, ConnectionId)>,
    initial_conversation: Option<Uuid>,
    dispatcher: ChannelDispatcher,
    registry: ConnectionRegistry,
    channel: ChannelConfig,
    hb: Instant,
}

impl WsSession {
    fn new(app_state: AppState, initial_conversation: Option<Uuid>) -> Self {
        Self {
            state: ConnectionState::Connecting,
            registered: None,
            initial_conversation,
            registry: app_state.registry.clone(),
            channel: app_state.config.channel,
            dispatcher: ChannelDispatcher::new(app_state),
            hb: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.channel.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.hb) > act.channel.client_timeout {
                tracing::warn!(user_id = ?act.state.user_id(), "channel heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, event: &OutboundEvent) {
        ctx.text(event.to_json());
    }

    fn reject(&mut self, ctx: &mut ws::WebsocketContext<Self>, err: AppError) {
        self.send(ctx, &OutboundEvent::error(&err, None));
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Policy,
            description: Some(err.to_string()),
        }));
        self.state.close();
        ctx.stop();
    }

    fn on_authenticated(&mut self, user_id: Uuid, ctx: &mut ws::WebsocketContext<Self>) {
        if let Err(e) = self.state.authenticate(user_id) {
            tracing::debug!(error = %e, "ignoring late handshake result");
            return;
        }

        let (connection_id, events) = self.registry.register(user_id);
        self.registered = Some((user_id, connection_id));
        ctx.add_stream(ReceiverStream::new(events));

        tracing::info!(user_id = %user_id, "channel session authenticated");
        self.send(ctx, &OutboundEvent::SessionAuthenticated { user_id });

        if let Some(conversation_id) = self.initial_conversation.take() {
            self.dispatch(
                InboundFrame::Subscribe {
                    conversation_ids: vec![conversation_id],
                },
                ctx,
            );
        }
    }

    /// Handle a frame to completion before reading the next one, so replies keep frame order
    fn dispatch(&mut self, frame: InboundFrame, ctx: &mut ws::WebsocketContext<Self>) {
        let Some((user_id, connection_id)) = self.registered else {
            return;
        };
        let dispatcher = self.dispatcher.clone();

        ctx.wait(
            async move { dispatcher.handle(user_id, connection_id, frame).await }
                .into_actor(self)
                .map(|dispatched: Dispatched, act, ctx| {
                    if let Some(scope) = dispatched.scope {
                        if let Err(e) = act.state.subscribe(scope) {
                            tracing::debug!(error = %e, "subscribe after close");
                        }
                    }
                    if let Some(reply) = dispatched.reply {
                        act.send(ctx, &reply);
                    }
                }),
        );
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match self.state {
            ConnectionState::Connecting => {
                let dispatcher = self.dispatcher.clone();
                let text = text.to_string();
                ctx.wait(
                    async move { dispatcher.authenticate(&text).await }
                        .into_actor(self)
                        .map(|result, act, ctx| match result {
                            Ok(user_id) => act.on_authenticated(user_id, ctx),
                            Err(err) => act.reject(ctx, err),
                        }),
                );
            }
            ConnectionState::Authenticated { .. } | ConnectionState::Subscribed { .. } => {
                match InboundFrame::parse(text) {
                    Ok(frame) => self.dispatch(frame, ctx),
                    Err(err) => self.send(ctx, &OutboundEvent::error(&err, None)),
                }
            }
            ConnectionState::Closed => {}
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);

        ctx.run_later(self.channel.handshake_timeout, |act, ctx| {
            if matches!(act.state, ConnectionState::Connecting) {
                tracing::debug!("channel handshake timed out");
                act.reject(ctx, AppError::Unauthorized);
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some((user_id, connection_id)) = self.registered.take() {
            self.registry.unregister(user_id, connection_id);
            tracing::info!(user_id = %user_id, "channel session stopped");
        }
        self.state.close();
    }
}

/// Events fanned out through the registry
impl StreamHandler<OutboundEvent> for WsSession {
    fn handle(&mut self, event: OutboundEvent, ctx: &mut Self::Context) {
        self.send(ctx, &event);
    }

    /// The registry dropped this connection (outbound buffer overflow)
    fn finished(&mut self, ctx: &mut Self::Context) {
        if self.state.is_closed() {
            return;
        }
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Policy,
            description: Some("outbound buffer overflow".into()),
        }));
        // already removed from the registry
        self.registered = None;
        self.state.close();
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.handle_text(&text, ctx);
            }
            Ok(ws::Message::Binary(_)) => {
                let err = AppError::Validation("binary frames are not supported".into());
                if matches!(self.state, ConnectionState::Connecting) {
                    self.reject(ctx, AppError::Unauthorized);
                } else {
                    self.send(ctx, &OutboundEvent::error(&err, None));
                }
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(?reason, "channel close frame received");
                ctx.close(reason);
                self.state.close();
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(error = %e, "channel protocol error");
                self.state.close();
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// Live channel; authenticates in-band with the first frame
/// GET /ws
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    params: web::Query<WsParams>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let session = WsSession::new(state.get_ref().clone(), params.conversation_id);
    ws::start(session, &req, stream)
}
