//! Channel frame handling, shared by the live connection actor and tests
//!
//! Write frames go through the same services as the REST routes, so a message sent over
//! the channel is indistinguishable from one sent over HTTP with the same key.

use uuid::Uuid;

use super::{ConnectionId, InboundFrame, OutboundEvent, Scope};
use crate::error::{AppError, AppResult};
use crate::middleware::ConversationParticipant;
use crate::services::message_service::SendMessage;
use crate::services::rate_limiter::Bucket;
use crate::state::AppState;

/// Result of handling one frame
#[derive(Debug, Default)]
pub struct Dispatched {
    /// Frame for the issuing connection only
    pub reply: Option<OutboundEvent>,
    /// New subscription scope, when the frame changed it
    pub scope: Option<Scope>,
}

impl Dispatched {
    fn none() -> Self {
        Self::default()
    }

    fn reply(event: OutboundEvent) -> Self {
        Self {
            reply: Some(event),
            scope: None,
        }
    }
}

#[derive(Clone)]
pub struct ChannelDispatcher {
    state: AppState,
}

impl ChannelDispatcher {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Resolve the handshake frame to a user id; anything but a valid `auth` is unauthorized
    pub async fn authenticate(&self, text: &str) -> AppResult<Uuid> {
        let token = match InboundFrame::parse(text) {
            Ok(InboundFrame::Auth { token }) => token,
            _ => return Err(AppError::Unauthorized),
        };

        self.state.identity.verify(&token).await.map_err(|e| {
            tracing::debug!(error = %e, "channel handshake rejected");
            AppError::Unauthorized
        })
    }

    /// Handle one frame from an authenticated connection; never fails the connection
    pub async fn handle(&self, user_id: Uuid, connection_id: ConnectionId, frame: InboundFrame) -> Dispatched {
        let request_id = frame.request_id();

        if let Err(err) = self.state.limiter.enforce(user_id, Bucket::ChannelInbound) {
            if matches!(frame, InboundFrame::TypingSet { .. }) {
                return Dispatched::none();
            }
            return Dispatched::reply(OutboundEvent::error(&err, request_id));
        }

        match self.route(user_id, connection_id, frame).await {
            Ok(dispatched) => dispatched,
            Err(err) => Dispatched::reply(OutboundEvent::error(&err, request_id)),
        }
    }

    async fn route(&self, user_id: Uuid, connection_id: ConnectionId, frame: InboundFrame) -> AppResult<Dispatched> {
        match frame {
            InboundFrame::Auth { .. } => Err(AppError::Validation("already authenticated".into())),

            InboundFrame::Subscribe { conversation_ids } => {
                for conversation_id in &conversation_ids {
                    ConversationParticipant::verify(self.state.store.as_ref(), user_id, *conversation_id)
                        .await?;
                }

                let scope = Scope::from_ids(conversation_ids);
                self.state
                    .registry
                    .subscribe(user_id, connection_id, scope.clone());

                Ok(Dispatched {
                    reply: Some(OutboundEvent::SessionSubscribed {
                        all: scope == Scope::All,
                        conversation_ids: scope.ids(),
                    }),
                    scope: Some(scope),
                })
            }

            InboundFrame::MessageSend {
                conversation_id,
                content,
                content_type,
                idempotency_key,
                request_id,
            } => {
                let submission = self
                    .state
                    .messages
                    .send(SendMessage {
                        conversation_id,
                        sender_id: user_id,
                        content,
                        content_type,
                        idempotency_key,
                    })
                    .await?;

                Ok(Dispatched::reply(OutboundEvent::MessageAck {
                    request_id,
                    message_id: submission.message.id,
                    conversation_id,
                    created: submission.created,
                }))
            }

            InboundFrame::ReadSet {
                conversation_id,
                up_to_message_id,
                ..
            } => {
                self.state
                    .read_states
                    .set_read(user_id, conversation_id, up_to_message_id)
                    .await?;
                Ok(Dispatched::none())
            }

            InboundFrame::TypingSet {
                conversation_id,
                is_typing,
            } => {
                let participant =
                    ConversationParticipant::verify(self.state.store.as_ref(), user_id, conversation_id)
                        .await?;
                if participant.conversation.blocked {
                    return Ok(Dispatched::none());
                }

                self.state.registry.publish(
                    &[participant.other_participant()],
                    conversation_id,
                    &OutboundEvent::ConversationTyping {
                        conversation_id,
                        user_id,
                        is_typing,
                    },
                );
                Ok(Dispatched::none())
            }
        }
    }
}
