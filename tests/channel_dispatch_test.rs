/// Live channel frames run through the same services as the REST routes
mod common;

use chat_service::models::ContentType;
use chat_service::services::message_service::{ListMessages, SendMessage};
use chat_service::store::FailPoint;
use chat_service::websocket::dispatch::ChannelDispatcher;
use chat_service::websocket::{InboundFrame, OutboundEvent, Scope};
use common::{idempotency_key, token_for, TestContext};
use futures::future::join_all;
use serde_json::json;
use uuid::Uuid;

fn frame(value: serde_json::Value) -> InboundFrame {
    InboundFrame::parse(&value.to_string()).unwrap()
}

#[tokio::test]
async fn test_handshake_requires_auth_frame() {
    let ctx = TestContext::new();
    let dispatcher = ChannelDispatcher::new(ctx.state.clone());
    let user = Uuid::new_v4();

    let auth = json!({ "type": "auth", "token": token_for(user) }).to_string();
    assert_eq!(dispatcher.authenticate(&auth).await.unwrap(), user);

    let subscribe_first = json!({ "type": "subscribe" }).to_string();
    assert_eq!(
        dispatcher.authenticate(&subscribe_first).await.unwrap_err().status_code(),
        401
    );

    let forged = json!({ "type": "auth", "token": "not.a.jwt" }).to_string();
    assert_eq!(dispatcher.authenticate(&forged).await.unwrap_err().status_code(), 401);
    assert_eq!(dispatcher.authenticate("{").await.unwrap_err().status_code(), 401);
}

#[tokio::test]
async fn test_channel_send_shares_idempotency_with_rest() {
    let ctx = TestContext::new();
    let dispatcher = ChannelDispatcher::new(ctx.state.clone());
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation_id = ctx.open(alice, bob).await;

    let (alice_conn, _alice_rx) = ctx.state.registry.register(alice);
    let (bob_conn, mut bob_rx) = ctx.state.registry.register(bob);
    let subscribed = dispatcher
        .handle(bob, bob_conn, frame(json!({ "type": "subscribe", "conversation_ids": [] })))
        .await;
    assert_eq!(subscribed.scope, Some(Scope::All));
    assert!(matches!(
        subscribed.reply,
        Some(OutboundEvent::SessionSubscribed { all: true, .. })
    ));

    let key = idempotency_key();
    let dispatched = dispatcher
        .handle(
            alice,
            alice_conn,
            frame(json!({
                "type": "message.send",
                "conversation_id": conversation_id,
                "content": "over the wire",
                "idempotency_key": key,
                "request_id": "r-1",
            })),
        )
        .await;

    let Some(OutboundEvent::MessageAck {
        request_id,
        message_id,
        created,
        ..
    }) = dispatched.reply
    else {
        panic!("expected an ack");
    };
    assert!(created);
    assert_eq!(request_id.as_deref(), Some("r-1"));

    match bob_rx.try_recv() {
        Ok(OutboundEvent::MessageCreated { message }) => assert_eq!(message.id, message_id),
        other => panic!("expected message.created, got {other:?}"),
    }

    // same key over REST replays the channel write
    let replay = ctx
        .state
        .messages
        .send(SendMessage {
            conversation_id,
            sender_id: alice,
            content: "over the wire".into(),
            content_type: ContentType::Text,
            idempotency_key: Some(key),
        })
        .await
        .unwrap();
    assert!(!replay.created);
    assert_eq!(replay.message.id, message_id);
    assert!(bob_rx.try_recv().is_err(), "replays are not fanned out");
    assert_eq!(ctx.store.message_count(conversation_id).await, 1);
}

#[tokio::test]
async fn test_errors_become_frames_with_request_id() {
    let ctx = TestContext::new();
    let dispatcher = ChannelDispatcher::new(ctx.state.clone());
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation_id = ctx.open(alice, bob).await;
    let (conn, _rx) = ctx.state.registry.register(alice);

    let dispatched = dispatcher
        .handle(
            alice,
            conn,
            frame(json!({
                "type": "message.send",
                "conversation_id": conversation_id,
                "content": "no key",
                "request_id": "r-2",
            })),
        )
        .await;
    match dispatched.reply {
        Some(OutboundEvent::Error(body)) => {
            assert_eq!(body.code, "validation_error");
            assert_eq!(body.request_id.as_deref(), Some("r-2"));
        }
        other => panic!("expected error frame, got {other:?}"),
    }

    let again = dispatcher
        .handle(alice, conn, frame(json!({ "type": "auth", "token": token_for(alice) })))
        .await;
    assert!(matches!(again.reply, Some(OutboundEvent::Error(ref b)) if b.code == "validation_error"));

    let stranger_conversation = ctx.open(bob, Uuid::new_v4()).await;
    let denied = dispatcher
        .handle(
            alice,
            conn,
            frame(json!({ "type": "subscribe", "conversation_ids": [stranger_conversation] })),
        )
        .await;
    assert!(denied.scope.is_none());
    assert!(matches!(denied.reply, Some(OutboundEvent::Error(ref b)) if b.code == "not_found"));
}

#[tokio::test]
async fn test_read_set_notifies_only_the_other_participant() {
    let ctx = TestContext::new();
    let dispatcher = ChannelDispatcher::new(ctx.state.clone());
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation_id = ctx.open(alice, bob).await;
    let message = ctx.send(conversation_id, alice, "read me").await;

    let (alice_conn, mut alice_rx) = ctx.state.registry.register(alice);
    ctx.state.registry.subscribe(alice, alice_conn, Scope::All);
    let (bob_conn, mut bob_rx) = ctx.state.registry.register(bob);
    ctx.state.registry.subscribe(bob, bob_conn, Scope::All);

    let dispatched = dispatcher
        .handle(
            bob,
            bob_conn,
            frame(json!({
                "type": "read.set",
                "conversation_id": conversation_id,
                "up_to_message_id": message.id,
            })),
        )
        .await;
    assert!(dispatched.reply.is_none());

    match alice_rx.try_recv() {
        Ok(OutboundEvent::MessageRead {
            reader_id,
            up_to_message_id,
            ..
        }) => {
            assert_eq!(reader_id, bob);
            assert_eq!(up_to_message_id, message.id);
        }
        other => panic!("expected message.read, got {other:?}"),
    }
    assert!(bob_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_typing_is_dropped_in_blocked_conversations() {
    let ctx = TestContext::new();
    let dispatcher = ChannelDispatcher::new(ctx.state.clone());
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation_id = ctx.open(alice, bob).await;

    let (alice_conn, _alice_rx) = ctx.state.registry.register(alice);
    let (bob_conn, mut bob_rx) = ctx.state.registry.register(bob);
    ctx.state
        .registry
        .subscribe(bob, bob_conn, Scope::from_ids(vec![conversation_id]));

    let typing = json!({
        "type": "typing.set",
        "conversation_id": conversation_id,
        "is_typing": true,
    });

    let dispatched = dispatcher.handle(alice, alice_conn, frame(typing.clone())).await;
    assert!(dispatched.reply.is_none());
    assert!(matches!(
        bob_rx.try_recv(),
        Ok(OutboundEvent::ConversationTyping { is_typing: true, .. })
    ));

    ctx.state.safety.block(bob, alice).await.unwrap();
    assert!(matches!(
        bob_rx.try_recv(),
        Ok(OutboundEvent::ConversationBlocked { blocked: true, .. })
    ));

    let dispatched = dispatcher.handle(alice, alice_conn, frame(typing)).await;
    assert!(dispatched.reply.is_none());
    assert!(bob_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_full_outbound_buffer_evicts_connection() {
    let mut config = common::test_config();
    config.channel.outbound_buffer = 1;
    let ctx = TestContext::with_config(config);
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation_id = ctx.open(alice, bob).await;

    let (bob_conn, mut bob_rx) = ctx.state.registry.register(bob);
    ctx.state.registry.subscribe(bob, bob_conn, Scope::All);

    ctx.send(conversation_id, alice, "first").await;
    ctx.send(conversation_id, alice, "second").await;

    assert_eq!(ctx.state.registry.connection_count(bob), 0);
    assert!(matches!(bob_rx.recv().await, Some(OutboundEvent::MessageCreated { .. })));
    assert!(bob_rx.recv().await.is_none(), "stream ends after eviction");
    // the write itself is unaffected
    assert_eq!(ctx.store.message_count(conversation_id).await, 2);
}

#[tokio::test]
async fn test_lost_commit_ack_is_still_announced() {
    let ctx = TestContext::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation_id = ctx.open(alice, bob).await;
    let (bob_conn, mut bob_rx) = ctx.state.registry.register(bob);
    ctx.state.registry.subscribe(bob, bob_conn, Scope::All);

    ctx.store.fail_next(FailPoint::InsertMessageAck, 1);
    let submission = ctx
        .state
        .messages
        .send(SendMessage {
            conversation_id,
            sender_id: alice,
            content: "did that go through?".into(),
            content_type: ContentType::Text,
            idempotency_key: Some(idempotency_key()),
        })
        .await
        .unwrap();

    assert!(submission.created);
    assert_eq!(ctx.store.message_count(conversation_id).await, 1);
    match bob_rx.try_recv() {
        Ok(OutboundEvent::MessageCreated { message }) => assert_eq!(message.id, submission.message.id),
        other => panic!("expected message.created, got {other:?}"),
    }
    assert!(bob_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_concurrent_sends_deliver_in_list_order() {
    let ctx = TestContext::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation_id = ctx.open(alice, bob).await;
    let (bob_conn, mut bob_rx) = ctx.state.registry.register(bob);
    ctx.state.registry.subscribe(bob, bob_conn, Scope::All);

    let sends = (0..20).map(|i| {
        let messages = ctx.state.messages.clone();
        let sender_id = if i % 2 == 0 { alice } else { bob };
        async move {
            messages
                .send(SendMessage {
                    conversation_id,
                    sender_id,
                    content: format!("message {i}"),
                    content_type: ContentType::Text,
                    idempotency_key: Some(idempotency_key()),
                })
                .await
        }
    });
    for result in join_all(sends).await {
        assert!(result.unwrap().created);
    }

    let mut delivered = Vec::new();
    while let Ok(event) = bob_rx.try_recv() {
        if let OutboundEvent::MessageCreated { message } = event {
            delivered.push(message.id);
        }
    }

    let page = ctx
        .state
        .messages
        .list(
            alice,
            conversation_id,
            ListMessages {
                limit: Some(50),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let listed: Vec<Uuid> = page.messages.iter().map(|m| m.id).collect();

    assert_eq!(listed.len(), 20);
    assert_eq!(delivered, listed);
}
