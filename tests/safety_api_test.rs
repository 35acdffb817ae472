/// Blocks and reports through the HTTP surface
mod common;

use actix_web::test;
use chat_service::routes::build_app;
use chat_service::store::FailPoint;
use common::{bearer, header, idempotency_key, json_body, TestContext};
use serde_json::json;
use uuid::Uuid;

#[actix_rt::test]
async fn test_block_forbids_sending_in_both_directions() {
    let ctx = TestContext::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation_id = ctx.open(alice, bob).await;
    let app = test::init_service(build_app(ctx.data())).await;

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/blocks")
            .insert_header(bearer(alice))
            .set_json(json!({ "target_user_id": bob }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 201);
    assert_eq!(header(&resp, "location"), Some(format!("/blocks/{bob}")));

    let again = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/blocks")
            .insert_header(bearer(alice))
            .set_json(json!({ "target_user_id": bob }))
            .to_request(),
    )
    .await;
    assert_eq!(again.status(), 200);

    for sender in [alice, bob] {
        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/conversations/{conversation_id}/messages"))
                .insert_header(bearer(sender))
                .insert_header(("Idempotency-Key", idempotency_key()))
                .set_json(json!({ "content": "still there?" }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), 403);
        assert_eq!(json_body(resp).await["error"]["code"], "forbidden");
    }
    assert_eq!(ctx.store.message_count(conversation_id).await, 0);
}

#[actix_rt::test]
async fn test_block_retry_after_failed_refresh_still_forbids_sending() {
    let ctx = TestContext::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation_id = ctx.open(alice, bob).await;
    let app = test::init_service(build_app(ctx.data())).await;

    ctx.store.fail_next(FailPoint::RefreshBlockedFlag, 1);
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/blocks")
            .insert_header(bearer(alice))
            .set_json(json!({ "target_user_id": bob }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 503);
    assert_eq!(json_body(resp).await["error"]["code"], "unavailable");

    // the edge is already stored, so the retry reports it as existing
    let retry = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/blocks")
            .insert_header(bearer(alice))
            .set_json(json!({ "target_user_id": bob }))
            .to_request(),
    )
    .await;
    assert_eq!(retry.status(), 200);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/conversations/{conversation_id}/messages"))
            .insert_header(bearer(bob))
            .insert_header(("Idempotency-Key", idempotency_key()))
            .set_json(json!({ "content": "can you hear me?" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 403);
    assert_eq!(ctx.store.message_count(conversation_id).await, 0);
}

#[actix_rt::test]
async fn test_unblock_only_removes_own_edge() {
    let ctx = TestContext::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation_id = ctx.open(alice, bob).await;
    ctx.state.safety.block(alice, bob).await.unwrap();
    ctx.state.safety.block(bob, alice).await.unwrap();
    let app = test::init_service(build_app(ctx.data())).await;

    let resp = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/blocks/{bob}"))
            .insert_header(bearer(alice))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 204);

    let detail = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/conversations/{conversation_id}"))
            .insert_header(bearer(alice))
            .to_request(),
    )
    .await;
    assert_eq!(json_body(detail).await["blocked"], true);

    let resp = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/blocks/{alice}"))
            .insert_header(bearer(bob))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 204);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/conversations/{conversation_id}/messages"))
            .insert_header(bearer(alice))
            .insert_header(("Idempotency-Key", idempotency_key()))
            .set_json(json!({ "content": "back again" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 201);
}

#[actix_rt::test]
async fn test_self_block_and_missing_edge() {
    let ctx = TestContext::new();
    let alice = Uuid::new_v4();
    let app = test::init_service(build_app(ctx.data())).await;

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/blocks")
            .insert_header(bearer(alice))
            .set_json(json!({ "target_user_id": alice }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 422);

    let resp = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/blocks/{}", Uuid::new_v4()))
            .insert_header(bearer(alice))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 204);
}

#[actix_rt::test]
async fn test_report_is_accepted_and_recorded() {
    let ctx = TestContext::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation_id = ctx.open(alice, bob).await;
    let message = ctx.send(conversation_id, bob, "spam spam spam").await;
    let app = test::init_service(build_app(ctx.data())).await;

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/reports")
            .insert_header(bearer(alice))
            .set_json(json!({
                "conversation_id": conversation_id,
                "message_id": message.id,
                "reason": "spam",
                "comment": "  repeated links  ",
            }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 202);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "pending");

    let reports = ctx.store.reports().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].id.to_string(), body["report_id"].as_str().unwrap());
    assert_eq!(reports[0].comment.as_deref(), Some("repeated links"));

    // reporting never blocks
    let detail = ctx.state.conversations.detail(alice, conversation_id).await.unwrap();
    assert!(!detail.conversation.blocked);
}

#[actix_rt::test]
async fn test_report_validation() {
    let ctx = TestContext::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation_id = ctx.open(alice, bob).await;
    let app = test::init_service(build_app(ctx.data())).await;

    let cases = [
        (json!({ "conversation_id": conversation_id, "reason": "rudeness" }), 422),
        (
            json!({ "conversation_id": conversation_id, "reason": "other", "comment": "x".repeat(1001) }),
            422,
        ),
        (
            json!({ "conversation_id": conversation_id, "message_id": Uuid::new_v4(), "reason": "spam" }),
            404,
        ),
        (json!({ "conversation_id": Uuid::new_v4(), "reason": "spam" }), 404),
    ];

    for (body, expected) in cases {
        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/reports")
                .insert_header(bearer(alice))
                .set_json(&body)
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), expected, "{body}");
    }
    assert!(ctx.store.reports().await.is_empty());
}
