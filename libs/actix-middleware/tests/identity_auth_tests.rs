/// Authentication middleware tests
/// Every route behind `IdentityAuth` must reject missing or invalid credentials with the
/// shared error envelope, and skipped paths must stay reachable.
use actix_middleware::{
    IdentityAuth, IdentityError, IdentityVerifier, RequestIdMiddleware, UserId,
};
use actix_web::{test, web, App, HttpResponse};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Accepts exactly one token
struct FixedVerifier {
    token: &'static str,
    user: Uuid,
}

#[async_trait]
impl IdentityVerifier for FixedVerifier {
    async fn verify(&self, credential: &str) -> Result<Uuid, IdentityError> {
        if credential == self.token {
            Ok(self.user)
        } else {
            Err(IdentityError::Invalid("unknown token".into()))
        }
    }
}

async fn whoami(user: UserId) -> HttpResponse {
    HttpResponse::Ok().body(user.0.to_string())
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

fn verifier(user: Uuid) -> Arc<dyn IdentityVerifier> {
    Arc::new(FixedVerifier {
        token: "good-token",
        user,
    })
}

#[actix_rt::test]
async fn test_valid_credential_resolves_user() {
    let user = Uuid::new_v4();
    let app = test::init_service(
        App::new()
            .wrap(IdentityAuth::new(verifier(user)))
            .route("/me", web::get().to(whoami)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/me")
        .insert_header(("Authorization", "Bearer good-token"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body = test::read_body(resp).await;
    assert_eq!(body, user.to_string().as_bytes());
}

#[actix_rt::test]
async fn test_missing_credential_gets_error_envelope() {
    let app = test::init_service(
        App::new()
            .wrap(IdentityAuth::new(verifier(Uuid::new_v4())))
            .wrap(RequestIdMiddleware::new())
            .route("/me", web::get().to(whoami)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/me")
        .insert_header(("X-Request-ID", "req-42"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "unauthorized");
    assert_eq!(body["error"]["request_id"], "req-42");
}

#[actix_rt::test]
async fn test_invalid_credential_rejected() {
    let app = test::init_service(
        App::new()
            .wrap(IdentityAuth::new(verifier(Uuid::new_v4())))
            .route("/me", web::get().to(whoami)),
    )
    .await;

    for header in ["Bearer bad-token", "Basic good-token", "Bearer "] {
        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header(("Authorization", header))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401, "header {header:?} should be rejected");
    }
}

#[actix_rt::test]
async fn test_skipped_path_needs_no_credential() {
    let app = test::init_service(
        App::new()
            .wrap(IdentityAuth::new(verifier(Uuid::new_v4())).skip_path("/health"))
            .route("/health", web::get().to(health))
            .route("/me", web::get().to(whoami)),
    )
    .await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), 200);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/me").to_request()).await;
    assert_eq!(resp.status(), 401);
}

#[actix_rt::test]
async fn test_request_id_echoed_on_response() {
    let app = test::init_service(
        App::new()
            .wrap(RequestIdMiddleware::new())
            .route("/health", web::get().to(health)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/health")
        .insert_header(("X-Request-ID", "trace-me"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(
        resp.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
        Some("trace-me")
    );
}
