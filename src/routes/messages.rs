use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::ContentType;
use crate::routes::pagination_headers;
use crate::services::message_service::{ListMessages, SendMessage};
use crate::state::AppState;
use actix_web::{get, http::header, post, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const IDEMPOTENT_REPLAYED_HEADER: &str = "idempotent-replayed";

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub content_type: ContentType,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub before_id: Option<Uuid>,
    pub after_id: Option<Uuid>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

/// Send a message
/// POST /conversations/{id}/messages
#[post("/conversations/{id}/messages")]
pub async fn send_message(
    req: HttpRequest,
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = path.into_inner();
    let body = body.into_inner();
    let idempotency_key = req
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let submission = state
        .messages
        .send(SendMessage {
            conversation_id,
            sender_id: user.id,
            content: body.content,
            content_type: body.content_type,
            idempotency_key,
        })
        .await?;

    let message = submission.message;
    if submission.created {
        Ok(HttpResponse::Created()
            .insert_header((
                header::LOCATION,
                format!("/conversations/{conversation_id}/messages/{}", message.id),
            ))
            .json(message))
    } else {
        Ok(HttpResponse::Ok()
            .insert_header((IDEMPOTENT_REPLAYED_HEADER, "true"))
            .json(message))
    }
}

/// List messages, ascending by (created_at, id)
/// GET /conversations/{id}/messages
#[get("/conversations/{id}/messages")]
pub async fn list_messages(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
    query: web::Query<ListMessagesQuery>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = path.into_inner();
    let query = query.into_inner();

    let page = state
        .messages
        .list(
            user.id,
            conversation_id,
            ListMessages {
                before_id: query.before_id,
                after_id: query.after_id,
                cursor: query.cursor,
                limit: query.limit,
            },
        )
        .await?;

    let mut response = HttpResponse::Ok();
    pagination_headers(
        &mut response,
        &format!("/conversations/{conversation_id}/messages"),
        page.next_cursor.as_deref(),
        page.limit,
        page.has_more,
    );

    Ok(response.json(json!({
        "messages": page.messages,
        "has_more": page.has_more,
        "next_cursor": page.next_cursor,
    })))
}

/// GET /conversations/{id}/messages/{message_id}
#[get("/conversations/{id}/messages/{message_id}")]
pub async fn get_message(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, message_id) = path.into_inner();
    let message = state.messages.get(user.id, conversation_id, message_id).await?;
    Ok(HttpResponse::Ok().json(message))
}
